//! GpiodDriver implementation for managing GPIO pins using the gpiod library.
//!
//! Lines are requested from the kernel's GPIO character device only when a pin or bus is switched
//! to output, and released when the handle is dropped.
use crate::{GpioBus, GpioBusOutput, GpioDriver, GpioError, GpioOutput, GpioPin, GpioResult};
use bitvec::vec::BitVec;
use log::trace;
use std::fmt::{Debug, Formatter};
use std::path::Path;
use std::sync::atomic::AtomicU8;

/// GpiodDriver is a GPIO driver that uses the gpiod library to manage GPIO pins.
///
/// Keeps track of the pins handed out, so a pin can only be owned by one handle at a time.
pub struct GpiodDriver {
    chip: gpiod::Chip,
    lines: LineReservations,
}

impl GpiodDriver {
    pub fn new(chip: gpiod::Chip) -> Self {
        let lines = LineReservations::new(chip.num_lines() as usize);
        Self { chip, lines }
    }

    /// Opens the GPIO chip at `path`, e.g. `/dev/gpiochip0`.
    pub fn open(path: &Path) -> GpioResult<Self> {
        let chip = gpiod::Chip::new(path)?;
        Ok(Self::new(chip))
    }

    fn request_output(&self, indices: &[usize]) -> GpioResult<gpiod::Lines<gpiod::Output>> {
        trace!("Requesting lines {:?} as output", indices);
        let lines = self.chip.request_lines(
            gpiod::Options::output(
                indices
                    .iter()
                    .map(|&index| index as u32)
                    .collect::<Vec<_>>(),
            )
            .consumer(env!("CARGO_PKG_NAME")),
        )?;
        Ok(lines)
    }
}

impl Debug for GpiodDriver {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "GpiodDriver({})", self.chip.name())
    }
}

impl GpioDriver for GpiodDriver {
    fn count(&self) -> GpioResult<usize> {
        Ok(self.lines.count())
    }

    fn get_pin(&self, index: usize) -> GpioResult<Box<dyn GpioPin + '_>> {
        let reservation = self.lines.reserve([index])?;
        Ok(Box::new(GpiodPin {
            driver: self,
            reservation,
        }))
    }

    fn get_pin_bus<const N: usize>(
        &self,
        indices: [usize; N],
    ) -> GpioResult<Box<dyn GpioBus<N> + '_>> {
        let reservation = self.lines.reserve(indices)?;
        Ok(Box::new(GpiodBus {
            driver: self,
            reservation,
        }))
    }
}

/// In-use bitmap of the lines of one chip.
struct LineReservations {
    used: BitVec<AtomicU8>,
}

impl LineReservations {
    fn new(count: usize) -> Self {
        Self {
            used: BitVec::repeat(false, count),
        }
    }

    fn count(&self) -> usize {
        self.used.len()
    }

    fn is_reserved(&self, index: usize) -> bool {
        index < self.count() && self.used[index]
    }

    /// Reserves all of `indices` or none of them.
    ///
    /// # Errors
    /// - `GpioError::InvalidArgument` if an index is out of range or listed twice.
    /// - `GpioError::AlreadyInUse` if a line is held by another reservation.
    fn reserve<const N: usize>(&self, indices: [usize; N]) -> GpioResult<Reservation<'_, N>> {
        if indices.iter().any(|&index| index >= self.count()) {
            return Err(GpioError::InvalidArgument);
        }

        if (1..N).any(|i| indices[..i].contains(&indices[i])) {
            return Err(GpioError::InvalidArgument);
        }

        if indices.iter().any(|&index| self.used[index]) {
            return Err(GpioError::AlreadyInUse);
        }

        for index in indices {
            self.used.set_aliased(index, true);
        }
        trace!("Reserved lines {:?}", indices);

        Ok(Reservation {
            lines: self,
            indices,
        })
    }
}

/// Lines held in a [LineReservations] map, freed on drop.
struct Reservation<'a, const N: usize> {
    lines: &'a LineReservations,
    indices: [usize; N],
}

impl<const N: usize> Drop for Reservation<'_, N> {
    fn drop(&mut self) {
        for index in self.indices {
            self.lines.used.set_aliased(index, false);
        }
        trace!("Released lines {:?}", self.indices);
    }
}

struct GpiodPin<'a> {
    driver: &'a GpiodDriver,
    reservation: Reservation<'a, 1>,
}

impl GpiodPin<'_> {
    fn index(&self) -> usize {
        self.reservation.indices[0]
    }
}

impl Debug for GpiodPin<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[{}]", self.driver, self.index())
    }
}

impl GpioPin for GpiodPin<'_> {
    fn as_output(&mut self) -> GpioResult<Box<dyn GpioOutput + '_>> {
        let line = self.driver.request_output(&self.reservation.indices)?;
        let output = GpiodOutput { pin: self, line };
        Ok(Box::new(output))
    }
}

struct GpiodOutput<'a> {
    pin: &'a GpiodPin<'a>,
    line: gpiod::Lines<gpiod::Output>,
}

impl Debug for GpiodOutput<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[output]", self.pin)
    }
}

impl GpioOutput for GpiodOutput<'_> {
    fn write(&self, value: bool) -> GpioResult<()> {
        self.line.set_values([value])?;
        Ok(())
    }

    fn level(&self) -> GpioResult<bool> {
        let values = self.line.get_values([false])?;
        Ok(values[0])
    }
}

struct GpiodBus<'a, const N: usize> {
    driver: &'a GpiodDriver,
    reservation: Reservation<'a, N>,
}

impl<const N: usize> Debug for GpiodBus<'_, N> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}{:?}", self.driver, self.reservation.indices)
    }
}

impl<const N: usize> GpioBus<N> for GpiodBus<'_, N> {
    fn as_output(&mut self) -> GpioResult<Box<dyn GpioBusOutput<N> + '_>> {
        let line = self.driver.request_output(&self.reservation.indices)?;
        let output = GpiodBusOutput { bus: self, line };
        Ok(Box::new(output))
    }
}

struct GpiodBusOutput<'a, const N: usize> {
    bus: &'a GpiodBus<'a, N>,
    line: gpiod::Lines<gpiod::Output>,
}

impl<const N: usize> Debug for GpiodBusOutput<'_, N> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[output]", self.bus)
    }
}

impl<const N: usize> GpioBusOutput<N> for GpiodBusOutput<'_, N> {
    fn write(&self, values: &[bool; N]) -> GpioResult<()> {
        self.line.set_values(*values)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RS: usize = 17;
    const EN: usize = 18;
    const DATA: [usize; 4] = [21, 22, 23, 24];

    #[test]
    fn line_is_taken_once() {
        let lines = LineReservations::new(28);
        let rs = lines.reserve([RS]).unwrap();
        assert!(matches!(lines.reserve([RS]), Err(GpioError::AlreadyInUse)));
        assert!(lines.is_reserved(RS));
        drop(rs);
    }

    #[test]
    fn bus_overlapping_a_held_line_reserves_nothing() {
        let lines = LineReservations::new(28);
        let _rs = lines.reserve([RS]).unwrap();

        let overlapping = lines.reserve([21, 22, RS, 24]);
        assert!(matches!(overlapping, Err(GpioError::AlreadyInUse)));
        for index in [21, 22, 24] {
            assert!(!lines.is_reserved(index));
        }
        assert!(lines.is_reserved(RS));
    }

    #[test]
    fn dropped_handle_frees_its_lines() {
        let lines = LineReservations::new(28);
        let rs = lines.reserve([RS]).unwrap();
        let data = lines.reserve(DATA).unwrap();
        drop(rs);
        drop(data);

        assert!((0..lines.count()).all(|index| !lines.is_reserved(index)));
        let _rs = lines.reserve([RS]).unwrap();
        let _data = lines.reserve(DATA).unwrap();
    }

    #[test]
    fn failed_acquisition_releases_what_it_took() {
        let lines = LineReservations::new(28);
        let _data = lines.reserve(DATA).unwrap();

        let attempt = || -> GpioResult<()> {
            let _rs = lines.reserve([RS])?;
            let _en = lines.reserve([EN])?;
            let _clash = lines.reserve([DATA[0]])?;
            Ok(())
        };
        assert!(matches!(attempt(), Err(GpioError::AlreadyInUse)));
        assert!(!lines.is_reserved(RS));
        assert!(!lines.is_reserved(EN));
    }

    #[test]
    fn out_of_range_index_is_invalid() {
        let lines = LineReservations::new(28);
        assert!(matches!(lines.reserve([28]), Err(GpioError::InvalidArgument)));
        assert!(matches!(
            lines.reserve([21, 22, 23, 99]),
            Err(GpioError::InvalidArgument)
        ));
        assert!(!lines.is_reserved(21));
    }

    #[test]
    fn repeated_index_in_bus_is_invalid() {
        let lines = LineReservations::new(28);
        assert!(matches!(
            lines.reserve([21, 22, 21, 24]),
            Err(GpioError::InvalidArgument)
        ));
        assert!(!lines.is_reserved(21));
    }
}
