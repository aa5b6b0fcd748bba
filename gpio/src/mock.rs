//! Recording implementations of the GPIO and delay traits.
//!
//! Every handle created from one [MockBus] appends to the same event log, so the exact order of
//! line transitions and sleeps can be inspected afterwards. Used by the tests and by dry runs on
//! machines without the display attached.

use crate::lcd::hd44780::driver::RsMode;
use crate::{Delay, GpioBusOutput, GpioError, GpioOutput, GpioResult};
use std::cell::{Cell, RefCell};
use std::io::ErrorKind;
use std::rc::Rc;
use std::time::Duration;

/// A single recorded action.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BusEvent {
    /// The RS line was driven.
    Rs(bool),
    /// The E line was driven.
    En(bool),
    /// A nibble was put on D4–D7.
    Data(u8),
    /// [Delay::delay] was called.
    Delay(Duration),
    /// [Delay::delay_range] was called.
    DelayRange(Duration, Duration),
}

/// A nibble latched into the controller by a falling edge on E.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Latch {
    pub rs: bool,
    pub nibble: u8,
}

#[derive(Debug, Default)]
struct Shared {
    events: RefCell<Vec<BusEvent>>,
    failing: Cell<bool>,
}

impl Shared {
    fn record(&self, event: BusEvent) -> GpioResult<()> {
        if self.failing.get() {
            return Err(GpioError::HardwareUnavailable(ErrorKind::BrokenPipe));
        }
        self.events.borrow_mut().push(event);
        Ok(())
    }
}

/// Shared event log and factory for the mock handles.
#[derive(Clone, Debug, Default)]
pub struct MockBus {
    shared: Rc<Shared>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the RS line.
    pub fn rs(&self) -> MockOutput {
        MockOutput::new(self.shared.clone(), BusEvent::Rs)
    }

    /// Creates the E line.
    pub fn en(&self) -> MockOutput {
        MockOutput::new(self.shared.clone(), BusEvent::En)
    }

    /// Creates the D4–D7 bus.
    pub fn data(&self) -> MockBusOutput {
        MockBusOutput {
            shared: self.shared.clone(),
        }
    }

    pub fn delay(&self) -> MockDelay {
        MockDelay {
            shared: self.shared.clone(),
        }
    }

    /// Makes every handle fail with `GpioError::HardwareUnavailable` from now on.
    pub fn set_failing(&self, failing: bool) {
        self.shared.failing.set(failing);
    }

    pub fn events(&self) -> Vec<BusEvent> {
        self.shared.events.borrow().clone()
    }

    pub fn clear(&self) {
        self.shared.events.borrow_mut().clear();
    }

    /// Replays the log and returns every nibble latched by a high-to-low transition of E, along
    /// with the RS level at that moment.
    pub fn latched_nibbles(&self) -> Vec<Latch> {
        let mut latches = Vec::new();
        let mut rs = false;
        let mut en = false;
        let mut data = 0;
        for event in self.shared.events.borrow().iter() {
            match *event {
                BusEvent::Rs(level) => rs = level,
                BusEvent::Data(nibble) => data = nibble,
                BusEvent::En(level) => {
                    if en && !level {
                        latches.push(Latch { rs, nibble: data });
                    }
                    en = level;
                }
                BusEvent::Delay(_) | BusEvent::DelayRange(_, _) => {}
            }
        }
        latches
    }

    /// Pairs the latched nibbles into bytes, high nibble first, after dropping the first `skip`
    /// nibbles (the raw nibbles of the init sequence).
    pub fn latched_bytes(&self, skip: usize) -> Vec<(RsMode, u8)> {
        self.latched_nibbles()
            .into_iter()
            .skip(skip)
            .collect::<Vec<_>>()
            .chunks_exact(2)
            .map(|pair| {
                let mode = if pair[0].rs {
                    RsMode::Character
                } else {
                    RsMode::Command
                };
                (mode, (pair[0].nibble << 4) | pair[1].nibble)
            })
            .collect()
    }

    /// Sum of all recorded sleeps, counting the minimum of every range.
    pub fn total_delay(&self) -> Duration {
        self.shared
            .events
            .borrow()
            .iter()
            .map(|event| match *event {
                BusEvent::Delay(duration) => duration,
                BusEvent::DelayRange(min, _) => min,
                _ => Duration::ZERO,
            })
            .sum()
    }
}

/// A recording output line.
#[derive(Debug)]
pub struct MockOutput {
    shared: Rc<Shared>,
    event: fn(bool) -> BusEvent,
    level: Cell<bool>,
}

impl MockOutput {
    fn new(shared: Rc<Shared>, event: fn(bool) -> BusEvent) -> Self {
        MockOutput {
            shared,
            event,
            level: Cell::new(false),
        }
    }
}

impl GpioOutput for MockOutput {
    fn write(&self, value: bool) -> GpioResult<()> {
        self.shared.record((self.event)(value))?;
        self.level.set(value);
        Ok(())
    }

    fn level(&self) -> GpioResult<bool> {
        if self.shared.failing.get() {
            return Err(GpioError::HardwareUnavailable(ErrorKind::BrokenPipe));
        }
        Ok(self.level.get())
    }
}

/// A recording 4-line output bus. Records each write as a nibble, LSb on the first line.
#[derive(Debug)]
pub struct MockBusOutput {
    shared: Rc<Shared>,
}

impl GpioBusOutput<4> for MockBusOutput {
    fn write(&self, values: &[bool; 4]) -> GpioResult<()> {
        let nibble = values
            .iter()
            .enumerate()
            .fold(0u8, |acc, (i, &bit)| acc | ((bit as u8) << i));
        self.shared.record(BusEvent::Data(nibble))
    }
}

/// A recording delay that returns immediately.
#[derive(Debug)]
pub struct MockDelay {
    shared: Rc<Shared>,
}

impl Delay for MockDelay {
    fn delay(&self, duration: Duration) -> GpioResult<()> {
        self.shared.record(BusEvent::Delay(duration))
    }

    fn delay_range(&self, min: Duration, max: Duration) -> GpioResult<()> {
        if min > max {
            return Err(GpioError::InvalidArgument);
        }
        self.shared.record(BusEvent::DelayRange(min, max))
    }
}
