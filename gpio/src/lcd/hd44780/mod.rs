//! HD44780 LCD module.
//!
//! Drives the controller in 4-bit mode over six GPIO lines: RS, E and D4–D7. The R/W line of the
//! display is expected to be tied to GND, so the driver never reads from the controller and relies
//! on fixed delays instead of the busy flag.
//!
//! See [driver::HD44780Driver] for the command set and [driver::GpioHD44780Driver] for the bus
//! implementation.

pub mod driver;

use crate::{GpioError, GpioResult};

/// Physical GPIO lines the display is wired to.
///
/// Fixed once created; the driver itself only sees the line handles acquired from these offsets.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LineAssignment {
    rs: usize,
    en: usize,
    data: [usize; 4],
}

impl LineAssignment {
    /// Creates a new line assignment. `data` lists D4, D5, D6 and D7, in that order.
    ///
    /// # Errors
    /// - `GpioError::InvalidArgument` if the same line is assigned to more than one role.
    pub fn new(rs: usize, en: usize, data: [usize; 4]) -> GpioResult<Self> {
        let assignment = LineAssignment { rs, en, data };
        let lines = assignment.lines();
        for (i, line) in lines.iter().enumerate() {
            if lines[i + 1..].contains(line) {
                return Err(GpioError::InvalidArgument);
            }
        }
        Ok(assignment)
    }

    /// Register select line.
    pub fn rs(&self) -> usize {
        self.rs
    }

    /// Enable line.
    pub fn en(&self) -> usize {
        self.en
    }

    /// Data lines D4–D7.
    pub fn data(&self) -> [usize; 4] {
        self.data
    }

    /// All six lines: RS, E, D4, D5, D6, D7.
    pub fn lines(&self) -> [usize; 6] {
        [
            self.rs,
            self.en,
            self.data[0],
            self.data[1],
            self.data[2],
            self.data[3],
        ]
    }
}

impl Default for LineAssignment {
    /// The Raspberry Pi wiring: RS on GPIO17, E on GPIO18, D4–D7 on GPIO21–24.
    fn default() -> Self {
        LineAssignment {
            rs: 17,
            en: 18,
            data: [21, 22, 23, 24],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let default = LineAssignment::default();
        assert_eq!(
            LineAssignment::new(default.rs(), default.en(), default.data()),
            Ok(default)
        );
        assert_eq!(default.lines(), [17, 18, 21, 22, 23, 24]);
    }

    #[test]
    fn rejects_shared_lines() {
        assert_eq!(
            LineAssignment::new(17, 17, [21, 22, 23, 24]),
            Err(GpioError::InvalidArgument)
        );
        assert_eq!(
            LineAssignment::new(17, 18, [21, 22, 21, 24]),
            Err(GpioError::InvalidArgument)
        );
        assert_eq!(
            LineAssignment::new(24, 18, [21, 22, 23, 24]),
            Err(GpioError::InvalidArgument)
        );
    }
}
