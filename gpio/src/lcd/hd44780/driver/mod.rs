mod gpio;

use crate::{GpioError, GpioResult};
pub use gpio::*;
use log::warn;
use std::fmt::Debug;

// Instructions. The flags listed under each instruction are OR-ed into it.

/// Clears the DDRAM and returns the cursor home. Slow, ~1.52 ms.
pub const CLEAR_DISPLAY: u8 = 0b00000001;
/// Returns the cursor and display shift home. Slow, ~1.52 ms.
pub const RETURN_HOME: u8 = 0b00000010;

/// Entry mode set: `000001IS`.
pub const ENTRY_MODE_SET: u8 = 0b00000100;
/// `I`: increment the address counter (cursor moves right).
pub const ENTRY_INCREMENT: u8 = 0b00000010;
/// `S`: shift the display along with the cursor.
pub const ENTRY_SHIFT: u8 = 0b00000001;

/// Display on/off control: `00001DCB`.
pub const DISPLAY_CONTROL: u8 = 0b00001000;
/// `D`: display on.
pub const DISPLAY_ON: u8 = 0b00000100;
/// `C`: underline cursor on.
pub const CURSOR_ON: u8 = 0b00000010;
/// `B`: blinking block cursor on.
pub const BLINK_ON: u8 = 0b00000001;

/// Cursor or display shift: `0001SR??`.
pub const CURSOR_SHIFT: u8 = 0b00010000;
/// `S`: shift the display instead of moving the cursor.
pub const SHIFT_DISPLAY: u8 = 0b00001000;
/// `R`: shift to the right.
pub const SHIFT_RIGHT: u8 = 0b00000100;

/// Function set: `001DNF??`. `D` (8-bit data length) is always left at `0`, this driver only
/// speaks the 4-bit protocol.
pub const FUNCTION_SET: u8 = 0b00100000;
/// `N`: two display lines.
pub const TWO_LINES: u8 = 0b00001000;
/// `F`: 5x10 dot font. Ignored by the controller with two lines.
pub const FONT_5X10: u8 = 0b00000100;

/// Set CGRAM address: `01AAAAAA`.
pub const SET_CGRAM_ADDRESS: u8 = 0b01000000;
pub const CGRAM_ADDRESS_MASK: u8 = 0b00111111;

/// Set DDRAM address: `1AAAAAAA`.
pub const SET_DDRAM_ADDRESS: u8 = 0b10000000;
pub const DDRAM_ADDRESS_MASK: u8 = 0b01111111;

/// DDRAM address of the first column of the second row.
pub const SECOND_ROW_OFFSET: u8 = 0x40;

/// Value of the register select line for a write.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RsMode {
    /// RS low, the byte goes to the instruction register.
    Command,
    /// RS high, the byte goes to the data register (DDRAM or CGRAM).
    Character,
}

impl RsMode {
    /// Gets the level the RS line is driven to.
    pub fn level(self) -> bool {
        matches!(self, RsMode::Character)
    }
}

/// Maps a 1-indexed (row, column) position of a 2-row display to its DDRAM address.
///
/// Rows other than 1 and 2 map to address `0`. Columns are not checked against the display width,
/// the arithmetic wraps modulo 256, so column `0` maps one below the row start.
pub fn ddram_address(row: u8, column: u8) -> u8 {
    let column = column.wrapping_sub(1);
    match row {
        1 => column,
        2 => SECOND_ROW_OFFSET.wrapping_add(column),
        _ => 0,
    }
}

/// The `HD44780Driver` trait defines the command set of the HD44780 controller.
///
/// All methods take `&mut self`: the bus has no notion of reentrancy, and a byte interleaved into
/// another one would corrupt the nibble sequence. Callers sharing a driver between threads have to
/// wrap it in a lock.
pub trait HD44780Driver: Debug {
    /// Initializes the HD44780 controller: 4-bit interface, 2 lines, 5x8 font, display on, cursor
    /// off, cleared, cursor moving right.
    ///
    /// Must be called once after power-up, before any other command. If it fails halfway the
    /// controller state is unknown, and it has to be called again.
    fn init(&mut self) -> GpioResult<()>;

    /// Clears the display and sets the cursor to the home position.
    fn clear_display(&mut self) -> GpioResult<()> {
        self.send_command(CLEAR_DISPLAY)
    }

    /// Sets the cursor to the home position.
    fn return_home(&mut self) -> GpioResult<()> {
        self.send_command(RETURN_HOME)
    }

    /// Sets the display to the specified entry mode.
    fn set_entry_mode(&mut self, cursor_direction: CursorDirection, shift: bool) -> GpioResult<()> {
        let mut command = ENTRY_MODE_SET;
        if cursor_direction == CursorDirection::Right {
            command |= ENTRY_INCREMENT;
        }
        if shift {
            command |= ENTRY_SHIFT;
        }
        self.send_command(command)
    }

    /// Sets the display on/off, cursor on/off, and blinking on/off.
    fn set_display_control(
        &mut self,
        display_on: bool,
        cursor_on: bool,
        blink_on: bool,
    ) -> GpioResult<()> {
        let mut command = DISPLAY_CONTROL;
        if display_on {
            command |= DISPLAY_ON;
        }
        if cursor_on {
            command |= CURSOR_ON;
        }
        if blink_on {
            command |= BLINK_ON;
        }
        self.send_command(command)
    }

    /// Moves the cursor or shifts the display.
    fn cursor_shift(&mut self, display_shift: bool, direction: CursorDirection) -> GpioResult<()> {
        let mut command = CURSOR_SHIFT;
        if display_shift {
            command |= SHIFT_DISPLAY;
        }
        if direction == CursorDirection::Right {
            command |= SHIFT_RIGHT;
        }
        self.send_command(command)
    }

    /// Sets the number of lines and the font. The data length stays at 4 bits.
    fn function_set(&mut self, two_lines: bool, alt_font: bool) -> GpioResult<()> {
        let mut command = FUNCTION_SET;
        if two_lines {
            command |= TWO_LINES;
        }
        if alt_font {
            command |= FONT_5X10;
        }
        self.send_command(command)
    }

    /// Sets the CGRAM address.
    fn set_cgram_address(&mut self, address: u8) -> GpioResult<()> {
        if address > CGRAM_ADDRESS_MASK {
            return Err(GpioError::InvalidArgument);
        }
        self.send_command(SET_CGRAM_ADDRESS | address)
    }

    /// Sets the DDRAM address.
    fn set_ddram_address(&mut self, address: u8) -> GpioResult<()> {
        if address > DDRAM_ADDRESS_MASK {
            return Err(GpioError::InvalidArgument);
        }
        self.send_command(SET_DDRAM_ADDRESS | address)
    }

    /// Moves the cursor to the given 1-indexed row and column, see [ddram_address].
    ///
    /// Rows other than 1 and 2 fall back to the first DDRAM position. The position is not checked:
    /// the address is added to the instruction bit in 8-bit arithmetic, so column `0` or a column
    /// far past the display sends whatever byte the sum wraps to (`set_cursor(1, 0)` sends `0x7F`).
    fn set_cursor(&mut self, row: u8, column: u8) -> GpioResult<()> {
        if !(1..=2).contains(&row) {
            warn!("Row {} is out of range, moving the cursor to DDRAM address 0", row);
        }
        self.set_register_select(RsMode::Command)?;
        self.send_command(SET_DDRAM_ADDRESS.wrapping_add(ddram_address(row, column)))
    }

    /// Writes a single character at the cursor. RS is left low afterwards.
    fn put_char(&mut self, c: u8) -> GpioResult<()> {
        self.set_register_select(RsMode::Character)?;
        self.send_data(c)?;
        self.set_register_select(RsMode::Command)
    }

    /// Writes the bytes of `s` at the cursor, as-is. RS is left low afterwards.
    ///
    /// # Errors
    /// - `GpioError::InvalidArgument` if `s` is `None`.
    fn put_string(&mut self, s: Option<&[u8]>) -> GpioResult<()> {
        let s = s.ok_or(GpioError::InvalidArgument)?;
        self.set_register_select(RsMode::Character)?;
        for &byte in s {
            self.send_data(byte)?;
        }
        self.set_register_select(RsMode::Command)
    }

    /// Writes the raw bytes of `s` at the cursor.
    fn print(&mut self, s: &str) -> GpioResult<()> {
        self.put_string(Some(s.as_bytes()))
    }

    // Low-level commands
    // These raw commands are used by the high-level functions above.
    // They are not meant to be used directly, but implemented by the driver implementation.

    /// Sends a command to the HD44780 controller.
    /// Sets the RS pin to 0 (command).
    fn send_command(&mut self, command: u8) -> GpioResult<()>;

    /// Sends data to the HD44780 controller.
    /// Sets the RS pin to 1 (data).
    fn send_data(&mut self, data: u8) -> GpioResult<()>;

    /// Drives the RS pin without sending anything.
    fn set_register_select(&mut self, mode: RsMode) -> GpioResult<()>;
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CursorDirection {
    /// Moves the cursor to the left after writing/reading data.
    Left,
    /// Moves the cursor to the right after writing/reading data.
    Right,
}
