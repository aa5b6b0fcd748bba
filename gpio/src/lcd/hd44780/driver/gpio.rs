use crate::lcd::hd44780::driver::{CursorDirection, HD44780Driver, RsMode};
use crate::{Delay, GpioBusOutput, GpioOutput, GpioResult};
use log::{debug, trace};
use std::time::Duration;

/// Width of the E pulse. The datasheet asks for at least 450 ns.
const ENABLE_PULSE: Duration = Duration::from_micros(1);
/// Wait after a nibble written with RS high.
const DATA_SETTLE: Duration = Duration::from_micros(200);
/// Wait after a nibble written with RS low. Long enough for clear display and return home.
const COMMAND_SETTLE_MIN: Duration = Duration::from_micros(4500);
const COMMAND_SETTLE_MAX: Duration = Duration::from_micros(5500);

/// Wait for VCC to rise before talking to the controller. Datasheet: more than 15 ms.
const POWER_ON_MIN: Duration = Duration::from_millis(15);
const POWER_ON_MAX: Duration = Duration::from_millis(16);
/// Wait after the first and the last init nibble. Datasheet: more than 4.1 ms.
const INIT_LONG_MIN: Duration = Duration::from_micros(4200);
const INIT_LONG_MAX: Duration = Duration::from_micros(5000);
/// Wait after the second and third init nibble. Datasheet: more than 100 us.
const INIT_SHORT: Duration = Duration::from_micros(200);

/// Upper nibble of "function set, 8-bit", repeated to synchronize with the controller.
const SYNC_NIBBLE: u8 = 0b0011;
/// Upper nibble of "function set, 4-bit".
const FOUR_BIT_NIBBLE: u8 = 0b0010;

/// HD44780 driver talking to the controller over GPIO pins in 4-bit mode.
///
/// Every nibble is followed by a fixed settle time instead of polling the busy flag. The settle
/// time is picked from the level the RS pin is actually driven to when the nibble is latched: 200 us
/// with RS high, 4.5–5.5 ms with RS low. The long wait covers clear display and return home.
#[derive(Debug)]
pub struct GpioHD44780Driver<'a> {
    pin_e: &'a dyn GpioOutput,
    pin_rs: &'a dyn GpioOutput,
    data_bus: &'a dyn GpioBusOutput<4>,
    delay: &'a dyn Delay,
}

impl<'a> GpioHD44780Driver<'a> {
    /// Creates a new GpioHD44780Driver instance using a 4-bit data bus.
    ///
    /// # Parameters
    ///
    /// - `pin_e`: Enable output pin.
    /// - `pin_rs`: Register select output pin. Has to support reading back its level.
    /// - `data_bus`: D4–D7 of the display, D4 first.
    /// - `delay`: Delay provider used for all bus timing.
    pub fn new_4bit(
        pin_e: &'a dyn GpioOutput,
        pin_rs: &'a dyn GpioOutput,
        data_bus: &'a dyn GpioBusOutput<4>,
        delay: &'a dyn Delay,
    ) -> Self {
        GpioHD44780Driver {
            pin_e,
            pin_rs,
            data_bus,
            delay,
        }
    }

    fn pulse_e(&self) -> GpioResult<()> {
        // Set E pin to high
        self.pin_e.write(true)?;
        self.delay.delay(ENABLE_PULSE)?;
        // Set E pin to low
        self.pin_e.write(false)
    }

    /// Waits for the controller to process the nibble just latched.
    fn settle(&self) -> GpioResult<()> {
        if self.pin_rs.level()? {
            self.delay.delay(DATA_SETTLE)
        } else {
            self.delay.delay_range(COMMAND_SETTLE_MIN, COMMAND_SETTLE_MAX)
        }
    }

    fn write_nibble(&self, nibble: u8) -> GpioResult<()> {
        self.data_bus.write_nibble(nibble)?;
        self.pulse_e()?;
        self.settle()
    }

    fn send(&mut self, data: u8, mode: RsMode) -> GpioResult<()> {
        trace!("Sending data: {:08b}, RS: {:?}", data, mode);

        // Set RS pin
        self.pin_rs.write(mode.level())?;

        let high_nibble = (data >> 4) & 0x0F;
        let low_nibble = data & 0x0F;

        trace!("Writing HN: {:04b}", high_nibble);
        self.write_nibble(high_nibble)?;
        trace!("Writing LN: {:04b}", low_nibble);
        self.write_nibble(low_nibble)
    }
}

impl HD44780Driver for GpioHD44780Driver<'_> {
    fn init(&mut self) -> GpioResult<()> {
        self.pin_e.write(false)?;
        self.pin_rs.write(RsMode::Command.level())?;

        debug!("Waiting for the controller to power up");
        self.delay.delay_range(POWER_ON_MIN, POWER_ON_MAX)?;

        // Synchronize. Until the switch to 4-bit mode, every pulse is a whole instruction, so these
        // are single nibbles and not `send`.
        debug!("Synchronizing");
        self.data_bus.write_nibble(SYNC_NIBBLE)?;
        self.pulse_e()?;
        self.delay.delay_range(INIT_LONG_MIN, INIT_LONG_MAX)?;
        self.pulse_e()?;
        self.delay.delay(INIT_SHORT)?;
        self.pulse_e()?;
        self.delay.delay(INIT_SHORT)?;

        debug!("Switching to 4-bit mode");
        self.data_bus.write_nibble(FOUR_BIT_NIBBLE)?;
        self.pulse_e()?;
        self.delay.delay_range(INIT_LONG_MIN, INIT_LONG_MAX)?;

        // The display stays off until it's cleared
        self.function_set(true, false)?;
        self.set_display_control(false, false, false)?;
        self.clear_display()?;
        self.set_entry_mode(CursorDirection::Right, false)?;
        self.set_display_control(true, false, false)?;

        debug!("Display initialized");
        Ok(())
    }

    fn send_command(&mut self, command: u8) -> GpioResult<()> {
        self.send(command, RsMode::Command)
    }

    fn send_data(&mut self, data: u8) -> GpioResult<()> {
        self.send(data, RsMode::Character)
    }

    fn set_register_select(&mut self, mode: RsMode) -> GpioResult<()> {
        self.pin_rs.write(mode.level())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GpioError;
    use crate::mock::{BusEvent, Latch, MockBus};
    use proptest::prelude::*;
    use std::io::ErrorKind;

    const INIT_NIBBLES: usize = 4;

    /// Runs `f` against a driver wired to a fresh mock bus, and returns the bus.
    fn with_driver(f: impl FnOnce(&mut GpioHD44780Driver<'_>) -> GpioResult<()>) -> MockBus {
        let bus = MockBus::new();
        let (rs, e, data, delay) = (bus.rs(), bus.en(), bus.data(), bus.delay());
        let mut driver = GpioHD44780Driver::new_4bit(&e, &rs, &data, &delay);
        f(&mut driver).unwrap();
        bus
    }

    fn settle_for(rs: bool) -> BusEvent {
        if rs {
            BusEvent::Delay(DATA_SETTLE)
        } else {
            BusEvent::DelayRange(COMMAND_SETTLE_MIN, COMMAND_SETTLE_MAX)
        }
    }

    proptest! {
        #[test]
        fn send_writes_high_then_low_nibble(byte in any::<u8>(), character in any::<bool>()) {
            let mode = if character { RsMode::Character } else { RsMode::Command };
            let bus = with_driver(|driver| driver.send(byte, mode));

            prop_assert_eq!(
                bus.events(),
                vec![
                    BusEvent::Rs(character),
                    BusEvent::Data(byte >> 4),
                    BusEvent::En(true),
                    BusEvent::Delay(ENABLE_PULSE),
                    BusEvent::En(false),
                    settle_for(character),
                    BusEvent::Data(byte & 0x0F),
                    BusEvent::En(true),
                    BusEvent::Delay(ENABLE_PULSE),
                    BusEvent::En(false),
                    settle_for(character),
                ]
            );
            prop_assert_eq!(bus.latched_bytes(0), vec![(mode, byte)]);
        }
    }

    #[test]
    fn settle_follows_rs_line_not_last_mode() {
        let bus = MockBus::new();
        let (rs, e, data, delay) = (bus.rs(), bus.en(), bus.data(), bus.delay());
        let mut driver = GpioHD44780Driver::new_4bit(&e, &rs, &data, &delay);

        driver.send_command(0x01).unwrap();
        // Someone else raised RS after the command
        driver.set_register_select(RsMode::Character).unwrap();
        bus.clear();
        driver.settle().unwrap();
        assert_eq!(bus.events(), vec![BusEvent::Delay(DATA_SETTLE)]);

        driver.set_register_select(RsMode::Command).unwrap();
        bus.clear();
        driver.settle().unwrap();
        assert_eq!(
            bus.events(),
            vec![BusEvent::DelayRange(COMMAND_SETTLE_MIN, COMMAND_SETTLE_MAX)]
        );
    }

    #[test]
    fn init_sequence() {
        let bus = with_driver(|driver| driver.init());

        let nibbles = bus.latched_nibbles();
        assert_eq!(
            nibbles[..INIT_NIBBLES],
            [
                Latch { rs: false, nibble: 0b0011 },
                Latch { rs: false, nibble: 0b0011 },
                Latch { rs: false, nibble: 0b0011 },
                Latch { rs: false, nibble: 0b0010 },
            ]
        );
        assert_eq!(
            bus.latched_bytes(INIT_NIBBLES),
            vec![
                (RsMode::Command, 0x28),
                (RsMode::Command, 0x08),
                (RsMode::Command, 0x01),
                (RsMode::Command, 0x06),
                (RsMode::Command, 0x0C),
            ]
        );
    }

    #[test]
    fn init_timing() {
        let bus = with_driver(|driver| driver.init());
        let events = bus.events();

        assert_eq!(
            events[..13],
            [
                BusEvent::En(false),
                BusEvent::Rs(false),
                BusEvent::DelayRange(POWER_ON_MIN, POWER_ON_MAX),
                BusEvent::Data(SYNC_NIBBLE),
                BusEvent::En(true),
                BusEvent::Delay(ENABLE_PULSE),
                BusEvent::En(false),
                BusEvent::DelayRange(INIT_LONG_MIN, INIT_LONG_MAX),
                BusEvent::En(true),
                BusEvent::Delay(ENABLE_PULSE),
                BusEvent::En(false),
                BusEvent::Delay(INIT_SHORT),
                BusEvent::En(true),
            ]
        );
        assert_eq!(
            events[13..22],
            [
                BusEvent::Delay(ENABLE_PULSE),
                BusEvent::En(false),
                BusEvent::Delay(INIT_SHORT),
                BusEvent::Data(FOUR_BIT_NIBBLE),
                BusEvent::En(true),
                BusEvent::Delay(ENABLE_PULSE),
                BusEvent::En(false),
                BusEvent::DelayRange(INIT_LONG_MIN, INIT_LONG_MAX),
                BusEvent::Rs(false),
            ]
        );
    }

    #[test]
    fn every_enable_pulse_is_held() {
        let bus = with_driver(|driver| {
            driver.init()?;
            driver.print("Hello")
        });
        let events = bus.events();
        let mut pulses = 0;
        for (i, event) in events.iter().enumerate() {
            if *event == BusEvent::En(true) {
                assert_eq!(events[i + 1], BusEvent::Delay(ENABLE_PULSE));
                assert_eq!(events[i + 2], BusEvent::En(false));
                pulses += 1;
            }
        }
        assert_eq!(pulses, INIT_NIBBLES + 2 * (5 + 5));
    }

    #[test]
    fn clear_twice_is_identical() {
        let bus = with_driver(|driver| driver.clear_display());
        let first = bus.events();
        let bus = with_driver(|driver| {
            driver.clear_display()?;
            driver.clear_display()
        });
        let both = bus.events();

        assert_eq!(both.len(), first.len() * 2);
        assert_eq!(both[..first.len()], first[..]);
        assert_eq!(both[first.len()..], first[..]);
        assert_eq!(bus.latched_bytes(0), vec![(RsMode::Command, 0x01); 2]);
    }

    #[test]
    fn cursor_then_char() {
        let bus = with_driver(|driver| {
            driver.set_cursor(2, 5)?;
            driver.put_char(b'A')
        });

        assert_eq!(
            bus.latched_bytes(0),
            vec![(RsMode::Command, 0xC4), (RsMode::Character, 0x41)]
        );
        assert_eq!(bus.events().last(), Some(&BusEvent::Rs(false)));
    }

    #[test]
    fn put_string_writes_every_byte() {
        let bus = with_driver(|driver| driver.put_string(Some(b"Hi!")));

        assert_eq!(
            bus.latched_bytes(0),
            vec![
                (RsMode::Character, b'H'),
                (RsMode::Character, b'i'),
                (RsMode::Character, b'!'),
            ]
        );
        assert_eq!(bus.events().first(), Some(&BusEvent::Rs(true)));
        assert_eq!(bus.events().last(), Some(&BusEvent::Rs(false)));
    }

    #[test]
    fn put_string_empty_toggles_rs_only() {
        let bus = with_driver(|driver| driver.put_string(Some(b"")));
        assert_eq!(bus.events(), vec![BusEvent::Rs(true), BusEvent::Rs(false)]);
    }

    #[test]
    fn put_string_none_touches_nothing() {
        let bus = MockBus::new();
        let (rs, e, data, delay) = (bus.rs(), bus.en(), bus.data(), bus.delay());
        let mut driver = GpioHD44780Driver::new_4bit(&e, &rs, &data, &delay);

        assert_eq!(driver.put_string(None), Err(GpioError::InvalidArgument));
        assert!(bus.events().is_empty());
    }

    #[test]
    fn errors_propagate() {
        let bus = MockBus::new();
        let (rs, e, data, delay) = (bus.rs(), bus.en(), bus.data(), bus.delay());
        let mut driver = GpioHD44780Driver::new_4bit(&e, &rs, &data, &delay);

        bus.set_failing(true);
        assert_eq!(
            driver.init(),
            Err(GpioError::HardwareUnavailable(ErrorKind::BrokenPipe))
        );
        assert_eq!(
            driver.put_char(b'x'),
            Err(GpioError::HardwareUnavailable(ErrorKind::BrokenPipe))
        );
    }
}
