mod config;

use crate::config::Config;
use dotenv::dotenv;
use log::{debug, info, warn};
use rpilcd_gpio::gpiod::GpiodDriver;
use rpilcd_gpio::lcd::hd44780::driver::{GpioHD44780Driver, HD44780Driver};
use rpilcd_gpio::mock::MockBus;
use rpilcd_gpio::{GpioDriver, GpioResult, ThreadDelay};
use std::env::args;
use std::path::Path;
use sysinfo::System;
use time::OffsetDateTime;

const ROWS: usize = 2;
/// Nibbles latched during init before the controller is in 4-bit mode.
const INIT_NIBBLES: usize = 4;

fn main() -> eyre::Result<()> {
    // Initialize environment and logger
    dotenv().ok();
    pretty_env_logger::init();

    info!("rpilcd starting...");

    let config = Config::load()?;
    let lines = config.lines()?;
    info!(
        "LCD @ {}, RS: {}, E: {}, Data: {:?}",
        config.chip,
        lines.rs(),
        lines.en(),
        lines.data()
    );

    let mut rows: Vec<String> = args().skip(1).collect();
    if rows.is_empty() {
        rows = status_rows();
    }
    if rows.len() > ROWS {
        warn!("Only {} rows available, ignoring {} more", ROWS, rows.len() - ROWS);
        rows.truncate(ROWS);
    }

    if config.dry_run {
        dry_run(&rows)?;
    } else {
        run(&config, &rows)?;
    }

    info!("Done.");
    Ok(())
}

fn run(config: &Config, rows: &[String]) -> eyre::Result<()> {
    let lines = config.lines()?;

    debug!("Initializing GPIO driver...");
    let gpio = GpiodDriver::open(Path::new(&config.chip))?;
    debug!("{:?} initialized.", gpio);

    debug!("Initializing LCD driver...");
    let mut lcd_rs_pin = gpio.get_pin(lines.rs())?;
    let lcd_rs_out = lcd_rs_pin.as_output()?;
    let mut lcd_e_pin = gpio.get_pin(lines.en())?;
    let lcd_e_out = lcd_e_pin.as_output()?;
    let mut lcd_data_bus = gpio.get_pin_bus(lines.data())?;
    let lcd_data_out = lcd_data_bus.as_output()?;
    let delay = ThreadDelay;

    let mut lcd = GpioHD44780Driver::new_4bit(&*lcd_e_out, &*lcd_rs_out, &*lcd_data_out, &delay);

    show(&mut lcd, rows)?;
    debug!("{:?} done.", lcd);
    Ok(())
}

/// Runs the same sequence against the recording mock and logs what would hit the bus.
fn dry_run(rows: &[String]) -> eyre::Result<()> {
    info!("Dry run, no GPIO lines are touched");

    let bus = MockBus::new();
    let (rs, e, data, delay) = (bus.rs(), bus.en(), bus.data(), bus.delay());
    let mut lcd = GpioHD44780Driver::new_4bit(&e, &rs, &data, &delay);

    show(&mut lcd, rows)?;

    for latch in bus.latched_nibbles().iter().take(INIT_NIBBLES) {
        info!("Init nibble {:04b}", latch.nibble);
    }
    for (mode, byte) in bus.latched_bytes(INIT_NIBBLES) {
        info!("{:?} {:#04x}", mode, byte);
    }
    info!(
        "{} bus events, {:?} asleep",
        bus.events().len(),
        bus.total_delay()
    );
    Ok(())
}

fn show(lcd: &mut dyn HD44780Driver, rows: &[String]) -> GpioResult<()> {
    lcd.init()?;
    for (row, text) in (1..).zip(rows) {
        lcd.set_cursor(row, 1)?;
        lcd.put_string(Some(to_lcd_bytes(text).as_slice()))?;
    }
    Ok(())
}

/// The controller's ROM only matches ASCII, anything else is shown as `?`.
fn to_lcd_bytes(s: &str) -> Vec<u8> {
    s.chars()
        .map(|c| {
            if c.is_ascii() {
                c as u8
            } else {
                warn!("Non-ASCII character: {}", c);
                b'?'
            }
        })
        .collect()
}

/// Host name and local time, shown when nothing is passed on the command line.
fn status_rows() -> Vec<String> {
    const UNKNOWN_STR: &str = "???";

    let host = System::host_name().unwrap_or_else(|| UNKNOWN_STR.to_string());
    let now = OffsetDateTime::now_local().unwrap_or_else(|err| {
        warn!("Local offset unavailable ({}), using UTC", err);
        OffsetDateTime::now_utc()
    });
    let time = format!(
        "{:04}-{:02}-{:02} {:02}:{:02}",
        now.year(),
        u8::from(now.month()),
        now.day(),
        now.hour(),
        now.minute()
    );
    vec![host, time]
}
