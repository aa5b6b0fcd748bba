use log::debug;
use rpilcd_gpio::lcd::hd44780::LineAssignment;
use serde::Deserialize;
use std::env::var;
use std::path::Path;

const DEFAULT_CONFIG_FILE: &str = "rpilcd.json";
const DEFAULT_CHIP: &str = "/dev/gpiochip0";

/// Runtime configuration.
///
/// Read from the JSON file named by `RPILCD_CONFIG` (`rpilcd.json` by default) if it exists, then
/// overridden by the `RPILCD_*` environment variables.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    pub chip: String,
    pub pin_rs: usize,
    pub pin_en: usize,
    pub pins_data: [usize; 4],
    pub dry_run: bool,
}

impl Config {
    pub fn load() -> eyre::Result<Self> {
        let path = var("RPILCD_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        let mut config = Self::try_load(Path::new(&path))?.unwrap_or_default();
        config.apply_overrides(|key| var(key).ok())?;
        Ok(config)
    }

    fn try_load(path: &Path) -> eyre::Result<Option<Self>> {
        if !path.exists() {
            debug!("No config at {}", path.display());
            return Ok(None);
        }
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let config = serde_json::from_reader(reader)?;
        debug!("Config loaded from {}", path.display());
        Ok(Some(config))
    }

    fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) -> eyre::Result<()> {
        if let Some(chip) = get("RPILCD_CHIP") {
            self.chip = chip;
        }
        if let Some(pin) = get("RPILCD_PIN_RS") {
            self.pin_rs = pin.trim().parse()?;
        }
        if let Some(pin) = get("RPILCD_PIN_EN") {
            self.pin_en = pin.trim().parse()?;
        }
        if let Some(pins) = get("RPILCD_PINS_DATA") {
            self.pins_data = parse_pin_bus(&pins)?;
        }
        if let Some(flag) = get("RPILCD_DRY_RUN") {
            self.dry_run = parse_flag(&flag);
        }
        Ok(())
    }

    pub fn lines(&self) -> eyre::Result<LineAssignment> {
        Ok(LineAssignment::new(self.pin_rs, self.pin_en, self.pins_data)?)
    }
}

impl Default for Config {
    fn default() -> Self {
        let lines = LineAssignment::default();
        Config {
            chip: DEFAULT_CHIP.to_string(),
            pin_rs: lines.rs(),
            pin_en: lines.en(),
            pins_data: lines.data(),
            dry_run: false,
        }
    }
}

fn parse_pin_bus(pin_str: &str) -> eyre::Result<[usize; 4]> {
    pin_str
        .split([',', ' ', ';'])
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse())
        .collect::<Result<Vec<_>, _>>()?
        .try_into()
        .map_err(|_| eyre::eyre!("Invalid number of data pins"))
}

fn parse_flag(s: &str) -> bool {
    matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
