//! Operating mode selected from the ambient light sensor.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Camera/model pairing in use.
///
/// `Bright` pairs with the visible-light camera and model, `Dark` with the
/// infrared camera and model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    Bright,
    Dark,
}

impl OperatingMode {
    /// All operating modes.
    pub const ALL: &'static [OperatingMode] = &[OperatingMode::Bright, OperatingMode::Dark];

    /// Map a light sensor reading to a mode. The sensor is active-high for "dark".
    pub fn from_dark_reading(is_dark: bool) -> Self {
        if is_dark {
            OperatingMode::Dark
        } else {
            OperatingMode::Bright
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperatingMode::Bright => "bright",
            OperatingMode::Dark => "dark",
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown mode name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown operating mode: {0}")]
pub struct ParseModeError(pub String);

impl FromStr for OperatingMode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bright" | "day" => Ok(OperatingMode::Bright),
            "dark" | "night" | "ir" => Ok(OperatingMode::Dark),
            other => Err(ParseModeError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dark_reading_selects_dark_mode() {
        assert_eq!(OperatingMode::from_dark_reading(true), OperatingMode::Dark);
        assert_eq!(OperatingMode::from_dark_reading(false), OperatingMode::Bright);
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!("Night".parse::<OperatingMode>().unwrap(), OperatingMode::Dark);
        assert_eq!("bright".parse::<OperatingMode>().unwrap(), OperatingMode::Bright);
        assert!("dusk".parse::<OperatingMode>().is_err());
    }
}
