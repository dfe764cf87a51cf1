//! Risk status reported by the monitor.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Debounced risk status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskStatus {
    /// No risk episode in progress
    #[default]
    Safe,
    /// Risk episode in progress, hold duration not yet reached
    Warning,
    /// Risk episode has lasted at least the hold duration
    Danger,
}

impl RiskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskStatus::Safe => "SAFE",
            RiskStatus::Warning => "WARNING",
            RiskStatus::Danger => "DANGER",
        }
    }

    /// Numeric level, used for the status gauge.
    pub fn level(&self) -> u8 {
        match self {
            RiskStatus::Safe => 0,
            RiskStatus::Warning => 1,
            RiskStatus::Danger => 2,
        }
    }
}

impl fmt::Display for RiskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status transition observed by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StatusChange {
    pub from: RiskStatus,
    pub to: RiskStatus,
    pub at: DateTime<Utc>,
}

impl StatusChange {
    pub fn new(from: RiskStatus, to: RiskStatus) -> Self {
        Self {
            from,
            to,
            at: Utc::now(),
        }
    }

    /// Whether this transition enters DANGER.
    pub fn enters_danger(&self) -> bool {
        self.to == RiskStatus::Danger && self.from != RiskStatus::Danger
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_uppercase() {
        let json = serde_json::to_string(&RiskStatus::Danger).unwrap();
        assert_eq!(json, "\"DANGER\"");
        assert_eq!(RiskStatus::default(), RiskStatus::Safe);
    }

    #[test]
    fn test_status_change_enters_danger() {
        assert!(StatusChange::new(RiskStatus::Warning, RiskStatus::Danger).enters_danger());
        assert!(!StatusChange::new(RiskStatus::Danger, RiskStatus::Safe).enters_danger());
        assert!(!StatusChange::new(RiskStatus::Safe, RiskStatus::Warning).enters_danger());
    }
}
