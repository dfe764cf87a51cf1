//! Detector class roles and per-frame presence flags.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Semantic role a detector class can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ClassRole {
    /// The monitored subject (the infant)
    Subject,
    /// Visible mouth; its absence suggests occlusion
    Mouth,
    /// Visible nose
    Nose,
    /// Visible pacifier, which accounts for a hidden mouth
    Pacifier,
}

impl ClassRole {
    pub const ALL: &'static [ClassRole] = &[
        ClassRole::Subject,
        ClassRole::Mouth,
        ClassRole::Nose,
        ClassRole::Pacifier,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClassRole::Subject => "subject",
            ClassRole::Mouth => "mouth",
            ClassRole::Nose => "nose",
            ClassRole::Pacifier => "pacifier",
        }
    }

    /// Class index assumed when the model's names table has no match.
    pub fn default_index(&self) -> usize {
        match self {
            ClassRole::Subject => 0,
            ClassRole::Mouth => 1,
            ClassRole::Nose => 2,
            ClassRole::Pacifier => 3,
        }
    }
}

/// Which roles were seen in a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PresenceFlags {
    pub subject_seen: bool,
    pub mouth_seen: bool,
    pub nose_seen: bool,
    pub pacifier_seen: bool,
}

impl PresenceFlags {
    /// Subject visible while none of the face features are.
    pub fn risk_condition(&self) -> bool {
        self.subject_seen && !(self.mouth_seen || self.nose_seen || self.pacifier_seen)
    }

    pub fn set(&mut self, role: ClassRole, seen: bool) {
        match role {
            ClassRole::Subject => self.subject_seen = seen,
            ClassRole::Mouth => self.mouth_seen = seen,
            ClassRole::Nose => self.nose_seen = seen,
            ClassRole::Pacifier => self.pacifier_seen = seen,
        }
    }
}
