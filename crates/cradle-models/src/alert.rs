//! Alert endpoint payload.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::device::DeviceId;

/// Body of `POST {base}/api/alert`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AlertPayload {
    pub device_id: DeviceId,
    pub danger: String,
}

impl AlertPayload {
    pub fn new(device_id: DeviceId, danger: impl Into<String>) -> Self {
        Self {
            device_id,
            danger: danger.into(),
        }
    }
}
