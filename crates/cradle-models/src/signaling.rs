//! Signaling channel message types.
//!
//! The coordination server relays session descriptions between the device
//! and remote viewers. Messages are JSON objects tagged by `type`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::device::DeviceId;

/// Messages sent by the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Announce this device to the server
    Register {
        #[serde(rename = "deviceId")]
        device_id: DeviceId,
    },

    /// Local session description answering a viewer's offer
    Answer {
        sdp: String,
        /// The viewer that sent the offer
        #[serde(rename = "deviceId")]
        device_id: Option<String>,
    },
}

impl OutboundMessage {
    pub fn register(device_id: DeviceId) -> Self {
        OutboundMessage::Register { device_id }
    }

    pub fn answer(sdp: impl Into<String>, recipient: Option<String>) -> Self {
        OutboundMessage::Answer {
            sdp: sdp.into(),
            device_id: recipient,
        }
    }
}

/// Messages received from the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// A viewer requests a live session
    Offer {
        sdp: String,
        #[serde(rename = "senderId", default)]
        sender_id: Option<String>,
    },

    /// Any other message type; ignored by the device
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_wire_format() {
        let msg = OutboundMessage::register(DeviceId::new("jetson-001"));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "register", "deviceId": "jetson-001"})
        );
    }

    #[test]
    fn test_answer_echoes_sender() {
        let msg = OutboundMessage::answer("v=0", Some("viewer-7".to_string()));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "answer", "sdp": "v=0", "deviceId": "viewer-7"})
        );
    }

    #[test]
    fn test_offer_parsing() {
        let msg: InboundMessage =
            serde_json::from_str(r#"{"type":"offer","sdp":"v=0","senderId":"app-1"}"#).unwrap();
        assert_eq!(
            msg,
            InboundMessage::Offer {
                sdp: "v=0".to_string(),
                sender_id: Some("app-1".to_string()),
            }
        );
    }

    #[test]
    fn test_unknown_types_are_tolerated() {
        let msg: InboundMessage =
            serde_json::from_str(r#"{"type":"candidate","candidate":"x"}"#).unwrap();
        assert_eq!(msg, InboundMessage::Other);
    }
}
