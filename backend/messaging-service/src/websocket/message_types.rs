use crate::models::DeliveryStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inbound WebSocket events from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsInboundEvent {
    /// Receipt for a pushed message, usually `delivered`
    #[serde(rename = "ack")]
    Ack {
        conversation_id: Uuid,
        message_id: Uuid,
        #[serde(default = "default_ack_status")]
        status: DeliveryStatus,
    },
}

fn default_ack_status() -> DeliveryStatus {
    DeliveryStatus::Delivered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_defaults_to_delivered() {
        let conversation_id = Uuid::new_v4();
        let message_id = Uuid::new_v4();
        let raw = format!(
            r#"{{"type":"ack","conversation_id":"{conversation_id}","message_id":"{message_id}"}}"#
        );
        let evt: WsInboundEvent = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            evt,
            WsInboundEvent::Ack {
                conversation_id,
                message_id,
                status: DeliveryStatus::Delivered,
            }
        );
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(serde_json::from_str::<WsInboundEvent>(r#"{"type":"typing"}"#).is_err());
    }
}
