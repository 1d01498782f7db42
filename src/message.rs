// ============================================================================
// Wire Protocol & Event Model
// ============================================================================
//
// Frames are JSON text. Every event payload is a tagged variant with an
// explicit `kind` discriminator, validated at the publish boundary
// before any fan-out happens. Keepalives use WebSocket ping/pong
// control frames, with a JSON heartbeat frame for clients whose
// libraries cannot emit pongs.

use crate::error::{GatewayError, GatewayResult};
use crate::tenant::{AccessScope, ConnectionType, TenantId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Application event payload, one schema per kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    OrderCreated {
        order_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        table: Option<String>,
        total_cents: i64,
    },
    OrderStatusChanged {
        order_id: String,
        status: String,
    },
    TicketBumped {
        ticket_id: String,
        station: String,
    },
    MenuItemAvailability {
        item_id: String,
        available: bool,
    },
    Announcement {
        message: String,
    },
}

impl EventPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::OrderCreated { .. } => "order_created",
            EventPayload::OrderStatusChanged { .. } => "order_status_changed",
            EventPayload::TicketBumped { .. } => "ticket_bumped",
            EventPayload::MenuItemAvailability { .. } => "menu_item_availability",
            EventPayload::Announcement { .. } => "announcement",
        }
    }

    /// Schema validation at the publish boundary. Events that fail here
    /// never reach the router.
    pub fn validate(&self) -> GatewayResult<()> {
        match self {
            EventPayload::OrderCreated {
                order_id,
                total_cents,
                ..
            } => {
                if order_id.is_empty() {
                    return Err(GatewayError::validation("order_id must not be empty"));
                }
                if *total_cents < 0 {
                    return Err(GatewayError::validation("total_cents must not be negative"));
                }
            }
            EventPayload::OrderStatusChanged { order_id, status } => {
                if order_id.is_empty() || status.is_empty() {
                    return Err(GatewayError::validation(
                        "order_id and status must not be empty",
                    ));
                }
            }
            EventPayload::TicketBumped { ticket_id, station } => {
                if ticket_id.is_empty() || station.is_empty() {
                    return Err(GatewayError::validation(
                        "ticket_id and station must not be empty",
                    ));
                }
            }
            EventPayload::MenuItemAvailability { item_id, .. } => {
                if item_id.is_empty() {
                    return Err(GatewayError::validation("item_id must not be empty"));
                }
            }
            EventPayload::Announcement { message } => {
                if message.is_empty() {
                    return Err(GatewayError::validation("message must not be empty"));
                }
            }
        }
        Ok(())
    }
}

/// A validated event, stamped with its owning tenant, ready for fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayEvent {
    pub event_id: Uuid,
    pub tenant: TenantId,
    pub published_at: String,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl GatewayEvent {
    pub fn new(tenant: TenantId, payload: EventPayload) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            tenant,
            published_at: chrono::Utc::now().to_rfc3339(),
            payload,
        }
    }
}

/// Frames a client may send.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Handshake frame. Must be the first frame on a fresh socket.
    Hello {
        token: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        tenant_id: Option<String>,
        connection_type: ConnectionType,
    },
    /// Application-level keepalive, for clients that cannot emit
    /// protocol pongs.
    Heartbeat,
}

/// Frames the server sends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        connection_id: String,
        scope: AccessScope,
        #[serde(skip_serializing_if = "Option::is_none")]
        tenant_id: Option<String>,
    },
    Event(GatewayEvent),
    HeartbeatAck,
    /// Structured denial with a machine-readable reason code. The code
    /// is all a denied client learns; internal state stays internal.
    Denied {
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after_secs: Option<u64>,
    },
    Error {
        code: String,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_payload_kind_discriminator_on_wire() {
        let payload = EventPayload::TicketBumped {
            ticket_id: "t-9".to_string(),
            station: "grill".to_string(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "ticket_bumped");
    }

    #[test]
    fn test_event_payload_validation_rejects_empty_ids() {
        let payload = EventPayload::OrderCreated {
            order_id: String::new(),
            table: None,
            total_cents: 100,
        };
        assert!(payload.validate().is_err());

        let payload = EventPayload::Announcement {
            message: "closing early".to_string(),
        };
        assert!(payload.validate().is_ok());
    }

    #[test]
    fn test_hello_frame_parses() {
        let json = r#"{"type":"hello","token":"abc","tenant_id":"11111111-1111-1111-1111-111111111111","connection_type":"pos_terminal"}"#;
        match serde_json::from_str::<ClientMessage>(json).unwrap() {
            ClientMessage::Hello {
                token,
                tenant_id,
                connection_type,
            } => {
                assert_eq!(token, "abc");
                assert!(tenant_id.is_some());
                assert_eq!(connection_type, ConnectionType::PosTerminal);
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}
