use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{GroupId, MessageId, UserId};

/// Frames sent FROM client TO hub over the WebSocket.
///
/// One JSON object per text frame, tagged by the required `type` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    /// Key-exchange material for another user. Relayed, never persisted.
    Handshake(HandshakeFrame),

    /// An encrypted message for one user or a group.
    Message(MessageFrame),

    /// Identity binding from an older protocol generation. The identity is
    /// bound at connect time now, so this frame is accepted and ignored.
    Register(RegisterFrame),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeFrame {
    #[serde(rename = "receiverId")]
    pub receiver_id: UserId,

    /// Opaque key-exchange fields (ephemeral keys, KEM ciphertext,
    /// signature, protocol version, ...). The hub relays them untouched.
    #[serde(flatten)]
    pub exchange: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageFrame {
    #[serde(rename = "receiverId", skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<UserId>,

    #[serde(rename = "groupId", skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,

    /// End-to-end encrypted payload, base64 text. Never interpreted.
    pub ciphertext: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterFrame {
    #[serde(rename = "userId")]
    pub user_id: UserId,
}

/// Frames sent FROM hub TO client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    Handshake(HandshakeRelay),
    Message(MessageRelay),
}

/// A handshake envelope: the inbound fields plus the authenticated sender
/// identity and the sender's stored public key material. The key fields are
/// server-authoritative; whatever the client put in them is discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeRelay {
    #[serde(rename = "senderId")]
    pub sender_id: UserId,

    #[serde(rename = "receiverId")]
    pub receiver_id: UserId,

    pub sender_pub_x25519: String,
    pub sender_kyber_pub: String,
    pub sender_dilithium_pub: String,

    #[serde(flatten)]
    pub exchange: Map<String, Value>,
}

/// A relayed message: the inbound fields plus the authenticated sender
/// identity, the store-assigned id and the store-assigned timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRelay {
    #[serde(rename = "senderId")]
    pub sender_id: UserId,

    #[serde(rename = "receiverId", skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<UserId>,

    #[serde(rename = "groupId", skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,

    pub ciphertext: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,

    pub id: MessageId,

    /// Epoch milliseconds, same value as the persisted record.
    pub ts: i64,
}

/// The single structured error frame. Sent once per malformed inbound frame;
/// the connection keeps accepting frames afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub error: String,
}

impl ErrorFrame {
    pub fn invalid_format() -> Self {
        Self {
            error: "Invalid message format".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_frame_wire_names() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{"type":"message","receiverId":2,"ciphertext":"abc","iv":"aXY="}"#,
        )
        .unwrap();

        let ClientFrame::Message(msg) = frame else {
            panic!("expected message variant");
        };
        assert_eq!(msg.receiver_id, Some(2));
        assert_eq!(msg.group_id, None);
        assert_eq!(msg.ciphertext, "abc");
        assert_eq!(msg.iv.as_deref(), Some("aXY="));
    }

    #[test]
    fn handshake_keeps_opaque_exchange_fields() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{"type":"handshake","receiverId":7,"eph_pub":"RVBI","kyber_ct":"S1Q=","signature":"U0lH"}"#,
        )
        .unwrap();

        let ClientFrame::Handshake(hs) = frame else {
            panic!("expected handshake variant");
        };
        assert_eq!(hs.receiver_id, 7);
        assert_eq!(hs.exchange.get("eph_pub").unwrap(), "RVBI");
        assert_eq!(hs.exchange.get("kyber_ct").unwrap(), "S1Q=");
        // the tag is consumed by the enum, not captured as an opaque field
        assert!(!hs.exchange.contains_key("type"));
    }

    #[test]
    fn message_relay_wire_shape() {
        let relay = ServerFrame::Message(MessageRelay {
            sender_id: 1,
            receiver_id: Some(2),
            group_id: None,
            ciphertext: "abc".into(),
            iv: None,
            metadata: None,
            id: 42,
            ts: 1_700_000_000_000,
        });

        let value = serde_json::to_value(&relay).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["senderId"], 1);
        assert_eq!(value["receiverId"], 2);
        assert_eq!(value["id"], 42);
        assert_eq!(value["ts"], 1_700_000_000_000i64);
        // absent optionals stay off the wire entirely
        assert!(value.get("groupId").is_none());
        assert!(value.get("iv").is_none());
    }

    #[test]
    fn error_frame_is_the_fixed_wire_string() {
        let text = serde_json::to_string(&ErrorFrame::invalid_format()).unwrap();
        assert_eq!(text, r#"{"error":"Invalid message format"}"#);
    }
}
