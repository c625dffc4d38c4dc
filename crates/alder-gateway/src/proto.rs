use serde_json::Value;

use alder_types::proto::ClientFrame;

/// Outcome of decoding one inbound text frame.
///
/// Unrecognized types and malformed frames are deliberately distinct:
/// an unknown `type` is ignored so old hubs tolerate new clients, while a
/// malformed frame gets exactly one error frame back. Neither closes the
/// connection.
#[derive(Debug)]
pub enum Decoded {
    Frame(ClientFrame),
    Unknown(String),
    Malformed,
}

pub fn decode_frame(text: &str) -> Decoded {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => return Decoded::Malformed,
    };

    // `type` is required on every frame
    let kind = match value.get("type").and_then(Value::as_str) {
        Some(kind) => kind.to_string(),
        None => return Decoded::Malformed,
    };

    match kind.as_str() {
        "handshake" | "message" | "register" => match serde_json::from_value(value) {
            Ok(frame) => Decoded::Frame(frame),
            Err(_) => Decoded::Malformed,
        },
        _ => Decoded::Unknown(kind),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_message_frames() {
        let decoded = decode_frame(r#"{"type":"message","receiverId":2,"ciphertext":"abc"}"#);
        let Decoded::Frame(ClientFrame::Message(msg)) = decoded else {
            panic!("expected a message frame, got {decoded:?}");
        };
        assert_eq!(msg.receiver_id, Some(2));
        assert_eq!(msg.ciphertext, "abc");
    }

    #[test]
    fn recognizes_handshake_frames() {
        let decoded =
            decode_frame(r#"{"type":"handshake","receiverId":9,"eph_pub":"RVBI"}"#);
        assert!(matches!(
            decoded,
            Decoded::Frame(ClientFrame::Handshake(_))
        ));
    }

    #[test]
    fn recognizes_the_legacy_register_generation() {
        let decoded = decode_frame(r#"{"type":"register","userId":4}"#);
        let Decoded::Frame(ClientFrame::Register(reg)) = decoded else {
            panic!("expected a register frame, got {decoded:?}");
        };
        assert_eq!(reg.user_id, 4);
    }

    #[test]
    fn unknown_types_are_ignored_not_errors() {
        let decoded = decode_frame(r#"{"type":"typing","receiverId":2}"#);
        let Decoded::Unknown(kind) = decoded else {
            panic!("expected unknown, got {decoded:?}");
        };
        assert_eq!(kind, "typing");
    }

    #[test]
    fn malformed_frames_are_flagged() {
        // not JSON at all
        assert!(matches!(decode_frame("not json"), Decoded::Malformed));
        // no type field
        assert!(matches!(
            decode_frame(r#"{"receiverId":2,"ciphertext":"abc"}"#),
            Decoded::Malformed
        ));
        // type is not a string
        assert!(matches!(
            decode_frame(r#"{"type":7,"ciphertext":"abc"}"#),
            Decoded::Malformed
        ));
        // recognized type, missing required field
        assert!(matches!(
            decode_frame(r#"{"type":"handshake","eph_pub":"RVBI"}"#),
            Decoded::Malformed
        ));
        assert!(matches!(
            decode_frame(r#"{"type":"message","receiverId":2}"#),
            Decoded::Malformed
        ));
    }
}
