use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use alder_types::UserId;
use alder_types::proto::{ClientFrame, ErrorFrame};

use crate::auth;
use crate::proto::{Decoded, decode_frame};
use crate::registry::{OUTBOUND_QUEUE, Outbound};
use crate::relay::{Relay, RelayError};

/// Handle one WebSocket connection for its whole lifetime.
///
/// The authentication gate runs first: no frame is processed until the
/// token from the upgrade query string has been bound to an identity. The
/// socket is then split into a writer task (sole owner of the sink, drains
/// the session queue) and a reader task (decodes and dispatches frames), so
/// sends to this client are serialized no matter how many relays target it.
pub async fn handle_socket(
    socket: WebSocket,
    relay: Relay,
    jwt_secret: String,
    token: Option<String>,
) {
    let (mut sink, mut stream) = socket.split();

    let user_id =
        match auth::authenticate(token.as_deref(), &jwt_secret, relay.identities()).await {
            Ok(user_id) => user_id,
            Err(err) => {
                warn!("refusing gateway connection: {}", err);
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::POLICY,
                        reason: "authentication required".into(),
                    })))
                    .await;
                return;
            }
        };

    info!("user {} connected to gateway", user_id);

    let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE);
    // The registry holds the only strong sender: when this session is
    // superseded or evicted, dropping it closes the queue and the writer
    // below shuts the socket down. The reader keeps a weak handle for
    // pushing error frames through the same single-writer queue.
    let error_tx = tx.downgrade();
    let conn_id = relay.registry().register(user_id, tx);

    // Writer: the only task allowed to touch the sink.
    let mut send_task = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let text = match &outbound {
                Outbound::Relay(frame) => serde_json::to_string(frame).unwrap(),
                Outbound::Error(frame) => serde_json::to_string(frame).unwrap(),
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        // Queue closed: this session was superseded or evicted. Tell the
        // client before the socket goes away.
        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code: close_code::NORMAL,
                reason: "session superseded".into(),
            })))
            .await;
    });

    // Reader: decode inbound frames and hand them to the relay engine.
    let relay_recv = relay.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                Message::Text(text) => {
                    handle_text(&relay_recv, user_id, &error_tx, &text).await;
                }
                Message::Close(_) => break,
                // No binary protocol and no heartbeat in this hub.
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    relay.registry().remove(user_id, conn_id);
    info!("user {} disconnected from gateway", user_id);
}

async fn handle_text(
    relay: &Relay,
    user_id: UserId,
    error_tx: &mpsc::WeakSender<Outbound>,
    text: &str,
) {
    let frame = match decode_frame(text) {
        Decoded::Frame(frame) => frame,
        Decoded::Unknown(kind) => {
            warn!("user {} sent unknown frame type {:?}", user_id, kind);
            return;
        }
        Decoded::Malformed => {
            warn!(
                "user {} sent malformed frame -- raw: {}",
                user_id,
                &text[..text.len().min(200)]
            );
            send_error(error_tx).await;
            return;
        }
    };

    let result = match frame {
        ClientFrame::Handshake(hs) => relay.handshake(user_id, hs).await,
        ClientFrame::Message(msg) => relay.message(user_id, msg).await,
        ClientFrame::Register(reg) => {
            // Identity was bound at the gate; a post-auth rebind would be
            // an impersonation vector.
            warn!(
                "user {} sent legacy register frame for user {}, ignoring",
                user_id, reg.user_id
            );
            Ok(())
        }
    };

    if let Err(err) = result {
        match err {
            RelayError::MissingDestination => {
                send_error(error_tx).await;
            }
            RelayError::Persistence(_) => {
                error!(
                    "relay aborted for user {}: {:#}",
                    user_id,
                    anyhow::Error::new(err)
                );
            }
            other => {
                error!(
                    "relay failed for user {}: {:#}",
                    user_id,
                    anyhow::Error::new(other)
                );
            }
        }
    }
}

async fn send_error(error_tx: &mpsc::WeakSender<Outbound>) {
    if let Some(tx) = error_tx.upgrade() {
        let _ = tx.send(Outbound::Error(ErrorFrame::invalid_format())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashSet;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI64, Ordering};

    use alder_types::GroupId;
    use alder_types::api::PublicKeys;
    use alder_types::proto::ServerFrame;

    use crate::registry::{OUTBOUND_QUEUE, Registry};
    use crate::store::{
        GroupMembership, IdentityStore, MessageStore, NewMessage, StoredMessage,
    };

    struct NoIdentities;

    impl IdentityStore for NoIdentities {
        fn resolve_username(&self, _username: &str) -> anyhow::Result<Option<UserId>> {
            Ok(None)
        }

        fn public_keys(&self, _user_id: UserId) -> anyhow::Result<Option<PublicKeys>> {
            Ok(None)
        }
    }

    struct CountingMessages(AtomicI64);

    impl MessageStore for CountingMessages {
        fn save(&self, _message: NewMessage) -> anyhow::Result<StoredMessage> {
            let id = self.0.fetch_add(1, Ordering::SeqCst);
            Ok(StoredMessage { id, created_at: id })
        }
    }

    struct NoGroups;

    impl GroupMembership for NoGroups {
        fn members_of(&self, _group_id: GroupId) -> anyhow::Result<HashSet<UserId>> {
            Ok(HashSet::new())
        }
    }

    fn test_relay() -> Relay {
        Relay::new(
            Registry::new(),
            Arc::new(NoIdentities),
            Arc::new(CountingMessages(AtomicI64::new(1))),
            Arc::new(NoGroups),
        )
    }

    #[tokio::test]
    async fn malformed_frame_yields_exactly_one_error_frame() {
        let relay = test_relay();
        let (tx, mut rx) = mpsc::channel(OUTBOUND_QUEUE);
        let error_tx = tx.downgrade();

        handle_text(&relay, 1, &error_tx, "this is not json").await;

        let Ok(Outbound::Error(frame)) = rx.try_recv() else {
            panic!("expected an error frame");
        };
        assert_eq!(frame.error, "Invalid message format");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn connection_keeps_working_after_a_malformed_frame() {
        let relay = test_relay();
        let (tx, mut rx) = mpsc::channel(OUTBOUND_QUEUE);
        let error_tx = tx.downgrade();
        let mut receiver_rx = {
            let (peer_tx, peer_rx) = mpsc::channel(OUTBOUND_QUEUE);
            relay.registry().register(2, peer_tx);
            peer_rx
        };

        handle_text(&relay, 1, &error_tx, "{{{").await;
        assert!(matches!(rx.try_recv(), Ok(Outbound::Error(_))));

        // the next, valid frame still goes through
        handle_text(
            &relay,
            1,
            &error_tx,
            r#"{"type":"message","receiverId":2,"ciphertext":"abc"}"#,
        )
        .await;

        let Ok(Outbound::Relay(ServerFrame::Message(relayed))) = receiver_rx.try_recv() else {
            panic!("expected the valid frame to be relayed");
        };
        assert_eq!(relayed.sender_id, 1);
        assert_eq!(relayed.ciphertext, "abc");
    }

    #[tokio::test]
    async fn unknown_frame_type_is_silently_ignored() {
        let relay = test_relay();
        let (tx, mut rx) = mpsc::channel(OUTBOUND_QUEUE);
        let error_tx = tx.downgrade();

        handle_text(&relay, 1, &error_tx, r#"{"type":"presence","online":true}"#).await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn message_without_destination_gets_the_error_frame() {
        let relay = test_relay();
        let (tx, mut rx) = mpsc::channel(OUTBOUND_QUEUE);
        let error_tx = tx.downgrade();

        handle_text(&relay, 1, &error_tx, r#"{"type":"message","ciphertext":"abc"}"#).await;

        assert!(matches!(rx.try_recv(), Ok(Outbound::Error(_))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn legacy_register_frame_is_accepted_and_ignored() {
        let relay = test_relay();
        let (tx, mut rx) = mpsc::channel(OUTBOUND_QUEUE);
        let error_tx = tx.downgrade();

        handle_text(&relay, 1, &error_tx, r#"{"type":"register","userId":9}"#).await;

        // no error frame, no rebind: user 9 is still unaddressable
        assert!(rx.try_recv().is_err());
        assert!(relay.registry().lookup(9).is_none());
    }
}
