use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use alder_types::proto::{
    HandshakeFrame, HandshakeRelay, MessageFrame, MessageRelay, ServerFrame,
};
use alder_types::{GroupId, UserId};

use crate::registry::{Outbound, Registry};
use crate::store::{GroupMembership, IdentityStore, MessageStore, NewMessage, StoredMessage};

/// Failures that abort a single relay attempt. An offline recipient is not
/// an error; that is the normal best-effort case and only gets logged.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The message could not be recorded, so it must not be forwarded.
    #[error("message store rejected the write")]
    Persistence(#[source] anyhow::Error),

    #[error("identity lookup failed for user {0}")]
    Identity(UserId, #[source] anyhow::Error),

    #[error("membership lookup failed for group {0}")]
    Membership(GroupId, #[source] anyhow::Error),

    /// A message frame with neither receiverId nor groupId.
    #[error("message frame carries no destination")]
    MissingDestination,
}

/// The relay engine: persists messages, resolves targets and fans payloads
/// out to live channels. Shared by every connection; cloning is cheap.
#[derive(Clone)]
pub struct Relay {
    registry: Registry,
    identities: Arc<dyn IdentityStore>,
    messages: Arc<dyn MessageStore>,
    groups: Arc<dyn GroupMembership>,
}

impl Relay {
    pub fn new(
        registry: Registry,
        identities: Arc<dyn IdentityStore>,
        messages: Arc<dyn MessageStore>,
        groups: Arc<dyn GroupMembership>,
    ) -> Self {
        Self {
            registry,
            identities,
            messages,
            groups,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn identities(&self) -> &Arc<dyn IdentityStore> {
        &self.identities
    }

    /// Relays key-exchange material to one receiver. Never persisted, never
    /// queued: if the receiver is offline the handshake is dropped and the
    /// sender finds out by not getting a reply.
    pub async fn handshake(
        &self,
        sender_id: UserId,
        frame: HandshakeFrame,
    ) -> Result<(), RelayError> {
        let identities = self.identities.clone();
        let keys = tokio::task::spawn_blocking(move || identities.public_keys(sender_id))
            .await
            .map_err(|e| RelayError::Identity(sender_id, anyhow::anyhow!(e)))?
            .map_err(|e| RelayError::Identity(sender_id, e))?;

        let Some(keys) = keys else {
            warn!("handshake from {} with no stored key material", sender_id);
            return Ok(());
        };

        let receiver_id = frame.receiver_id;
        let mut exchange = frame.exchange;
        // The identity and key fields are server-authoritative; whatever the
        // client put there is discarded before the envelope is built.
        for field in [
            "senderId",
            "sender_pub_x25519",
            "sender_kyber_pub",
            "sender_dilithium_pub",
        ] {
            exchange.remove(field);
        }

        let envelope = ServerFrame::Handshake(HandshakeRelay {
            sender_id,
            receiver_id,
            sender_pub_x25519: keys.perm_pub_x25519,
            sender_kyber_pub: keys.kyber_pub,
            sender_dilithium_pub: keys.dilithium_pub,
            exchange,
        });

        if self.registry.deliver(receiver_id, Outbound::Relay(envelope)) {
            info!("handshake relayed from {} to {}", sender_id, receiver_id);
        } else {
            warn!(
                "handshake receiver {} not connected, dropping",
                receiver_id
            );
        }
        Ok(())
    }

    /// Relays an encrypted message. Destination mode is selected by the
    /// presence of `groupId`; either way the message is persisted before
    /// anything is forwarded.
    pub async fn message(&self, sender_id: UserId, frame: MessageFrame) -> Result<(), RelayError> {
        if let Some(group_id) = frame.group_id {
            self.group_message(sender_id, group_id, frame).await
        } else if let Some(receiver_id) = frame.receiver_id {
            self.direct_message(sender_id, receiver_id, frame).await
        } else {
            Err(RelayError::MissingDestination)
        }
    }

    async fn direct_message(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        frame: MessageFrame,
    ) -> Result<(), RelayError> {
        let stored = self.persist(sender_id, &frame).await?;
        let relayed = relayed_frame(sender_id, frame, &stored);

        if self.registry.deliver(receiver_id, Outbound::Relay(relayed)) {
            info!(
                "message {} relayed from {} to {}",
                stored.id, sender_id, receiver_id
            );
        } else {
            debug!(
                "receiver {} offline, message {} persisted for history",
                receiver_id, stored.id
            );
        }
        Ok(())
    }

    async fn group_message(
        &self,
        sender_id: UserId,
        group_id: GroupId,
        frame: MessageFrame,
    ) -> Result<(), RelayError> {
        let stored = self.persist(sender_id, &frame).await?;

        let groups = self.groups.clone();
        let members = tokio::task::spawn_blocking(move || groups.members_of(group_id))
            .await
            .map_err(|e| RelayError::Membership(group_id, anyhow::anyhow!(e)))?
            .map_err(|e| RelayError::Membership(group_id, e))?;

        // Fan-out is scoped to the group's members; being connected is not
        // enough to receive a group message.
        let relayed = relayed_frame(sender_id, frame, &stored);
        let mut delivered = 0usize;
        for member in &members {
            if *member == sender_id {
                continue;
            }
            if self
                .registry
                .deliver(*member, Outbound::Relay(relayed.clone()))
            {
                delivered += 1;
            }
        }

        info!(
            "group message {} from {} delivered to {}/{} other members of group {}",
            stored.id,
            sender_id,
            delivered,
            members.len().saturating_sub(1),
            group_id
        );
        Ok(())
    }

    async fn persist(
        &self,
        sender_id: UserId,
        frame: &MessageFrame,
    ) -> Result<StoredMessage, RelayError> {
        let record = NewMessage {
            sender_id,
            receiver_id: frame.receiver_id,
            group_id: frame.group_id,
            ciphertext: frame.ciphertext.clone(),
            iv: frame.iv.clone(),
            metadata: frame.metadata.as_ref().map(|m| m.to_string()),
        };

        let store = self.messages.clone();
        tokio::task::spawn_blocking(move || store.save(record))
            .await
            .map_err(|e| RelayError::Persistence(anyhow::anyhow!(e)))?
            .map_err(RelayError::Persistence)
    }
}

fn relayed_frame(sender_id: UserId, frame: MessageFrame, stored: &StoredMessage) -> ServerFrame {
    ServerFrame::Message(MessageRelay {
        sender_id,
        receiver_id: frame.receiver_id,
        group_id: frame.group_id,
        ciphertext: frame.ciphertext,
        iv: frame.iv,
        metadata: frame.metadata,
        id: stored.id,
        ts: stored.created_at,
    })
}
