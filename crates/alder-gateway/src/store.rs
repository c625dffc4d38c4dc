use std::collections::HashSet;

use anyhow::Result;

use alder_db::Database;
use alder_types::api::PublicKeys;
use alder_types::{GroupId, MessageId, UserId};

/// Resolves identities. Owned by the user store; the hub only reads.
pub trait IdentityStore: Send + Sync {
    fn resolve_username(&self, username: &str) -> Result<Option<UserId>>;
    fn public_keys(&self, user_id: UserId) -> Result<Option<PublicKeys>>;
}

/// A message about to be persisted. Id and timestamp come from the store.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub receiver_id: Option<UserId>,
    pub group_id: Option<GroupId>,
    pub ciphertext: String,
    pub iv: Option<String>,
    pub metadata: Option<String>,
}

/// What the store assigned at write time.
#[derive(Debug, Clone, Copy)]
pub struct StoredMessage {
    pub id: MessageId,
    /// Epoch milliseconds.
    pub created_at: i64,
}

/// Durable message persistence. A failed save aborts the relay attempt:
/// nothing may be forwarded that was not recorded first.
pub trait MessageStore: Send + Sync {
    fn save(&self, message: NewMessage) -> Result<StoredMessage>;
}

/// Group membership resolution, used to scope group fan-out.
pub trait GroupMembership: Send + Sync {
    fn members_of(&self, group_id: GroupId) -> Result<HashSet<UserId>>;
}

impl IdentityStore for Database {
    fn resolve_username(&self, username: &str) -> Result<Option<UserId>> {
        Ok(self.get_user_by_username(username)?.map(|user| user.id))
    }

    fn public_keys(&self, user_id: UserId) -> Result<Option<PublicKeys>> {
        Ok(self.get_user_by_id(user_id)?.map(|user| PublicKeys {
            perm_pub_x25519: user.pub_x25519.unwrap_or_default(),
            kyber_pub: user.kyber_pub.unwrap_or_default(),
            dilithium_pub: user.dilithium_pub.unwrap_or_default(),
        }))
    }
}

impl MessageStore for Database {
    fn save(&self, message: NewMessage) -> Result<StoredMessage> {
        let row = self.insert_message(
            message.sender_id,
            message.receiver_id,
            message.group_id,
            &message.ciphertext,
            message.iv.as_deref(),
            message.metadata.as_deref(),
        )?;
        Ok(StoredMessage {
            id: row.id,
            created_at: row.created_at,
        })
    }
}

impl GroupMembership for Database {
    fn members_of(&self, group_id: GroupId) -> Result<HashSet<UserId>> {
        Ok(self.group_member_ids(group_id)?.into_iter().collect())
    }
}
