use serde::{Deserialize, Serialize};

use crate::{GroupId, MessageId, UserId};

// -- JWT Claims --

/// JWT claims shared by alder-api (REST middleware) and alder-gateway
/// (WebSocket authentication gate). The subject is the username; it is
/// resolved to a numeric identity through the user store on every use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

// -- Auth --

/// Public key material a client publishes at registration and rotates via
/// the profile endpoints. Opaque base64 text as far as the hub is concerned.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublicKeys {
    pub perm_pub_x25519: String,
    pub kyber_pub: String,
    pub dilithium_pub: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    #[serde(rename = "publicKeys", default)]
    pub public_keys: PublicKeys,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserSummary,
}

// -- Users --

#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub status: String,
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub username: Option<String>,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub status: Option<String>,
}

// -- Contacts --

#[derive(Debug, Serialize)]
pub struct ContactEntry {
    pub id: UserId,
    pub username: String,
    pub status: String,
}

// -- Groups --

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GroupResponse {
    pub id: GroupId,
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "ownerId")]
    pub owner_id: UserId,
    #[serde(rename = "memberIds")]
    pub member_ids: Vec<UserId>,
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

// -- Message history --

/// A persisted message as read back over REST, timestamp ascending. This is
/// the catch-up path for recipients that were offline at relay time.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: MessageId,
    pub sender_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
    pub ciphertext: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    /// Epoch milliseconds, assigned by the store at write time.
    pub timestamp: i64,
}
