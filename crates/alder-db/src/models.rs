/// Database row types, mapped one to one onto SQLite rows.
/// Distinct from the alder-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub password: String,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub status: String,
    pub pub_x25519: Option<String>,
    pub kyber_pub: Option<String>,
    pub dilithium_pub: Option<String>,
    pub created_at: String,
}

pub struct ContactRow {
    pub id: i64,
    pub user_id: i64,
    pub contact_id: i64,
    pub status: String,
    pub created_at: String,
}

pub struct GroupRow {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub owner_id: i64,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: Option<i64>,
    pub group_id: Option<i64>,
    pub ciphertext: String,
    pub iv: Option<String>,
    pub metadata: Option<String>,
    /// Epoch milliseconds, assigned at insert time.
    pub created_at: i64,
}

/// Partial profile update; `None` leaves the column untouched.
#[derive(Default)]
pub struct ProfileChanges {
    pub username: Option<String>,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub status: Option<String>,
}
