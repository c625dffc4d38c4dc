pub mod api;
pub mod proto;

/// Identity of a registered user. Assigned by the database, never by the hub.
pub type UserId = i64;

/// Identity of a group.
pub type GroupId = i64;

/// Identity of a persisted message.
pub type MessageId = i64;
