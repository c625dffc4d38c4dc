use crate::Database;
use crate::models::{ContactRow, GroupRow, MessageRow, ProfileChanges, UserRow};
use alder_types::api::PublicKeys;
use anyhow::Result;
use rusqlite::Connection;

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        keys: &PublicKeys,
    ) -> Result<i64> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (username, password, status, pub_x25519, kyber_pub, dilithium_pub)
                 VALUES (?1, ?2, 'online', ?3, ?4, ?5)",
                rusqlite::params![
                    username,
                    password_hash,
                    keys.perm_pub_x25519,
                    keys.kyber_pub,
                    keys.dilithium_pub
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            query_user(conn, "SELECT * FROM users WHERE username = ?1", [username])
        })
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "SELECT * FROM users WHERE id = ?1", [id]))
    }

    pub fn update_profile(&self, id: i64, changes: &ProfileChanges) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE users SET
                    username = COALESCE(?2, username),
                    avatar   = COALESCE(?3, avatar),
                    bio      = COALESCE(?4, bio),
                    status   = COALESCE(?5, status)
                 WHERE id = ?1",
                rusqlite::params![
                    id,
                    changes.username,
                    changes.avatar,
                    changes.bio,
                    changes.status
                ],
            )?;
            Ok(())
        })
    }

    pub fn update_keys(&self, id: i64, keys: &PublicKeys) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE users SET pub_x25519 = ?2, kyber_pub = ?3, dilithium_pub = ?4 WHERE id = ?1",
                rusqlite::params![id, keys.perm_pub_x25519, keys.kyber_pub, keys.dilithium_pub],
            )?;
            Ok(())
        })
    }

    /// All users except the given one. Backs the contact list.
    pub fn list_users_except(&self, id: i64) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM users WHERE id != ?1 ORDER BY username")?;
            let rows = stmt
                .query_map([id], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Contacts --

    pub fn add_contact(&self, user_id: i64, contact_id: i64) -> Result<ContactRow> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO contacts (user_id, contact_id) VALUES (?1, ?2)",
                [user_id, contact_id],
            )?;
            let row = conn.query_row(
                "SELECT id, user_id, contact_id, status, created_at
                 FROM contacts WHERE user_id = ?1 AND contact_id = ?2",
                [user_id, contact_id],
                |row| {
                    Ok(ContactRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        contact_id: row.get(2)?,
                        status: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )?;
            Ok(row)
        })
    }

    // -- Groups --

    /// Creates a group with the owner as its first member.
    pub fn create_group(
        &self,
        name: &str,
        description: Option<&str>,
        owner_id: i64,
    ) -> Result<i64> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO groups (name, description, owner_id) VALUES (?1, ?2, ?3)",
                rusqlite::params![name, description, owner_id],
            )?;
            let group_id = tx.last_insert_rowid();
            tx.execute(
                "INSERT INTO group_members (group_id, user_id) VALUES (?1, ?2)",
                [group_id, owner_id],
            )?;
            tx.commit()?;
            Ok(group_id)
        })
    }

    pub fn get_group(&self, id: i64) -> Result<Option<GroupRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, name, description, owner_id, created_at FROM groups WHERE id = ?1",
                    [id],
                    group_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn groups_owned_by(&self, owner_id: i64) -> Result<Vec<GroupRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, description, owner_id, created_at
                 FROM groups WHERE owner_id = ?1 ORDER BY created_at",
            )?;
            let rows = stmt
                .query_map([owner_id], group_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn join_group(&self, group_id: i64, user_id: i64) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO group_members (group_id, user_id) VALUES (?1, ?2)",
                [group_id, user_id],
            )?;
            Ok(())
        })
    }

    pub fn leave_group(&self, group_id: i64, user_id: i64) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                [group_id, user_id],
            )?;
            Ok(())
        })
    }

    pub fn group_member_ids(&self, group_id: i64) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT user_id FROM group_members WHERE group_id = ?1")?;
            let rows = stmt
                .query_map([group_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    /// Persists a message and returns the stored row. The id and the
    /// epoch-millisecond timestamp are assigned here, never by the caller.
    pub fn insert_message(
        &self,
        sender_id: i64,
        receiver_id: Option<i64>,
        group_id: Option<i64>,
        ciphertext: &str,
        iv: Option<&str>,
        metadata: Option<&str>,
    ) -> Result<MessageRow> {
        self.with_conn_mut(|conn| {
            let created_at = chrono::Utc::now().timestamp_millis();
            conn.execute(
                "INSERT INTO messages (sender_id, receiver_id, group_id, ciphertext, iv, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![sender_id, receiver_id, group_id, ciphertext, iv, metadata, created_at],
            )?;

            Ok(MessageRow {
                id: conn.last_insert_rowid(),
                sender_id,
                receiver_id,
                group_id,
                ciphertext: ciphertext.to_string(),
                iv: iv.map(str::to_string),
                metadata: metadata.map(str::to_string),
                created_at,
            })
        })
    }

    /// Both directions of a one-to-one conversation, oldest first.
    pub fn conversation(&self, user_id: i64, other_user_id: i64) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender_id, receiver_id, group_id, ciphertext, iv, metadata, created_at
                 FROM messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)
                 ORDER BY created_at ASC",
            )?;
            let rows = stmt
                .query_map([user_id, other_user_id], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn group_messages(&self, group_id: i64) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender_id, receiver_id, group_id, ciphertext, iv, metadata, created_at
                 FROM messages WHERE group_id = ?1 ORDER BY created_at ASC",
            )?;
            let rows = stmt
                .query_map([group_id], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_user<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    param: P,
) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(sql)?;
    let row = stmt.query_row(param, user_from_row).optional()?;
    Ok(row)
}

fn user_from_row(row: &rusqlite::Row<'_>) -> std::result::Result<UserRow, rusqlite::Error> {
    Ok(UserRow {
        id: row.get("id")?,
        username: row.get("username")?,
        password: row.get("password")?,
        avatar: row.get("avatar")?,
        bio: row.get("bio")?,
        status: row.get("status")?,
        pub_x25519: row.get("pub_x25519")?,
        kyber_pub: row.get("kyber_pub")?,
        dilithium_pub: row.get("dilithium_pub")?,
        created_at: row.get("created_at")?,
    })
}

fn group_from_row(row: &rusqlite::Row<'_>) -> std::result::Result<GroupRow, rusqlite::Error> {
    Ok(GroupRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        owner_id: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn message_from_row(row: &rusqlite::Row<'_>) -> std::result::Result<MessageRow, rusqlite::Error> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        group_id: row.get(3)?,
        ciphertext: row.get(4)?,
        iv: row.get(5)?,
        metadata: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_with_users(names: &[&str]) -> (Database, Vec<i64>) {
        let db = Database::open_in_memory().unwrap();
        let ids = names
            .iter()
            .map(|name| {
                db.create_user(name, "argon2-hash", &PublicKeys::default())
                    .unwrap()
            })
            .collect();
        (db, ids)
    }

    #[test]
    fn create_and_resolve_user() {
        let (db, ids) = db_with_users(&["alice"]);

        let user = db.get_user_by_username("alice").unwrap().unwrap();
        assert_eq!(user.id, ids[0]);
        assert_eq!(user.status, "online");

        assert!(db.get_user_by_username("nobody").unwrap().is_none());
    }

    #[test]
    fn store_assigns_message_ids_and_timestamps() {
        let (db, ids) = db_with_users(&["alice", "bob"]);

        let first = db
            .insert_message(ids[0], Some(ids[1]), None, "abc", Some("aXY="), None)
            .unwrap();
        let second = db
            .insert_message(ids[0], Some(ids[1]), None, "def", None, None)
            .unwrap();

        assert!(first.id < second.id);
        assert!(first.created_at > 0);
        assert!(second.created_at >= first.created_at);
    }

    #[test]
    fn conversation_covers_both_directions_in_order() {
        let (db, ids) = db_with_users(&["alice", "bob", "carol"]);
        let (a, b, c) = (ids[0], ids[1], ids[2]);

        db.insert_message(a, Some(b), None, "a->b", None, None).unwrap();
        db.insert_message(b, Some(a), None, "b->a", None, None).unwrap();
        db.insert_message(a, Some(c), None, "a->c", None, None).unwrap();

        let rows = db.conversation(a, b).unwrap();
        let texts: Vec<&str> = rows.iter().map(|r| r.ciphertext.as_str()).collect();
        assert_eq!(texts, vec!["a->b", "b->a"]);
        assert!(rows.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }

    #[test]
    fn group_membership_tracks_join_and_leave() {
        let (db, ids) = db_with_users(&["alice", "bob"]);
        let group_id = db.create_group("ops", None, ids[0]).unwrap();

        // owner is a member from the start
        assert_eq!(db.group_member_ids(group_id).unwrap(), vec![ids[0]]);

        db.join_group(group_id, ids[1]).unwrap();
        let mut members = db.group_member_ids(group_id).unwrap();
        members.sort();
        assert_eq!(members, ids);

        db.leave_group(group_id, ids[1]).unwrap();
        assert_eq!(db.group_member_ids(group_id).unwrap(), vec![ids[0]]);
    }

    #[test]
    fn group_messages_are_scoped_to_the_group() {
        let (db, ids) = db_with_users(&["alice", "bob"]);
        let group_id = db.create_group("ops", None, ids[0]).unwrap();

        db.insert_message(ids[0], None, Some(group_id), "g1", None, None)
            .unwrap();
        db.insert_message(ids[0], Some(ids[1]), None, "direct", None, None)
            .unwrap();

        let rows = db.group_messages(group_id).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ciphertext, "g1");
        assert_eq!(rows[0].group_id, Some(group_id));
    }
}
