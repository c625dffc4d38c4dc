use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            username        TEXT NOT NULL UNIQUE,
            password        TEXT NOT NULL,
            avatar          TEXT,
            bio             TEXT,
            status          TEXT NOT NULL DEFAULT 'offline',
            pub_x25519      TEXT,
            kyber_pub       TEXT,
            dilithium_pub   TEXT,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS contacts (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     INTEGER NOT NULL REFERENCES users(id),
            contact_id  INTEGER NOT NULL REFERENCES users(id),
            status      TEXT NOT NULL DEFAULT 'accepted',
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(user_id, contact_id)
        );

        CREATE TABLE IF NOT EXISTS groups (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT NOT NULL,
            description TEXT,
            owner_id    INTEGER NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS group_members (
            group_id    INTEGER NOT NULL REFERENCES groups(id),
            user_id     INTEGER NOT NULL REFERENCES users(id),
            PRIMARY KEY (group_id, user_id)
        );

        -- receiver_id and group_id are nullable on purpose: exactly one of
        -- them identifies the destination of a relayed message.
        CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            sender_id   INTEGER NOT NULL REFERENCES users(id),
            receiver_id INTEGER REFERENCES users(id),
            group_id    INTEGER REFERENCES groups(id),
            ciphertext  TEXT NOT NULL,
            iv          TEXT,
            metadata    TEXT,
            created_at  INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(sender_id, receiver_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_group
            ON messages(group_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
