use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            phone_number    TEXT NOT NULL UNIQUE,
            username        TEXT UNIQUE,
            first_name      TEXT NOT NULL,
            last_name       TEXT,
            password_hash   TEXT NOT NULL,
            public_key      TEXT NOT NULL,
            created_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chats (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_type           TEXT NOT NULL CHECK (chat_type IN ('private', 'group')),
            chat_name           TEXT,
            owner_id            INTEGER REFERENCES users(id) ON DELETE SET NULL,
            -- 'low:high' user ids, set only for private chats
            private_pair_key    TEXT UNIQUE,
            created_at          TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chat_participants (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id             INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            chat_id             INTEGER NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
            joined_at           TEXT NOT NULL,
            custom_nickname     TEXT,
            last_cleared_at     TEXT,
            UNIQUE(user_id, chat_id)
        );

        CREATE INDEX IF NOT EXISTS idx_participants_chat
            ON chat_participants(chat_id);

        CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id     INTEGER NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
            sender_id   INTEGER REFERENCES users(id) ON DELETE SET NULL,
            content     BLOB NOT NULL,
            sent_at     TEXT NOT NULL,
            status      TEXT NOT NULL DEFAULT 'sent'
                        CHECK (status IN ('sent', 'delivered', 'read')),
            is_pinned   INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_messages_chat
            ON messages(chat_id, id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
