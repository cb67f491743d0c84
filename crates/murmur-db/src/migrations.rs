use rusqlite::Connection;
use tracing::info;

use crate::Result;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (conversations, messages)");
        conn.execute_batch(
            "
            -- One row per unordered pair: user_low < user_high is enforced,
            -- so UNIQUE(user_low, user_high) rejects a mirrored duplicate.
            CREATE TABLE conversations (
                id                   TEXT PRIMARY KEY,
                user_low             TEXT NOT NULL,
                user_high            TEXT NOT NULL,
                request_status       TEXT NOT NULL DEFAULT 'pending'
                                     CHECK (request_status IN ('pending', 'accepted', 'rejected')),
                initiator_id         TEXT,
                responder_id         TEXT,
                is_suggestion_active INTEGER NOT NULL DEFAULT 1,
                created_at           INTEGER NOT NULL,
                UNIQUE (user_low, user_high),
                CHECK (user_low < user_high)
            );

            CREATE INDEX idx_conversations_high ON conversations(user_high);

            CREATE TABLE conversation_deletions (
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                user_id         TEXT NOT NULL,
                deleted_at      INTEGER NOT NULL,
                PRIMARY KEY (conversation_id, user_id)
            );

            CREATE TABLE messages (
                seq             INTEGER PRIMARY KEY AUTOINCREMENT,
                id              TEXT NOT NULL UNIQUE,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                sender_id       TEXT NOT NULL,
                receiver_id     TEXT NOT NULL,
                body            TEXT NOT NULL,
                message_type    TEXT,
                attachment_url  TEXT,
                client_ref      TEXT,
                reply_type      TEXT,
                reply_body      TEXT,
                reply_owner     TEXT,
                delivery_state  TEXT NOT NULL
                                CHECK (delivery_state IN ('sent', 'delivered', 'seen')),
                created_at      INTEGER NOT NULL,
                edited_at       INTEGER
            );

            CREATE INDEX idx_messages_conversation
                ON messages(conversation_id, created_at, seq);

            CREATE INDEX idx_messages_receiver_state
                ON messages(receiver_id, delivery_state);

            CREATE TABLE message_reactions (
                message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
                user_id    TEXT NOT NULL,
                reaction   TEXT,
                PRIMARY KEY (message_id, user_id)
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (user profiles, device tokens)");
        conn.execute_batch(
            "
            CREATE TABLE user_profiles (
                user_id    TEXT PRIMARY KEY,
                is_online  INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE device_tokens (
                device_id  TEXT PRIMARY KEY,
                user_id    TEXT NOT NULL,
                token      TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX idx_device_tokens_user ON device_tokens(user_id, updated_at);

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
