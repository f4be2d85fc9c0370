use anyhow::Result;
use rusqlite::{Connection, params};
use tracing::info;

pub const SCHEMA_VERSION: i64 = 2;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                name        TEXT NOT NULL,
                email       TEXT NOT NULL UNIQUE,
                phone       TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                deleted_at  TEXT
            );

            CREATE TABLE chats (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                name            TEXT,
                description     TEXT,
                is_group        INTEGER NOT NULL DEFAULT 0,
                created_by      INTEGER NOT NULL REFERENCES users(id),
                created_at      TEXT NOT NULL,
                last_message    TEXT,
                last_updated_at TEXT,
                deleted_at      TEXT
            );

            CREATE INDEX idx_chats_name ON chats(lower(name));

            CREATE TABLE chat_members (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id     INTEGER NOT NULL REFERENCES chats(id),
                user_id     INTEGER NOT NULL REFERENCES users(id),
                role        TEXT NOT NULL DEFAULT 'member',
                added_by    INTEGER REFERENCES users(id),
                joined_at   TEXT NOT NULL,
                UNIQUE(chat_id, user_id)
            );

            CREATE INDEX idx_chat_members_user ON chat_members(user_id);

            CREATE TABLE messages (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id     INTEGER NOT NULL REFERENCES chats(id),
                sender_id   INTEGER NOT NULL REFERENCES users(id),
                text        TEXT NOT NULL,
                type        TEXT NOT NULL DEFAULT 'text',
                reply_to_id INTEGER REFERENCES messages(id),
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                deleted_at  TEXT
            );

            CREATE INDEX idx_messages_chat ON messages(chat_id, created_at, id);

            CREATE TABLE message_statuses (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id      INTEGER NOT NULL REFERENCES messages(id),
                user_id         INTEGER NOT NULL REFERENCES users(id),
                chat_member_id  INTEGER NOT NULL REFERENCES chat_members(id),
                status          TEXT NOT NULL DEFAULT 'sent',
                sent_at         TEXT,
                delivered_at    TEXT,
                read_at         TEXT,
                UNIQUE(message_id, user_id)
            );

            CREATE INDEX idx_message_statuses_member ON message_statuses(chat_member_id);

            CREATE TABLE reactions (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id  INTEGER NOT NULL REFERENCES messages(id),
                user_id     INTEGER NOT NULL REFERENCES users(id),
                emoji       TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                UNIQUE(message_id, user_id)
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (unicode chat name keys)");
        conn.execute_batch(
            "
            ALTER TABLE chats ADD COLUMN name_key TEXT;
            DROP INDEX IF EXISTS idx_chats_name;
            ",
        )?;

        // SQLite's lower() only folds ASCII, so keys are computed here.
        let named: Vec<(i64, String)> = {
            let mut stmt = conn.prepare("SELECT id, name FROM chats WHERE name IS NOT NULL")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<_, _>>()?;
            rows
        };
        for (id, name) in named {
            conn.execute(
                "UPDATE chats SET name_key = ?1 WHERE id = ?2",
                params![crate::chats::name_key(&name), id],
            )?;
        }

        conn.execute_batch(
            "
            CREATE UNIQUE INDEX idx_chats_name_key ON chats(name_key)
                WHERE deleted_at IS NULL AND name_key IS NOT NULL;

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, SCHEMA_VERSION);
    }

    #[test]
    fn reactions_are_unique_per_message_and_user() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        conn.execute_batch(
            "
            INSERT INTO users (name, email, phone, password, created_at)
                VALUES ('a', 'a@x', '1', 'h', '2024-01-01T00:00:00.000000Z');
            INSERT INTO chats (created_by, created_at) VALUES (1, '2024-01-01T00:00:00.000000Z');
            INSERT INTO messages (chat_id, sender_id, text, created_at, updated_at)
                VALUES (1, 1, 'hi', '2024-01-01T00:00:00.000000Z', '2024-01-01T00:00:00.000000Z');
            INSERT INTO reactions (message_id, user_id, emoji, created_at)
                VALUES (1, 1, '👍', '2024-01-01T00:00:00.000000Z');
            ",
        )
        .unwrap();

        let dup = conn.execute(
            "INSERT INTO reactions (message_id, user_id, emoji, created_at) VALUES (1, 1, '🎉', 'x')",
            [],
        );
        assert!(dup.is_err());
    }

    #[test]
    fn live_chat_name_keys_are_unique() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        conn.execute_batch(
            "
            INSERT INTO users (name, email, phone, password, created_at)
                VALUES ('a', 'a@x', '1', 'h', '2024-01-01T00:00:00.000000Z');
            INSERT INTO chats (name, name_key, created_by, created_at, deleted_at)
                VALUES ('Équipe', 'équipe', 1, '2024-01-01T00:00:00.000000Z', '2024-01-02T00:00:00.000000Z');
            INSERT INTO chats (name, name_key, created_by, created_at)
                VALUES ('ÉQUIPE', 'équipe', 1, '2024-01-03T00:00:00.000000Z');
            ",
        )
        .unwrap();

        let dup = conn.execute(
            "INSERT INTO chats (name, name_key, created_by, created_at) VALUES ('équipe', 'équipe', 1, 'x')",
            [],
        );
        assert!(dup.is_err());
    }
}
