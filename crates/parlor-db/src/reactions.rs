use parlor_types::models::Reaction;
use rusqlite::{OptionalExtension, Row, params};

use crate::{Database, StoreError, StoreResult, now_timestamp, parse_timestamp};

pub(crate) const REACTION_COLUMNS: &str = "id, message_id, user_id, emoji, created_at";

impl Database {
    /// Sets the user's reaction on a message, replacing any earlier emoji.
    /// Returns the stored reaction and whether it was newly created.
    pub fn upsert_reaction(
        &self,
        message_id: i64,
        user_id: i64,
        emoji: &str,
    ) -> StoreResult<(Reaction, bool)> {
        let emoji = emoji.trim();
        if emoji.is_empty() {
            return Err(StoreError::bad_request("Emoji is required"));
        }

        self.with_tx(|conn| {
            let live: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM messages WHERE id = ?1 AND deleted_at IS NULL)",
                [message_id],
                |row| row.get(0),
            )?;
            if !live {
                return Err(StoreError::not_found("message", message_id));
            }

            let existing: Option<i64> = conn
                .query_row(
                    "SELECT id FROM reactions WHERE message_id = ?1 AND user_id = ?2",
                    [message_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;

            let (id, created) = match existing {
                Some(id) => {
                    conn.execute("UPDATE reactions SET emoji = ?1 WHERE id = ?2", params![emoji, id])?;
                    (id, false)
                }
                None => {
                    let (_, stamp) = now_timestamp();
                    conn.execute(
                        "INSERT INTO reactions (message_id, user_id, emoji, created_at) VALUES (?1, ?2, ?3, ?4)",
                        params![message_id, user_id, emoji, stamp],
                    )?;
                    (conn.last_insert_rowid(), true)
                }
            };

            let sql = format!("SELECT {} FROM reactions WHERE id = ?1", REACTION_COLUMNS);
            let reaction = conn.query_row(&sql, [id], reaction_from_row)?;
            Ok((reaction, created))
        })
    }

    /// Deletes the user's reaction if there is one.
    pub fn remove_reaction(&self, message_id: i64, user_id: i64) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2",
                [message_id, user_id],
            )?;
            Ok(())
        })
    }

    pub fn reactions_for_message(&self, message_id: i64) -> StoreResult<Vec<Reaction>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM reactions WHERE message_id = ?1 ORDER BY id",
                REACTION_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([message_id], reaction_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

pub(crate) fn reaction_from_row(row: &Row<'_>) -> rusqlite::Result<Reaction> {
    let created_at: String = row.get(4)?;
    Ok(Reaction {
        id: row.get(0)?,
        message_id: row.get(1)?,
        user_id: row.get(2)?,
        emoji: row.get(3)?,
        created_at: parse_timestamp(&created_at),
    })
}

#[cfg(test)]
mod tests {
    use crate::StoreError;
    use crate::test_support::{db, user};
    use parlor_types::api::MessageDraft;
    use parlor_types::models::Role;

    #[test]
    fn second_reaction_replaces_first() {
        let db = db();
        let a = user(&db, "a");
        let b = user(&db, "b");
        let chat = db.create_chat(a, None, None, false, &[(b, Role::Member)]).unwrap();
        let msg = db.send_message(chat.id, a, &MessageDraft::text("hi")).unwrap();

        let (first, created) = db.upsert_reaction(msg.id, b, "👍").unwrap();
        assert!(created);
        let (second, created) = db.upsert_reaction(msg.id, b, "🎉").unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);

        db.upsert_reaction(msg.id, a, "❤️").unwrap();

        let reactions = db.reactions_for_message(msg.id).unwrap();
        assert_eq!(reactions.len(), 2);
        let mine: Vec<_> = reactions.iter().filter(|r| r.user_id == b).collect();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].emoji, "🎉");

        let enriched = db.get_message(msg.id).unwrap();
        assert_eq!(enriched.reactions.len(), 2);
    }

    #[test]
    fn remove_is_idempotent() {
        let db = db();
        let a = user(&db, "a");
        let chat = db.create_chat(a, Some("solo"), None, true, &[]).unwrap();
        let msg = db.send_message(chat.id, a, &MessageDraft::text("hi")).unwrap();

        db.upsert_reaction(msg.id, a, "👍").unwrap();
        db.remove_reaction(msg.id, a).unwrap();
        db.remove_reaction(msg.id, a).unwrap();
        assert!(db.reactions_for_message(msg.id).unwrap().is_empty());
    }

    #[test]
    fn reaction_validation() {
        let db = db();
        let a = user(&db, "a");
        let chat = db.create_chat(a, Some("solo"), None, true, &[]).unwrap();
        let msg = db.send_message(chat.id, a, &MessageDraft::text("hi")).unwrap();

        assert!(matches!(
            db.upsert_reaction(msg.id, a, " "),
            Err(StoreError::BadRequest(_))
        ));
        assert!(matches!(
            db.upsert_reaction(msg.id + 3, a, "👍"),
            Err(StoreError::NotFound(_))
        ));
    }
}
