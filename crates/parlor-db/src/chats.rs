use std::collections::HashSet;

use parlor_types::models::{Chat, ChatMember, ChatSummary, Role};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{info, warn};

use crate::users::ensure_user;
use crate::{
    Database, StoreError, StoreResult, non_blank, now_timestamp, parse_optional_timestamp,
    parse_timestamp,
};

const CHAT_COLUMNS: &str =
    "id, name, description, is_group, created_by, created_at, last_message, last_updated_at";

impl Database {
    // -- Chats --

    /// Creates a chat and its roster in one transaction.
    ///
    /// Named chats must be unique (case-insensitively) among live chats. The
    /// roster is deduplicated by user id and always contains the creator as
    /// an admin, see [`build_roster`].
    pub fn create_chat(
        &self,
        creator_id: i64,
        name: Option<&str>,
        description: Option<&str>,
        is_group: bool,
        members: &[(i64, Role)],
    ) -> StoreResult<Chat> {
        let name = non_blank(name);
        let description = non_blank(description);
        let roster = build_roster(creator_id, members);

        let chat = self.with_tx(|conn| {
            if let Some(name) = name {
                if name_taken(conn, name, None)? {
                    return Err(StoreError::Conflict(
                        "Chat with this name already exists".into(),
                    ));
                }
            }
            for (user_id, _) in &roster {
                ensure_user(conn, *user_id)?;
            }

            let (_, stamp) = now_timestamp();
            conn.execute(
                "INSERT INTO chats (name, name_key, description, is_group, created_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![name, name.map(name_key), description, is_group, creator_id, stamp],
            )?;
            let chat_id = conn.last_insert_rowid();

            let mut insert = conn.prepare_cached(
                "INSERT INTO chat_members (chat_id, user_id, role, added_by, joined_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (user_id, role) in &roster {
                insert.execute(params![chat_id, user_id, role.as_str(), creator_id, stamp])?;
            }

            load_chat(conn, chat_id)?.ok_or_else(|| StoreError::not_found("chat", chat_id))
        })?;

        info!(
            "Chat {} created by user {} with {} members",
            chat.id,
            creator_id,
            chat.members.len()
        );
        Ok(chat)
    }

    pub fn get_chat(&self, chat_id: i64) -> StoreResult<ChatSummary> {
        self.with_conn(|conn| {
            load_chat(conn, chat_id)?
                .map(|chat| ChatSummary::from(&chat))
                .ok_or_else(|| StoreError::not_found("chat", chat_id))
        })
    }

    /// Applies the non-empty fields of a partial update.
    pub fn update_chat(
        &self,
        chat_id: i64,
        name: Option<&str>,
        description: Option<&str>,
    ) -> StoreResult<Chat> {
        let name = non_blank(name);
        let description = non_blank(description);
        if name.is_none() && description.is_none() {
            return Err(StoreError::bad_request(
                "Name or Description must be provided",
            ));
        }

        self.with_tx(|conn| {
            if load_chat(conn, chat_id)?.is_none() {
                return Err(StoreError::not_found("chat", chat_id));
            }
            if let Some(name) = name {
                if name_taken(conn, name, Some(chat_id))? {
                    return Err(StoreError::Conflict(
                        "Chat with this name already exists".into(),
                    ));
                }
            }

            conn.execute(
                "UPDATE chats SET name = COALESCE(?1, name), name_key = COALESCE(?2, name_key),
                    description = COALESCE(?3, description)
                 WHERE id = ?4",
                params![name, name.map(name_key), description, chat_id],
            )?;

            load_chat(conn, chat_id)?.ok_or_else(|| StoreError::not_found("chat", chat_id))
        })
    }

    /// Permanently removes a chat and everything hanging off it. Soft-deleted
    /// chats are still found here.
    pub fn delete_chat(&self, chat_id: i64) -> StoreResult<()> {
        self.with_tx(|conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM chats WHERE id = ?1)",
                [chat_id],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(StoreError::not_found("chat", chat_id));
            }

            // Children first so every foreign key stays satisfied.
            conn.execute(
                "DELETE FROM reactions WHERE message_id IN (SELECT id FROM messages WHERE chat_id = ?1)",
                [chat_id],
            )?;
            conn.execute(
                "DELETE FROM message_statuses WHERE message_id IN (SELECT id FROM messages WHERE chat_id = ?1)",
                [chat_id],
            )?;
            let messages = conn.execute("DELETE FROM messages WHERE chat_id = ?1", [chat_id])?;
            let members = conn.execute("DELETE FROM chat_members WHERE chat_id = ?1", [chat_id])?;
            conn.execute("DELETE FROM chats WHERE id = ?1", [chat_id])?;

            info!(
                "Chat {} deleted with {} messages and {} members",
                chat_id, messages, members
            );
            Ok(())
        })
    }

    // -- Membership --

    /// Adds users to a group chat. Users who are already members are skipped.
    /// Returns how many memberships were created.
    pub fn add_members(
        &self,
        chat_id: i64,
        user_ids: &[i64],
        role: Role,
        added_by: i64,
    ) -> StoreResult<usize> {
        if user_ids.is_empty() {
            return Err(StoreError::bad_request("No user IDs provided"));
        }

        self.with_tx(|conn| {
            let chat = load_chat(conn, chat_id)?.ok_or_else(|| StoreError::not_found("chat", chat_id))?;
            if !chat.is_group {
                return Err(StoreError::bad_request(
                    "Cannot add users to a private chat",
                ));
            }

            let (_, stamp) = now_timestamp();
            let mut insert = conn.prepare_cached(
                "INSERT INTO chat_members (chat_id, user_id, role, added_by, joined_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(chat_id, user_id) DO NOTHING",
            )?;

            let mut added = 0;
            for user_id in user_ids {
                ensure_user(conn, *user_id)?;
                added += insert.execute(params![chat_id, user_id, role.as_str(), added_by, stamp])?;
            }
            Ok(added)
        })
    }

    /// Removes users from a group chat along with their pending status rows.
    /// Returns how many memberships were deleted.
    pub fn remove_members(&self, chat_id: i64, user_ids: &[i64]) -> StoreResult<usize> {
        self.with_tx(|conn| {
            let chat = load_chat(conn, chat_id)?.ok_or_else(|| StoreError::not_found("chat", chat_id))?;
            if !chat.is_group {
                return Err(StoreError::Forbidden(
                    "Cannot remove users from a private chat".into(),
                ));
            }
            if user_ids.is_empty() {
                return Err(StoreError::bad_request("Invalid or empty user_ids list"));
            }

            let mut removed = 0;
            for user_id in user_ids {
                conn.execute(
                    "DELETE FROM message_statuses WHERE chat_member_id IN
                        (SELECT id FROM chat_members WHERE chat_id = ?1 AND user_id = ?2)",
                    [chat_id, *user_id],
                )?;
                removed += conn.execute(
                    "DELETE FROM chat_members WHERE chat_id = ?1 AND user_id = ?2",
                    [chat_id, *user_id],
                )?;
            }
            Ok(removed)
        })
    }

    /// Every live chat the user belongs to, oldest first.
    pub fn chats_for_user(&self, user_id: i64) -> StoreResult<Vec<Chat>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM chats
                 WHERE deleted_at IS NULL
                   AND id IN (SELECT chat_id FROM chat_members WHERE user_id = ?1)
                 ORDER BY id",
                CHAT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let chats = stmt
                .query_map([user_id], chat_from_row)?
                .collect::<Result<Vec<_>, _>>()?;

            chats
                .into_iter()
                .map(|mut chat| {
                    chat.members = members_of(conn, chat.id)?;
                    Ok(chat)
                })
                .collect()
        })
    }
}

/// Deduplicates the requested roster by user id (first occurrence wins) and
/// makes sure the creator is present as an admin.
pub fn build_roster(creator_id: i64, requested: &[(i64, Role)]) -> Vec<(i64, Role)> {
    let mut seen = HashSet::with_capacity(requested.len() + 1);
    let mut roster = Vec::with_capacity(requested.len() + 1);

    for &(user_id, role) in requested {
        if !seen.insert(user_id) {
            continue;
        }
        let role = if user_id == creator_id { Role::Admin } else { role };
        roster.push((user_id, role));
    }
    if seen.insert(creator_id) {
        roster.push((creator_id, Role::Admin));
    }
    roster
}

/// Comparison key of a chat name: trimmed and lowercased with full Unicode
/// case folding.
pub(crate) fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

fn name_taken(conn: &Connection, name: &str, except: Option<i64>) -> StoreResult<bool> {
    let taken = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM chats
            WHERE name_key = ?1 AND deleted_at IS NULL AND (?2 IS NULL OR id != ?2))",
        params![name_key(name), except],
        |row| row.get(0),
    )?;
    Ok(taken)
}

/// Loads a live chat with its members.
pub(crate) fn load_chat(conn: &Connection, chat_id: i64) -> StoreResult<Option<Chat>> {
    let sql = format!(
        "SELECT {} FROM chats WHERE id = ?1 AND deleted_at IS NULL",
        CHAT_COLUMNS
    );
    let chat = conn.query_row(&sql, [chat_id], chat_from_row).optional()?;

    match chat {
        Some(mut chat) => {
            chat.members = members_of(conn, chat_id)?;
            Ok(Some(chat))
        }
        None => Ok(None),
    }
}

pub(crate) fn members_of(conn: &Connection, chat_id: i64) -> StoreResult<Vec<ChatMember>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, chat_id, user_id, role, added_by, joined_at
         FROM chat_members WHERE chat_id = ?1 ORDER BY id",
    )?;
    let members = stmt
        .query_map([chat_id], |row| {
            let role: String = row.get(3)?;
            let joined_at: String = row.get(5)?;
            Ok(ChatMember {
                id: row.get(0)?,
                chat_id: row.get(1)?,
                user_id: row.get(2)?,
                role: role.parse().unwrap_or_else(|e| {
                    warn!("Corrupt role on chat member: {}", e);
                    Role::Member
                }),
                added_by: row.get(4)?,
                joined_at: parse_timestamp(&joined_at),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(members)
}

fn chat_from_row(row: &Row<'_>) -> rusqlite::Result<Chat> {
    let created_at: String = row.get(5)?;
    Ok(Chat {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        is_group: row.get(3)?,
        created_by: row.get(4)?,
        created_at: parse_timestamp(&created_at),
        last_message: row.get(6)?,
        last_updated_at: parse_optional_timestamp(row.get(7)?),
        members: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{db, user};

    #[test]
    fn roster_dedupes_and_promotes_creator() {
        let roster = build_roster(
            1,
            &[(2, Role::Member), (3, Role::Member), (2, Role::Admin)],
        );
        assert_eq!(
            roster,
            vec![(2, Role::Member), (3, Role::Member), (1, Role::Admin)]
        );

        let listed = build_roster(1, &[(1, Role::Member), (4, Role::Member)]);
        assert_eq!(listed, vec![(1, Role::Admin), (4, Role::Member)]);
    }

    #[test]
    fn create_chat_builds_roster() {
        let db = db();
        let a = user(&db, "a");
        let b = user(&db, "b");
        let c = user(&db, "c");

        let chat = db
            .create_chat(
                a,
                Some("team"),
                None,
                true,
                &[(b, Role::Member), (c, Role::Member), (b, Role::Member)],
            )
            .unwrap();

        let roles: Vec<(i64, Role)> = chat.members.iter().map(|m| (m.user_id, m.role)).collect();
        assert_eq!(roles, vec![(b, Role::Member), (c, Role::Member), (a, Role::Admin)]);
        assert!(chat.members.iter().all(|m| m.added_by == Some(a)));
        assert!(chat.last_message.is_none());
    }

    #[test]
    fn chat_names_are_unique_case_insensitively() {
        let db = db();
        let a = user(&db, "a");
        db.create_chat(a, Some("Team"), None, true, &[]).unwrap();

        let dup = db.create_chat(a, Some("team"), Some("other"), false, &[]);
        assert!(matches!(dup, Err(StoreError::Conflict(_))));

        db.create_chat(a, Some("Équipe"), None, true, &[]).unwrap();
        let dup = db.create_chat(a, Some("équipe"), None, true, &[]);
        assert!(matches!(dup, Err(StoreError::Conflict(_))));
        let dup = db.create_chat(a, Some("  ÉQUIPE "), None, true, &[]);
        assert!(matches!(dup, Err(StoreError::Conflict(_))));

        // Unnamed chats never collide.
        db.create_chat(a, None, None, false, &[]).unwrap();
        db.create_chat(a, Some("  "), None, false, &[]).unwrap();
    }

    #[test]
    fn create_chat_with_unknown_member_rolls_back() {
        let db = db();
        let a = user(&db, "a");

        let result = db.create_chat(a, Some("ghosts"), None, true, &[(999, Role::Member)]);
        assert!(matches!(result, Err(StoreError::NotFound(_))));
        assert!(db.chats_for_user(a).unwrap().is_empty());
    }

    #[test]
    fn update_chat_validates_input() {
        let db = db();
        let a = user(&db, "a");
        let chat = db.create_chat(a, Some("one"), None, true, &[]).unwrap();
        db.create_chat(a, Some("two"), None, true, &[]).unwrap();

        assert!(matches!(
            db.update_chat(chat.id, Some(""), None),
            Err(StoreError::BadRequest(_))
        ));
        assert!(matches!(
            db.update_chat(chat.id + 50, Some("x"), None),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            db.update_chat(chat.id, Some("TWO"), None),
            Err(StoreError::Conflict(_))
        ));

        let updated = db.update_chat(chat.id, None, Some("about")).unwrap();
        assert_eq!(updated.name.as_deref(), Some("one"));
        assert_eq!(updated.description.as_deref(), Some("about"));

        // Renaming a chat to its own name in another case is fine.
        let renamed = db.update_chat(chat.id, Some("ONE"), None).unwrap();
        assert_eq!(renamed.name.as_deref(), Some("ONE"));
    }

    #[test]
    fn get_chat_projection() {
        let db = db();
        let a = user(&db, "a");
        let chat = db.create_chat(a, Some("p"), Some("d"), false, &[]).unwrap();

        let summary = db.get_chat(chat.id).unwrap();
        assert_eq!(summary.name.as_deref(), Some("p"));
        assert!(!summary.is_group);
        assert!(matches!(db.get_chat(chat.id + 1), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn membership_changes_require_group_chat() {
        let db = db();
        let a = user(&db, "a");
        let b = user(&db, "b");
        let direct = db.create_chat(a, None, None, false, &[(b, Role::Member)]).unwrap();

        assert!(matches!(
            db.add_members(direct.id, &[b], Role::Member, a),
            Err(StoreError::BadRequest(_))
        ));
        assert!(matches!(
            db.remove_members(direct.id, &[b]),
            Err(StoreError::Forbidden(_))
        ));
        assert!(matches!(
            db.add_members(direct.id + 10, &[b], Role::Member, a),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn add_members_skips_existing() {
        let db = db();
        let a = user(&db, "a");
        let b = user(&db, "b");
        let c = user(&db, "c");
        let chat = db.create_chat(a, Some("g"), None, true, &[(b, Role::Member)]).unwrap();

        assert!(matches!(
            db.add_members(chat.id, &[], Role::Member, a),
            Err(StoreError::BadRequest(_))
        ));

        let added = db.add_members(chat.id, &[b, c, c], Role::Admin, a).unwrap();
        assert_eq!(added, 1);

        let members = db.with_conn(|conn| members_of(conn, chat.id)).unwrap();
        assert_eq!(members.len(), 3);
        let newcomer = members.iter().find(|m| m.user_id == c).unwrap();
        assert_eq!(newcomer.role, Role::Admin);
        let existing = members.iter().find(|m| m.user_id == b).unwrap();
        assert_eq!(existing.role, Role::Member);
    }

    #[test]
    fn delete_chat_cascades() {
        let db = db();
        let a = user(&db, "a");
        let b = user(&db, "b");
        let chat = db.create_chat(a, Some("gone"), None, true, &[(b, Role::Member)]).unwrap();
        let root = db
            .send_message(chat.id, a, &parlor_types::api::MessageDraft::text("root"))
            .unwrap();
        let mut reply = parlor_types::api::MessageDraft::text("reply");
        reply.reply_to_id = Some(root.id);
        db.send_message(chat.id, b, &reply).unwrap();
        db.upsert_reaction(root.id, b, "👍").unwrap();

        db.delete_chat(chat.id).unwrap();

        let leftovers: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT (SELECT COUNT(*) FROM chats) + (SELECT COUNT(*) FROM chat_members)
                          + (SELECT COUNT(*) FROM messages) + (SELECT COUNT(*) FROM message_statuses)
                          + (SELECT COUNT(*) FROM reactions)",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(leftovers, 0);
        assert!(matches!(db.delete_chat(chat.id), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn soft_deleted_chat_is_hidden_but_deletable() {
        let db = db();
        let a = user(&db, "a");
        let chat = db.create_chat(a, Some("old"), None, true, &[]).unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE chats SET deleted_at = '2024-01-01T00:00:00.000000Z' WHERE id = ?1",
                [chat.id],
            )?;
            Ok(())
        })
        .unwrap();

        assert!(matches!(db.get_chat(chat.id), Err(StoreError::NotFound(_))));
        // The name is free again once the old chat is soft-deleted.
        db.create_chat(a, Some("old"), None, true, &[]).unwrap();
        db.delete_chat(chat.id).unwrap();
    }

    #[test]
    fn remove_members_deletes_rows() {
        let db = db();
        let a = user(&db, "a");
        let b = user(&db, "b");
        let chat = db.create_chat(a, Some("g"), None, true, &[(b, Role::Member)]).unwrap();

        assert!(matches!(
            db.remove_members(chat.id, &[]),
            Err(StoreError::BadRequest(_))
        ));
        assert_eq!(db.remove_members(chat.id, &[b, 42]).unwrap(), 1);
        assert!(db.chats_for_user(b).unwrap().is_empty());
        assert_eq!(db.chats_for_user(a).unwrap().len(), 1);
    }
}
