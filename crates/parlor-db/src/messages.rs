use std::collections::HashMap;

use parlor_types::api::{MessageDraft, MessagePage, SearchResponse};
use parlor_types::models::{Message, MessageStatus, Reaction, User};
use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::info;

use crate::chats::load_chat;
use crate::delivery::{STATUS_COLUMNS, status_from_row};
use crate::reactions::{REACTION_COLUMNS, reaction_from_row};
use crate::{Database, StoreError, StoreResult, now_timestamp, parse_timestamp};

/// Fixed page size of `messages_in_chat`.
pub const PAGE_SIZE: u32 = 100;

// Sender is joined in so a page of messages costs one query plus two batch lookups.
const MESSAGE_SELECT: &str =
    "SELECT m.id, m.chat_id, m.sender_id, m.text, m.type, m.created_at, m.updated_at, m.reply_to_id,
            u.id, u.name, u.email, u.phone, u.created_at
     FROM messages m
     LEFT JOIN users u ON u.id = m.sender_id";

impl Database {
    pub fn send_message(
        &self,
        chat_id: i64,
        sender_id: i64,
        draft: &MessageDraft,
    ) -> StoreResult<Message> {
        let mut sent = self.send_messages(chat_id, sender_id, std::slice::from_ref(draft))?;
        sent.pop()
            .ok_or_else(|| StoreError::Internal(anyhow::anyhow!("message vanished after insert")))
    }

    /// Sends a batch of messages as one unit: the messages, a `sent` status row
    /// for every other member, and the chat's last-message cache are written
    /// in one transaction. The batch shares one `created_at`; ids are strictly
    /// increasing and order messages inside it.
    pub fn send_messages(
        &self,
        chat_id: i64,
        sender_id: i64,
        drafts: &[MessageDraft],
    ) -> StoreResult<Vec<Message>> {
        if drafts.is_empty() {
            return Err(StoreError::bad_request("No messages provided"));
        }
        if drafts.iter().any(|d| d.text.trim().is_empty()) {
            return Err(StoreError::bad_request("Message text must not be empty"));
        }

        let messages = self.with_tx(|conn| {
            let chat = load_chat(conn, chat_id)?.ok_or_else(|| StoreError::not_found("chat", chat_id))?;
            if !chat.members.iter().any(|m| m.user_id == sender_id) {
                return Err(StoreError::Forbidden(
                    "Sender is not a member of this chat".into(),
                ));
            }

            let (_, stamp) = now_timestamp();
            let mut insert_message = conn.prepare_cached(
                "INSERT INTO messages (chat_id, sender_id, text, type, reply_to_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            )?;
            let mut insert_status = conn.prepare_cached(
                "INSERT INTO message_statuses (message_id, user_id, chat_member_id, status, sent_at)
                 VALUES (?1, ?2, ?3, 'sent', ?4)",
            )?;

            let mut ids = Vec::with_capacity(drafts.len());
            for draft in drafts {
                if let Some(reply_to) = draft.reply_to_id {
                    ensure_reply_target(conn, chat_id, reply_to)?;
                }

                insert_message.execute(params![
                    chat_id,
                    sender_id,
                    draft.text,
                    draft.kind_or_default(),
                    draft.reply_to_id,
                    stamp,
                ])?;
                let message_id = conn.last_insert_rowid();

                for member in chat.members.iter().filter(|m| m.user_id != sender_id) {
                    insert_status.execute(params![message_id, member.user_id, member.id, stamp])?;
                }
                ids.push(message_id);
            }

            refresh_chat_cache(conn, chat_id)?;
            load_messages_by_id(conn, &ids)
        })?;

        if messages.len() > 1 {
            info!(
                "User {} sent {} messages to chat {}",
                sender_id,
                messages.len(),
                chat_id
            );
        }
        Ok(messages)
    }

    pub fn get_message(&self, message_id: i64) -> StoreResult<Message> {
        self.with_conn(|conn| {
            load_message(conn, message_id)?
                .ok_or_else(|| StoreError::not_found("message", message_id))
        })
    }

    /// One page of a chat's live messages, oldest first. Pages start at 1.
    pub fn messages_in_chat(&self, chat_id: i64, page: u32) -> StoreResult<MessagePage> {
        let page = page.max(1);
        let offset = i64::from(page - 1) * i64::from(PAGE_SIZE);

        self.with_conn(|conn| {
            if load_chat(conn, chat_id)?.is_none() {
                return Err(StoreError::not_found("chat", chat_id));
            }

            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE chat_id = ?1 AND deleted_at IS NULL",
                [chat_id],
                |row| row.get(0),
            )?;

            let sql = format!(
                "{} WHERE m.chat_id = ?1 AND m.deleted_at IS NULL
                 ORDER BY m.created_at ASC, m.id ASC
                 LIMIT ?2 OFFSET ?3",
                MESSAGE_SELECT
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut messages = stmt
                .query_map(params![chat_id, PAGE_SIZE, offset], message_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            attach_details(conn, &mut messages)?;

            Ok(MessagePage {
                page,
                limit: PAGE_SIZE,
                total_messages: total as u64,
                messages,
            })
        })
    }

    /// Case-insensitive substring search over a chat's live messages,
    /// newest first.
    pub fn search_messages(&self, chat_id: i64, needle: &str) -> StoreResult<SearchResponse> {
        if needle.is_empty() {
            return Err(StoreError::bad_request(
                "Invalid or missing 'text' in request body",
            ));
        }

        self.with_conn(|conn| {
            let chat = load_chat(conn, chat_id)?.ok_or_else(|| StoreError::not_found("chat", chat_id))?;

            // Matched in Rust: SQLite's lower() leaves non-ASCII letters alone.
            let needle = needle.to_lowercase();
            let mut stmt = conn.prepare(
                "SELECT text FROM messages
                 WHERE chat_id = ?1 AND deleted_at IS NULL
                 ORDER BY created_at DESC, id DESC",
            )?;
            let mut texts = Vec::new();
            for text in stmt.query_map([chat_id], |row| row.get::<_, String>(0))? {
                let text = text?;
                if text.to_lowercase().contains(&needle) {
                    texts.push(text);
                }
            }

            Ok(SearchResponse {
                chat_name: chat.name,
                messages: texts,
            })
        })
    }

    pub fn update_message(&self, message_id: i64, text: &str) -> StoreResult<Message> {
        if text.trim().is_empty() {
            return Err(StoreError::bad_request("Invalid or missing text field"));
        }

        self.with_tx(|conn| {
            let chat_id = live_message_chat(conn, message_id)?;
            let (_, stamp) = now_timestamp();
            conn.execute(
                "UPDATE messages SET text = ?1, updated_at = ?2 WHERE id = ?3",
                params![text, stamp, message_id],
            )?;

            // The edited message may be the one the chat cache points at.
            refresh_chat_cache(conn, chat_id)?;
            load_message(conn, message_id)?.ok_or_else(|| StoreError::not_found("message", message_id))
        })
    }

    /// Soft-deletes a message. Its status rows and reactions are removed in
    /// the same transaction and the chat cache moves to the previous message.
    pub fn delete_message(&self, message_id: i64) -> StoreResult<()> {
        self.with_tx(|conn| {
            let chat_id = live_message_chat(conn, message_id)?;
            let (_, stamp) = now_timestamp();

            conn.execute(
                "UPDATE messages SET deleted_at = ?1 WHERE id = ?2",
                params![stamp, message_id],
            )?;
            conn.execute("DELETE FROM message_statuses WHERE message_id = ?1", [message_id])?;
            conn.execute("DELETE FROM reactions WHERE message_id = ?1", [message_id])?;

            refresh_chat_cache(conn, chat_id)
        })
    }

    /// Messages of the one-to-one chat shared by two users, oldest first.
    pub fn private_messages(&self, user_id: i64, other_id: i64) -> StoreResult<Vec<Message>> {
        self.with_conn(|conn| {
            let chat_id: Option<i64> = conn
                .query_row(
                    "SELECT c.id FROM chats c
                     JOIN chat_members a ON a.chat_id = c.id AND a.user_id = ?1
                     JOIN chat_members b ON b.chat_id = c.id AND b.user_id = ?2
                     WHERE c.is_group = 0 AND c.deleted_at IS NULL
                     ORDER BY c.id LIMIT 1",
                    [user_id, other_id],
                    |row| row.get(0),
                )
                .optional()?;
            let chat_id = chat_id.ok_or_else(|| {
                StoreError::NotFound("No private chat found between users".into())
            })?;

            let sql = format!(
                "{} WHERE m.chat_id = ?1 AND m.deleted_at IS NULL ORDER BY m.created_at ASC, m.id ASC",
                MESSAGE_SELECT
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut messages = stmt
                .query_map([chat_id], message_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            attach_details(conn, &mut messages)?;
            Ok(messages)
        })
    }
}

/// Recomputes the chat's denormalized last-message fields from its latest
/// live message, clearing them when none is left.
pub(crate) fn refresh_chat_cache(conn: &Connection, chat_id: i64) -> StoreResult<()> {
    let latest: Option<(String, String)> = conn
        .query_row(
            "SELECT text, created_at FROM messages
             WHERE chat_id = ?1 AND deleted_at IS NULL
             ORDER BY created_at DESC, id DESC
             LIMIT 1",
            [chat_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let (text, at) = latest.unzip();
    conn.execute(
        "UPDATE chats SET last_message = ?1, last_updated_at = ?2 WHERE id = ?3",
        params![text, at, chat_id],
    )?;
    Ok(())
}

fn ensure_reply_target(conn: &Connection, chat_id: i64, reply_to: i64) -> StoreResult<()> {
    let valid: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM messages WHERE id = ?1 AND chat_id = ?2 AND deleted_at IS NULL)",
        [reply_to, chat_id],
        |row| row.get(0),
    )?;
    if valid {
        Ok(())
    } else {
        Err(StoreError::BadRequest(format!(
            "Reply target {} is not a message of this chat",
            reply_to
        )))
    }
}

fn live_message_chat(conn: &Connection, message_id: i64) -> StoreResult<i64> {
    conn.query_row(
        "SELECT chat_id FROM messages WHERE id = ?1 AND deleted_at IS NULL",
        [message_id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("message", message_id))
}

pub(crate) fn load_message(conn: &Connection, message_id: i64) -> StoreResult<Option<Message>> {
    Ok(load_messages_by_id(conn, &[message_id])?.pop())
}

/// Ids bound per `IN (...)` list, well below SQLite's host-parameter limit.
const ID_CHUNK: usize = 500;

/// Loads live messages by id, enriched, in ascending id order.
fn load_messages_by_id(conn: &Connection, ids: &[i64]) -> StoreResult<Vec<Message>> {
    let mut messages = Vec::with_capacity(ids.len());
    for chunk in ids.chunks(ID_CHUNK) {
        let sql = format!(
            "{} WHERE m.id IN ({}) AND m.deleted_at IS NULL ORDER BY m.id",
            MESSAGE_SELECT,
            placeholders(chunk.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        for message in stmt.query_map(as_params(chunk).as_slice(), message_from_row)? {
            messages.push(message?);
        }
    }
    messages.sort_by_key(|m| m.id);
    attach_details(conn, &mut messages)?;
    Ok(messages)
}

/// Batch-fetches reactions and status rows for a set of messages.
fn attach_details(conn: &Connection, messages: &mut [Message]) -> StoreResult<()> {
    let ids: Vec<i64> = messages.iter().map(|m| m.id).collect();
    let mut reactions: HashMap<i64, Vec<Reaction>> = HashMap::new();
    let mut statuses: HashMap<i64, Vec<MessageStatus>> = HashMap::new();

    for chunk in ids.chunks(ID_CHUNK) {
        let params = as_params(chunk);

        let sql = format!(
            "SELECT {} FROM reactions WHERE message_id IN ({}) ORDER BY id",
            REACTION_COLUMNS,
            placeholders(chunk.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        for reaction in stmt.query_map(params.as_slice(), reaction_from_row)? {
            let reaction = reaction?;
            reactions.entry(reaction.message_id).or_default().push(reaction);
        }

        let sql = format!(
            "SELECT {} FROM message_statuses WHERE message_id IN ({}) ORDER BY id",
            STATUS_COLUMNS,
            placeholders(chunk.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        for status in stmt.query_map(params.as_slice(), status_from_row)? {
            let status = status?;
            statuses.entry(status.message_id).or_default().push(status);
        }
    }

    for message in messages.iter_mut() {
        message.reactions = reactions.remove(&message.id).unwrap_or_default();
        message.status_track = statuses.remove(&message.id).unwrap_or_default();
    }
    Ok(())
}

fn placeholders(n: usize) -> String {
    (1..=n).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(", ")
}

fn as_params(ids: &[i64]) -> Vec<&dyn ToSql> {
    ids.iter().map(|id| id as &dyn ToSql).collect()
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;

    let sender = match row.get::<_, Option<i64>>(8)? {
        Some(id) => {
            let joined: String = row.get(12)?;
            Some(User {
                id,
                name: row.get(9)?,
                email: row.get(10)?,
                phone: row.get(11)?,
                created_at: parse_timestamp(&joined),
            })
        }
        None => None,
    };

    Ok(Message {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        sender_id: row.get(2)?,
        text: row.get(3)?,
        kind: row.get(4)?,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
        reply_to_id: row.get(7)?,
        sender,
        reactions: Vec::new(),
        status_track: Vec::new(),
    })
}
