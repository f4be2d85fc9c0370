use parlor_types::models::{DeliveryState, MessageStatus};
use rusqlite::{Row, params};
use tracing::{debug, warn};

use crate::{Database, StoreError, StoreResult, now_timestamp, parse_optional_timestamp};

pub(crate) const STATUS_COLUMNS: &str =
    "id, message_id, user_id, chat_member_id, status, sent_at, delivered_at, read_at";

impl Database {
    /// Marks every recipient row of a message as delivered.
    ///
    /// Rows already marked read stay read, and a delivery time recorded
    /// earlier is kept. Returns the number of rows touched.
    pub fn mark_delivered(&self, message_id: i64) -> StoreResult<usize> {
        let (_, stamp) = now_timestamp();
        let touched = self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE message_statuses
                 SET delivered_at = COALESCE(delivered_at, ?1),
                     status = CASE WHEN status = 'read' THEN 'read' ELSE 'delivered' END
                 WHERE message_id = ?2",
                params![stamp, message_id],
            )?)
        })?;

        if touched == 0 {
            return Err(StoreError::NotFound(
                "No delivery status found for this message".into(),
            ));
        }
        debug!("Message {} delivered to {} recipients", message_id, touched);
        Ok(touched)
    }

    /// Marks every recipient row of a message as read. A row that skipped the
    /// delivered step gets its delivery time filled in as well.
    pub fn mark_read(&self, message_id: i64) -> StoreResult<usize> {
        let (_, stamp) = now_timestamp();
        let touched = self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE message_statuses
                 SET read_at = COALESCE(read_at, ?1),
                     delivered_at = COALESCE(delivered_at, ?1),
                     status = 'read'
                 WHERE message_id = ?2",
                params![stamp, message_id],
            )?)
        })?;

        if touched == 0 {
            return Err(StoreError::NotFound(
                "No read status found for this message".into(),
            ));
        }
        debug!("Message {} read by {} recipients", message_id, touched);
        Ok(touched)
    }
}

pub(crate) fn status_from_row(row: &Row<'_>) -> rusqlite::Result<MessageStatus> {
    let status: String = row.get(4)?;
    Ok(MessageStatus {
        id: row.get(0)?,
        message_id: row.get(1)?,
        user_id: row.get(2)?,
        chat_member_id: row.get(3)?,
        status: status.parse().unwrap_or_else(|e| {
            warn!("Corrupt message status: {}", e);
            DeliveryState::Sent
        }),
        sent_at: parse_optional_timestamp(row.get(5)?),
        delivered_at: parse_optional_timestamp(row.get(6)?),
        read_at: parse_optional_timestamp(row.get(7)?),
    })
}
