use parlor_types::models::User;
use rusqlite::{Connection, OptionalExtension};

use crate::models::UserRow;
use crate::{Database, StoreError, StoreResult, now_timestamp};

impl Database {
    /// Inserts a new user. Email and phone must both be unused.
    pub fn create_user(
        &self,
        name: &str,
        email: &str,
        phone: &str,
        password_hash: &str,
    ) -> StoreResult<User> {
        self.with_tx(|conn| {
            let taken: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1 OR phone = ?2)",
                (email, phone),
                |row| row.get(0),
            )?;
            if taken {
                return Err(StoreError::Conflict(
                    "User with this email or phone already exists".into(),
                ));
            }

            let (_, stamp) = now_timestamp();
            conn.execute(
                "INSERT INTO users (name, email, phone, password, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                (name, email, phone, password_hash, &stamp),
            )?;
            let id = conn.last_insert_rowid();

            query_user(conn, "id = ?1", id)?
                .map(UserRow::into_user)
                .ok_or_else(|| StoreError::not_found("user", id))
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> StoreResult<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email = ?1", email))
    }

    pub fn get_user_by_id(&self, id: i64) -> StoreResult<Option<User>> {
        self.with_conn(|conn| Ok(query_user(conn, "id = ?1", id)?.map(UserRow::into_user)))
    }
}

fn query_user<P: rusqlite::ToSql>(
    conn: &Connection,
    filter: &str,
    value: P,
) -> StoreResult<Option<UserRow>> {
    let sql = format!(
        "SELECT id, name, email, phone, password, created_at FROM users
         WHERE {} AND deleted_at IS NULL",
        filter
    );
    let row = conn
        .query_row(&sql, [value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                name: row.get(1)?,
                email: row.get(2)?,
                phone: row.get(3)?,
                password: row.get(4)?,
                created_at: row.get(5)?,
            })
        })
        .optional()?;

    Ok(row)
}

/// Fails with `NotFound` unless `user_id` names a live user.
pub(crate) fn ensure_user(conn: &Connection, user_id: i64) -> StoreResult<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1 AND deleted_at IS NULL)",
        [user_id],
        |row| row.get(0),
    )?;
    if exists {
        Ok(())
    } else {
        Err(StoreError::not_found("user", user_id))
    }
}
