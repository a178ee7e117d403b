use rusqlite::{Connection, Row};

use crate::clock::{format_ts, ts_column};
use crate::models::{NewUser, UserRow};
use crate::{Database, OptionalExt, StoreError, StoreResult};

const USER_COLUMNS: &str =
    "id, phone_number, username, first_name, last_name, password_hash, public_key, created_at";

impl Database {
    /// Insert a user. Phone number and username collisions are `Conflict`.
    /// Username availability is expected to have been checked already; the
    /// UNIQUE index is the last line.
    pub fn create_user(&self, user: &NewUser<'_>) -> StoreResult<UserRow> {
        let now = self.clock().now();
        self.with_tx(|tx| {
            if query_user_by(tx, "phone_number", user.phone_number)?.is_some() {
                return Err(StoreError::conflict(
                    "a user with this phone number is already registered",
                ));
            }

            tx.execute(
                "INSERT INTO users
                    (phone_number, username, first_name, last_name, password_hash, public_key, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    user.phone_number,
                    user.username,
                    user.first_name,
                    user.last_name,
                    user.password_hash,
                    user.public_key,
                    format_ts(&now),
                ],
            )
            .map_err(|e| match StoreError::from(e) {
                StoreError::Conflict(_) => StoreError::conflict("this username is already taken"),
                other => other,
            })?;

            let id = tx.last_insert_rowid();
            query_user_by_id(tx, id)?.ok_or_else(|| StoreError::not_found("user"))
        })
    }

    pub fn get_user(&self, id: i64) -> StoreResult<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    pub fn get_user_by_phone(&self, phone_number: &str) -> StoreResult<Option<UserRow>> {
        self.with_conn(|conn| query_user_by(conn, "phone_number", phone_number))
    }

    /// Exact existence check backing the username filter.
    pub fn username_exists(&self, username: &str) -> StoreResult<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM users WHERE username = ?1",
                    [username],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Every username in the table, for the startup filter resync.
    pub fn all_usernames(&self) -> StoreResult<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT username FROM users WHERE username IS NOT NULL")?;
            let rows = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(rows)
        })
    }

    /// Set a username on an account that has none yet.
    pub fn set_username(&self, user_id: i64, username: &str) -> StoreResult<()> {
        self.with_tx(|tx| {
            let user = query_user_by_id(tx, user_id)?.ok_or_else(|| StoreError::not_found("user"))?;
            if user.username.is_some() {
                return Err(StoreError::conflict("username is already set"));
            }

            tx.execute(
                "UPDATE users SET username = ?2 WHERE id = ?1 AND username IS NULL",
                rusqlite::params![user_id, username],
            )
            .map_err(|e| match StoreError::from(e) {
                StoreError::Conflict(_) => StoreError::conflict("this username is already taken"),
                other => other,
            })?;
            Ok(())
        })
    }
}

pub(crate) fn query_user_by_id(conn: &Connection, id: i64) -> StoreResult<Option<UserRow>> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
        [id],
        map_user,
    )
    .optional()
}

/// `column` is always a literal from this module, never user input.
fn query_user_by(conn: &Connection, column: &str, value: &str) -> StoreResult<Option<UserRow>> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE {} = ?1", USER_COLUMNS, column),
        [value],
        map_user,
    )
    .optional()
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        phone_number: row.get(1)?,
        username: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        password_hash: row.get(5)?,
        public_key: row.get(6)?,
        created_at: ts_column(row, 7)?,
    })
}
