use rusqlite::{Connection, Row};

use courier_types::models::{ChatType, Message, MessageStatus};

use crate::chats::{membership, require_chat, set_cleared_at};
use crate::clock::{format_ts, ts_column};
use crate::{Database, OptionalExt, StoreError, StoreResult};

const MESSAGE_COLUMNS: &str = "id, chat_id, sender_id, content, sent_at, status, is_pinned";

impl Database {
    /// Persist a message from `sender_id`. The membership check and the
    /// insert share one transaction.
    pub fn create_message(&self, chat_id: i64, sender_id: i64, content: &[u8]) -> StoreResult<Message> {
        if content.is_empty() {
            return Err(StoreError::invalid("message content cannot be empty"));
        }

        self.with_tx(|tx| {
            require_chat(tx, chat_id)?;
            if membership(tx, chat_id, sender_id)?.is_none() {
                return Err(StoreError::NotParticipant);
            }

            // Timestamp taken under the connection lock so id order and
            // sent_at order agree.
            let sent_at = format_ts(&self.clock().now());
            tx.execute(
                "INSERT INTO messages (chat_id, sender_id, content, sent_at, status)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![chat_id, sender_id, content, sent_at, MessageStatus::Sent.as_str()],
            )?;
            let id = tx.last_insert_rowid();
            query_message(tx, id)?.ok_or_else(|| StoreError::not_found("message"))
        })
    }

    /// Newest-first page of the history visible to `requester_id`.
    pub fn list_history(
        &self,
        chat_id: i64,
        requester_id: i64,
        limit: u32,
        offset: u32,
    ) -> StoreResult<Vec<Message>> {
        self.with_conn(|conn| {
            require_chat(conn, chat_id)?;
            let participant = membership(conn, chat_id, requester_id)?
                .ok_or(StoreError::NotParticipant)?;
            let cleared = participant.last_cleared_at.as_ref().map(format_ts);

            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM messages
                 WHERE chat_id = ?1 AND (?2 IS NULL OR sent_at > ?2)
                 ORDER BY id DESC
                 LIMIT ?3 OFFSET ?4",
                MESSAGE_COLUMNS
            ))?;
            let rows = stmt
                .query_map(
                    rusqlite::params![chat_id, cleared, limit, offset],
                    map_message,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_message(&self, message_id: i64) -> StoreResult<Message> {
        self.with_conn(|conn| {
            query_message(conn, message_id)?.ok_or_else(|| StoreError::not_found("message"))
        })
    }

    /// Mark everyone else's messages up to `up_to_message_id` as read.
    /// Returns the number of rows that changed.
    pub fn mark_read(&self, chat_id: i64, reader_id: i64, up_to_message_id: i64) -> StoreResult<usize> {
        self.with_tx(|tx| {
            require_chat(tx, chat_id)?;
            if membership(tx, chat_id, reader_id)?.is_none() {
                return Err(StoreError::NotParticipant);
            }
            let updated = tx.execute(
                "UPDATE messages SET status = 'read'
                 WHERE chat_id = ?1
                   AND id <= ?2
                   AND (sender_id IS NULL OR sender_id != ?3)
                   AND status != 'read'",
                rusqlite::params![chat_id, up_to_message_id, reader_id],
            )?;
            Ok(updated)
        })
    }

    /// Hide history for the requester only, or hard-delete every message in
    /// the chat.
    pub fn clear_history(&self, chat_id: i64, requester_id: i64, for_everyone: bool) -> StoreResult<()> {
        let now = format_ts(&self.clock().now());
        self.with_tx(|tx| {
            let chat = require_chat(tx, chat_id)?;

            if for_everyone && chat.chat_type == ChatType::Group && chat.owner_id != Some(requester_id) {
                return Err(StoreError::forbidden(
                    "only the owner can clear history for everyone",
                ));
            }
            if membership(tx, chat_id, requester_id)?.is_none() {
                return Err(StoreError::NotParticipant);
            }

            if for_everyone {
                tx.execute("DELETE FROM messages WHERE chat_id = ?1", [chat_id])?;
                Ok(())
            } else {
                set_cleared_at(tx, chat_id, requester_id, &now)
            }
        })
    }

    /// Replace the content of a message. Author only.
    pub fn update_message(&self, message_id: i64, editor_id: i64, content: &[u8]) -> StoreResult<Message> {
        if content.is_empty() {
            return Err(StoreError::invalid("message content cannot be empty"));
        }

        self.with_tx(|tx| {
            let msg = query_message(tx, message_id)?.ok_or_else(|| StoreError::not_found("message"))?;
            if msg.sender_id != Some(editor_id) {
                return Err(StoreError::forbidden("only the author can edit this message"));
            }
            tx.execute(
                "UPDATE messages SET content = ?2 WHERE id = ?1",
                rusqlite::params![message_id, content],
            )?;
            query_message(tx, message_id)?.ok_or_else(|| StoreError::not_found("message"))
        })
    }

    /// Delete a message. Its author or the chat owner may do this.
    pub fn delete_message(&self, message_id: i64, requester_id: i64) -> StoreResult<()> {
        self.with_tx(|tx| {
            let msg = query_message(tx, message_id)?.ok_or_else(|| StoreError::not_found("message"))?;
            let chat = require_chat(tx, msg.chat_id)?;
            if msg.sender_id != Some(requester_id) && chat.owner_id != Some(requester_id) {
                return Err(StoreError::forbidden(
                    "only the author or the chat owner can delete this message",
                ));
            }
            tx.execute("DELETE FROM messages WHERE id = ?1", [message_id])?;
            Ok(())
        })
    }

    pub fn set_pinned(&self, message_id: i64, requester_id: i64, pinned: bool) -> StoreResult<Message> {
        self.with_tx(|tx| {
            let msg = query_message(tx, message_id)?.ok_or_else(|| StoreError::not_found("message"))?;
            if membership(tx, msg.chat_id, requester_id)?.is_none() {
                return Err(StoreError::NotParticipant);
            }
            tx.execute(
                "UPDATE messages SET is_pinned = ?2 WHERE id = ?1",
                rusqlite::params![message_id, pinned],
            )?;
            query_message(tx, message_id)?.ok_or_else(|| StoreError::not_found("message"))
        })
    }
}

fn query_message(conn: &Connection, id: i64) -> StoreResult<Option<Message>> {
    conn.query_row(
        &format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS),
        [id],
        map_message,
    )
    .optional()
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    let raw_status: String = row.get(5)?;
    let status = raw_status.parse::<MessageStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Message {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        sender_id: row.get(2)?,
        content: row.get(3)?,
        sent_at: ts_column(row, 4)?,
        status,
        is_pinned: row.get(6)?,
    })
}
