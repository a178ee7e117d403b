use std::collections::BTreeSet;

use rusqlite::{Connection, Row};

use courier_types::models::{Chat, ChatType, MAX_GROUP_PARTICIPANTS, Participant};

use crate::clock::{format_ts, opt_ts_column, ts_column};
use crate::models::ChatRow;
use crate::users::query_user_by_id;
use crate::{Database, OptionalExt, StoreError, StoreResult};

impl Database {
    /// Create a chat. The participant set is de-duplicated and always
    /// contains the creator. Re-creating a private chat for the same pair
    /// returns the existing one.
    pub fn create_chat(
        &self,
        creator_id: i64,
        chat_type: ChatType,
        participant_ids: &[i64],
        chat_name: Option<&str>,
    ) -> StoreResult<Chat> {
        let mut ids: BTreeSet<i64> = participant_ids.iter().copied().collect();
        ids.insert(creator_id);

        let pair_key = match chat_type {
            ChatType::Private => {
                if ids.len() != 2 {
                    return Err(StoreError::invalid(
                        "a private chat must have exactly two participants",
                    ));
                }
                let mut it = ids.iter();
                let (low, high) = (it.next().copied(), it.next().copied());
                low.zip(high).map(|(l, h)| format!("{}:{}", l, h))
            }
            ChatType::Group => {
                if ids.len() > MAX_GROUP_PARTICIPANTS {
                    return Err(StoreError::Conflict(format!(
                        "a group chat can have at most {} participants",
                        MAX_GROUP_PARTICIPANTS
                    )));
                }
                None
            }
        };
        let owner_id = (chat_type == ChatType::Group).then_some(creator_id);

        let now = format_ts(&self.clock().now());
        self.with_tx(|tx| {
            if let Some(key) = &pair_key {
                let existing: Option<i64> = tx
                    .query_row(
                        "SELECT id FROM chats WHERE private_pair_key = ?1",
                        [key],
                        |row| row.get(0),
                    )
                    .optional()?;
                if let Some(chat_id) = existing {
                    return load_chat(tx, chat_id);
                }
            }

            for &uid in &ids {
                if query_user_by_id(tx, uid)?.is_none() {
                    return Err(StoreError::NotFound(format!("user {} not found", uid)));
                }
            }

            tx.execute(
                "INSERT INTO chats (chat_type, chat_name, owner_id, private_pair_key, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![chat_type.as_str(), chat_name, owner_id, pair_key, now],
            )?;
            let chat_id = tx.last_insert_rowid();

            for &uid in &ids {
                tx.execute(
                    "INSERT INTO chat_participants (user_id, chat_id, joined_at) VALUES (?1, ?2, ?3)",
                    rusqlite::params![uid, chat_id, now],
                )?;
            }

            load_chat(tx, chat_id)
        })
    }

    pub fn get_chat(&self, chat_id: i64) -> StoreResult<Chat> {
        self.with_conn(|conn| load_chat(conn, chat_id))
    }

    /// Chats the user currently belongs to, oldest first.
    pub fn list_user_chats(&self, user_id: i64) -> StoreResult<Vec<Chat>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id FROM chats c
                 JOIN chat_participants p ON p.chat_id = c.id
                 WHERE p.user_id = ?1
                 ORDER BY c.id",
            )?;
            let ids = stmt
                .query_map([user_id], |row| row.get::<_, i64>(0))?
                .collect::<Result<Vec<_>, _>>()?;

            ids.into_iter().map(|id| load_chat(conn, id)).collect()
        })
    }

    /// Current participant ids. Read fresh on every call.
    pub fn resolve_recipients(&self, chat_id: i64) -> StoreResult<Vec<i64>> {
        self.with_conn(|conn| participant_ids(conn, chat_id))
    }

    pub fn is_participant(&self, chat_id: i64, user_id: i64) -> StoreResult<bool> {
        self.with_conn(|conn| Ok(membership(conn, chat_id, user_id)?.is_some()))
    }

    /// Add `user_id` to a group chat on behalf of an existing member.
    pub fn add_participant(&self, chat_id: i64, user_id: i64, requester_id: i64) -> StoreResult<()> {
        let now = format_ts(&self.clock().now());
        self.with_tx(|tx| {
            let chat = require_chat(tx, chat_id)?;
            if chat.chat_type == ChatType::Private {
                return Err(StoreError::invalid(
                    "participants of a private chat cannot change",
                ));
            }
            if membership(tx, chat_id, requester_id)?.is_none() {
                return Err(StoreError::NotParticipant);
            }
            if participant_count(tx, chat_id)? >= MAX_GROUP_PARTICIPANTS {
                return Err(StoreError::conflict("group is full"));
            }
            if query_user_by_id(tx, user_id)?.is_none() {
                return Err(StoreError::not_found("user"));
            }
            if membership(tx, chat_id, user_id)?.is_some() {
                return Err(StoreError::conflict("user is already a participant"));
            }

            tx.execute(
                "INSERT INTO chat_participants (user_id, chat_id, joined_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![user_id, chat_id, now],
            )?;
            Ok(())
        })
    }

    /// Remove a participant from a group. Members may remove themselves;
    /// only the owner may remove others.
    pub fn remove_participant(
        &self,
        chat_id: i64,
        user_id: i64,
        requester_id: i64,
    ) -> StoreResult<()> {
        self.with_tx(|tx| {
            let chat = require_chat(tx, chat_id)?;
            if chat.chat_type == ChatType::Private {
                return Err(StoreError::invalid(
                    "participants of a private chat cannot change",
                ));
            }
            if user_id != requester_id && chat.owner_id != Some(requester_id) {
                return Err(StoreError::forbidden(
                    "only the owner can remove other participants",
                ));
            }
            if membership(tx, chat_id, user_id)?.is_none() {
                return Err(StoreError::not_found("participant"));
            }
            leave_group(tx, &chat, user_id)
        })
    }

    pub fn rename_chat(&self, chat_id: i64, new_name: &str, requester_id: i64) -> StoreResult<()> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(StoreError::invalid("chat name cannot be empty"));
        }

        self.with_tx(|tx| {
            let chat = require_chat(tx, chat_id)?;
            if chat.chat_type != ChatType::Group {
                return Err(StoreError::invalid("only group chats can be renamed"));
            }
            if chat.owner_id != Some(requester_id) {
                return Err(StoreError::forbidden("only the owner can rename the chat"));
            }
            tx.execute(
                "UPDATE chats SET chat_name = ?2 WHERE id = ?1",
                rusqlite::params![chat_id, new_name],
            )?;
            Ok(())
        })
    }

    /// Set or clear the display nickname of `target_id` in one chat. The
    /// target themself or the owner may do this.
    pub fn set_custom_nickname(
        &self,
        chat_id: i64,
        target_id: i64,
        nickname: Option<&str>,
        requester_id: i64,
    ) -> StoreResult<()> {
        self.with_tx(|tx| {
            let chat = require_chat(tx, chat_id)?;
            if target_id != requester_id && chat.owner_id != Some(requester_id) {
                return Err(StoreError::forbidden(
                    "only the participant or the owner can set this nickname",
                ));
            }
            if membership(tx, chat_id, target_id)?.is_none() {
                return Err(StoreError::not_found("participant"));
            }
            tx.execute(
                "UPDATE chat_participants SET custom_nickname = ?3 WHERE chat_id = ?1 AND user_id = ?2",
                rusqlite::params![chat_id, target_id, nickname],
            )?;
            Ok(())
        })
    }

    /// Delete a chat for everyone (hard delete, cascades), or for the
    /// requester only: leaving a group, or hiding a private chat's history.
    pub fn delete_chat(&self, chat_id: i64, requester_id: i64, for_everyone: bool) -> StoreResult<()> {
        let now = format_ts(&self.clock().now());
        self.with_tx(|tx| {
            let chat = require_chat(tx, chat_id)?;
            let is_member = membership(tx, chat_id, requester_id)?.is_some();

            if for_everyone {
                match chat.chat_type {
                    ChatType::Group if chat.owner_id != Some(requester_id) => {
                        return Err(StoreError::forbidden("only the owner can delete the group"));
                    }
                    ChatType::Private if !is_member => return Err(StoreError::NotParticipant),
                    _ => {}
                }
                tx.execute("DELETE FROM chats WHERE id = ?1", [chat_id])?;
                return Ok(());
            }

            if !is_member {
                return Err(StoreError::NotParticipant);
            }
            match chat.chat_type {
                ChatType::Group => leave_group(tx, &chat, requester_id),
                // Membership of a private chat is fixed, so "delete for me"
                // hides everything up to now instead.
                ChatType::Private => set_cleared_at(tx, chat_id, requester_id, &now),
            }
        })
    }
}

/// Remove `user_id` from a group. If the owner leaves, ownership passes to
/// the earliest-joined remaining member; an emptied group is deleted.
fn leave_group(conn: &Connection, chat: &ChatRow, user_id: i64) -> StoreResult<()> {
    conn.execute(
        "DELETE FROM chat_participants WHERE chat_id = ?1 AND user_id = ?2",
        rusqlite::params![chat.id, user_id],
    )?;

    if chat.owner_id != Some(user_id) {
        return Ok(());
    }

    let successor: Option<i64> = conn
        .query_row(
            "SELECT user_id FROM chat_participants WHERE chat_id = ?1 ORDER BY joined_at, id LIMIT 1",
            [chat.id],
            |row| row.get(0),
        )
        .optional()?;

    match successor {
        Some(next_owner) => {
            conn.execute(
                "UPDATE chats SET owner_id = ?2 WHERE id = ?1",
                rusqlite::params![chat.id, next_owner],
            )?;
        }
        None => {
            conn.execute("DELETE FROM chats WHERE id = ?1", [chat.id])?;
        }
    }
    Ok(())
}

pub(crate) fn set_cleared_at(
    conn: &Connection,
    chat_id: i64,
    user_id: i64,
    now: &str,
) -> StoreResult<()> {
    conn.execute(
        "UPDATE chat_participants SET last_cleared_at = ?3 WHERE chat_id = ?1 AND user_id = ?2",
        rusqlite::params![chat_id, user_id, now],
    )?;
    Ok(())
}

pub(crate) fn require_chat(conn: &Connection, chat_id: i64) -> StoreResult<ChatRow> {
    conn.query_row(
        "SELECT id, chat_type, chat_name, owner_id, created_at FROM chats WHERE id = ?1",
        [chat_id],
        map_chat_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("chat"))
}

fn load_chat(conn: &Connection, chat_id: i64) -> StoreResult<Chat> {
    let row = require_chat(conn, chat_id)?;
    let mut stmt = conn.prepare(
        "SELECT user_id, joined_at, custom_nickname, last_cleared_at
         FROM chat_participants WHERE chat_id = ?1 ORDER BY id",
    )?;
    let participants = stmt
        .query_map([chat_id], map_participant)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Chat {
        id: row.id,
        chat_type: row.chat_type,
        chat_name: row.chat_name,
        owner_id: row.owner_id,
        created_at: row.created_at,
        participants,
    })
}

/// The caller's participant row, if they are a member.
pub(crate) fn membership(
    conn: &Connection,
    chat_id: i64,
    user_id: i64,
) -> StoreResult<Option<Participant>> {
    conn.query_row(
        "SELECT user_id, joined_at, custom_nickname, last_cleared_at
         FROM chat_participants WHERE chat_id = ?1 AND user_id = ?2",
        rusqlite::params![chat_id, user_id],
        map_participant,
    )
    .optional()
}

fn participant_ids(conn: &Connection, chat_id: i64) -> StoreResult<Vec<i64>> {
    let mut stmt =
        conn.prepare("SELECT user_id FROM chat_participants WHERE chat_id = ?1 ORDER BY id")?;
    let ids = stmt
        .query_map([chat_id], |row| row.get(0))?
        .collect::<Result<Vec<i64>, _>>()?;
    Ok(ids)
}

fn participant_count(conn: &Connection, chat_id: i64) -> StoreResult<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM chat_participants WHERE chat_id = ?1",
        [chat_id],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

fn map_chat_row(row: &Row<'_>) -> rusqlite::Result<ChatRow> {
    let raw_type: String = row.get(1)?;
    let chat_type = raw_type.parse::<ChatType>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(ChatRow {
        id: row.get(0)?,
        chat_type,
        chat_name: row.get(2)?,
        owner_id: row.get(3)?,
        created_at: ts_column(row, 4)?,
    })
}

fn map_participant(row: &Row<'_>) -> rusqlite::Result<Participant> {
    Ok(Participant {
        user_id: row.get(0)?,
        joined_at: ts_column(row, 1)?,
        custom_nickname: row.get(2)?,
        last_cleared_at: opt_ts_column(row, 3)?,
    })
}
