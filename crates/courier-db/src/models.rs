//! Database row types. `UserRow` carries credentials and never leaves the
//! server; chats and messages map straight onto `courier_types::models`.

use chrono::{DateTime, Utc};
use courier_types::models::{ChatType, UserPublic};

pub struct UserRow {
    pub id: i64,
    pub phone_number: String,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
    pub password_hash: String,
    pub public_key: String,
    pub created_at: DateTime<Utc>,
}

impl UserRow {
    pub fn to_public(&self) -> UserPublic {
        UserPublic {
            id: self.id,
            username: self.username.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            public_key: self.public_key.clone(),
        }
    }
}

pub struct NewUser<'a> {
    pub phone_number: &'a str,
    pub username: Option<&'a str>,
    pub first_name: &'a str,
    pub last_name: Option<&'a str>,
    pub password_hash: &'a str,
    pub public_key: &'a str,
}

/// Chat header without its participant list.
pub(crate) struct ChatRow {
    pub id: i64,
    pub chat_type: ChatType,
    pub chat_name: Option<String>,
    pub owner_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}
