use rusqlite::ErrorCode;
use rusqlite::ffi;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not a participant of this chat")]
    NotParticipant,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn not_found(what: &str) -> Self {
        Self::NotFound(format!("{} not found", what))
    }

    pub fn forbidden(why: &str) -> Self {
        Self::Forbidden(why.to_string())
    }

    pub fn conflict(why: &str) -> Self {
        Self::Conflict(why.to_string())
    }

    pub fn invalid(why: &str) -> Self {
        Self::InvalidInput(why.to_string())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(inner, msg) = &err {
            if inner.code == ErrorCode::ConstraintViolation {
                let detail = msg.clone().unwrap_or_else(|| "constraint violation".into());
                return match inner.extended_code {
                    ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                        StoreError::Conflict(detail)
                    }
                    ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                        StoreError::NotFound("referenced row not found".into())
                    }
                    _ => StoreError::InvalidInput(detail),
                };
            }
        }
        StoreError::Unavailable(err.to_string())
    }
}
