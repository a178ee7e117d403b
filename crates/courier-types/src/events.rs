use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Message, MessageStatus};

/// Frame a client sends over the live transport to post a message.
/// `content` is the client-encrypted payload, base64 encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmitFrame {
    pub chat_id: i64,
    pub content: String,
}

/// A submit frame that passed the transport-boundary checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub chat_id: i64,
    pub content: Vec<u8>,
}

impl SubmitRequest {
    /// Parse and validate a raw text frame. The returned message is safe to
    /// echo back to the client in an error frame.
    pub fn from_frame(raw: &str) -> Result<Self, String> {
        let frame: SubmitFrame =
            serde_json::from_str(raw).map_err(|e| format!("Invalid data format: {}", e))?;

        let content = B64
            .decode(frame.content.as_bytes())
            .map_err(|_| "Invalid data format: content is not valid base64".to_string())?;

        if content.is_empty() {
            return Err("Invalid data format: content is empty".to_string());
        }

        Ok(Self {
            chat_id: frame.chat_id,
            content,
        })
    }
}

/// A persisted message pushed to every online participant of its chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryFrame {
    pub id: i64,
    pub chat_id: i64,
    pub sender_id: Option<i64>,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    pub status: MessageStatus,
}

impl From<&Message> for DeliveryFrame {
    fn from(msg: &Message) -> Self {
        Self {
            id: msg.id,
            chat_id: msg.chat_id,
            sender_id: msg.sender_id,
            content: B64.encode(&msg.content),
            sent_at: msg.sent_at,
            status: msg.status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub error: String,
}

/// Everything the server writes to a session as a text frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Delivery(DeliveryFrame),
    Error(ErrorFrame),
}

impl ServerFrame {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorFrame {
            error: message.into(),
        })
    }

    pub fn to_json(&self) -> String {
        // Both variants are plain structs of strings and integers.
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"error":"internal error"}"#.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_frame_decodes_base64_content() {
        let req = SubmitRequest::from_frame(r#"{"chat_id": 10, "content": "aGk="}"#).unwrap();
        assert_eq!(req.chat_id, 10);
        assert_eq!(req.content, b"hi");
    }

    #[test]
    fn submit_frame_rejects_garbage() {
        assert!(SubmitRequest::from_frame("not json").is_err());
        assert!(SubmitRequest::from_frame(r#"{"chat_id": "x", "content": "aGk="}"#).is_err());
        assert!(SubmitRequest::from_frame(r#"{"chat_id": 1}"#).is_err());
        assert!(SubmitRequest::from_frame(r#"{"chat_id": 1, "content": "%%%"}"#).is_err());
        assert!(SubmitRequest::from_frame(r#"{"chat_id": 1, "content": ""}"#).is_err());
        assert!(
            SubmitRequest::from_frame(r#"{"chat_id": 1, "content": "aGk=", "extra": true}"#)
                .is_err()
        );
    }

    #[test]
    fn delivery_frame_shape() {
        let msg = Message {
            id: 7,
            chat_id: 10,
            sender_id: Some(1),
            content: b"hi".to_vec(),
            sent_at: "2026-01-02T03:04:05.000006Z".parse().unwrap(),
            status: MessageStatus::Sent,
            is_pinned: false,
        };
        let json = ServerFrame::Delivery(DeliveryFrame::from(&msg)).to_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["chat_id"], 10);
        assert_eq!(value["sender_id"], 1);
        assert_eq!(value["content"], "aGk=");
        assert_eq!(value["status"], "sent");
        assert!(value["sent_at"].as_str().unwrap().starts_with("2026-01-02T03:04:05"));
    }

    #[test]
    fn error_frame_shape() {
        let json = ServerFrame::error("nope").to_json();
        assert_eq!(json, r#"{"error":"nope"}"#);
    }
}
