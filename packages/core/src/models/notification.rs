//! Notifications delivered to a single recipient.
//!
//! Created by whichever store action needs to inform another user; only the
//! recipient ever mutates one (mark read, delete). The `Rejection` kind is
//! excluded from mark-all-read so a returned review stays prominent until
//! individually acknowledged.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::EntityId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Mention,
    Assignment,
    StatusChange,
    /// Owner returned a review submission. Sticky in bulk mark-read.
    Rejection,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: EntityId,

    /// Recipient.
    pub user_id: EntityId,

    pub kind: NotificationKind,

    pub title: String,

    pub message: String,

    /// App-internal deep link (e.g. `/tasks?taskId=...`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,

    #[serde(default)]
    pub read: bool,

    pub created_at: i64,
}

impl Notification {
    pub fn new(
        user_id: impl Into<EntityId>,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
        link: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            kind,
            title: title.into(),
            message: message.into(),
            link,
            read: false,
            created_at: Utc::now().timestamp_millis(),
        }
    }
}
