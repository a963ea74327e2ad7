//! Change and presence events.
//!
//! # Event Flow
//!
//! Every successful backend write produces one [`ChangeEvent`] per affected
//! record, broadcast on the channel for that record's [`Collection`]. The
//! store's realtime tasks subscribe per collection and fold events into local
//! state, so a mutation made through one store instance surfaces in every
//! other store attached to the same backend.
//!
//! Presence is a separate channel: [`PresenceEvent`]s only signal that the
//! roster changed, and subscribers re-read the full roster rather than
//! applying deltas.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::EntityId;

/// Default capacity for broadcast channels carrying change events.
pub const DEFAULT_EVENT_CAPACITY: usize = 128;

/// The synchronized record collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Tasks,
    InboxItems,
    Projects,
    Notes,
    Habits,
    Profiles,
    Notifications,
    ActivityLogs,
    TeamInvitations,
    /// Per-user assistant context, keyed by user id rather than a row id.
    #[serde(rename = "user_ai_metadata")]
    AiMetadata,
}

impl Collection {
    /// Every collection, in a stable order.
    pub const ALL: [Collection; 10] = [
        Collection::Tasks,
        Collection::InboxItems,
        Collection::Projects,
        Collection::Notes,
        Collection::Habits,
        Collection::Profiles,
        Collection::Notifications,
        Collection::ActivityLogs,
        Collection::TeamInvitations,
        Collection::AiMetadata,
    ];

    /// The backend table name for this collection.
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Tasks => "tasks",
            Collection::InboxItems => "inbox_items",
            Collection::Projects => "projects",
            Collection::Notes => "notes",
            Collection::Habits => "habits",
            Collection::Profiles => "profiles",
            Collection::Notifications => "notifications",
            Collection::ActivityLogs => "activity_logs",
            Collection::TeamInvitations => "team_invitations",
            Collection::AiMetadata => "user_ai_metadata",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of write produced a [`ChangeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

impl ChangeOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOp::Insert => "INSERT",
            ChangeOp::Update => "UPDATE",
            ChangeOp::Delete => "DELETE",
        }
    }
}

/// A single record change, as broadcast by the backend.
///
/// `record` is the raw wire form: the full row after an insert or update, and
/// the old row (at minimum its `id`) after a delete. Consumers hydrate it
/// into a typed model and drop it with a warning if hydration fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub collection: Collection,
    pub op: ChangeOp,
    pub record: Value,
}

impl ChangeEvent {
    pub fn insert(collection: Collection, record: Value) -> Self {
        ChangeEvent {
            collection,
            op: ChangeOp::Insert,
            record,
        }
    }

    pub fn update(collection: Collection, record: Value) -> Self {
        ChangeEvent {
            collection,
            op: ChangeOp::Update,
            record,
        }
    }

    pub fn delete(collection: Collection, record: Value) -> Self {
        ChangeEvent {
            collection,
            op: ChangeOp::Delete,
            record,
        }
    }

    /// The affected record's id, when the payload carries one.
    pub fn record_id(&self) -> Option<&str> {
        self.record.get("id").and_then(Value::as_str)
    }
}

/// One tracked presence entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    pub user_id: EntityId,
    /// Millisecond timestamp of the last heartbeat.
    pub online_at: i64,
}

/// Presence roster change notification.
///
/// `Sync` carries no payload: subscribers re-read
/// [`super::Backend::presence_state`] instead of patching a local roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PresenceEvent {
    /// Full roster refresh is advised.
    Sync,
    Join(PresencePayload),
    Leave(PresencePayload),
}
