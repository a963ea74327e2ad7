//! Backend abstraction.
//!
//! # Architecture
//!
//! The store talks to persistence through the [`Backend`] trait: plain CRUD
//! over raw JSON records, per-collection change subscriptions, a presence
//! roster, and a handful of named procedures for transitions that must be
//! decided server-side (atomic completion, first-claim, invitations).
//!
//! Records cross this boundary in wire form (`serde_json::Value`); hydration
//! into typed models and encoding back to rows live in [`crate::models::wire`]
//! so every backend sees the same shapes. [`MemoryBackend`] is the in-process
//! implementation used by tests and offline runs.

mod error;
mod events;
mod memory;

pub use error::BackendError;
pub use events::{
    ChangeEvent, ChangeOp, Collection, PresenceEvent, PresencePayload, DEFAULT_EVENT_CAPACITY,
};
pub use memory::{MemoryBackend, WriteOp};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::models::{EntityId, Role};

/// Sort order for [`SelectFilter`] results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    CreatedAscending,
    CreatedDescending,
}

/// Declarative row filter for [`Backend::select`].
///
/// Each field narrows the result set; unset fields match everything. The
/// special `open_or_touched_since` and `unprocessed_or_created_since`
/// predicates express the sync window: closed-out rows older than the cutoff
/// are not brought into memory.
#[derive(Debug, Clone, Default)]
pub struct SelectFilter {
    pub id: Option<EntityId>,
    /// Matches the record's `user_id` column (owner semantics).
    pub owner: Option<EntityId>,
    /// Matches the record's `user_id` column (recipient semantics).
    pub recipient: Option<EntityId>,
    pub token: Option<String>,
    pub project: Option<EntityId>,
    pub task: Option<EntityId>,
    /// Only rows whose `status` is `"active"`.
    pub active_only: bool,
    /// Rows whose `status` is not `"done"`, or whose `updated_at` is at or
    /// after the cutoff (milliseconds).
    pub open_or_touched_since: Option<i64>,
    /// Rows whose `processed` flag is false, or whose `created_at` is at or
    /// after the cutoff (milliseconds).
    pub unprocessed_or_created_since: Option<i64>,
    pub order: Option<SortOrder>,
    pub limit: Option<usize>,
}

impl SelectFilter {
    pub fn new() -> Self {
        SelectFilter::default()
    }

    pub fn with_id(mut self, id: impl Into<EntityId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_owner(mut self, owner: impl Into<EntityId>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_recipient(mut self, recipient: impl Into<EntityId>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_project(mut self, project: impl Into<EntityId>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_task(mut self, task: impl Into<EntityId>) -> Self {
        self.task = Some(task.into());
        self
    }

    pub fn active_only(mut self) -> Self {
        self.active_only = true;
        self
    }

    pub fn open_or_touched_since(mut self, cutoff_ms: i64) -> Self {
        self.open_or_touched_since = Some(cutoff_ms);
        self
    }

    pub fn unprocessed_or_created_since(mut self, cutoff_ms: i64) -> Self {
        self.unprocessed_or_created_since = Some(cutoff_ms);
        self
    }

    pub fn oldest_first(mut self) -> Self {
        self.order = Some(SortOrder::CreatedAscending);
        self
    }

    pub fn newest_first(mut self) -> Self {
        self.order = Some(SortOrder::CreatedDescending);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Server-side invitation request.
#[derive(Debug, Clone)]
pub struct InviteRequest {
    pub email: String,
    pub role: Role,
    pub reports_to: Option<EntityId>,
}

/// Result of a first-claim attempt on an unassigned task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimOutcome {
    /// True when this caller won the claim.
    pub success: bool,
}

/// Persistence and realtime interface the store is written against.
///
/// Implementations must be safe to share across tasks. Write methods resolve
/// only after the backend has durably accepted the change; the corresponding
/// [`ChangeEvent`] is broadcast before or at resolution so the caller's own
/// echo is observable.
#[async_trait]
pub trait Backend: Send + Sync {
    // --- Records ---

    async fn select(
        &self,
        collection: Collection,
        filter: SelectFilter,
    ) -> Result<Vec<Value>, BackendError>;

    async fn insert(&self, collection: Collection, record: Value) -> Result<(), BackendError>;

    /// Merge `patch`'s top-level fields into the identified record.
    ///
    /// Updating an absent record is a silent no-op, mirroring an SQL `UPDATE`
    /// that matches zero rows.
    async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Value,
    ) -> Result<(), BackendError>;

    /// Delete the identified records. Absent ids are ignored.
    async fn delete(&self, collection: Collection, ids: &[EntityId]) -> Result<(), BackendError>;

    /// Insert, or merge into the existing record with the same key.
    ///
    /// The key is the record's `id`, falling back to `user_id` for
    /// per-user singleton collections.
    async fn upsert(&self, collection: Collection, record: Value) -> Result<(), BackendError>;

    // --- Realtime ---

    /// Subscribe to change events for one collection.
    fn subscribe(&self, collection: Collection) -> broadcast::Receiver<ChangeEvent>;

    // --- Presence ---

    /// Record a presence heartbeat for the given user.
    async fn track_presence(&self, payload: PresencePayload) -> Result<(), BackendError>;

    /// The full current presence roster. May contain several entries per
    /// user when they hold multiple connections.
    async fn presence_state(&self) -> Result<Vec<PresencePayload>, BackendError>;

    fn subscribe_presence(&self) -> broadcast::Receiver<PresenceEvent>;

    // --- Session ---

    /// Wire-form profile row of the signed-in user, if any.
    async fn authenticated_profile(&self) -> Result<Option<Value>, BackendError>;

    // --- Procedures ---

    /// Atomically transition a task to done.
    ///
    /// Returns true iff this call performed the transition; false means the
    /// task was already done (or gone) and the caller lost the race.
    async fn complete_task_atomic(&self, task_id: &str) -> Result<bool, BackendError>;

    /// First-claim an unassigned task for `user_id`.
    async fn claim_task(&self, task_id: &str, user_id: &str)
        -> Result<ClaimOutcome, BackendError>;

    /// Remove `user_id` from a task's assignees server-side.
    async fn remove_task_assignee(&self, task_id: &str, user_id: &str)
        -> Result<(), BackendError>;

    /// Administrative removal of a team member's profile.
    async fn delete_user_by_admin(&self, user_id: &str) -> Result<(), BackendError>;

    /// Create an open invitation on behalf of a manager.
    async fn invite_user_direct(&self, request: InviteRequest) -> Result<(), BackendError>;

    /// File a self-service invitation that awaits owner approval.
    async fn request_invitation(&self, email: &str) -> Result<(), BackendError>;

    /// Approve a pending request, fixing the role it will grant.
    async fn approve_invitation(&self, invite_id: &str, role: Role) -> Result<(), BackendError>;

    /// Revoke an invitation. Returns false when nothing was deleted.
    async fn delete_invitation(&self, invite_id: &str) -> Result<bool, BackendError>;

    /// Decline a self-service invitation request.
    async fn decline_invitation(&self, invite_id: &str) -> Result<(), BackendError>;

    /// Redeem an invitation token for `user_id`, joining them to the team.
    async fn accept_team_invitation(&self, token: &str, user_id: &str)
        -> Result<(), BackendError>;
}
