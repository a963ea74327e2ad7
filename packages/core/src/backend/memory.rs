//! In-process [`Backend`] implementation.
//!
//! # Architecture
//!
//! `MemoryBackend` keeps every collection in a `HashMap` behind one
//! `std::sync::Mutex`. All operations lock, mutate, and release before any
//! await point, then broadcast the resulting [`ChangeEvent`]s, so two stores
//! sharing a backend observe each other exactly as they would over a
//! realtime connection. The named procedures run as compare-and-swap
//! sections under the same lock, which is what makes completion and claim
//! races decidable in tests.
//!
//! Failure injection (`fail_next`, `fail_next_procedure`) rejects the next
//! matching operation before it touches state, for exercising rollback
//! paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use uuid::Uuid;

use async_trait::async_trait;

use super::error::BackendError;
use super::events::{
    ChangeEvent, Collection, PresenceEvent, PresencePayload, DEFAULT_EVENT_CAPACITY,
};
use super::{Backend, ClaimOutcome, InviteRequest, SelectFilter, SortOrder};
use crate::models::wire::{iso_string, WireStamp};
use crate::models::{EntityId, Role};

type Table = BTreeMap<EntityId, Value>;
type Tables = HashMap<Collection, Table>;

/// Write shape used when planning a failure with [`MemoryBackend::fail_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Insert,
    Update,
    Delete,
    Upsert,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PlannedFailure {
    Write { collection: Collection, op: WriteOp },
    Procedure { name: String },
}

pub struct MemoryBackend {
    tables: Mutex<Tables>,
    channels: HashMap<Collection, broadcast::Sender<ChangeEvent>>,
    presence: Mutex<Vec<PresencePayload>>,
    presence_tx: broadcast::Sender<PresenceEvent>,
    profile: Mutex<Option<Value>>,
    planned_failures: Mutex<Vec<PlannedFailure>>,
}

/// Poison recovery: a panicked test thread leaves the data usable.
fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Storage key for a record: `id`, falling back to `user_id` for per-user
/// singleton collections.
fn record_key(record: &Value) -> Option<EntityId> {
    record
        .get("id")
        .and_then(Value::as_str)
        .or_else(|| record.get("user_id").and_then(Value::as_str))
        .map(str::to_owned)
}

/// Merge `patch`'s top-level fields into `row`.
fn merge_into(row: &mut Value, patch: &Value) {
    if let (Some(target), Some(fields)) = (row.as_object_mut(), patch.as_object()) {
        for (key, value) in fields {
            target.insert(key.clone(), value.clone());
        }
    }
}

/// Decode a timestamp column in any accepted wire encoding.
fn stamp_field(record: &Value, field: &str) -> Option<i64> {
    let value = record.get(field)?.clone();
    serde_json::from_value::<WireStamp>(value)
        .ok()
        .and_then(WireStamp::into_millis)
}

fn field_is(record: &Value, field: &str, expected: &str) -> bool {
    record.get(field).and_then(Value::as_str) == Some(expected)
}

fn matches_filter(record: &Value, filter: &SelectFilter) -> bool {
    if let Some(id) = &filter.id {
        if !field_is(record, "id", id) {
            return false;
        }
    }
    if let Some(owner) = &filter.owner {
        if !field_is(record, "user_id", owner) {
            return false;
        }
    }
    if let Some(recipient) = &filter.recipient {
        if !field_is(record, "user_id", recipient) {
            return false;
        }
    }
    if let Some(token) = &filter.token {
        if !field_is(record, "token", token) {
            return false;
        }
    }
    if let Some(project) = &filter.project {
        if !field_is(record, "project_id", project) {
            return false;
        }
    }
    if let Some(task) = &filter.task {
        if !field_is(record, "task_id", task) {
            return false;
        }
    }
    if filter.active_only && !field_is(record, "status", "active") {
        return false;
    }
    if let Some(cutoff) = filter.open_or_touched_since {
        let closed = field_is(record, "status", "done");
        let touched = stamp_field(record, "updated_at").map_or(false, |ms| ms >= cutoff);
        if closed && !touched {
            return false;
        }
    }
    if let Some(cutoff) = filter.unprocessed_or_created_since {
        let processed = record
            .get("processed")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let recent = stamp_field(record, "created_at").map_or(false, |ms| ms >= cutoff);
        if processed && !recent {
            return false;
        }
    }
    true
}

impl MemoryBackend {
    pub fn new() -> Self {
        let mut channels = HashMap::new();
        for collection in Collection::ALL {
            let (tx, _) = broadcast::channel(DEFAULT_EVENT_CAPACITY);
            channels.insert(collection, tx);
        }
        let (presence_tx, _) = broadcast::channel(DEFAULT_EVENT_CAPACITY);
        MemoryBackend {
            tables: Mutex::new(HashMap::new()),
            channels,
            presence: Mutex::new(Vec::new()),
            presence_tx,
            profile: Mutex::new(None),
            planned_failures: Mutex::new(Vec::new()),
        }
    }

    /// Reject the next write of this shape with a network error.
    pub fn fail_next(&self, collection: Collection, op: WriteOp) {
        relock(&self.planned_failures).push(PlannedFailure::Write { collection, op });
    }

    /// Reject the next invocation of the named procedure.
    pub fn fail_next_procedure(&self, procedure: impl Into<String>) {
        relock(&self.planned_failures).push(PlannedFailure::Procedure {
            name: procedure.into(),
        });
    }

    /// Set the authenticated profile and load its row into `profiles`.
    ///
    /// Fixture path: does not broadcast.
    pub fn sign_in(&self, profile_row: Value) {
        if let Some(key) = record_key(&profile_row) {
            relock(&self.tables)
                .entry(Collection::Profiles)
                .or_default()
                .insert(key, profile_row.clone());
        }
        *relock(&self.profile) = Some(profile_row);
    }

    /// Load rows directly, without events or failure injection.
    pub fn seed(&self, collection: Collection, rows: Vec<Value>) {
        let mut tables = relock(&self.tables);
        let table = tables.entry(collection).or_default();
        for row in rows {
            if let Some(key) = record_key(&row) {
                table.insert(key, row);
            }
        }
    }

    /// Current stored form of one record, for assertions.
    pub fn row(&self, collection: Collection, id: &str) -> Option<Value> {
        relock(&self.tables)
            .get(&collection)
            .and_then(|table| table.get(id))
            .cloned()
    }

    /// All rows of one collection, in key order.
    pub fn rows(&self, collection: Collection) -> Vec<Value> {
        relock(&self.tables)
            .get(&collection)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop every presence entry for `user_id` and announce the departure.
    pub fn leave_presence(&self, user_id: &str) {
        let mut departed = None;
        relock(&self.presence).retain(|entry| {
            if entry.user_id == user_id {
                departed = Some(entry.clone());
                false
            } else {
                true
            }
        });
        if let Some(payload) = departed {
            let _ = self.presence_tx.send(PresenceEvent::Leave(payload));
        }
    }

    /// Ask presence subscribers to re-read the roster.
    pub fn broadcast_presence_sync(&self) {
        let _ = self.presence_tx.send(PresenceEvent::Sync);
    }

    fn sender(&self, collection: Collection) -> &broadcast::Sender<ChangeEvent> {
        // `channels` is populated for every collection in `new`.
        &self.channels[&collection]
    }

    fn emit(&self, event: ChangeEvent) {
        // No receivers is fine; events are best effort.
        let _ = self.sender(event.collection).send(event);
    }

    fn check_write_failure(&self, collection: Collection, op: WriteOp) -> Result<(), BackendError> {
        let mut planned = relock(&self.planned_failures);
        let position = planned.iter().position(|failure| {
            matches!(failure, PlannedFailure::Write { collection: c, op: o }
                if *c == collection && *o == op)
        });
        if let Some(position) = position {
            planned.remove(position);
            return Err(BackendError::network(format!(
                "injected failure: {} {:?}",
                collection, op
            )));
        }
        Ok(())
    }

    fn check_procedure_failure(&self, procedure: &str) -> Result<(), BackendError> {
        let mut planned = relock(&self.planned_failures);
        let position = planned.iter().position(
            |failure| matches!(failure, PlannedFailure::Procedure { name } if name == procedure),
        );
        if let Some(position) = position {
            planned.remove(position);
            return Err(BackendError::rpc(procedure, "injected failure"));
        }
        Ok(())
    }

    fn open_invitation_exists(table: &Table, email: &str) -> bool {
        table.values().any(|row| {
            field_is(row, "email", email)
                && (field_is(row, "status", "pending")
                    || field_is(row, "status", "approval_needed"))
        })
    }

    fn invitation_row(
        email: &str,
        role: Role,
        status: &str,
        invited_by: &str,
        inviter_name: &str,
        reports_to: Option<&str>,
    ) -> Value {
        json!({
            "id": Uuid::new_v4().to_string(),
            "token": Uuid::new_v4().to_string(),
            "email": email,
            "role": role,
            "status": status,
            "invited_by": invited_by,
            "inviter_name": inviter_name,
            "reports_to": reports_to,
            "created_at": iso_string(Utc::now().timestamp_millis()),
        })
    }

    /// Identity and display name of the signed-in user, for stamping rows
    /// the server would attribute to `auth.uid()`.
    fn session_identity(&self) -> (String, String) {
        let profile = relock(&self.profile);
        let id = profile
            .as_ref()
            .and_then(|p| p.get("id"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let name = profile
            .as_ref()
            .and_then(|p| p.get("full_name"))
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_owned();
        (id, name)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        MemoryBackend::new()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn select(
        &self,
        collection: Collection,
        filter: SelectFilter,
    ) -> Result<Vec<Value>, BackendError> {
        let mut rows: Vec<Value> = {
            let tables = relock(&self.tables);
            tables
                .get(&collection)
                .map(|table| {
                    table
                        .values()
                        .filter(|row| matches_filter(row, &filter))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };
        if let Some(order) = filter.order {
            rows.sort_by_key(|row| stamp_field(row, "created_at").unwrap_or(0));
            if order == SortOrder::CreatedDescending {
                rows.reverse();
            }
        }
        if let Some(limit) = filter.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn insert(&self, collection: Collection, mut record: Value) -> Result<(), BackendError> {
        self.check_write_failure(collection, WriteOp::Insert)?;
        // `created_at` has a column default; rows that omit it (activity
        // and notification inserts) get stamped on write.
        if let Some(map) = record.as_object_mut() {
            if !map.contains_key("created_at") {
                map.insert(
                    "created_at".to_owned(),
                    Value::String(iso_string(Utc::now().timestamp_millis())),
                );
            }
        }
        let key = record_key(&record)
            .ok_or_else(|| BackendError::network("insert rejected: record has no key"))?;
        {
            let mut tables = relock(&self.tables);
            let table = tables.entry(collection).or_default();
            if table.contains_key(&key) {
                return Err(BackendError::unique_violation(format!(
                    "{}_pkey",
                    collection.as_str()
                )));
            }
            table.insert(key, record.clone());
        }
        self.emit(ChangeEvent::insert(collection, record));
        Ok(())
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Value,
    ) -> Result<(), BackendError> {
        self.check_write_failure(collection, WriteOp::Update)?;
        let merged = {
            let mut tables = relock(&self.tables);
            match tables.entry(collection).or_default().get_mut(id) {
                Some(row) => {
                    merge_into(row, &patch);
                    Some(row.clone())
                }
                // Zero rows matched; SQL reports success.
                None => None,
            }
        };
        if let Some(record) = merged {
            self.emit(ChangeEvent::update(collection, record));
        }
        Ok(())
    }

    async fn delete(&self, collection: Collection, ids: &[EntityId]) -> Result<(), BackendError> {
        self.check_write_failure(collection, WriteOp::Delete)?;
        let removed: Vec<Value> = {
            let mut tables = relock(&self.tables);
            let table = tables.entry(collection).or_default();
            ids.iter().filter_map(|id| table.remove(id)).collect()
        };
        for record in removed {
            self.emit(ChangeEvent::delete(collection, record));
        }
        Ok(())
    }

    async fn upsert(&self, collection: Collection, record: Value) -> Result<(), BackendError> {
        self.check_write_failure(collection, WriteOp::Upsert)?;
        let key = record_key(&record)
            .ok_or_else(|| BackendError::network("upsert rejected: record has no key"))?;
        let (stored, existed) = {
            let mut tables = relock(&self.tables);
            let table = tables.entry(collection).or_default();
            match table.get_mut(&key) {
                Some(row) => {
                    merge_into(row, &record);
                    (row.clone(), true)
                }
                None => {
                    table.insert(key, record.clone());
                    (record, false)
                }
            }
        };
        let event = if existed {
            ChangeEvent::update(collection, stored)
        } else {
            ChangeEvent::insert(collection, stored)
        };
        self.emit(event);
        Ok(())
    }

    fn subscribe(&self, collection: Collection) -> broadcast::Receiver<ChangeEvent> {
        self.sender(collection).subscribe()
    }

    async fn track_presence(&self, payload: PresencePayload) -> Result<(), BackendError> {
        // Each call models one connection heartbeat; the same user may hold
        // several entries at once.
        relock(&self.presence).push(payload.clone());
        let _ = self.presence_tx.send(PresenceEvent::Join(payload));
        Ok(())
    }

    async fn presence_state(&self) -> Result<Vec<PresencePayload>, BackendError> {
        Ok(relock(&self.presence).clone())
    }

    fn subscribe_presence(&self) -> broadcast::Receiver<PresenceEvent> {
        self.presence_tx.subscribe()
    }

    async fn authenticated_profile(&self) -> Result<Option<Value>, BackendError> {
        Ok(relock(&self.profile).clone())
    }

    async fn complete_task_atomic(&self, task_id: &str) -> Result<bool, BackendError> {
        self.check_procedure_failure("complete_task_atomic")?;
        let now = Utc::now().timestamp_millis();
        let completed = {
            let mut tables = relock(&self.tables);
            match tables.entry(Collection::Tasks).or_default().get_mut(task_id) {
                Some(row) if !field_is(row, "status", "done") => {
                    merge_into(
                        row,
                        &json!({
                            "status": "done",
                            "completed_at": now,
                            "updated_at": iso_string(now),
                        }),
                    );
                    Some(row.clone())
                }
                // Already done, or gone: the guard condition matched nothing.
                _ => None,
            }
        };
        match completed {
            Some(record) => {
                self.emit(ChangeEvent::update(Collection::Tasks, record));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn claim_task(
        &self,
        task_id: &str,
        user_id: &str,
    ) -> Result<ClaimOutcome, BackendError> {
        self.check_procedure_failure("claim_task")?;
        let now = iso_string(Utc::now().timestamp_millis());
        let claimed = {
            let mut tables = relock(&self.tables);
            match tables.entry(Collection::Tasks).or_default().get_mut(task_id) {
                Some(row) => {
                    let unassigned = row
                        .get("assignee_ids")
                        .and_then(Value::as_array)
                        .map_or(true, |assignees| assignees.is_empty());
                    if unassigned {
                        let mut patch = json!({
                            "assignee_ids": [user_id],
                            "accepted_at": now,
                            "updated_at": now,
                        });
                        if !field_is(row, "user_id", user_id) {
                            merge_into(&mut patch, &json!({"visibility": "team"}));
                        }
                        merge_into(row, &patch);
                        Some(row.clone())
                    } else {
                        None
                    }
                }
                None => None,
            }
        };
        match claimed {
            Some(record) => {
                self.emit(ChangeEvent::update(Collection::Tasks, record));
                Ok(ClaimOutcome { success: true })
            }
            None => Ok(ClaimOutcome { success: false }),
        }
    }

    async fn remove_task_assignee(
        &self,
        task_id: &str,
        user_id: &str,
    ) -> Result<(), BackendError> {
        self.check_procedure_failure("remove_task_assignee")?;
        let updated = {
            let mut tables = relock(&self.tables);
            match tables.entry(Collection::Tasks).or_default().get_mut(task_id) {
                Some(row) => {
                    let remaining: Vec<Value> = row
                        .get("assignee_ids")
                        .and_then(Value::as_array)
                        .map(|assignees| {
                            assignees
                                .iter()
                                .filter(|entry| entry.as_str() != Some(user_id))
                                .cloned()
                                .collect()
                        })
                        .unwrap_or_default();
                    merge_into(
                        row,
                        &json!({
                            "assignee_ids": remaining,
                            "updated_at": iso_string(Utc::now().timestamp_millis()),
                        }),
                    );
                    Some(row.clone())
                }
                None => None,
            }
        };
        if let Some(record) = updated {
            self.emit(ChangeEvent::update(Collection::Tasks, record));
        }
        Ok(())
    }

    async fn delete_user_by_admin(&self, user_id: &str) -> Result<(), BackendError> {
        self.check_procedure_failure("delete_user_by_admin")?;
        let removed = {
            let mut tables = relock(&self.tables);
            tables
                .entry(Collection::Profiles)
                .or_default()
                .remove(user_id)
        };
        if let Some(record) = removed {
            self.emit(ChangeEvent::delete(Collection::Profiles, record));
        }
        Ok(())
    }

    async fn invite_user_direct(&self, request: InviteRequest) -> Result<(), BackendError> {
        self.check_procedure_failure("invite_user_direct")?;
        let (inviter_id, inviter_name) = self.session_identity();
        let row = {
            let mut tables = relock(&self.tables);
            let table = tables.entry(Collection::TeamInvitations).or_default();
            if Self::open_invitation_exists(table, &request.email) {
                return Err(BackendError::unique_violation("team_invitations_email_key"));
            }
            let row = Self::invitation_row(
                &request.email,
                request.role,
                "pending",
                &inviter_id,
                &inviter_name,
                request.reports_to.as_deref(),
            );
            if let Some(key) = record_key(&row) {
                table.insert(key, row.clone());
            }
            row
        };
        self.emit(ChangeEvent::insert(Collection::TeamInvitations, row));
        Ok(())
    }

    async fn request_invitation(&self, email: &str) -> Result<(), BackendError> {
        self.check_procedure_failure("request_invitation")?;
        let (requester_id, requester_name) = self.session_identity();
        let row = {
            let mut tables = relock(&self.tables);
            let table = tables.entry(Collection::TeamInvitations).or_default();
            if Self::open_invitation_exists(table, email) {
                return Err(BackendError::unique_violation("team_invitations_email_key"));
            }
            let row = Self::invitation_row(
                email,
                Role::Member,
                "approval_needed",
                &requester_id,
                &requester_name,
                None,
            );
            if let Some(key) = record_key(&row) {
                table.insert(key, row.clone());
            }
            row
        };
        self.emit(ChangeEvent::insert(Collection::TeamInvitations, row));
        Ok(())
    }

    async fn approve_invitation(&self, invite_id: &str, role: Role) -> Result<(), BackendError> {
        self.check_procedure_failure("approve_invitation")?;
        let updated = {
            let mut tables = relock(&self.tables);
            match tables
                .entry(Collection::TeamInvitations)
                .or_default()
                .get_mut(invite_id)
            {
                Some(row) => {
                    merge_into(row, &json!({"status": "pending", "role": role}));
                    row.clone()
                }
                None => {
                    return Err(BackendError::not_found(
                        Collection::TeamInvitations,
                        invite_id,
                    ))
                }
            }
        };
        self.emit(ChangeEvent::update(Collection::TeamInvitations, updated));
        Ok(())
    }

    async fn delete_invitation(&self, invite_id: &str) -> Result<bool, BackendError> {
        self.check_procedure_failure("delete_invitation")?;
        let removed = {
            let mut tables = relock(&self.tables);
            tables
                .entry(Collection::TeamInvitations)
                .or_default()
                .remove(invite_id)
        };
        match removed {
            Some(record) => {
                self.emit(ChangeEvent::delete(Collection::TeamInvitations, record));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn decline_invitation(&self, invite_id: &str) -> Result<(), BackendError> {
        self.check_procedure_failure("decline_invitation")?;
        let removed = {
            let mut tables = relock(&self.tables);
            tables
                .entry(Collection::TeamInvitations)
                .or_default()
                .remove(invite_id)
        };
        if let Some(record) = removed {
            self.emit(ChangeEvent::delete(Collection::TeamInvitations, record));
        }
        Ok(())
    }

    async fn accept_team_invitation(
        &self,
        token: &str,
        user_id: &str,
    ) -> Result<(), BackendError> {
        self.check_procedure_failure("accept_team_invitation")?;
        let (invitation, profile, profile_existed) = {
            let mut tables = relock(&self.tables);
            let invitation = {
                let table = tables.entry(Collection::TeamInvitations).or_default();
                let open = table.values_mut().find(|row| {
                    field_is(row, "token", token)
                        && (field_is(row, "status", "pending")
                            || field_is(row, "status", "approval_needed"))
                });
                match open {
                    Some(row) => {
                        merge_into(row, &json!({"status": "accepted"}));
                        row.clone()
                    }
                    None => {
                        return Err(BackendError::rpc(
                            "accept_team_invitation",
                            "invalid or expired invitation token",
                        ))
                    }
                }
            };
            let membership = json!({
                "role": invitation.get("role").cloned().unwrap_or(json!("member")),
                "reports_to": invitation.get("reports_to").cloned().unwrap_or(Value::Null),
            });
            let profiles = tables.entry(Collection::Profiles).or_default();
            let (profile, existed) = match profiles.get_mut(user_id) {
                Some(row) => {
                    merge_into(row, &membership);
                    (row.clone(), true)
                }
                None => {
                    let mut row = json!({"id": user_id});
                    merge_into(&mut row, &membership);
                    profiles.insert(user_id.to_owned(), row.clone());
                    (row, false)
                }
            };
            (invitation, profile, existed)
        };
        self.emit(ChangeEvent::update(Collection::TeamInvitations, invitation));
        let profile_event = if profile_existed {
            ChangeEvent::update(Collection::Profiles, profile)
        } else {
            ChangeEvent::insert(Collection::Profiles, profile)
        };
        self.emit(profile_event);
        Ok(())
    }
}
