//! Task operations: creation, patching, the status machine, completion,
//! claiming, assignment, and bulk clearing.
//!
//! Completion is the one transition the client never decides alone: the
//! optimistic mark-done is confirmed by the backend's atomic completion
//! procedure, and losing that race is a benign outcome, not an error.
//! Non-owners without authority over the owner cannot complete at all;
//! their request lands in `Review`.

use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{relock, Snapshot, StateChange, Store, StoreError};
use crate::backend::Collection;
use crate::models::wire;
use crate::models::{
    ActivityKind, EntityId, NotificationKind, Source, Task, TaskDraft, TaskPatch, TaskStatus,
};
use crate::rules::{can_manage_role, derive_visibility, next_due_date, should_recur};

/// App-internal deep link carried on task-related notifications.
pub(crate) fn task_link(task_id: &str) -> String {
    format!("/tasks?taskId={task_id}")
}

impl Store {
    /// Create a task from a draft. Returns the new task's id.
    pub async fn add_task(&self, draft: TaskDraft) -> Result<EntityId, StoreError> {
        if draft.title.trim().is_empty() {
            return Err(StoreError::validation("task title cannot be empty"));
        }
        if draft.status == Some(TaskStatus::Done) {
            return Err(StoreError::validation(
                "tasks cannot be created completed; use the completion path",
            ));
        }
        let user = self.require_user().await?;

        let visibility = derive_visibility(&user.id, &draft.assignee_ids, draft.visibility);
        let task = Task::from_draft(draft, user.id.clone(), visibility);
        let task_id = task.id.clone();
        let row = wire::task_row(&task);

        {
            let mut state = self.state.write().await;
            state.tasks.insert(task_id.clone(), task.clone());
        }
        self.emit(StateChange::Tasks);

        self.commit(
            Snapshot::task(&task_id, None),
            self.backend.insert(Collection::Tasks, row),
        )
        .await?;

        self.record_activity(
            &task_id,
            ActivityKind::Creation,
            format!("Created task \"{}\"", task.title),
            Value::Null,
        )
        .await;
        for assignee in task.assignee_ids.iter().filter(|id| **id != user.id) {
            self.notify(
                assignee,
                NotificationKind::Assignment,
                "New Task Assigned",
                format!("You were assigned to \"{}\"", task.title),
                Some(task_link(&task_id)),
            )
            .await;
        }

        Ok(task_id)
    }

    /// Apply a partial update. A patch requesting `Done` is routed through
    /// the status machine instead; everything else is optimistic with
    /// rollback. Newly added assignees (and only they) are notified.
    pub async fn update_task(&self, task_id: &str, patch: TaskPatch) -> Result<(), StoreError> {
        if patch.status == Some(TaskStatus::Done) {
            return self.update_status(task_id, TaskStatus::Done).await;
        }
        if patch.is_empty() {
            return Ok(());
        }
        let user = self.require_user().await?;
        let (prior, updated) = self.apply_task_patch(task_id, &patch).await?;

        let added: Vec<EntityId> = updated
            .assignee_ids
            .difference(&prior.assignee_ids)
            .filter(|id| **id != user.id)
            .cloned()
            .collect();
        for assignee in added {
            self.notify(
                &assignee,
                NotificationKind::Assignment,
                "New Task Assigned",
                format!("You were assigned to \"{}\"", updated.title),
                Some(task_link(task_id)),
            )
            .await;
        }
        Ok(())
    }

    /// Shared optimistic core of [`update_task`] and [`assign_task`]:
    /// validate, apply, re-derive visibility, commit with rollback. Returns
    /// the pre- and post-images for the caller's side effects.
    async fn apply_task_patch(
        &self,
        task_id: &str,
        patch: &TaskPatch,
    ) -> Result<(Task, Task), StoreError> {
        let (prior, updated) = {
            let mut state = self.state.write().await;
            let Some(task) = state.tasks.get_mut(task_id) else {
                return Err(StoreError::not_found("task", task_id));
            };
            let prior = task.clone();
            task.apply_patch(patch);
            // The visibility invariant holds through every edit.
            task.visibility =
                derive_visibility(&task.owner_id, &task.assignee_ids, Some(task.visibility));
            (prior, task.clone())
        };
        self.emit(StateChange::Tasks);

        self.commit(
            Snapshot::task(task_id, Some(prior.clone())),
            self.backend
                .update(Collection::Tasks, task_id, wire::task_row(&updated)),
        )
        .await?;
        Ok((prior, updated))
    }

    /// Drive the status machine.
    ///
    /// `Done` requested by the owner (or a role that manages the owner's)
    /// goes through the atomic completion path; requested by anyone else it
    /// is downgraded to `Review`. Leaving `Done` always clears
    /// `completed_at`.
    pub async fn update_status(
        &self,
        task_id: &str,
        requested: TaskStatus,
    ) -> Result<(), StoreError> {
        let user = self.require_user().await?;
        let (prior, owner_role) = {
            let state = self.state.read().await;
            let Some(task) = state.tasks.get(task_id) else {
                return Err(StoreError::not_found("task", task_id));
            };
            let owner_role = state
                .team
                .get(&task.owner_id)
                .map(|m| m.role)
                .unwrap_or_default();
            (task.clone(), owner_role)
        };

        let actor_is_owner = prior.owner_id == user.id;
        let may_complete = actor_is_owner || can_manage_role(user.role, owner_role);

        if requested == TaskStatus::Done && may_complete {
            return self.complete_task(&prior).await;
        }

        // Completion without authority lands in review instead.
        let downgraded = requested == TaskStatus::Done;
        let effective = if downgraded {
            TaskStatus::Review
        } else {
            requested
        };
        if effective == prior.status {
            return Ok(());
        }

        let updated = {
            let mut state = self.state.write().await;
            let Some(task) = state.tasks.get_mut(task_id) else {
                return Err(StoreError::not_found("task", task_id));
            };
            task.status = effective;
            // Both edges of the completion invariant: leaving Done clears
            // the stamp (entering Done is handled by `complete_task`).
            task.completed_at = None;
            task.updated_at = chrono::Utc::now().timestamp_millis();
            task.clone()
        };
        self.emit(StateChange::Tasks);

        self.commit(
            Snapshot::task(task_id, Some(prior.clone())),
            self.backend
                .update(Collection::Tasks, task_id, wire::task_row(&updated)),
        )
        .await?;

        let transition = json!({"old": prior.status.as_str(), "new": effective.as_str()});
        if downgraded {
            self.record_activity(
                task_id,
                ActivityKind::ReviewRequest,
                "Submitted for review",
                transition,
            )
            .await;
        } else {
            self.record_activity(
                task_id,
                ActivityKind::StatusChange,
                format!("Changed status to {}", effective.display()),
                transition,
            )
            .await;
        }

        if effective == TaskStatus::Review && !actor_is_owner {
            self.notify(
                &updated.owner_id,
                NotificationKind::StatusChange,
                "Task Ready for Review",
                format!("\"{}\" is ready for your approval.", updated.title),
                Some(task_link(task_id)),
            )
            .await;
        }

        if prior.status == TaskStatus::Review
            && matches!(effective, TaskStatus::InProgress | TaskStatus::Todo)
        {
            for assignee in updated.assignee_ids.iter().filter(|id| **id != user.id) {
                self.notify(
                    assignee,
                    NotificationKind::Rejection,
                    "Task Returned for Revision",
                    format!("\"{}\" was returned by the owner.", updated.title),
                    Some(task_link(task_id)),
                )
                .await;
            }
        }

        Ok(())
    }

    /// Atomic completion: optimistic mark-done confirmed by the backend's
    /// completion procedure. A `false` outcome means another session got
    /// there first; the optimistic state already matches, so it stands.
    async fn complete_task(&self, prior: &Task) -> Result<(), StoreError> {
        if prior.status.is_done() {
            return Ok(());
        }
        let task_id = prior.id.clone();
        let now = chrono::Utc::now().timestamp_millis();
        {
            let mut state = self.state.write().await;
            if let Some(task) = state.tasks.get_mut(&task_id) {
                task.status = TaskStatus::Done;
                task.completed_at = Some(now);
                task.updated_at = now;
            }
        }
        self.emit(StateChange::Tasks);

        let transitioned = self
            .commit(
                Snapshot::task(&task_id, Some(prior.clone())),
                self.backend.complete_task_atomic(&task_id),
            )
            .await?;
        if !transitioned {
            debug!(%task_id, "completion already performed by another session");
            return Ok(());
        }

        self.record_activity(
            &task_id,
            ActivityKind::StatusChange,
            format!("Changed status to {}", TaskStatus::Done.display()),
            json!({"old": prior.status.as_str(), "new": TaskStatus::Done.as_str()}),
        )
        .await;

        let completed = {
            let state = self.state.read().await;
            state.tasks.get(&task_id).cloned()
        };
        if let Some(completed) = completed {
            if should_recur(&completed) {
                if let Err(error) = self.spawn_successor(&completed, now).await {
                    // The completion stands; only the successor is lost.
                    warn!(%task_id, %error, "recurrence successor creation failed");
                }
            }
        }
        Ok(())
    }

    /// Create the next occurrence of a recurring task that was just
    /// completed at `completed_at`.
    async fn spawn_successor(&self, completed: &Task, completed_at: i64) -> Result<(), StoreError> {
        let Some(rule) = &completed.recurrence else {
            return Ok(());
        };
        let next_due = next_due_date(rule, completed.due_date, completed_at);

        let mut draft = TaskDraft::new(completed.title.clone())
            .with_status(TaskStatus::Todo)
            .with_due_date(next_due)
            .with_source(Source::System);
        draft.description = completed.description.clone();
        draft.priority = Some(completed.priority);
        draft.assignee_ids = completed.assignee_ids.clone();
        draft.visibility = Some(completed.visibility);
        draft.project_id = completed.project_id.clone();
        draft.tags = completed.tags.clone();
        draft.recurrence = completed.recurrence.clone();
        draft.original_task_id = Some(
            completed
                .original_task_id
                .clone()
                .unwrap_or_else(|| completed.id.clone()),
        );
        draft.estimated_minutes = completed.estimated_minutes;

        let successor_id = self.add_task(draft).await?;
        debug!(completed = %completed.id, successor = %successor_id, "recurrence successor created");
        Ok(())
    }

    /// Quick-complete toggle: done ⇄ not-done. Concurrent toggles of the
    /// same task are dropped while one is in flight.
    pub async fn toggle_task(&self, task_id: &str) -> Result<(), StoreError> {
        {
            let mut in_flight = relock(&self.toggles_in_flight);
            if !in_flight.insert(task_id.to_owned()) {
                warn!(%task_id, "toggle already in flight; ignoring");
                return Ok(());
            }
        }
        let result = self.toggle_inner(task_id).await;
        relock(&self.toggles_in_flight).remove(task_id);
        result
    }

    async fn toggle_inner(&self, task_id: &str) -> Result<(), StoreError> {
        let status = {
            let state = self.state.read().await;
            match state.tasks.get(task_id) {
                Some(task) => task.status,
                None => return Err(StoreError::not_found("task", task_id)),
            }
        };
        let target = if status.is_done() {
            TaskStatus::Todo
        } else {
            TaskStatus::Done
        };
        self.update_status(task_id, target).await
    }

    /// Replace the assignee set, with an `assignment` activity and a
    /// notification to each newly assigned user.
    pub async fn assign_task(
        &self,
        task_id: &str,
        assignee_ids: impl IntoIterator<Item = EntityId>,
    ) -> Result<(), StoreError> {
        let user = self.require_user().await?;
        let patch = TaskPatch {
            assignee_ids: Some(assignee_ids.into_iter().collect()),
            ..TaskPatch::default()
        };
        let (prior, updated) = self.apply_task_patch(task_id, &patch).await?;

        let added: Vec<EntityId> = updated
            .assignee_ids
            .difference(&prior.assignee_ids)
            .cloned()
            .collect();
        self.record_activity(
            task_id,
            ActivityKind::Assignment,
            "Updated assignees",
            json!({"recipientIds": added}),
        )
        .await;
        for assignee in added.iter().filter(|id| **id != user.id) {
            self.notify(
                assignee,
                NotificationKind::Assignment,
                "Task Assigned",
                format!("You were assigned to \"{}\"", updated.title),
                Some(task_link(task_id)),
            )
            .await;
        }
        Ok(())
    }

    /// First-claim an unassigned task. Not optimistic: the backend decides
    /// the winner, and only a win touches local state. Losing returns
    /// `Ok(false)`.
    pub async fn claim_task(&self, task_id: &str) -> Result<bool, StoreError> {
        let user = self.require_user().await?;
        let outcome = self.backend.claim_task(task_id, &user.id).await?;
        if !outcome.success {
            debug!(%task_id, "task already claimed");
            return Ok(false);
        }

        match self
            .backend
            .select(
                Collection::Tasks,
                crate::backend::SelectFilter::new().with_id(task_id),
            )
            .await
        {
            Ok(rows) => {
                if let Some(row) = rows.into_iter().next() {
                    match wire::hydrate_task(row) {
                        Ok(task) => {
                            let mut state = self.state.write().await;
                            state.tasks.insert(task.id.clone(), task);
                            drop(state);
                            self.emit(StateChange::Tasks);
                        }
                        Err(error) => warn!(%task_id, %error, "claimed task row was malformed"),
                    }
                }
            }
            Err(error) => warn!(%task_id, %error, "claimed task refetch failed"),
        }

        self.record_activity(task_id, ActivityKind::Assignment, "Claimed the task", Value::Null)
            .await;
        Ok(true)
    }

    /// Remove one assignee (typically the caller leaving the task).
    pub async fn unassign_task(&self, task_id: &str, member_id: &str) -> Result<(), StoreError> {
        let user = self.require_user().await?;
        let leaver_name = {
            let state = self.state.read().await;
            state
                .team
                .get(member_id)
                .map(|m| m.name.clone())
                .unwrap_or_else(|| "A teammate".to_owned())
        };

        let (prior, updated) = {
            let mut state = self.state.write().await;
            let Some(task) = state.tasks.get_mut(task_id) else {
                return Err(StoreError::not_found("task", task_id));
            };
            if !task.assignee_ids.contains(member_id) {
                return Ok(());
            }
            let prior = task.clone();
            task.assignee_ids.remove(member_id);
            task.visibility =
                derive_visibility(&task.owner_id, &task.assignee_ids, Some(task.visibility));
            task.updated_at = chrono::Utc::now().timestamp_millis();
            (prior, task.clone())
        };
        self.emit(StateChange::Tasks);

        self.commit(
            Snapshot::task(task_id, Some(prior)),
            self.backend.remove_task_assignee(task_id, member_id),
        )
        .await?;

        self.record_activity(
            task_id,
            ActivityKind::Assignment,
            format!("{leaver_name} left the task"),
            Value::Null,
        )
        .await;
        if updated.owner_id != member_id && updated.owner_id != user.id {
            self.notify(
                &updated.owner_id,
                NotificationKind::Assignment,
                "Assignee Left",
                format!("{leaver_name} removed themselves from \"{}\"", updated.title),
                Some(task_link(task_id)),
            )
            .await;
        }
        Ok(())
    }

    /// Delete a task. Deleting an absent task is a no-op.
    pub async fn delete_task(&self, task_id: &str) -> Result<(), StoreError> {
        let prior = {
            let mut state = self.state.write().await;
            state.tasks.remove(task_id)
        };
        let Some(prior) = prior else {
            return Ok(());
        };
        self.emit(StateChange::Tasks);

        self.commit(
            Snapshot::task(task_id, Some(prior)),
            self.backend.delete(Collection::Tasks, &[task_id.to_owned()]),
        )
        .await?;
        Ok(())
    }

    /// Remove every done task the caller owns or is assigned to. Returns
    /// how many were cleared. A failed batch delete restores exactly the
    /// removed subset.
    pub async fn clear_completed(&self) -> Result<usize, StoreError> {
        let user = self.require_user().await?;
        let (snapshot, ids) = {
            let mut state = self.state.write().await;
            let ids: Vec<EntityId> = state
                .tasks
                .values()
                .filter(|task| {
                    task.status.is_done()
                        && (task.owner_id == user.id || task.assignee_ids.contains(&user.id))
                })
                .map(|task| task.id.clone())
                .collect();
            let mut snapshot = Snapshot::new();
            for id in &ids {
                let prior = state.tasks.remove(id);
                snapshot = snapshot.with_task(id.clone(), prior);
            }
            (snapshot, ids)
        };
        if ids.is_empty() {
            return Ok(0);
        }
        self.emit(StateChange::Tasks);

        let count = ids.len();
        self.commit(snapshot, self.backend.delete(Collection::Tasks, &ids))
            .await?;
        Ok(count)
    }
}
