//! Inbox captures: quick text entries waiting to be triaged.
//!
//! Deletions are recorded in `recently_deleted_inbox` before the remote
//! call goes out, so a realtime echo that arrives out of order cannot
//! resurrect a capture the user already dismissed.

use tracing::warn;

use super::{relock, Snapshot, StateChange, Store, StoreError};
use crate::backend::Collection;
use crate::models::wire;
use crate::models::{EntityId, InboxItem, NoteDraft, Source, TaskDraft, TaskStatus};

impl Store {
    /// Capture a thought. Returns the new capture's id.
    pub async fn add_capture(&self, text: &str, source: Source) -> Result<EntityId, StoreError> {
        if text.trim().is_empty() {
            return Err(StoreError::validation("capture text cannot be empty"));
        }
        let user = self.require_user().await?;
        let item = InboxItem::new(text, source, user.id);
        let item_id = item.id.clone();
        let row = wire::capture_row(&item);

        {
            let mut state = self.state.write().await;
            state.inbox.insert(item_id.clone(), item);
        }
        self.emit(StateChange::Inbox);

        self.commit(
            Snapshot::capture(&item_id, None),
            self.backend.insert(Collection::InboxItems, row),
        )
        .await?;
        Ok(item_id)
    }

    /// Edit a capture's text.
    pub async fn update_capture(&self, capture_id: &str, text: &str) -> Result<(), StoreError> {
        if text.trim().is_empty() {
            return Err(StoreError::validation("capture text cannot be empty"));
        }
        let (prior, updated) = {
            let mut state = self.state.write().await;
            let Some(item) = state.inbox.get_mut(capture_id) else {
                return Err(StoreError::not_found("capture", capture_id));
            };
            let prior = item.clone();
            item.text = text.to_owned();
            (prior, item.clone())
        };
        self.emit(StateChange::Inbox);

        self.commit(
            Snapshot::capture(capture_id, Some(prior)),
            self.backend
                .update(Collection::InboxItems, capture_id, wire::capture_row(&updated)),
        )
        .await?;
        Ok(())
    }

    /// Delete one capture.
    pub async fn delete_capture(&self, capture_id: &str) -> Result<(), StoreError> {
        self.delete_captures(&[capture_id.to_owned()]).await
    }

    /// Delete a batch of captures. Absent ids are ignored.
    pub async fn delete_captures(&self, ids: &[EntityId]) -> Result<(), StoreError> {
        // Mark before the remote call: the realtime echo may interleave.
        {
            let mut deleted = relock(&self.recently_deleted_inbox);
            for id in ids {
                deleted.insert(id.clone());
            }
        }

        let snapshot = {
            let mut state = self.state.write().await;
            let mut snapshot = Snapshot::new();
            for id in ids {
                if let Some(prior) = state.inbox.remove(id) {
                    snapshot = snapshot.with_capture(id.clone(), Some(prior));
                }
            }
            snapshot
        };
        self.emit(StateChange::Inbox);

        let result = self
            .commit(snapshot, self.backend.delete(Collection::InboxItems, ids))
            .await;
        if result.is_err() {
            // Rolled back: the captures are live again, so stop suppressing
            // their realtime events.
            let mut deleted = relock(&self.recently_deleted_inbox);
            for id in ids {
                deleted.remove(id);
            }
        }
        result
    }

    /// Promote a capture to a task. A blank draft title falls back to the
    /// capture text. The capture is deleted once the task exists.
    pub async fn convert_to_task(
        &self,
        capture_id: &str,
        mut draft: TaskDraft,
    ) -> Result<EntityId, StoreError> {
        let capture = {
            let state = self.state.read().await;
            state
                .inbox
                .get(capture_id)
                .cloned()
                .ok_or_else(|| StoreError::not_found("capture", capture_id))?
        };
        if draft.title.trim().is_empty() {
            draft.title = capture.text.clone();
        }
        // A promoted capture is actionable now; only an explicit draft
        // status keeps it out of the todo column.
        if draft.status.is_none() {
            draft.status = Some(TaskStatus::Todo);
        }

        let task_id = self.add_task(draft).await?;
        if let Err(error) = self.delete_capture(capture_id).await {
            // The task exists; losing the cleanup only leaves a stale capture.
            warn!(%capture_id, %error, "capture cleanup after conversion failed");
        }
        Ok(task_id)
    }

    /// Promote a capture to a note. The body falls back to the capture text.
    pub async fn convert_to_note(
        &self,
        capture_id: &str,
        title: &str,
        body: Option<&str>,
    ) -> Result<EntityId, StoreError> {
        if title.trim().is_empty() {
            return Err(StoreError::validation("note title cannot be empty"));
        }
        let capture = {
            let state = self.state.read().await;
            state
                .inbox
                .get(capture_id)
                .cloned()
                .ok_or_else(|| StoreError::not_found("capture", capture_id))?
        };
        let body = body.unwrap_or(&capture.text);

        let note_id = self.add_note(NoteDraft::new(title, body)).await?;
        if let Err(error) = self.delete_capture(capture_id).await {
            warn!(%capture_id, %error, "capture cleanup after conversion failed");
        }
        Ok(note_id)
    }

    /// Captures pending triage, newest first.
    pub async fn pending_captures(&self) -> Vec<InboxItem> {
        let state = self.state.read().await;
        let mut items: Vec<InboxItem> = state
            .inbox
            .values()
            .filter(|item| !item.processed)
            .cloned()
            .collect();
        items.sort_by_key(|item| std::cmp::Reverse(item.created_at));
        items
    }
}
