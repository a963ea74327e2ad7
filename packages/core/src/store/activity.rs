//! Per-task activity log and @mention fan-out.
//!
//! Activity entries are fetched on demand when a task is opened and merged
//! into the shared map, never replaced wholesale; entries for other tasks
//! stay cached for the session.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Value};
use tracing::warn;

use super::tasks::task_link;
use super::{Snapshot, StateChange, Store, StoreError};
use crate::backend::{Collection, SelectFilter};
use crate::models::wire;
use crate::models::{ActivityEntry, ActivityKind, EntityId, NotificationKind, UserProfile};

/// `@name` handles in comment text. Compiled once; a failed compile would be
/// a programming error, but it disables mention scanning instead of
/// panicking mid-comment.
fn mention_regex() -> Option<&'static Regex> {
    static MENTION: OnceLock<Option<Regex>> = OnceLock::new();
    MENTION.get_or_init(|| Regex::new(r"@(\w+)").ok()).as_ref()
}

impl Store {
    /// Append an entry to a task's activity log. Returns the entry id.
    ///
    /// Comment entries are scanned for mentions after the remote write
    /// confirms, so a failed comment never pings anyone.
    pub async fn log_activity(
        &self,
        task_id: &str,
        kind: ActivityKind,
        content: impl Into<String>,
        metadata: Value,
    ) -> Result<EntityId, StoreError> {
        let user = self.require_user().await?;
        let entry = ActivityEntry::new(task_id, &user.id, kind, content, metadata);
        let entry_id = entry.id.clone();
        let text = entry.content.clone();
        let row = wire::activity_row(&entry);

        {
            let mut state = self.state.write().await;
            state.activities.insert(entry_id.clone(), entry);
        }
        self.emit(StateChange::Activities);

        self.commit(
            Snapshot::activity(&entry_id, None),
            self.backend.insert(Collection::ActivityLogs, row),
        )
        .await?;

        if kind == ActivityKind::Comment {
            self.fan_out_mentions(task_id, &text, &user).await;
        }
        Ok(entry_id)
    }

    /// Post a comment on a task.
    pub async fn add_comment(&self, task_id: &str, text: &str) -> Result<EntityId, StoreError> {
        if text.trim().is_empty() {
            return Err(StoreError::validation("comment cannot be empty"));
        }
        self.log_activity(task_id, ActivityKind::Comment, text, Value::Null)
            .await
    }

    /// Edit an entry's content (comment editing).
    pub async fn update_activity(&self, activity_id: &str, content: &str) -> Result<(), StoreError> {
        let prior = {
            let mut state = self.state.write().await;
            let Some(entry) = state.activities.get_mut(activity_id) else {
                return Err(StoreError::not_found("activity", activity_id));
            };
            let prior = entry.clone();
            entry.content = content.to_owned();
            prior
        };
        self.emit(StateChange::Activities);

        self.commit(
            Snapshot::activity(activity_id, Some(prior)),
            self.backend.update(
                Collection::ActivityLogs,
                activity_id,
                json!({ "content": content }),
            ),
        )
        .await?;
        Ok(())
    }

    /// Fetch a task's activity trail, oldest first, and merge it in.
    pub async fn fetch_activities(&self, task_id: &str) -> Result<Vec<ActivityEntry>, StoreError> {
        let rows = self
            .backend
            .select(
                Collection::ActivityLogs,
                SelectFilter::new().with_task(task_id).oldest_first(),
            )
            .await?;
        let entries: Vec<ActivityEntry> = rows
            .into_iter()
            .filter_map(|row| match wire::hydrate_activity(row) {
                Ok(entry) => Some(entry),
                Err(error) => {
                    warn!(%error, "dropping malformed activity record");
                    None
                }
            })
            .collect();

        {
            let mut state = self.state.write().await;
            for entry in &entries {
                state.activities.insert(entry.id.clone(), entry.clone());
            }
        }
        self.emit(StateChange::Activities);
        Ok(entries)
    }

    /// Best-effort [`Store::log_activity`] for secondary effects of task
    /// mutations: a failed audit line is logged, never surfaced.
    pub(crate) async fn record_activity(
        &self,
        task_id: &str,
        kind: ActivityKind,
        content: impl Into<String>,
        metadata: Value,
    ) {
        if let Err(error) = self.log_activity(task_id, kind, content, metadata).await {
            warn!(%error, task_id, "activity log write failed");
        }
    }

    /// Notify every member (other than the actor) whose name matches an
    /// `@handle` in `text`. Matching is case-insensitive substring against
    /// the roster, so `@dana` reaches "Dana Hall".
    async fn fan_out_mentions(&self, task_id: &str, text: &str, actor: &UserProfile) {
        let Some(regex) = mention_regex() else {
            return;
        };
        let mut handles: BTreeSet<String> = BTreeSet::new();
        for captures in regex.captures_iter(text) {
            if let Some(handle) = captures.get(1) {
                handles.insert(handle.as_str().to_lowercase());
            }
        }
        if handles.is_empty() {
            return;
        }

        let recipients: BTreeSet<EntityId> = {
            let state = self.state.read().await;
            state
                .team
                .values()
                .filter(|member| member.id != actor.id)
                .filter(|member| {
                    let name = member.name.to_lowercase();
                    handles.iter().any(|handle| name.contains(handle.as_str()))
                })
                .map(|member| member.id.clone())
                .collect()
        };
        for recipient in recipients {
            self.notify(
                &recipient,
                NotificationKind::Mention,
                "You were mentioned",
                format!("{} mentioned you in a comment", actor.name),
                Some(task_link(task_id)),
            )
            .await;
        }
    }
}
