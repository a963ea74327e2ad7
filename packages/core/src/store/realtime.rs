//! Realtime merge: folds backend change events into local state.
//!
//! One loop per collection, spawned by `start_subscriptions`. Handlers are
//! last-writer-wins at the record level: insert and update both replace the
//! entry at that id, so an event that duplicates an optimistic write already
//! applied locally is idempotent. Handlers never return errors; a malformed
//! event is logged and dropped, and the loop lives on.
//!
//! Loops hold only a `Weak` reference to the store. They exit when the store
//! is dropped or the backend closes the channel.

use std::collections::HashMap;
use std::sync::Weak;

use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use super::{relock, AppState, StateChange, Store};
use crate::backend::{ChangeEvent, ChangeOp, Collection};
use crate::models::wire;
use crate::models::EntityId;

/// Collections with a live merge loop. AI metadata is absent on purpose:
/// it is only read at initialization and written by this client itself.
pub(crate) const SYNCED_COLLECTIONS: [Collection; 9] = [
    Collection::Tasks,
    Collection::InboxItems,
    Collection::Projects,
    Collection::Notes,
    Collection::Habits,
    Collection::Profiles,
    Collection::Notifications,
    Collection::ActivityLogs,
    Collection::TeamInvitations,
];

pub(crate) async fn run_merge_loop(
    store: Weak<Store>,
    collection: Collection,
    mut receiver: broadcast::Receiver<ChangeEvent>,
) {
    loop {
        match receiver.recv().await {
            Ok(event) => {
                let Some(store) = store.upgrade() else {
                    break;
                };
                store.apply_change(event).await;
            }
            Err(RecvError::Lagged(skipped)) => {
                // Dropped events mean the local copy may be stale until the
                // next event or resync; the loop itself keeps going.
                warn!(%collection, skipped, "realtime receiver lagged; events dropped");
            }
            Err(RecvError::Closed) => {
                debug!(%collection, "realtime channel closed");
                break;
            }
        }
    }
}

impl Store {
    pub(crate) async fn apply_change(&self, event: ChangeEvent) {
        let Some(id) = event.record_id().map(str::to_owned) else {
            warn!(collection = %event.collection, "dropping realtime event without record id");
            return;
        };
        match event.collection {
            Collection::Tasks => {
                self.merge_entity(&id, event, wire::hydrate_task, |s| &mut s.tasks, StateChange::Tasks)
                    .await
            }
            Collection::InboxItems => self.merge_capture(&id, event).await,
            Collection::Projects => {
                self.merge_entity(
                    &id,
                    event,
                    wire::hydrate_project,
                    |s| &mut s.projects,
                    StateChange::Projects,
                )
                .await
            }
            Collection::Notes => {
                self.merge_entity(&id, event, wire::hydrate_note, |s| &mut s.notes, StateChange::Notes)
                    .await
            }
            Collection::Habits => {
                self.merge_entity(
                    &id,
                    event,
                    wire::hydrate_habit,
                    |s| &mut s.habits,
                    StateChange::Habits,
                )
                .await
            }
            Collection::Profiles => self.merge_profile(&id, event).await,
            Collection::Notifications => self.merge_notification(&id, event).await,
            Collection::ActivityLogs => {
                self.merge_entity(
                    &id,
                    event,
                    wire::hydrate_activity,
                    |s| &mut s.activities,
                    StateChange::Activities,
                )
                .await
            }
            Collection::TeamInvitations => self.refresh_invitations().await,
            Collection::AiMetadata => {}
        }
    }

    /// Replace-by-id merge shared by the plain entity collections.
    async fn merge_entity<T>(
        &self,
        id: &str,
        event: ChangeEvent,
        hydrate: fn(Value) -> serde_json::Result<T>,
        slot: fn(&mut AppState) -> &mut HashMap<EntityId, T>,
        slice: StateChange,
    ) {
        match event.op {
            ChangeOp::Insert | ChangeOp::Update => {
                let entity = match hydrate(event.record) {
                    Ok(entity) => entity,
                    Err(error) => {
                        warn!(collection = %event.collection, %error, "dropping malformed realtime record");
                        return;
                    }
                };
                {
                    let mut state = self.state.write().await;
                    slot(&mut state).insert(id.to_owned(), entity);
                }
                debug!(collection = %event.collection, id, "merged realtime record");
                self.emit(slice);
            }
            ChangeOp::Delete => {
                let removed = {
                    let mut state = self.state.write().await;
                    slot(&mut state).remove(id).is_some()
                };
                if removed {
                    self.emit(slice);
                }
            }
        }
    }

    /// Captures are per-user; events for other owners are discarded, and
    /// events for captures this client just deleted are suppressed until
    /// the delete echo clears the suppression mark.
    async fn merge_capture(&self, id: &str, event: ChangeEvent) {
        match event.op {
            ChangeOp::Insert | ChangeOp::Update => {
                if relock(&self.recently_deleted_inbox).contains(id) {
                    debug!(id, "suppressing realtime event for a locally deleted capture");
                    return;
                }
                let capture = match wire::hydrate_capture(event.record) {
                    Ok(capture) => capture,
                    Err(error) => {
                        warn!(%error, "dropping malformed capture record");
                        return;
                    }
                };
                let Some(user_id) = self.current_user_id().await else {
                    return;
                };
                if capture.owner_id != user_id {
                    return;
                }
                {
                    let mut state = self.state.write().await;
                    state.inbox.insert(id.to_owned(), capture);
                }
                self.emit(StateChange::Inbox);
            }
            ChangeOp::Delete => {
                relock(&self.recently_deleted_inbox).remove(id);
                let removed = {
                    let mut state = self.state.write().await;
                    state.inbox.remove(id).is_some()
                };
                if removed {
                    self.emit(StateChange::Inbox);
                }
            }
        }
    }

    /// Profile events update the roster, and the session itself when they
    /// concern the signed-in user. The standing AI context lives outside the
    /// profile row, so an incoming row without one keeps the current value.
    async fn merge_profile(&self, id: &str, event: ChangeEvent) {
        match event.op {
            ChangeOp::Insert | ChangeOp::Update => {
                let member = match wire::hydrate_member(event.record.clone()) {
                    Ok(member) => member,
                    Err(error) => {
                        warn!(%error, "dropping malformed profile record");
                        return;
                    }
                };
                let incoming_profile = wire::hydrate_profile(event.record).ok();
                let session_changed = {
                    let mut state = self.state.write().await;
                    state.team.insert(id.to_owned(), member);
                    match incoming_profile {
                        Some(mut incoming)
                            if state.user.as_ref().is_some_and(|user| user.id == id) =>
                        {
                            if incoming.preferences.ai_context.is_none() {
                                incoming.preferences.ai_context = state
                                    .user
                                    .as_ref()
                                    .and_then(|user| user.preferences.ai_context.clone());
                            }
                            state.user = Some(incoming);
                            true
                        }
                        _ => false,
                    }
                };
                self.emit(StateChange::Team);
                if session_changed {
                    self.emit(StateChange::Session);
                }
            }
            ChangeOp::Delete => {
                let removed = {
                    let mut state = self.state.write().await;
                    state.team.remove(id).is_some()
                };
                if removed {
                    self.emit(StateChange::Team);
                }
            }
        }
    }

    /// The notification feed is shared; only events addressed to the
    /// signed-in user are merged.
    async fn merge_notification(&self, id: &str, event: ChangeEvent) {
        match event.op {
            ChangeOp::Insert | ChangeOp::Update => {
                let notification = match wire::hydrate_notification(event.record) {
                    Ok(notification) => notification,
                    Err(error) => {
                        warn!(%error, "dropping malformed notification record");
                        return;
                    }
                };
                let Some(user_id) = self.current_user_id().await else {
                    return;
                };
                if notification.user_id != user_id {
                    return;
                }
                {
                    let mut state = self.state.write().await;
                    state.notifications.insert(id.to_owned(), notification);
                }
                self.emit(StateChange::Notifications);
            }
            ChangeOp::Delete => {
                let removed = {
                    let mut state = self.state.write().await;
                    state.notifications.remove(id).is_some()
                };
                if removed {
                    self.emit(StateChange::Notifications);
                }
            }
        }
    }

    /// Invitation events carry partial rows in some backends, and the list
    /// is small; refetching it whole is the robust merge.
    async fn refresh_invitations(&self) {
        if let Err(error) = self.fetch_invitations().await {
            warn!(%error, "invitation refetch after realtime event failed");
        }
    }

    async fn current_user_id(&self) -> Option<EntityId> {
        self.state.read().await.user.as_ref().map(|user| user.id.clone())
    }
}
