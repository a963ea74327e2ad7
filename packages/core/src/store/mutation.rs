//! Optimistic mutation protocol: pre-image snapshots and targeted rollback.
//!
//! Every mutating store action follows the same five steps: validate,
//! capture a [`Snapshot`] of the entities it is about to touch, apply the
//! change locally in one synchronous write-lock section, [`Store::commit`]
//! the remote write, then run side effects. `commit` is the single place
//! that knows how to undo: on a remote failure it restores exactly the
//! captured pre-images, never a refetch or a whole-state reset, so an
//! unrelated concurrent change survives a rollback untouched.

use std::future::Future;

use tracing::warn;

use super::{AppState, StateChange, Store, StoreError};
use crate::backend::BackendError;
use crate::models::{
    ActivityEntry, EntityId, Habit, InboxItem, Invitation, Note, Notification, Project, Task,
    TeamMember, UserProfile,
};

/// Pre-images of the entities one mutation touches.
///
/// A `None` pre-image records that the entity did not exist before the
/// mutation, so rollback removes it. The invitation list and the user
/// profile are captured whole (they are small and mutated as units).
#[derive(Debug, Default)]
pub(crate) struct Snapshot {
    tasks: Vec<(EntityId, Option<Task>)>,
    captures: Vec<(EntityId, Option<InboxItem>)>,
    projects: Vec<(EntityId, Option<Project>)>,
    notes: Vec<(EntityId, Option<Note>)>,
    habits: Vec<(EntityId, Option<Habit>)>,
    members: Vec<(EntityId, Option<TeamMember>)>,
    notifications: Vec<(EntityId, Option<Notification>)>,
    activities: Vec<(EntityId, Option<ActivityEntry>)>,
    user: Option<Option<UserProfile>>,
    invitations: Option<Vec<Invitation>>,
}

impl Snapshot {
    pub fn new() -> Self {
        Snapshot::default()
    }

    pub fn task(id: impl Into<EntityId>, prior: Option<Task>) -> Self {
        Snapshot::new().with_task(id, prior)
    }

    pub fn capture(id: impl Into<EntityId>, prior: Option<InboxItem>) -> Self {
        Snapshot::new().with_capture(id, prior)
    }

    pub fn project(id: impl Into<EntityId>, prior: Option<Project>) -> Self {
        Snapshot::new().with_project(id, prior)
    }

    pub fn note(id: impl Into<EntityId>, prior: Option<Note>) -> Self {
        Snapshot::new().with_note(id, prior)
    }

    pub fn habit(id: impl Into<EntityId>, prior: Option<Habit>) -> Self {
        Snapshot::new().with_habit(id, prior)
    }

    pub fn member(id: impl Into<EntityId>, prior: Option<TeamMember>) -> Self {
        Snapshot::new().with_member(id, prior)
    }

    pub fn notification(id: impl Into<EntityId>, prior: Option<Notification>) -> Self {
        Snapshot::new().with_notification(id, prior)
    }

    pub fn activity(id: impl Into<EntityId>, prior: Option<ActivityEntry>) -> Self {
        Snapshot::new().with_activity(id, prior)
    }

    /// Image of `state.user` before the mutation.
    pub fn profile(prior: Option<UserProfile>) -> Self {
        let mut snapshot = Snapshot::new();
        snapshot.user = Some(prior);
        snapshot
    }

    /// Image of the whole invitation list before the mutation.
    pub fn invitation_list(prior: Vec<Invitation>) -> Self {
        let mut snapshot = Snapshot::new();
        snapshot.invitations = Some(prior);
        snapshot
    }

    pub fn with_task(mut self, id: impl Into<EntityId>, prior: Option<Task>) -> Self {
        self.tasks.push((id.into(), prior));
        self
    }

    pub fn with_capture(mut self, id: impl Into<EntityId>, prior: Option<InboxItem>) -> Self {
        self.captures.push((id.into(), prior));
        self
    }

    pub fn with_project(mut self, id: impl Into<EntityId>, prior: Option<Project>) -> Self {
        self.projects.push((id.into(), prior));
        self
    }

    pub fn with_note(mut self, id: impl Into<EntityId>, prior: Option<Note>) -> Self {
        self.notes.push((id.into(), prior));
        self
    }

    pub fn with_habit(mut self, id: impl Into<EntityId>, prior: Option<Habit>) -> Self {
        self.habits.push((id.into(), prior));
        self
    }

    pub fn with_member(mut self, id: impl Into<EntityId>, prior: Option<TeamMember>) -> Self {
        self.members.push((id.into(), prior));
        self
    }

    pub fn with_notification(
        mut self,
        id: impl Into<EntityId>,
        prior: Option<Notification>,
    ) -> Self {
        self.notifications.push((id.into(), prior));
        self
    }

    pub fn with_activity(mut self, id: impl Into<EntityId>, prior: Option<ActivityEntry>) -> Self {
        self.activities.push((id.into(), prior));
        self
    }

    /// Which state slices a rollback of this snapshot would touch.
    pub fn changed_slices(&self) -> Vec<StateChange> {
        let mut slices = Vec::new();
        if !self.tasks.is_empty() {
            slices.push(StateChange::Tasks);
        }
        if !self.captures.is_empty() {
            slices.push(StateChange::Inbox);
        }
        if !self.projects.is_empty() {
            slices.push(StateChange::Projects);
        }
        if !self.notes.is_empty() {
            slices.push(StateChange::Notes);
        }
        if !self.habits.is_empty() {
            slices.push(StateChange::Habits);
        }
        if !self.members.is_empty() {
            slices.push(StateChange::Team);
        }
        if !self.notifications.is_empty() {
            slices.push(StateChange::Notifications);
        }
        if !self.activities.is_empty() {
            slices.push(StateChange::Activities);
        }
        if self.user.is_some() {
            slices.push(StateChange::Session);
        }
        if self.invitations.is_some() {
            slices.push(StateChange::Invitations);
        }
        slices
    }

    /// Put every captured pre-image back. Runs under the caller's write
    /// guard so the restore is atomic.
    pub fn restore(self, state: &mut AppState) {
        fn restore_entries<T>(
            map: &mut std::collections::HashMap<EntityId, T>,
            entries: Vec<(EntityId, Option<T>)>,
        ) {
            for (id, prior) in entries {
                match prior {
                    Some(entity) => {
                        map.insert(id, entity);
                    }
                    None => {
                        map.remove(&id);
                    }
                }
            }
        }

        restore_entries(&mut state.tasks, self.tasks);
        restore_entries(&mut state.inbox, self.captures);
        restore_entries(&mut state.projects, self.projects);
        restore_entries(&mut state.notes, self.notes);
        restore_entries(&mut state.habits, self.habits);
        restore_entries(&mut state.team, self.members);
        restore_entries(&mut state.notifications, self.notifications);
        restore_entries(&mut state.activities, self.activities);
        if let Some(user) = self.user {
            state.user = user;
        }
        if let Some(invitations) = self.invitations {
            state.invitations = invitations;
        }
    }
}

impl Store {
    /// Await the remote write for an already-applied optimistic mutation.
    ///
    /// On failure, restores the snapshot under one write lock, emits the
    /// affected slice changes, and hands the error back to the caller.
    pub(crate) async fn commit<T, F>(&self, snapshot: Snapshot, operation: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, BackendError>>,
    {
        match operation.await {
            Ok(value) => Ok(value),
            Err(error) => {
                warn!(%error, "remote write failed; rolling back optimistic mutation");
                let slices = snapshot.changed_slices();
                {
                    let mut state = self.state.write().await;
                    snapshot.restore(&mut state);
                }
                for slice in slices {
                    self.emit(slice);
                }
                Err(StoreError::from(error))
            }
        }
    }
}
