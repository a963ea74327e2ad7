//! Synchronization store.
//!
//! # Architecture
//!
//! The store owns one [`AppState`] behind a `tokio::sync::RwLock` and is the
//! only writer. Every mutation applies locally first in a synchronous
//! write-lock section (guards are never held across an await), then confirms
//! remotely through the [`Backend`]; a failed confirmation rolls back to the
//! captured pre-images (see [`mutation`]). Realtime events from the backend
//! are folded in by one merge loop per collection, last-writer-wins at the
//! record level.
//!
//! Views observe the store through [`Store::subscribe_changes`], which emits
//! coarse [`StateChange`] markers, and read via [`Store::snapshot`] or the
//! scoped queries.
//!
//! # Concurrency
//!
//! - mutation sections are atomic relative to each other and to the merge
//!   loops (single `RwLock`);
//! - remote writes happen strictly outside any guard, so interleavings
//!   between "applied locally" and "confirmed remotely" are possible and
//!   tolerated; the rollback protocol covers the failure half;
//! - completion and first-claim races are decided server-side by the atomic
//!   procedures, never by the client.

mod activity;
mod content;
mod error;
mod inbox;
mod mutation;
mod notifications;
mod presence;
mod realtime;
mod tasks;
mod team;

pub use error::StoreError;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::backend::{Backend, Collection, PresencePayload, SelectFilter};
use crate::models::wire;
use crate::models::{
    ActivityEntry, EntityId, Habit, InboxItem, Invitation, Note, Notification, Project, Task,
    TeamMember, UserProfile,
};
use crate::rules::{member_visible_to, task_visible_to};

pub(crate) use mutation::Snapshot;

/// Everything the client holds locally. Cheap to clone for snapshots and
/// comparable whole, which is what the rollback guarantees are stated in
/// terms of.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AppState {
    /// The signed-in user. `None` until `initialize` succeeds.
    pub user: Option<UserProfile>,
    pub team: HashMap<EntityId, TeamMember>,
    pub tasks: HashMap<EntityId, Task>,
    pub inbox: HashMap<EntityId, InboxItem>,
    pub projects: HashMap<EntityId, Project>,
    pub notes: HashMap<EntityId, Note>,
    pub habits: HashMap<EntityId, Habit>,
    /// Fetched on demand per task; merged, never replaced wholesale.
    pub activities: HashMap<EntityId, ActivityEntry>,
    pub notifications: HashMap<EntityId, Notification>,
    pub invitations: Vec<Invitation>,
    /// De-duplicated set of currently-online user ids.
    pub online_users: BTreeSet<EntityId>,
}

/// Which slice of [`AppState`] changed. Deliberately coarse: views re-read the
/// slice they care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    Session,
    Team,
    Tasks,
    Inbox,
    Projects,
    Notes,
    Habits,
    Activities,
    Notifications,
    Invitations,
    Presence,
}

/// Store tuning knobs.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Closed-out records older than this are left out of the working set.
    pub sync_window: Duration,
    /// Maximum notifications fetched at initialization.
    pub notification_limit: usize,
    /// Quiet period before recomputing the online set after presence churn.
    pub presence_debounce: Duration,
    /// Capacity of the state-change broadcast channel.
    pub event_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            sync_window: Duration::from_secs(30 * 24 * 60 * 60),
            notification_limit: 100,
            presence_debounce: Duration::from_secs(2),
            event_capacity: crate::backend::DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        StoreConfig::default()
    }

    pub fn with_sync_window(mut self, window: Duration) -> Self {
        self.sync_window = window;
        self
    }

    pub fn with_notification_limit(mut self, limit: usize) -> Self {
        self.notification_limit = limit;
        self
    }

    pub fn with_presence_debounce(mut self, debounce: Duration) -> Self {
        self.presence_debounce = debounce;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

/// The synchronization store. Constructed once per session and shared as
/// `Arc<Store>`.
pub struct Store {
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) config: StoreConfig,
    pub(crate) state: RwLock<AppState>,
    /// Re-entrancy guard for quick-complete. Per instance, so stores under
    /// test never share lock state.
    pub(crate) toggles_in_flight: Mutex<HashSet<EntityId>>,
    /// Captures deleted locally whose realtime echo has not arrived yet;
    /// suppresses resurrection by a late insert/update event.
    pub(crate) recently_deleted_inbox: Mutex<HashSet<EntityId>>,
    changes: broadcast::Sender<StateChange>,
    subscriptions: Mutex<Vec<JoinHandle<()>>>,
}

/// Poison recovery for the store's auxiliary mutexes.
pub(crate) fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Store {
    pub fn new(backend: Arc<dyn Backend>, config: StoreConfig) -> Arc<Self> {
        let (changes, _) = broadcast::channel(config.event_capacity);
        Arc::new(Store {
            backend,
            config,
            state: RwLock::new(AppState::default()),
            toggles_in_flight: Mutex::new(HashSet::new()),
            recently_deleted_inbox: Mutex::new(HashSet::new()),
            changes,
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    /// Load the full working set and start the realtime loops.
    ///
    /// Idempotent: calling it again refetches everything, atomically
    /// replaces local state, and restarts the subscription tasks. This is
    /// the desync recovery action.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), StoreError> {
        let profile_row = self
            .backend
            .authenticated_profile()
            .await?
            .ok_or(StoreError::NotAuthenticated)?;
        let mut user = wire::hydrate_profile(profile_row).map_err(crate::backend::BackendError::from)?;

        // The standing AI context lives in its own per-user record; fold it
        // into the profile preferences when present.
        match self
            .backend
            .select(
                Collection::AiMetadata,
                SelectFilter::new().with_owner(&user.id),
            )
            .await
        {
            Ok(rows) => {
                if let Some(context) = rows
                    .first()
                    .and_then(|row| row.get("ai_context"))
                    .and_then(Value::as_str)
                {
                    user.preferences.ai_context = Some(context.to_owned());
                }
            }
            Err(error) => warn!(%error, "AI context fetch failed; continuing without it"),
        }

        let user_id = user.id.clone();
        let cutoff = Utc::now().timestamp_millis() - self.config.sync_window.as_millis() as i64;

        let (tasks, inbox, projects, notes, habits, members, notifications, invitations) = tokio::join!(
            self.fetch_collection(
                Collection::Tasks,
                SelectFilter::new().open_or_touched_since(cutoff),
                wire::hydrate_task,
            ),
            self.fetch_collection(
                Collection::InboxItems,
                SelectFilter::new()
                    .with_owner(&user_id)
                    .unprocessed_or_created_since(cutoff),
                wire::hydrate_capture,
            ),
            self.fetch_collection(
                Collection::Projects,
                SelectFilter::new().active_only(),
                wire::hydrate_project,
            ),
            self.fetch_collection(
                Collection::Notes,
                SelectFilter::new().with_owner(&user_id),
                wire::hydrate_note,
            ),
            self.fetch_collection(
                Collection::Habits,
                SelectFilter::new().with_owner(&user_id),
                wire::hydrate_habit,
            ),
            self.fetch_collection(Collection::Profiles, SelectFilter::new(), wire::hydrate_member),
            self.fetch_collection(
                Collection::Notifications,
                SelectFilter::new()
                    .with_recipient(&user_id)
                    .newest_first()
                    .with_limit(self.config.notification_limit),
                wire::hydrate_notification,
            ),
            self.fetch_collection(
                Collection::TeamInvitations,
                SelectFilter::new().newest_first(),
                wire::hydrate_invitation,
            ),
        );

        {
            let mut state = self.state.write().await;
            state.user = Some(user);
            state.team = members.into_iter().map(|m| (m.id.clone(), m)).collect();
            state.tasks = tasks.into_iter().map(|t| (t.id.clone(), t)).collect();
            state.inbox = inbox.into_iter().map(|i| (i.id.clone(), i)).collect();
            state.projects = projects.into_iter().map(|p| (p.id.clone(), p)).collect();
            state.notes = notes.into_iter().map(|n| (n.id.clone(), n)).collect();
            state.habits = habits.into_iter().map(|h| (h.id.clone(), h)).collect();
            state.notifications = notifications
                .into_iter()
                .map(|n| (n.id.clone(), n))
                .collect();
            state.invitations = invitations;
            state.activities = HashMap::new();
            state.online_users = BTreeSet::new();
        }
        for slice in [
            StateChange::Session,
            StateChange::Team,
            StateChange::Tasks,
            StateChange::Inbox,
            StateChange::Projects,
            StateChange::Notes,
            StateChange::Habits,
            StateChange::Notifications,
            StateChange::Invitations,
        ] {
            self.emit(slice);
        }

        self.start_subscriptions();
        self.track_self(&user_id).await;
        info!(%user_id, "store initialized");
        Ok(())
    }

    /// Alias for [`Store::initialize`]; reads as intent at call sites that
    /// recover from a suspected desync.
    pub async fn resync(self: &Arc<Self>) -> Result<(), StoreError> {
        self.initialize().await
    }

    async fn fetch_collection<T>(
        &self,
        collection: Collection,
        filter: SelectFilter,
        hydrate: fn(Value) -> serde_json::Result<T>,
    ) -> Vec<T> {
        match self.backend.select(collection, filter).await {
            Ok(rows) => rows
                .into_iter()
                .filter_map(|row| match hydrate(row) {
                    Ok(entity) => Some(entity),
                    Err(error) => {
                        warn!(%collection, %error, "dropping malformed record");
                        None
                    }
                })
                .collect(),
            Err(error) => {
                // One failed collection must not take initialization down.
                warn!(%collection, %error, "collection fetch failed; starting empty");
                Vec::new()
            }
        }
    }

    fn start_subscriptions(self: &Arc<Self>) {
        let mut handles = relock(&self.subscriptions);
        for handle in handles.drain(..) {
            handle.abort();
        }
        for collection in realtime::SYNCED_COLLECTIONS {
            let receiver = self.backend.subscribe(collection);
            handles.push(tokio::spawn(realtime::run_merge_loop(
                Arc::downgrade(self),
                collection,
                receiver,
            )));
        }
        let presence_rx = self.backend.subscribe_presence();
        handles.push(tokio::spawn(presence::run_presence_loop(
            Arc::downgrade(self),
            presence_rx,
        )));
    }

    async fn track_self(&self, user_id: &str) {
        let payload = PresencePayload {
            user_id: user_id.to_owned(),
            online_at: Utc::now().timestamp_millis(),
        };
        if let Err(error) = self.backend.track_presence(payload).await {
            warn!(%error, "presence tracking failed");
        }
    }

    pub(crate) fn emit(&self, change: StateChange) {
        let _ = self.changes.send(change);
    }

    pub(crate) async fn require_user(&self) -> Result<UserProfile, StoreError> {
        self.state
            .read()
            .await
            .user
            .clone()
            .ok_or(StoreError::NotAuthenticated)
    }

    // --- Queries ---

    /// A full copy of the current state.
    pub async fn snapshot(&self) -> AppState {
        self.state.read().await.clone()
    }

    pub async fn current_user(&self) -> Option<UserProfile> {
        self.state.read().await.user.clone()
    }

    /// Tasks `viewer_id` may see, newest first.
    pub async fn visible_tasks(&self, viewer_id: &str) -> Vec<Task> {
        let state = self.state.read().await;
        let Some(viewer) = state.team.get(viewer_id) else {
            return Vec::new();
        };
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|task| task_visible_to(viewer_id, viewer.role, task, &state.team))
            .cloned()
            .collect();
        tasks.sort_by_key(|task| std::cmp::Reverse(task.created_at));
        tasks
    }

    /// Roster entries `viewer_id` may see, sorted by name.
    pub async fn visible_members(&self, viewer_id: &str) -> Vec<TeamMember> {
        let state = self.state.read().await;
        let Some(viewer) = state.team.get(viewer_id) else {
            return Vec::new();
        };
        let mut members: Vec<TeamMember> = state
            .team
            .values()
            .filter(|member| member_visible_to(viewer_id, viewer.role, &member.id, &state.team))
            .cloned()
            .collect();
        members.sort_by(|a, b| a.name.cmp(&b.name));
        members
    }

    pub async fn unread_notifications(&self) -> usize {
        self.state
            .read()
            .await
            .notifications
            .values()
            .filter(|n| !n.read)
            .count()
    }

    pub async fn online_users(&self) -> BTreeSet<EntityId> {
        self.state.read().await.online_users.clone()
    }

    /// Subscribe to coarse state-change notifications.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Ok(handles) = self.subscriptions.get_mut() {
            for handle in handles.drain(..) {
                handle.abort();
            }
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
