//! Presence: who is online right now.
//!
//! Presence churn comes in bursts (a reconnect storm joins dozens of
//! connections within a second), so events are coalesced: the first event
//! starts a quiet period, everything that arrives during it is drained, and
//! the online set is recomputed once from the backend's full presence state.

use std::collections::BTreeSet;
use std::sync::Weak;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, warn};

use super::{StateChange, Store};
use crate::backend::PresenceEvent;
use crate::models::EntityId;

pub(crate) async fn run_presence_loop(
    store: Weak<Store>,
    mut receiver: broadcast::Receiver<PresenceEvent>,
) {
    loop {
        match receiver.recv().await {
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                // The online set is recomputed from a full state query, so
                // dropped events cost nothing.
                debug!(skipped, "presence receiver lagged");
            }
            Err(RecvError::Closed) => break,
        }
        let debounce = match store.upgrade() {
            Some(strong) => strong.config.presence_debounce,
            None => break,
        };

        // Teardown must not wait out the quiet period, so no strong
        // reference is held across the sleep.
        tokio::time::sleep(debounce).await;
        loop {
            match receiver.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        let Some(strong) = store.upgrade() else {
            break;
        };
        strong.refresh_online_users().await;
    }
}

impl Store {
    /// Recompute the deduplicated online-user set from presence state.
    /// A user with several live connections counts once.
    pub(crate) async fn refresh_online_users(&self) {
        let payloads = match self.backend.presence_state().await {
            Ok(payloads) => payloads,
            Err(error) => {
                warn!(%error, "presence state query failed");
                return;
            }
        };
        let online: BTreeSet<EntityId> = payloads.into_iter().map(|p| p.user_id).collect();

        let changed = {
            let mut state = self.state.write().await;
            if state.online_users == online {
                false
            } else {
                state.online_users = online;
                true
            }
        };
        if changed {
            self.emit(StateChange::Presence);
        }
    }
}
