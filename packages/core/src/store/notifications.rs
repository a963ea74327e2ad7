//! Recipient-side notification actions and the fan-out primitive.
//!
//! Only the recipient mutates a notification (mark read, delete). Fan-out
//! to other users is a bare remote insert: their own realtime feed delivers
//! it, and this client never holds another user's notifications locally.

use serde_json::json;
use tracing::warn;

use super::{Snapshot, StateChange, Store, StoreError};
use crate::backend::Collection;
use crate::models::wire;
use crate::models::{EntityId, Notification, NotificationKind};

impl Store {
    /// Mark one notification read. Absent or already-read ids are no-ops.
    pub async fn mark_read(&self, notification_id: &str) -> Result<(), StoreError> {
        let prior = {
            let mut state = self.state.write().await;
            let Some(notification) = state.notifications.get_mut(notification_id) else {
                return Ok(());
            };
            if notification.read {
                return Ok(());
            }
            let prior = notification.clone();
            notification.read = true;
            prior
        };
        self.emit(StateChange::Notifications);

        self.commit(
            Snapshot::notification(notification_id, Some(prior)),
            self.backend.update(
                Collection::Notifications,
                notification_id,
                json!({ "read": true }),
            ),
        )
        .await?;
        Ok(())
    }

    /// Mark every unread notification read, except `rejection` entries:
    /// a returned review stays prominent until individually acknowledged.
    pub async fn mark_all_read(&self) -> Result<(), StoreError> {
        let (snapshot, ids) = {
            let mut state = self.state.write().await;
            let mut snapshot = Snapshot::new();
            let mut ids = Vec::new();
            for notification in state.notifications.values_mut() {
                if notification.read || notification.kind == NotificationKind::Rejection {
                    continue;
                }
                snapshot =
                    snapshot.with_notification(&notification.id, Some(notification.clone()));
                notification.read = true;
                ids.push(notification.id.clone());
            }
            (snapshot, ids)
        };
        if ids.is_empty() {
            return Ok(());
        }
        self.emit(StateChange::Notifications);

        let backend = self.backend.clone();
        self.commit(snapshot, async move {
            for id in &ids {
                backend
                    .update(Collection::Notifications, id, json!({ "read": true }))
                    .await?;
            }
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Delete one notification. Deleting an absent id is a no-op.
    pub async fn delete_notification(&self, notification_id: &str) -> Result<(), StoreError> {
        let prior = {
            let mut state = self.state.write().await;
            state.notifications.remove(notification_id)
        };
        let Some(prior) = prior else {
            return Ok(());
        };
        self.emit(StateChange::Notifications);

        self.commit(
            Snapshot::notification(notification_id, Some(prior)),
            self.backend
                .delete(Collection::Notifications, &[notification_id.to_owned()]),
        )
        .await?;
        Ok(())
    }

    /// Delete all of the user's notifications, rejections included.
    pub async fn clear_notifications(&self) -> Result<(), StoreError> {
        let user = self.require_user().await?;
        let (snapshot, ids) = {
            let mut state = self.state.write().await;
            let ids: Vec<EntityId> = state
                .notifications
                .values()
                .filter(|n| n.user_id == user.id)
                .map(|n| n.id.clone())
                .collect();
            let mut snapshot = Snapshot::new();
            for id in &ids {
                let prior = state.notifications.remove(id);
                snapshot = snapshot.with_notification(id, prior);
            }
            (snapshot, ids)
        };
        if ids.is_empty() {
            return Ok(());
        }
        self.emit(StateChange::Notifications);

        self.commit(
            snapshot,
            self.backend.delete(Collection::Notifications, &ids),
        )
        .await?;
        Ok(())
    }

    /// Create a notification for `recipient`.
    ///
    /// Remote insert only; the recipient's realtime feed delivers it.
    /// Fan-out is best-effort: failures are logged and never fail the
    /// mutation that triggered them.
    pub(crate) async fn notify(
        &self,
        recipient: &str,
        kind: NotificationKind,
        title: &str,
        message: String,
        link: Option<String>,
    ) {
        let notification = Notification::new(recipient, kind, title, message, link);
        if let Err(error) = self
            .backend
            .insert(
                Collection::Notifications,
                wire::notification_row(&notification),
            )
            .await
        {
            warn!(%error, recipient, "notification fan-out failed");
        }
    }
}
