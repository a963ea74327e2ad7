//! Merge behavior for realtime change events.
//!
//! Events from other sessions arrive over per-collection broadcast channels
//! and are folded into local state last-writer-wins. The loops have to shrug
//! off duplicates, deletes for records we never held, and malformed payloads
//! without stalling.

#[cfg(test)]
mod realtime_merge_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use agenda_core::backend::{Backend, Collection, MemoryBackend};
    use agenda_core::models::Source;
    use agenda_core::store::{StateChange, Store, StoreConfig};
    use anyhow::Result;
    use serde_json::{json, Value};
    use tokio::sync::broadcast;
    use tokio::time::timeout;

    fn profile_row(id: &str, name: &str, role: &str) -> Value {
        json!({
            "id": id,
            "full_name": name,
            "email": format!("{id}@example.com"),
            "role": role,
            "reports_to": null,
        })
    }

    fn task_row(id: &str, title: &str, owner: &str) -> Value {
        json!({
            "id": id,
            "title": title,
            "description": null,
            "status": "todo",
            "priority": "medium",
            "user_id": owner,
            "assignee_ids": [],
            "visibility": "team",
            "project_id": null,
            "due_date": null,
            "created_at": 1_756_000_000_000_i64,
            "updated_at": "2026-08-24T08:00:00.000Z",
            "completed_at": null,
            "accepted_at": null,
            "tags": [],
            "recurrence": null,
        })
    }

    async fn signed_in_store() -> Result<(Arc<MemoryBackend>, Arc<Store>)> {
        let backend = Arc::new(MemoryBackend::new());
        backend.sign_in(profile_row("u1", "Ana Reyes", "member"));
        let store = Store::new(
            backend.clone(),
            StoreConfig::new().with_presence_debounce(Duration::from_secs(60)),
        );
        store.initialize().await?;
        Ok((backend, store))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    /// Wait until the wanted slice notification arrives, skipping others.
    async fn await_change(
        rx: &mut broadcast::Receiver<StateChange>,
        wanted: StateChange,
    ) -> Result<()> {
        loop {
            let change = timeout(Duration::from_secs(1), rx.recv())
                .await
                .map_err(|_| anyhow::anyhow!("timed out waiting for {wanted:?}"))??;
            if change == wanted {
                return Ok(());
            }
        }
    }

    /// Assert the unwanted slice notification does not arrive within the
    /// grace window. Other slices may fire freely.
    async fn assert_no_change(rx: &mut broadcast::Receiver<StateChange>, unwanted: StateChange) {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(150);
        loop {
            match timeout(Duration::from_millis(150), rx.recv()).await {
                Ok(Ok(change)) if change == unwanted => {
                    panic!("unexpected {unwanted:?} notification")
                }
                Ok(Ok(_)) if tokio::time::Instant::now() < deadline => continue,
                _ => return,
            }
        }
    }

    #[tokio::test]
    async fn test_remote_insert_merges_into_local_state() -> Result<()> {
        let (backend, store) = signed_in_store().await?;
        let mut rx = store.subscribe_changes();

        backend
            .insert(Collection::Tasks, task_row("t-remote", "Review budget", "u2"))
            .await?;
        await_change(&mut rx, StateChange::Tasks).await?;

        let tasks = store.snapshot().await.tasks;
        let merged = tasks
            .get("t-remote")
            .ok_or_else(|| anyhow::anyhow!("remote task missing"))?;
        assert_eq!(merged.title, "Review budget");
        assert_eq!(merged.owner_id, "u2");
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_update_event_is_idempotent() -> Result<()> {
        let (backend, store) = signed_in_store().await?;
        let mut rx = store.subscribe_changes();
        let row = task_row("t-dup", "Sync notes", "u2");

        backend.insert(Collection::Tasks, row.clone()).await?;
        await_change(&mut rx, StateChange::Tasks).await?;
        let first = store.snapshot().await.tasks;

        // The same full record arriving again must not change anything.
        backend.update(Collection::Tasks, "t-dup", row).await?;
        await_change(&mut rx, StateChange::Tasks).await?;
        let second = store.snapshot().await.tasks;

        assert_eq!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_event_for_unknown_record_is_ignored() -> Result<()> {
        let (backend, store) = signed_in_store().await?;
        // Seeding after initialize puts the row in the backend without the
        // store ever loading it.
        backend.seed(
            Collection::Tasks,
            vec![task_row("t-ghost", "Never loaded", "u2")],
        );
        let mut rx = store.subscribe_changes();
        let before = store.snapshot().await;

        backend
            .delete(Collection::Tasks, &["t-ghost".to_string()])
            .await?;
        assert_no_change(&mut rx, StateChange::Tasks).await;

        assert_eq!(store.snapshot().await, before);
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_event_does_not_stop_the_merge_loop() -> Result<()> {
        let (backend, store) = signed_in_store().await?;
        let mut rx = store.subscribe_changes();

        // A record that fails hydration is logged and dropped.
        backend
            .insert(Collection::Tasks, json!({"id": "t-bad", "title": 42}))
            .await?;
        // The loop must still be alive to merge the next event.
        backend
            .insert(Collection::Tasks, task_row("t-good", "Survivor", "u2"))
            .await?;
        await_change(&mut rx, StateChange::Tasks).await?;

        let tasks = store.snapshot().await.tasks;
        assert!(tasks.contains_key("t-good"));
        assert!(!tasks.contains_key("t-bad"));
        Ok(())
    }

    #[tokio::test]
    async fn test_notifications_for_other_recipients_are_discarded() -> Result<()> {
        let (backend, store) = signed_in_store().await?;
        let mut rx = store.subscribe_changes();

        backend
            .insert(
                Collection::Notifications,
                json!({
                    "id": "n-other",
                    "user_id": "u2",
                    "type": "system",
                    "title": "Not yours",
                    "message": "Addressed to someone else",
                    "link": null,
                    "read": false,
                }),
            )
            .await?;
        backend
            .insert(
                Collection::Notifications,
                json!({
                    "id": "n-mine",
                    "user_id": "u1",
                    "type": "system",
                    "title": "For you",
                    "message": "Addressed to the signed-in user",
                    "link": null,
                    "read": false,
                }),
            )
            .await?;
        await_change(&mut rx, StateChange::Notifications).await?;

        let notifications = store.snapshot().await.notifications;
        assert!(notifications.contains_key("n-mine"));
        assert!(!notifications.contains_key("n-other"));
        Ok(())
    }

    #[tokio::test]
    async fn test_deleted_capture_is_not_resurrected_by_inflight_update() -> Result<()> {
        let (backend, store) = signed_in_store().await?;
        let capture_id = store.add_capture("Renew passport", Source::Manual).await?;
        settle().await;

        // On the single-threaded test runtime this event is still queued
        // when the local delete runs; the deletion guard must drop it.
        backend
            .update(
                Collection::InboxItems,
                &capture_id,
                json!({"text": "Renew passport soon"}),
            )
            .await?;
        store.delete_capture(&capture_id).await?;
        settle().await;

        assert!(!store.snapshot().await.inbox.contains_key(&capture_id));
        assert!(backend.row(Collection::InboxItems, &capture_id).is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_profile_event_updates_user_and_keeps_ai_context() -> Result<()> {
        let (backend, store) = signed_in_store().await?;
        store.update_ai_context("Prefers short briefs").await?;
        let mut rx = store.subscribe_changes();

        // Profile rows never carry the AI context; a rename from another
        // session must not wipe it.
        backend
            .update(Collection::Profiles, "u1", json!({"full_name": "Ana R."}))
            .await?;
        await_change(&mut rx, StateChange::Session).await?;

        let state = store.snapshot().await;
        let user = state
            .user
            .ok_or_else(|| anyhow::anyhow!("signed-in user missing"))?;
        assert_eq!(user.name, "Ana R.");
        assert_eq!(
            user.preferences.ai_context.as_deref(),
            Some("Prefers short briefs")
        );
        let member = state
            .team
            .get("u1")
            .ok_or_else(|| anyhow::anyhow!("roster entry missing"))?;
        assert_eq!(member.name, "Ana R.");
        Ok(())
    }
}
