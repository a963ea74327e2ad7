//! Status transition rules, end to end.
//!
//! The interesting paths run through two sessions sharing one backend: an
//! assignee requesting completion without authority over the owner, and the
//! owner returning the work. Assertions check local state, the persisted
//! rows, and the resulting activity and notification fan-out.

#[cfg(test)]
mod status_machine_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use agenda_core::backend::{Collection, MemoryBackend};
    use agenda_core::models::{NotificationKind, TaskDraft, TaskStatus};
    use agenda_core::store::{Store, StoreConfig};
    use anyhow::Result;
    use serde_json::{json, Value};

    fn profile_row(id: &str, name: &str, role: &str) -> Value {
        json!({
            "id": id,
            "full_name": name,
            "email": format!("{id}@example.com"),
            "role": role,
            "reports_to": null,
        })
    }

    /// Open a session for `profile` over the shared backend. Later sign-ins
    /// replace the backend's authenticated user, which existing stores have
    /// already captured.
    async fn session(backend: &Arc<MemoryBackend>, profile: Value) -> Result<Arc<Store>> {
        backend.sign_in(profile);
        let store = Store::new(
            backend.clone(),
            StoreConfig::new().with_presence_debounce(Duration::from_secs(60)),
        );
        store.initialize().await?;
        Ok(store)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    /// Owner `o1` creates a task assigned to `b1`, then `b1` opens their own
    /// session. Neither outranks the other.
    async fn review_fixture() -> Result<(Arc<MemoryBackend>, Arc<Store>, Arc<Store>, String)> {
        let backend = Arc::new(MemoryBackend::new());
        backend.seed(
            Collection::Profiles,
            vec![profile_row("b1", "Ben Ito", "member")],
        );
        let owner = session(&backend, profile_row("o1", "Olive Tran", "member")).await?;
        let task_id = owner
            .add_task(TaskDraft::new("Quarterly report").with_assignees(["b1"]))
            .await?;
        settle().await;
        let assignee = session(&backend, profile_row("b1", "Ben Ito", "member")).await?;
        Ok((backend, owner, assignee, task_id))
    }

    #[tokio::test]
    async fn test_non_owner_completion_lands_in_review() -> Result<()> {
        let (backend, owner, assignee, task_id) = review_fixture().await?;

        assignee.update_status(&task_id, TaskStatus::Done).await?;

        let task = assignee
            .snapshot()
            .await
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("task missing"))?;
        assert_eq!(task.status, TaskStatus::Review);
        assert_eq!(task.completed_at, None);

        let row = backend
            .row(Collection::Tasks, &task_id)
            .ok_or_else(|| anyhow::anyhow!("task row missing"))?;
        assert_eq!(row["status"], "review");
        assert_eq!(row["completed_at"], Value::Null);

        // Logged as a review request, not a plain status change.
        assert!(backend
            .rows(Collection::ActivityLogs)
            .iter()
            .any(|entry| entry["type"] == "review_request"
                && entry["content"] == "Submitted for review"));

        // The owner is asked to approve.
        let review_ping = backend
            .rows(Collection::Notifications)
            .into_iter()
            .find(|n| n["title"] == "Task Ready for Review")
            .ok_or_else(|| anyhow::anyhow!("review notification missing"))?;
        assert_eq!(review_ping["user_id"], "o1");
        assert_eq!(
            review_ping["message"],
            "\"Quarterly report\" is ready for your approval."
        );
        assert_eq!(
            review_ping["link"],
            format!("/tasks?taskId={task_id}").as_str()
        );

        // The owner's session converges on review.
        settle().await;
        let owner_view = owner.snapshot().await;
        assert_eq!(
            owner_view.tasks.get(&task_id).map(|t| t.status),
            Some(TaskStatus::Review)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_owner_rejection_notifies_assignees() -> Result<()> {
        let (backend, owner, assignee, task_id) = review_fixture().await?;
        assignee.update_status(&task_id, TaskStatus::Done).await?;
        settle().await;

        owner
            .update_status(&task_id, TaskStatus::InProgress)
            .await?;

        let rejection = backend
            .rows(Collection::Notifications)
            .into_iter()
            .find(|n| n["type"] == "rejection")
            .ok_or_else(|| anyhow::anyhow!("rejection notification missing"))?;
        assert_eq!(rejection["user_id"], "b1");
        assert_eq!(rejection["title"], "Task Returned for Revision");
        assert_eq!(
            rejection["message"],
            "\"Quarterly report\" was returned by the owner."
        );

        let row = backend
            .row(Collection::Tasks, &task_id)
            .ok_or_else(|| anyhow::anyhow!("task row missing"))?;
        assert_eq!(row["status"], "in_progress");

        assert!(backend
            .rows(Collection::ActivityLogs)
            .iter()
            .any(|entry| entry["content"] == "Changed status to in progress"));
        Ok(())
    }

    #[tokio::test]
    async fn test_rejection_survives_mark_all_read() -> Result<()> {
        let (_backend, owner, assignee, task_id) = review_fixture().await?;
        assignee.update_status(&task_id, TaskStatus::Done).await?;
        settle().await;
        owner.update_status(&task_id, TaskStatus::Todo).await?;
        settle().await;

        // The assignee now holds the assignment ping and the rejection.
        assert_eq!(assignee.unread_notifications().await, 2);

        assignee.mark_all_read().await?;

        let notifications = assignee.snapshot().await.notifications;
        for n in notifications.values() {
            match n.kind {
                NotificationKind::Rejection => assert!(!n.read),
                _ => assert!(n.read),
            }
        }
        assert_eq!(assignee.unread_notifications().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_owner_completion_is_direct() -> Result<()> {
        let backend = Arc::new(MemoryBackend::new());
        let owner = session(&backend, profile_row("o1", "Olive Tran", "member")).await?;
        let task_id = owner.add_task(TaskDraft::new("Ship release")).await?;
        settle().await;

        owner.toggle_task(&task_id).await?;
        settle().await;

        let task = owner
            .snapshot()
            .await
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("task missing"))?;
        assert_eq!(task.status, TaskStatus::Done);
        assert!(task.completed_at.is_some());

        assert!(backend
            .rows(Collection::ActivityLogs)
            .iter()
            .any(|entry| entry["content"] == "Changed status to done"));
        assert!(!backend
            .rows(Collection::ActivityLogs)
            .iter()
            .any(|entry| entry["type"] == "review_request"));
        Ok(())
    }

    #[tokio::test]
    async fn test_leaving_done_clears_completed_at() -> Result<()> {
        let backend = Arc::new(MemoryBackend::new());
        let owner = session(&backend, profile_row("o1", "Olive Tran", "member")).await?;
        let task_id = owner.add_task(TaskDraft::new("Ship release")).await?;
        owner.toggle_task(&task_id).await?;
        settle().await;

        owner.update_status(&task_id, TaskStatus::Todo).await?;

        let task = owner
            .snapshot()
            .await
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("task missing"))?;
        assert_eq!(task.status, TaskStatus::Todo);
        assert_eq!(task.completed_at, None);

        let row = backend
            .row(Collection::Tasks, &task_id)
            .ok_or_else(|| anyhow::anyhow!("task row missing"))?;
        assert_eq!(row["status"], "todo");
        assert_eq!(row["completed_at"], Value::Null);
        Ok(())
    }
}
