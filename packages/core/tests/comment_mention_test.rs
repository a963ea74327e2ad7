//! Comments, @mentions, and the activity trail.
//!
//! Mentions fan out only after the comment's remote write confirms, so a
//! rejected comment never pings anyone.

#[cfg(test)]
mod comment_mention_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use agenda_core::backend::{Collection, MemoryBackend, WriteOp};
    use agenda_core::models::{ActivityKind, TaskDraft};
    use agenda_core::store::{Store, StoreConfig, StoreError};
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

    /// Sign in as Ana with Mia and Max on the roster.
    async fn mention_fixture() -> Result<(Arc<MemoryBackend>, Arc<Store>)> {
        let backend = Arc::new(MemoryBackend::new());
        backend.seed(
            Collection::Profiles,
            vec![
                profile_row("m1", "Mia Koch", "member"),
                profile_row("m2", "Max Dorn", "member"),
            ],
        );
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

    #[tokio::test]
    async fn test_comment_mention_notifies_matching_member() -> Result<()> {
        let (backend, store) = mention_fixture().await?;
        let task_id = store.add_task(TaskDraft::new("Sync the brand assets")).await?;

        store
            .add_comment(&task_id, "@mia can you sync these today?")
            .await?;
        settle().await;

        let rows = backend.rows(Collection::Notifications);
        let mia: Vec<&Value> = rows.iter().filter(|row| row["user_id"] == "m1").collect();
        assert_eq!(mia.len(), 1);
        assert_eq!(mia[0]["type"], "mention");
        assert_eq!(mia[0]["title"], "You were mentioned");
        assert_eq!(mia[0]["message"], "Ana Reyes mentioned you in a comment");
        assert_eq!(mia[0]["link"], format!("/tasks?taskId={task_id}"));
        assert!(rows.iter().all(|row| row["user_id"] != "m2"));
        Ok(())
    }

    #[tokio::test]
    async fn test_mention_handles_dedupe_and_never_self_ping() -> Result<()> {
        let (backend, store) = mention_fixture().await?;
        let task_id = store.add_task(TaskDraft::new("Sync the brand assets")).await?;

        // Both handles resolve to Mia Koch; "@ana" is the actor.
        store
            .add_comment(&task_id, "@mia and @koch and @ana should see this")
            .await?;
        settle().await;

        let rows = backend.rows(Collection::Notifications);
        assert_eq!(rows.iter().filter(|row| row["user_id"] == "m1").count(), 1);
        assert!(rows.iter().all(|row| row["user_id"] != "u1"));
        Ok(())
    }

    #[tokio::test]
    async fn test_unmatched_handle_pings_no_one() -> Result<()> {
        let (backend, store) = mention_fixture().await?;
        let task_id = store.add_task(TaskDraft::new("Sync the brand assets")).await?;

        let comment_id = store.add_comment(&task_id, "@zorro is this yours?").await?;
        settle().await;

        assert!(backend.rows(Collection::Notifications).is_empty());
        // The comment itself still landed.
        let row = backend.row(Collection::ActivityLogs, &comment_id).unwrap();
        assert_eq!(row["content"], "@zorro is this yours?");
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_comment_is_rejected() -> Result<()> {
        let (backend, store) = mention_fixture().await?;
        let task_id = store.add_task(TaskDraft::new("Sync the brand assets")).await?;

        let result = store.add_comment(&task_id, "   ").await;

        assert!(matches!(result, Err(StoreError::Validation(_))));
        let rows = backend.rows(Collection::ActivityLogs);
        assert!(rows.iter().all(|row| row["type"] != "comment"));
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_comment_write_pings_no_one() -> Result<()> {
        let (backend, store) = mention_fixture().await?;
        let task_id = store.add_task(TaskDraft::new("Sync the brand assets")).await?;
        settle().await;
        let before = store.snapshot().await;

        backend.fail_next(Collection::ActivityLogs, WriteOp::Insert);
        let result = store
            .add_comment(&task_id, "@mia this will not survive")
            .await;

        assert!(matches!(result, Err(StoreError::Backend(_))));
        assert_eq!(store.snapshot().await, before);
        assert!(backend.rows(Collection::Notifications).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_update_activity_round_trip_and_unknown_id() -> Result<()> {
        let (backend, store) = mention_fixture().await?;
        let task_id = store.add_task(TaskDraft::new("Sync the brand assets")).await?;
        let comment_id = store.add_comment(&task_id, "first pass").await?;

        store.update_activity(&comment_id, "second pass").await?;
        settle().await;

        let state = store.snapshot().await;
        assert_eq!(state.activities[&comment_id].content, "second pass");
        let row = backend.row(Collection::ActivityLogs, &comment_id).unwrap();
        assert_eq!(row["content"], "second pass");

        let missing = store.update_activity("ghost", "nope").await;
        assert!(matches!(missing, Err(StoreError::NotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_fetch_activities_returns_oldest_first() -> Result<()> {
        let (_backend, store) = mention_fixture().await?;
        let task_id = store.add_task(TaskDraft::new("Sync the brand assets")).await?;
        let first = store.add_comment(&task_id, "kickoff at ten").await?;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = store.add_comment(&task_id, "moved to eleven").await?;
        settle().await;

        let entries = store.fetch_activities(&task_id).await?;

        assert!(entries
            .windows(2)
            .all(|pair| pair[0].created_at <= pair[1].created_at));
        let comments: Vec<&str> = entries
            .iter()
            .filter(|entry| entry.kind == ActivityKind::Comment)
            .map(|entry| entry.id.as_str())
            .collect();
        assert_eq!(comments, vec![first.as_str(), second.as_str()]);

        // Fetched entries land in the shared map.
        let state = store.snapshot().await;
        assert!(state.activities.contains_key(&first));
        assert!(state.activities.contains_key(&second));
        Ok(())
    }
}
