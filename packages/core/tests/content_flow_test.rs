//! Projects, notes, and habits.
//!
//! The interesting part is project deletion: the store removes the
//! project's tasks and notes locally in the same transaction, and a failed
//! remote delete puts every one of them back.

#[cfg(test)]
mod content_flow_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use agenda_core::backend::{Collection, MemoryBackend, WriteOp};
    use agenda_core::models::{
        HabitFrequency, HabitPatch, NoteDraft, NotePatch, ProjectPatch, ProjectStatus, TaskDraft,
    };
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

    /// A project with one task and one note attached, plus a standalone task.
    async fn project_fixture(
        store: &Store,
    ) -> Result<(String, String, String, String)> {
        let project_id = store.add_project("Launch", None, "#f59e0b").await?;
        let in_project = store
            .add_task(TaskDraft::new("Write the announcement").with_project(&project_id))
            .await?;
        let standalone = store.add_task(TaskDraft::new("Water plants")).await?;
        let note_id = store
            .add_note(NoteDraft::new("Launch risks", "DNS cutover timing").with_project(&project_id))
            .await?;
        Ok((project_id, in_project, standalone, note_id))
    }

    #[tokio::test]
    async fn test_project_patch_round_trip() -> Result<()> {
        let (backend, store) = signed_in_store().await?;
        let project_id = store
            .add_project(
                "Website refresh",
                Some("Ship the new marketing site".to_string()),
                "#3b82f6",
            )
            .await?;

        store
            .update_project(&project_id, ProjectPatch::new().with_name("Site refresh"))
            .await?;
        settle().await;

        let state = store.snapshot().await;
        let project = state.projects.get(&project_id).unwrap();
        assert_eq!(project.name, "Site refresh");
        assert_eq!(project.goal.as_deref(), Some("Ship the new marketing site"));
        assert_eq!(project.status, ProjectStatus::Active);
        let row = backend.row(Collection::Projects, &project_id).unwrap();
        assert_eq!(row["name"], "Site refresh");

        // An empty patch is a no-op, not an error.
        store.update_project(&project_id, ProjectPatch::new()).await?;
        assert_eq!(
            store.snapshot().await.projects[&project_id].name,
            "Site refresh"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_project_cascades_locally() -> Result<()> {
        let (backend, store) = signed_in_store().await?;
        let (project_id, in_project, standalone, note_id) = project_fixture(&store).await?;
        settle().await;

        store.delete_project(&project_id).await?;
        settle().await;

        let state = store.snapshot().await;
        assert!(!state.projects.contains_key(&project_id));
        assert!(!state.tasks.contains_key(&in_project));
        assert!(!state.notes.contains_key(&note_id));
        assert!(state.tasks.contains_key(&standalone));

        // The client deletes only the project row; dependent rows are the
        // server's cascade.
        assert!(backend.row(Collection::Projects, &project_id).is_none());
        assert!(backend.row(Collection::Tasks, &in_project).is_some());
        assert!(backend.row(Collection::Notes, &note_id).is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_project_delete_restores_dependents() -> Result<()> {
        let (backend, store) = signed_in_store().await?;
        let (project_id, in_project, _standalone, note_id) = project_fixture(&store).await?;
        settle().await;
        let before = store.snapshot().await;

        backend.fail_next(Collection::Projects, WriteOp::Delete);
        let result = store.delete_project(&project_id).await;

        assert!(matches!(result, Err(StoreError::Backend(_))));
        let after = store.snapshot().await;
        assert_eq!(after, before);
        assert!(after.tasks.contains_key(&in_project));
        assert!(after.notes.contains_key(&note_id));
        assert!(backend.row(Collection::Projects, &project_id).is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_note_update_round_trip_and_unknown_id() -> Result<()> {
        let (backend, store) = signed_in_store().await?;
        let note_id = store
            .add_note(NoteDraft::new("Weekly plan", "Top three only"))
            .await?;

        store
            .update_note(&note_id, NotePatch::new().with_body("Top three, nothing else"))
            .await?;
        settle().await;

        assert_eq!(
            store.snapshot().await.notes[&note_id].body,
            "Top three, nothing else"
        );
        let row = backend.row(Collection::Notes, &note_id).unwrap();
        assert_eq!(row["body"], "Top three, nothing else");

        let missing = store
            .update_note("ghost", NotePatch::new().with_title("x"))
            .await;
        assert!(matches!(missing, Err(StoreError::NotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_habit_lifecycle() -> Result<()> {
        let (backend, store) = signed_in_store().await?;
        let habit_id = store
            .add_habit("Morning run", HabitFrequency::Daily, 30)
            .await?;

        store
            .update_habit(&habit_id, HabitPatch::new().with_duration(45))
            .await?;
        settle().await;

        let state = store.snapshot().await;
        let habit = state.habits.get(&habit_id).unwrap();
        assert_eq!(habit.duration_minutes, 45);
        assert_eq!(habit.frequency, HabitFrequency::Daily);
        let row = backend.row(Collection::Habits, &habit_id).unwrap();
        assert_eq!(row["duration_minutes"], 45);

        store.delete_habit(&habit_id).await?;
        assert!(store.snapshot().await.habits.is_empty());
        assert!(backend.rows(Collection::Habits).is_empty());

        // Deleting it again is a quiet no-op.
        store.delete_habit(&habit_id).await?;

        let blank = store.add_habit("  ", HabitFrequency::Weekly, 10).await;
        assert!(matches!(blank, Err(StoreError::Validation(_))));
        Ok(())
    }
}
