//! Inbox capture flows: raw text in, tasks and notes out.
//!
//! Covers the conversion fallbacks, pending-list ordering, bulk deletion,
//! and the AI triage path with a scripted provider.

#[cfg(test)]
mod inbox_flow_tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use agenda_core::backend::{Backend, Collection, MemoryBackend};
    use agenda_core::models::{Priority, ProjectPatch, ProjectStatus, Source, TaskDraft, TaskStatus};
    use agenda_core::store::{Store, StoreConfig, StoreError};
    use agenda_core::triage::{TaskSuggestion, TriageContext, TriageError, TriageProvider};
    use anyhow::Result;
    use async_trait::async_trait;
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

    /// Records every call and replays a fixed script.
    struct ScriptedProvider {
        suggestions: Vec<TaskSuggestion>,
        calls: Mutex<Vec<(String, TriageContext)>>,
    }

    #[async_trait]
    impl TriageProvider for ScriptedProvider {
        async fn suggest(
            &self,
            input: &str,
            context: &TriageContext,
        ) -> Result<Vec<TaskSuggestion>, TriageError> {
            self.calls
                .lock()
                .unwrap()
                .push((input.to_owned(), context.clone()));
            Ok(self.suggestions.clone())
        }
    }

    #[tokio::test]
    async fn test_convert_to_task_blank_title_falls_back_to_capture_text() -> Result<()> {
        let (backend, store) = signed_in_store().await?;
        let capture_id = store
            .add_capture("Renew the office lease", Source::Manual)
            .await?;

        let task_id = store.convert_to_task(&capture_id, TaskDraft::new("  ")).await?;
        settle().await;

        let state = store.snapshot().await;
        let task = state.tasks.get(&task_id).unwrap();
        assert_eq!(task.title, "Renew the office lease");
        assert_eq!(task.status, TaskStatus::Todo);
        assert!(!state.inbox.contains_key(&capture_id));
        assert!(backend.row(Collection::InboxItems, &capture_id).is_none());
        assert!(backend.row(Collection::Tasks, &task_id).is_some());

        // The promoted task gets a creation entry like any other add.
        let logged = backend.rows(Collection::ActivityLogs);
        assert!(logged
            .iter()
            .any(|row| row["task_id"] == task_id && row["type"] == "creation"));

        let missing = store.convert_to_task("ghost", TaskDraft::new("x")).await;
        assert!(matches!(missing, Err(StoreError::NotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_convert_to_note_body_falls_back_to_capture_text() -> Result<()> {
        let (backend, store) = signed_in_store().await?;
        let capture_id = store
            .add_capture("Retro idea: rotate the facilitator weekly", Source::Voice)
            .await?;

        let note_id = store.convert_to_note(&capture_id, "Retro ideas", None).await?;
        settle().await;

        let state = store.snapshot().await;
        let note = state.notes.get(&note_id).unwrap();
        assert_eq!(note.title, "Retro ideas");
        assert_eq!(note.body, "Retro idea: rotate the facilitator weekly");
        assert!(!state.inbox.contains_key(&capture_id));
        assert!(backend.row(Collection::Notes, &note_id).is_some());

        // A blank title is refused before the capture is touched.
        let kept = store.add_capture("Keep me", Source::Manual).await?;
        let result = store.convert_to_note(&kept, "   ", None).await;
        assert!(matches!(result, Err(StoreError::Validation(_))));
        assert!(store.snapshot().await.inbox.contains_key(&kept));
        Ok(())
    }

    #[tokio::test]
    async fn test_pending_captures_newest_first_excluding_processed() -> Result<()> {
        let (backend, store) = signed_in_store().await?;
        let first = store
            .add_capture("Order standing desks", Source::Manual)
            .await?;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = store
            .add_capture("Book the offsite venue", Source::Email)
            .await?;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let third = store
            .add_capture("Ping legal about the NDA", Source::Voice)
            .await?;

        let pending = store.pending_captures().await;
        let order: Vec<&str> = pending.iter().map(|item| item.id.as_str()).collect();
        assert_eq!(order, vec![third.as_str(), second.as_str(), first.as_str()]);

        // Another client marks one processed: it drops out of the pending
        // list but stays in state.
        backend
            .update(
                Collection::InboxItems,
                &second,
                json!({ "processed": true }),
            )
            .await?;
        settle().await;

        let pending = store.pending_captures().await;
        let order: Vec<&str> = pending.iter().map(|item| item.id.as_str()).collect();
        assert_eq!(order, vec![third.as_str(), first.as_str()]);
        assert!(store.snapshot().await.inbox.contains_key(&second));
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_captures_skips_absent_ids() -> Result<()> {
        let (backend, store) = signed_in_store().await?;
        let real = store
            .add_capture("Shred the old receipts", Source::Manual)
            .await?;

        store
            .delete_captures(&[real.clone(), "ghost".to_string()])
            .await?;

        assert!(store.snapshot().await.inbox.is_empty());
        assert!(backend.rows(Collection::InboxItems).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_triage_context_scopes_to_active_projects() -> Result<()> {
        let (_backend, store) = signed_in_store().await?;
        let active = store
            .add_project(
                "Website refresh",
                Some("Ship the new marketing site".to_string()),
                "#3b82f6",
            )
            .await?;
        let archived = store.add_project("Legacy wiki", None, "#64748b").await?;
        store
            .update_project(
                &archived,
                ProjectPatch::new().with_status(ProjectStatus::Archived),
            )
            .await?;
        store.update_ai_context("Prefers short briefs").await?;

        let provider = ScriptedProvider {
            suggestions: vec![TaskSuggestion {
                title: "Refresh the landing hero".to_string(),
                description: Some("The current hero screenshot is a year old".to_string()),
                priority: Priority::High,
                due_date: None,
                project_id: Some(active.clone()),
                assignee_ids: vec!["u1".to_string()],
                reasoning: Some("The note calls the hero dated".to_string()),
            }],
            calls: Mutex::new(Vec::new()),
        };

        let input = "hero section looks dated, someone refresh it";
        let drafts = store.triage_capture(&provider, input).await?;

        assert_eq!(drafts.len(), 1);
        let draft = &drafts[0];
        assert_eq!(draft.title, "Refresh the landing hero");
        assert_eq!(draft.status, Some(TaskStatus::Todo));
        assert!(draft.tags.contains("ai-generated"));
        assert_eq!(draft.project_id.as_deref(), Some(active.as_str()));
        let analysis = draft.smart_analysis.as_ref().unwrap();
        assert_eq!(analysis.confidence, 1.0);
        assert_eq!(analysis.original_context, input);
        assert_eq!(analysis.suggested_assignee_id.as_deref(), Some("u1"));

        {
            let calls = provider.calls.lock().unwrap();
            assert_eq!(calls.len(), 1);
            let (seen_input, context) = &calls[0];
            assert_eq!(seen_input, input);
            // Archived projects never reach the prompt.
            assert_eq!(
                context.projects,
                vec![(active.clone(), "Website refresh".to_string())]
            );
            assert_eq!(
                context.members,
                vec![("u1".to_string(), "Ana Reyes".to_string())]
            );
            assert_eq!(context.role_hint.as_deref(), Some("Prefers short briefs"));
        }

        // Blank input never reaches the provider.
        let drafts = store.triage_capture(&provider, "   ").await?;
        assert!(drafts.is_empty());
        assert_eq!(provider.calls.lock().unwrap().len(), 1);
        Ok(())
    }
}
