//! AI triage: free text in, ready-to-review task drafts out.
//!
//! The provider is an external collaborator behind [`TriageProvider`]. The
//! store builds the prompt context (active projects, roster, the user's
//! standing context) and maps suggestions to [`TaskDraft`]s, but never adds
//! them itself: the caller reviews the drafts and keeps what it wants.
//! Triage failures carry their own error type, decoupled from the mutation
//! protocol and its rollback semantics.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{EntityId, Priority, SmartAnalysis, TaskDraft, TaskStatus};
use crate::store::Store;

#[derive(Debug, Error)]
pub enum TriageError {
    /// The provider call itself failed (network, quota, model error).
    #[error("Triage provider error: {0}")]
    Provider(String),

    /// The provider answered with something unusable.
    #[error("Invalid triage response: {0}")]
    InvalidResponse(String),
}

impl TriageError {
    pub fn provider(message: impl Into<String>) -> Self {
        TriageError::Provider(message.into())
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        TriageError::InvalidResponse(message.into())
    }
}

/// What the provider gets to work with beyond the raw input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriageContext {
    /// Active projects as (id, name) pairs.
    pub projects: Vec<(EntityId, String)>,
    /// Team roster as (id, name) pairs.
    pub members: Vec<(EntityId, String)>,
    /// The user's standing AI context, when they set one.
    pub role_hint: Option<String>,
}

/// One structured suggestion from the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSuggestion {
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub priority: Priority,

    /// Epoch millis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<i64>,

    /// Must be one of the context's project ids; unknown ids pass through
    /// and fail later validation at add time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<EntityId>,

    #[serde(default)]
    pub assignee_ids: Vec<EntityId>,

    /// Why the provider proposed this task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// The external AI collaborator.
#[async_trait]
pub trait TriageProvider: Send + Sync {
    async fn suggest(
        &self,
        input: &str,
        context: &TriageContext,
    ) -> Result<Vec<TaskSuggestion>, TriageError>;
}

impl Store {
    /// Run `input` through the provider and return drafts ready for
    /// [`Store::add_task`]. Blank input short-circuits to an empty list
    /// without calling the provider. Reads state, never mutates it.
    pub async fn triage_capture(
        &self,
        provider: &dyn TriageProvider,
        input: &str,
    ) -> Result<Vec<TaskDraft>, TriageError> {
        if input.trim().is_empty() {
            return Ok(Vec::new());
        }

        let context = {
            let state = self.state.read().await;
            TriageContext {
                projects: state
                    .projects
                    .values()
                    .filter(|project| {
                        project.status == crate::models::ProjectStatus::Active
                    })
                    .map(|project| (project.id.clone(), project.name.clone()))
                    .collect(),
                members: state
                    .team
                    .values()
                    .map(|member| (member.id.clone(), member.name.clone()))
                    .collect(),
                role_hint: state
                    .user
                    .as_ref()
                    .and_then(|user| user.preferences.ai_context.clone()),
            }
        };

        let suggestions = provider.suggest(input, &context).await?;
        Ok(suggestions
            .into_iter()
            .map(|suggestion| suggestion_to_draft(suggestion, input))
            .collect())
    }
}

fn suggestion_to_draft(suggestion: TaskSuggestion, input: &str) -> TaskDraft {
    let summary = suggestion
        .reasoning
        .clone()
        .unwrap_or_else(|| suggestion.title.clone());
    let analysis = SmartAnalysis {
        summary,
        original_context: input.to_owned(),
        confidence: 1.0,
        reasoning: suggestion.reasoning,
        suggested_priority: suggestion.priority,
        suggested_assignee_id: suggestion.assignee_ids.first().cloned(),
    };

    let mut draft = TaskDraft::new(suggestion.title)
        .with_status(TaskStatus::Todo)
        .with_priority(suggestion.priority)
        .with_assignees(suggestion.assignee_ids)
        .with_tag("ai-generated");
    if let Some(description) = suggestion.description {
        draft = draft.with_description(description);
    }
    if let Some(project_id) = suggestion.project_id {
        draft = draft.with_project(project_id);
    }
    if let Some(due_date) = suggestion.due_date {
        draft = draft.with_due_date(due_date);
    }
    draft.smart_analysis = Some(analysis);
    draft
}
