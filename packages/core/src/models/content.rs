//! Secondary content entities: projects, notes, habits, inbox captures, and
//! the per-task activity log.

use std::collections::BTreeSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::{Priority, Source};
use super::EntityId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Active,
    Planning,
    Paused,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: EntityId,

    pub name: String,

    #[serde(default)]
    pub status: ProjectStatus,

    /// Display color, hex string.
    pub color: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,

    /// Epoch millis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<i64>,

    pub created_at: i64,

    pub owner_id: EntityId,
}

impl Project {
    pub fn new(
        name: impl Into<String>,
        goal: Option<String>,
        color: impl Into<String>,
        owner_id: impl Into<EntityId>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            status: ProjectStatus::Active,
            color: color.into(),
            goal,
            deadline: None,
            created_at: Utc::now().timestamp_millis(),
            owner_id: owner_id.into(),
        }
    }
}

/// Partial project update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ProjectStatus>,
}

impl ProjectPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_status(mut self, status: ProjectStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.goal.is_none() && self.color.is_none() && self.status.is_none()
    }
}

/// Markdown note, optionally attached to a project or task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: EntityId,

    pub title: String,

    /// Markdown body.
    pub body: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<EntityId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<EntityId>,

    #[serde(default)]
    pub tags: BTreeSet<String>,

    pub created_at: i64,

    pub updated_at: i64,

    pub owner_id: EntityId,
}

impl Note {
    pub fn new(
        title: impl Into<String>,
        body: impl Into<String>,
        owner_id: impl Into<EntityId>,
    ) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            body: body.into(),
            project_id: None,
            task_id: None,
            tags: BTreeSet::new(),
            created_at: now,
            updated_at: now,
            owner_id: owner_id.into(),
        }
    }

    /// Materialize a draft owned by `owner_id`.
    pub fn from_draft(draft: NoteDraft, owner_id: impl Into<EntityId>) -> Self {
        let mut note = Note::new(draft.title, draft.body, owner_id);
        note.project_id = draft.project_id;
        note.task_id = draft.task_id;
        note.tags = draft.tags;
        note
    }

    pub fn with_project(mut self, project_id: impl Into<EntityId>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_task(mut self, task_id: impl Into<EntityId>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }
}

/// Input for creating a note.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteDraft {
    pub title: String,

    #[serde(default)]
    pub body: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<EntityId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<EntityId>,

    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl NoteDraft {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn with_project(mut self, project_id: impl Into<EntityId>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_task(mut self, task_id: impl Into<EntityId>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }
}

/// Partial note update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeSet<String>>,
}

impl NotePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.body.is_none() && self.tags.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HabitFrequency {
    #[default]
    Daily,
    Weekly,
    Custom,
}

/// Recurring personal routine. Unlike task recurrence, habits have no
/// completion lifecycle; they are standing entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Habit {
    pub id: EntityId,

    pub name: String,

    #[serde(default)]
    pub frequency: HabitFrequency,

    pub duration_minutes: u32,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,

    pub created_at: i64,

    pub owner_id: EntityId,
}

impl Habit {
    pub fn new(
        name: impl Into<String>,
        frequency: HabitFrequency,
        duration_minutes: u32,
        owner_id: impl Into<EntityId>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            frequency,
            duration_minutes,
            priority: Priority::default(),
            color: None,
            created_at: Utc::now().timestamp_millis(),
            owner_id: owner_id.into(),
        }
    }
}

/// Partial habit update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<HabitFrequency>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl HabitPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_duration(mut self, minutes: u32) -> Self {
        self.duration_minutes = Some(minutes);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.frequency.is_none()
            && self.duration_minutes.is_none()
            && self.priority.is_none()
            && self.color.is_none()
    }
}

/// A raw capture waiting to be triaged into a task or note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxItem {
    pub id: EntityId,

    pub text: String,

    #[serde(default)]
    pub source: Source,

    /// Set once the capture has been converted or dismissed.
    #[serde(default)]
    pub processed: bool,

    pub created_at: i64,

    pub owner_id: EntityId,
}

impl InboxItem {
    pub fn new(text: impl Into<String>, source: Source, owner_id: impl Into<EntityId>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            source,
            processed: false,
            created_at: Utc::now().timestamp_millis(),
            owner_id: owner_id.into(),
        }
    }
}

/// What an activity entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Comment,
    StatusChange,
    /// A requested completion was downgraded to review. Logged distinctly
    /// from a plain status change.
    ReviewRequest,
    Assignment,
    Creation,
    Update,
}

/// One line of a task's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub id: EntityId,

    pub task_id: EntityId,

    /// Actor.
    pub user_id: EntityId,

    pub kind: ActivityKind,

    pub content: String,

    /// Structured details, e.g. `{"old": "todo", "new": "done"}`.
    #[serde(default)]
    pub metadata: serde_json::Value,

    pub created_at: i64,
}

impl ActivityEntry {
    pub fn new(
        task_id: impl Into<EntityId>,
        user_id: impl Into<EntityId>,
        kind: ActivityKind,
        content: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            user_id: user_id.into(),
            kind,
            content: content.into(),
            metadata,
            created_at: Utc::now().timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_project_defaults_active() {
        let project = Project::new("Launch", None, "#6366f1", "u1");
        assert_eq!(project.status, ProjectStatus::Active);
        assert!(project.deadline.is_none());
    }

    #[test]
    fn test_capture_starts_unprocessed() {
        let item = InboxItem::new("call the vendor", Source::Voice, "u1");
        assert!(!item.processed);
        assert_eq!(item.source, Source::Voice);
    }

    #[test]
    fn test_activity_kind_wire_names() {
        assert_eq!(
            serde_json::to_value(ActivityKind::ReviewRequest).unwrap(),
            json!("review_request")
        );
    }
}
