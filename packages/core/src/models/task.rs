//! Task model and its satellite types.
//!
//! A task is owned by its creator forever (`owner_id` never changes) and
//! worked on by the users in `assignee_ids`. Two derived invariants are
//! maintained by every mutation path:
//!
//! - `visibility` is `Team` whenever any assignee is not the owner
//!   (see [`crate::rules::derive_visibility`])
//! - `completed_at` is set if and only if `status` is [`TaskStatus::Done`]
//!
//! Completion of a recurring task spawns a successor task linked to the
//! series root through `original_task_id`; the completed instance itself is
//! never mutated beyond being marked done.

use std::collections::BTreeSet;

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use super::wire::de_millis;
use super::EntityId;

/// Workflow state of a task.
///
/// `Done` is special: every transition into it goes through the backend's
/// atomic completion procedure, and non-owners requesting it are downgraded
/// to `Review` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Backlog,
    Todo,
    InProgress,
    Review,
    Done,
    Snoozed,
}

impl TaskStatus {
    /// Stable wire/display name (`"in_progress"` etc.).
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Backlog => "backlog",
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Review => "review",
            TaskStatus::Done => "done",
            TaskStatus::Snoozed => "snoozed",
        }
    }

    /// Human-readable form with the underscore spelled as a space.
    pub fn display(&self) -> &'static str {
        match self {
            TaskStatus::InProgress => "in progress",
            other => other.as_str(),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, TaskStatus::Done)
    }
}

/// Task priority. `Auto` defers the choice to the AI triage layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
    Auto,
}

/// Who may see a task beyond its owner. Derived, never set directly once
/// non-owner assignees exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Private,
    Team,
}

/// Where an entity entered the system. `System` marks recurrence successors
/// and other store-generated records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    #[default]
    Manual,
    Email,
    System,
    Voice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceFrequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

/// What the next occurrence is anchored to.
///
/// Serialized under the wire key `"type"` as `on_schedule` / `on_completion`,
/// matching the persisted recurrence blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RecurrenceAnchor {
    /// Advance from the previous due date, landing on UTC midnight.
    #[default]
    #[serde(rename = "on_schedule")]
    Schedule,
    /// Advance from the completion instant, preserving its time of day.
    #[serde(rename = "on_completion")]
    Completion,
}

/// End condition of a recurrence series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecurrenceEnd {
    /// The series stops once this instant (epoch millis) has passed.
    Date {
        #[serde(deserialize_with = "de_millis")]
        value: i64,
    },
}

fn default_interval() -> u32 {
    1
}

/// Recurrence rule attached to a task.
///
/// Stored as a JSON blob on the task row, so the serde shape here *is* the
/// persisted shape: camelCase keys, the anchor under `"type"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recurrence {
    pub frequency: RecurrenceFrequency,

    /// Every N days/weeks/months/years. Minimum 1.
    #[serde(default = "default_interval")]
    pub interval: u32,

    #[serde(rename = "type", default)]
    pub anchor: RecurrenceAnchor,

    /// Weekly only: selected weekdays, 0 = Sunday through 6 = Saturday.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_of_week: Option<Vec<u8>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_condition: Option<RecurrenceEnd>,
}

impl Recurrence {
    pub fn new(frequency: RecurrenceFrequency) -> Self {
        Self {
            frequency,
            interval: 1,
            anchor: RecurrenceAnchor::default(),
            days_of_week: None,
            end_condition: None,
        }
    }

    pub fn with_interval(mut self, interval: u32) -> Self {
        self.interval = interval.max(1);
        self
    }

    pub fn with_anchor(mut self, anchor: RecurrenceAnchor) -> Self {
        self.anchor = anchor;
        self
    }

    pub fn with_days_of_week(mut self, days: Vec<u8>) -> Self {
        self.days_of_week = Some(days);
        self
    }

    pub fn with_end_date(mut self, millis: i64) -> Self {
        self.end_condition = Some(RecurrenceEnd::Date { value: millis });
        self
    }
}

/// Opaque AI triage metadata carried on a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartAnalysis {
    pub summary: String,

    /// The raw capture text the suggestion was derived from.
    pub original_context: String,

    pub confidence: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,

    pub suggested_priority: Priority,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_assignee_id: Option<EntityId>,
}

/// A task as held in the store and exposed to views.
///
/// Serializes camelCase (the app-facing shape). The snake_case backend row
/// with its mixed timestamp encodings lives behind [`super::wire`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: EntityId,

    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub status: TaskStatus,

    pub priority: Priority,

    /// Creator and owner of record. Immutable for the task's lifetime.
    pub owner_id: EntityId,

    /// Users currently responsible for the work. Ordered set so serialized
    /// output is deterministic.
    #[serde(default)]
    pub assignee_ids: BTreeSet<EntityId>,

    /// Derived: `Team` whenever `assignee_ids` contains a non-owner.
    pub visibility: Visibility,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<EntityId>,

    /// Epoch millis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<i64>,

    pub created_at: i64,

    pub updated_at: i64,

    /// Set if and only if `status == Done`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,

    /// When an assignee claimed/accepted the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<i64>,

    #[serde(default)]
    pub tags: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<Recurrence>,

    /// Root of the recurrence series this instance belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_task_id: Option<EntityId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_minutes: Option<u32>,

    #[serde(default)]
    pub source: Source,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smart_analysis: Option<SmartAnalysis>,
}

impl Task {
    /// Materialize a draft into a full task owned by `owner_id`.
    ///
    /// Fills defaults (status `Backlog`, priority `Medium`), stamps creation
    /// and update times, and applies the caller-derived `visibility`. The
    /// visibility conditional itself lives in
    /// [`crate::rules::derive_visibility`] so this constructor cannot drift
    /// from the other mutation paths.
    pub fn from_draft(draft: TaskDraft, owner_id: EntityId, visibility: Visibility) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            id: Uuid::new_v4().to_string(),
            title: draft.title,
            description: draft.description,
            status: draft.status.unwrap_or_default(),
            priority: draft.priority.unwrap_or_default(),
            owner_id,
            assignee_ids: draft.assignee_ids,
            visibility,
            project_id: draft.project_id,
            due_date: draft.due_date,
            created_at: now,
            updated_at: now,
            completed_at: None,
            accepted_at: None,
            tags: draft.tags,
            recurrence: draft.recurrence,
            original_task_id: draft.original_task_id,
            estimated_minutes: draft.estimated_minutes,
            source: draft.source.unwrap_or_default(),
            smart_analysis: draft.smart_analysis,
        }
    }

    /// Apply a patch in place, stamping `updated_at`.
    ///
    /// Maintains the completion invariant on the way out of `Done` (clears
    /// `completed_at`); callers are responsible for never patching *into*
    /// `Done`, which must go through the atomic completion path.
    pub fn apply_patch(&mut self, patch: &TaskPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(status) = patch.status {
            self.status = status;
            if !status.is_done() {
                self.completed_at = None;
            }
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(assignees) = &patch.assignee_ids {
            self.assignee_ids = assignees.clone();
        }
        if let Some(visibility) = patch.visibility {
            self.visibility = visibility;
        }
        if let Some(project_id) = &patch.project_id {
            self.project_id = project_id.clone();
        }
        if let Some(due_date) = patch.due_date {
            self.due_date = due_date;
        }
        if let Some(tags) = &patch.tags {
            self.tags = tags.clone();
        }
        if let Some(recurrence) = &patch.recurrence {
            self.recurrence = recurrence.clone();
        }
        if let Some(estimated) = patch.estimated_minutes {
            self.estimated_minutes = estimated;
        }
        if let Some(analysis) = &patch.smart_analysis {
            self.smart_analysis = analysis.clone();
        }
        self.updated_at = Utc::now().timestamp_millis();
    }
}

/// Input for creating a task. Everything except the title is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDraft {
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,

    #[serde(default)]
    pub assignee_ids: BTreeSet<EntityId>,

    /// Explicit visibility wish; overridden to `Team` when non-owner
    /// assignees are present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<EntityId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<i64>,

    #[serde(default)]
    pub tags: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<Recurrence>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_task_id: Option<EntityId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_minutes: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smart_analysis: Option<SmartAnalysis>,
}

impl TaskDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_assignees<I>(mut self, assignees: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<EntityId>,
    {
        self.assignee_ids = assignees.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_project(mut self, project_id: impl Into<EntityId>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_due_date(mut self, millis: i64) -> Self {
        self.due_date = Some(millis);
        self
    }

    pub fn with_recurrence(mut self, recurrence: Recurrence) -> Self {
        self.recurrence = Some(recurrence);
        self
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }
}

/// Accepts both a plain value and an explicit null for clearable fields.
///
/// Maps three input states onto the double-Option pattern:
/// - missing field: `None` (leave unchanged)
/// - `null`: `Some(None)` (clear)
/// - value: `Some(Some(value))` (set)
fn deserialize_clearable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    // Missing fields are handled by #[serde(default)] on the struct field.
    Ok(Some(Option::<T>::deserialize(deserializer)?))
}

/// Partial task update for PATCH-style mutations.
///
/// Plain-`Option` fields are set-only; clearable fields use the
/// double-`Option` pattern (`None` = leave unchanged, `Some(None)` = clear,
/// `Some(Some(v))` = set).
///
/// Status is deliberately *not* clearable, and a patch carrying
/// `status = Done` is rejected by the store: completion has its own atomic
/// path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_clearable"
    )]
    pub description: Option<Option<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_ids: Option<BTreeSet<EntityId>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_clearable"
    )]
    pub project_id: Option<Option<EntityId>>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_clearable"
    )]
    pub due_date: Option<Option<i64>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeSet<String>>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_clearable"
    )]
    pub recurrence: Option<Option<Recurrence>>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_clearable"
    )]
    pub estimated_minutes: Option<Option<u32>>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_clearable"
    )]
    pub smart_analysis: Option<Option<SmartAnalysis>>,
}

impl TaskPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_assignees<I>(mut self, assignees: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<EntityId>,
    {
        self.assignee_ids = Some(assignees.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_due_date(mut self, millis: Option<i64>) -> Self {
        self.due_date = Some(millis);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.assignee_ids.is_none()
            && self.visibility.is_none()
            && self.project_id.is_none()
            && self.due_date.is_none()
            && self.tags.is_none()
            && self.recurrence.is_none()
            && self.estimated_minutes.is_none()
            && self.smart_analysis.is_none()
    }
}
