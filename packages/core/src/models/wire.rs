//! Wire-format records and timestamp normalization.
//!
//! Backend rows are snake_case with timestamp encodings that vary by column:
//! some are epoch-millisecond integers, `projects` stores epoch *seconds*,
//! several columns are ISO-8601 strings, and `notifications` /
//! `activity_logs` are stamped server-side. The decode path is uniformly
//! lenient (every timestamp column goes through [`WireStamp`], which accepts
//! any of those shapes), while the encode path reproduces each column's
//! historical encoding exactly so rows written here round-trip through every
//! other reader of the same tables.
//!
//! Hydration is the single normalization point between rows and models.
//! Only three field names differ: `user_id` becomes `owner_id`, `full_name`
//! becomes `name`, and `avatar_url` becomes `avatar`.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};

use super::content::{
    ActivityEntry, ActivityKind, Habit, HabitFrequency, InboxItem, Note, Project, ProjectStatus,
};
use super::invitation::{Invitation, InvitationStatus};
use super::notification::{Notification, NotificationKind};
use super::task::{Priority, Recurrence, SmartAnalysis, Source, Task, TaskStatus, Visibility};
use super::team::{Preferences, Role, TeamMember, UserProfile};
use super::EntityId;

/// Numeric values above this are already milliseconds; below, epoch seconds.
/// The boundary sits in the year 5138 for seconds and 1973 for millis, so
/// every plausible timestamp lands on the right side.
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// A timestamp as it may appear on the wire.
///
/// Decodes from an integer, a float (JSON numbers survive some proxies as
/// doubles), or a string. Zero and unparseable values decode to "absent".
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WireStamp {
    Int(i64),
    Float(f64),
    Text(String),
}

impl WireStamp {
    /// Normalize to epoch milliseconds. `None` for zero/empty/unparseable.
    pub fn into_millis(self) -> Option<i64> {
        match self {
            WireStamp::Int(n) => normalize_numeric(n),
            WireStamp::Float(f) => {
                if f.is_finite() {
                    normalize_numeric(f.round() as i64)
                } else {
                    None
                }
            }
            WireStamp::Text(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return None;
                }
                if let Ok(n) = trimmed.parse::<i64>() {
                    return normalize_numeric(n);
                }
                if let Ok(f) = trimmed.parse::<f64>() {
                    if f.is_finite() {
                        return normalize_numeric(f.round() as i64);
                    }
                }
                parse_iso(trimmed)
            }
        }
    }
}

fn normalize_numeric(n: i64) -> Option<i64> {
    if n == 0 {
        return None;
    }
    if n.abs() > MILLIS_THRESHOLD {
        Some(n)
    } else {
        n.checked_mul(1000)
    }
}

/// ISO-8601 / RFC 3339 first, then the `YYYY-MM-DD HH:MM:SS[.fff]` shape
/// some stores emit (interpreted as UTC), then a bare date at UTC midnight.
fn parse_iso(text: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp_millis());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(naive.and_utc().timestamp_millis());
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|naive| naive.and_utc().timestamp_millis());
    }
    None
}

/// Lenient required-timestamp deserializer for fields embedded in model
/// structs (e.g. recurrence end dates inside the recurrence blob).
pub(crate) fn de_millis<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let stamp = WireStamp::deserialize(deserializer)?;
    stamp
        .into_millis()
        .ok_or_else(|| serde::de::Error::custom("unrecognized timestamp"))
}

/// Epoch millis to the RFC 3339 string our ISO columns carry
/// (`2025-06-01T12:00:00.000Z`).
pub fn iso_string(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Epoch millis to the whole-second integers the `projects` table carries.
pub fn to_seconds(millis: i64) -> i64 {
    (millis as f64 / 1000.0).round() as i64
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn stamp_or_now(stamp: Option<WireStamp>) -> i64 {
    stamp
        .and_then(WireStamp::into_millis)
        .unwrap_or_else(now_millis)
}

fn stamp_opt(stamp: Option<WireStamp>) -> Option<i64> {
    stamp.and_then(WireStamp::into_millis)
}

// ---------------------------------------------------------------------------
// Decode: one record struct per table, hydrated into the model type.
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TaskRecord {
    id: EntityId,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    status: TaskStatus,
    #[serde(default)]
    priority: Priority,
    #[serde(default)]
    user_id: EntityId,
    #[serde(default)]
    assignee_ids: BTreeSet<EntityId>,
    #[serde(default)]
    visibility: Visibility,
    #[serde(default)]
    project_id: Option<EntityId>,
    #[serde(default)]
    due_date: Option<WireStamp>,
    #[serde(default)]
    created_at: Option<WireStamp>,
    #[serde(default)]
    updated_at: Option<WireStamp>,
    #[serde(default)]
    completed_at: Option<WireStamp>,
    #[serde(default)]
    accepted_at: Option<WireStamp>,
    #[serde(default)]
    tags: BTreeSet<String>,
    #[serde(default)]
    recurrence: Option<Recurrence>,
    #[serde(default)]
    original_task_id: Option<EntityId>,
    #[serde(default)]
    estimated_minutes: Option<u32>,
    #[serde(default)]
    source: Source,
    #[serde(default)]
    smart_analysis: Option<SmartAnalysis>,
}

impl TaskRecord {
    fn hydrate(self) -> Task {
        Task {
            id: self.id,
            title: self.title,
            description: self.description,
            status: self.status,
            priority: self.priority,
            owner_id: self.user_id,
            assignee_ids: self.assignee_ids,
            visibility: self.visibility,
            project_id: self.project_id,
            due_date: stamp_opt(self.due_date),
            created_at: stamp_or_now(self.created_at),
            updated_at: stamp_or_now(self.updated_at),
            completed_at: stamp_opt(self.completed_at),
            accepted_at: stamp_opt(self.accepted_at),
            tags: self.tags,
            recurrence: self.recurrence,
            original_task_id: self.original_task_id,
            estimated_minutes: self.estimated_minutes,
            source: self.source,
            smart_analysis: self.smart_analysis,
        }
    }
}

#[derive(Debug, Deserialize)]
struct InboxRecord {
    id: EntityId,
    #[serde(default)]
    text: String,
    #[serde(default)]
    source: Source,
    #[serde(default)]
    processed: bool,
    #[serde(default)]
    created_at: Option<WireStamp>,
    #[serde(default)]
    user_id: EntityId,
}

impl InboxRecord {
    fn hydrate(self) -> InboxItem {
        InboxItem {
            id: self.id,
            text: self.text,
            source: self.source,
            processed: self.processed,
            created_at: stamp_or_now(self.created_at),
            owner_id: self.user_id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProjectRecord {
    id: EntityId,
    #[serde(default)]
    name: String,
    #[serde(default)]
    status: ProjectStatus,
    #[serde(default)]
    color: String,
    #[serde(default)]
    goal: Option<String>,
    #[serde(default)]
    deadline: Option<WireStamp>,
    #[serde(default)]
    created_at: Option<WireStamp>,
    #[serde(default)]
    user_id: EntityId,
}

impl ProjectRecord {
    fn hydrate(self) -> Project {
        Project {
            id: self.id,
            name: self.name,
            status: self.status,
            color: self.color,
            goal: self.goal,
            deadline: stamp_opt(self.deadline),
            created_at: stamp_or_now(self.created_at),
            owner_id: self.user_id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct NoteRecord {
    id: EntityId,
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    project_id: Option<EntityId>,
    #[serde(default)]
    task_id: Option<EntityId>,
    #[serde(default)]
    tags: BTreeSet<String>,
    #[serde(default)]
    created_at: Option<WireStamp>,
    #[serde(default)]
    updated_at: Option<WireStamp>,
    #[serde(default)]
    user_id: EntityId,
}

impl NoteRecord {
    fn hydrate(self) -> Note {
        Note {
            id: self.id,
            title: self.title,
            body: self.body,
            project_id: self.project_id,
            task_id: self.task_id,
            tags: self.tags,
            created_at: stamp_or_now(self.created_at),
            updated_at: stamp_or_now(self.updated_at),
            owner_id: self.user_id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct HabitRecord {
    id: EntityId,
    #[serde(default)]
    name: String,
    #[serde(default)]
    frequency: HabitFrequency,
    #[serde(default)]
    duration_minutes: u32,
    #[serde(default)]
    priority: Priority,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    created_at: Option<WireStamp>,
    #[serde(default)]
    user_id: EntityId,
}

impl HabitRecord {
    fn hydrate(self) -> Habit {
        Habit {
            id: self.id,
            name: self.name,
            frequency: self.frequency,
            duration_minutes: self.duration_minutes,
            priority: self.priority,
            color: self.color,
            created_at: stamp_or_now(self.created_at),
            owner_id: self.user_id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProfileRecord {
    id: EntityId,
    #[serde(default)]
    full_name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    role: Role,
    #[serde(default)]
    reports_to: Option<EntityId>,
    #[serde(default)]
    avatar_url: Option<String>,
    #[serde(default)]
    preferences: Option<Preferences>,
}

impl ProfileRecord {
    fn member(self) -> TeamMember {
        TeamMember {
            id: self.id,
            name: self.full_name,
            email: self.email,
            role: self.role,
            reports_to: self.reports_to,
            avatar: self.avatar_url,
        }
    }

    fn profile(self) -> UserProfile {
        UserProfile {
            id: self.id,
            name: self.full_name,
            email: self.email,
            role: self.role,
            avatar: self.avatar_url,
            preferences: self.preferences.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct NotificationRecord {
    id: EntityId,
    #[serde(default)]
    user_id: EntityId,
    #[serde(rename = "type")]
    kind: NotificationKind,
    #[serde(default)]
    title: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    read: bool,
    #[serde(default)]
    created_at: Option<WireStamp>,
}

impl NotificationRecord {
    fn hydrate(self) -> Notification {
        Notification {
            id: self.id,
            user_id: self.user_id,
            kind: self.kind,
            title: self.title,
            message: self.message,
            link: self.link,
            read: self.read,
            created_at: stamp_or_now(self.created_at),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ActivityRecord {
    id: EntityId,
    #[serde(default)]
    task_id: EntityId,
    #[serde(default)]
    user_id: EntityId,
    #[serde(rename = "type")]
    kind: ActivityKind,
    #[serde(default)]
    content: String,
    #[serde(default)]
    metadata: Value,
    #[serde(default)]
    created_at: Option<WireStamp>,
}

impl ActivityRecord {
    fn hydrate(self) -> ActivityEntry {
        ActivityEntry {
            id: self.id,
            task_id: self.task_id,
            user_id: self.user_id,
            kind: self.kind,
            content: self.content,
            metadata: self.metadata,
            created_at: stamp_or_now(self.created_at),
        }
    }
}

#[derive(Debug, Deserialize)]
struct InvitationRecord {
    id: EntityId,
    #[serde(default)]
    token: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    role: Role,
    #[serde(default)]
    invited_by: EntityId,
    #[serde(default)]
    inviter_name: Option<String>,
    #[serde(default)]
    reports_to: Option<EntityId>,
    status: InvitationStatus,
    #[serde(default)]
    created_at: Option<WireStamp>,
}

impl InvitationRecord {
    fn hydrate(self) -> Invitation {
        Invitation {
            id: self.id,
            token: self.token,
            email: self.email,
            role: self.role,
            invited_by: self.invited_by,
            inviter_name: self.inviter_name,
            reports_to: self.reports_to,
            status: self.status,
            created_at: stamp_or_now(self.created_at),
        }
    }
}

pub fn hydrate_task(row: Value) -> serde_json::Result<Task> {
    serde_json::from_value::<TaskRecord>(row).map(TaskRecord::hydrate)
}

pub fn hydrate_capture(row: Value) -> serde_json::Result<InboxItem> {
    serde_json::from_value::<InboxRecord>(row).map(InboxRecord::hydrate)
}

pub fn hydrate_project(row: Value) -> serde_json::Result<Project> {
    serde_json::from_value::<ProjectRecord>(row).map(ProjectRecord::hydrate)
}

pub fn hydrate_note(row: Value) -> serde_json::Result<Note> {
    serde_json::from_value::<NoteRecord>(row).map(NoteRecord::hydrate)
}

pub fn hydrate_habit(row: Value) -> serde_json::Result<Habit> {
    serde_json::from_value::<HabitRecord>(row).map(HabitRecord::hydrate)
}

pub fn hydrate_member(row: Value) -> serde_json::Result<TeamMember> {
    serde_json::from_value::<ProfileRecord>(row).map(ProfileRecord::member)
}

pub fn hydrate_profile(row: Value) -> serde_json::Result<UserProfile> {
    serde_json::from_value::<ProfileRecord>(row).map(ProfileRecord::profile)
}

pub fn hydrate_notification(row: Value) -> serde_json::Result<Notification> {
    serde_json::from_value::<NotificationRecord>(row).map(NotificationRecord::hydrate)
}

pub fn hydrate_activity(row: Value) -> serde_json::Result<ActivityEntry> {
    serde_json::from_value::<ActivityRecord>(row).map(ActivityRecord::hydrate)
}

pub fn hydrate_invitation(row: Value) -> serde_json::Result<Invitation> {
    serde_json::from_value::<InvitationRecord>(row).map(InvitationRecord::hydrate)
}

// ---------------------------------------------------------------------------
// Encode: full rows for inserts and whole-record updates. Partial updates
// are built inline at the call sites.
// ---------------------------------------------------------------------------

/// Tasks: BIGINT millis for `created_at` / `due_date` / `completed_at`,
/// ISO strings for `updated_at` / `accepted_at`.
pub fn task_row(task: &Task) -> Value {
    json!({
        "id": task.id,
        "title": task.title,
        "description": task.description,
        "status": task.status,
        "priority": task.priority,
        "user_id": task.owner_id,
        "assignee_ids": task.assignee_ids,
        "visibility": task.visibility,
        "project_id": task.project_id,
        "due_date": task.due_date,
        "created_at": task.created_at,
        "updated_at": iso_string(task.updated_at),
        "completed_at": task.completed_at,
        "accepted_at": task.accepted_at.map(iso_string),
        "tags": task.tags,
        "recurrence": task.recurrence,
        "original_task_id": task.original_task_id,
        "estimated_minutes": task.estimated_minutes,
        "source": task.source,
        "smart_analysis": task.smart_analysis,
    })
}

pub fn capture_row(item: &InboxItem) -> Value {
    json!({
        "id": item.id,
        "text": item.text,
        "source": item.source,
        "processed": item.processed,
        "created_at": item.created_at,
        "user_id": item.owner_id,
    })
}

/// Projects: the one table keeping epoch *seconds*.
pub fn project_row(project: &Project) -> Value {
    json!({
        "id": project.id,
        "name": project.name,
        "status": project.status,
        "color": project.color,
        "goal": project.goal,
        "deadline": project.deadline.map(to_seconds),
        "created_at": to_seconds(project.created_at),
        "user_id": project.owner_id,
    })
}

pub fn note_row(note: &Note) -> Value {
    json!({
        "id": note.id,
        "title": note.title,
        "body": note.body,
        "project_id": note.project_id,
        "task_id": note.task_id,
        "tags": note.tags,
        "created_at": note.created_at,
        "updated_at": iso_string(note.updated_at),
        "user_id": note.owner_id,
    })
}

pub fn habit_row(habit: &Habit) -> Value {
    json!({
        "id": habit.id,
        "name": habit.name,
        "frequency": habit.frequency,
        "duration_minutes": habit.duration_minutes,
        "priority": habit.priority,
        "color": habit.color,
        "created_at": habit.created_at,
        "user_id": habit.owner_id,
    })
}

/// Profile rows never carry client timestamps.
pub fn profile_row(profile: &UserProfile, reports_to: Option<&EntityId>) -> Value {
    json!({
        "id": profile.id,
        "full_name": profile.name,
        "email": profile.email,
        "role": profile.role,
        "reports_to": reports_to,
        "avatar_url": profile.avatar,
        "preferences": profile.preferences,
    })
}

/// Notifications: `created_at` is stamped server-side, so it is omitted.
pub fn notification_row(notification: &Notification) -> Value {
    json!({
        "id": notification.id,
        "user_id": notification.user_id,
        "type": notification.kind,
        "title": notification.title,
        "message": notification.message,
        "link": notification.link,
        "read": notification.read,
    })
}

/// Activity rows: `created_at` is stamped server-side, so it is omitted.
pub fn activity_row(entry: &ActivityEntry) -> Value {
    json!({
        "id": entry.id,
        "task_id": entry.task_id,
        "user_id": entry.user_id,
        "type": entry.kind,
        "content": entry.content,
        "metadata": entry.metadata,
    })
}

/// The AI-context metadata record, keyed by `user_id` (upserted).
pub fn ai_metadata_row(user_id: &str, context: &str) -> Value {
    json!({
        "user_id": user_id,
        "ai_context": context,
        "updated_at": iso_string(now_millis()),
    })
}
