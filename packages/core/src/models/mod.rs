//! Data Models
//!
//! Domain entities held by the synchronization store:
//!
//! - [`Task`] and its satellite types (status machine, recurrence, AI
//!   analysis metadata)
//! - Team structures: [`TeamMember`], [`UserProfile`], [`Role`]
//! - [`Notification`], [`Invitation`], and the content entities (projects,
//!   notes, habits, inbox captures, activity log)
//!
//! Model structs serialize camelCase, the app-facing JSON shape. The
//! snake_case backend rows, with their uneven timestamp encodings, live
//! behind the codecs in [`wire`].

mod content;
mod invitation;
mod notification;
mod task;
mod team;
pub mod wire;

pub use content::{
    ActivityEntry, ActivityKind, Habit, HabitFrequency, HabitPatch, InboxItem, Note, NoteDraft,
    NotePatch, Project, ProjectPatch, ProjectStatus,
};
pub use invitation::{Invitation, InvitationStatus};
pub use notification::{Notification, NotificationKind};
pub use task::{
    Priority, Recurrence, RecurrenceAnchor, RecurrenceEnd, RecurrenceFrequency, SmartAnalysis,
    Source, Task, TaskDraft, TaskPatch, TaskStatus, Visibility,
};
pub use team::{MemberUpdate, Preferences, Role, TeamMember, Theme, UserProfile};

/// Opaque entity identifier. UUID strings in practice, but never parsed.
pub type EntityId = String;
