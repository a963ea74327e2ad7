//! Team membership: roles, members, and the signed-in user's profile.
//!
//! Members form a reporting forest through `reports_to` (one optional edge
//! per member, no cycles). The forest is stored flat; descendant sets are
//! computed on demand by [`crate::rules::descendants_of`].

use serde::{Deserialize, Deserializer, Serialize};

use super::EntityId;

/// Team role, ordered by authority. Unknown strings deserialize to `Member`
/// so a newer backend can introduce roles without breaking older clients
/// (they are simply treated as unprivileged).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Head,
    Lead,
    #[default]
    #[serde(other)]
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Head => "head",
            Role::Lead => "lead",
            Role::Member => "member",
        }
    }

    /// Executive roles see the whole team and every task.
    pub fn is_executive(&self) -> bool {
        matches!(self, Role::Owner | Role::Head)
    }
}

/// A member of the team as seen by everyone else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMember {
    /// User id; shared with the profile record.
    pub id: EntityId,

    pub name: String,

    pub email: String,

    #[serde(default)]
    pub role: Role,

    /// Manager edge of the reporting forest. `None` for roots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reports_to: Option<EntityId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// Color scheme preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

/// Per-user settings carried on the profile record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    /// Let the triage layer pick priorities for `Priority::Auto` tasks.
    #[serde(default)]
    pub auto_prioritize: bool,

    #[serde(default)]
    pub theme: Theme,

    /// Preferred task view (e.g. "list", "board"). Free-form view key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_view_mode: Option<String>,

    /// Standing context handed to the AI triage provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_context: Option<String>,
}

/// The signed-in user. A superset of their [`TeamMember`] record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: EntityId,

    pub name: String,

    pub email: String,

    #[serde(default)]
    pub role: Role,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,

    #[serde(default)]
    pub preferences: Preferences,
}

impl UserProfile {
    /// The member-facing view of this profile.
    pub fn as_member(&self, reports_to: Option<EntityId>) -> TeamMember {
        TeamMember {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role,
            reports_to,
            avatar: self.avatar.clone(),
        }
    }
}

fn deserialize_clearable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Some(Option::<T>::deserialize(deserializer)?))
}

/// Partial member update: role and/or manager. `reports_to` is clearable
/// (`Some(None)` detaches the member from their manager).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_clearable"
    )]
    pub reports_to: Option<Option<EntityId>>,
}

impl MemberUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_manager(mut self, manager: Option<EntityId>) -> Self {
        self.reports_to = Some(manager);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.role.is_none() && self.reports_to.is_none()
    }
}
