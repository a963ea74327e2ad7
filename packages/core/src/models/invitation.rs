//! Team invitations.
//!
//! An invitation binds a signup to its invite through an opaque `token`
//! capability. Sufficiently privileged actors create `Pending` invites
//! directly; unprivileged actors go through the request-access flow, which
//! produces `ApprovalNeeded` entries an executive must approve first.

use serde::{Deserialize, Serialize};

use super::team::Role;
use super::EntityId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    Pending,
    ApprovalNeeded,
    Accepted,
    Revoked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invitation {
    pub id: EntityId,

    /// Capability presented at signup to join under this invite.
    pub token: String,

    pub email: String,

    #[serde(default)]
    pub role: Role,

    pub invited_by: EntityId,

    /// Denormalized from the inviter's profile at fetch time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inviter_name: Option<String>,

    /// Manager the invitee will report to once accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reports_to: Option<EntityId>,

    pub status: InvitationStatus,

    pub created_at: i64,
}

impl Invitation {
    pub fn is_open(&self) -> bool {
        matches!(
            self.status,
            InvitationStatus::Pending | InvitationStatus::ApprovalNeeded
        )
    }
}
