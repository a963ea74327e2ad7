//! Team management: the signed-in profile, member administration, and the
//! invitation lifecycle.
//!
//! Role and hierarchy checks here mirror the server's authorization so the
//! common case fails fast with a precise error; the backend remains the
//! enforcement point. Invitation mutations work on the list as a whole
//! (it is small and fetched newest-first), so their pre-image is the whole
//! list rather than a keyed entry.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::warn;

use super::{Snapshot, StateChange, Store, StoreError};
use crate::backend::{Collection, InviteRequest, SelectFilter};
use crate::models::wire;
use crate::models::{EntityId, Invitation, MemberUpdate, Role, UserProfile};
use crate::rules::{assignable_roles, can_assign_manager, can_manage_role, would_create_cycle};

impl Store {
    // --- Profile ---

    /// Replace the signed-in user's profile (name, role, preferences).
    pub async fn update_profile(&self, profile: UserProfile) -> Result<(), StoreError> {
        if profile.name.trim().is_empty() {
            return Err(StoreError::validation("name cannot be empty"));
        }
        let user = self.require_user().await?;
        if profile.id != user.id {
            return Err(StoreError::validation(
                "profile id does not match the signed-in user",
            ));
        }

        let (prior_user, prior_member, reports_to) = {
            let mut state = self.state.write().await;
            let prior_user = state.user.replace(profile.clone());
            let prior_member = state.team.get(&profile.id).cloned();
            let reports_to = prior_member.as_ref().and_then(|m| m.reports_to.clone());
            state
                .team
                .insert(profile.id.clone(), profile.as_member(reports_to.clone()));
            (prior_user, prior_member, reports_to)
        };
        self.emit(StateChange::Session);
        self.emit(StateChange::Team);

        self.commit(
            Snapshot::profile(prior_user).with_member(&profile.id, prior_member),
            self.backend.update(
                Collection::Profiles,
                &profile.id,
                wire::profile_row(&profile, reports_to.as_ref()),
            ),
        )
        .await?;
        Ok(())
    }

    /// Update the standing AI triage context.
    ///
    /// Remote-first: the metadata record is upserted before local state is
    /// touched, so there is nothing to roll back.
    pub async fn update_ai_context(&self, context: &str) -> Result<(), StoreError> {
        let user = self.require_user().await?;
        self.backend
            .upsert(
                Collection::AiMetadata,
                wire::ai_metadata_row(&user.id, context),
            )
            .await?;

        {
            let mut state = self.state.write().await;
            if let Some(user) = state.user.as_mut() {
                user.preferences.ai_context = Some(context.to_owned());
            }
        }
        self.emit(StateChange::Session);
        Ok(())
    }

    // --- Members ---

    /// Change a member's role and/or manager.
    pub async fn update_member(
        &self,
        member_id: &str,
        update: MemberUpdate,
    ) -> Result<(), StoreError> {
        if update.is_empty() {
            return Ok(());
        }
        let actor = self.require_user().await?;

        let (prior, patch) = {
            let mut state = self.state.write().await;
            let Some(target) = state.team.get(member_id) else {
                return Err(StoreError::not_found("member", member_id));
            };
            if !can_manage_role(actor.role, target.role) {
                return Err(StoreError::permission_denied(
                    "insufficient authority over this member",
                ));
            }
            if let Some(role) = update.role {
                if !assignable_roles(actor.role).contains(&role) {
                    return Err(StoreError::permission_denied(
                        "role is above your authority",
                    ));
                }
            }
            if let Some(Some(manager_id)) = &update.reports_to {
                let Some(manager) = state.team.get(manager_id) else {
                    return Err(StoreError::not_found("member", manager_id));
                };
                if !can_assign_manager(actor.role, manager.role) {
                    return Err(StoreError::permission_denied(
                        "manager outranks your authority",
                    ));
                }
                if would_create_cycle(member_id, manager_id, &state.team) {
                    return Err(StoreError::HierarchyCycle);
                }
            }

            let mut patch = Map::new();
            // The borrow on target ends above; re-borrow mutably to apply.
            let member = state
                .team
                .get_mut(member_id)
                .ok_or_else(|| StoreError::not_found("member", member_id))?;
            let prior = member.clone();
            if let Some(role) = update.role {
                member.role = role;
                patch.insert("role".to_owned(), json!(role));
            }
            if let Some(manager) = update.reports_to {
                member.reports_to = manager.clone();
                patch.insert("reports_to".to_owned(), json!(manager));
            }
            (prior, Value::Object(patch))
        };
        self.emit(StateChange::Team);

        self.commit(
            Snapshot::member(member_id, Some(prior)),
            self.backend.update(Collection::Profiles, member_id, patch),
        )
        .await?;
        Ok(())
    }

    /// Remove a member from the team (administrative).
    pub async fn remove_member(&self, member_id: &str) -> Result<(), StoreError> {
        let actor = self.require_user().await?;
        if actor.id == member_id {
            return Err(StoreError::validation("you cannot remove yourself"));
        }

        let prior = {
            let mut state = self.state.write().await;
            let Some(target) = state.team.get(member_id) else {
                return Err(StoreError::not_found("member", member_id));
            };
            if !can_manage_role(actor.role, target.role) {
                return Err(StoreError::permission_denied(
                    "insufficient authority over this member",
                ));
            }
            state.team.remove(member_id)
        };
        self.emit(StateChange::Team);

        self.commit(
            Snapshot::member(member_id, prior),
            self.backend.delete_user_by_admin(member_id),
        )
        .await?;
        Ok(())
    }

    // --- Invitations ---

    /// Refetch the invitation list and replace it atomically.
    pub async fn fetch_invitations(&self) -> Result<(), StoreError> {
        let rows = self
            .backend
            .select(
                Collection::TeamInvitations,
                SelectFilter::new().newest_first(),
            )
            .await?;
        let invitations: Vec<_> = rows
            .into_iter()
            .filter_map(|row| match wire::hydrate_invitation(row) {
                Ok(invitation) => Some(invitation),
                Err(error) => {
                    warn!(%error, "dropping malformed invitation record");
                    None
                }
            })
            .collect();

        {
            let mut state = self.state.write().await;
            state.invitations = invitations;
        }
        self.emit(StateChange::Invitations);
        Ok(())
    }

    /// Invite `email` to the team.
    ///
    /// Privileged actors create the invitation directly; members file a
    /// request that an executive must approve. An open invitation for the
    /// same address maps to [`StoreError::AlreadyInvited`].
    pub async fn send_invitation(
        &self,
        email: &str,
        role: Role,
        reports_to: Option<EntityId>,
    ) -> Result<(), StoreError> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(StoreError::validation("a valid email address is required"));
        }
        let actor = self.require_user().await?;

        let outcome = if actor.role == Role::Member {
            self.backend.request_invitation(email).await
        } else {
            if !assignable_roles(actor.role).contains(&role) {
                return Err(StoreError::permission_denied(
                    "role is above your authority",
                ));
            }
            self.backend
                .invite_user_direct(InviteRequest {
                    email: email.to_owned(),
                    role,
                    reports_to,
                })
                .await
        };
        match outcome {
            Ok(()) => {}
            Err(error) if error.is_unique_violation() => {
                return Err(StoreError::AlreadyInvited {
                    email: email.to_owned(),
                })
            }
            Err(error) => return Err(error.into()),
        }

        if let Err(error) = self.fetch_invitations().await {
            warn!(%error, "invitation refetch failed after send");
        }
        Ok(())
    }

    /// Approve a pending access request, fixing the role it grants.
    pub async fn approve_invitation(&self, invite_id: &str, role: Role) -> Result<(), StoreError> {
        let actor = self.require_user().await?;
        if !actor.role.is_executive() {
            return Err(StoreError::permission_denied(
                "only executives approve invitations",
            ));
        }
        self.backend.approve_invitation(invite_id, role).await?;
        if let Err(error) = self.fetch_invitations().await {
            warn!(%error, "invitation refetch failed after approval");
        }
        Ok(())
    }

    /// Decline a pending access request.
    pub async fn decline_invitation(&self, invite_id: &str) -> Result<(), StoreError> {
        let prior_list = self.drop_invitation_locally(invite_id).await;
        self.emit(StateChange::Invitations);

        if let Err(error) = self
            .commit(
                Snapshot::invitation_list(prior_list),
                self.backend.decline_invitation(invite_id),
            )
            .await
        {
            self.refetch_invitations_after_failure().await;
            return Err(error);
        }
        Ok(())
    }

    /// Revoke an open invitation.
    ///
    /// The backend reports whether anything was deleted; `false` means the
    /// actor lacked authority (or the invitation was already gone), which
    /// surfaces as a permission error after the optimistic removal is undone.
    pub async fn revoke_invitation(&self, invite_id: &str) -> Result<(), StoreError> {
        let prior_list = self.drop_invitation_locally(invite_id).await;
        self.emit(StateChange::Invitations);

        let removed = match self
            .commit(
                Snapshot::invitation_list(prior_list.clone()),
                self.backend.delete_invitation(invite_id),
            )
            .await
        {
            Ok(removed) => removed,
            Err(error) => {
                self.refetch_invitations_after_failure().await;
                return Err(error);
            }
        };
        if !removed {
            {
                let mut state = self.state.write().await;
                state.invitations = prior_list;
            }
            self.emit(StateChange::Invitations);
            self.refetch_invitations_after_failure().await;
            return Err(StoreError::permission_denied("invitation was not revoked"));
        }
        Ok(())
    }

    /// Redeem an invitation token for the signed-in user, then reload
    /// everything: team membership changed wholesale, so this is the one
    /// flow that ends in a full [`Store::initialize`].
    pub async fn accept_invitation(self: &Arc<Self>, token: &str) -> Result<(), StoreError> {
        let profile_row = self
            .backend
            .authenticated_profile()
            .await?
            .ok_or(StoreError::NotAuthenticated)?;
        let user_id = wire::hydrate_profile(profile_row)
            .map_err(crate::backend::BackendError::from)?
            .id;

        let known_open = {
            let state = self.state.read().await;
            state
                .invitations
                .iter()
                .any(|invitation| invitation.token == token && invitation.is_open())
        };
        if !known_open {
            let rows = self
                .backend
                .select(
                    Collection::TeamInvitations,
                    SelectFilter::new().with_token(token),
                )
                .await?;
            let open = rows
                .into_iter()
                .filter_map(|row| wire::hydrate_invitation(row).ok())
                .any(|invitation| invitation.is_open());
            if !open {
                return Err(StoreError::InvalidInvitation);
            }
        }

        self.backend.accept_team_invitation(token, &user_id).await?;
        self.initialize().await
    }

    async fn drop_invitation_locally(&self, invite_id: &str) -> Vec<Invitation> {
        let mut state = self.state.write().await;
        let prior = state.invitations.clone();
        state
            .invitations
            .retain(|invitation| invitation.id != invite_id);
        prior
    }

    async fn refetch_invitations_after_failure(&self) {
        if let Err(error) = self.fetch_invitations().await {
            warn!(%error, "invitation refetch failed after rollback");
        }
    }
}
