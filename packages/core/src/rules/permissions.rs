//! Role comparison rules.
//!
//! These are a UX convenience mirroring the server's authorization; the
//! backend remains the enforcement point. Two comparisons look similar but
//! differ on purpose:
//!
//! - [`can_manage_role`] is *strict*: a lead cannot manage a peer lead.
//! - [`can_assign_manager`] is *non-strict*: a lead may report to another
//!   lead.

use crate::models::Role;

/// Numeric authority of a role: owner 3, head 2, lead 1, member 0.
/// Unknown roles deserialize to `Member`, so they compare as 0.
pub fn role_priority(role: Role) -> u8 {
    match role {
        Role::Owner => 3,
        Role::Head => 2,
        Role::Lead => 1,
        Role::Member => 0,
    }
}

/// May `actor` change `target`'s role, manager, or membership?
/// Owners always can; everyone else needs strictly higher authority.
pub fn can_manage_role(actor: Role, target: Role) -> bool {
    actor == Role::Owner || role_priority(actor) > role_priority(target)
}

/// Roles `actor` may hand out: everything strictly below their own.
pub fn assignable_roles(actor: Role) -> Vec<Role> {
    [Role::Owner, Role::Head, Role::Lead, Role::Member]
        .into_iter()
        .filter(|role| role_priority(*role) < role_priority(actor))
        .collect()
}

/// May `actor` point someone at a manager holding `manager` role?
/// Non-strict: equal authority qualifies.
pub fn can_assign_manager(actor: Role, manager: Role) -> bool {
    actor == Role::Owner || role_priority(actor) >= role_priority(manager)
}
