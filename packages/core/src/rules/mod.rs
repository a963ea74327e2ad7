//! Pure Domain Rules
//!
//! Stateless functions over the models: role comparisons, reporting-forest
//! traversal, recurrence scheduling, and visibility scoping. Everything here
//! is synchronous and side-effect free; the store composes these into its
//! mutation and query paths.

mod hierarchy;
mod permissions;
mod recurrence;
mod visibility;

pub use hierarchy::{descendants_of, would_create_cycle};
pub use permissions::{assignable_roles, can_assign_manager, can_manage_role, role_priority};
pub use recurrence::{next_due_date, should_recur};
pub use visibility::{derive_visibility, member_visible_to, task_visible_to};
