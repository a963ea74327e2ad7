//! Visibility rules.
//!
//! `derive_visibility` is the single home of the "non-owner assignees force
//! team visibility" conditional; every mutation path calls it rather than
//! restating it. The viewer-side checks scope what non-executive roles see:
//! their own work, work assigned to them, and everything owned inside their
//! reporting subtree.

use std::collections::{BTreeSet, HashMap};

use crate::models::{EntityId, Role, Task, TeamMember, Visibility};

use super::hierarchy::descendants_of;

/// The one visibility conditional: `Team` whenever any assignee differs
/// from the owner, otherwise the explicit wish (default `Private`).
pub fn derive_visibility(
    owner_id: &str,
    assignee_ids: &BTreeSet<EntityId>,
    explicit: Option<Visibility>,
) -> Visibility {
    let has_other_assignees = assignee_ids.iter().any(|id| id != owner_id);
    if has_other_assignees {
        Visibility::Team
    } else {
        explicit.unwrap_or_default()
    }
}

/// May `viewer_id` see this task?
///
/// Executives see everything. Everyone else sees tasks they own, tasks
/// assigned to them, and every task whose owner sits in their reporting
/// subtree; a manager's view of a report's work does not depend on the
/// task's visibility marker.
pub fn task_visible_to(
    viewer_id: &str,
    viewer_role: Role,
    task: &Task,
    members: &HashMap<EntityId, TeamMember>,
) -> bool {
    if viewer_role.is_executive() {
        return true;
    }
    if task.owner_id == viewer_id || task.assignee_ids.contains(viewer_id) {
        return true;
    }
    descendants_of(viewer_id, members).contains(&task.owner_id)
}

/// May `viewer_id` see `member_id` in the roster? Executives see the whole
/// team; everyone else sees their own subtree (which includes themselves).
pub fn member_visible_to(
    viewer_id: &str,
    viewer_role: Role,
    member_id: &str,
    members: &HashMap<EntityId, TeamMember>,
) -> bool {
    if viewer_role.is_executive() {
        return true;
    }
    descendants_of(viewer_id, members).contains(member_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TaskDraft, Visibility};

    fn member(id: &str, role: Role, reports_to: Option<&str>) -> TeamMember {
        TeamMember {
            id: id.to_string(),
            name: id.to_uppercase(),
            email: format!("{id}@example.com"),
            role,
            reports_to: reports_to.map(str::to_string),
            avatar: None,
        }
    }

    fn assignees(ids: &[&str]) -> BTreeSet<EntityId> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn test_non_owner_assignee_forces_team() {
        assert_eq!(
            derive_visibility("u1", &assignees(&["u2"]), Some(Visibility::Private)),
            Visibility::Team
        );
    }

    #[test]
    fn test_self_assignment_keeps_explicit_choice() {
        assert_eq!(
            derive_visibility("u1", &assignees(&["u1"]), None),
            Visibility::Private
        );
        assert_eq!(
            derive_visibility("u1", &assignees(&[]), Some(Visibility::Team)),
            Visibility::Team
        );
    }

    #[test]
    fn test_managers_see_subtree_tasks_even_private_ones() {
        // m reports to lead, lead reports to head.
        let team: HashMap<EntityId, TeamMember> = [
            member("head", Role::Head, None),
            member("lead", Role::Lead, Some("head")),
            member("m", Role::Member, Some("lead")),
            member("stranger", Role::Member, None),
        ]
        .into_iter()
        .map(|m| (m.id.clone(), m))
        .collect();

        let task = Task::from_draft(
            TaskDraft::new("private work"),
            "m".to_string(),
            Visibility::Private,
        );

        assert!(task_visible_to("lead", Role::Lead, &task, &team));
        assert!(task_visible_to("head", Role::Head, &task, &team));
        assert!(!task_visible_to("stranger", Role::Member, &task, &team));
    }

    #[test]
    fn test_assignment_grants_visibility_outside_subtree() {
        let team: HashMap<EntityId, TeamMember> = [
            member("a", Role::Member, None),
            member("b", Role::Member, None),
        ]
        .into_iter()
        .map(|m| (m.id.clone(), m))
        .collect();

        let mut task = Task::from_draft(
            TaskDraft::new("shared work"),
            "a".to_string(),
            Visibility::Team,
        );
        task.assignee_ids = assignees(&["b"]);

        assert!(task_visible_to("b", Role::Member, &task, &team));

        task.assignee_ids.clear();
        assert!(!task_visible_to("b", Role::Member, &task, &team));
    }

    #[test]
    fn test_member_roster_scoping() {
        let team: HashMap<EntityId, TeamMember> = [
            member("head", Role::Head, None),
            member("lead", Role::Lead, Some("head")),
            member("m", Role::Member, Some("lead")),
        ]
        .into_iter()
        .map(|m| (m.id.clone(), m))
        .collect();

        assert!(member_visible_to("lead", Role::Lead, "m", &team));
        assert!(member_visible_to("lead", Role::Lead, "lead", &team));
        assert!(!member_visible_to("m", Role::Member, "lead", &team));
        assert!(member_visible_to("head", Role::Head, "m", &team));
    }
}
