//! Reporting-forest traversal.
//!
//! Members carry a single optional `reports_to` edge. The forest is stored
//! flat; this module computes transitive descendant sets (used to scope
//! task and member visibility for non-executive roles) and guards manager
//! reassignment against cycles.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::models::{EntityId, TeamMember};

/// Transitive closure of `root_id`'s reports, including `root_id` itself.
///
/// BFS over the inverted `reports_to` edges with a visited set, so cyclic
/// input (which the cycle guard should have prevented, but realtime merges
/// can race) terminates instead of looping. An unknown root yields just
/// `{root_id}`.
pub fn descendants_of(
    root_id: &str,
    members: &HashMap<EntityId, TeamMember>,
) -> HashSet<EntityId> {
    let mut reports: HashMap<&str, Vec<&str>> = HashMap::new();
    for member in members.values() {
        if let Some(manager) = &member.reports_to {
            reports
                .entry(manager.as_str())
                .or_default()
                .push(member.id.as_str());
        }
    }

    let mut seen: HashSet<EntityId> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    seen.insert(root_id.to_string());
    queue.push_back(root_id);

    while let Some(current) = queue.pop_front() {
        if let Some(children) = reports.get(current) {
            for child in children {
                if seen.insert((*child).to_string()) {
                    queue.push_back(child);
                }
            }
        }
    }

    seen
}

/// Would pointing `member_id` at `new_manager_id` close a loop?
/// True for self-management and for any manager already below the member.
pub fn would_create_cycle(
    member_id: &str,
    new_manager_id: &str,
    members: &HashMap<EntityId, TeamMember>,
) -> bool {
    member_id == new_manager_id || descendants_of(member_id, members).contains(new_manager_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn member(id: &str, reports_to: Option<&str>) -> TeamMember {
        TeamMember {
            id: id.to_string(),
            name: id.to_uppercase(),
            email: format!("{id}@example.com"),
            role: Role::Member,
            reports_to: reports_to.map(str::to_string),
            avatar: None,
        }
    }

    fn roster(members: Vec<TeamMember>) -> HashMap<EntityId, TeamMember> {
        members.into_iter().map(|m| (m.id.clone(), m)).collect()
    }

    #[test]
    fn test_chain_descendants() {
        // a <- b <- c
        let team = roster(vec![
            member("a", None),
            member("b", Some("a")),
            member("c", Some("b")),
        ]);

        let of_a = descendants_of("a", &team);
        assert_eq!(of_a.len(), 3);
        assert!(of_a.contains("a") && of_a.contains("b") && of_a.contains("c"));

        let of_b = descendants_of("b", &team);
        assert_eq!(of_b.len(), 2);
        assert!(of_b.contains("b") && of_b.contains("c"));
        assert!(!of_b.contains("a"));

        let of_c = descendants_of("c", &team);
        assert_eq!(of_c.len(), 1);
    }

    #[test]
    fn test_unknown_root_is_singleton() {
        let team = roster(vec![member("a", None)]);
        let set = descendants_of("ghost", &team);
        assert_eq!(set.len(), 1);
        assert!(set.contains("ghost"));
    }

    #[test]
    fn test_cyclic_input_terminates() {
        // a <- b and b <- a: malformed, but traversal must not spin.
        let team = roster(vec![member("a", Some("b")), member("b", Some("a"))]);

        let of_a = descendants_of("a", &team);
        assert!(of_a.contains("a") && of_a.contains("b"));
        assert_eq!(of_a.len(), 2);
    }

    #[test]
    fn test_cycle_guard() {
        let team = roster(vec![
            member("a", None),
            member("b", Some("a")),
            member("c", Some("b")),
        ]);

        assert!(would_create_cycle("a", "a", &team));
        assert!(would_create_cycle("a", "c", &team));
        // Pointing c at a is the existing direction, no cycle.
        assert!(!would_create_cycle("c", "a", &team));
    }

    #[test]
    fn test_branches_do_not_leak_across_siblings() {
        // a <- b, a <- c, b <- d
        let team = roster(vec![
            member("a", None),
            member("b", Some("a")),
            member("c", Some("a")),
            member("d", Some("b")),
        ]);

        let of_b = descendants_of("b", &team);
        assert!(of_b.contains("d"));
        assert!(!of_b.contains("c"));
    }
}
