//! Affinity / anti-affinity reconciliation.
//!
//! Runs strictly after the convergence loop: affinity first, then
//! anti-affinity. Neither pass re-checks the balance threshold, so a
//! group can leave the cluster less balanced than the loop left it.
//!
//! Anti-affinity is a soft guarantee. Every non-anchor member is sent to a
//! random node other than its origin, which separates it from where it
//! started but may land two members of a larger group on the same node.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::core::inventory::Inventory;
use crate::core::resource::Dimension;
use crate::core::vm::VirtualMachine;

/// Group name -> member ids, members ordered by VM name then id.
fn groups_by<F>(inventory: &Inventory, key: F) -> BTreeMap<String, Vec<u32>>
where
    F: Fn(&VirtualMachine) -> Option<&str>,
{
    let mut groups: BTreeMap<String, Vec<&VirtualMachine>> = BTreeMap::new();
    for vm in inventory.vms() {
        if let Some(group) = key(vm) {
            groups.entry(group.to_string()).or_default().push(vm);
        }
    }
    groups
        .into_iter()
        .map(|(group, mut members)| {
            members.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
            (group, members.into_iter().map(|vm| vm.id).collect())
        })
        .collect()
}

/// Pull every member of an affinity group onto the anchor's target node.
pub fn apply_affinity(inventory: &mut Inventory, dimension: Dimension) -> usize {
    let mut moved = 0;
    for (group, members) in groups_by(inventory, |vm| vm.grouping.affinity.as_deref()) {
        let [anchor, rest @ ..] = members.as_slice() else {
            continue;
        };
        if rest.is_empty() {
            continue;
        }
        let Some(anchor_node) = inventory.vm(*anchor).map(|vm| vm.target().to_string()) else {
            continue;
        };
        for vmid in rest {
            if inventory.relocate(*vmid, &anchor_node, dimension) {
                moved += 1;
                debug!(group = %group, vmid, target = %anchor_node, "co-located affinity member");
            }
        }
        info!(group = %group, members = members.len(), node = %anchor_node, "affinity group resolved");
    }
    moved
}

/// Send every non-anchor member of an anti-affinity group to a random
/// eligible node other than its origin.
pub fn apply_anti_affinity<R>(inventory: &mut Inventory, dimension: Dimension, rng: &mut R) -> usize
where
    R: Rng + ?Sized,
{
    let node_names: Vec<String> = inventory.nodes().map(|n| n.name.clone()).collect();
    let mut moved = 0;

    for (group, members) in groups_by(inventory, |vm| vm.grouping.anti_affinity.as_deref()) {
        if members.len() < 2 {
            continue;
        }
        for vmid in &members[1..] {
            let Some(origin) = inventory.vm(*vmid).map(|vm| vm.origin().to_string()) else {
                continue;
            };
            let candidates: Vec<&String> = node_names.iter().filter(|n| **n != origin).collect();
            let Some(destination) = candidates.choose(rng) else {
                warn!(group = %group, vmid, "no node other than the origin is eligible, leaving VM in place");
                continue;
            };
            if inventory.relocate(*vmid, destination, dimension) {
                moved += 1;
                debug!(group = %group, vmid, target = %destination, "separated anti-affinity member");
            }
        }
        info!(group = %group, members = members.len(), "anti-affinity group resolved");
    }
    moved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::grouping::Grouping;
    use crate::core::inventory::Node;
    use crate::core::resource::{Resource, Usage};
    use crate::core::vm::VMResources;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn node(name: &str, used: u64) -> Node {
        Node::new(name, Resource::new(1000, used), Resource::new(0, 0), Resource::new(0, 0))
    }

    fn vm(id: u32, name: &str, node: &str, used: u64, tags: &str) -> VirtualMachine {
        let resources = VMResources {
            memory: Usage::new(used, used),
            ..Default::default()
        };
        VirtualMachine::new(id, name, node, resources).with_grouping(Grouping::from_tags(tags))
    }

    #[test]
    fn affinity_members_end_on_the_anchor_node() {
        let mut inventory = Inventory::new(
            vec![node("pve01", 100), node("pve02", 200), node("pve03", 300)],
            vec![
                vm(1, "app-a", "pve02", 100, "plb_include_app"),
                vm(2, "app-b", "pve01", 100, "plb_include_app"),
                vm(3, "app-c", "pve03", 100, "plb_include_app"),
                vm(4, "solo", "pve03", 200, "plb_include_lonely"),
            ],
        );
        let total = inventory.total_used(Dimension::Memory);

        let moved = apply_affinity(&mut inventory, Dimension::Memory);

        assert_eq!(moved, 2);
        for id in [1, 2, 3] {
            assert_eq!(inventory.vm(id).unwrap().target(), "pve02");
        }
        assert_eq!(inventory.vm(4).unwrap().target(), "pve03");
        assert_eq!(inventory.node("pve02").unwrap().memory.used(), 400);
        assert_eq!(inventory.total_used(Dimension::Memory), total);
    }

    #[test]
    fn affinity_anchors_on_current_target_not_origin() {
        let mut inventory = Inventory::new(
            vec![node("pve01", 100), node("pve02", 100)],
            vec![
                vm(1, "a", "pve01", 100, "plb_include_g"),
                vm(2, "b", "pve01", 0, "plb_include_g"),
            ],
        );
        inventory.relocate(1, "pve02", Dimension::Memory);

        apply_affinity(&mut inventory, Dimension::Memory);

        assert_eq!(inventory.vm(2).unwrap().target(), "pve02");
    }

    #[test]
    fn anti_affinity_never_targets_the_origin() {
        for seed in 0..50 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let mut inventory = Inventory::new(
                vec![node("pve01", 200), node("pve02", 0), node("pve03", 0)],
                vec![
                    vm(1, "db-a", "pve01", 100, "plb_exclude_db"),
                    vm(2, "db-b", "pve01", 100, "plb_exclude_db"),
                ],
            );

            apply_anti_affinity(&mut inventory, Dimension::Memory, &mut rng);

            assert_eq!(inventory.vm(1).unwrap().target(), "pve01");
            assert_ne!(inventory.vm(2).unwrap().target(), "pve01");
            assert_eq!(inventory.total_used(Dimension::Memory), 200);
        }
    }

    #[test]
    fn anti_affinity_is_reproducible_with_a_seed() {
        let build = || {
            Inventory::new(
                vec![node("pve01", 0), node("pve02", 0), node("pve03", 0), node("pve04", 0)],
                (1..=4)
                    .map(|i| vm(i, &format!("db-{i}"), "pve01", 10, "plb_exclude_db"))
                    .collect(),
            )
        };
        let targets = |inventory: &Inventory| {
            inventory.vms().map(|vm| vm.target().to_string()).collect::<Vec<_>>()
        };

        let mut first = build();
        apply_anti_affinity(&mut first, Dimension::Memory, &mut ChaCha8Rng::seed_from_u64(7));
        let mut second = build();
        apply_anti_affinity(&mut second, Dimension::Memory, &mut ChaCha8Rng::seed_from_u64(7));

        assert_eq!(targets(&first), targets(&second));
    }

    #[test]
    fn anti_affinity_with_single_node_leaves_members_in_place() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut inventory = Inventory::new(
            vec![node("pve01", 200)],
            vec![
                vm(1, "db-a", "pve01", 100, "plb_exclude_db"),
                vm(2, "db-b", "pve01", 100, "plb_exclude_db"),
            ],
        );

        assert_eq!(apply_anti_affinity(&mut inventory, Dimension::Memory, &mut rng), 0);
        assert!(inventory.vms().all(|vm| vm.target() == "pve01"));
    }
}
