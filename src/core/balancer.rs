//! Greedy convergence loop.
//!
//! Two states: `Checking` evaluates the spread of free-percent across the
//! eligible nodes, `Relocating` moves the hungriest not-yet-moved VM to the
//! node with the most absolute headroom. Each VM is considered at most once
//! per cycle, so a cycle moves at most as many VMs as it holds. The loop is
//! additionally bounded by [`MAX_ITERATIONS`].

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::inventory::{Inventory, Node};
use crate::core::resource::Dimension;
use crate::core::vm::VirtualMachine;

/// Hard guard on relocation steps per cycle.
pub const MAX_ITERATIONS: usize = 10_000;

/// Default tolerance in percentage points of free resource.
pub const DEFAULT_BALANCINESS: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Checking,
    Relocating,
}

/// What the convergence loop did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BalanceOutcome {
    /// Relocation steps taken, including steps that picked the VM's own node.
    pub iterations: usize,
    /// Steps that actually changed a VM's target.
    pub relocations: usize,
    /// Whether the final check found the cluster within tolerance.
    pub balanced: bool,
}

/// `min_free_pct + balanciness >= max_free_pct` over all eligible nodes.
pub fn is_balanced(inventory: &Inventory, dimension: Dimension, balanciness: i64) -> bool {
    let percents = inventory.nodes().map(|n| n.resource(dimension).free_percent());
    let (min, max) = percents.fold((i64::MAX, i64::MIN), |(lo, hi), p| (lo.min(p), hi.max(p)));
    if min > max {
        // no nodes
        return true;
    }
    min.saturating_add(balanciness) >= max
}

/// Run the loop until the cluster is balanced, every VM has been
/// considered, or the iteration cap is reached.
pub fn converge(inventory: &mut Inventory, dimension: Dimension, balanciness: i64) -> BalanceOutcome {
    let mut outcome = BalanceOutcome::default();
    let mut processed: HashSet<u32> = HashSet::new();
    let mut state = LoopState::Checking;

    while outcome.iterations < MAX_ITERATIONS {
        match state {
            LoopState::Checking => {
                if is_balanced(inventory, dimension, balanciness) {
                    outcome.balanced = true;
                    break;
                }
                state = LoopState::Relocating;
            }
            LoopState::Relocating => {
                let Some((vmid, vm_name)) = hungriest_vm(inventory, dimension, &processed)
                    .map(|vm| (vm.id, vm.name.clone()))
                else {
                    debug!(%dimension, "every VM has been considered, stopping");
                    break;
                };
                let Some(destination) = roomiest_node(inventory, dimension).map(|n| n.name.clone()) else {
                    break;
                };

                processed.insert(vmid);
                outcome.iterations += 1;
                if inventory.relocate(vmid, &destination, dimension) {
                    outcome.relocations += 1;
                    debug!(vm = %vm_name, vmid, target = %destination, "balancing step");
                }
                state = LoopState::Checking;
            }
        }
    }

    if outcome.iterations >= MAX_ITERATIONS {
        outcome.balanced = is_balanced(inventory, dimension, balanciness);
        warn!(%dimension, iterations = outcome.iterations, "balancing stopped at iteration cap");
    }
    info!(
        %dimension,
        iterations = outcome.iterations,
        relocations = outcome.relocations,
        balanced = outcome.balanced,
        "convergence finished"
    );
    outcome
}

/// Highest `used` among unprocessed VMs; ties go to the smaller name, then id.
fn hungriest_vm<'a>(
    inventory: &'a Inventory,
    dimension: Dimension,
    processed: &HashSet<u32>,
) -> Option<&'a VirtualMachine> {
    inventory
        .vms()
        .filter(|vm| !processed.contains(&vm.id))
        .max_by(|a, b| {
            a.used(dimension)
                .cmp(&b.used(dimension))
                .then_with(|| b.name.cmp(&a.name))
                .then_with(|| b.id.cmp(&a.id))
        })
}

/// Highest absolute `free`; ties go to the smaller node name.
fn roomiest_node(inventory: &Inventory, dimension: Dimension) -> Option<&Node> {
    inventory.nodes().max_by(|a, b| {
        match a.resource(dimension).free().cmp(&b.resource(dimension).free()) {
            Ordering::Equal => b.name.cmp(&a.name),
            other => other,
        }
    })
}
