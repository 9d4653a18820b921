pub mod balancer;
pub mod grouping;
pub mod inventory;
pub mod plan;
pub mod reconcile;
pub mod resource;
pub mod vm;

// the types every stage passes around
pub use balancer::{converge, BalanceOutcome};
pub use inventory::{Exclusions, Inventory, Node};
pub use plan::{MigrationPlan, PlanEntry};
pub use resource::{Dimension, Resource};
pub use vm::{VMResources, VMStatus, VirtualMachine};
