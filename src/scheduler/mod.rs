//! One balancing cycle, end to end, and the loop that repeats it.
//!
//! snapshot -> inventory -> convergence -> affinity -> anti-affinity
//! -> plan -> sequential migrations
//!
//! Every cycle builds its own inventory and drops it once the plan has
//! been handed off. Nothing carries over between cycles except the random
//! source used for anti-affinity placement.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::cluster::ClusterApi;
use crate::config::BalancingConfig;
use crate::core::balancer::{converge, BalanceOutcome};
use crate::core::inventory::Inventory;
use crate::core::plan::{MigrationPlan, PlanEntry};
use crate::core::reconcile::{apply_affinity, apply_anti_affinity};
use crate::core::resource::Dimension;
use crate::errors::{BalancerResult, MigrationError};

/// Result of asking the cluster to move one VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOutcome {
    pub entry: PlanEntry,
    /// Task id on success.
    pub result: Result<String, MigrationError>,
}

impl MigrationOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Everything one cycle decided and did.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub dimension: Dimension,
    pub dry_run: bool,
    pub balance: BalanceOutcome,
    /// VMs pulled onto their affinity anchor's node.
    pub affinity_moves: usize,
    /// VMs sent away from their origin by anti-affinity.
    pub anti_affinity_moves: usize,
    pub plan: MigrationPlan,
    /// Empty in dry-run.
    pub outcomes: Vec<MigrationOutcome>,
}

impl CycleReport {
    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|o| !o.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &MigrationOutcome> {
        self.outcomes.iter().filter(|o| !o.is_ok())
    }
}

/// What the planning half of a cycle produced.
#[derive(Debug, Clone)]
pub struct CyclePlan {
    pub balance: BalanceOutcome,
    pub affinity_moves: usize,
    pub anti_affinity_moves: usize,
    pub plan: MigrationPlan,
}

/// Convergence plus reconciliation over an already-built inventory.
pub fn plan_cycle<R>(inventory: &mut Inventory, config: &BalancingConfig, rng: &mut R) -> CyclePlan
where
    R: Rng + ?Sized,
{
    let balance = converge(inventory, config.dimension, config.balanciness);
    let affinity_moves = apply_affinity(inventory, config.dimension);
    let anti_affinity_moves = apply_anti_affinity(inventory, config.dimension, rng);
    CyclePlan {
        balance,
        affinity_moves,
        anti_affinity_moves,
        plan: MigrationPlan::from_inventory(inventory),
    }
}

/// Issue every migration of the plan, one at a time. A failed migration is
/// logged and recorded; the remaining entries still run.
pub async fn execute_plan<C>(api: &C, plan: &MigrationPlan) -> Vec<MigrationOutcome>
where
    C: ClusterApi + ?Sized,
{
    let mut outcomes = Vec::with_capacity(plan.len());
    for entry in plan.entries() {
        info!(vm = %entry.vm, vmid = entry.vmid, origin = %entry.origin, target = %entry.target, "migrating VM");
        let result = api.migrate(&entry.to_request()).await;
        match &result {
            Ok(task) => info!(vm = %entry.vm, vmid = entry.vmid, task = %task, "migration started"),
            Err(e) => error!(vm = %entry.vm, vmid = entry.vmid, error = %e, "migration failed"),
        }
        outcomes.push(MigrationOutcome {
            entry: entry.clone(),
            result,
        });
    }
    outcomes
}

pub struct Scheduler<C, R = StdRng> {
    api: C,
    balancing: BalancingConfig,
    rng: R,
}

impl<C: ClusterApi> Scheduler<C> {
    pub fn new(api: C, balancing: BalancingConfig) -> Self {
        Self::with_rng(api, balancing, StdRng::from_entropy())
    }
}

impl<C: ClusterApi, R: Rng> Scheduler<C, R> {
    pub fn with_rng(api: C, balancing: BalancingConfig, rng: R) -> Self {
        Self { api, balancing, rng }
    }

    pub fn cluster(&self) -> &C {
        &self.api
    }

    pub async fn run_cycle(&mut self, dry_run: bool) -> BalancerResult<CycleReport> {
        let id = Uuid::new_v4();
        let span = info_span!("cycle", %id, dimension = %self.balancing.dimension);
        self.cycle(id, dry_run).instrument(span).await
    }

    async fn cycle(&mut self, id: Uuid, dry_run: bool) -> BalancerResult<CycleReport> {
        let started_at = Utc::now();
        self.api.refresh_session().await?;
        let snapshot = self.api.snapshot().await?;
        let mut inventory = Inventory::build(&snapshot, &self.balancing.exclusions);
        if inventory.is_empty() {
            warn!("no eligible nodes in the cluster");
        }
        info!(
            nodes = inventory.nodes().count(),
            vms = inventory.vms().count(),
            "inventory built"
        );

        let CyclePlan {
            balance,
            affinity_moves,
            anti_affinity_moves,
            plan,
        } = plan_cycle(&mut inventory, &self.balancing, &mut self.rng);
        drop(inventory);
        info!(
            migrations = plan.len(),
            affinity_moves,
            anti_affinity_moves,
            "plan ready"
        );

        let outcomes = if plan.is_empty() {
            info!("no rebalancing needed");
            Vec::new()
        } else if dry_run {
            info!(migrations = plan.len(), "dry-run, not migrating");
            Vec::new()
        } else {
            execute_plan(&self.api, &plan).await
        };

        let report = CycleReport {
            id,
            started_at,
            dimension: self.balancing.dimension,
            dry_run,
            balance,
            affinity_moves,
            anti_affinity_moves,
            plan,
            outcomes,
        };
        if report.has_failures() {
            warn!(
                failed = report.failures().count(),
                total = report.outcomes.len(),
                "some migrations failed"
            );
        }
        Ok(report)
    }

    /// Run live cycles forever, sleeping `every` in between. Each cycle
    /// renews the API session first. Only a fatal error (connectivity) ends
    /// the loop.
    pub async fn run_forever(&mut self, every: Duration) -> BalancerResult<()> {
        loop {
            self.run_cycle(false).await?;
            info!(next_in_secs = every.as_secs(), "cycle finished, sleeping");
            tokio::time::sleep(every).await;
        }
    }
}
