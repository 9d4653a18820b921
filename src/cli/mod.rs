/*
* ProxLB Command Line Interface
* -----------------------------
*
* proxlb --config <path> [--dry-run] [--json]
*
* Modes:
* ------
* --dry-run           one cycle, print the plan as a table, migrate nothing
* --dry-run --json    same, plan printed as a JSON array
* (default)           live; one cycle if service.daemon is off, otherwise a
*                     cycle every service.schedule hours until killed
*
* Logs go to stderr so the table / JSON on stdout can be piped.
*/

use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::{info, Level};

use crate::cluster::ProxmoxClient;
use crate::config::Settings;
use crate::core::plan::MigrationPlan;
use crate::errors::BalancerResult;
use crate::scheduler::{CycleReport, Scheduler};

#[derive(Parser, Debug)]
#[command(name = "proxlb")]
#[command(about = "Rebalances VM workloads across Proxmox VE cluster nodes", long_about = None)]
pub struct Cli {
    /// Path to the INI configuration file
    #[arg(short, long, value_name = "CONFIG")]
    pub config: PathBuf,

    /// Compute the migration plan without executing it
    #[arg(short, long)]
    pub dry_run: bool,

    /// Print the dry-run plan as JSON
    #[arg(short, long)]
    pub json: bool,
}

pub async fn run() -> BalancerResult<()> {
    let cli = Cli::parse();

    let settings = match Settings::load(&cli.config) {
        Ok(settings) => settings,
        Err(e) => {
            init_logging(Level::INFO);
            return Err(e.into());
        }
    };
    init_logging(settings.log_level()?);

    let balancing = settings.balancing()?;
    info!(method = %balancing.dimension, balanciness = balancing.balanciness, "Starting ProxLB");

    let client = ProxmoxClient::connect(&settings.proxmox).await?;
    let mut scheduler = Scheduler::new(client, balancing);

    if cli.dry_run {
        let report = scheduler.run_cycle(true).await?;
        return print_plan(&report.plan, cli.json);
    }

    if settings.service.daemon {
        let every = settings.schedule()?;
        info!(schedule_hours = settings.service.schedule, "running as daemon");
        return scheduler.run_forever(every).await;
    }

    let report = scheduler.run_cycle(false).await?;
    print_outcomes(&report);
    if report.has_failures() {
        return Err(anyhow::anyhow!(
            "{} of {} migrations failed",
            report.failures().count(),
            report.outcomes.len()
        )
        .into());
    }
    Ok(())
}

fn init_logging(level: Level) {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn print_plan(plan: &MigrationPlan, json: bool) -> BalancerResult<()> {
    write_plan(&mut io::stdout().lock(), &mut io::stderr().lock(), plan, json)
}

/// The plan goes to `out`. With `--json`, `out` carries nothing but the
/// JSON array, so the empty-plan notice goes to `notes` instead.
fn write_plan<O, N>(out: &mut O, notes: &mut N, plan: &MigrationPlan, json: bool) -> BalancerResult<()>
where
    O: Write,
    N: Write,
{
    if json {
        let body = serde_json::to_string_pretty(plan).context("serializing migration plan")?;
        writeln!(out, "{body}").context("writing migration plan")?;
        if plan.is_empty() {
            writeln!(notes, "{}", "No rebalancing needed".green()).context("writing migration plan")?;
        }
        return Ok(());
    }
    if plan.is_empty() {
        writeln!(out, "{}", "No rebalancing needed".green()).context("writing migration plan")?;
        return Ok(());
    }
    let mut lines = render_table(plan).into_iter();
    if let Some(header) = lines.next() {
        writeln!(out, "{}", header.bold()).context("writing migration plan")?;
    }
    for line in lines {
        writeln!(out, "{line}").context("writing migration plan")?;
    }
    Ok(())
}

fn print_outcomes(report: &CycleReport) {
    if report.plan.is_empty() {
        println!("{}", "No rebalancing needed".green());
        return;
    }
    for outcome in &report.outcomes {
        let entry = &outcome.entry;
        match &outcome.result {
            Ok(task) => println!(
                "{} {} ({}) {} -> {} [{}]",
                "✓".green(),
                entry.vm,
                entry.vmid,
                entry.origin,
                entry.target,
                task
            ),
            Err(e) => println!("{} {} ({}): {}", "✗".red(), entry.vm, entry.vmid, e),
        }
    }
}

/// Plain-text table of the plan, header first.
pub fn render_table(plan: &MigrationPlan) -> Vec<String> {
    let header = ["VM", "VMID", "Origin", "Target"];
    let rows: Vec<[String; 4]> = plan
        .entries()
        .iter()
        .map(|e| [e.vm.clone(), e.vmid.to_string(), e.origin.clone(), e.target.clone()])
        .collect();

    let mut widths = header.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let format_row = |cells: [&str; 4]| {
        cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut lines = vec![format_row(header)];
    lines.extend(
        rows.iter()
            .map(|r| format_row([r[0].as_str(), r[1].as_str(), r[2].as_str(), r[3].as_str()])),
    );
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::inventory::{Inventory, Node};
    use crate::core::resource::{Dimension, Resource, Usage};
    use crate::core::vm::{VMResources, VirtualMachine};
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn config_flag_is_required() {
        assert!(Cli::try_parse_from(["proxlb", "--dry-run"]).is_err());
        let cli = Cli::try_parse_from(["proxlb", "-c", "/etc/proxlb/proxlb.conf", "--dry-run", "--json"]).unwrap();
        assert!(cli.dry_run && cli.json);
        assert_eq!(cli.config, PathBuf::from("/etc/proxlb/proxlb.conf"));
    }

    #[test]
    fn empty_json_plan_keeps_stdout_parseable() {
        let plan = MigrationPlan::from_inventory(&Inventory::new(Vec::new(), Vec::new()));
        let (mut out, mut notes) = (Vec::new(), Vec::new());

        write_plan(&mut out, &mut notes, &plan, true).unwrap();

        let out = String::from_utf8(out).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed, serde_json::json!([]));
        assert!(String::from_utf8(notes).unwrap().contains("No rebalancing needed"));
    }

    #[test]
    fn empty_table_plan_says_so_on_stdout() {
        let plan = MigrationPlan::from_inventory(&Inventory::new(Vec::new(), Vec::new()));
        let (mut out, mut notes) = (Vec::new(), Vec::new());

        write_plan(&mut out, &mut notes, &plan, false).unwrap();

        assert!(String::from_utf8(out).unwrap().contains("No rebalancing needed"));
        assert!(notes.is_empty());
    }

    #[test]
    fn table_aligns_columns() {
        let node = |name: &str| Node::new(name, Resource::new(100, 0), Resource::new(0, 0), Resource::new(0, 0));
        let resources = VMResources {
            memory: Usage::new(10, 10),
            ..Default::default()
        };
        let mut inventory = Inventory::new(
            vec![node("pve01"), node("pve02")],
            vec![VirtualMachine::new(101, "webserver01", "pve01", resources)],
        );
        inventory.relocate(101, "pve02", Dimension::Memory);

        let lines = render_table(&MigrationPlan::from_inventory(&inventory));

        assert_eq!(
            lines,
            vec![
                "VM           VMID  Origin  Target".to_string(),
                "webserver01  101   pve01   pve02".to_string(),
            ]
        );
    }
}
