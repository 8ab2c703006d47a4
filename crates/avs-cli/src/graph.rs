//! # Graph Subcommand
//!
//! `avs graph [--config <path>]` prints one line per step in topological
//! order: whether the step is required, its quota, its dependencies and the
//! steps it unlocks.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use avs_core::StepId;
use avs_state::StepStateMachine;

use crate::load_runtime;

/// Arguments for the `avs graph` subcommand.
#[derive(Args, Debug)]
pub struct GraphArgs {
    /// Workflow YAML. Defaults to the standard workflow.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Execute the graph subcommand.
pub fn run_graph(args: &GraphArgs, out: &mut impl Write) -> Result<u8> {
    let runtime = load_runtime(args.config.as_deref())?;
    render(&runtime.machine, out)?;
    Ok(0)
}

fn render(machine: &StepStateMachine, out: &mut impl Write) -> Result<()> {
    let graph = machine.graph();
    let rows: Vec<(StepId, String, String)> = graph
        .order()
        .iter()
        .map(|step| {
            let deps: Vec<StepId> = graph.dependencies(*step).collect();
            (*step, join(&deps), join(&graph.dependents(*step)))
        })
        .collect();
    let width = rows.iter().map(|r| r.0.as_str().len()).max().unwrap_or(0);
    let deps_width = rows
        .iter()
        .map(|r| r.1.len())
        .chain(std::iter::once("DEPENDS ON".len()))
        .max()
        .unwrap_or(0);

    writeln!(
        out,
        "{:<width$}  {:<8}  {:>5}  {:<deps_width$}  UNLOCKS",
        "STEP", "REQUIRED", "QUOTA", "DEPENDS ON"
    )?;
    for (step, deps, unlocks) in &rows {
        writeln!(
            out,
            "{:<width$}  {:<8}  {:>5}  {:<deps_width$}  {}",
            step.as_str(),
            if graph.is_required(*step) { "yes" } else { "no" },
            machine.quotas().get(*step),
            deps,
            unlocks
        )?;
    }
    Ok(())
}

fn join(steps: &[StepId]) -> String {
    if steps.is_empty() {
        return "-".to_string();
    }
    steps.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
}
