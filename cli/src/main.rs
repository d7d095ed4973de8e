//! Checkpoint tool for the simulation nucleus
//!
//! Reads `SimulationState` checkpoints written by `SimulationState::to_json`.
//!
//! # Usage
//!
//! ```bash
//! nucleus validate run.checkpoint.json
//! nucleus inspect run.checkpoint.json --plans
//! nucleus fingerprint run.checkpoint.json
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use nucleus_core_rs::{Planner, SimulationState};
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, EnvFilter};

/// Simulation nucleus checkpoint tool
#[derive(Parser, Debug)]
#[command(name = "nucleus")]
#[command(about = "Inspect, validate and fingerprint simulation checkpoints")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that a checkpoint parses and satisfies every invariant
    Validate {
        /// Checkpoint JSON file
        path: PathBuf,
    },

    /// Summarize the pending schedule of a checkpoint
    Inspect {
        /// Checkpoint JSON file
        path: PathBuf,

        /// List every pending plan in execution order
        #[arg(long)]
        plans: bool,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the SHA-256 fingerprint of a checkpoint
    Fingerprint {
        /// Checkpoint JSON file
        path: PathBuf,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();
}

fn load(path: &Path) -> Result<SimulationState, String> {
    let text = fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    debug!(path = %path.display(), bytes = text.len(), "checkpoint read");
    SimulationState::from_json(&text).map_err(|e| format!("{}: {}", path.display(), e))
}

fn planner_name(planner: Planner) -> &'static str {
    match planner {
        Planner::DataManager => "data_manager",
        Planner::Actor => "actor",
        Planner::Report => "report",
    }
}

fn inspect(state: &SimulationState, plans: bool, json: bool) -> Result<(), String> {
    let datas = state.plan_queue_datas();
    let active = datas.iter().filter(|d| d.is_active()).count();

    let mut by_planner: BTreeMap<&str, usize> = BTreeMap::new();
    let mut by_kind: BTreeMap<&str, usize> = BTreeMap::new();
    for data in datas {
        *by_planner.entry(planner_name(data.planner())).or_default() += 1;
        *by_kind.entry(data.plan_data().kind()).or_default() += 1;
    }

    // Execution order: time, then planner, then arrival id
    let mut ordered: Vec<_> = datas.iter().collect();
    ordered.sort_by(|a, b| {
        a.time()
            .total_cmp(&b.time())
            .then(a.planner().cmp(&b.planner()))
            .then(a.arrival_id().cmp(&b.arrival_id()))
    });

    if json {
        let mut summary = serde_json::json!({
            "start_time": state.start_time(),
            "base_date": state.base_date().to_string(),
            "planning_queue_arrival_id": state.planning_queue_arrival_id(),
            "plans": datas.len(),
            "active": active,
            "passive": datas.len() - active,
            "by_planner": by_planner,
            "by_kind": by_kind,
        });
        if plans {
            let listed: Vec<_> = ordered
                .iter()
                .map(|d| {
                    serde_json::json!({
                        "time": d.time(),
                        "planner": planner_name(d.planner()),
                        "planner_id": d.planner_id(),
                        "arrival_id": d.arrival_id(),
                        "active": d.is_active(),
                        "key": d.key().map(|k| k.to_string()),
                        "kind": d.plan_data().kind(),
                    })
                })
                .collect();
            summary["pending"] = serde_json::Value::from(listed);
        }
        let text = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
        println!("{}", text);
        return Ok(());
    }

    println!("Start time:       {}", state.start_time());
    println!("Base date:        {}", state.base_date());
    println!("Next arrival id:  {}", state.planning_queue_arrival_id());
    println!("Pending plans:    {} ({} active, {} passive)", datas.len(), active, datas.len() - active);
    for (planner, count) in &by_planner {
        println!("  {:<14} {}", planner, count);
    }
    if !by_kind.is_empty() {
        println!("Plan data kinds:");
        for (kind, count) in &by_kind {
            println!("  {:<14} {}", kind, count);
        }
    }
    if plans {
        println!("Schedule:");
        for d in ordered {
            println!(
                "  t={:<10} {}#{:<4} arrival={:<6} {} {}{}",
                d.time(),
                planner_name(d.planner()),
                d.planner_id(),
                d.arrival_id(),
                if d.is_active() { "active " } else { "passive" },
                d.plan_data().kind(),
                d.key().map(|k| format!(" key={}", k)).unwrap_or_default(),
            );
        }
    }
    Ok(())
}

fn run(command: Command) -> Result<(), String> {
    match command {
        Command::Validate { path } => {
            let state = load(&path)?;
            info!(
                plans = state.plan_queue_datas().len(),
                start_time = state.start_time(),
                "checkpoint is valid"
            );
            println!("{}: valid", path.display());
            Ok(())
        }
        Command::Inspect { path, plans, json } => {
            let state = load(&path)?;
            inspect(&state, plans, json)
        }
        Command::Fingerprint { path } => {
            let state = load(&path)?;
            let fingerprint = state.fingerprint().map_err(|e| e.to_string())?;
            println!("{}", fingerprint);
            Ok(())
        }
    }
}

fn main() {
    init_logging();

    let args = Args::parse();
    if let Err(message) = run(args.command) {
        error!("{}", message);
        process::exit(1);
    }
}
