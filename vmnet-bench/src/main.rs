//! Benchmark driver for VM placement and routing.
//!
//! Builds a binary tree and a generated workload, runs the two-stage pipeline
//! (and optionally the joint model) on the chosen backends and writes a JSON
//! report. With `--load-placement` only the path stage runs, on the placement
//! stored in an earlier report.

mod backend_choice;
mod report;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use vmnet_core::{TopologyConfig, Tree, VmPlacement, Workload, WorkloadConfig};
use vmnet_hybrid::{AnnealSettings, OrchestratorSettings, RescalePolicy, TwoStagePipeline};

use backend_choice::{backend_for_choice, BackendChoice, BackendOptions};
use report::{InstanceSummary, RunRecord, RunReport, StageSummary};

#[derive(Parser, Debug)]
#[command(name = "vmnet-bench", about = "VM placement and routing benchmarks")]
struct Cli {
    /// Tree depth (the root is depth 0)
    #[arg(long, default_value_t = 2)]
    depth: usize,

    /// Compute and memory capacity of each server
    #[arg(long, default_value_t = 10)]
    server_capacity: u32,

    /// Link bandwidth scale
    #[arg(long, default_value_t = 5.0)]
    link_capacity: f64,

    /// Idle power scale
    #[arg(long, default_value_t = 10.0)]
    idle_power: f64,

    /// Dynamic power scale
    #[arg(long, default_value_t = 2.0)]
    dynamic_power: f64,

    /// Average flow data rate
    #[arg(long, default_value_t = 4)]
    datarate_avg: u32,

    /// Number of VMs (default: one per server)
    #[arg(long)]
    vms: Option<usize>,

    /// Seed for the workload and the annealing sampler
    #[arg(long)]
    seed: Option<u64>,

    /// Backend to run
    #[arg(long, value_enum, default_value_t = BackendChoice::Both)]
    backend: BackendChoice,

    /// Runs per backend
    #[arg(long, default_value_t = 1)]
    repetitions: usize,

    /// Also solve the joint placement and routing model
    #[arg(long)]
    full: bool,

    /// Time budget per model in seconds
    #[arg(long, default_value_t = 60.0)]
    time_budget: f64,

    /// Time per sampler call in seconds
    #[arg(long, default_value_t = 5.0)]
    time_slice: f64,

    /// Maximum penalty retunes per model
    #[arg(long, default_value_t = 10)]
    max_iterations: usize,

    /// Weight multiplier per retune
    #[arg(long, default_value_t = 2.0)]
    escalation_factor: f64,

    /// Rescale every weight on a retune, not only the violated ones
    #[arg(long)]
    rescale_all: bool,

    /// Annealing reads per sampler call
    #[arg(long, default_value_t = 16)]
    num_reads: usize,

    /// Annealing sweeps per read
    #[arg(long, default_value_t = 1000)]
    num_sweeps: usize,

    /// Node limit of the exact solver
    #[arg(long, default_value_t = 10_000_000)]
    max_nodes: u64,

    /// Route on the placement of a saved report instead of solving stage one
    #[arg(long, value_name = "FILE", conflicts_with = "full")]
    load_placement: Option<PathBuf>,

    /// Write the JSON report here
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Log per-iteration progress
    #[arg(long, short)]
    verbose: bool,
}

impl Cli {
    fn backend_options(&self) -> BackendOptions {
        let mut orchestrator = OrchestratorSettings::default()
            .with_time_budget(self.time_budget)
            .with_time_slice(self.time_slice)
            .with_max_iterations(self.max_iterations)
            .with_escalation_factor(self.escalation_factor);
        if self.rescale_all {
            orchestrator = orchestrator.with_rescale(RescalePolicy::All);
        }
        orchestrator.verbose = self.verbose;

        let mut anneal = AnnealSettings::default().with_effort(self.num_reads, self.num_sweeps);
        anneal.seed = self.seed;

        BackendOptions {
            orchestrator,
            anneal,
            max_nodes: self.max_nodes,
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run_two_stage(
    pipeline: &mut TwoStagePipeline,
    tree: &Tree,
    workload: &Workload,
    repetition: usize,
) -> Result<RunRecord> {
    let start = Instant::now();
    let report = pipeline
        .run(tree, workload)
        .context("two-stage pipeline failed")?;

    let mut stages = vec![StageSummary::from(&report.vm)];
    stages.extend(report.path.as_ref().map(StageSummary::from));

    Ok(RunRecord {
        backend: pipeline.backend().name().to_string(),
        mode: "two-stage".to_string(),
        repetition,
        complete: report.is_complete(),
        total_objective: report.total_objective(),
        stages,
        hosts: RunRecord::hosts_of(report.placement.as_ref()),
        routes: RunRecord::routes_of(report.routes.as_ref()),
        elapsed_ms: start.elapsed().as_millis() as u64,
    })
}

fn run_path(
    pipeline: &mut TwoStagePipeline,
    tree: &Tree,
    workload: &Workload,
    placement: &VmPlacement,
    repetition: usize,
) -> Result<RunRecord> {
    let start = Instant::now();
    let report = pipeline
        .run_path(tree, workload, placement)
        .context("path stage failed")?;
    let complete = report.routes.is_some();

    Ok(RunRecord {
        backend: pipeline.backend().name().to_string(),
        mode: "path".to_string(),
        repetition,
        complete,
        total_objective: report.stage.objective.filter(|_| complete),
        stages: vec![StageSummary::from(&report.stage)],
        hosts: RunRecord::hosts_of(Some(placement)),
        routes: RunRecord::routes_of(report.routes.as_ref()),
        elapsed_ms: start.elapsed().as_millis() as u64,
    })
}

/// Read the placement of a saved report and check it fits this instance.
fn load_placement(path: &Path, tree: &Tree, workload: &Workload) -> Result<VmPlacement> {
    let saved = RunReport::load_json(path)?;
    if saved.instance.depth != tree.depth() || saved.instance.vms != workload.num_vms() {
        bail!(
            "{} was recorded for depth {} with {} VMs, not depth {} with {}",
            path.display(),
            saved.instance.depth,
            saved.instance.vms,
            tree.depth(),
            workload.num_vms()
        );
    }
    let placement = saved.saved_placement()?;
    placement
        .validate(tree, workload.num_vms())
        .with_context(|| format!("placement in {} does not fit the tree", path.display()))?;
    Ok(placement)
}

fn run_full(
    pipeline: &mut TwoStagePipeline,
    tree: &Tree,
    workload: &Workload,
    repetition: usize,
) -> Result<RunRecord> {
    let start = Instant::now();
    let report = pipeline
        .run_full(tree, workload)
        .context("full model failed")?;
    let complete = report.stage.status.has_solution();

    Ok(RunRecord {
        backend: pipeline.backend().name().to_string(),
        mode: "full".to_string(),
        repetition,
        complete,
        total_objective: report.stage.objective.filter(|_| complete),
        stages: vec![StageSummary::from(&report.stage)],
        hosts: RunRecord::hosts_of(report.placement.as_ref()),
        routes: RunRecord::routes_of(report.routes.as_ref()),
        elapsed_ms: start.elapsed().as_millis() as u64,
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let topology = TopologyConfig::binary(
        cli.depth,
        cli.server_capacity as f64,
        cli.link_capacity,
        cli.idle_power,
        cli.dynamic_power,
    );
    let tree = topology.build().context("invalid topology")?;

    let workload_config = WorkloadConfig {
        server_capacity: cli.server_capacity,
        datarate_avg: cli.datarate_avg,
        vms: cli.vms,
        seed: cli.seed,
        ..WorkloadConfig::default()
    };
    let workload = workload_config
        .generate(&tree)
        .context("failed to generate workload")?;
    log::info!(
        "Tree depth {}: {} nodes, {} links; {} VMs, {} flows",
        cli.depth,
        tree.num_nodes(),
        tree.num_links(),
        workload.num_vms(),
        workload.num_flows()
    );

    let options = cli.backend_options();
    options
        .orchestrator
        .validate()
        .context("invalid orchestrator settings")?;

    let mut report = RunReport::new(InstanceSummary {
        depth: cli.depth,
        nodes: tree.num_nodes(),
        links: tree.num_links(),
        vms: workload.num_vms(),
        flows: workload.num_flows(),
        seed: cli.seed,
    });

    let saved_placement = cli
        .load_placement
        .as_deref()
        .map(|path| load_placement(path, &tree, &workload))
        .transpose()?;

    for choice in cli.backend.expand() {
        for repetition in 0..cli.repetitions {
            log::info!("{} run {}/{}", choice.label(), repetition + 1, cli.repetitions);
            let mut pipeline =
                TwoStagePipeline::new(backend_for_choice(choice, &options, repetition));

            if let Some(placement) = &saved_placement {
                let run = run_path(&mut pipeline, &tree, &workload, placement, repetition)?;
                log::info!(
                    "path: complete={} objective={:?} in {}ms",
                    run.complete,
                    run.total_objective,
                    run.elapsed_ms
                );
                report.runs.push(run);
                continue;
            }

            let run = run_two_stage(&mut pipeline, &tree, &workload, repetition)?;
            log::info!(
                "two-stage: complete={} objective={:?} in {}ms",
                run.complete,
                run.total_objective,
                run.elapsed_ms
            );
            report.runs.push(run);

            if cli.full {
                let run = run_full(&mut pipeline, &tree, &workload, repetition)?;
                log::info!(
                    "full: complete={} objective={:?} in {}ms",
                    run.complete,
                    run.total_objective,
                    run.elapsed_ms
                );
                report.runs.push(run);
            }
        }
    }

    report.print_summary();
    log::info!("{}/{} runs complete", report.num_complete(), report.runs.len());

    if let Some(path) = &cli.output {
        report.save_json(path)?;
        log::info!("Report written to {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;
    use vmnet_core::NodeId;

    fn instance() -> (Tree, Workload) {
        let tree = TopologyConfig::binary(1, 10.0, 5.0, 10.0, 2.0).build().unwrap();
        let workload = WorkloadConfig::default().generate(&tree).unwrap();
        (tree, workload)
    }

    fn saved_report(depth: usize, vms: usize, hosts: Vec<usize>) -> NamedTempFile {
        let mut report = RunReport::new(InstanceSummary {
            depth,
            nodes: 3,
            links: 2,
            vms,
            flows: 1,
            seed: None,
        });
        report.runs.push(RunRecord {
            backend: "exact".to_string(),
            mode: "two-stage".to_string(),
            repetition: 0,
            complete: true,
            total_objective: Some(40.0),
            stages: Vec::new(),
            hosts: Some(hosts),
            routes: None,
            elapsed_ms: 1,
        });
        let file = NamedTempFile::new().unwrap();
        report.save_json(file.path()).unwrap();
        file
    }

    #[test]
    fn test_load_placement_routes_saved_hosts() {
        let (tree, workload) = instance();
        let file = saved_report(1, workload.num_vms(), vec![1, 2]);
        let placement = load_placement(file.path(), &tree, &workload).unwrap();
        assert_eq!(placement.hosts(), &[NodeId(1), NodeId(2)]);

        let options = BackendOptions {
            orchestrator: OrchestratorSettings::default(),
            anneal: AnnealSettings::default().with_seed(1),
            max_nodes: 100_000,
        };
        let mut pipeline =
            TwoStagePipeline::new(backend_for_choice(BackendChoice::Exact, &options, 0));
        let run = run_path(&mut pipeline, &tree, &workload, &placement, 0).unwrap();
        assert_eq!(run.mode, "path");
        assert!(run.complete);
        assert_eq!(run.hosts, Some(vec![1, 2]));
        let flow = &workload.flows[0];
        let hops = tree
            .route(placement.host(flow.src).unwrap(), placement.host(flow.dst).unwrap())
            .unwrap();
        let mut expected: Vec<String> = hops
            .iter()
            .map(|(link, dir)| format!("{}:{:?}", link, dir))
            .collect();
        expected.sort();
        let mut found = run.routes.unwrap().remove(0);
        found.sort();
        assert_eq!(found, expected);
    }

    #[test]
    fn test_load_placement_rejects_other_instance() {
        let (tree, workload) = instance();
        let file = saved_report(2, workload.num_vms(), vec![1, 2]);
        let err = load_placement(file.path(), &tree, &workload).unwrap_err();
        assert!(err.to_string().contains("was recorded for depth 2"));
    }

    #[test]
    fn test_load_placement_rejects_unknown_host() {
        let (tree, workload) = instance();
        let file = saved_report(1, workload.num_vms(), vec![1, 9]);
        let err = load_placement(file.path(), &tree, &workload).unwrap_err();
        assert!(err.to_string().contains("does not fit the tree"));
    }
}
