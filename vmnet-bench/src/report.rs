//! JSON run report.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use vmnet_core::{NodeId, VmPlacement};
use vmnet_hybrid::{Routes, StageReport};

/// Instance parameters shared by all runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceSummary {
    pub depth: usize,
    pub nodes: usize,
    pub links: usize,
    pub vms: usize,
    pub flows: usize,
    pub seed: Option<u64>,
}

/// One solved model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageSummary {
    pub model: String,
    pub variables: usize,
    pub constraints: usize,
    pub status: String,
    pub objective: Option<f64>,
    /// Violated constraints of the returned assignment (hybrid only)
    pub violated: Option<usize>,
    pub iterations: usize,
    pub elapsed_ms: u64,
}

impl From<&StageReport> for StageSummary {
    fn from(stage: &StageReport) -> Self {
        Self {
            model: stage.model.clone(),
            variables: stage.stats.variables,
            constraints: stage.stats.constraints,
            status: format!("{:?}", stage.status),
            objective: stage.objective,
            violated: stage.feasibility.as_ref().map(|f| f.num_violated()),
            iterations: stage.iterations,
            elapsed_ms: stage.elapsed_ms,
        }
    }
}

/// One pipeline run on one backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    pub backend: String,
    pub mode: String,
    pub repetition: usize,
    pub complete: bool,
    pub total_objective: Option<f64>,
    pub stages: Vec<StageSummary>,
    /// Host node index per VM
    pub hosts: Option<Vec<usize>>,
    /// Hops per flow, as `link:direction`
    pub routes: Option<Vec<Vec<String>>>,
    pub elapsed_ms: u64,
}

impl RunRecord {
    pub fn hosts_of(placement: Option<&VmPlacement>) -> Option<Vec<usize>> {
        placement.map(|p| p.hosts().iter().map(|n| n.index()).collect())
    }

    pub fn routes_of(routes: Option<&Routes>) -> Option<Vec<Vec<String>>> {
        routes.map(|routes| {
            routes
                .iter()
                .map(|hops| {
                    hops.iter()
                        .map(|(link, dir)| format!("{}:{:?}", link, dir))
                        .collect()
                })
                .collect()
        })
    }
}

/// Everything one invocation produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub instance: InstanceSummary,
    pub runs: Vec<RunRecord>,
}

impl RunReport {
    pub fn new(instance: InstanceSummary) -> Self {
        Self {
            instance,
            runs: Vec::new(),
        }
    }

    /// Runs that produced a complete solution.
    pub fn num_complete(&self) -> usize {
        self.runs.iter().filter(|r| r.complete).count()
    }

    /// First recorded placement, for rerunning the path stage.
    pub fn saved_placement(&self) -> Result<VmPlacement> {
        let Some(run) = self.runs.iter().find(|r| r.hosts.is_some()) else {
            bail!("report has no run with a placement");
        };
        let hosts = run.hosts.iter().flatten().map(|&n| NodeId(n)).collect();
        log::info!(
            "Using placement from {} {} run {}",
            run.backend,
            run.mode,
            run.repetition
        );
        Ok(VmPlacement::new(hosts))
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("cannot serialize report")?;
        fs::write(path, json).with_context(|| format!("cannot write report {}", path.display()))
    }

    pub fn load_json(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("cannot read report {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("{} is not a run report", path.display()))
    }

    /// Print one line per run.
    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(72));
        println!(
            "depth {} | {} nodes | {} VMs | {} flows",
            self.instance.depth, self.instance.nodes, self.instance.vms, self.instance.flows
        );
        println!("{}", "=".repeat(72));
        println!(
            "{:<10} {:<10} {:>4} {:>10} {:>14} {:>12}",
            "Backend", "Mode", "Rep", "Complete", "Objective", "Time"
        );
        println!("{}", "-".repeat(72));
        for run in &self.runs {
            let objective = run
                .total_objective
                .map(|o| format!("{:.3}", o))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{:<10} {:<10} {:>4} {:>10} {:>14} {:>10}ms",
                run.backend, run.mode, run.repetition, run.complete, objective, run.elapsed_ms
            );
        }
        println!("{}", "=".repeat(72));
    }
}
