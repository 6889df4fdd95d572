//! Two-stage placement-then-routing pipeline.
//!
//! Stage one solves the VM placement model and decodes a [`VmPlacement`].
//! Stage two builds the path model for that placement and solves it on the
//! same backend. Stage two is skipped when stage one has no usable result.

use std::time::{Duration, Instant};

use vmnet_core::{
    build_path_model, decode_placement, decode_routes, Assignment, ConstrainedModel, Direction,
    FullModelBuilder, LinkId, ModelStats, PlacementCost, Tree, VmModelBuilder, VmPlacement,
    Workload,
};

use crate::backend::{ExactSolver, Sampler};
use crate::error::HybridResult;
use crate::feasibility::FeasibilityResult;
use crate::orchestrator::{PenaltyOrchestrator, SolveStatus};
use crate::settings::OrchestratorSettings;

/// Where models get solved.
pub enum Backend {
    /// Hand the constrained model to an exact solver. Its answers are trusted
    /// as they are.
    Exact {
        /// Solver.
        solver: Box<dyn ExactSolver>,
        /// Time limit per model.
        time_limit: Duration,
    },

    /// Compile to penalty form and run the retune loop.
    Hybrid(PenaltyOrchestrator<Box<dyn Sampler>>),
}

impl Backend {
    /// Exact backend.
    pub fn exact(solver: impl ExactSolver + 'static, time_limit: Duration) -> Self {
        Backend::Exact {
            solver: Box::new(solver),
            time_limit,
        }
    }

    /// Hybrid backend.
    pub fn hybrid(
        sampler: impl Sampler + 'static,
        settings: OrchestratorSettings,
    ) -> Self {
        let sampler: Box<dyn Sampler> = Box::new(sampler);
        Backend::Hybrid(PenaltyOrchestrator::new(sampler, settings))
    }

    /// Backend name for reports.
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Exact { solver, .. } => solver.name(),
            Backend::Hybrid(orch) => orch.sampler().name(),
        }
    }

    /// Solve one model.
    pub fn solve(&mut self, model: &ConstrainedModel) -> HybridResult<StageReport> {
        let start = Instant::now();
        let stats = model.stats();
        match self {
            Backend::Exact { solver, time_limit } => {
                let assignment = solver.solve(model, *time_limit)?;
                let objective = match &assignment {
                    Some(a) => Some(model.objective_value(a)?),
                    None => None,
                };
                Ok(StageReport {
                    model: model.name().to_string(),
                    stats,
                    status: if assignment.is_some() {
                        StageStatus::Solved
                    } else {
                        StageStatus::NoSolution
                    },
                    assignment,
                    feasibility: None,
                    objective,
                    iterations: 1,
                    elapsed_ms: start.elapsed().as_millis() as u64,
                })
            }
            Backend::Hybrid(orch) => {
                let out = orch.solve(model)?;
                Ok(StageReport {
                    model: model.name().to_string(),
                    stats,
                    status: match out.status {
                        SolveStatus::Accepted => StageStatus::Accepted,
                        SolveStatus::Exhausted => StageStatus::Exhausted,
                    },
                    assignment: out.assignment,
                    feasibility: out.feasibility,
                    objective: out.objective,
                    iterations: out.iterations,
                    elapsed_ms: out.elapsed_ms,
                })
            }
        }
    }
}

/// Result of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    /// Hybrid: feasible candidate accepted.
    Accepted,
    /// Hybrid: budget used up, assignment (if any) is infeasible.
    Exhausted,
    /// Exact: solution returned.
    Solved,
    /// Exact: no solution within the limit.
    NoSolution,
}

impl StageStatus {
    /// Returns true if the stage produced a usable assignment.
    pub fn has_solution(&self) -> bool {
        matches!(self, StageStatus::Accepted | StageStatus::Solved)
    }
}

/// Outcome of solving one model.
#[derive(Debug, Clone)]
pub struct StageReport {
    /// Model name.
    pub model: String,
    /// Model size.
    pub stats: ModelStats,
    /// Stage status.
    pub status: StageStatus,
    /// Assignment, feasible when [`StageStatus::has_solution`] holds.
    pub assignment: Option<Assignment>,
    /// Verdict of the hybrid backend; `None` for exact results.
    pub feasibility: Option<FeasibilityResult>,
    /// Objective value of `assignment`.
    pub objective: Option<f64>,
    /// Solver calls made.
    pub iterations: usize,
    /// Wall-clock time in milliseconds.
    pub elapsed_ms: u64,
}

impl StageReport {
    /// The assignment, if the stage produced a usable one.
    pub fn usable(&self) -> Option<&Assignment> {
        self.assignment
            .as_ref()
            .filter(|_| self.status.has_solution())
    }
}

/// Routes per flow as `(link, direction)` hops.
pub type Routes = Vec<Vec<(LinkId, Direction)>>;

/// Outcome of [`TwoStagePipeline::run`].
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// Placement stage.
    pub vm: StageReport,
    /// Decoded placement, if stage one succeeded.
    pub placement: Option<VmPlacement>,
    /// Routing stage; `None` when skipped.
    pub path: Option<StageReport>,
    /// Decoded routes, if stage two succeeded.
    pub routes: Option<Routes>,
}

impl PipelineReport {
    /// Both stages produced a usable assignment.
    pub fn is_complete(&self) -> bool {
        self.vm.status.has_solution()
            && self.path.as_ref().is_some_and(|p| p.status.has_solution())
    }

    /// Sum of stage objectives, if both stages solved.
    pub fn total_objective(&self) -> Option<f64> {
        if !self.is_complete() {
            return None;
        }
        Some(self.vm.objective? + self.path.as_ref()?.objective?)
    }
}

/// Outcome of [`TwoStagePipeline::run_path`].
#[derive(Debug, Clone)]
pub struct PathReport {
    /// Routing stage.
    pub stage: StageReport,
    /// Decoded routes, if solved.
    pub routes: Option<Routes>,
}

/// Outcome of [`TwoStagePipeline::run_full`].
#[derive(Debug, Clone)]
pub struct FullReport {
    /// Joint model stage.
    pub stage: StageReport,
    /// Decoded placement, if solved.
    pub placement: Option<VmPlacement>,
    /// Decoded routes, if solved.
    pub routes: Option<Routes>,
}

/// Runs placement and routing on one backend.
pub struct TwoStagePipeline {
    backend: Backend,
    cost: PlacementCost,
}

impl TwoStagePipeline {
    /// Create a pipeline.
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            cost: PlacementCost::default(),
        }
    }

    /// Use a different placement objective.
    pub fn with_cost(mut self, cost: PlacementCost) -> Self {
        self.cost = cost;
        self
    }

    /// Get the backend.
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Solve placement, then routing for the placement found.
    pub fn run(&mut self, tree: &Tree, workload: &Workload) -> HybridResult<PipelineReport> {
        workload.validate()?;
        let vm_model = VmModelBuilder::new(tree, &workload.vms)
            .with_cost(self.cost.clone())
            .build()?;
        let vm = self.backend.solve(&vm_model)?;

        let placement = vm
            .usable()
            .map(|a| decode_placement(tree, workload.num_vms(), a))
            .transpose()?;
        let Some(placement) = placement else {
            log::warn!("VM stage {:?}; skipping path stage", vm.status);
            return Ok(PipelineReport {
                vm,
                placement: None,
                path: None,
                routes: None,
            });
        };
        log::info!("Placement: {:?}", placement.hosts());

        let PathReport { stage, routes } = self.run_path(tree, workload, &placement)?;
        Ok(PipelineReport {
            vm,
            placement: Some(placement),
            path: Some(stage),
            routes,
        })
    }

    /// Solve routing only, for a placement found earlier.
    pub fn run_path(
        &mut self,
        tree: &Tree,
        workload: &Workload,
        placement: &VmPlacement,
    ) -> HybridResult<PathReport> {
        let path_model = build_path_model(tree, placement, &workload.flows)?;
        let stage = self.backend.solve(&path_model)?;
        let routes = stage
            .usable()
            .map(|a| decode_routes(tree, workload.num_flows(), a));
        if routes.is_none() {
            log::warn!("Path stage {:?}", stage.status);
        }
        Ok(PathReport { stage, routes })
    }

    /// Solve the joint placement and routing model.
    pub fn run_full(&mut self, tree: &Tree, workload: &Workload) -> HybridResult<FullReport> {
        let model = FullModelBuilder::new(tree, workload)
            .with_cost(self.cost.clone())
            .build()?;
        let stage = self.backend.solve(&model)?;

        let placement = stage
            .usable()
            .map(|a| decode_placement(tree, workload.num_vms(), a))
            .transpose()?;
        let routes = stage
            .usable()
            .map(|a| decode_routes(tree, workload.num_flows(), a));
        if placement.is_none() {
            log::warn!("Full model {:?}", stage.status);
        }

        Ok(FullReport {
            stage,
            placement,
            routes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HybridError;
    use vmnet_core::TopologyConfig;

    struct NoSolution;

    impl ExactSolver for NoSolution {
        fn name(&self) -> &'static str {
            "none"
        }

        fn solve(
            &mut self,
            _: &ConstrainedModel,
            _: Duration,
        ) -> HybridResult<Option<Assignment>> {
            Ok(None)
        }
    }

    struct Broken;

    impl ExactSolver for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn solve(
            &mut self,
            _: &ConstrainedModel,
            _: Duration,
        ) -> HybridResult<Option<Assignment>> {
            Err(HybridError::ExactSolver("license expired".into()))
        }
    }

    fn setup() -> (Tree, Workload) {
        let tree = TopologyConfig::binary(1, 10.0, 5.0, 10.0, 2.0).build().unwrap();
        let workload = vmnet_core::WorkloadConfig::default().generate(&tree).unwrap();
        (tree, workload)
    }

    #[test]
    fn test_path_stage_skipped_without_placement() {
        let (tree, workload) = setup();
        let backend = Backend::exact(NoSolution, Duration::from_secs(1));
        let mut pipeline = TwoStagePipeline::new(backend);
        let report = pipeline.run(&tree, &workload).unwrap();

        assert_eq!(report.vm.status, StageStatus::NoSolution);
        assert!(report.path.is_none());
        assert!(report.placement.is_none());
        assert!(!report.is_complete());
        assert_eq!(report.total_objective(), None);
    }

    #[test]
    fn test_run_path_with_given_placement() {
        let (tree, workload) = setup();
        let placement = VmPlacement::new(vec![vmnet_core::NodeId(1), vmnet_core::NodeId(2)]);
        let solver = crate::exact::BranchAndBoundSolver::default();
        let mut pipeline = TwoStagePipeline::new(Backend::exact(solver, Duration::from_secs(10)));
        let report = pipeline.run_path(&tree, &workload, &placement).unwrap();

        assert_eq!(report.stage.status, StageStatus::Solved);
        assert_eq!(report.stage.model, "path_model");
        let routes = report.routes.unwrap();
        assert_eq!(routes[0].len(), 2);
    }

    #[test]
    fn test_run_path_without_solution() {
        let (tree, workload) = setup();
        let placement = VmPlacement::new(vec![vmnet_core::NodeId(1), vmnet_core::NodeId(2)]);
        let backend = Backend::exact(NoSolution, Duration::from_secs(1));
        let mut pipeline = TwoStagePipeline::new(backend);
        let report = pipeline.run_path(&tree, &workload, &placement).unwrap();
        assert_eq!(report.stage.status, StageStatus::NoSolution);
        assert!(report.routes.is_none());
    }

    #[test]
    fn test_exact_solver_error_propagates() {
        let (tree, workload) = setup();
        let mut pipeline = TwoStagePipeline::new(Backend::exact(Broken, Duration::from_secs(1)));
        assert!(matches!(
            pipeline.run(&tree, &workload),
            Err(HybridError::ExactSolver(_))
        ));
    }
}
