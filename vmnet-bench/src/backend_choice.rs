use clap::ValueEnum;
use vmnet_hybrid::{
    AnnealSettings, AnnealingSampler, Backend, BranchAndBoundSettings, BranchAndBoundSolver,
    OrchestratorSettings,
};

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendChoice {
    Exact,
    Hybrid,
    Both,
}

impl BackendChoice {
    /// Concrete backends to run, in order.
    pub fn expand(self) -> Vec<BackendChoice> {
        match self {
            BackendChoice::Both => vec![BackendChoice::Exact, BackendChoice::Hybrid],
            other => vec![other],
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BackendChoice::Exact => "exact",
            BackendChoice::Hybrid => "hybrid",
            BackendChoice::Both => "both",
        }
    }
}

pub struct BackendOptions {
    pub orchestrator: OrchestratorSettings,
    pub anneal: AnnealSettings,
    pub max_nodes: u64,
}

/// Fresh backend for one repetition. The annealing seed is offset by the
/// repetition so runs differ but stay reproducible.
pub fn backend_for_choice(
    choice: BackendChoice,
    options: &BackendOptions,
    repetition: usize,
) -> Backend {
    match choice {
        BackendChoice::Exact => {
            let mut settings = BranchAndBoundSettings::default().with_max_nodes(options.max_nodes);
            settings.verbose = options.orchestrator.verbose;
            Backend::exact(
                BranchAndBoundSolver::new(settings),
                options.orchestrator.time_budget(),
            )
        }
        BackendChoice::Hybrid | BackendChoice::Both => {
            let mut anneal = options.anneal.clone();
            anneal.seed = anneal.seed.map(|s| s.wrapping_add(repetition as u64));
            Backend::hybrid(AnnealingSampler::new(anneal), options.orchestrator.clone())
        }
    }
}
