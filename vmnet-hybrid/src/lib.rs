//! vmnet-hybrid: solving vmnet models.
//!
//! Two routes to an assignment:
//!
//! - exact: hand the [`ConstrainedModel`](vmnet_core::ConstrainedModel) to an
//!   [`ExactSolver`] such as [`BranchAndBoundSolver`].
//! - hybrid: [`compile`] it into an [`UnconstrainedModel`] with one penalty
//!   weight per constraint, minimise that with a [`Sampler`] such as
//!   [`AnnealingSampler`], check the decoded assignment and retune the weights
//!   until it is feasible ([`PenaltyOrchestrator`]).
//!
//! [`TwoStagePipeline`] chains placement and routing on either backend.
//!
//! # Example
//!
//! ```
//! use vmnet_core::{build_vm_model, TopologyConfig, VmDemand};
//! use vmnet_hybrid::{AnnealSettings, AnnealingSampler, OrchestratorSettings, PenaltyOrchestrator};
//!
//! let tree = TopologyConfig::binary(1, 10.0, 5.0, 10.0, 2.0).build()?;
//! let model = build_vm_model(&tree, &[VmDemand::compute(5.0); 2])?;
//!
//! let sampler = AnnealingSampler::new(AnnealSettings::default().with_seed(11));
//! let mut orchestrator = PenaltyOrchestrator::new(sampler, OrchestratorSettings::default());
//! let outcome = orchestrator.solve(&model)?;
//! assert!(outcome.is_feasible());
//! # Ok::<(), vmnet_hybrid::HybridError>(())
//! ```

#![warn(missing_docs)]

pub mod backend;
pub mod error;
pub mod exact;
pub mod feasibility;
pub mod orchestrator;
pub mod penalty;
pub mod pipeline;
pub mod sampler;
pub mod settings;
pub mod weights;

pub use backend::{ExactSolver, Sample, SampleSet, Sampler};
pub use error::{HybridError, HybridResult};
pub use exact::{BranchAndBoundSolver, SearchReport, SearchStatus};
pub use feasibility::{check, ConstraintCheck, FeasibilityResult};
pub use orchestrator::{
    BestCandidate, Candidate, IterationRecord, PenaltyOrchestrator, Phase, SolveOutcome,
    SolveStatus,
};
pub use penalty::{compile, BinaryEncoding, PenaltyTerm, UnconstrainedModel};
pub use pipeline::{
    Backend, FullReport, PathReport, PipelineReport, Routes, StageReport, StageStatus,
    TwoStagePipeline,
};
pub use sampler::AnnealingSampler;
pub use settings::{
    AnnealSettings, BranchAndBoundSettings, OrchestratorSettings, RescalePolicy, WeightDefaults,
};
pub use weights::PenaltyWeights;
