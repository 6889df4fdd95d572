//! Configuration settings for the solve backends.
//!
//! Each component takes only its own settings struct: the retune loop reads
//! [`OrchestratorSettings`], the reference sampler [`AnnealSettings`], the
//! reference exact backend [`BranchAndBoundSettings`].

use std::time::Duration;

use vmnet_core::{ConstraintKind, ModelError};

use crate::error::HybridResult;

/// Which penalty weights a retune step rescales.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RescalePolicy {
    /// Only constraints the candidate violated.
    #[default]
    ViolatedOnly,

    /// Every constraint, whenever the candidate is infeasible.
    All,
}

/// Initial penalty weight for each constraint kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightDefaults {
    /// Each VM on exactly one node.
    pub assignment: f64,
    /// Node compute/memory capacity.
    pub capacity: f64,
    /// Link bandwidth.
    pub link_capacity: f64,
    /// Flow balance at nodes.
    pub flow_conservation: f64,
    /// Link requires powered endpoints.
    pub link_activation: f64,
}

impl Default for WeightDefaults {
    fn default() -> Self {
        Self {
            assignment: 50.0,
            capacity: 10.0,
            link_capacity: 10.0,
            flow_conservation: 50.0,
            link_activation: 10.0,
        }
    }
}

impl WeightDefaults {
    /// Same weight for every kind.
    pub fn uniform(weight: f64) -> Self {
        Self {
            assignment: weight,
            capacity: weight,
            link_capacity: weight,
            flow_conservation: weight,
            link_activation: weight,
        }
    }

    /// Weight for one kind.
    pub fn for_kind(&self, kind: ConstraintKind) -> f64 {
        match kind {
            ConstraintKind::Assignment => self.assignment,
            ConstraintKind::Capacity => self.capacity,
            ConstraintKind::LinkCapacity => self.link_capacity,
            ConstraintKind::FlowConservation => self.flow_conservation,
            ConstraintKind::LinkActivation => self.link_activation,
        }
    }
}

/// Settings for the penalty retune loop.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    // === Penalty weights ===
    /// Starting weight per constraint kind.
    pub initial_weights: WeightDefaults,

    /// Multiplicative factor applied to a weight on each retune (> 1).
    pub escalation_factor: f64,

    /// Which weights a retune rescales.
    pub rescale: RescalePolicy,

    // === Termination ===
    /// Number of retunes after which the loop gives up.
    pub max_iterations: usize,

    /// Overall wall-clock budget in milliseconds.
    pub time_budget_ms: u64,

    /// Upper bound on a single sampler call in milliseconds.
    pub time_slice_ms: u64,

    // === Feasibility ===
    /// Absolute tolerance on constraint slack.
    pub tolerance: f64,

    // === Output ===
    /// Log every iteration at info level.
    pub verbose: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            initial_weights: WeightDefaults::default(),
            escalation_factor: 2.0,
            rescale: RescalePolicy::default(),
            max_iterations: 10,
            time_budget_ms: 60_000,
            time_slice_ms: 5_000,
            tolerance: 1e-6,
            verbose: false,
        }
    }
}

impl OrchestratorSettings {
    /// Create settings with verbose output enabled.
    pub fn verbose() -> Self {
        Self {
            verbose: true,
            ..Self::default()
        }
    }

    /// Set the overall time budget in seconds.
    pub fn with_time_budget(mut self, seconds: f64) -> Self {
        self.time_budget_ms = (seconds * 1000.0) as u64;
        self
    }

    /// Set the per-call time slice in seconds.
    pub fn with_time_slice(mut self, seconds: f64) -> Self {
        self.time_slice_ms = (seconds * 1000.0) as u64;
        self
    }

    /// Set the retune limit.
    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    /// Set the weight escalation factor.
    pub fn with_escalation_factor(mut self, factor: f64) -> Self {
        self.escalation_factor = factor;
        self
    }

    /// Set the initial weights.
    pub fn with_initial_weights(mut self, weights: WeightDefaults) -> Self {
        self.initial_weights = weights;
        self
    }

    /// Set the rescale policy.
    pub fn with_rescale(mut self, rescale: RescalePolicy) -> Self {
        self.rescale = rescale;
        self
    }

    /// Set the feasibility tolerance.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Overall budget as a duration.
    pub fn time_budget(&self) -> Duration {
        Duration::from_millis(self.time_budget_ms)
    }

    /// Per-call slice as a duration.
    pub fn time_slice(&self) -> Duration {
        Duration::from_millis(self.time_slice_ms)
    }

    /// Reject settings the loop cannot run with.
    pub fn validate(&self) -> HybridResult<()> {
        if !(self.escalation_factor.is_finite() && self.escalation_factor > 1.0) {
            return Err(config(format!(
                "escalation factor must be > 1, got {}",
                self.escalation_factor
            )));
        }
        if self.time_slice_ms == 0 {
            return Err(config("time slice must be at least 1 ms".into()));
        }
        if self.max_iterations == 0 {
            return Err(config("max_iterations must be at least 1".into()));
        }
        if !(self.tolerance.is_finite() && self.tolerance >= 0.0) {
            return Err(config(format!("invalid tolerance {}", self.tolerance)));
        }
        Ok(())
    }
}

fn config(msg: String) -> crate::error::HybridError {
    ModelError::Configuration(msg).into()
}

/// Settings for the simulated-annealing reference sampler.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnealSettings {
    /// Independent restarts per call.
    pub num_reads: usize,

    /// Full sweeps over all variables per read.
    pub num_sweeps: usize,

    /// Inverse temperature range `(hot, cold)`; `None` derives it from the
    /// model's coefficients.
    pub beta_range: Option<(f64, f64)>,

    /// RNG seed; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for AnnealSettings {
    fn default() -> Self {
        Self {
            num_reads: 16,
            num_sweeps: 1_000,
            beta_range: None,
            seed: None,
        }
    }
}

impl AnnealSettings {
    /// Set the RNG seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set reads and sweeps.
    pub fn with_effort(mut self, num_reads: usize, num_sweeps: usize) -> Self {
        self.num_reads = num_reads;
        self.num_sweeps = num_sweeps;
        self
    }
}

/// Settings for the branch-and-bound reference exact solver.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchAndBoundSettings {
    /// Maximum number of search nodes.
    pub max_nodes: u64,

    /// Slack tolerance when checking bounds.
    pub tolerance: f64,

    /// Log progress.
    pub verbose: bool,

    /// Log frequency (every N nodes).
    pub log_freq: u64,
}

impl Default for BranchAndBoundSettings {
    fn default() -> Self {
        Self {
            max_nodes: 10_000_000,
            tolerance: 1e-9,
            verbose: false,
            log_freq: 100_000,
        }
    }
}

impl BranchAndBoundSettings {
    /// Set maximum nodes.
    pub fn with_max_nodes(mut self, nodes: u64) -> Self {
        self.max_nodes = nodes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_validate() {
        assert!(OrchestratorSettings::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_settings() {
        let s = OrchestratorSettings::default().with_escalation_factor(1.0);
        assert!(s.validate().is_err());

        let s = OrchestratorSettings::default().with_max_iterations(0);
        assert!(s.validate().is_err());

        let s = OrchestratorSettings::default().with_tolerance(-1.0);
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_zero_time_slice_rejected() {
        let s = OrchestratorSettings::default().with_time_slice(0.0);
        assert!(matches!(
            s.validate(),
            Err(crate::error::HybridError::Model(ModelError::Configuration(_)))
        ));
        // Below a millisecond truncates to zero.
        assert!(OrchestratorSettings::default().with_time_slice(0.0004).validate().is_err());
        assert!(OrchestratorSettings::default().with_time_slice(0.001).validate().is_ok());
    }

    #[test]
    fn test_time_conversions() {
        let s = OrchestratorSettings::default()
            .with_time_budget(1.5)
            .with_time_slice(0.25);
        assert_eq!(s.time_budget(), Duration::from_millis(1500));
        assert_eq!(s.time_slice(), Duration::from_millis(250));
    }

    #[test]
    fn test_weight_defaults_per_kind() {
        let w = WeightDefaults::uniform(3.0);
        for kind in ConstraintKind::ALL {
            assert_eq!(w.for_kind(kind), 3.0);
        }
        assert_eq!(WeightDefaults::default().for_kind(ConstraintKind::Assignment), 50.0);
    }
}
