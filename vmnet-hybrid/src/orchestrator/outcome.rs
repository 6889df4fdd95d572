//! Result types of the retune loop.

use vmnet_core::Assignment;

use crate::feasibility::FeasibilityResult;
use crate::weights::PenaltyWeights;

/// Terminal state of a solve request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// A candidate satisfied every constraint.
    Accepted,

    /// Iteration or time budget used up; the best-seen candidate (if any) is
    /// returned, marked infeasible.
    Exhausted,
}

impl SolveStatus {
    /// Returns true if the returned assignment is feasible.
    pub fn is_feasible(&self) -> bool {
        matches!(self, SolveStatus::Accepted)
    }
}

/// What happened in one solve/check cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationRecord {
    /// Zero-based cycle index.
    pub iteration: usize,

    /// Largest penalty weight the model was compiled with.
    pub max_weight: f64,

    /// Energy of the best sample; `None` if the sampler returned nothing.
    pub energy: Option<f64>,

    /// Violated constraints of the decoded candidate.
    pub violated: Option<usize>,

    /// Wall-clock time of the sampler call in milliseconds.
    pub sample_time_ms: u64,
}

/// Outcome of [`PenaltyOrchestrator::solve`](super::PenaltyOrchestrator::solve).
#[derive(Debug, Clone)]
pub struct SolveOutcome {
    /// Terminal state.
    pub status: SolveStatus,

    /// Accepted assignment, or the best-seen candidate.
    pub assignment: Option<Assignment>,

    /// Feasibility verdict of `assignment`.
    pub feasibility: Option<FeasibilityResult>,

    /// Objective value of `assignment`.
    pub objective: Option<f64>,

    /// Completed solve/check cycles.
    pub iterations: usize,

    /// Weight retunes applied.
    pub retunes: usize,

    /// Total wall-clock time in milliseconds.
    pub elapsed_ms: u64,

    /// Weights at termination.
    pub weights: PenaltyWeights,

    /// One record per cycle.
    pub history: Vec<IterationRecord>,
}

impl SolveOutcome {
    /// Returns true if the status is [`SolveStatus::Accepted`].
    pub fn is_feasible(&self) -> bool {
        self.status.is_feasible()
    }
}

/// A decoded candidate together with its verdict.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Decoded assignment.
    pub assignment: Assignment,
    /// Verdict against the source model.
    pub feasibility: FeasibilityResult,
    /// Source objective value.
    pub objective: f64,
}

impl Candidate {
    /// Lexicographic quality key: fewer violations, then smaller total
    /// violation, then lower objective.
    fn better_than(&self, other: &Candidate) -> bool {
        let key = |c: &Candidate| {
            (
                c.feasibility.num_violated(),
                c.feasibility.total_violation(),
                c.objective,
            )
        };
        let (a, b) = (key(self), key(other));
        a.0.cmp(&b.0)
            .then(a.1.total_cmp(&b.1))
            .then(a.2.total_cmp(&b.2))
            .is_lt()
    }
}

/// Best candidate seen across cycles.
#[derive(Debug, Clone, Default)]
pub struct BestCandidate {
    /// Current best, if any.
    pub candidate: Option<Candidate>,

    /// Number of times it was replaced.
    pub update_count: u64,
}

impl BestCandidate {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `candidate` if it beats the current best. Returns true if kept.
    pub fn offer(&mut self, candidate: Candidate) -> bool {
        let keep = self
            .candidate
            .as_ref()
            .map_or(true, |best| candidate.better_than(best));
        if keep {
            self.candidate = Some(candidate);
            self.update_count += 1;
        }
        keep
    }

    /// Take the best candidate out.
    pub fn take(&mut self) -> Option<Candidate> {
        self.candidate.take()
    }
}
