//! Reference exact backend.

mod branch_bound;

pub use branch_bound::BranchAndBoundSolver;

/// Status of a branch-and-bound search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStatus {
    /// Search tree exhausted, incumbent is optimal.
    Optimal,

    /// Search tree exhausted without a feasible assignment.
    Infeasible,

    /// Node limit reached, best assignment (if any) returned.
    NodeLimit,

    /// Time limit reached, best assignment (if any) returned.
    TimeLimit,
}

/// Diagnostics of the last search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchReport {
    /// Termination status.
    pub status: SearchStatus,

    /// Objective of the incumbent, `+inf` without one.
    pub objective: f64,

    /// Nodes explored.
    pub nodes_explored: u64,

    /// Nodes pruned by bound or infeasibility.
    pub nodes_pruned: u64,

    /// Number of incumbent improvements.
    pub incumbent_updates: u64,

    /// Search time in milliseconds.
    pub solve_time_ms: u64,
}

impl SearchReport {
    /// Check whether a feasible assignment was found.
    pub fn has_solution(&self) -> bool {
        self.objective.is_finite()
    }
}
