//! Penalty retune loop around a [`Sampler`].
//!
//! Each request runs the state machine
//!
//! ```text
//! Init → Solving → Decoding → Checking → Accepted
//!                                      → Retuning → Solving
//!                                                 → Exhausted
//! ```
//!
//! Weights start from the per-kind defaults. Every infeasible cycle scales
//! the weights of the violated constraints (or all of them, depending on
//! [`RescalePolicy`]) by the escalation factor. A failed or empty sampler call
//! counts as a cycle and leaves the weights alone. The loop stops with
//! [`SolveStatus::Exhausted`] after `max_iterations` retunes or once the time
//! budget is spent, returning the best candidate it saw.

mod outcome;

pub use outcome::{BestCandidate, Candidate, IterationRecord, SolveOutcome, SolveStatus};

use std::time::Instant;

use vmnet_core::{Assignment, ConstrainedModel};

use crate::backend::{Sample, Sampler};
use crate::error::HybridResult;
use crate::feasibility;
use crate::penalty::{self, UnconstrainedModel};
use crate::settings::{OrchestratorSettings, RescalePolicy};
use crate::weights::PenaltyWeights;

/// Stage of the retune loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Weights and deadline set up.
    Init,
    /// Compiling and sampling.
    Solving,
    /// Turning the best sample into an assignment.
    Decoding,
    /// Checking the assignment against the source model.
    Checking,
    /// Rescaling weights.
    Retuning,
    /// Feasible candidate found.
    Accepted,
    /// Budget used up.
    Exhausted,
}

enum State {
    Solving,
    Decoding {
        compiled: UnconstrainedModel,
        sample: Option<Sample>,
    },
    Checking(Assignment),
    /// Indices of violated constraints; `None` without a candidate.
    Retuning(Option<Vec<usize>>),
    Accepted(Candidate),
    Exhausted,
}

impl State {
    fn phase(&self) -> Phase {
        match self {
            State::Solving => Phase::Solving,
            State::Decoding { .. } => Phase::Decoding,
            State::Checking(_) => Phase::Checking,
            State::Retuning(_) => Phase::Retuning,
            State::Accepted(_) => Phase::Accepted,
            State::Exhausted => Phase::Exhausted,
        }
    }
}

/// Drives a sampler until a feasible assignment is found or the budget runs
/// out.
pub struct PenaltyOrchestrator<S: Sampler> {
    sampler: S,
    settings: OrchestratorSettings,
}

impl<S: Sampler> PenaltyOrchestrator<S> {
    /// Create an orchestrator.
    pub fn new(sampler: S, settings: OrchestratorSettings) -> Self {
        Self { sampler, settings }
    }

    /// Get the settings.
    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Get the sampler.
    pub fn sampler(&self) -> &S {
        &self.sampler
    }

    /// Consume the orchestrator and return the sampler.
    pub fn into_sampler(self) -> S {
        self.sampler
    }

    /// Solve `model`.
    ///
    /// Configuration, weight and compilation errors are returned as `Err`.
    /// Sampler failures are not: they only cost a cycle.
    pub fn solve(&mut self, model: &ConstrainedModel) -> HybridResult<SolveOutcome> {
        self.settings.validate()?;
        let settings = &self.settings;

        let start = Instant::now();
        let deadline = start + settings.time_budget();
        let mut weights = PenaltyWeights::from_defaults(model, &settings.initial_weights);
        weights.validate(model)?;

        let mut iterations = 0;
        let mut retunes = 0;
        let mut best = BestCandidate::new();
        let mut history: Vec<IterationRecord> = Vec::new();

        log::debug!(
            "{:?} -> {:?}: {} constraints, budget {} ms",
            Phase::Init,
            Phase::Solving,
            model.num_constraints(),
            settings.time_budget_ms
        );
        let mut state = State::Solving;

        let accepted = loop {
            let next = match state {
                State::Solving => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        State::Exhausted
                    } else {
                        let compiled = penalty::compile(model, &weights)?;
                        let slice = settings.time_slice().min(remaining);
                        let call = Instant::now();
                        let sample = match self.sampler.sample(&compiled, slice) {
                            Ok(set) => set.first().cloned(),
                            Err(e) => {
                                log::warn!("Sampler {} failed: {}", self.sampler.name(), e);
                                None
                            }
                        };
                        history.push(IterationRecord {
                            iteration: iterations,
                            max_weight: weights.max(),
                            energy: sample.as_ref().map(|s| s.energy),
                            violated: None,
                            sample_time_ms: call.elapsed().as_millis() as u64,
                        });
                        iterations += 1;
                        State::Decoding { compiled, sample }
                    }
                }

                State::Decoding { compiled, sample } => {
                    match sample.map(|s| compiled.decode(&s.bits)) {
                        Some(Ok(assignment)) => State::Checking(assignment),
                        Some(Err(e)) => {
                            log::warn!("Discarding sample from {}: {}", self.sampler.name(), e);
                            State::Retuning(None)
                        }
                        None => State::Retuning(None),
                    }
                }

                State::Checking(assignment) => {
                    let result = feasibility::check(model, &assignment, settings.tolerance)?;
                    let objective = model.objective_value(&assignment)?;
                    if let Some(record) = history.last_mut() {
                        record.violated = Some(result.num_violated());
                    }
                    if settings.verbose {
                        log::info!(
                            "iter {:>3}: max weight {:.3e}, objective {:.6e}, {} violated",
                            iterations - 1,
                            weights.max(),
                            objective,
                            result.num_violated()
                        );
                    }
                    let violated: Vec<usize> = result.violated().map(|c| c.index).collect();
                    let candidate = Candidate {
                        assignment,
                        feasibility: result,
                        objective,
                    };
                    if candidate.feasibility.feasible {
                        State::Accepted(candidate)
                    } else {
                        best.offer(candidate);
                        State::Retuning(Some(violated))
                    }
                }

                State::Retuning(violated) => {
                    match (violated, settings.rescale) {
                        (Some(_), RescalePolicy::All) => {
                            weights.scale_all(settings.escalation_factor);
                        }
                        (Some(indices), RescalePolicy::ViolatedOnly) => {
                            for i in indices {
                                weights.scale(i, settings.escalation_factor);
                            }
                        }
                        (None, _) => {}
                    }
                    retunes += 1;
                    if retunes >= settings.max_iterations || Instant::now() >= deadline {
                        State::Exhausted
                    } else {
                        State::Solving
                    }
                }

                State::Accepted(candidate) => break Some(candidate),
                State::Exhausted => break None,
            };
            log::debug!("-> {:?}", next.phase());
            state = next;
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let (status, candidate) = match accepted {
            Some(c) => (SolveStatus::Accepted, Some(c)),
            None => (SolveStatus::Exhausted, best.take()),
        };
        if settings.verbose {
            log::info!(
                "{}: {:?} after {} iterations, {} retunes, {} ms",
                model.name(),
                status,
                iterations,
                retunes,
                elapsed_ms
            );
        }

        let (assignment, feasibility, objective) = match candidate {
            Some(c) => (Some(c.assignment), Some(c.feasibility), Some(c.objective)),
            None => (None, None, None),
        };
        Ok(SolveOutcome {
            status,
            assignment,
            feasibility,
            objective,
            iterations,
            retunes,
            elapsed_ms,
            weights,
            history,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SampleSet;
    use crate::error::HybridError;
    use crate::settings::WeightDefaults;
    use std::time::Duration;
    use vmnet_core::{ConstraintKind, Expr, NodeId, Sense, VarKey, VmId};

    fn key(n: usize) -> VarKey {
        VarKey::Placement {
            vm: VmId(0),
            node: NodeId(n),
        }
    }

    /// `a + b = 1` (assignment), `b ≤ 1` (capacity).
    fn model() -> ConstrainedModel {
        let mut m = ConstrainedModel::new("toy");
        let a = m.add_binary(key(0)).unwrap();
        let b = m.add_binary(key(1)).unwrap();
        m.set_objective(Expr::linear([(a, 1.0), (b, 2.0)])).unwrap();
        m.add_constraint(
            "one",
            ConstraintKind::Assignment,
            Expr::linear([(a, 1.0), (b, 1.0)]),
            Sense::Eq,
            1.0,
        )
        .unwrap();
        m.add_constraint("cap", ConstraintKind::Capacity, Expr::linear([(b, 1.0)]), Sense::Le, 1.0)
            .unwrap();
        m
    }

    fn at(a: f64, b: f64) -> Assignment {
        [(key(0), a), (key(1), b)].into_iter().collect()
    }

    /// Returns the same assignment on every call.
    struct FixedSampler {
        assignment: Assignment,
        calls: usize,
    }

    impl FixedSampler {
        fn new(assignment: Assignment) -> Self {
            Self { assignment, calls: 0 }
        }
    }

    impl Sampler for FixedSampler {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn sample(&mut self, model: &UnconstrainedModel, _: Duration) -> HybridResult<SampleSet> {
            self.calls += 1;
            let bits = model.encode(&self.assignment)?;
            let energy = model.energy(&bits);
            Ok(SampleSet::from_samples(vec![Sample { bits, energy }]))
        }
    }

    struct FailingSampler {
        calls: usize,
    }

    impl Sampler for FailingSampler {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn sample(&mut self, _: &UnconstrainedModel, _: Duration) -> HybridResult<SampleSet> {
            self.calls += 1;
            Err(HybridError::Sampler("offline".into()))
        }
    }

    /// Returns a fixed bit pattern regardless of the model size.
    struct RawSampler {
        bits: Vec<u8>,
        calls: usize,
    }

    impl Sampler for RawSampler {
        fn name(&self) -> &'static str {
            "raw"
        }

        fn sample(&mut self, _: &UnconstrainedModel, _: Duration) -> HybridResult<SampleSet> {
            self.calls += 1;
            Ok(SampleSet::from_samples(vec![Sample {
                bits: self.bits.clone(),
                energy: 0.0,
            }]))
        }
    }

    fn settings() -> OrchestratorSettings {
        OrchestratorSettings::default()
            .with_max_iterations(3)
            .with_escalation_factor(2.0)
    }

    #[test]
    fn test_feasible_candidate_accepted_first_cycle() {
        let m = model();
        let mut orch = PenaltyOrchestrator::new(FixedSampler::new(at(1.0, 0.0)), settings());
        let out = orch.solve(&m).unwrap();

        assert_eq!(out.status, SolveStatus::Accepted);
        assert_eq!(out.iterations, 1);
        assert_eq!(out.retunes, 0);
        assert_eq!(out.weights, PenaltyWeights::from_defaults(&m, &WeightDefaults::default()));
        assert_eq!(out.assignment, Some(at(1.0, 0.0)));
        assert_eq!(out.objective, Some(1.0));
        assert!(out.feasibility.unwrap().feasible);
        assert_eq!(orch.sampler().calls, 1);
    }

    #[test]
    fn test_infeasible_candidate_exhausts_after_max_iterations() {
        let m = model();
        let mut orch = PenaltyOrchestrator::new(FixedSampler::new(at(1.0, 1.0)), settings());
        let out = orch.solve(&m).unwrap();

        assert_eq!(out.status, SolveStatus::Exhausted);
        assert!(!out.is_feasible());
        assert_eq!(out.retunes, 3);
        assert_eq!(out.iterations, 3);
        // Only the violated row is escalated.
        assert_eq!(out.weights.values(), &[50.0 * 8.0, 10.0]);
        assert_eq!(out.assignment, Some(at(1.0, 1.0)));
        assert_eq!(out.feasibility.unwrap().num_violated(), 1);
        assert_eq!(out.history.len(), 3);
        assert_eq!(
            out.history.iter().map(|r| r.max_weight).collect::<Vec<_>>(),
            vec![50.0, 100.0, 200.0]
        );
        assert!(out.history.iter().all(|r| r.violated == Some(1)));
    }

    #[test]
    fn test_rescale_all() {
        let m = model();
        let s = settings().with_rescale(RescalePolicy::All);
        let out = PenaltyOrchestrator::new(FixedSampler::new(at(0.0, 0.0)), s)
            .solve(&m)
            .unwrap();
        assert_eq!(out.weights.values(), &[400.0, 80.0]);
    }

    #[test]
    fn test_sampler_failure_is_not_fatal() {
        let m = model();
        let mut orch = PenaltyOrchestrator::new(FailingSampler { calls: 0 }, settings());
        let out = orch.solve(&m).unwrap();

        assert_eq!(out.status, SolveStatus::Exhausted);
        assert_eq!(out.retunes, 3);
        assert!(out.assignment.is_none());
        assert_eq!(out.weights.values(), &[50.0, 10.0]);
        assert!(out.history.iter().all(|r| r.energy.is_none()));
        assert_eq!(orch.into_sampler().calls, 3);
    }

    #[test]
    fn test_malformed_samples_are_discarded() {
        let m = model();
        for bits in [vec![1], Vec::new(), vec![1, 0, 0, 0, 0], vec![1, 0, 7]] {
            let sampler = RawSampler {
                bits: bits.clone(),
                calls: 0,
            };
            let mut orch = PenaltyOrchestrator::new(sampler, settings());
            let out = orch.solve(&m).unwrap();

            assert_eq!(out.status, SolveStatus::Exhausted, "bits {:?}", bits);
            assert_eq!(out.retunes, 3);
            assert!(out.assignment.is_none());
            assert_eq!(out.weights.values(), &[50.0, 10.0]);
            assert!(out.history.iter().all(|r| r.violated.is_none()));
            assert_eq!(orch.sampler().calls, 3);
        }
    }

    #[test]
    fn test_zero_budget_never_calls_sampler() {
        let m = model();
        let s = settings().with_time_budget(0.0);
        let mut orch = PenaltyOrchestrator::new(FixedSampler::new(at(1.0, 0.0)), s);
        let out = orch.solve(&m).unwrap();

        assert_eq!(out.status, SolveStatus::Exhausted);
        assert_eq!(out.iterations, 0);
        assert_eq!(orch.sampler().calls, 0);
    }

    #[test]
    fn test_invalid_configuration_is_fatal() {
        let m = model();
        let s = settings().with_initial_weights(WeightDefaults::uniform(-1.0));
        let err = PenaltyOrchestrator::new(FixedSampler::new(at(1.0, 0.0)), s).solve(&m);
        assert!(matches!(err, Err(HybridError::InvalidWeight { .. })));

        let s = settings().with_escalation_factor(0.5);
        let err = PenaltyOrchestrator::new(FixedSampler::new(at(1.0, 0.0)), s).solve(&m);
        assert!(matches!(err, Err(HybridError::Model(_))));
    }
}
