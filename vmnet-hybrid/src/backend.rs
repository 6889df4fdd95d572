//! Solver backend traits and types.
//!
//! Two kinds of external solver plug in here:
//!
//! - a [`Sampler`] minimises an [`UnconstrainedModel`] and returns ranked
//!   low-energy samples; the retune loop drives it.
//! - an [`ExactSolver`] takes the [`ConstrainedModel`] directly and returns
//!   an assignment or nothing.
//!
//! Both calls are blocking and bounded by the time limit they are given.

use std::time::Duration;

use vmnet_core::{Assignment, ConstrainedModel};

use crate::error::HybridResult;
use crate::penalty::UnconstrainedModel;

/// One sample of an unconstrained model.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Value of every binary variable, slack included.
    pub bits: Vec<u8>,
    /// Energy of `bits`.
    pub energy: f64,
}

/// Samples ranked by energy, lowest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleSet {
    samples: Vec<Sample>,
}

impl SampleSet {
    /// Empty set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Rank the given samples by energy; identical bit patterns are kept once.
    pub fn from_samples(mut samples: Vec<Sample>) -> Self {
        samples.sort_by(|a, b| a.energy.total_cmp(&b.energy).then_with(|| a.bits.cmp(&b.bits)));
        samples.dedup_by(|a, b| a.bits == b.bits);
        Self { samples }
    }

    /// Lowest-energy sample.
    pub fn first(&self) -> Option<&Sample> {
        self.samples.first()
    }

    /// All samples, lowest energy first.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check whether there are no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Minimiser of unconstrained binary quadratic models.
pub trait Sampler {
    /// Get the sampler name.
    fn name(&self) -> &'static str;

    /// Sample low-energy states within `time_limit`.
    ///
    /// An empty set is a valid answer. Errors are treated by the retune loop
    /// as an empty set.
    fn sample(
        &mut self,
        model: &UnconstrainedModel,
        time_limit: Duration,
    ) -> HybridResult<SampleSet>;
}

/// Solver for constrained models.
pub trait ExactSolver {
    /// Get the solver name.
    fn name(&self) -> &'static str;

    /// Solve within `time_limit`. `Ok(None)` means no solution was found.
    fn solve(
        &mut self,
        model: &ConstrainedModel,
        time_limit: Duration,
    ) -> HybridResult<Option<Assignment>>;
}

impl<S: Sampler + ?Sized> Sampler for Box<S> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn sample(
        &mut self,
        model: &UnconstrainedModel,
        time_limit: Duration,
    ) -> HybridResult<SampleSet> {
        (**self).sample(model, time_limit)
    }
}

impl<E: ExactSolver + ?Sized> ExactSolver for Box<E> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn solve(
        &mut self,
        model: &ConstrainedModel,
        time_limit: Duration,
    ) -> HybridResult<Option<Assignment>> {
        (**self).solve(model, time_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(bits: &[u8], energy: f64) -> Sample {
        Sample {
            bits: bits.to_vec(),
            energy,
        }
    }

    #[test]
    fn test_sample_set_is_ranked() {
        let set = SampleSet::from_samples(vec![s(&[1, 0], 3.0), s(&[0, 1], -1.0), s(&[1, 1], 2.0)]);
        let energies: Vec<f64> = set.samples().iter().map(|s| s.energy).collect();
        assert_eq!(energies, vec![-1.0, 2.0, 3.0]);
        assert_eq!(set.first().map(|s| s.bits.clone()), Some(vec![0, 1]));
    }

    #[test]
    fn test_sample_set_dedups() {
        let set = SampleSet::from_samples(vec![s(&[1, 0], 1.0), s(&[1, 0], 1.0), s(&[0, 0], 1.0)]);
        assert_eq!(set.len(), 2);
        assert!(SampleSet::empty().first().is_none());
    }
}
