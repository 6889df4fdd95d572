//! Simulated annealing over binary quadratic models.

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::backend::{Sample, SampleSet, Sampler};
use crate::error::HybridResult;
use crate::penalty::{sparse, UnconstrainedModel};
use crate::settings::AnnealSettings;

/// Seeded single-flip Metropolis annealer.
///
/// Each read starts from a random state, sweeps every variable under a
/// geometric inverse-temperature schedule and finishes with a greedy descent
/// to the nearest local minimum. Reads stop early once the time limit is used
/// up; the read in progress is still reported.
pub struct AnnealingSampler {
    settings: AnnealSettings,
    rng: StdRng,
}

impl AnnealingSampler {
    /// Create a sampler.
    pub fn new(settings: AnnealSettings) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self { settings, rng }
    }

    /// Get the settings.
    pub fn settings(&self) -> &AnnealSettings {
        &self.settings
    }
}

impl Default for AnnealingSampler {
    fn default() -> Self {
        Self::new(AnnealSettings::default())
    }
}

/// Inverse temperatures accepting the largest possible uphill move with
/// probability 1/2 at the start and the smallest with probability 1/100 at
/// the end.
fn default_beta_range(linear: &[f64], adj: &[Vec<(usize, f64)>]) -> (f64, f64) {
    let mut max_delta: f64 = 0.0;
    let mut min_delta = f64::INFINITY;
    for (i, h) in linear.iter().enumerate() {
        let coefs = std::iter::once(*h).chain(adj[i].iter().map(|&(_, j)| j));
        let mut bound = 0.0;
        for c in coefs {
            let c = c.abs();
            if c > 0.0 {
                bound += c;
                min_delta = min_delta.min(c);
            }
        }
        max_delta = max_delta.max(bound);
    }
    if max_delta == 0.0 || !min_delta.is_finite() {
        return (0.1, 1.0);
    }
    let hot = std::f64::consts::LN_2 / max_delta;
    let cold = (100.0f64).ln() / min_delta;
    (hot, cold.max(hot))
}

struct Anneal<'a> {
    linear: &'a [f64],
    adj: &'a [Vec<(usize, f64)>],
    bits: Vec<u8>,
    field: Vec<f64>,
}

impl<'a> Anneal<'a> {
    fn new(linear: &'a [f64], adj: &'a [Vec<(usize, f64)>], bits: Vec<u8>) -> Self {
        let field = (0..linear.len())
            .map(|i| {
                linear[i]
                    + adj[i]
                        .iter()
                        .filter(|&&(j, _)| bits[j] != 0)
                        .map(|&(_, c)| c)
                        .sum::<f64>()
            })
            .collect();
        Self {
            linear,
            adj,
            bits,
            field,
        }
    }

    /// Energy change of flipping `i`.
    fn delta(&self, i: usize) -> f64 {
        if self.bits[i] == 0 {
            self.field[i]
        } else {
            -self.field[i]
        }
    }

    fn flip(&mut self, i: usize) {
        let step = if self.bits[i] == 0 { 1.0 } else { -1.0 };
        self.bits[i] ^= 1;
        for &(j, c) in &self.adj[i] {
            self.field[j] += step * c;
        }
    }

    fn sweep(&mut self, beta: f64, rng: &mut StdRng) {
        for i in 0..self.linear.len() {
            let d = self.delta(i);
            if d <= 0.0 || rng.random::<f64>() < (-beta * d).exp() {
                self.flip(i);
            }
        }
    }

    /// Flip strictly improving variables until none is left.
    fn descend(&mut self) {
        loop {
            let mut improved = false;
            for i in 0..self.linear.len() {
                if self.delta(i) < -1e-12 {
                    self.flip(i);
                    improved = true;
                }
            }
            if !improved {
                break;
            }
        }
    }
}

impl Sampler for AnnealingSampler {
    fn name(&self) -> &'static str {
        "simulated-annealing"
    }

    fn sample(
        &mut self,
        model: &UnconstrainedModel,
        time_limit: Duration,
    ) -> HybridResult<SampleSet> {
        let start = Instant::now();
        let n = model.num_vars();
        if n == 0 {
            return Ok(SampleSet::from_samples(vec![Sample {
                bits: Vec::new(),
                energy: model.offset(),
            }]));
        }

        let adj = sparse::neighbours(model.coupling());
        let (hot, cold) = self
            .settings
            .beta_range
            .unwrap_or_else(|| default_beta_range(model.linear(), &adj));
        let sweeps = self.settings.num_sweeps.max(1);
        let ratio = if sweeps > 1 {
            (cold / hot).powf(1.0 / (sweeps - 1) as f64)
        } else {
            1.0
        };

        let mut samples = Vec::with_capacity(self.settings.num_reads);
        let mut out_of_time = false;
        for _ in 0..self.settings.num_reads.max(1) {
            let init = (0..n).map(|_| self.rng.random_range(0..=1u8)).collect();
            let mut state = Anneal::new(model.linear(), &adj, init);
            let mut beta = hot;
            for _ in 0..sweeps {
                state.sweep(beta, &mut self.rng);
                beta *= ratio;
                if start.elapsed() >= time_limit {
                    out_of_time = true;
                    break;
                }
            }
            state.descend();
            let energy = model.energy(&state.bits);
            samples.push(Sample {
                bits: state.bits,
                energy,
            });
            if out_of_time {
                log::debug!("Annealer stopped after {} reads: time limit", samples.len());
                break;
            }
        }

        Ok(SampleSet::from_samples(samples))
    }
}
