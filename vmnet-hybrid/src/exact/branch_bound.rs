//! Depth-first branch and bound over bounded integer variables.

use std::time::{Duration, Instant};

use vmnet_core::{Assignment, ConstrainedModel, Sense};

use super::{SearchReport, SearchStatus};
use crate::backend::ExactSolver;
use crate::error::{HybridError, HybridResult};
use crate::settings::BranchAndBoundSettings;

/// Largest integer domain the search will enumerate.
const MAX_DOMAIN: i64 = 1 << 16;

/// Exact solver for small linear-constrained models.
///
/// Variables are fixed in model order. A node is pruned when some constraint
/// can no longer be met over the remaining domains, or when the objective
/// lower bound cannot beat the incumbent. Values are tried cheapest first
/// according to the linear objective coefficient.
pub struct BranchAndBoundSolver {
    settings: BranchAndBoundSettings,
    last: Option<SearchReport>,
}

impl BranchAndBoundSolver {
    /// Create a solver.
    pub fn new(settings: BranchAndBoundSettings) -> Self {
        Self {
            settings,
            last: None,
        }
    }

    /// Diagnostics of the last call to [`ExactSolver::solve`].
    pub fn report(&self) -> Option<&SearchReport> {
        self.last.as_ref()
    }
}

impl Default for BranchAndBoundSolver {
    fn default() -> Self {
        Self::new(BranchAndBoundSettings::default())
    }
}

/// Running range of one constraint's left-hand side.
struct Row {
    sense: Sense,
    rhs: f64,
    /// Constant plus assigned terms.
    fixed: f64,
    /// Smallest contribution of unassigned terms.
    lo_rest: f64,
    /// Largest contribution of unassigned terms.
    hi_rest: f64,
}

impl Row {
    fn reachable(&self, tol: f64) -> bool {
        let lo = self.fixed + self.lo_rest;
        let hi = self.fixed + self.hi_rest;
        match self.sense {
            Sense::Le => lo <= self.rhs + tol,
            Sense::Ge => hi >= self.rhs - tol,
            Sense::Eq => lo <= self.rhs + tol && hi >= self.rhs - tol,
        }
    }
}

struct Search<'a> {
    model: &'a ConstrainedModel,
    settings: &'a BranchAndBoundSettings,
    bounds: Vec<(f64, f64)>,
    columns: Vec<Vec<(usize, f64)>>,
    rows: Vec<Row>,
    obj_linear: Vec<f64>,
    obj_fixed: f64,
    obj_rest_min: f64,
    quadratic: Vec<(usize, usize, f64)>,
    values: Vec<f64>,
    assigned: Vec<bool>,
    best: Option<(Vec<f64>, f64)>,
    nodes_explored: u64,
    nodes_pruned: u64,
    incumbent_updates: u64,
    start: Instant,
    time_limit: Duration,
    stop: Option<SearchStatus>,
}

fn span(coef: f64, (lo, hi): (f64, f64)) -> (f64, f64) {
    let (a, b) = (coef * lo, coef * hi);
    (a.min(b), a.max(b))
}

impl<'a> Search<'a> {
    fn new(
        model: &'a ConstrainedModel,
        settings: &'a BranchAndBoundSettings,
        time_limit: Duration,
    ) -> HybridResult<Self> {
        let n = model.num_vars();
        let bounds: Vec<(f64, f64)> = model.variables().iter().map(|v| v.kind.bounds()).collect();
        if let Some(v) = model.variables().iter().find(|v| {
            let (lo, hi) = v.kind.bounds();
            (hi - lo) as i64 > MAX_DOMAIN
        }) {
            return Err(HybridError::Unsupported(format!(
                "domain of {} is too large to enumerate",
                v.key
            )));
        }

        let mut columns = vec![Vec::new(); n];
        let mut rows = Vec::with_capacity(model.num_constraints());
        for (k, c) in model.constraints().iter().enumerate() {
            if !c.expr.is_linear() {
                return Err(HybridError::Unsupported(format!(
                    "constraint {} is quadratic",
                    c.label
                )));
            }
            let mut row = Row {
                sense: c.sense,
                rhs: c.rhs,
                fixed: c.expr.constant_term(),
                lo_rest: 0.0,
                hi_rest: 0.0,
            };
            for (v, coef) in c.expr.linear_terms() {
                let (lo, hi) = span(coef, bounds[v]);
                row.lo_rest += lo;
                row.hi_rest += hi;
                columns[v].push((k, coef));
            }
            rows.push(row);
        }

        let objective = model.objective();
        let mut obj_linear = vec![0.0; n];
        let mut obj_rest_min = 0.0;
        for (v, coef) in objective.linear_terms() {
            obj_linear[v] = coef;
            obj_rest_min += span(coef, bounds[v]).0;
        }

        Ok(Self {
            model,
            settings,
            bounds,
            columns,
            rows,
            obj_linear,
            obj_fixed: objective.constant_term(),
            obj_rest_min,
            quadratic: objective.quadratic_terms().collect(),
            values: vec![0.0; n],
            assigned: vec![false; n],
            best: None,
            nodes_explored: 0,
            nodes_pruned: 0,
            incumbent_updates: 0,
            start: Instant::now(),
            time_limit,
            stop: None,
        })
    }

    /// Range of a variable under the current partial assignment.
    fn range(&self, v: usize) -> (f64, f64) {
        if self.assigned[v] {
            (self.values[v], self.values[v])
        } else {
            self.bounds[v]
        }
    }

    fn lower_bound(&self) -> f64 {
        let quad: f64 = self
            .quadratic
            .iter()
            .map(|&(a, b, c)| {
                let (alo, ahi) = self.range(a);
                let (blo, bhi) = self.range(b);
                if a == b {
                    // c·x² over [lo, hi]
                    let sq = [alo * alo, ahi * ahi];
                    let min_sq = if alo <= 0.0 && ahi >= 0.0 { 0.0 } else { sq[0].min(sq[1]) };
                    let max_sq = sq[0].max(sq[1]);
                    (c * min_sq).min(c * max_sq)
                } else {
                    [alo * blo, alo * bhi, ahi * blo, ahi * bhi]
                        .into_iter()
                        .map(|p| c * p)
                        .fold(f64::INFINITY, f64::min)
                }
            })
            .sum();
        self.obj_fixed + self.obj_rest_min + quad
    }

    fn incumbent_obj(&self) -> f64 {
        self.best.as_ref().map_or(f64::INFINITY, |(_, obj)| *obj)
    }

    /// Fix `v = value`; returns whether every touched constraint is still
    /// reachable. Must be undone with [`Search::unassign`].
    fn assign(&mut self, v: usize, value: f64) -> bool {
        let tol = self.settings.tolerance;
        let bounds = self.bounds[v];
        let mut ok = true;
        for &(k, coef) in &self.columns[v] {
            let (lo, hi) = span(coef, bounds);
            let row = &mut self.rows[k];
            row.fixed += coef * value;
            row.lo_rest -= lo;
            row.hi_rest -= hi;
            ok &= row.reachable(tol);
        }
        let c = self.obj_linear[v];
        self.obj_fixed += c * value;
        self.obj_rest_min -= span(c, bounds).0;
        self.values[v] = value;
        self.assigned[v] = true;
        ok
    }

    fn unassign(&mut self, v: usize, value: f64) {
        let bounds = self.bounds[v];
        for &(k, coef) in &self.columns[v] {
            let (lo, hi) = span(coef, bounds);
            let row = &mut self.rows[k];
            row.fixed -= coef * value;
            row.lo_rest += lo;
            row.hi_rest += hi;
        }
        let c = self.obj_linear[v];
        self.obj_fixed -= c * value;
        self.obj_rest_min += span(c, bounds).0;
        self.assigned[v] = false;
    }

    fn check_limits(&mut self) {
        if self.nodes_explored >= self.settings.max_nodes {
            self.stop = Some(SearchStatus::NodeLimit);
        } else if self.nodes_explored % 256 == 0 && self.start.elapsed() >= self.time_limit {
            self.stop = Some(SearchStatus::TimeLimit);
        }
    }

    fn dfs(&mut self, v: usize) {
        self.check_limits();
        if self.stop.is_some() {
            return;
        }
        self.nodes_explored += 1;

        if self.settings.verbose && self.nodes_explored % self.settings.log_freq.max(1) == 0 {
            log::info!(
                "B&B: {} nodes explored, {} pruned, incumbent {:.6e}",
                self.nodes_explored,
                self.nodes_pruned,
                self.incumbent_obj()
            );
        }

        if self.lower_bound() >= self.incumbent_obj() - 1e-9 {
            self.nodes_pruned += 1;
            return;
        }

        if v == self.values.len() {
            let obj = self.model.objective().evaluate(&self.values);
            if obj < self.incumbent_obj() {
                self.best = Some((self.values.clone(), obj));
                self.incumbent_updates += 1;
                if self.settings.verbose {
                    log::info!("New incumbent: obj={:.6e}", obj);
                }
            }
            return;
        }

        let (lo, hi) = (self.bounds[v].0 as i64, self.bounds[v].1 as i64);
        let ascending = self.obj_linear[v] >= 0.0;
        for step in 0..=(hi - lo) {
            let value = (if ascending { lo + step } else { hi - step }) as f64;
            if self.assign(v, value) {
                self.dfs(v + 1);
            } else {
                self.nodes_pruned += 1;
            }
            self.unassign(v, value);
            if self.stop.is_some() {
                return;
            }
        }
    }
}

impl ExactSolver for BranchAndBoundSolver {
    fn name(&self) -> &'static str {
        "branch-and-bound"
    }

    fn solve(
        &mut self,
        model: &ConstrainedModel,
        time_limit: Duration,
    ) -> HybridResult<Option<Assignment>> {
        let mut search = Search::new(model, &self.settings, time_limit)?;

        let tol = self.settings.tolerance;
        if search.rows.iter().all(|r| r.reachable(tol)) {
            search.dfs(0);
        }

        let status = search.stop.unwrap_or(if search.best.is_some() {
            SearchStatus::Optimal
        } else {
            SearchStatus::Infeasible
        });
        let report = SearchReport {
            status,
            objective: search.incumbent_obj(),
            nodes_explored: search.nodes_explored,
            nodes_pruned: search.nodes_pruned,
            incumbent_updates: search.incumbent_updates,
            solve_time_ms: search.start.elapsed().as_millis() as u64,
        };
        log::debug!(
            "B&B on {}: {:?} after {} nodes, obj {:.6e}",
            model.name(),
            report.status,
            report.nodes_explored,
            report.objective
        );

        let assignment = match search.best {
            Some((x, _)) => Some(model.assignment_from_values(&x)?),
            None => None,
        };
        self.last = Some(report);
        Ok(assignment)
    }
}
