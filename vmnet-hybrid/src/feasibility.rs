//! Feasibility checking of candidate assignments against a constrained model.

use vmnet_core::{Assignment, ConstrainedModel, ConstraintKind, Sense};

use crate::error::HybridResult;

/// Outcome for one constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintCheck {
    /// Index in the model.
    pub index: usize,
    /// Constraint label.
    pub label: String,
    /// Constraint kind.
    pub kind: ConstraintKind,
    /// Left-hand side value.
    pub value: f64,
    /// `rhs − value` for `≤`/`=`, `value − rhs` for `≥`.
    pub slack: f64,
    /// Magnitude of the violation, 0 when satisfied.
    pub violation: f64,
    /// Satisfied within tolerance.
    pub satisfied: bool,
}

/// Per-constraint verdict for one assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct FeasibilityResult {
    /// One entry per constraint, in model order.
    pub checks: Vec<ConstraintCheck>,
    /// Every constraint satisfied.
    pub feasible: bool,
}

impl FeasibilityResult {
    /// Constraints that are not satisfied.
    pub fn violated(&self) -> impl Iterator<Item = &ConstraintCheck> {
        self.checks.iter().filter(|c| !c.satisfied)
    }

    /// Number of violated constraints.
    pub fn num_violated(&self) -> usize {
        self.violated().count()
    }

    /// Sum of violation magnitudes over violated constraints.
    pub fn total_violation(&self) -> f64 {
        self.violated().map(|c| c.violation).sum()
    }
}

/// Check `assignment` against every constraint of `model`.
///
/// An inequality is violated when its slack is below `-tolerance`, an
/// equality when `|slack| > tolerance`. Assignments that leave any model
/// variable unbound are rejected, never zero-filled.
pub fn check(
    model: &ConstrainedModel,
    assignment: &Assignment,
    tolerance: f64,
) -> HybridResult<FeasibilityResult> {
    let x = model.values_of(assignment)?;
    let checks: Vec<ConstraintCheck> = model
        .constraints()
        .iter()
        .enumerate()
        .map(|(index, c)| {
            let value = c.expr.evaluate(&x);
            let slack = c.slack(value);
            let satisfied = match c.sense {
                Sense::Eq => slack.abs() <= tolerance,
                Sense::Le | Sense::Ge => slack >= -tolerance,
            };
            ConstraintCheck {
                index,
                label: c.label.clone(),
                kind: c.kind,
                value,
                slack,
                violation: if satisfied { 0.0 } else { c.violation(value) },
                satisfied,
            }
        })
        .collect();
    let feasible = checks.iter().all(|c| c.satisfied);
    Ok(FeasibilityResult { checks, feasible })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HybridError;
    use vmnet_core::{Expr, ModelError, NodeId, VarKey, VmId};

    const TOL: f64 = 1e-6;

    fn key(n: usize) -> VarKey {
        VarKey::Placement {
            vm: VmId(0),
            node: NodeId(n),
        }
    }

    /// `x0 ≤ rhs` so the slack is exactly `rhs − x0`.
    fn single(sense: Sense, rhs: f64) -> ConstrainedModel {
        let mut m = ConstrainedModel::new("t");
        let x = m.add_binary(key(0)).unwrap();
        m.add_constraint("c", ConstraintKind::Capacity, Expr::linear([(x, 1.0)]), sense, rhs)
            .unwrap();
        m
    }

    fn at(x: f64) -> Assignment {
        [(key(0), x)].into_iter().collect()
    }

    #[test]
    fn test_inequality_tolerance_boundary() {
        // slack 0
        let m = single(Sense::Le, 1.0);
        assert!(check(&m, &at(1.0), TOL).unwrap().feasible);

        // slack -tol/2
        let m = single(Sense::Le, 1.0 - TOL / 2.0);
        let r = check(&m, &at(1.0), TOL).unwrap();
        assert!(r.feasible);
        assert_eq!(r.total_violation(), 0.0);

        // slack -2 tol
        let m = single(Sense::Le, 1.0 - 2.0 * TOL);
        let r = check(&m, &at(1.0), TOL).unwrap();
        assert!(!r.feasible);
        assert_eq!(r.num_violated(), 1);
        assert!((r.total_violation() - 2.0 * TOL).abs() < 1e-12);
    }

    #[test]
    fn test_ge_and_eq() {
        let m = single(Sense::Ge, 1.0);
        let r = check(&m, &at(0.0), TOL).unwrap();
        assert!(!r.feasible);
        assert_eq!(r.checks[0].slack, -1.0);

        let m = single(Sense::Eq, 1.0);
        assert!(check(&m, &at(1.0), TOL).unwrap().feasible);
        let r = check(&m, &at(0.0), TOL).unwrap();
        assert!(!r.feasible);
        assert_eq!(r.checks[0].violation, 1.0);
    }

    #[test]
    fn test_feasible_is_conjunction() {
        let mut m = ConstrainedModel::new("t");
        let a = m.add_binary(key(0)).unwrap();
        let b = m.add_binary(key(1)).unwrap();
        m.add_constraint("a", ConstraintKind::Assignment, Expr::linear([(a, 1.0)]), Sense::Eq, 1.0)
            .unwrap();
        m.add_constraint("b", ConstraintKind::Assignment, Expr::linear([(b, 1.0)]), Sense::Eq, 1.0)
            .unwrap();

        let half: Assignment = [(key(0), 1.0), (key(1), 0.0)].into_iter().collect();
        let r = check(&m, &half, TOL).unwrap();
        assert!(!r.feasible);
        assert_eq!(r.violated().map(|c| c.label.as_str()).collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn test_missing_variable_is_an_error() {
        let m = single(Sense::Le, 1.0);
        let err = check(&m, &Assignment::new(), TOL);
        assert!(matches!(
            err,
            Err(HybridError::Model(ModelError::IncompleteAssignment { .. }))
        ));
    }
}
