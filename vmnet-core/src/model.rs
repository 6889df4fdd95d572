//! Constrained quadratic model representation.
//!
//! A [`ConstrainedModel`] is the canonical form every builder produces and
//! every backend consumes:
//!
//! ```text
//! minimize    c + Σ q_i x_i + Σ Q_ij x_i x_j
//! subject to  expr_k (≤ | = | ≥) rhs_k      for every constraint k
//!             x_i binary or bounded integer
//! ```
//!
//! Variables are addressed by a typed [`VarKey`] at build time and by a dense
//! [`VarId`] index afterwards. The model rejects expressions that reference
//! indices it does not own, so every constraint and the objective only ever
//! mention variables of the model.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use crate::assignment::Assignment;
use crate::error::{ModelError, ModelResult};
use crate::ids::{FlowId, LinkId, NodeId, VmId};
use crate::topology::Direction;

/// Dense variable index inside one model.
pub type VarId = usize;

/// Structured identity of a decision variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VarKey {
    /// VM `vm` runs on node `node`.
    Placement {
        /// VM.
        vm: VmId,
        /// Host candidate.
        node: NodeId,
    },

    /// Node `node` is switched on.
    NodeActive {
        /// Node.
        node: NodeId,
    },

    /// Flow `flow` crosses link `link` in direction `dir`.
    Route {
        /// Flow.
        flow: FlowId,
        /// Link.
        link: LinkId,
        /// Traversal direction.
        dir: Direction,
    },

    /// Link `link` is switched on.
    LinkActive {
        /// Link.
        link: LinkId,
    },
}

impl fmt::Display for VarKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarKey::Placement { vm, node } => write!(f, "{}-{}", vm, node),
            VarKey::NodeActive { node } => write!(f, "s{}", node.0),
            VarKey::Route { flow, link, dir } => {
                let d = match dir {
                    Direction::Up => "up",
                    Direction::Down => "down",
                };
                write!(f, "{}-{}-{}", flow, link, d)
            }
            VarKey::LinkActive { link } => write!(f, "on{}", link.0),
        }
    }
}

/// Variable domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    /// 0 or 1.
    Binary,

    /// Integer in `[lower, upper]`.
    Integer {
        /// Inclusive lower bound.
        lower: i64,
        /// Inclusive upper bound.
        upper: i64,
    },
}

impl VarKind {
    /// Inclusive bounds of the domain.
    pub fn bounds(&self) -> (f64, f64) {
        match *self {
            VarKind::Binary => (0.0, 1.0),
            VarKind::Integer { lower, upper } => (lower as f64, upper as f64),
        }
    }

    /// Check whether `value` lies in the domain within `tol`.
    pub fn contains(&self, value: f64, tol: f64) -> bool {
        let (lo, hi) = self.bounds();
        value >= lo - tol && value <= hi + tol && (value - value.round()).abs() <= tol
    }
}

/// A decision variable of a model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Variable {
    /// Identity.
    pub key: VarKey,
    /// Domain.
    pub kind: VarKind,
}

/// Linear plus quadratic expression over model variables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expr {
    linear: BTreeMap<VarId, f64>,
    quadratic: BTreeMap<(VarId, VarId), f64>,
    constant: f64,
}

impl Expr {
    /// Empty expression.
    pub fn new() -> Self {
        Self::default()
    }

    /// Constant expression.
    pub fn constant(c: f64) -> Self {
        Self {
            constant: c,
            ..Self::default()
        }
    }

    /// Sum of `coef * var` over the given terms.
    pub fn linear<I>(terms: I) -> Self
    where
        I: IntoIterator<Item = (VarId, f64)>,
    {
        let mut e = Self::new();
        for (v, c) in terms {
            e.add_term(v, c);
        }
        e
    }

    /// Add `coef * var`.
    pub fn add_term(&mut self, var: VarId, coef: f64) -> &mut Self {
        *self.linear.entry(var).or_insert(0.0) += coef;
        self
    }

    /// Add `coef * a * b`. The pair is stored with the smaller index first.
    pub fn add_quadratic(&mut self, a: VarId, b: VarId, coef: f64) -> &mut Self {
        let key = if a <= b { (a, b) } else { (b, a) };
        *self.quadratic.entry(key).or_insert(0.0) += coef;
        self
    }

    /// Add a constant.
    pub fn add_constant(&mut self, c: f64) -> &mut Self {
        self.constant += c;
        self
    }

    /// Builder form of [`Expr::add_term`].
    pub fn with_term(mut self, var: VarId, coef: f64) -> Self {
        self.add_term(var, coef);
        self
    }

    /// Add every term of `other`, scaled by `scale`.
    pub fn add_scaled(&mut self, other: &Expr, scale: f64) -> &mut Self {
        for (&v, &c) in &other.linear {
            self.add_term(v, scale * c);
        }
        for (&(a, b), &c) in &other.quadratic {
            self.add_quadratic(a, b, scale * c);
        }
        self.constant += scale * other.constant;
        self
    }

    /// Constant part.
    pub fn constant_term(&self) -> f64 {
        self.constant
    }

    /// Linear terms in variable order, zero coefficients skipped.
    pub fn linear_terms(&self) -> impl Iterator<Item = (VarId, f64)> + '_ {
        self.linear
            .iter()
            .filter(|(_, c)| **c != 0.0)
            .map(|(&v, &c)| (v, c))
    }

    /// Quadratic terms `(a, b, coef)` with `a <= b`, zero coefficients skipped.
    pub fn quadratic_terms(&self) -> impl Iterator<Item = (VarId, VarId, f64)> + '_ {
        self.quadratic
            .iter()
            .filter(|(_, c)| **c != 0.0)
            .map(|(&(a, b), &c)| (a, b, c))
    }

    /// Check whether the expression has no quadratic term.
    pub fn is_linear(&self) -> bool {
        self.quadratic_terms().next().is_none()
    }

    /// Largest variable index referenced.
    pub fn max_var(&self) -> Option<VarId> {
        let lin = self.linear.keys().next_back().copied();
        let quad = self.quadratic.keys().map(|&(_, b)| b).max();
        lin.max(quad)
    }

    /// Every variable referenced, possibly with repeats.
    pub fn variables(&self) -> impl Iterator<Item = VarId> + '_ {
        self.linear
            .keys()
            .copied()
            .chain(self.quadratic.keys().flat_map(|&(a, b)| [a, b]))
    }

    /// Evaluate against dense variable values.
    pub fn evaluate(&self, x: &[f64]) -> f64 {
        let lin: f64 = self.linear.iter().map(|(&v, &c)| c * x[v]).sum();
        let quad: f64 = self
            .quadratic
            .iter()
            .map(|(&(a, b), &c)| c * x[a] * x[b])
            .sum();
        self.constant + lin + quad
    }
}

/// Relational sense of a constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    /// `expr <= rhs`
    Le,
    /// `expr == rhs`
    Eq,
    /// `expr >= rhs`
    Ge,
}

impl fmt::Display for Sense {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Sense::Le => "<=",
            Sense::Eq => "==",
            Sense::Ge => ">=",
        })
    }
}

/// Semantic tag of a constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConstraintKind {
    /// Each VM runs on exactly one node.
    Assignment,
    /// Aggregate VM demand fits the node.
    Capacity,
    /// Aggregate traffic fits the link.
    LinkCapacity,
    /// Net outflow balance of a flow at a node.
    FlowConservation,
    /// A link is on only if its endpoints are on.
    LinkActivation,
}

impl ConstraintKind {
    /// All kinds, in declaration order.
    pub const ALL: [ConstraintKind; 5] = [
        ConstraintKind::Assignment,
        ConstraintKind::Capacity,
        ConstraintKind::LinkCapacity,
        ConstraintKind::FlowConservation,
        ConstraintKind::LinkActivation,
    ];
}

/// A constraint `expr (sense) rhs`.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    /// Unique label inside the model.
    pub label: String,
    /// Semantic tag.
    pub kind: ConstraintKind,
    /// Left-hand side.
    pub expr: Expr,
    /// Relation.
    pub sense: Sense,
    /// Right-hand side.
    pub rhs: f64,
}

impl Constraint {
    /// Slack of `value` against the bound.
    ///
    /// Non-negative means satisfied for inequalities; for equalities any
    /// nonzero slack is a violation of that magnitude.
    pub fn slack(&self, value: f64) -> f64 {
        match self.sense {
            Sense::Le | Sense::Eq => self.rhs - value,
            Sense::Ge => value - self.rhs,
        }
    }

    /// Amount by which `value` breaks the constraint (0 when satisfied).
    pub fn violation(&self, value: f64) -> f64 {
        let slack = self.slack(value);
        match self.sense {
            Sense::Eq => slack.abs(),
            Sense::Le | Sense::Ge => (-slack).max(0.0),
        }
    }
}

/// Size summary of a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelStats {
    /// Number of variables.
    pub variables: usize,
    /// Number of quadratic objective terms.
    pub quadratic_terms: usize,
    /// Number of constraints.
    pub constraints: usize,
    /// Constraints per kind, in [`ConstraintKind::ALL`] order, empty kinds skipped.
    pub by_kind: Vec<(ConstraintKind, usize)>,
}

impl fmt::Display for ModelStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} variables, {} quadratic terms, {} constraints",
            self.variables, self.quadratic_terms, self.constraints
        )?;
        for (kind, n) in &self.by_kind {
            write!(f, " | {:?}: {}", kind, n)?;
        }
        Ok(())
    }
}

/// Constrained quadratic model.
#[derive(Debug, Clone, Default)]
pub struct ConstrainedModel {
    name: String,
    variables: Vec<Variable>,
    index: HashMap<VarKey, VarId>,
    constraints: Vec<Constraint>,
    labels: HashSet<String>,
    objective: Expr,
}

impl ConstrainedModel {
    /// Create an empty model.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Model name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a variable. Keys must be unique.
    pub fn add_variable(&mut self, key: VarKey, kind: VarKind) -> ModelResult<VarId> {
        if let VarKind::Integer { lower, upper } = kind {
            if lower > upper {
                return Err(ModelError::InvalidModel(format!(
                    "variable {} has empty domain [{}, {}]",
                    key, lower, upper
                )));
            }
        }
        if self.index.contains_key(&key) {
            return Err(ModelError::InvalidModel(format!(
                "duplicate variable {}",
                key
            )));
        }
        let id = self.variables.len();
        self.variables.push(Variable { key, kind });
        self.index.insert(key, id);
        Ok(id)
    }

    /// Add a binary variable.
    pub fn add_binary(&mut self, key: VarKey) -> ModelResult<VarId> {
        self.add_variable(key, VarKind::Binary)
    }

    /// Index of a variable, if present.
    pub fn var(&self, key: &VarKey) -> Option<VarId> {
        self.index.get(key).copied()
    }

    /// Index of a variable that must be present.
    pub fn require(&self, key: &VarKey) -> ModelResult<VarId> {
        self.var(key)
            .ok_or_else(|| ModelError::InvalidModel(format!("unknown variable {}", key)))
    }

    /// Variable by index.
    pub fn variable(&self, id: VarId) -> Option<&Variable> {
        self.variables.get(id)
    }

    /// All variables in index order.
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    /// Number of variables.
    pub fn num_vars(&self) -> usize {
        self.variables.len()
    }

    /// Add a constraint. Labels must be unique and every variable must belong
    /// to the model.
    pub fn add_constraint(
        &mut self,
        label: impl Into<String>,
        kind: ConstraintKind,
        expr: Expr,
        sense: Sense,
        rhs: f64,
    ) -> ModelResult<usize> {
        let label = label.into();
        if self.labels.contains(&label) {
            return Err(ModelError::InvalidModel(format!(
                "duplicate constraint label {}",
                label
            )));
        }
        if !rhs.is_finite() {
            return Err(ModelError::InvalidModel(format!(
                "constraint {} has non-finite bound {}",
                label, rhs
            )));
        }
        self.check_owned(&expr, &label)?;
        self.labels.insert(label.clone());
        self.constraints.push(Constraint {
            label,
            kind,
            expr,
            sense,
            rhs,
        });
        Ok(self.constraints.len() - 1)
    }

    /// All constraints in insertion order.
    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Number of constraints.
    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    /// Set the objective to minimize.
    pub fn set_objective(&mut self, objective: Expr) -> ModelResult<()> {
        self.check_owned(&objective, "objective")?;
        self.objective = objective;
        Ok(())
    }

    /// Objective to minimize.
    pub fn objective(&self) -> &Expr {
        &self.objective
    }

    /// Dense values of every model variable, in index order.
    ///
    /// Fails with [`ModelError::IncompleteAssignment`] if any variable is
    /// unbound; unbound variables are never treated as zero.
    pub fn values_of(&self, assignment: &Assignment) -> ModelResult<Vec<f64>> {
        let mut values = Vec::with_capacity(self.variables.len());
        let mut missing = Vec::new();
        for v in &self.variables {
            match assignment.get(&v.key) {
                Some(x) => values.push(x),
                None => {
                    missing.push(v.key.to_string());
                    values.push(0.0);
                }
            }
        }
        if missing.is_empty() {
            Ok(values)
        } else {
            Err(ModelError::IncompleteAssignment { missing })
        }
    }

    /// Evaluate an expression of this model under an assignment.
    pub fn evaluate(&self, expr: &Expr, assignment: &Assignment) -> ModelResult<f64> {
        let x = self.values_of(assignment)?;
        Ok(expr.evaluate(&x))
    }

    /// Objective value under an assignment.
    pub fn objective_value(&self, assignment: &Assignment) -> ModelResult<f64> {
        self.evaluate(&self.objective, assignment)
    }

    /// Build an assignment from dense values in index order.
    pub fn assignment_from_values(&self, x: &[f64]) -> ModelResult<Assignment> {
        if x.len() != self.variables.len() {
            return Err(ModelError::InvalidModel(format!(
                "{} values given for {} variables",
                x.len(),
                self.variables.len()
            )));
        }
        Ok(self
            .variables
            .iter()
            .zip(x)
            .map(|(v, &val)| (v.key, val))
            .collect())
    }

    /// Size summary.
    pub fn stats(&self) -> ModelStats {
        let by_kind = ConstraintKind::ALL
            .iter()
            .map(|&k| (k, self.constraints.iter().filter(|c| c.kind == k).count()))
            .filter(|(_, n)| *n > 0)
            .collect();
        ModelStats {
            variables: self.variables.len(),
            quadratic_terms: self.objective.quadratic_terms().count(),
            constraints: self.constraints.len(),
            by_kind,
        }
    }

    fn check_owned(&self, expr: &Expr, what: &str) -> ModelResult<()> {
        match expr.max_var() {
            Some(v) if v >= self.variables.len() => Err(ModelError::InvalidModel(format!(
                "{} references variable {} but the model has {}",
                what,
                v,
                self.variables.len()
            ))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placement(vm: usize, node: usize) -> VarKey {
        VarKey::Placement {
            vm: VmId(vm),
            node: NodeId(node),
        }
    }

    #[test]
    fn test_duplicate_variable_rejected() {
        let mut m = ConstrainedModel::new("t");
        m.add_binary(placement(0, 0)).unwrap();
        assert!(matches!(
            m.add_binary(placement(0, 0)),
            Err(ModelError::InvalidModel(_))
        ));
    }

    #[test]
    fn test_foreign_variable_rejected() {
        let mut m = ConstrainedModel::new("t");
        let x = m.add_binary(placement(0, 0)).unwrap();

        let bad = Expr::linear([(x, 1.0), (x + 5, 1.0)]);
        assert!(m
            .add_constraint("c", ConstraintKind::Capacity, bad.clone(), Sense::Le, 1.0)
            .is_err());
        assert!(m.set_objective(bad).is_err());

        let mut quad = Expr::new();
        quad.add_quadratic(x, 3, 1.0);
        assert!(m.set_objective(quad).is_err());
    }

    #[test]
    fn test_duplicate_label_rejected() {
        let mut m = ConstrainedModel::new("t");
        let x = m.add_binary(placement(0, 0)).unwrap();
        m.add_constraint("c", ConstraintKind::Assignment, Expr::linear([(x, 1.0)]), Sense::Eq, 1.0)
            .unwrap();
        assert!(m
            .add_constraint(
                "c",
                ConstraintKind::Assignment,
                Expr::linear([(x, 1.0)]),
                Sense::Eq,
                1.0,
            )
            .is_err());
    }

    #[test]
    fn test_expression_evaluation() {
        let mut e = Expr::constant(1.0);
        e.add_term(0, 2.0).add_term(1, -1.0).add_quadratic(1, 0, 3.0);

        // 1 + 2*1 - 1*1 + 3*1*1 = 5
        assert_eq!(e.evaluate(&[1.0, 1.0]), 5.0);
        assert_eq!(e.evaluate(&[0.0, 1.0]), 0.0);
        assert!(!e.is_linear());
        assert_eq!(e.quadratic_terms().collect::<Vec<_>>(), vec![(0, 1, 3.0)]);
    }

    #[test]
    fn test_missing_values_are_reported() {
        let mut m = ConstrainedModel::new("t");
        m.add_binary(placement(0, 0)).unwrap();
        m.add_binary(placement(0, 1)).unwrap();

        let partial: Assignment = [(placement(0, 0), 1.0)].into_iter().collect();
        match m.values_of(&partial) {
            Err(ModelError::IncompleteAssignment { missing }) => {
                assert_eq!(missing, vec!["vm0-n1".to_string()]);
            }
            other => panic!("expected incomplete assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_slack_sign_convention() {
        let c = |sense| Constraint {
            label: "c".into(),
            kind: ConstraintKind::Capacity,
            expr: Expr::new(),
            sense,
            rhs: 2.0,
        };
        assert_eq!(c(Sense::Le).slack(1.0), 1.0);
        assert_eq!(c(Sense::Le).violation(3.0), 1.0);
        assert_eq!(c(Sense::Ge).slack(1.0), -1.0);
        assert_eq!(c(Sense::Ge).violation(3.0), 0.0);
        assert_eq!(c(Sense::Eq).violation(1.5), 0.5);
    }

    #[test]
    fn test_key_display() {
        assert_eq!(placement(2, 5).to_string(), "vm2-n5");
        assert_eq!(VarKey::NodeActive { node: NodeId(3) }.to_string(), "s3");
        assert_eq!(
            VarKey::Route {
                flow: FlowId(1),
                link: LinkId(4),
                dir: Direction::Down
            }
            .to_string(),
            "f1-l4-down"
        );
        assert_eq!(VarKey::LinkActive { link: LinkId(2) }.to_string(), "on2");
    }
}
