//! Penalty compiler: constrained model to unconstrained binary quadratic model.
//!
//! Every model variable is expanded into bits ([`BinaryEncoding`]). Each
//! constraint becomes a weighted square added to the objective:
//!
//! - `expr = b`: `w (expr − b)²`
//! - `expr ≤ b`: `w (expr + s − b)²`, `s ∈ [0, b − min(expr)]` binary-encoded
//! - `expr ≥ b`: compiled as `−expr ≤ −b`
//!
//! A squared linear form is quadratic, so only linear constraints compile.
//! Compilation is deterministic: the same model and weights always give the
//! same variable order and coefficients.

mod encoding;
pub mod sparse;

use std::collections::BTreeMap;
use std::ops::Range;

pub use encoding::BinaryEncoding;
pub use sparse::Coupling;

use vmnet_core::{Assignment, ConstrainedModel, Expr, Sense, VarKey, VarKind};

use crate::error::{HybridError, HybridResult};
use crate::weights::PenaltyWeights;

/// Linear form over bits: `constant + Σ coef · b`.
#[derive(Debug, Clone, Default, PartialEq)]
struct BitForm {
    constant: f64,
    terms: BTreeMap<usize, f64>,
}

impl BitForm {
    fn add(&mut self, bit: usize, coef: f64) {
        *self.terms.entry(bit).or_insert(0.0) += coef;
    }

    fn evaluate(&self, bits: &[u8]) -> f64 {
        self.constant
            + self
                .terms
                .iter()
                .filter(|(&b, _)| bits[b] != 0)
                .map(|(_, c)| c)
                .sum::<f64>()
    }
}

/// Accumulator for `offset + Σ h_i b_i + Σ_{i<j} J_ij b_i b_j`.
#[derive(Debug, Default)]
struct QuboBuilder {
    offset: f64,
    linear: Vec<f64>,
    quadratic: BTreeMap<(usize, usize), f64>,
}

impl QuboBuilder {
    fn pair(&mut self, a: usize, b: usize, coef: f64) {
        if coef == 0.0 {
            return;
        }
        // b_i · b_i = b_i
        if a == b {
            self.linear[a] += coef;
        } else {
            let key = if a < b { (a, b) } else { (b, a) };
            *self.quadratic.entry(key).or_insert(0.0) += coef;
        }
    }

    /// Add `scale · form²`.
    fn add_square(&mut self, form: &BitForm, scale: f64) {
        let c = form.constant;
        self.offset += scale * c * c;
        let terms: Vec<(usize, f64)> = form.terms.iter().map(|(&b, &a)| (b, a)).collect();
        for (i, &(bi, ai)) in terms.iter().enumerate() {
            self.linear[bi] += scale * (ai * ai + 2.0 * c * ai);
            for &(bj, aj) in &terms[i + 1..] {
                self.pair(bi, bj, 2.0 * scale * ai * aj);
            }
        }
    }

    /// Add `coef · f · g`.
    fn add_product(&mut self, f: &BitForm, g: &BitForm, coef: f64) {
        self.offset += coef * f.constant * g.constant;
        for (&b, &a) in &g.terms {
            self.linear[b] += coef * f.constant * a;
        }
        for (&b, &a) in &f.terms {
            self.linear[b] += coef * g.constant * a;
        }
        for (&bf, &af) in &f.terms {
            for (&bg, &ag) in &g.terms {
                self.pair(bf, bg, coef * af * ag);
            }
        }
    }
}

/// A model variable and the bits that encode it.
#[derive(Debug, Clone)]
struct EncodedVariable {
    key: VarKey,
    encoding: BinaryEncoding,
    bits: Range<usize>,
}

impl EncodedVariable {
    fn form(&self) -> BitForm {
        let mut f = BitForm {
            constant: self.encoding.offset,
            ..BitForm::default()
        };
        for (bit, &c) in self.bits.clone().zip(&self.encoding.coefficients) {
            f.add(bit, c);
        }
        f
    }
}

/// One compiled constraint.
#[derive(Debug, Clone)]
pub struct PenaltyTerm {
    /// Index of the constraint in the source model.
    pub constraint: usize,
    /// Constraint label.
    pub label: String,
    /// Weight it was compiled with.
    pub weight: f64,
    residual: BitForm,
    slack: Option<(BinaryEncoding, Range<usize>)>,
}

impl PenaltyTerm {
    /// Number of slack bits.
    pub fn num_slack_bits(&self) -> usize {
        self.slack.as_ref().map_or(0, |(_, r)| r.len())
    }
}

/// Unconstrained binary quadratic model produced by [`compile`].
#[derive(Debug, Clone)]
pub struct UnconstrainedModel {
    offset: f64,
    linear: Vec<f64>,
    coupling: Coupling,
    variables: Vec<EncodedVariable>,
    penalties: Vec<PenaltyTerm>,
    objective: Expr,
}

impl UnconstrainedModel {
    /// Number of binary variables, slack included.
    pub fn num_vars(&self) -> usize {
        self.linear.len()
    }

    /// Constant energy term.
    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Linear coefficients `h_i`.
    pub fn linear(&self) -> &[f64] {
        &self.linear
    }

    /// Upper-triangular couplings `J_ij`.
    pub fn coupling(&self) -> &Coupling {
        &self.coupling
    }

    /// Compiled constraints, in model order.
    pub fn penalties(&self) -> &[PenaltyTerm] {
        &self.penalties
    }

    /// Number of slack bits across all constraints.
    pub fn num_slack_bits(&self) -> usize {
        self.penalties.iter().map(PenaltyTerm::num_slack_bits).sum()
    }

    /// Total energy of a sample.
    pub fn energy(&self, bits: &[u8]) -> f64 {
        let lin: f64 = self
            .linear
            .iter()
            .zip(bits)
            .filter(|(_, &b)| b != 0)
            .map(|(h, _)| h)
            .sum();
        self.offset + lin + sparse::quadratic_form(&self.coupling, bits)
    }

    /// Value of the source objective at the sample.
    pub fn objective_energy(&self, bits: &[u8]) -> f64 {
        self.objective.evaluate(&self.values(bits))
    }

    /// Weighted penalty of constraint `i` at the sample; 0 for an unknown index.
    pub fn penalty_energy(&self, i: usize, bits: &[u8]) -> f64 {
        self.penalties.get(i).map_or(0.0, |p| {
            let r = p.residual.evaluate(bits);
            p.weight * r * r
        })
    }

    /// Values of the source variables, in model index order.
    pub fn values(&self, bits: &[u8]) -> Vec<f64> {
        self.variables
            .iter()
            .map(|v| v.encoding.value(&bits[v.bits.clone()]))
            .collect()
    }

    /// Check that `bits` is a sample of this model: one 0/1 value per
    /// binary variable.
    pub fn check_sample(&self, bits: &[u8]) -> HybridResult<()> {
        if bits.len() != self.num_vars() {
            return Err(HybridError::Sampler(format!(
                "sample has {} bits, model has {}",
                bits.len(),
                self.num_vars()
            )));
        }
        if let Some(i) = bits.iter().position(|&b| b > 1) {
            return Err(HybridError::Sampler(format!(
                "bit {} has value {}",
                i, bits[i]
            )));
        }
        Ok(())
    }

    /// Assignment of the source variables. Slack bits are dropped.
    ///
    /// Fails with [`HybridError::Sampler`] if `bits` is not a sample of this
    /// model.
    pub fn decode(&self, bits: &[u8]) -> HybridResult<Assignment> {
        self.check_sample(bits)?;
        Ok(self
            .variables
            .iter()
            .zip(self.values(bits))
            .map(|(v, x)| (v.key, x))
            .collect())
    }

    /// Bits for an assignment of the source variables, slack bits set to
    /// their least-penalty value.
    ///
    /// Fails with an incomplete-assignment error if any variable is unbound.
    pub fn encode(&self, assignment: &Assignment) -> HybridResult<Vec<u8>> {
        let mut bits = vec![0u8; self.num_vars()];
        let mut missing = Vec::new();
        for v in &self.variables {
            match assignment.get(&v.key) {
                Some(x) => {
                    bits[v.bits.clone()].copy_from_slice(&v.encoding.encode(x));
                }
                None => missing.push(v.key.to_string()),
            }
        }
        if !missing.is_empty() {
            return Err(vmnet_core::ModelError::IncompleteAssignment { missing }.into());
        }
        for p in &self.penalties {
            if let Some((enc, range)) = &p.slack {
                // Slack bits are still zero, so this is the residual without slack.
                let target = -p.residual.evaluate(&bits);
                bits[range.clone()].copy_from_slice(&enc.encode(target));
            }
        }
        Ok(bits)
    }
}

/// Smallest value a linear expression can take over the variable domains.
fn min_value(model: &ConstrainedModel, expr: &Expr) -> f64 {
    expr.constant_term()
        + expr
            .linear_terms()
            .map(|(v, c)| {
                let (lo, hi) = model
                    .variable(v)
                    .map_or((0.0, 1.0), |var| var.kind.bounds());
                (c * lo).min(c * hi)
            })
            .sum::<f64>()
}

/// Compile `model` with one weight per constraint.
///
/// Fails with [`HybridError::InvalidWeight`] for a weight that is not
/// strictly positive and finite, and [`HybridError::Unsupported`] for a
/// constraint with quadratic terms.
pub fn compile(
    model: &ConstrainedModel,
    weights: &PenaltyWeights,
) -> HybridResult<UnconstrainedModel> {
    weights.validate(model)?;
    if let Some(c) = model.constraints().iter().find(|c| !c.expr.is_linear()) {
        return Err(HybridError::Unsupported(format!(
            "constraint {} is quadratic",
            c.label
        )));
    }

    // Source variables first, in model order.
    let mut next = 0;
    let variables: Vec<EncodedVariable> = model
        .variables()
        .iter()
        .map(|v| {
            let encoding = match v.kind {
                VarKind::Binary => BinaryEncoding::binary(),
                VarKind::Integer { lower, upper } => {
                    BinaryEncoding::bounded(lower as f64, upper as f64)
                }
            };
            let bits = next..next + encoding.num_bits();
            next = bits.end;
            EncodedVariable {
                key: v.key,
                encoding,
                bits,
            }
        })
        .collect();
    let forms: Vec<BitForm> = variables.iter().map(EncodedVariable::form).collect();

    // Residual `sign·(expr − b)` of every constraint, then its slack bits.
    let mut penalties = Vec::with_capacity(model.num_constraints());
    for (i, c) in model.constraints().iter().enumerate() {
        let sign = if c.sense == Sense::Ge { -1.0 } else { 1.0 };
        let mut residual = BitForm {
            constant: sign * (c.expr.constant_term() - c.rhs),
            ..BitForm::default()
        };
        for (v, coef) in c.expr.linear_terms() {
            let f = &forms[v];
            residual.constant += sign * coef * f.constant;
            for (&b, &a) in &f.terms {
                residual.add(b, sign * coef * a);
            }
        }

        let slack = if c.sense == Sense::Eq {
            None
        } else {
            let mut signed = Expr::new();
            signed.add_scaled(&c.expr, sign);
            let range = sign * c.rhs - min_value(model, &signed);
            let enc = BinaryEncoding::bounded(0.0, range);
            if enc.num_bits() == 0 {
                None
            } else {
                let bits = next..next + enc.num_bits();
                next = bits.end;
                for (bit, &coef) in bits.clone().zip(&enc.coefficients) {
                    residual.add(bit, coef);
                }
                Some((enc, bits))
            }
        };

        penalties.push(PenaltyTerm {
            constraint: i,
            label: c.label.clone(),
            weight: weights.values()[i],
            residual,
            slack,
        });
    }

    let mut qubo = QuboBuilder {
        linear: vec![0.0; next],
        ..QuboBuilder::default()
    };

    let objective = model.objective();
    qubo.offset += objective.constant_term();
    for (v, coef) in objective.linear_terms() {
        let f = &forms[v];
        qubo.offset += coef * f.constant;
        for (&b, &a) in &f.terms {
            qubo.linear[b] += coef * a;
        }
    }
    for (u, v, coef) in objective.quadratic_terms() {
        qubo.add_product(&forms[u], &forms[v], coef);
    }

    for p in &penalties {
        qubo.add_square(&p.residual, p.weight);
    }

    let coupling = sparse::upper_triangular(
        next,
        qubo.quadratic
            .iter()
            .filter(|(_, &c)| c != 0.0)
            .map(|(&(i, j), &c)| (i, j, c)),
    );

    log::debug!(
        "Compiled {}: {} bits ({} slack), {} couplings",
        model.name(),
        next,
        penalties.iter().map(PenaltyTerm::num_slack_bits).sum::<usize>(),
        coupling.nnz()
    );

    Ok(UnconstrainedModel {
        offset: qubo.offset,
        linear: qubo.linear,
        coupling,
        variables,
        penalties,
        objective: objective.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmnet_core::{
        build_vm_model, ConstraintKind, ModelError, NodeId, TopologyConfig, VmDemand, VmId,
    };

    fn key(vm: usize, node: usize) -> VarKey {
        VarKey::Placement {
            vm: VmId(vm),
            node: NodeId(node),
        }
    }

    /// Every bit pattern of a small model.
    fn all_samples(n: usize) -> impl Iterator<Item = Vec<u8>> {
        (0..1u32 << n).map(move |m| (0..n).map(|i| ((m >> i) & 1) as u8).collect())
    }

    #[test]
    fn test_equality_penalty() {
        // min x0 + 2 x1  s.t. x0 + x1 = 1
        let mut m = ConstrainedModel::new("eq");
        let a = m.add_binary(key(0, 0)).unwrap();
        let b = m.add_binary(key(0, 1)).unwrap();
        m.set_objective(Expr::linear([(a, 1.0), (b, 2.0)])).unwrap();
        m.add_constraint(
            "one",
            ConstraintKind::Assignment,
            Expr::linear([(a, 1.0), (b, 1.0)]),
            Sense::Eq,
            1.0,
        )
        .unwrap();

        let q = compile(&m, &PenaltyWeights::uniform(1, 10.0)).unwrap();
        assert_eq!(q.num_vars(), 2);
        assert_eq!(q.energy(&[1, 0]), 1.0);
        assert_eq!(q.energy(&[0, 1]), 2.0);
        assert_eq!(q.energy(&[0, 0]), 10.0);
        assert_eq!(q.energy(&[1, 1]), 13.0);
        assert_eq!(q.penalty_energy(0, &[1, 1]), 10.0);
        assert_eq!(q.objective_energy(&[1, 1]), 3.0);
    }

    #[test]
    fn test_inequality_slack_is_sized_to_range() {
        // 3 x0 + 2 x1 <= 4 has slack range [0, 4]
        let mut m = ConstrainedModel::new("le");
        let a = m.add_binary(key(0, 0)).unwrap();
        let b = m.add_binary(key(0, 1)).unwrap();
        m.add_constraint(
            "cap",
            ConstraintKind::Capacity,
            Expr::linear([(a, 3.0), (b, 2.0)]),
            Sense::Le,
            4.0,
        )
        .unwrap();

        let q = compile(&m, &PenaltyWeights::uniform(1, 1.0)).unwrap();
        assert_eq!(q.num_slack_bits(), 3);

        // Minimum over slack bits is zero exactly when the constraint holds.
        for x in all_samples(2) {
            let best = all_samples(3)
                .map(|s| {
                    let bits: Vec<u8> = x.iter().chain(&s).copied().collect();
                    q.energy(&bits)
                })
                .fold(f64::INFINITY, f64::min);
            let lhs = 3.0 * x[0] as f64 + 2.0 * x[1] as f64;
            if lhs <= 4.0 {
                assert_eq!(best, 0.0, "x = {:?}", x);
            } else {
                assert!(best > 0.0, "x = {:?}", x);
            }
        }
    }

    #[test]
    fn test_ge_is_negated() {
        // x0 + x1 >= 1
        let mut m = ConstrainedModel::new("ge");
        let a = m.add_binary(key(0, 0)).unwrap();
        let b = m.add_binary(key(0, 1)).unwrap();
        m.add_constraint(
            "cover",
            ConstraintKind::Assignment,
            Expr::linear([(a, 1.0), (b, 1.0)]),
            Sense::Ge,
            1.0,
        )
        .unwrap();

        let q = compile(&m, &PenaltyWeights::uniform(1, 1.0)).unwrap();
        for x in all_samples(2) {
            let assignment: Assignment = [(key(0, 0), x[0] as f64), (key(0, 1), x[1] as f64)]
                .into_iter()
                .collect();
            let bits = q.encode(&assignment).unwrap();
            let expected = if x == vec![0, 0] { 1.0 } else { 0.0 };
            assert_eq!(q.energy(&bits), expected, "x = {:?}", x);
        }
    }

    #[test]
    fn test_integer_variables_are_expanded() {
        // min (y - 3)^2 written as y^2 - 6 y + 9 with y in [0, 5]
        let mut m = ConstrainedModel::new("int");
        let y = m
            .add_variable(key(0, 0), VarKind::Integer { lower: 0, upper: 5 })
            .unwrap();
        let mut obj = Expr::constant(9.0);
        obj.add_term(y, -6.0).add_quadratic(y, y, 1.0);
        m.set_objective(obj).unwrap();

        let q = compile(&m, &PenaltyWeights::uniform(0, 1.0)).unwrap();
        assert_eq!(q.num_vars(), 3);
        for bits in all_samples(3) {
            let v = q.values(&bits)[0];
            assert!((q.energy(&bits) - (v - 3.0).powi(2)).abs() < 1e-12);
        }
        let assignment: Assignment = [(key(0, 0), 3.0)].into_iter().collect();
        assert_eq!(q.energy(&q.encode(&assignment).unwrap()), 0.0);
    }

    #[test]
    fn test_round_trip_on_feasible_placement() {
        let tree = TopologyConfig::binary(1, 10.0, 5.0, 10.0, 2.0).build().unwrap();
        let vms = vec![VmDemand::compute(6.0); 2];
        let model = build_vm_model(&tree, &vms).unwrap();

        let mut x = vec![0.0; model.num_vars()];
        for (vm, node) in [(0, 1), (1, 2)] {
            x[model.require(&key(vm, node)).unwrap()] = 1.0;
        }
        for n in [1, 2] {
            x[model.require(&VarKey::NodeActive { node: NodeId(n) }).unwrap()] = 1.0;
        }
        let assignment = model.assignment_from_values(&x).unwrap();

        let weights = PenaltyWeights::uniform(model.num_constraints(), 7.0);
        let q = compile(&model, &weights).unwrap();
        let bits = q.encode(&assignment).unwrap();

        for i in 0..q.penalties().len() {
            assert_eq!(q.penalty_energy(i, &bits), 0.0, "{}", q.penalties()[i].label);
        }
        let objective = model.objective_value(&assignment).unwrap();
        assert!((q.energy(&bits) - objective).abs() < 1e-9);
        assert_eq!(q.decode(&bits).unwrap(), assignment);
    }

    #[test]
    fn test_rejects_invalid_input() {
        let mut m = ConstrainedModel::new("bad");
        let a = m.add_binary(key(0, 0)).unwrap();
        let mut quad = Expr::new();
        quad.add_quadratic(a, a, 1.0);
        m.add_constraint("q", ConstraintKind::Capacity, quad, Sense::Le, 1.0).unwrap();

        assert!(matches!(
            compile(&m, &PenaltyWeights::uniform(1, 0.0)),
            Err(HybridError::InvalidWeight { .. })
        ));
        assert!(matches!(
            compile(&m, &PenaltyWeights::uniform(1, 1.0)),
            Err(HybridError::Unsupported(_))
        ));
    }

    #[test]
    fn test_decode_rejects_foreign_samples() {
        let mut m = ConstrainedModel::new("t");
        m.add_binary(key(0, 0)).unwrap();
        m.add_binary(key(0, 1)).unwrap();
        let q = compile(&m, &PenaltyWeights::uniform(0, 1.0)).unwrap();

        assert!(matches!(q.decode(&[1]), Err(HybridError::Sampler(_))));
        assert!(matches!(q.decode(&[]), Err(HybridError::Sampler(_))));
        assert!(matches!(q.decode(&[1, 0, 1]), Err(HybridError::Sampler(_))));
        assert!(matches!(q.decode(&[0, 2]), Err(HybridError::Sampler(_))));
        assert_eq!(
            q.decode(&[0, 1]).unwrap(),
            [(key(0, 0), 0.0), (key(0, 1), 1.0)].into_iter().collect()
        );
    }

    #[test]
    fn test_encode_requires_every_variable() {
        let mut m = ConstrainedModel::new("t");
        m.add_binary(key(0, 0)).unwrap();
        m.add_binary(key(0, 1)).unwrap();
        let q = compile(&m, &PenaltyWeights::uniform(0, 1.0)).unwrap();

        let partial: Assignment = [(key(0, 0), 1.0)].into_iter().collect();
        assert!(matches!(
            q.encode(&partial),
            Err(HybridError::Model(ModelError::IncompleteAssignment { .. }))
        ));
    }
}
