//! Per-constraint penalty weights.

use vmnet_core::ConstrainedModel;

use crate::error::{HybridError, HybridResult};
use crate::settings::WeightDefaults;

/// One weight per constraint, indexed like [`ConstrainedModel::constraints`].
#[derive(Debug, Clone, PartialEq)]
pub struct PenaltyWeights {
    values: Vec<f64>,
}

impl PenaltyWeights {
    /// Same weight for `n` constraints.
    pub fn uniform(n: usize, weight: f64) -> Self {
        Self {
            values: vec![weight; n],
        }
    }

    /// Weights taken from the per-kind defaults.
    pub fn from_defaults(model: &ConstrainedModel, defaults: &WeightDefaults) -> Self {
        Self {
            values: model
                .constraints()
                .iter()
                .map(|c| defaults.for_kind(c.kind))
                .collect(),
        }
    }

    /// Wrap explicit values.
    pub fn from_values(values: Vec<f64>) -> Self {
        Self { values }
    }

    /// Weight of constraint `i`.
    pub fn get(&self, i: usize) -> Option<f64> {
        self.values.get(i).copied()
    }

    /// Multiply the weight of constraint `i` by `factor`.
    pub fn scale(&mut self, i: usize, factor: f64) {
        if let Some(w) = self.values.get_mut(i) {
            *w *= factor;
        }
    }

    /// Multiply every weight by `factor`.
    pub fn scale_all(&mut self, factor: f64) {
        for w in &mut self.values {
            *w *= factor;
        }
    }

    /// All weights.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Number of weights.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check whether there are no weights.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Largest weight, or 0 if there are none.
    pub fn max(&self) -> f64 {
        self.values.iter().copied().fold(0.0, f64::max)
    }

    /// Check that there is one strictly positive, finite weight per constraint.
    pub fn validate(&self, model: &ConstrainedModel) -> HybridResult<()> {
        if self.values.len() != model.num_constraints() {
            return Err(HybridError::Unsupported(format!(
                "{} weights given for {} constraints",
                self.values.len(),
                model.num_constraints()
            )));
        }
        for (c, &w) in model.constraints().iter().zip(&self.values) {
            if !(w.is_finite() && w > 0.0) {
                return Err(HybridError::InvalidWeight {
                    constraint: c.label.clone(),
                    weight: w,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmnet_core::{ConstraintKind, Expr, NodeId, Sense, VarKey, VmId};

    fn model() -> ConstrainedModel {
        let mut m = ConstrainedModel::new("t");
        let x = m
            .add_binary(VarKey::Placement { vm: VmId(0), node: NodeId(0) })
            .unwrap();
        m.add_constraint("a", ConstraintKind::Assignment, Expr::linear([(x, 1.0)]), Sense::Eq, 1.0)
            .unwrap();
        m.add_constraint("c", ConstraintKind::Capacity, Expr::linear([(x, 2.0)]), Sense::Le, 3.0)
            .unwrap();
        m
    }

    #[test]
    fn test_from_defaults() {
        let w = PenaltyWeights::from_defaults(&model(), &WeightDefaults::default());
        assert_eq!(w.values(), &[50.0, 10.0]);
        assert_eq!(w.max(), 50.0);
    }

    #[test]
    fn test_scale() {
        let mut w = PenaltyWeights::uniform(2, 1.0);
        w.scale(1, 3.0);
        w.scale(7, 3.0);
        assert_eq!(w.values(), &[1.0, 3.0]);
        w.scale_all(2.0);
        assert_eq!(w.values(), &[2.0, 6.0]);
    }

    #[test]
    fn test_validate_rejects_bad_weights() {
        let m = model();
        assert!(PenaltyWeights::uniform(2, 1.0).validate(&m).is_ok());

        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let w = PenaltyWeights::from_values(vec![1.0, bad]);
            match w.validate(&m) {
                Err(HybridError::InvalidWeight { constraint, .. }) => assert_eq!(constraint, "c"),
                other => panic!("expected invalid weight, got {:?}", other),
            }
        }
        assert!(PenaltyWeights::uniform(1, 1.0).validate(&m).is_err());
    }
}
