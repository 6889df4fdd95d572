//! Candidate assignments produced by solvers.

use std::collections::BTreeMap;

use crate::model::VarKey;

/// Mapping from variable key to value.
///
/// Keys are the model's own variable identities, never solver-internal
/// indices, so an assignment can be checked against the model it was decoded
/// for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assignment {
    values: BTreeMap<VarKey, f64>,
}

impl Assignment {
    /// Empty assignment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `key` to `value`, returning the previous value.
    pub fn insert(&mut self, key: VarKey, value: f64) -> Option<f64> {
        self.values.insert(key, value)
    }

    /// Value of `key`.
    pub fn get(&self, key: &VarKey) -> Option<f64> {
        self.values.get(key).copied()
    }

    /// Check whether `key` is bound.
    pub fn contains(&self, key: &VarKey) -> bool {
        self.values.contains_key(key)
    }

    /// Number of bound variables.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check whether nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Bindings in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&VarKey, f64)> {
        self.values.iter().map(|(k, &v)| (k, v))
    }

    /// Keys whose value rounds to a nonzero integer.
    pub fn active(&self) -> impl Iterator<Item = &VarKey> {
        self.values
            .iter()
            .filter(|(_, v)| v.round() != 0.0)
            .map(|(k, _)| k)
    }
}

impl FromIterator<(VarKey, f64)> for Assignment {
    fn from_iter<T: IntoIterator<Item = (VarKey, f64)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl Extend<(VarKey, f64)> for Assignment {
    fn extend<T: IntoIterator<Item = (VarKey, f64)>>(&mut self, iter: T) {
        self.values.extend(iter);
    }
}
