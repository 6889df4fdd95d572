//! Sparse coupling matrix of a binary quadratic model.
//!
//! Couplings are stored in CSC format, strictly upper triangle: entry
//! `(i, j)` with `i < j` is the coefficient of `b_i b_j`.

use sprs::{CsMat, TriMat};

/// Upper-triangular coupling matrix.
pub type Coupling = CsMat<f64>;

/// Build the coupling matrix from `(i, j, value)` triplets with `i < j`.
///
/// Repeated triplets are summed.
pub fn upper_triangular<I>(n: usize, triplets: I) -> Coupling
where
    I: IntoIterator<Item = (usize, usize, f64)>,
{
    let mut tri = TriMat::new((n, n));
    for (i, j, v) in triplets {
        debug_assert!(i < j, "coupling must be strictly upper triangular");
        tri.add_triplet(i, j, v);
    }
    tri.to_csc()
}

/// `Σ J_ij b_i b_j` over the stored entries.
pub fn quadratic_form(coupling: &Coupling, bits: &[u8]) -> f64 {
    coupling
        .iter()
        .filter(|(_, (row, col))| bits[*row] != 0 && bits[*col] != 0)
        .map(|(val, _)| *val)
        .sum()
}

/// Symmetric adjacency lists: for every variable, its `(neighbour, J)` pairs.
pub fn neighbours(coupling: &Coupling) -> Vec<Vec<(usize, f64)>> {
    let mut adj = vec![Vec::new(); coupling.rows()];
    for (val, (row, col)) in coupling.iter() {
        if *val == 0.0 {
            continue;
        }
        adj[row].push((col, *val));
        adj[col].push((row, *val));
    }
    adj
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upper_triangular_sums_duplicates() {
        let j = upper_triangular(3, vec![(0, 1, 1.0), (0, 1, 2.0), (1, 2, -1.0)]);
        assert_eq!(j.rows(), 3);
        assert_eq!(j.nnz(), 2);
        assert_eq!(quadratic_form(&j, &[1, 1, 0]), 3.0);
        assert_eq!(quadratic_form(&j, &[1, 1, 1]), 2.0);
        assert_eq!(quadratic_form(&j, &[1, 0, 1]), 0.0);
    }

    #[test]
    fn test_neighbours_are_symmetric() {
        let j = upper_triangular(3, vec![(0, 2, 4.0)]);
        let adj = neighbours(&j);
        assert_eq!(adj[0], vec![(2, 4.0)]);
        assert_eq!(adj[2], vec![(0, 4.0)]);
        assert!(adj[1].is_empty());
    }
}
