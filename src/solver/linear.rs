//! linear.rs
//! Linear solvers for the implicit operator of a composite.

use crate::error::{Error, Result};
use crate::store::Mode;
use log::debug;
use nalgebra::{DMatrix, DVector};
use std::fmt::Debug;

/// A square operator known only through its action on a vector.
pub trait LinearOperator {
    fn size(&self) -> usize;
    fn apply(&mut self, arg: &[f64]) -> Result<Vec<f64>>;
}

/// Inverts a `LinearOperator`. Iterative (Krylov) solvers plug in here.
pub trait LinearSolver: Debug {
    fn solve(&self, rhs: &[f64], op: &mut dyn LinearOperator, mode: Mode) -> Result<Vec<f64>>;
}

/// Dense LU on the operator assembled one column per unit vector.
///
/// **Cost:** `n` operator applications plus an `O(n^3)` factorization, so it
/// suits small models and testing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectSolver;

impl LinearSolver for DirectSolver {
    fn solve(&self, rhs: &[f64], op: &mut dyn LinearOperator, mode: Mode) -> Result<Vec<f64>> {
        let n = op.size();
        if rhs.len() != n {
            return Err(Error::LinearSolve(format!("rhs has {} entries, operator is {}x{}", rhs.len(), n, n)));
        }

        let mut matrix = DMatrix::<f64>::zeros(n, n);
        let mut seed = vec![0.0; n];
        for j in 0..n {
            seed[j] = 1.0;
            let column = op.apply(&seed)?;
            seed[j] = 0.0;
            if column.len() != n {
                return Err(Error::LinearSolve(format!("operator returned {} entries, expected {}", column.len(), n)));
            }
            matrix.set_column(j, &DVector::from_vec(column));
        }
        debug!("DirectSolver: assembled {}x{} operator ({:?})", n, n, mode);

        let decomp = matrix.lu();
        match decomp.solve(&DVector::from_column_slice(rhs)) {
            Some(x) => Ok(x.iter().copied().collect()),
            None => Err(Error::LinearSolve("operator is singular".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Applies a fixed dense matrix.
    struct Dense(DMatrix<f64>);

    impl LinearOperator for Dense {
        fn size(&self) -> usize { self.0.nrows() }
        fn apply(&mut self, arg: &[f64]) -> Result<Vec<f64>> {
            Ok((&self.0 * DVector::from_column_slice(arg)).iter().copied().collect())
        }
    }

    #[test]
    fn test_direct_solve() {
        let mut op = Dense(DMatrix::from_row_slice(2, 2, &[1.0, 0.0, -2.0, 1.0]));
        let x = DirectSolver.solve(&[1.0, 0.0], &mut op, Mode::Fwd).unwrap();
        assert_eq!(x, vec![1.0, 2.0]);
    }

    #[test]
    fn test_singular_operator() {
        let mut op = Dense(DMatrix::zeros(2, 2));
        let err = DirectSolver.solve(&[1.0, 0.0], &mut op, Mode::Fwd).unwrap_err();
        assert_eq!(err, Error::LinearSolve("operator is singular".into()));
    }
}
