//! jacobian.rs
//! Local partial derivatives of a leaf and the finite-difference fallback.

use super::component::Component;
use super::manager::VarManager;
use crate::error::{Error, Result};
use crate::options::FdForm;
use crate::store::{DataVector, VectorStorage};
use nalgebra::DMatrix;
use std::collections::BTreeMap;

/// One partial-derivative block as a leaf supplies it.
#[derive(Debug, Clone, PartialEq)]
pub enum Partial {
    /// Shorthand for a block between two scalar variables.
    Scalar(f64),
    Dense(DMatrix<f64>),
}

impl Partial {
    /// Every block becomes two-dimensional; a scalar is a 1x1 matrix.
    pub fn into_matrix(self) -> DMatrix<f64> {
        match self {
            Partial::Scalar(v) => DMatrix::from_element(1, 1, v),
            Partial::Dense(m) => m,
        }
    }
}

impl From<f64> for Partial {
    fn from(v: f64) -> Self { Partial::Scalar(v) }
}

impl From<DMatrix<f64>> for Partial {
    fn from(m: DMatrix<f64>) -> Self { Partial::Dense(m) }
}

/// Blocks keyed by (output name, input name), both local to the leaf.
pub type PartialJacobian = BTreeMap<(String, String), Partial>;

/// Normalized blocks, as cached on a leaf between linearizations.
pub type JacobianCache = BTreeMap<(String, String), DMatrix<f64>>;

pub fn normalize(raw: PartialJacobian) -> JacobianCache {
    raw.into_iter().map(|(key, partial)| (key, partial.into_matrix())).collect()
}

/// Checks every block against the declared sizes of its variables.
///
/// `size_of` returns `None` for names the leaf does not declare.
pub fn check_shapes<F>(system: &str, jac: &JacobianCache, size_of: F) -> Result<()>
where
    F: Fn(&str) -> Option<usize>,
{
    for ((output, input), block) in jac {
        let rows = size_of(output).ok_or_else(|| unknown(system, output))?;
        let cols = size_of(input).ok_or_else(|| unknown(system, input))?;
        if block.shape() != (rows, cols) {
            return Err(Error::JacobianShape {
                system: system.to_string(),
                output: output.clone(),
                input: input.clone(),
                expected: (rows, cols),
                found: block.shape(),
            });
        }
    }
    Ok(())
}

fn unknown(system: &str, name: &str) -> Error {
    crate::error::LookupError::UnknownVariable {
        name: name.to_string(),
        vector: "params or unknowns".into(),
        system: system.to_string(),
    }
    .into()
}

/// Differentiates a leaf's outputs with respect to each of its numeric params.
///
/// Runs on private copies of the value vectors: the shared storage is left
/// exactly as it was.
pub fn fd_jacobian(comp: &Component, vm: &VarManager) -> Result<JacobianCache> {
    let opts = comp.fd_options;
    let h = opts.step_size;
    let u_view = comp.u_view();
    let p_view = comp.p_view();

    let mut params = vm.params.clone();
    let mut unknowns = vm.unknowns.clone();
    let mut resids = vm.resids.clone();

    let evaluate = |params: &DataVector, unknowns: &mut DataVector, resids: &mut DataVector| -> Result<Vec<f64>> {
        comp.run_on(params, unknowns, resids)?;
        Ok(unknowns.flat()[u_view.range.clone()].to_vec())
    };

    let base = match opts.form {
        FdForm::Forward => evaluate(&params, &mut unknowns, &mut resids)?,
        FdForm::Central => Vec::new(),
    };

    // Output name -> offset and size inside the leaf's unknowns range.
    let mut outputs = Vec::with_capacity(u_view.names.len());
    for name in &u_view.names {
        let range = vm.unknowns.slice_range(&u_view.abs(name)).ok_or_else(|| unknown(&u_view.owner, name))?;
        outputs.push((name.clone(), range.start - u_view.range.start, range.len()));
    }

    let mut jac = JacobianCache::new();
    for pname in &p_view.names {
        let abs = p_view.abs(pname);
        let n = params.get(&abs)?.len();
        let mut columns: Vec<Vec<f64>> = Vec::with_capacity(n);

        for j in 0..n {
            let orig = params.get(&abs)?[j];

            params.get_mut(&abs)?[j] = orig + h;
            let plus = evaluate(&params, &mut unknowns, &mut resids)?;
            let column = match opts.form {
                FdForm::Forward => plus.iter().zip(&base).map(|(a, b)| (a - b) / h).collect(),
                FdForm::Central => {
                    params.get_mut(&abs)?[j] = orig - h;
                    let minus = evaluate(&params, &mut unknowns, &mut resids)?;
                    plus.iter().zip(&minus).map(|(a, b)| (a - b) / (2.0 * h)).collect()
                }
            };
            params.get_mut(&abs)?[j] = orig;
            columns.push(column);
        }

        for (out, offset, size) in &outputs {
            let block = DMatrix::from_fn(*size, n, |i, j| columns[j][offset + i]);
            jac.insert((out.clone(), pname.clone()), block);
        }
    }
    Ok(jac)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_partial_normalizes_to_1x1() {
        let mut raw = PartialJacobian::new();
        raw.insert(("y".into(), "x".into()), Partial::from(3.0));
        let jac = normalize(raw);
        let block = &jac[&("y".to_string(), "x".to_string())];
        assert_eq!(block.shape(), (1, 1));
        assert_eq!(block[(0, 0)], 3.0);
    }

    #[test]
    fn test_dense_partial_is_kept() {
        let m = DMatrix::from_row_slice(2, 1, &[1.0, 2.0]);
        assert_eq!(Partial::from(m.clone()).into_matrix(), m);
    }

    #[test]
    fn test_shape_check_reports_offending_block() {
        let mut jac = JacobianCache::new();
        jac.insert(("y".into(), "x".into()), DMatrix::zeros(1, 2));
        let sizes = |name: &str| match name {
            "y" => Some(1),
            "x" => Some(3),
            _ => None,
        };
        let err = check_shapes("c", &jac, sizes).unwrap_err();
        assert_eq!(err, Error::JacobianShape {
            system: "c".into(),
            output: "y".into(),
            input: "x".into(),
            expected: (1, 3),
            found: (1, 2),
        });

        let mut jac = JacobianCache::new();
        jac.insert(("z".into(), "x".into()), DMatrix::zeros(1, 3));
        assert!(matches!(check_shapes("c", &jac, sizes), Err(Error::Lookup(_))));
    }
}
