//! linear.rs
//! The tree as a matrix-free linear operator.
//!
//! A composite never assembles its Jacobian. Applying the operator recurses
//! through the children: leaves apply their cached partials and composites
//! delegate, with data transfers in between. In forward mode the result is
//! `dr = F * du`, in reverse mode `du = F^T * dr`.

use super::group::{Group, TransferKey};
use super::jacobian::JacobianCache;
use super::manager::VarManager;
use super::component::LeafKind;
use super::System;
use crate::error::{Error, LookupError, Result};
use crate::solver::LinearOperator;
use crate::store::{Mode, VecView, VecViewMut, VectorStorage};
use crate::transfer::kernel;
use log::debug;
use nalgebra::DVector;
use std::ops::Range;

/// Below this norm a right-hand side counts as exactly zero.
pub const ZERO_RHS_TOL: f64 = 1e-15;

/// What a leaf sees while applying its local linear operator.
#[derive(Debug)]
pub struct LinearContext<'a> {
    pub params: VecView<'a>,
    pub unknowns: VecView<'a>,
    pub dparams: VecViewMut<'a>,
    pub dunknowns: VecViewMut<'a>,
    pub dresids: VecViewMut<'a>,
    pub mode: Mode,
}

impl LinearContext<'_> {
    /// Default local operator: multiply by the cached partials.
    ///
    /// Forward: `dr[out] += J * d(in)`. Reverse: `d(in) += J^T * dr[out]`.
    /// An input is looked up among the params first, then the unknowns.
    pub fn apply_jacobian(&mut self, jac: &JacobianCache) -> Result<()> {
        for ((output, input), block) in jac {
            let in_params = self.dparams.contains(input);
            if !in_params && !self.dunknowns.contains(input) {
                return Err(LookupError::UnknownVariable {
                    name: input.clone(),
                    vector: "dparams".into(),
                    system: String::new(),
                }
                .into());
            }

            match self.mode {
                Mode::Fwd => {
                    let x = if in_params { self.dparams.get(input)? } else { self.dunknowns.get(input)? };
                    check_dims(output, input, block.shape(), (self.dresids.get(output)?.len(), x.len()))?;
                    let y = block * DVector::from_column_slice(x);
                    for (r, v) in self.dresids.get_mut(output)?.iter_mut().zip(y.iter()) {
                        *r += v;
                    }
                }
                Mode::Rev => {
                    let dr = DVector::from_column_slice(self.dresids.get(output)?);
                    let slot = if in_params { self.dparams.get_mut(input)? } else { self.dunknowns.get_mut(input)? };
                    check_dims(output, input, block.shape(), (dr.len(), slot.len()))?;
                    let y = block.tr_mul(&dr);
                    for (d, v) in slot.iter_mut().zip(y.iter()) {
                        *d += v;
                    }
                }
            }
        }
        Ok(())
    }
}

fn check_dims(output: &str, input: &str, found: (usize, usize), expected: (usize, usize)) -> Result<()> {
    if found != expected {
        return Err(Error::JacobianShape {
            system: String::new(),
            output: output.to_string(),
            input: input.to_string(),
            expected,
            found,
        });
    }
    Ok(())
}

impl Group {
    /// Applies this composite's block of the global operator.
    ///
    /// The sign handling around explicit leaves differs between directions
    /// (negate after in forward, negate around in reverse); both produce the
    /// action of the same `F` and its transpose.
    pub fn apply_linear(&self, vm: &mut VarManager, mode: Mode) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        if mode == Mode::Fwd {
            self.transfer(vm, &TransferKey::Full, Mode::Fwd, true)?;
        }

        for sub in self.subsystems.iter().filter(|s| s.is_active()) {
            if mode == Mode::Fwd {
                self.transfer(vm, &TransferKey::Child(sub.name().to_string()), Mode::Fwd, true)?;
            }
            match sub {
                System::Component(comp) if comp.kind() == LeafKind::Explicit => {
                    let range = comp.u_range();
                    match mode {
                        Mode::Fwd => {
                            comp.apply_linear(vm, mode)?;
                            kernel::negate(&mut vm.dresids.flat_mut()[range.clone()]);
                            kernel::accumulate(&mut vm.dresids.flat_mut()[range.clone()], &vm.dunknowns.flat()[range]);
                        }
                        Mode::Rev => {
                            kernel::negate(&mut vm.dresids.flat_mut()[range.clone()]);
                            comp.apply_linear(vm, mode)?;
                            kernel::negate(&mut vm.dresids.flat_mut()[range.clone()]);
                            kernel::accumulate(&mut vm.dunknowns.flat_mut()[range.clone()], &vm.dresids.flat()[range]);
                        }
                    }
                }
                other => other.apply_linear(vm, mode)?,
            }
        }

        if mode == Mode::Rev {
            self.transfer(vm, &TransferKey::Full, Mode::Rev, true)?;
        }
        Ok(())
    }

    /// Zeros the parameter derivatives of this subtree.
    pub fn clear_dparams(&self, vm: &mut VarManager) {
        vm.dparams.flat_mut()[self.p_range.clone()].fill(0.0);
    }

    /// Solves `F * x = rhs` (forward) or `F^T * x = rhs` (reverse) over this
    /// composite's unknowns.
    ///
    /// `mode` defaults to the composite's configured direction. The solution is
    /// also left in the solution-side vector (`dunknowns` forward, `dresids`
    /// reverse). A null right-hand side yields zeros without consulting the
    /// linear solver. An inactive composite does nothing and returns zeros.
    pub fn solve_linear(&self, vm: &mut VarManager, rhs: &[f64], mode: Option<Mode>) -> Result<Vec<f64>> {
        if !self.active {
            return Ok(vec![0.0; rhs.len()]);
        }
        let mode = mode.unwrap_or(self.ln_options.mode);
        let range = self.u_range.clone();
        if rhs.len() != range.len() {
            return Err(Error::LinearSolve(format!(
                "right-hand side has {} entries, '{}' has {} unknowns",
                rhs.len(),
                self.pathname,
                range.len()
            )));
        }

        let norm = rhs.iter().map(|v| v * v).sum::<f64>().sqrt();
        let solution = if norm < ZERO_RHS_TOL {
            debug!("'{}': null right-hand side, skipping {:?} solve", self.pathname, mode);
            vec![0.0; rhs.len()]
        } else {
            let buffer = rhs.to_vec();
            let mut op = GroupOperator { group: self, vm: &mut *vm, mode, range: range.clone() };
            self.ln_solver.solve(&buffer, &mut op, mode)?
        };

        let sol_vec = match mode {
            Mode::Fwd => &mut vm.dunknowns,
            Mode::Rev => &mut vm.dresids,
        };
        sol_vec.flat_mut()[range].copy_from_slice(&solution);
        Ok(solution)
    }
}

/// The callback a linear solver uses to apply a composite's operator.
#[derive(Debug)]
pub struct GroupOperator<'a> {
    group: &'a Group,
    vm: &'a mut VarManager,
    mode: Mode,
    range: Range<usize>,
}

impl<'a> GroupOperator<'a> {
    pub fn new(group: &'a Group, vm: &'a mut VarManager, mode: Mode) -> Self {
        let range = group.u_range.clone();
        Self { group, vm, mode, range }
    }
}

impl LinearOperator for GroupOperator<'_> {
    fn size(&self) -> usize { self.range.len() }

    /// Seeds the solution side with `arg`, zeros the result side and the
    /// parameter derivatives, applies the operator and returns the result.
    fn apply(&mut self, arg: &[f64]) -> Result<Vec<f64>> {
        let range = self.range.clone();
        let (sol, rhs) = match self.mode {
            Mode::Fwd => (&mut self.vm.dunknowns, &mut self.vm.dresids),
            Mode::Rev => (&mut self.vm.dresids, &mut self.vm.dunknowns),
        };
        sol.flat_mut()[range.clone()].copy_from_slice(arg);
        rhs.flat_mut()[range.clone()].fill(0.0);

        self.group.clear_dparams(self.vm);
        self.group.apply_linear(self.vm, self.mode)?;

        let out = match self.mode {
            Mode::Fwd => &self.vm.dresids,
            Mode::Rev => &self.vm.dunknowns,
        };
        Ok(out.flat()[range].to_vec())
    }
}
