//! component.rs
//! Leaf units: user models wrapped with their declarations and views.

use super::jacobian::{self, JacobianCache, PartialJacobian};
use super::linear::LinearContext;
use super::manager::VarManager;
use crate::error::{ConfigurationError, Result};
use crate::options::FdOptions;
use crate::store::types::{join_path, validate_name};
use crate::store::{DataVector, Mode, VarMeta, VarRegistry, VarValue, VecView, VecViewMut, VectorStorage, ViewSpec};
use log::debug;
use std::fmt::Debug;
use std::ops::Range;

/// How a leaf enters the global linear operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafKind {
    /// `u = G(p)`. Contributes `du - dG/dp * dp` to the residual derivative.
    Explicit,
    /// Holds values without computing them (independent variables). Its
    /// whole contribution is the identity.
    Passthrough,
}

/// The user-supplied computation behind a leaf.
pub trait LeafModel: Debug {
    /// Computes outputs from inputs.
    fn solve_nonlinear(&self, params: &VecView, unknowns: &mut VecViewMut, resids: &mut VecViewMut) -> Result<()>;

    /// Analytic partials, keyed by (output, input). `None` asks for finite
    /// differences.
    fn jacobian(&self, _params: &VecView, _unknowns: &VecView, _resids: &VecView) -> Result<Option<PartialJacobian>> {
        Ok(None)
    }

    /// Local action of the partials on the derivative vectors.
    fn apply_linear(&self, ctx: &mut LinearContext, jac: &JacobianCache) -> Result<()> {
        ctx.apply_jacobian(jac)
    }

    fn kind(&self) -> LeafKind { LeafKind::Explicit }

    /// (min, max) processes this leaf can use. `None` is unbounded.
    fn req_procs(&self) -> (usize, Option<usize>) { (1, Some(1)) }
}

/// A source of values with no inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndepVarComp;

impl LeafModel for IndepVarComp {
    fn solve_nonlinear(&self, _: &VecView, _: &mut VecViewMut, _: &mut VecViewMut) -> Result<()> {
        Ok(())
    }

    fn apply_linear(&self, ctx: &mut LinearContext, _jac: &JacobianCache) -> Result<()> {
        match ctx.mode {
            Mode::Fwd => crate::transfer::kernel::accumulate(ctx.dresids.flat_mut(), ctx.dunknowns.flat()),
            Mode::Rev => crate::transfer::kernel::accumulate(ctx.dunknowns.flat_mut(), ctx.dresids.flat()),
        }
        Ok(())
    }

    fn kind(&self) -> LeafKind { LeafKind::Passthrough }
}

#[derive(Debug)]
pub struct Component {
    pub(super) name: String,
    pub(super) pathname: String,
    pub(super) promotes: Vec<String>,
    model: Box<dyn LeafModel>,
    params: Vec<(String, VarValue)>,
    unknowns: Vec<(String, VarValue)>,
    pub fd_options: FdOptions,
    jacobian: Option<JacobianCache>,
    p_view: ViewSpec,
    u_view: ViewSpec,
    pub(super) active: bool,
}

impl Component {
    pub fn new(model: impl LeafModel + 'static) -> Self {
        Self {
            name: String::new(),
            pathname: String::new(),
            promotes: Vec::new(),
            model: Box::new(model),
            params: Vec::new(),
            unknowns: Vec::new(),
            fd_options: FdOptions::default(),
            jacobian: None,
            p_view: ViewSpec::default(),
            u_view: ViewSpec::default(),
            active: true,
        }
    }

    /// An independent variable `name` with the given initial value.
    pub fn indep_var(name: &str, value: impl Into<VarValue>) -> Self {
        Self::new(IndepVarComp).with_output(name, value)
    }

    pub fn with_param(mut self, name: &str, init: impl Into<VarValue>) -> Self {
        self.params.push((name.to_string(), init.into()));
        self
    }

    pub fn with_output(mut self, name: &str, init: impl Into<VarValue>) -> Self {
        self.unknowns.push((name.to_string(), init.into()));
        self
    }

    pub fn with_fd_options(mut self, opts: FdOptions) -> Self {
        self.fd_options = opts;
        self
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn pathname(&self) -> &str { &self.pathname }
    pub fn kind(&self) -> LeafKind { self.model.kind() }
    pub fn is_active(&self) -> bool { self.active }
    pub fn req_procs(&self) -> (usize, Option<usize>) { self.model.req_procs() }
    pub fn p_view(&self) -> &ViewSpec { &self.p_view }
    pub fn u_view(&self) -> &ViewSpec { &self.u_view }
    pub fn u_range(&self) -> Range<usize> { self.u_view.range.clone() }
    pub fn p_range(&self) -> Range<usize> { self.p_view.range.clone() }
    pub fn cached_jacobian(&self) -> Option<&JacobianCache> { self.jacobian.as_ref() }

    /// Declared size of a param or output.
    pub fn var_size(&self, name: &str) -> Option<usize> {
        self.params.iter().chain(&self.unknowns).find(|(n, _)| n == name).map(|(_, v)| v.size())
    }

    /// Builds this leaf's dictionaries. Relative names are the local names.
    pub(super) fn setup_variables(&self) -> Result<(VarRegistry, VarRegistry)> {
        let mut params = VarRegistry::new();
        let mut unknowns = VarRegistry::new();
        for (name, init) in self.params.iter().chain(&self.unknowns) {
            validate_name(name)?;
            let path = join_path(&self.pathname, name);
            if params.contains(&path) || unknowns.contains(&path) {
                return Err(ConfigurationError::DuplicateVariable {
                    system: self.pathname.clone(),
                    name: name.clone(),
                }
                .into());
            }
            let mut meta = VarMeta::new(path, name, init.clone());
            meta.local = self.active;
            if self.params.iter().any(|(n, _)| n == name) {
                params.insert(meta);
            } else {
                unknowns.insert(meta);
            }
        }
        Ok((params, unknowns))
    }

    /// Points the views at this leaf's slices of the shared vectors.
    pub(super) fn setup_vectors(&mut self, vm: &VarManager) {
        self.p_view = view_spec(&self.pathname, &self.params, &vm.params);
        self.u_view = view_spec(&self.pathname, &self.unknowns, &vm.unknowns);
    }

    /// Runs the model against arbitrary storage with this leaf's layout.
    pub fn run_on(&self, params: &DataVector, unknowns: &mut DataVector, resids: &mut DataVector) -> Result<()> {
        let p = VecView::new(params, &self.p_view);
        let mut u = VecViewMut::new(unknowns, &self.u_view);
        let mut r = VecViewMut::new(resids, &self.u_view);
        self.model.solve_nonlinear(&p, &mut u, &mut r)
    }

    pub fn solve_nonlinear(&self, vm: &mut VarManager) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        self.run_on(&vm.params, &mut vm.unknowns, &mut vm.resids)
    }

    /// Residuals of an explicit leaf are `u - G(p)`. The model runs in place
    /// and this leaf's outputs are put back afterwards, even on failure.
    /// Pass-through leaves have none.
    pub fn apply_nonlinear(&self, vm: &mut VarManager) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        let range = self.u_range();
        match self.kind() {
            LeafKind::Passthrough => vm.resids.flat_mut()[range].fill(0.0),
            LeafKind::Explicit => {
                let current = vm.unknowns.flat()[range.clone()].to_vec();
                let objects: Vec<(String, serde_json::Value)> = self.u_view.objects.iter()
                    .filter_map(|name| {
                        let path = self.u_view.abs(name);
                        vm.unknowns.object(&path).cloned().map(|v| (path, v))
                    })
                    .collect();

                let outcome = self.run_on(&vm.params, &mut vm.unknowns, &mut vm.resids);

                let computed = &mut vm.unknowns.flat_mut()[range.clone()];
                for ((r, u), g) in vm.resids.flat_mut()[range].iter_mut().zip(&current).zip(computed.iter()) {
                    *r = u - g;
                }
                computed.copy_from_slice(&current);
                for (path, value) in objects {
                    vm.unknowns.set_object(&path, value)?;
                }
                outcome?;
            }
        }
        Ok(())
    }

    /// Jacobian assembly for this leaf.
    pub fn linearize(&mut self, vm: &VarManager) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        let jac = if self.fd_options.force_fd {
            debug!("'{}': forced finite differences", self.pathname);
            Some(jacobian::fd_jacobian(self, vm)?)
        } else {
            let p = VecView::new(&vm.params, &self.p_view);
            let u = VecView::new(&vm.unknowns, &self.u_view);
            let r = VecView::new(&vm.resids, &self.u_view);
            self.model.jacobian(&p, &u, &r)?.map(jacobian::normalize)
        };

        if self.kind() != LeafKind::Explicit {
            return Ok(());
        }
        let jac = match jac {
            Some(jac) => jac,
            None => {
                debug!("'{}': no analytic partials, using finite differences", self.pathname);
                jacobian::fd_jacobian(self, vm)?
            }
        };
        jacobian::check_shapes(&self.pathname, &jac, |name| self.var_size(name))?;
        self.jacobian = Some(jac);
        Ok(())
    }

    /// Runs the model's local linear operator over the derivative vectors.
    pub fn apply_linear(&self, vm: &mut VarManager, mode: Mode) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        let empty = JacobianCache::new();
        let jac = self.jacobian.as_ref().unwrap_or(&empty);
        let mut ctx = LinearContext {
            params: VecView::new(&vm.params, &self.p_view),
            unknowns: VecView::new(&vm.unknowns, &self.u_view),
            dparams: VecViewMut::new(&mut vm.dparams, &self.p_view),
            dunknowns: VecViewMut::new(&mut vm.dunknowns, &self.u_view),
            dresids: VecViewMut::new(&mut vm.dresids, &self.u_view),
            mode,
        };
        self.model.apply_linear(&mut ctx, jac)
    }
}

fn view_spec(owner: &str, decls: &[(String, VarValue)], vec: &DataVector) -> ViewSpec {
    let mut names = Vec::new();
    let mut objects = Vec::new();
    let mut start = usize::MAX;
    let mut end = 0;
    for (name, init) in decls {
        if init.is_object() {
            objects.push(name.clone());
            continue;
        }
        if let Some(r) = vec.slice_range(&join_path(owner, name)) {
            start = start.min(r.start);
            end = end.max(r.end);
        }
        names.push(name.clone());
    }
    let range = if start == usize::MAX { 0..0 } else { start..end };
    ViewSpec { owner: owner.to_string(), names, objects, range }
}
