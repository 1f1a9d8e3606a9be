//! problem.rs
//! Top-level handle: owns the root composite and the shared vectors, runs
//! setup and exposes evaluation, variable access and total derivatives.

use crate::analysis::topology;
use crate::connections::{self, ConnectionMap};
use crate::display::dump;
use crate::error::{ConfigurationError, Error, LookupError, Result};
use crate::parallel::{ProcessActivity, SerialActivity};
use crate::store::{Mode, VarRegistry, VectorStorage};
use crate::system::{Group, VarManager, VectorKind};
use log::{debug, warn};
use nalgebra::DMatrix;
use std::ops::Range;
use std::path::Path;

/// Everything produced by `setup`.
#[derive(Debug)]
struct SetupState {
    vm: VarManager,
    params: VarRegistry,
    unknowns: VarRegistry,
    connections: ConnectionMap,
}

#[derive(Debug)]
pub struct Problem {
    root: Group,
    activity: Box<dyn ProcessActivity>,
    state: Option<SetupState>,
}

impl Problem {
    pub fn new(root: Group) -> Self {
        Self { root, activity: Box::new(SerialActivity), state: None }
    }

    pub fn with_activity(mut self, activity: impl ProcessActivity + 'static) -> Self {
        self.activity = Box::new(activity);
        self
    }

    pub fn root(&self) -> &Group { &self.root }

    /// Mutable access to the tree. Structural edits require another `setup`.
    pub fn root_mut(&mut self) -> &mut Group { &mut self.root }

    pub fn is_setup(&self) -> bool { self.state.is_some() }

    /// Finalizes the tree.
    ///
    /// 1. Absolute paths, top-down.
    /// 2. Activity of every unit on this process.
    /// 3. Variable dictionaries, bottom-up with promotion.
    /// 4. Connection resolution and validation.
    /// 5. Each connection handed to its lowest common ancestor.
    /// 6. Shared vectors and the views into them.
    /// 7. Transfer plans.
    pub fn setup(&mut self) -> Result<()> {
        self.state = None;

        // 1. & 2.
        self.root.setup_paths("");
        self.root.setup_activity(self.activity.as_ref(), true);

        // 3.
        let (params, unknowns) = self.root.setup_variables()?;
        debug!("Setup: {} params, {} unknowns", params.len(), unknowns.len());

        // 4.
        let nested = self.root.nested_links()?;
        let conns = connections::resolve(&params, &unknowns, self.root.links(), nested)?;
        connections::validate(&conns, &params, &unknowns)?;

        // 5.
        self.root.assign_connections(&conns);

        // 6.
        let vm = VarManager::new(&params, &unknowns);
        self.root.setup_vectors(&vm);
        debug!("Setup: vectors of {} params / {} unknowns entries", vm.params.len(), vm.unknowns.len());

        // 7.
        self.root.setup_transfers(&vm)?;

        warn_feedback(&self.root);

        self.state = Some(SetupState { vm, params, unknowns, connections: conns });
        Ok(())
    }

    fn state(&self) -> Result<&SetupState> {
        self.state.as_ref().ok_or_else(|| ConfigurationError::NotSetUp.into())
    }

    pub fn vectors(&self) -> Result<&VarManager> { Ok(&self.state()?.vm) }

    /// The tree together with its storage, for driving operators directly.
    pub fn split_mut(&mut self) -> Result<(&Group, &mut VarManager)> {
        let state = self.state.as_mut().ok_or(ConfigurationError::NotSetUp)?;
        Ok((&self.root, &mut state.vm))
    }

    pub fn params_dict(&self) -> Result<&VarRegistry> { Ok(&self.state()?.params) }
    pub fn unknowns_dict(&self) -> Result<&VarRegistry> { Ok(&self.state()?.unknowns) }

    /// The complete resolved target -> source map.
    pub fn connections(&self) -> Result<&ConnectionMap> { Ok(&self.state()?.connections) }

    /// Nonlinear evaluation of the whole tree.
    pub fn run(&mut self) -> Result<()> {
        let state = self.state.as_mut().ok_or(ConfigurationError::NotSetUp)?;
        self.root.solve_nonlinear(&mut state.vm)
    }

    pub fn apply_nonlinear(&mut self) -> Result<()> {
        let state = self.state.as_mut().ok_or(ConfigurationError::NotSetUp)?;
        self.root.apply_nonlinear(&mut state.vm)
    }

    /// Refreshes every leaf's cached partials at the current point.
    pub fn linearize(&mut self) -> Result<()> {
        let state = self.state.as_ref().ok_or(ConfigurationError::NotSetUp)?;
        self.root.linearize(&state.vm)
    }

    /// Value of an unknown, by absolute path or unique promoted name.
    pub fn get(&self, name: &str) -> Result<&[f64]> {
        self.get_in(name, "unknowns")
    }

    pub fn get_object(&self, name: &str) -> Result<&serde_json::Value> {
        let state = self.state()?;
        let path = resolve(&state.unknowns, name, VectorKind::Unknowns)?;
        state.vm.unknowns.object(&path).ok_or_else(|| {
            LookupError::KindMismatch { name: path.clone(), expected: "pass-by-object" }.into()
        })
    }

    pub fn set(&mut self, name: &str, values: &[f64]) -> Result<()> {
        let state = self.state.as_mut().ok_or(ConfigurationError::NotSetUp)?;
        let path = resolve(&state.unknowns, name, VectorKind::Unknowns)?;
        Ok(state.vm.unknowns.set(&path, values)?)
    }

    pub fn set_object(&mut self, name: &str, value: serde_json::Value) -> Result<()> {
        let state = self.state.as_mut().ok_or(ConfigurationError::NotSetUp)?;
        let path = resolve(&state.unknowns, name, VectorKind::Unknowns)?;
        Ok(state.vm.unknowns.set_object(&path, value)?)
    }

    /// Value of a variable in a named vector (`"params"`, `"dunknowns"`, ...).
    pub fn get_in(&self, name: &str, vector: &str) -> Result<&[f64]> {
        let state = self.state()?;
        let kind: VectorKind = vector.parse()?;
        let registry = if kind.is_params_side() { &state.params } else { &state.unknowns };
        let path = resolve(registry, name, kind)?;
        Ok(state.vm.vector(kind).get(&path)?)
    }

    /// Overwrites a variable in a named vector, e.g. to seed `dunknowns`.
    pub fn set_in(&mut self, name: &str, vector: &str, values: &[f64]) -> Result<()> {
        let state = self.state.as_mut().ok_or(ConfigurationError::NotSetUp)?;
        let kind: VectorKind = vector.parse()?;
        let registry = if kind.is_params_side() { &state.params } else { &state.unknowns };
        let path = resolve(registry, name, kind)?;
        Ok(state.vm.vector_mut(kind).set(&path, values)?)
    }

    /// Total derivatives of `of` with respect to `wrt`, both unknowns.
    ///
    /// Rows follow the flattened entries of `of`, columns those of `wrt`.
    /// Forward mode solves once per `wrt` entry, reverse once per `of` entry.
    pub fn calc_gradient(&mut self, wrt: &[&str], of: &[&str], mode: Option<Mode>) -> Result<DMatrix<f64>> {
        let mode = mode.unwrap_or(self.root.ln_options.mode);
        self.linearize()?;

        let state = self.state.as_mut().ok_or(ConfigurationError::NotSetUp)?;
        let offset = self.root.u_range().start;
        let u_len = self.root.u_range().len();

        let flat_indices = |names: &[&str]| -> Result<Vec<usize>> {
            let mut out = Vec::new();
            for name in names {
                let path = resolve(&state.unknowns, name, VectorKind::Unknowns)?;
                let range: Range<usize> = state.vm.unknowns.slice_range(&path)
                    .ok_or_else(|| LookupError::KindMismatch { name: path.clone(), expected: "numeric" })?;
                out.extend(range.map(|i| i - offset));
            }
            Ok(out)
        };
        let wrt_idx = flat_indices(wrt)?;
        let of_idx = flat_indices(of)?;

        state.vm.clear_derivatives();
        let mut jac = DMatrix::zeros(of_idx.len(), wrt_idx.len());
        let mut rhs = vec![0.0; u_len];

        match mode {
            Mode::Fwd => {
                for (col, &w) in wrt_idx.iter().enumerate() {
                    rhs[w] = 1.0;
                    let sol = self.root.solve_linear(&mut state.vm, &rhs, Some(Mode::Fwd))?;
                    rhs[w] = 0.0;
                    for (row, &o) in of_idx.iter().enumerate() {
                        jac[(row, col)] = sol[o];
                    }
                }
            }
            Mode::Rev => {
                for (row, &o) in of_idx.iter().enumerate() {
                    rhs[o] = 1.0;
                    let sol = self.root.solve_linear(&mut state.vm, &rhs, Some(Mode::Rev))?;
                    rhs[o] = 0.0;
                    for (col, &w) in wrt_idx.iter().enumerate() {
                        jac[(row, col)] = sol[w];
                    }
                }
            }
        }
        debug!("calc_gradient {:?}: {}x{}", mode, jac.nrows(), jac.ncols());
        Ok(jac)
    }

    /// Text dump of the tree and its storage.
    pub fn dump(&self, deriv: bool) -> Result<String> {
        let state = self.state()?;
        Ok(dump::format_tree(&self.root, &state.vm, deriv))
    }

    pub fn dump_to(&self, path: impl AsRef<Path>, deriv: bool) -> Result<()> {
        let text = self.dump(deriv)?;
        std::fs::write(path, text).map_err(|e| Error::Io(e.to_string()))
    }
}

fn resolve(registry: &VarRegistry, name: &str, kind: VectorKind) -> Result<String> {
    registry.resolve_name(name).map(|m| m.pathname.clone()).ok_or_else(|| {
        LookupError::UnknownVariable {
            name: name.to_string(),
            vector: kind.as_str().to_string(),
            system: String::new(),
        }
        .into()
    })
}

fn warn_feedback(group: &Group) {
    if group.nl_solver().single_pass() {
        for cycle in topology::feedback_cycles(group) {
            warn!(
                "'{}': children {:?} form a feedback cycle, but the nonlinear solver makes a single pass",
                group.pathname(),
                cycle
            );
        }
    }
    for sub in group.subgroups() {
        warn_feedback(sub);
    }
}
