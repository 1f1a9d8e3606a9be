//! group.rs
//! Composite units: ordered children, declared links and the setup passes
//! that turn a tree into dictionaries, connections and transfer plans.

use super::component::Component;
use super::manager::VarManager;
use super::System;
use crate::connections::{self, ConnectionMap};
use crate::error::{ConfigurationError, Result};
use crate::options::LinearOptions;
use crate::parallel::ProcessActivity;
use crate::solver::{DirectSolver, LinearSolver, NonlinearSolver, RunOnce};
use crate::store::types::{child_name, join_path, split_path, validate_name};
use crate::store::{Mode, VarRegistry, VectorStorage};
use crate::transfer::DataTransfer;
use log::debug;
use std::collections::BTreeMap;
use std::ops::Range;

/// Which connections a plan covers: all those a composite owns, or only the
/// ones feeding one child.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransferKey {
    Full,
    Child(String),
}

/// The same connections sorted for each direction.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferPair {
    pub fwd: DataTransfer,
    pub rev: DataTransfer,
}

#[derive(Debug)]
pub struct Group {
    pub(super) name: String,
    pub(super) pathname: String,
    pub(super) promotes: Vec<String>,
    pub(super) subsystems: Vec<System>,
    /// Declared target -> source, relative to this group.
    links: BTreeMap<String, String>,
    params_dict: VarRegistry,
    unknowns_dict: VarRegistry,
    /// Connections whose lowest common ancestor is this group.
    connections: ConnectionMap,
    plans: BTreeMap<TransferKey, TransferPair>,
    nl_solver: Box<dyn NonlinearSolver>,
    pub(super) ln_solver: Box<dyn LinearSolver>,
    pub ln_options: LinearOptions,
    pub(super) u_range: Range<usize>,
    pub(super) p_range: Range<usize>,
    pub(super) active: bool,
}

impl Default for Group {
    fn default() -> Self {
        Self {
            name: String::new(),
            pathname: String::new(),
            promotes: Vec::new(),
            subsystems: Vec::new(),
            links: BTreeMap::new(),
            params_dict: VarRegistry::new(),
            unknowns_dict: VarRegistry::new(),
            connections: ConnectionMap::new(),
            plans: BTreeMap::new(),
            nl_solver: Box::new(RunOnce),
            ln_solver: Box::new(DirectSolver),
            ln_options: LinearOptions::default(),
            u_range: 0..0,
            p_range: 0..0,
            active: true,
        }
    }
}

impl Group {
    pub fn new() -> Self { Self::default() }

    pub fn with_nl_solver(mut self, solver: impl NonlinearSolver + 'static) -> Self {
        self.nl_solver = Box::new(solver);
        self
    }

    pub fn with_ln_solver(mut self, solver: impl LinearSolver + 'static) -> Self {
        self.ln_solver = Box::new(solver);
        self
    }

    /// Appends a child. `promotes` lists the child's relative names to expose
    /// unqualified at this level; `*` matches any run of characters.
    pub fn add(&mut self, name: &str, system: impl Into<System>, promotes: &[&str]) -> std::result::Result<(), ConfigurationError> {
        validate_name(name)?;
        if self.subsystems.iter().any(|s| s.name() == name) {
            return Err(ConfigurationError::DuplicateSubsystem {
                group: self.pathname.clone(),
                name: name.to_string(),
            });
        }
        let mut system = system.into();
        system.set_identity(name, promotes.iter().map(|p| p.to_string()).collect());
        self.subsystems.push(system);
        Ok(())
    }

    /// Declares that `source` feeds `target`, both named relative to this
    /// group. A later declaration for the same target replaces the earlier.
    pub fn connect(&mut self, source: &str, target: &str) {
        self.links.insert(target.to_string(), source.to_string());
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn pathname(&self) -> &str { &self.pathname }
    pub fn is_active(&self) -> bool { self.active }
    pub fn u_range(&self) -> Range<usize> { self.u_range.clone() }
    pub fn p_range(&self) -> Range<usize> { self.p_range.clone() }
    pub fn links(&self) -> &BTreeMap<String, String> { &self.links }
    pub fn params_dict(&self) -> &VarRegistry { &self.params_dict }
    pub fn unknowns_dict(&self) -> &VarRegistry { &self.unknowns_dict }
    pub fn connections(&self) -> &ConnectionMap { &self.connections }
    pub fn plan(&self, key: &TransferKey) -> Option<&TransferPair> { self.plans.get(key) }
    pub fn nl_solver(&self) -> &dyn NonlinearSolver { self.nl_solver.as_ref() }

    /// Children in registration order, optionally only the active ones.
    pub fn subsystems(&self, local: bool) -> impl Iterator<Item = &System> {
        self.subsystems.iter().filter(move |s| !local || s.is_active())
    }

    pub fn subgroups(&self) -> impl Iterator<Item = &Group> {
        self.subsystems.iter().filter_map(System::as_group)
    }

    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.subsystems.iter().filter_map(System::as_component)
    }

    /// Looks up a descendant by a path relative to this group.
    pub fn subsystem(&self, path: &str) -> Option<&System> {
        let segments = split_path(path);
        let (first, rest) = segments.split_first()?;
        let child = self.subsystems.iter().find(|s| s.name() == *first)?;
        if rest.is_empty() {
            return Some(child);
        }
        child.as_group()?.subsystem(&rest.join(":"))
    }

    pub fn subsystem_mut(&mut self, path: &str) -> Option<&mut System> {
        let segments = split_path(path);
        let (first, rest) = segments.split_first()?;
        let child = self.subsystems.iter_mut().find(|s| s.name() == *first)?;
        if rest.is_empty() {
            return Some(child);
        }
        match child {
            System::Group(g) => g.subsystem_mut(&rest.join(":")),
            System::Component(_) => None,
        }
    }

    /// Composites can use as many processes as their widest child.
    pub fn req_procs(&self) -> (usize, Option<usize>) {
        let mut min = 1;
        let mut max = Some(1);
        for sub in &self.subsystems {
            let (cmin, cmax) = sub.req_procs();
            min = min.max(cmin);
            max = match (max, cmax) {
                (Some(a), Some(b)) => Some(a.max(b)),
                _ => None,
            };
        }
        (min, max)
    }

    // --- Setup passes ---

    pub(crate) fn setup_paths(&mut self, parent: &str) {
        self.pathname = join_path(parent, &self.name);
        for sub in &mut self.subsystems {
            sub.setup_paths(&self.pathname);
        }
    }

    pub(crate) fn setup_activity(&mut self, activity: &dyn ProcessActivity, parent_active: bool) {
        self.active = parent_active && activity.is_active(&self.pathname);
        for sub in &mut self.subsystems {
            sub.setup_activity(activity, self.active);
        }
    }

    /// Merges the children's dictionaries, bottom-up. A child's variable keeps
    /// its relative name if the child promotes it, and is qualified with the
    /// child's name otherwise.
    pub(crate) fn setup_variables(&mut self) -> Result<(VarRegistry, VarRegistry)> {
        let mut params = VarRegistry::new();
        let mut unknowns = VarRegistry::new();

        for sub in &mut self.subsystems {
            let (sub_params, sub_unknowns) = sub.setup_variables()?;
            let promotes = sub.promotes();

            for pattern in promotes {
                let found = sub_params.iter().chain(sub_unknowns.iter())
                    .any(|m| glob_match(pattern, &m.relative_name));
                if !found {
                    return Err(ConfigurationError::PromoteNotFound {
                        system: sub.pathname().to_string(),
                        name: pattern.clone(),
                    }
                    .into());
                }
            }

            for (source, target) in [(sub_params, &mut params), (sub_unknowns, &mut unknowns)] {
                for mut meta in source.iter().cloned() {
                    meta.promoted = promotes.iter().any(|p| glob_match(p, &meta.relative_name));
                    if !meta.promoted {
                        meta.relative_name = join_path(sub.name(), &meta.relative_name);
                    }
                    target.insert(meta);
                }
            }
        }

        debug!(
            "'{}': {} params, {} unknowns",
            self.pathname,
            params.len(),
            unknowns.len()
        );
        self.params_dict = params.clone();
        self.unknowns_dict = unknowns.clone();
        Ok((params, unknowns))
    }

    /// Explicit links declared anywhere below this group, deepest first.
    pub(crate) fn nested_links(&self) -> std::result::Result<ConnectionMap, ConfigurationError> {
        let mut nested = ConnectionMap::new();
        for sub in self.subgroups() {
            nested.merge(sub.explicit_links()?);
        }
        Ok(nested)
    }

    /// Nested links overlaid with this group's own.
    fn explicit_links(&self) -> std::result::Result<ConnectionMap, ConfigurationError> {
        let mut links = self.nested_links()?;
        links.merge(connections::explicit_connections(&self.params_dict, &self.unknowns_dict, &self.links)?);
        Ok(links)
    }

    /// Keeps the connections this group owns and hands the rest down.
    pub(crate) fn assign_connections(&mut self, all: &ConnectionMap) {
        self.connections = ConnectionMap::new();
        for (tgt, src) in all.iter() {
            if connections::connection_owner(tgt, src) == self.pathname {
                self.connections.insert(tgt.to_string(), src.to_string());
            }
        }
        for sub in &mut self.subsystems {
            if let System::Group(g) = sub {
                g.assign_connections(all);
            }
        }
    }

    /// Computes views and ranges once the shared vectors exist.
    pub(crate) fn setup_vectors(&mut self, vm: &VarManager) {
        let mut u: Option<Range<usize>> = None;
        let mut p: Option<Range<usize>> = None;
        for sub in &mut self.subsystems {
            sub.setup_vectors(vm);
            u = union(u, sub.u_range());
            p = union(p, sub.p_range());
        }
        self.u_range = u.unwrap_or(0..0);
        self.p_range = p.unwrap_or(0..0);
    }

    /// Builds the full plan and one plan per child, both directions each.
    pub(crate) fn setup_transfers(&mut self, vm: &VarManager) -> Result<()> {
        self.plans.clear();
        let mut keys = vec![TransferKey::Full];
        keys.extend(self.subsystems.iter().map(|s| TransferKey::Child(s.name().to_string())));

        for key in keys {
            let mut src_idxs = Vec::new();
            let mut tgt_idxs = Vec::new();
            let mut vec_conns = Vec::new();
            let mut byobj_conns = Vec::new();

            for (tgt, src) in self.connections.iter() {
                if let TransferKey::Child(name) = &key {
                    if child_name(tgt, &self.pathname) != Some(name.as_str()) {
                        continue;
                    }
                }
                if vm.params.object(tgt).is_some() {
                    byobj_conns.push((tgt.to_string(), src.to_string()));
                    continue;
                }
                let s = vm.unknowns.slice_range(src)
                    .ok_or_else(|| ConfigurationError::Unresolved { name: src.to_string(), dict: "unknowns" })?;
                let t = vm.params.slice_range(tgt)
                    .ok_or_else(|| ConfigurationError::Unresolved { name: tgt.to_string(), dict: "params" })?;
                src_idxs.extend(s);
                tgt_idxs.extend(t);
                vec_conns.push((tgt.to_string(), src.to_string()));
            }

            debug!(
                "'{}' {:?}: {} indices, {} by object",
                self.pathname,
                key,
                src_idxs.len(),
                byobj_conns.len()
            );
            let pair = TransferPair {
                fwd: DataTransfer::new(src_idxs.clone(), tgt_idxs.clone(), vec_conns.clone(), byobj_conns.clone(), Mode::Fwd),
                rev: DataTransfer::new(src_idxs, tgt_idxs, vec_conns, byobj_conns, Mode::Rev),
            };
            self.plans.insert(key, pair);
        }

        for sub in &mut self.subsystems {
            if let System::Group(g) = sub {
                g.setup_transfers(vm)?;
            }
        }
        Ok(())
    }

    // --- Evaluation ---

    /// Executes one of this group's plans on the value or derivative vectors.
    pub(super) fn transfer(&self, vm: &mut VarManager, key: &TransferKey, mode: Mode, deriv: bool) -> Result<()> {
        let Some(pair) = self.plans.get(key) else {
            return Ok(());
        };
        let plan = match mode {
            Mode::Fwd => &pair.fwd,
            Mode::Rev => &pair.rev,
        };
        if deriv {
            plan.execute(&mut vm.dunknowns, &mut vm.dparams, mode, true)?;
        } else {
            plan.execute(&mut vm.unknowns, &mut vm.params, mode, false)?;
        }
        Ok(())
    }

    pub fn solve_nonlinear(&self, vm: &mut VarManager) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        self.nl_solver.solve(self, vm)
    }

    /// One ordered pass: feed each active child its inputs, then run it.
    pub fn children_solve_nonlinear(&self, vm: &mut VarManager) -> Result<()> {
        for sub in self.subsystems(true) {
            self.transfer(vm, &TransferKey::Child(sub.name().to_string()), Mode::Fwd, false)?;
            sub.solve_nonlinear(vm)?;
        }
        Ok(())
    }

    /// Evaluates residuals of every active descendant.
    pub fn apply_nonlinear(&self, vm: &mut VarManager) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        for sub in self.subsystems(true) {
            self.transfer(vm, &TransferKey::Child(sub.name().to_string()), Mode::Fwd, false)?;
            sub.apply_nonlinear(vm)?;
        }
        Ok(())
    }

    /// Jacobian assembly over every active descendant, in order.
    pub fn linearize(&mut self, vm: &VarManager) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        for sub in self.subsystems.iter_mut().filter(|s| s.is_active()) {
            sub.linearize(vm)?;
        }
        Ok(())
    }
}

fn union(acc: Option<Range<usize>>, r: Range<usize>) -> Option<Range<usize>> {
    if r.is_empty() {
        return acc;
    }
    Some(match acc {
        None => r,
        Some(a) => a.start.min(r.start)..a.end.max(r.end),
    })
}

/// Shell-style matching where `*` stands for any run of characters.
fn glob_match(pattern: &str, name: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == name,
        Some((head, tail)) => {
            let Some(rest) = name.strip_prefix(head) else {
                return false;
            };
            if tail.is_empty() {
                return true;
            }
            (0..=rest.len())
                .filter(|&i| rest.is_char_boundary(i))
                .any(|i| glob_match(tail, &rest[i..]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::store::{VecView, VecViewMut};
    use crate::system::component::LeafModel;
    use rstest::rstest;

    #[derive(Debug)]
    struct Noop;

    impl LeafModel for Noop {
        fn solve_nonlinear(&self, _: &VecView, _: &mut VecViewMut, _: &mut VecViewMut) -> Result<()> {
            Ok(())
        }
    }

    #[rstest]
    #[case("*", "anything", true)]
    #[case("x", "x", true)]
    #[case("x", "xy", false)]
    #[case("x*", "xy", true)]
    #[case("*y", "xy", true)]
    #[case("a*c", "abbc", true)]
    #[case("a*c", "abcd", false)]
    fn test_glob_match(#[case] pattern: &str, #[case] name: &str, #[case] expected: bool) {
        assert_eq!(glob_match(pattern, name), expected);
    }

    #[test]
    fn test_add_rejects_duplicates_and_bad_names() {
        let mut g = Group::new();
        g.add("c1", Component::new(Noop), &[]).unwrap();
        assert_eq!(
            g.add("c1", Component::new(Noop), &[]).unwrap_err(),
            ConfigurationError::DuplicateSubsystem { group: String::new(), name: "c1".into() }
        );
        assert!(matches!(g.add("a:b", Group::new(), &[]), Err(ConfigurationError::InvalidName { .. })));
    }

    #[test]
    fn test_promotion_controls_relative_names() {
        let mut sub = Group::new();
        sub.add("c", Component::new(Noop).with_param("x", 0.0).with_output("y", 0.0), &["x"]).unwrap();
        let mut root = Group::new();
        root.add("g", sub, &["x"]).unwrap();
        root.setup_paths("");

        let (params, unknowns) = root.setup_variables().unwrap();
        let x = params.get("g:c:x").unwrap();
        assert_eq!(x.relative_name, "x");
        assert!(x.promoted);
        assert_eq!(unknowns.get("g:c:y").unwrap().relative_name, "g:c:y");

        let g = root.subsystem("g").and_then(System::as_group).unwrap();
        assert_eq!(g.unknowns_dict().get("g:c:y").unwrap().relative_name, "c:y");
    }

    #[test]
    fn test_missing_promote_is_reported() {
        let mut root = Group::new();
        root.add("c", Component::new(Noop).with_output("y", 0.0), &["nope"]).unwrap();
        root.setup_paths("");
        let err = root.setup_variables().unwrap_err();
        assert_eq!(err, Error::from(ConfigurationError::PromoteNotFound { system: "c".into(), name: "nope".into() }));
    }

    #[test]
    fn test_subsystem_lookup_by_path() {
        let mut inner = Group::new();
        inner.add("leaf", Component::new(Noop), &[]).unwrap();
        let mut root = Group::new();
        root.add("g", inner, &[]).unwrap();

        assert!(root.subsystem("g:leaf").and_then(System::as_component).is_some());
        assert!(root.subsystem("g:nope").is_none());
        assert!(root.subsystem("").is_none());
        assert_eq!(root.subgroups().count(), 1);
        assert_eq!(root.components().count(), 0);
    }

    #[derive(Debug)]
    struct Wide;

    impl LeafModel for Wide {
        fn solve_nonlinear(&self, _: &VecView, _: &mut VecViewMut, _: &mut VecViewMut) -> Result<()> {
            Ok(())
        }

        fn req_procs(&self) -> (usize, Option<usize>) { (2, None) }
    }

    #[test]
    fn test_req_procs_combines_children() {
        let mut g = Group::new();
        assert_eq!(g.req_procs(), (1, Some(1)));
        g.add("a", Component::new(Noop), &[]).unwrap();
        assert_eq!(g.req_procs(), (1, Some(1)));
        g.add("b", Component::new(Wide), &[]).unwrap();
        assert_eq!(g.req_procs(), (2, None));
    }
}
