//! connections.rs
//! Resolves which output feeds each input.
//!
//! Two sources of links exist. Implicit links come from name matching: an
//! input and an output that end up with the same relative name at the root
//! are connected. Explicit links are declared with `Group::connect` and are
//! expanded against the dictionaries of the group that declared them.
//! Explicit links win over implicit ones for the same target.

use crate::error::ConfigurationError;
use crate::store::types::{common_ancestor, parent_path};
use crate::store::VarRegistry;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Target (input) absolute path -> source (output) absolute path.
///
/// Ordered so that everything derived from it (ownership, transfer plans,
/// dumps) is reproducible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionMap {
    links: BTreeMap<String, String>,
}

impl ConnectionMap {
    pub fn new() -> Self { Self::default() }
    pub fn len(&self) -> usize { self.links.len() }
    pub fn is_empty(&self) -> bool { self.links.is_empty() }

    pub fn insert(&mut self, target: String, source: String) -> Option<String> {
        self.links.insert(target, source)
    }

    pub fn source_of(&self, target: &str) -> Option<&str> {
        self.links.get(target).map(|s| s.as_str())
    }

    /// Every target fed by `source`, in path order.
    pub fn targets_of<'a>(&'a self, source: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.links.iter().filter(move |(_, s)| s.as_str() == source).map(|(t, _)| t.as_str())
    }

    /// (target, source) pairs in target order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.links.iter().map(|(t, s)| (t.as_str(), s.as_str()))
    }

    /// Overlays `other`; its entries replace ours for the same target.
    pub fn merge(&mut self, other: ConnectionMap) {
        self.links.extend(other.links);
    }
}

/// Links inferred from matching relative names.
///
/// Fails if any relative name is claimed by more than one unknown, because
/// an input with that name could not pick a unique source.
pub fn implicit_connections(
    params: &VarRegistry,
    unknowns: &VarRegistry,
) -> Result<ConnectionMap, ConfigurationError> {
    // Relative name -> absolute paths, keeping first-seen order.
    let mut abs_unknowns: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for meta in unknowns.iter() {
        abs_unknowns.entry(meta.relative_name.as_str()).or_default().push(meta.pathname.as_str());
    }

    if let Some((name, paths)) = abs_unknowns.iter().find(|(_, paths)| paths.len() > 1) {
        return Err(ConfigurationError::AmbiguousPromotion {
            name: name.to_string(),
            candidates: paths.iter().map(|p| p.to_string()).collect(),
        });
    }

    let mut connections = ConnectionMap::new();
    for meta in params.iter() {
        if let Some(sources) = abs_unknowns.get(meta.relative_name.as_str()) {
            connections.insert(meta.pathname.clone(), sources[0].to_string());
        }
    }
    Ok(connections)
}

/// Expands declared `target -> source` links (relative names) into absolute
/// links. A target name may match several inputs, all of which get the link.
pub fn explicit_connections(
    params: &VarRegistry,
    unknowns: &VarRegistry,
    links: &BTreeMap<String, String>,
) -> Result<ConnectionMap, ConfigurationError> {
    let mut connections = ConnectionMap::new();
    for (target, source) in links {
        let sources = unknowns.paths_for(source);
        let src = match sources.as_slice() {
            [] => return Err(ConfigurationError::Unresolved { name: source.clone(), dict: "unknowns" }),
            [single] => single.clone(),
            _ => {
                return Err(ConfigurationError::AmbiguousPromotion {
                    name: source.clone(),
                    candidates: sources,
                })
            }
        };

        let targets = params.paths_for(target);
        if targets.is_empty() {
            return Err(ConfigurationError::Unresolved { name: target.clone(), dict: "params" });
        }
        for tgt in targets {
            connections.insert(tgt, src.clone());
        }
    }
    Ok(connections)
}

/// Complete resolution for one set of dictionaries.
///
/// Order of precedence, lowest first: implicit links, links declared further
/// down the tree (`nested`, already absolute), links declared here.
pub fn resolve(
    params: &VarRegistry,
    unknowns: &VarRegistry,
    links: &BTreeMap<String, String>,
    nested: ConnectionMap,
) -> Result<ConnectionMap, ConfigurationError> {
    let mut connections = implicit_connections(params, unknowns)?;
    let implicit_count = connections.len();
    connections.merge(nested);
    connections.merge(explicit_connections(params, unknowns, links)?);
    debug!(
        "Resolved {} connections ({} implicit, {} declared here)",
        connections.len(),
        implicit_count,
        links.len()
    );
    Ok(connections)
}

/// Checks that every link joins compatible variables of different leaves.
/// The composite that moves data for `tgt <- src`: the lowest common
/// ancestor of the two owning leaves. A leaf feeding its own input is served
/// by that leaf's parent.
pub fn connection_owner(tgt: &str, src: &str) -> String {
    let (t, s) = (parent_path(tgt), parent_path(src));
    if t == s {
        parent_path(t).to_string()
    } else {
        common_ancestor(t, s)
    }
}

pub fn validate(
    connections: &ConnectionMap,
    params: &VarRegistry,
    unknowns: &VarRegistry,
) -> Result<(), ConfigurationError> {
    for (tgt, src) in connections.iter() {
        let t = params.get(tgt).ok_or_else(|| ConfigurationError::Unresolved { name: tgt.to_string(), dict: "params" })?;
        let s = unknowns.get(src).ok_or_else(|| ConfigurationError::Unresolved { name: src.to_string(), dict: "unknowns" })?;

        let reason = if t.pass_by_obj != s.pass_by_obj {
            Some("one side is passed by object and the other is numeric".to_string())
        } else if !t.pass_by_obj && t.size != s.size {
            Some(format!("target size {} does not match source size {}", t.size, s.size))
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(ConfigurationError::IncompatibleConnection {
                tgt: tgt.to_string(),
                src: src.to_string(),
                reason,
            });
        }
    }
    Ok(())
}
