use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::ConfigurationError;

/// Hierarchical separator used in every system and variable path.
pub const SEP: char = ':';
const SEP_STR: &str = ":";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct VarId(pub u32);

impl VarId {
    #[inline(always)]
    pub fn index(&self) -> usize { self.0 as usize }
    pub fn new(idx: usize) -> Self { Self(idx as u32) }
}

/// The declared initial value of a variable, which also fixes how it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VarValue {
    /// Flattened numeric data. Gets a slice in the contiguous vectors.
    Array(Vec<f64>),
    /// Opaque data moved whole by assignment, never scattered elementwise.
    Object(serde_json::Value),
}

impl VarValue {
    pub fn size(&self) -> usize {
        match self { VarValue::Array(v) => v.len(), VarValue::Object(_) => 0 }
    }

    pub fn is_object(&self) -> bool { matches!(self, VarValue::Object(_)) }
}

impl From<f64> for VarValue {
    fn from(v: f64) -> Self { VarValue::Array(vec![v]) }
}

impl From<Vec<f64>> for VarValue {
    fn from(v: Vec<f64>) -> Self { VarValue::Array(v) }
}

impl From<&[f64]> for VarValue {
    fn from(v: &[f64]) -> Self { VarValue::Array(v.to_vec()) }
}

impl From<serde_json::Value> for VarValue {
    fn from(v: serde_json::Value) -> Self { VarValue::Object(v) }
}

/// Metadata for one parameter or unknown, as seen from the system that owns
/// the dictionary it lives in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarMeta {
    /// Absolute path, e.g. `sub:comp:x`. Unique within a tree.
    pub pathname: String,
    /// Name relative to the dictionary owner, honoring promotion.
    pub relative_name: String,
    /// Whether the last merge step exposed the variable unqualified.
    pub promoted: bool,
    /// Whether this process holds the variable.
    pub local: bool,
    pub size: usize,
    pub pass_by_obj: bool,
    pub init: VarValue,
}

impl VarMeta {
    pub fn new(pathname: String, name: &str, init: VarValue) -> Self {
        let size = init.size();
        Self {
            pathname,
            relative_name: name.to_string(),
            promoted: false,
            local: false,
            size,
            pass_by_obj: init.is_object(),
            init,
        }
    }
}

/// Joins a parent path and a child name. The root path is empty.
pub fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}{}{}", parent, SEP, name)
    }
}

/// Splits a path into its segments. Trees are rarely deeper than a handful of levels.
pub fn split_path(path: &str) -> SmallVec<[&str; 8]> {
    if path.is_empty() {
        SmallVec::new()
    } else {
        path.split(SEP).collect()
    }
}

/// The system part of a variable path (everything before the last separator).
pub fn parent_path(path: &str) -> &str {
    match path.rfind(SEP) {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Whether `path` lies strictly below `ancestor`. Everything lies below the root.
pub fn is_descendant(path: &str, ancestor: &str) -> bool {
    if ancestor.is_empty() {
        return !path.is_empty();
    }
    path.len() > ancestor.len() && path.starts_with(ancestor) && path[ancestor.len()..].starts_with(SEP)
}

/// Name of the direct child of `ancestor` that contains `path`.
pub fn child_name<'a>(path: &'a str, ancestor: &str) -> Option<&'a str> {
    if !is_descendant(path, ancestor) {
        return None;
    }
    let rest = if ancestor.is_empty() { path } else { &path[ancestor.len() + 1..] };
    rest.split(SEP).next()
}

/// Longest shared ancestor of two system paths.
pub fn common_ancestor(a: &str, b: &str) -> String {
    let sa = split_path(a);
    let sb = split_path(b);
    let shared: SmallVec<[&str; 8]> = sa.iter().zip(sb.iter())
        .take_while(|(x, y)| x == y)
        .map(|(x, _)| *x)
        .collect();
    shared.join(SEP_STR)
}

/// Rejects empty names and names containing the separator.
pub fn validate_name(name: &str) -> Result<(), ConfigurationError> {
    if name.is_empty() || name.contains(SEP) {
        return Err(ConfigurationError::InvalidName { name: name.to_string() });
    }
    Ok(())
}

/// Derivative direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Tangent propagation, inputs toward outputs.
    #[default]
    Fwd,
    /// Adjoint propagation, outputs back toward inputs.
    Rev,
}
