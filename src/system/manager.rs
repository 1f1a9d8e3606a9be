//! manager.rs
//! The six model-wide vectors every system of a tree reads and writes.

use crate::error::LookupError;
use crate::store::{DataVector, VarRegistry};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VectorKind {
    Params,
    Unknowns,
    Resids,
    DParams,
    DUnknowns,
    DResids,
}

impl VectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VectorKind::Params => "params",
            VectorKind::Unknowns => "unknowns",
            VectorKind::Resids => "resids",
            VectorKind::DParams => "dparams",
            VectorKind::DUnknowns => "dunknowns",
            VectorKind::DResids => "dresids",
        }
    }

    /// Whether the vector lays out params (as opposed to unknowns).
    pub fn is_params_side(&self) -> bool {
        matches!(self, VectorKind::Params | VectorKind::DParams)
    }
}

impl fmt::Display for VectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for VectorKind {
    type Err = LookupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "params" => Ok(VectorKind::Params),
            "unknowns" => Ok(VectorKind::Unknowns),
            "resids" => Ok(VectorKind::Resids),
            "dparams" => Ok(VectorKind::DParams),
            "dunknowns" => Ok(VectorKind::DUnknowns),
            "dresids" => Ok(VectorKind::DResids),
            other => Err(LookupError::UnknownVector(other.to_string())),
        }
    }
}

/// Owner of all numeric storage for one tree.
///
/// Systems never hold storage of their own: each one knows its range in these
/// vectors, so a parent and a child look at the same memory.
#[derive(Debug, Clone)]
pub struct VarManager {
    pub params: DataVector,
    pub unknowns: DataVector,
    pub resids: DataVector,
    pub dparams: DataVector,
    pub dunknowns: DataVector,
    pub dresids: DataVector,
}

impl VarManager {
    pub fn new(params: &VarRegistry, unknowns: &VarRegistry) -> Self {
        let p = DataVector::from_registry("params", params, true);
        let u = DataVector::from_registry("unknowns", unknowns, true);
        Self {
            resids: DataVector::zeros_like("resids", &u),
            dparams: DataVector::zeros_like("dparams", &p),
            dunknowns: DataVector::zeros_like("dunknowns", &u),
            dresids: DataVector::zeros_like("dresids", &u),
            params: p,
            unknowns: u,
        }
    }

    pub fn vector(&self, kind: VectorKind) -> &DataVector {
        match kind {
            VectorKind::Params => &self.params,
            VectorKind::Unknowns => &self.unknowns,
            VectorKind::Resids => &self.resids,
            VectorKind::DParams => &self.dparams,
            VectorKind::DUnknowns => &self.dunknowns,
            VectorKind::DResids => &self.dresids,
        }
    }

    pub fn vector_mut(&mut self, kind: VectorKind) -> &mut DataVector {
        match kind {
            VectorKind::Params => &mut self.params,
            VectorKind::Unknowns => &mut self.unknowns,
            VectorKind::Resids => &mut self.resids,
            VectorKind::DParams => &mut self.dparams,
            VectorKind::DUnknowns => &mut self.dunknowns,
            VectorKind::DResids => &mut self.dresids,
        }
    }

    /// Zeros the three derivative vectors.
    pub fn clear_derivatives(&mut self) {
        self.dparams.fill(0.0);
        self.dunknowns.fill(0.0);
        self.dresids.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{VarMeta, VarValue, VectorStorage};
    use serde_json::json;

    #[test]
    fn test_vector_names_parse() {
        assert_eq!("dresids".parse::<VectorKind>().unwrap(), VectorKind::DResids);
        let err = "foo".parse::<VectorKind>().unwrap_err();
        assert_eq!(err.to_string(), "'foo' is not a valid vector name");
    }

    #[test]
    fn test_layouts_match_registries() {
        let mut p = VarRegistry::new();
        p.insert(VarMeta::new("c:x".into(), "x", VarValue::from(vec![1.0, 2.0])));
        let mut u = VarRegistry::new();
        u.insert(VarMeta::new("c:y".into(), "y", VarValue::from(5.0)));
        u.insert(VarMeta::new("c:o".into(), "o", VarValue::from(json!([1]))));

        let vm = VarManager::new(&p, &u);
        assert_eq!(vm.params.flat(), &[1.0, 2.0]);
        assert_eq!(vm.dparams.flat(), &[0.0, 0.0]);
        assert_eq!(vm.unknowns.flat(), &[5.0]);
        assert_eq!(vm.dresids.len(), 1);
        assert!(vm.unknowns.object("c:o").is_some());
        assert!(vm.dunknowns.object("c:o").is_none());
        assert_eq!(vm.vector(VectorKind::Resids).name(), "resids");
    }
}
