//! vector.rs
//! Contiguous numeric storage with stable per-variable slices.

use super::registry::VarRegistry;
use super::types::VarValue;
use crate::error::LookupError;
use crate::transfer::kernel;
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

/// What the transfer engine and the propagator need from a storage region.
///
/// A distributed implementation would back `flat` with the process-local
/// share and make transfers collective; the serial `DataVector` below holds
/// everything.
pub trait VectorStorage {
    fn flat(&self) -> &[f64];
    fn flat_mut(&mut self) -> &mut [f64];

    /// Offsets of a numeric variable inside `flat`.
    fn slice_range(&self, path: &str) -> Option<Range<usize>>;

    fn object(&self, path: &str) -> Option<&serde_json::Value>;
    fn set_object(&mut self, path: &str, value: serde_json::Value) -> Result<(), LookupError>;

    /// Adds `values[value_idx[k]]` into `flat[indices[k]]`. Repeated indices
    /// sum.
    fn accumulate_at(&mut self, indices: &[usize], values: &[f64], value_idx: &[usize]) {
        kernel::scatter_add(self.flat_mut(), indices, values, value_idx);
    }

    fn norm(&self) -> f64 {
        self.flat().iter().map(|v| v * v).sum::<f64>().sqrt()
    }
}

/// Serial storage for one of the six model vectors.
#[derive(Debug, Clone, Default)]
pub struct DataVector {
    /// Name used in lookup errors ("params", "dunknowns", ...).
    name: &'static str,
    data: Vec<f64>,
    slices: HashMap<String, Range<usize>>,
    objects: BTreeMap<String, serde_json::Value>,
}

impl DataVector {
    /// Lays out every numeric variable of `registry` in order. Pass-by-object
    /// variables are kept aside when `with_objects` is set and dropped
    /// otherwise (derivative vectors never carry them).
    pub fn from_registry(name: &'static str, registry: &VarRegistry, with_objects: bool) -> Self {
        let mut vec = Self { name, ..Default::default() };
        for meta in registry.iter() {
            match &meta.init {
                VarValue::Array(init) => {
                    let start = vec.data.len();
                    vec.data.extend_from_slice(init);
                    vec.slices.insert(meta.pathname.clone(), start..vec.data.len());
                }
                VarValue::Object(value) => {
                    if with_objects {
                        vec.objects.insert(meta.pathname.clone(), value.clone());
                    }
                }
            }
        }
        vec
    }

    /// A zero-filled vector with the same layout and no objects.
    pub fn zeros_like(name: &'static str, other: &DataVector) -> Self {
        Self {
            name,
            data: vec![0.0; other.data.len()],
            slices: other.slices.clone(),
            objects: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &'static str { self.name }
    pub fn len(&self) -> usize { self.data.len() }
    pub fn is_empty(&self) -> bool { self.data.is_empty() }

    pub fn contains(&self, path: &str) -> bool {
        self.slices.contains_key(path) || self.objects.contains_key(path)
    }

    pub fn get(&self, path: &str) -> Result<&[f64], LookupError> {
        let range = self.range_or_err(path)?;
        Ok(&self.data[range])
    }

    pub fn get_mut(&mut self, path: &str) -> Result<&mut [f64], LookupError> {
        let range = self.range_or_err(path)?;
        Ok(&mut self.data[range])
    }

    pub fn set(&mut self, path: &str, values: &[f64]) -> Result<(), LookupError> {
        let slot = self.get_mut(path)?;
        if slot.len() != values.len() {
            return Err(LookupError::KindMismatch {
                name: path.to_string(),
                expected: "the same size as the assigned value",
            });
        }
        slot.copy_from_slice(values);
        Ok(())
    }

    pub fn fill(&mut self, value: f64) { self.data.fill(value); }

    /// Numeric paths ordered by their slice offset.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<(&str, usize)> = self.slices.iter()
            .map(|(k, r)| (k.as_str(), r.start))
            .collect();
        keys.sort_by_key(|&(k, start)| (start, k));
        keys.into_iter().map(|(k, _)| k).collect()
    }

    fn range_or_err(&self, path: &str) -> Result<Range<usize>, LookupError> {
        if let Some(r) = self.slices.get(path) {
            return Ok(r.clone());
        }
        if self.objects.contains_key(path) {
            return Err(LookupError::KindMismatch { name: path.to_string(), expected: "numeric" });
        }
        Err(self.missing(path))
    }

    fn missing(&self, path: &str) -> LookupError {
        LookupError::UnknownVariable {
            name: path.to_string(),
            vector: self.name.to_string(),
            system: String::new(),
        }
    }
}

impl VectorStorage for DataVector {
    fn flat(&self) -> &[f64] { &self.data }
    fn flat_mut(&mut self) -> &mut [f64] { &mut self.data }

    fn slice_range(&self, path: &str) -> Option<Range<usize>> {
        self.slices.get(path).cloned()
    }

    fn object(&self, path: &str) -> Option<&serde_json::Value> {
        self.objects.get(path)
    }

    fn set_object(&mut self, path: &str, value: serde_json::Value) -> Result<(), LookupError> {
        match self.objects.get_mut(path) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None if self.slices.contains_key(path) => {
                Err(LookupError::KindMismatch { name: path.to_string(), expected: "pass-by-object" })
            }
            None => Err(self.missing(path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::types::VarMeta;
    use serde_json::json;

    fn registry() -> VarRegistry {
        let mut reg = VarRegistry::new();
        reg.insert(VarMeta::new("a:x".into(), "x", VarValue::from(vec![1.0, 2.0])));
        reg.insert(VarMeta::new("a:cfg".into(), "cfg", VarValue::from(json!({"k": 1}))));
        reg.insert(VarMeta::new("b:y".into(), "y", VarValue::from(3.0)));
        reg
    }

    #[test]
    fn test_layout_follows_registry_order() {
        let vec = DataVector::from_registry("unknowns", &registry(), true);
        assert_eq!(vec.flat(), &[1.0, 2.0, 3.0]);
        assert_eq!(vec.slice_range("b:y"), Some(2..3));
        assert_eq!(vec.keys(), vec!["a:x", "b:y"]);
        assert_eq!(vec.object("a:cfg"), Some(&json!({"k": 1})));
    }

    #[test]
    fn test_derivative_layout_drops_objects() {
        let u = DataVector::from_registry("unknowns", &registry(), true);
        let du = DataVector::zeros_like("dunknowns", &u);
        assert_eq!(du.flat(), &[0.0, 0.0, 0.0]);
        assert!(du.object("a:cfg").is_none());
        assert!(matches!(du.get("a:cfg"), Err(LookupError::UnknownVariable { .. })));
    }

    #[test]
    fn test_accumulate_at_sums_repeated_indices() {
        let mut vec = DataVector::from_registry("dunknowns", &registry(), false);
        vec.fill(0.0);
        vec.accumulate_at(&[2, 2, 0], &[1.5, 2.5, 1.0], &[0, 1, 2]);
        assert_eq!(vec.flat(), &[1.0, 0.0, 4.0]);
        vec.accumulate_at(&[1, 1], &[1.5, 2.5, 1.0], &[2, 2]);
        assert_eq!(vec.flat(), &[1.0, 2.0, 4.0]);
    }

    #[test]
    fn test_kind_mismatch_errors() {
        let mut vec = DataVector::from_registry("params", &registry(), true);
        assert!(matches!(vec.get("a:cfg"), Err(LookupError::KindMismatch { .. })));
        assert!(matches!(vec.set_object("b:y", json!(1)), Err(LookupError::KindMismatch { .. })));
        assert!(vec.set("a:x", &[1.0]).is_err());
        assert_eq!(vec.norm(), (1.0f64 + 4.0 + 9.0).sqrt());
    }
}
