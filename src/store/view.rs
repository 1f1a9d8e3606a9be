//! view.rs
//! A leaf's window into the shared model vectors.
//!
//! Views address variables by their local name (`x`) and translate to the
//! absolute path (`sub:comp:x`) underneath. They borrow the parent's storage
//! directly: a write through a view is the write.

use super::types::join_path;
use super::vector::{DataVector, VectorStorage};
use crate::error::LookupError;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Where one component's variables live inside a shared vector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewSpec {
    pub owner: String,
    /// Local names of the numeric variables, in layout order.
    pub names: Vec<String>,
    /// Local names of the pass-by-object variables.
    pub objects: Vec<String>,
    /// The owner's contiguous run in `flat()`.
    pub range: Range<usize>,
}

impl ViewSpec {
    pub fn abs(&self, name: &str) -> String { join_path(&self.owner, name) }

    pub fn contains(&self, name: &str) -> bool { self.names.iter().any(|n| n == name) }

    fn lookup_err(&self, name: &str, vec: &DataVector) -> LookupError {
        LookupError::UnknownVariable {
            name: name.to_string(),
            vector: vec.name().to_string(),
            system: self.owner.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VecView<'a> {
    vec: &'a DataVector,
    layout: &'a ViewSpec,
}

impl<'a> VecView<'a> {
    pub fn new(vec: &'a DataVector, layout: &'a ViewSpec) -> Self { Self { vec, layout } }

    pub fn keys(&self) -> impl Iterator<Item = &'a str> {
        self.layout.names.iter().map(|n| n.as_str())
    }

    pub fn contains(&self, name: &str) -> bool { self.layout.contains(name) }

    pub fn get(&self, name: &str) -> Result<&'a [f64], LookupError> {
        if !self.layout.contains(name) {
            return Err(self.layout.lookup_err(name, self.vec));
        }
        self.vec.get(&self.layout.abs(name))
    }

    /// First entry of a variable, for scalar variables.
    pub fn scalar(&self, name: &str) -> Result<f64, LookupError> {
        self.get(name)?.first().copied().ok_or_else(|| LookupError::KindMismatch {
            name: self.layout.abs(name),
            expected: "non-empty",
        })
    }

    pub fn object(&self, name: &str) -> Result<&'a serde_json::Value, LookupError> {
        self.vec.object(&self.layout.abs(name)).ok_or_else(|| self.layout.lookup_err(name, self.vec))
    }

    pub fn flat(&self) -> &'a [f64] { &self.vec.flat()[self.layout.range.clone()] }
}

#[derive(Debug)]
pub struct VecViewMut<'a> {
    vec: &'a mut DataVector,
    layout: &'a ViewSpec,
}

impl<'a> VecViewMut<'a> {
    pub fn new(vec: &'a mut DataVector, layout: &'a ViewSpec) -> Self { Self { vec, layout } }

    pub fn keys(&self) -> impl Iterator<Item = &'a str> {
        self.layout.names.iter().map(|n| n.as_str())
    }

    pub fn contains(&self, name: &str) -> bool { self.layout.contains(name) }

    pub fn get(&self, name: &str) -> Result<&[f64], LookupError> {
        if !self.layout.contains(name) {
            return Err(self.layout.lookup_err(name, self.vec));
        }
        self.vec.get(&self.layout.abs(name))
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut [f64], LookupError> {
        if !self.layout.contains(name) {
            return Err(self.layout.lookup_err(name, self.vec));
        }
        self.vec.get_mut(&self.layout.abs(name))
    }

    pub fn scalar(&self, name: &str) -> Result<f64, LookupError> {
        self.get(name)?.first().copied().ok_or_else(|| LookupError::KindMismatch {
            name: self.layout.abs(name),
            expected: "non-empty",
        })
    }

    pub fn set(&mut self, name: &str, values: &[f64]) -> Result<(), LookupError> {
        if !self.layout.contains(name) {
            return Err(self.layout.lookup_err(name, self.vec));
        }
        self.vec.set(&self.layout.abs(name), values)
    }

    pub fn set_scalar(&mut self, name: &str, value: f64) -> Result<(), LookupError> {
        self.set(name, &[value])
    }

    pub fn object(&self, name: &str) -> Result<&serde_json::Value, LookupError> {
        self.vec.object(&self.layout.abs(name)).ok_or_else(|| self.layout.lookup_err(name, self.vec))
    }

    pub fn set_object(&mut self, name: &str, value: serde_json::Value) -> Result<(), LookupError> {
        self.vec.set_object(&self.layout.abs(name), value)
    }

    pub fn flat(&self) -> &[f64] { &self.vec.flat()[self.layout.range.clone()] }

    pub fn flat_mut(&mut self) -> &mut [f64] {
        let range = self.layout.range.clone();
        &mut self.vec.flat_mut()[range]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::registry::VarRegistry;
    use crate::store::types::{VarMeta, VarValue};

    fn setup() -> (DataVector, ViewSpec) {
        let mut reg = VarRegistry::new();
        reg.insert(VarMeta::new("c1:y".into(), "y", VarValue::from(9.0)));
        reg.insert(VarMeta::new("c2:x".into(), "x", VarValue::from(vec![1.0, 2.0])));
        reg.insert(VarMeta::new("c2:z".into(), "z", VarValue::from(3.0)));
        let vec = DataVector::from_registry("unknowns", &reg, true);
        let layout = ViewSpec {
            owner: "c2".into(),
            names: vec!["x".into(), "z".into()],
            objects: vec![],
            range: 1..4,
        };
        (vec, layout)
    }

    #[test]
    fn test_view_reads_through_to_storage() {
        let (vec, layout) = setup();
        let view = VecView::new(&vec, &layout);
        assert_eq!(view.get("x").unwrap(), &[1.0, 2.0]);
        assert_eq!(view.scalar("z").unwrap(), 3.0);
        assert_eq!(view.flat(), &[1.0, 2.0, 3.0]);
        assert_eq!(view.keys().collect::<Vec<_>>(), vec!["x", "z"]);
    }

    #[test]
    fn test_view_writes_are_visible_to_owner() {
        let (mut vec, layout) = setup();
        {
            let mut view = VecViewMut::new(&mut vec, &layout);
            view.set_scalar("z", 7.0).unwrap();
            view.flat_mut()[0] = -1.0;
        }
        assert_eq!(vec.get("c2:z").unwrap(), &[7.0]);
        assert_eq!(vec.get("c2:x").unwrap(), &[-1.0, 2.0]);
    }

    #[test]
    fn test_view_hides_other_components() {
        let (vec, layout) = setup();
        let view = VecView::new(&vec, &layout);
        let err = view.get("y").unwrap_err();
        assert_eq!(err, LookupError::UnknownVariable {
            name: "y".into(),
            vector: "unknowns".into(),
            system: "c2".into(),
        });
    }
}
