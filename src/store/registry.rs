use super::types::*;
use serde::{Serialize, Deserialize};
use std::collections::HashMap;

/// An ordered dictionary of variable metadata keyed by absolute path.
///
/// One registry holds the parameters of a system, another its unknowns.
/// Insertion order is preserved: it is the order in which storage slices are
/// laid out, so a subtree's variables always occupy one contiguous run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VarRegistry {
    metas: Vec<VarMeta>,

    // Path -> position. Not serialized, rebuilt on load.
    #[serde(skip)]
    index: HashMap<String, VarId>,
}

impl VarRegistry {
    pub fn new() -> Self { Self::default() }
    pub fn len(&self) -> usize { self.metas.len() }
    pub fn is_empty(&self) -> bool { self.metas.is_empty() }

    /// Rebuilds the path index after deserialization.
    pub fn rebuild_index(&mut self) {
        self.index = self.metas.iter().enumerate()
            .map(|(i, m)| (m.pathname.clone(), VarId::new(i)))
            .collect();
    }

    /// Inserts or replaces the metadata for `meta.pathname`.
    pub fn insert(&mut self, meta: VarMeta) -> VarId {
        if let Some(&id) = self.index.get(&meta.pathname) {
            self.metas[id.index()] = meta;
            return id;
        }
        let id = VarId::new(self.metas.len());
        self.index.insert(meta.pathname.clone(), id);
        self.metas.push(meta);
        id
    }

    #[inline(always)]
    pub fn get(&self, pathname: &str) -> Option<&VarMeta> {
        self.index.get(pathname).map(|id| &self.metas[id.index()])
    }

    pub fn get_mut(&mut self, pathname: &str) -> Option<&mut VarMeta> {
        let id = *self.index.get(pathname)?;
        Some(&mut self.metas[id.index()])
    }

    pub fn contains(&self, pathname: &str) -> bool { self.index.contains_key(pathname) }

    pub fn iter(&self) -> impl Iterator<Item = &VarMeta> { self.metas.iter() }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut VarMeta> { self.metas.iter_mut() }

    /// Absolute paths of every variable whose relative name equals `name`.
    pub fn paths_for(&self, name: &str) -> Vec<String> {
        self.metas.iter()
            .filter(|m| m.relative_name == name)
            .map(|m| m.pathname.clone())
            .collect()
    }

    /// Resolves either an absolute path or a unique relative name.
    pub fn resolve_name(&self, name: &str) -> Option<&VarMeta> {
        if let Some(meta) = self.get(name) {
            return Some(meta);
        }
        let mut matches = self.metas.iter().filter(|m| m.relative_name == name);
        match (matches.next(), matches.next()) {
            (Some(meta), None) => Some(meta),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(path: &str, rel: &str) -> VarMeta {
        VarMeta::new(path.to_string(), rel, VarValue::from(0.0))
    }

    #[test]
    fn test_insert_preserves_order_and_replaces() {
        let mut reg = VarRegistry::new();
        reg.insert(meta("a:x", "a:x"));
        reg.insert(meta("b:x", "x"));
        let mut replaced = meta("a:x", "x");
        replaced.local = true;
        let id = reg.insert(replaced);

        assert_eq!(id, VarId(0));
        assert_eq!(reg.len(), 2);
        assert!(reg.get("a:x").unwrap().local);
        let order: Vec<_> = reg.iter().map(|m| m.pathname.as_str()).collect();
        assert_eq!(order, vec!["a:x", "b:x"]);
    }

    #[test]
    fn test_relative_lookup() {
        let mut reg = VarRegistry::new();
        reg.insert(meta("a:x", "x"));
        reg.insert(meta("b:x", "x"));
        reg.insert(meta("b:y", "b:y"));

        assert_eq!(reg.paths_for("x"), vec!["a:x".to_string(), "b:x".to_string()]);
        // Ambiguous relative names do not resolve.
        assert!(reg.resolve_name("x").is_none());
        assert_eq!(reg.resolve_name("b:y").unwrap().pathname, "b:y");
    }

    #[test]
    fn test_index_rebuilt_after_roundtrip() {
        let mut reg = VarRegistry::new();
        reg.insert(meta("c:y", "y"));
        let json = serde_json::to_string(&reg).unwrap();
        let mut back: VarRegistry = serde_json::from_str(&json).unwrap();
        assert!(back.get("c:y").is_none());
        back.rebuild_index();
        assert_eq!(back.get("c:y").unwrap().relative_name, "y");
    }
}
