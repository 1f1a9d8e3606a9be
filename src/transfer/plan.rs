//! plan.rs
//! Precomputed scatter plans between the unknowns (source side) and the
//! params (target side) of one composite.

use super::kernel;
use crate::error::LookupError;
use crate::store::{Mode, VectorStorage};
use log::trace;
use serde::Serialize;
use std::borrow::Cow;
use std::ops::Range;

/// A set of flat indices in its most compact form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum IndexSpan {
    /// Contiguous indices. Transfers over ranges are plain slice operations.
    Range(Range<usize>),
    List(Vec<usize>),
}

impl IndexSpan {
    /// Collapses `indices` into a range when they are consecutive and ascending.
    pub fn from_indices(indices: Vec<usize>) -> Self {
        match indices.first() {
            None => IndexSpan::Range(0..0),
            Some(&start) => {
                let contiguous = indices.iter().enumerate().all(|(k, &i)| i == start + k);
                if contiguous {
                    IndexSpan::Range(start..start + indices.len())
                } else {
                    IndexSpan::List(indices)
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            IndexSpan::Range(r) => r.len(),
            IndexSpan::List(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn indices(&self) -> Cow<'_, [usize]> {
        match self {
            IndexSpan::Range(r) => Cow::Owned(r.clone().collect()),
            IndexSpan::List(v) => Cow::Borrowed(v),
        }
    }
}

/// Sorts paired index arrays, by source for forward plans and by target for
/// reverse plans, then compacts each side.
///
/// The sort keeps pairs together. It only serves compaction: a forward plan
/// over a block of consecutive outputs becomes a single range on the source
/// side even if the targets were declared out of order.
pub fn to_spans(src: Vec<usize>, tgt: Vec<usize>, mode: Mode) -> (IndexSpan, IndexSpan) {
    debug_assert_eq!(src.len(), tgt.len());
    let mut pairs: Vec<(usize, usize)> = src.into_iter().zip(tgt).collect();
    match mode {
        Mode::Fwd => pairs.sort_by_key(|&(s, t)| (s, t)),
        Mode::Rev => pairs.sort_by_key(|&(s, t)| (t, s)),
    }
    let (src, tgt): (Vec<usize>, Vec<usize>) = pairs.into_iter().unzip();
    (IndexSpan::from_indices(src), IndexSpan::from_indices(tgt))
}

/// One scatter plan. Built once at setup and reused by every evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataTransfer {
    /// Flat indices into the unknowns-side storage.
    pub src: IndexSpan,
    /// Flat indices into the params-side storage, paired with `src`.
    pub tgt: IndexSpan,
    /// Numeric (target, source) connections covered by the indices.
    pub vec_conns: Vec<(String, String)>,
    /// Pass-by-object (target, source) connections, assigned whole.
    pub byobj_conns: Vec<(String, String)>,
    /// The direction the indices were sorted for.
    pub mode: Mode,
}

impl DataTransfer {
    pub fn new(
        src_idxs: Vec<usize>,
        tgt_idxs: Vec<usize>,
        vec_conns: Vec<(String, String)>,
        byobj_conns: Vec<(String, String)>,
        mode: Mode,
    ) -> Self {
        let (src, tgt) = to_spans(src_idxs, tgt_idxs, mode);
        Self { src, tgt, vec_conns, byobj_conns, mode }
    }

    pub fn is_empty(&self) -> bool {
        self.src.is_empty() && self.byobj_conns.is_empty()
    }

    /// Moves data between `src` (unknowns side) and `tgt` (params side).
    ///
    /// Forward overwrites targets with sources, then assigns pass-by-object
    /// values unless `deriv` is set. Reverse adds every target value into its
    /// source; it is only meaningful for derivative vectors and never touches
    /// objects.
    pub fn execute<S, T>(&self, src: &mut S, tgt: &mut T, mode: Mode, deriv: bool) -> Result<(), LookupError>
    where
        S: VectorStorage + ?Sized,
        T: VectorStorage + ?Sized,
    {
        trace!(
            "transfer {:?} deriv={} ({} entries, {} objects)",
            mode,
            deriv,
            self.src.len(),
            self.byobj_conns.len()
        );
        match mode {
            Mode::Fwd => {
                match (&self.src, &self.tgt) {
                    (IndexSpan::Range(s), IndexSpan::Range(t)) => {
                        tgt.flat_mut()[t.clone()].copy_from_slice(&src.flat()[s.clone()]);
                    }
                    (s, t) => {
                        kernel::gather_scatter(tgt.flat_mut(), &t.indices(), src.flat(), &s.indices());
                    }
                }
                if !deriv {
                    for (tgt_path, src_path) in &self.byobj_conns {
                        let value = src.object(src_path).cloned().ok_or_else(|| {
                            LookupError::UnknownVariable {
                                name: src_path.clone(),
                                vector: "unknowns".into(),
                                system: String::new(),
                            }
                        })?;
                        tgt.set_object(tgt_path, value)?;
                    }
                }
            }
            Mode::Rev => {
                debug_assert!(deriv, "reverse transfers only apply to derivative vectors");
                match (&self.src, &self.tgt) {
                    (IndexSpan::Range(s), IndexSpan::Range(t)) => {
                        kernel::accumulate(&mut src.flat_mut()[s.clone()], &tgt.flat()[t.clone()]);
                    }
                    (s, t) => {
                        src.accumulate_at(&s.indices(), tgt.flat(), &t.indices());
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DataVector, VarMeta, VarRegistry, VarValue};
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(vec![3, 4, 5], IndexSpan::Range(3..6))]
    #[case(vec![], IndexSpan::Range(0..0))]
    #[case(vec![2, 4], IndexSpan::List(vec![2, 4]))]
    #[case(vec![5, 4], IndexSpan::List(vec![5, 4]))]
    #[case(vec![1, 1], IndexSpan::List(vec![1, 1]))]
    fn test_index_compaction(#[case] indices: Vec<usize>, #[case] expected: IndexSpan) {
        assert_eq!(IndexSpan::from_indices(indices), expected);
    }

    #[rstest]
    #[case(Mode::Fwd, IndexSpan::Range(0..3), IndexSpan::List(vec![4, 2, 3]))]
    #[case(Mode::Rev, IndexSpan::List(vec![1, 2, 0]), IndexSpan::Range(2..5))]
    fn test_sort_key_depends_on_direction(
        #[case] mode: Mode,
        #[case] src: IndexSpan,
        #[case] tgt: IndexSpan,
    ) {
        let (s, t) = to_spans(vec![2, 0, 1], vec![3, 4, 2], mode);
        assert_eq!(s, src);
        assert_eq!(t, tgt);
    }

    fn vectors() -> (DataVector, DataVector) {
        let mut u = VarRegistry::new();
        u.insert(VarMeta::new("a:y".into(), "y", VarValue::from(vec![1.0, 2.0])));
        u.insert(VarMeta::new("a:obj".into(), "obj", VarValue::from(json!("hello"))));
        let mut p = VarRegistry::new();
        p.insert(VarMeta::new("b:x".into(), "x", VarValue::from(vec![0.0, 0.0])));
        p.insert(VarMeta::new("c:x".into(), "x", VarValue::from(vec![0.0, 0.0])));
        p.insert(VarMeta::new("b:obj".into(), "obj", VarValue::from(json!(null))));
        (
            DataVector::from_registry("unknowns", &u, true),
            DataVector::from_registry("params", &p, true),
        )
    }

    fn fan_out(mode: Mode) -> DataTransfer {
        DataTransfer::new(
            vec![0, 1, 0, 1],
            vec![0, 1, 2, 3],
            vec![("b:x".into(), "a:y".into()), ("c:x".into(), "a:y".into())],
            vec![("b:obj".into(), "a:obj".into())],
            mode,
        )
    }

    #[test]
    fn test_forward_copies_values_and_objects() {
        let (mut u, mut p) = vectors();
        fan_out(Mode::Fwd).execute(&mut u, &mut p, Mode::Fwd, false).unwrap();
        assert_eq!(p.flat(), &[1.0, 2.0, 1.0, 2.0]);
        assert_eq!(p.object("b:obj"), Some(&json!("hello")));
    }

    #[test]
    fn test_forward_deriv_skips_objects() {
        let (mut u, mut p) = vectors();
        fan_out(Mode::Fwd).execute(&mut u, &mut p, Mode::Fwd, true).unwrap();
        assert_eq!(p.object("b:obj"), Some(&json!(null)));
    }

    #[test]
    fn test_reverse_sums_shared_source() {
        let (mut du, mut dp) = vectors();
        du.fill(0.0);
        dp.set("b:x", &[1.0, 10.0]).unwrap();
        dp.set("c:x", &[2.0, 20.0]).unwrap();
        fan_out(Mode::Rev).execute(&mut du, &mut dp, Mode::Rev, true).unwrap();
        assert_eq!(du.get("a:y").unwrap(), &[3.0, 30.0]);
    }

    #[test]
    fn test_forward_then_reverse_is_neutral() {
        let (mut u, mut p) = vectors();
        let plan_fwd = DataTransfer::new(vec![0, 1], vec![0, 1], vec![], vec![], Mode::Fwd);
        let plan_rev = DataTransfer::new(vec![0, 1], vec![0, 1], vec![], vec![], Mode::Rev);
        let original = u.get("a:y").unwrap().to_vec();

        plan_fwd.execute(&mut u, &mut p, Mode::Fwd, true).unwrap();
        u.fill(0.0);
        plan_rev.execute(&mut u, &mut p, Mode::Rev, true).unwrap();

        assert_eq!(u.get("a:y").unwrap(), original.as_slice());
    }
}
