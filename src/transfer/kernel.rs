//! Hot loops shared by data transfers and the derivative propagator.
//!
//! Every nonlinear and linear evaluation runs through these, so the dense
//! cases are vectorized four lanes at a time with `wide`.
use wide::f64x4;

const LANES: usize = 4;

#[inline(always)]
fn load(chunk: &[f64]) -> f64x4 {
    f64x4::from([chunk[0], chunk[1], chunk[2], chunk[3]])
}

/// `dest[i] += src[i]`.
#[inline]
pub fn accumulate(dest: &mut [f64], src: &[f64]) {
    debug_assert_eq!(dest.len(), src.len());
    let mut d_chunks = dest.chunks_exact_mut(LANES);
    let mut s_chunks = src.chunks_exact(LANES);
    for (d, s) in (&mut d_chunks).zip(&mut s_chunks) {
        let sum = load(d) + load(s);
        d.copy_from_slice(&sum.to_array());
    }
    for (d, s) in d_chunks.into_remainder().iter_mut().zip(s_chunks.remainder()) {
        *d += *s;
    }
}

/// `dest[i] = -dest[i]`.
#[inline]
pub fn negate(dest: &mut [f64]) {
    let mut chunks = dest.chunks_exact_mut(LANES);
    for d in &mut chunks {
        let neg = -load(d);
        d.copy_from_slice(&neg.to_array());
    }
    for d in chunks.into_remainder() {
        *d = -*d;
    }
}

/// `dest[dst_idx[k]] = src[src_idx[k]]`.
#[inline]
pub fn gather_scatter(dest: &mut [f64], dst_idx: &[usize], src: &[f64], src_idx: &[usize]) {
    for (&d, &s) in dst_idx.iter().zip(src_idx) {
        dest[d] = src[s];
    }
}

/// `dest[dst_idx[k]] += src[src_idx[k]]`. Repeated destinations sum.
#[inline]
pub fn scatter_add(dest: &mut [f64], dst_idx: &[usize], src: &[f64], src_idx: &[usize]) {
    for (&d, &s) in dst_idx.iter().zip(src_idx) {
        dest[d] += src[s];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0)]
    #[case(3)]
    #[case(4)]
    #[case(9)]
    fn test_accumulate_handles_remainders(#[case] len: usize) {
        let mut dest: Vec<f64> = (0..len).map(|i| i as f64).collect();
        let src = vec![0.5; len];
        accumulate(&mut dest, &src);
        for (i, v) in dest.iter().enumerate() {
            assert_eq!(*v, i as f64 + 0.5);
        }
    }

    #[rstest]
    #[case(vec![1.0, -2.0, 3.0])]
    #[case(vec![1.0, -2.0, 3.0, 4.0, 0.0, -6.0])]
    fn test_negate(#[case] input: Vec<f64>) {
        let mut dest = input.clone();
        negate(&mut dest);
        let expected: Vec<f64> = input.iter().map(|v| -v).collect();
        assert_eq!(dest, expected);
    }

    #[test]
    fn test_scatter_add_sums_duplicates() {
        let mut dest = vec![0.0; 3];
        scatter_add(&mut dest, &[1, 1, 2], &[10.0, 20.0, 30.0], &[0, 1, 2]);
        assert_eq!(dest, vec![0.0, 30.0, 30.0]);
    }

    #[test]
    fn test_gather_scatter_copies_pairs() {
        let mut dest = vec![0.0; 4];
        gather_scatter(&mut dest, &[3, 0], &[7.0, 8.0], &[0, 1]);
        assert_eq!(dest, vec![8.0, 0.0, 0.0, 7.0]);
    }
}
