//! Randomized cross-validation of an accelerated [`Blas`](crate::blas::Blas)
//! backend against the reference backend.
//!
//! Contains the random matrix/vector generators, the comparison helpers, a
//! hand-computed ground-truth fixture and the [`CrossCheck`] sweep runner.

mod cross_check;
mod generators;

pub use cross_check::{CrossCheck, CrossCheckReport, SweepConfig, CG_MIN_EXP};
pub use generators::{
    random_vector, randomize_ell, randomize_ell_spd, randomize_ell_spd_quantized, RandomEllValue,
};

use ell_core::{EllCoreError, EllMatrix, EllValue, FIXED_POINT_SCALE};

/// Explicit entries of the 8x6 ground-truth matrix.
pub const GROUND_TRUTH_ENTRIES: [(usize, usize, f32); 19] = [
    (0, 1, 2.0),
    (0, 3, -3.0),
    (0, 4, 5.0),
    (1, 0, -1.5),
    (1, 1, 9.0),
    (2, 1, 2.0),
    (2, 3, -3.5),
    (2, 4, 7.0),
    (4, 0, 5.5),
    (4, 5, -13.0),
    (5, 1, 8.0),
    (5, 2, 9.0),
    (5, 3, -5.0),
    (6, 0, 2.0),
    (6, 4, -3.0),
    (6, 5, -0.5),
    (7, 0, 1.0),
    (7, 2, 2.0),
    (7, 5, 3.0),
];

/// Input vector of the ground-truth SpMV.
pub const GROUND_TRUTH_X: [f32; 6] = [1.0, -3.0, 0.0, 5.0, 0.5, 10.0];

/// Hand-computed `ground_truth_matrix() * GROUND_TRUTH_X`.
pub const GROUND_TRUTH_Y: [f32; 8] = [-18.5, -28.5, -20.0, 0.0, -124.5, -49.0, -4.5, 31.0];

/// The 8x6 ground-truth matrix, three slots per row.
pub fn ground_truth_matrix() -> Result<EllMatrix<f32>, EllCoreError> {
    EllMatrix::from_entries(8, 6, 3, &GROUND_TRUTH_ENTRIES)
}

/// The ground-truth matrix with every entry doubled and stored as raw
/// fixed-point integers.
pub fn ground_truth_fixed_matrix() -> Result<EllMatrix<i16>, EllCoreError> {
    let entries: Vec<(usize, usize, i16)> = GROUND_TRUTH_ENTRIES
        .iter()
        .map(|&(row, col, v)| (row, col, (v * 2.0) as i16))
        .collect();
    EllMatrix::from_entries(8, 6, 3, &entries)
}

/// Expected fixed-point SpMV of [`ground_truth_fixed_matrix`] on [`GROUND_TRUTH_X`].
pub fn ground_truth_fixed_y() -> [f32; 8] {
    GROUND_TRUTH_Y.map(|y| y * 2.0 / FIXED_POINT_SCALE)
}

/// Element-wise comparison. A pair passes when both magnitudes are at most
/// `100 * rel_thresh` or when `|a / b - 1| <= rel_thresh`.
pub fn cmp_vectors(a: &[f32], b: &[f32], rel_thresh: f32) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).all(|(&x, &y)| {
        let small = x.abs() <= 100.0 * rel_thresh && y.abs() <= 100.0 * rel_thresh;
        small || (x / y - 1.0).abs() <= rel_thresh
    })
}

/// `|value - reference| / |reference|`, or the absolute difference when the
/// reference is zero.
pub fn relative_error(value: f32, reference: f32) -> f32 {
    let diff = (value - reference).abs();
    if reference == 0.0 {
        diff
    } else {
        diff / reference.abs()
    }
}

/// `||mat * x - b||` computed on the host.
pub fn residual_norm<T: EllValue>(
    mat: &EllMatrix<T>,
    x: &[f32],
    b: &[f32],
) -> Result<f32, EllCoreError> {
    if x.len() != mat.num_cols() || b.len() != mat.num_rows() {
        return Err(EllCoreError::InvalidDimensions(format!(
            "residual of a {}x{} matrix with x of {} and b of {} elements",
            mat.num_rows(),
            mat.num_cols(),
            x.len(),
            b.len()
        )));
    }
    let sum: f32 = b
        .iter()
        .enumerate()
        .map(|(row, &bi)| {
            let ax: f32 = mat.row_entries(row).map(|(col, v)| v.mul_real(x[col])).sum();
            (ax - bi) * (ax - bi)
        })
        .sum();
    Ok(sum.sqrt())
}

/// `base * sqrt(n)`, the tolerance for results accumulated over `n` terms.
pub fn scaled_tolerance(base: f32, n: usize) -> f32 {
    base * (n.max(1) as f32).sqrt()
}

/// The three sizes swept around `2^exp`.
pub fn size_kinds(exp: u32) -> [usize; 3] {
    let n = 1usize << exp;
    [n, n - 1, n + 17]
}

/// `2^i`, `2^i - 1` and `2^i + 17` for every `i` in `min_exp..=max_exp`.
pub fn sweep_sizes(min_exp: u32, max_exp: u32) -> Vec<usize> {
    (min_exp..=max_exp).flat_map(size_kinds).collect()
}
