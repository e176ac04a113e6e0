use ell_core::{EllCoreError, EllMatrix, EllValue, FIXED_POINT_SCALE};
use fastrand::Rng;

/// Element types the random generators can draw.
pub trait RandomEllValue: EllValue {
    fn random(rng: &mut Rng) -> Self;
}

impl RandomEllValue for f32 {
    /// Uniform in `[-5, 10)`.
    fn random(rng: &mut Rng) -> Self {
        -5.0 + rng.f32() * 15.0
    }
}

impl RandomEllValue for i16 {
    /// Uniform over the symmetric fixed-point range.
    fn random(rng: &mut Rng) -> Self {
        rng.i16(-i16::MAX..=i16::MAX)
    }
}

/// `n` values uniform in `[lo, hi)`.
pub fn random_vector(n: usize, lo: f32, hi: f32, rng: &mut Rng) -> Vec<f32> {
    (0..n).map(|_| lo + rng.f32() * (hi - lo)).collect()
}

/// Fills `mat` with random entries.
///
/// About one row in a hundred stays empty. The others get a random number of
/// significant slots, whose columns increase along a random walk over the
/// column range; a walk that reaches the last column leaves the remaining slots empty.
pub fn randomize_ell<T: RandomEllValue>(mat: &mut EllMatrix<T>, rng: &mut Rng) {
    mat.clear();
    let cpr = mat.num_cols_per_row();
    let num_cols = mat.num_cols();
    if cpr == 0 || num_cols == 0 {
        return;
    }

    for row in 0..mat.num_rows() {
        if rng.usize(..100) == 0 {
            continue;
        }
        let significant = ((10.0 * rng.f32() * cpr as f32).round() as usize).min(cpr);
        let mut next_col = 0usize;
        for slot in 0..significant {
            if next_col >= num_cols {
                break;
            }
            let col = next_col + (rng.f32() * (num_cols - 1 - next_col) as f32).round() as usize;
            if mat.set_value_by_index(row, col, slot, T::random(rng)).is_err() {
                break;
            }
            next_col = col + 1;
        }
    }
}

/// Edge of the voxel graph: neighbouring row (`None` for a seed voxel) and
/// integer weight `|ΔI| + 1`.
type Edge = (Option<usize>, u32);

/// Random 3D voxel grid with `n` unknowns, one row per non-seed voxel.
///
/// Neighbours along x are connected when `cpr >= 3`, along y when `cpr >= 5`
/// and along z when `cpr >= 7`.
fn voxel_graph(n: usize, cpr: usize, rng: &mut Rng) -> Vec<Vec<Edge>> {
    if n == 0 {
        return Vec::new();
    }
    let mut d = 1usize;
    while d * d * d < n {
        d += 1;
    }
    let dims = [d, d, (11 * d).div_ceil(10)];
    let num_voxels = dims[0] * dims[1] * dims[2];
    let num_seeds = num_voxels - n;

    let intensity: Vec<u8> = (0..num_voxels).map(|_| rng.u8(..)).collect();
    let mut seeds = vec![false; num_voxels];
    let mut seeds_generated = 0;
    while seeds_generated < num_seeds {
        for seed in seeds.iter_mut() {
            if seeds_generated == num_seeds {
                break;
            }
            if !*seed && rng.usize(..10) == 0 {
                *seed = true;
                seeds_generated += 1;
            }
        }
    }

    let mut row_of = vec![None; num_voxels];
    let mut next_row = 0;
    for (voxel, &seed) in seeds.iter().enumerate() {
        if !seed {
            row_of[voxel] = Some(next_row);
            next_row += 1;
        }
    }

    let strides = [1, dims[0], dims[0] * dims[1]];
    let axes = [cpr >= 3, cpr >= 5, cpr >= 7];
    let mut graph = Vec::with_capacity(n);
    for voxel in 0..num_voxels {
        if seeds[voxel] {
            continue;
        }
        let coords = [
            voxel % dims[0],
            (voxel / dims[0]) % dims[1],
            voxel / (dims[0] * dims[1]),
        ];
        let mut edges = Vec::with_capacity(6);
        for axis in (0..3).filter(|&axis| axes[axis]) {
            let mut neighbours = Vec::with_capacity(2);
            if coords[axis] > 0 {
                neighbours.push(voxel - strides[axis]);
            }
            if coords[axis] + 1 < dims[axis] {
                neighbours.push(voxel + strides[axis]);
            }
            for neighbour in neighbours {
                let weight = intensity[voxel].abs_diff(intensity[neighbour]) as u32 + 1;
                edges.push((row_of[neighbour], weight));
            }
        }
        graph.push(edges);
    }
    graph
}

fn check_spd_target<T: EllValue>(mat: &EllMatrix<T>) -> Result<(), EllCoreError> {
    if !mat.is_square() {
        return Err(EllCoreError::InvalidDimensions(format!(
            "SPD generator needs a square matrix (dims: {}x{})",
            mat.num_rows(),
            mat.num_cols()
        )));
    }
    Ok(())
}

/// Integer weight every connected row adds to its own diagonal.
///
/// A group of voxels that touches no seed is otherwise a pure Laplacian block
/// with zero row sums, i.e. singular.
const GROUND_WEIGHT: u32 = 1;

/// Diagonal weight of a row: its edge weights plus [`GROUND_WEIGHT`], or zero
/// for a row without neighbours.
fn diagonal_weight(edges: &[Edge]) -> u32 {
    if edges.is_empty() {
        0
    } else {
        edges.iter().map(|&(_, w)| w).sum::<u32>() + GROUND_WEIGHT
    }
}

/// Fills `mat` with a random symmetric, strictly diagonally dominant (hence
/// SPD) matrix: the weighted Laplacian of a random voxel graph, with edges to
/// seed voxels only adding to the diagonal, shifted by a small ground weight.
///
/// Rows without any neighbour get a unit diagonal.
pub fn randomize_ell_spd(mat: &mut EllMatrix<f32>, rng: &mut Rng) -> Result<(), EllCoreError> {
    check_spd_target(mat)?;
    mat.clear();
    let graph = voxel_graph(mat.num_rows(), mat.num_cols_per_row(), rng);
    for (row, edges) in graph.iter().enumerate() {
        for &(neighbour, weight) in edges {
            if let Some(col) = neighbour {
                mat.set_value(row, col, -(weight as f32 / 255.0))?;
            }
        }
        let diagonal = match diagonal_weight(edges) {
            0 => 1.0,
            w => w as f32 / 255.0,
        };
        mat.set_value(row, row, diagonal)?;
    }
    log::trace!("Generated {}x{} SPD matrix", mat.num_rows(), mat.num_cols());
    Ok(())
}

/// Fixed-point counterpart of [`randomize_ell_spd`]. Integer weights are
/// scaled so the largest diagonal becomes `FIXED_POINT_SCALE`; scaled
/// values are truncated. The ground weight scales to at least one unit,
/// which keeps every row strictly dominant after truncation.
pub fn randomize_ell_spd_quantized(
    mat: &mut EllMatrix<i16>,
    rng: &mut Rng,
) -> Result<(), EllCoreError> {
    check_spd_target(mat)?;
    mat.clear();
    let graph = voxel_graph(mat.num_rows(), mat.num_cols_per_row(), rng);
    let weight_sums: Vec<u32> = graph.iter().map(|edges| diagonal_weight(edges)).collect();
    let max_weight_sum = weight_sums.iter().copied().max().unwrap_or(0);
    let scale = if max_weight_sum > 0 {
        FIXED_POINT_SCALE / max_weight_sum as f32
    } else {
        1.0
    };

    for (row, edges) in graph.iter().enumerate() {
        for &(neighbour, weight) in edges {
            if let Some(col) = neighbour {
                mat.set_value(row, col, -((weight as f32 * scale) as i16))?;
            }
        }
        let diagonal = if weight_sums[row] > 0 {
            (weight_sums[row] as f32 * scale) as i16
        } else {
            FIXED_POINT_SCALE as i16
        };
        mat.set_value(row, row, diagonal)?;
    }
    Ok(())
}
