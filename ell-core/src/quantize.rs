//! 16-bit fixed-point representation of ELL matrices.
//!
//! A stored `i16` value `q` stands for `q / FIXED_POINT_SCALE`; a
//! [`QuantizedEllMatrix`] additionally carries a global rescale factor so the
//! represented matrix is `rescale * q / FIXED_POINT_SCALE`.

use crate::ell_matrix::{EllMatrix, EllValue};
use crate::error::EllCoreError;

/// Fixed-point scale, `2^15 - 1`.
pub const FIXED_POINT_SCALE: f32 = 32767.0;

/// A fixed-point ELL matrix together with the factor needed to recover the
/// original magnitudes.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedEllMatrix {
    matrix: EllMatrix<i16>,
    rescale: f32,
}

impl QuantizedEllMatrix {
    /// Wraps an already quantized matrix.
    pub fn new(matrix: EllMatrix<i16>, rescale: f32) -> Self {
        Self { matrix, rescale }
    }

    /// Quantizes a float matrix so its largest magnitude maps to `FIXED_POINT_SCALE`.
    /// Column layout is kept slot for slot.
    pub fn from_f32(source: &EllMatrix<f32>) -> Result<Self, EllCoreError> {
        // `f32::max` drops NaN operands, so non-finite values are rejected up front.
        if source.values().iter().any(|v| !v.is_finite()) {
            return Err(EllCoreError::UnsupportedOperation(
                "Cannot quantize a matrix with non-finite values".to_string(),
            ));
        }
        let max_abs = source
            .values()
            .iter()
            .fold(0.0f32, |acc, v| acc.max(v.abs()));
        let rescale = if max_abs > 0.0 { max_abs } else { 1.0 };

        let mut matrix = EllMatrix::new(
            source.num_rows(),
            source.num_cols(),
            source.num_cols_per_row(),
        );
        for row in 0..source.num_rows() {
            for slot in 0..source.num_cols_per_row() {
                if let Some(col) = source.get_column(row, slot) {
                    let v = source.get_value_by_index(row, slot);
                    let q = (v / rescale * FIXED_POINT_SCALE)
                        .round()
                        .clamp(-FIXED_POINT_SCALE, FIXED_POINT_SCALE) as i16;
                    matrix.set_value_by_index(row, col, slot, q)?;
                }
            }
        }
        log::debug!(
            "Quantized {}x{} ELL matrix, rescale {}",
            source.num_rows(),
            source.num_cols(),
            rescale
        );
        Ok(Self { matrix, rescale })
    }

    pub fn matrix(&self) -> &EllMatrix<i16> {
        &self.matrix
    }

    pub fn into_matrix(self) -> EllMatrix<i16> {
        self.matrix
    }

    /// Factor that multiplies fixed-point products back to original magnitude.
    pub fn rescale(&self) -> f32 {
        self.rescale
    }

    /// Distance between two adjacent representable values.
    pub fn step(&self) -> f32 {
        self.rescale / FIXED_POINT_SCALE
    }

    /// Reconstructs the float matrix this one approximates.
    pub fn dequantize(&self) -> EllMatrix<f32> {
        let m = &self.matrix;
        let mut out = EllMatrix::new(m.num_rows(), m.num_cols(), m.num_cols_per_row());
        for row in 0..m.num_rows() {
            for slot in 0..m.num_cols_per_row() {
                if let Some(col) = m.get_column(row, slot) {
                    let v = m.get_value_by_index(row, slot).to_real() * self.rescale;
                    // Slot and bounds come from a matrix of identical shape.
                    let _ = out.set_value_by_index(row, col, slot, v);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantize_maps_max_to_scale() {
        let matrix =
            EllMatrix::from_entries(2, 2, 2, &[(0, 0, 4.0f32), (0, 1, -2.0), (1, 1, 1.0)])
                .unwrap();
        let quantized = QuantizedEllMatrix::from_f32(&matrix).unwrap();
        assert_eq!(quantized.rescale(), 4.0);
        assert_eq!(quantized.matrix().get_value(0, 0), 32767);
        assert_eq!(quantized.matrix().get_value(0, 1), -16384);
        assert_eq!(quantized.matrix().get_value(1, 1), 8192);
        assert_eq!(quantized.matrix().nnz(), 3);
    }

    #[test]
    fn test_dequantize_within_half_step() {
        let matrix = EllMatrix::from_entries(
            3,
            3,
            2,
            &[(0, 0, 0.3f32), (0, 2, -7.25), (1, 1, 1e-3), (2, 0, 5.5)],
        )
        .unwrap();
        let quantized = QuantizedEllMatrix::from_f32(&matrix).unwrap();
        let restored = quantized.dequantize();
        let half_step = 0.5 * quantized.step() + 1e-6;
        for (a, b) in matrix.values().iter().zip(restored.values()) {
            assert!((a - b).abs() <= half_step, "{} vs {}", a, b);
        }
        assert_eq!(matrix.indices(), restored.indices());
    }

    #[test]
    fn test_quantize_zero_matrix() {
        let matrix: EllMatrix<f32> = EllMatrix::new(3, 3, 1);
        let quantized = QuantizedEllMatrix::from_f32(&matrix).unwrap();
        assert_eq!(quantized.rescale(), 1.0);
        assert_eq!(quantized.matrix().nnz(), 0);
    }

    #[test]
    fn test_quantize_rejects_infinite() {
        let inf = EllMatrix::from_entries(1, 1, 1, &[(0, 0, f32::INFINITY)]).unwrap();
        assert!(QuantizedEllMatrix::from_f32(&inf).is_err());
    }

    #[test]
    fn test_quantize_rejects_nan() {
        let nan =
            EllMatrix::from_entries(1, 2, 2, &[(0, 0, f32::NAN), (0, 1, 2.0f32)]).unwrap();
        assert!(matches!(
            QuantizedEllMatrix::from_f32(&nan),
            Err(EllCoreError::UnsupportedOperation(_))
        ));
    }
}
