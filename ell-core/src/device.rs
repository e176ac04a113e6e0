use crate::context::GpuContext;
use crate::ell_matrix::{EllMatrix, EllValue};
use crate::error::EllCoreError;
use crate::gpu_matrix::{EllFormat, EllMatrixGpu};
use crate::ops;
use crate::traits::Matrix;
use crate::vector::GpuVector;
use std::sync::Arc;

/// Handle to an initialized GPU: owns the shared context and creates
/// vectors and matrices bound to it.
#[derive(Debug, Clone)]
pub struct GpuDevice {
    pub(crate) context: Arc<GpuContext>,
}

impl GpuDevice {
    /// Acquires a device and compiles the kernel set.
    pub async fn new() -> Result<Self, EllCoreError> {
        let context = GpuContext::new().await?;
        log::info!("GpuDevice created successfully");
        Ok(Self {
            context: Arc::new(context),
        })
    }

    // --- Resource Creation ---

    /// Creates a GpuVector initialized with `data`.
    pub fn create_vector(&self, label: &str, data: &[f32]) -> GpuVector {
        let buffer = if data.is_empty() {
            self.context
                .create_gpu_buffer_with_data(label, bytemuck::bytes_of(&0.0f32), GpuVector::usage())
        } else {
            self.context
                .create_gpu_buffer_with_data(label, bytemuck::cast_slice(data), GpuVector::usage())
        };
        GpuVector::new_internal(buffer, data.len(), label.to_string(), Arc::clone(&self.context))
    }

    /// Creates a zero-filled GpuVector of `size` elements.
    pub fn create_empty_vector(&self, label: &str, size: usize) -> GpuVector {
        let buffer = self.context.create_empty_buffer(
            label,
            GpuVector::buffer_size(size),
            GpuVector::usage(),
        );
        GpuVector::new_internal(buffer, size, label.to_string(), Arc::clone(&self.context))
    }

    /// Uploads a float ELL matrix.
    pub fn create_ell_matrix(&self, matrix: &EllMatrix<f32>) -> EllMatrixGpu {
        self.upload_ell(matrix, EllFormat::Float)
    }

    /// Uploads a 16-bit fixed-point ELL matrix.
    pub fn create_fixed_ell_matrix(&self, matrix: &EllMatrix<i16>) -> EllMatrixGpu {
        self.upload_ell(matrix, EllFormat::Fixed16)
    }

    fn upload_ell<T: EllValue>(&self, matrix: &EllMatrix<T>, format: EllFormat) -> EllMatrixGpu {
        let usage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST;
        let values_bytes = padded_bytes(bytemuck::cast_slice(matrix.values()));
        let indices_bytes = padded_bytes(bytemuck::cast_slice(matrix.indices()));
        let values_buffer =
            self.context
                .create_gpu_buffer_with_data("GPU ELL Values Buffer", &values_bytes, usage);
        let indices_buffer =
            self.context
                .create_gpu_buffer_with_data("GPU ELL Indices Buffer", &indices_bytes, usage);
        log::debug!(
            "Uploaded {}x{} ELL matrix ({:?}, {} columns per row)",
            matrix.rows(),
            matrix.cols(),
            format,
            matrix.num_cols_per_row()
        );
        EllMatrixGpu::new_internal(
            matrix.dims(),
            matrix.num_cols_per_row(),
            format,
            values_buffer,
            indices_buffer,
            Arc::clone(&self.context),
        )
    }

    // --- Operations ---

    /// `y = alpha * x + beta * y`, in place on `y`.
    pub fn axpby(
        &self,
        alpha: f32,
        x: &GpuVector,
        beta: f32,
        y: &mut GpuVector,
    ) -> Result<(), EllCoreError> {
        ops::internal_axpby(&self.context, alpha, x, beta, y)
    }

    /// `x^T y`, blocking on the read-back of the reduced scalar.
    pub async fn dot(&self, x: &GpuVector, y: &GpuVector) -> Result<f32, EllCoreError> {
        ops::internal_dot(&self.context, x, y).await
    }

    /// `result = matrix * x` for float and fixed-point matrices.
    pub fn spmv(
        &self,
        matrix: &EllMatrixGpu,
        x: &GpuVector,
        result: &mut GpuVector,
    ) -> Result<(), EllCoreError> {
        ops::internal_spmv(&self.context, matrix, x, result)
    }

    /// `x^T (matrix * y)` in one fused pass plus the partial reduction.
    pub async fn inner_product(
        &self,
        matrix: &EllMatrixGpu,
        x: &GpuVector,
        y: &GpuVector,
    ) -> Result<f32, EllCoreError> {
        ops::internal_inner_product(&self.context, matrix, x, y).await
    }

    // --- Utility ---

    /// Whether the compiled kernel set contains `name`.
    pub fn has_kernel(&self, name: &str) -> bool {
        self.context.has_kernel(name)
    }

    /// Returns the current GPU transfer statistics.
    pub fn get_transfer_stats(&self) -> TransferStats {
        let (bytes_to_gpu, bytes_from_gpu) = self.context.get_transfer_stats();
        TransferStats {
            bytes_to_gpu,
            bytes_from_gpu,
        }
    }

    /// Resets the GPU transfer statistics counters to zero.
    pub fn reset_transfer_stats(&self) {
        self.context.reset_transfer_stats();
    }
}

/// Storage bindings need a non-empty buffer whose length is a multiple of 4.
fn padded_bytes(bytes: &[u8]) -> Vec<u8> {
    let len = bytes.len().max(4).next_multiple_of(4);
    let mut padded = Vec::with_capacity(len);
    padded.extend_from_slice(bytes);
    padded.resize(len, 0);
    padded
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub bytes_to_gpu: u64,
    pub bytes_from_gpu: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantize::QuantizedEllMatrix;
    use pollster::block_on;

    fn device() -> Option<GpuDevice> {
        match block_on(GpuDevice::new()) {
            Ok(device) => Some(device),
            Err(e) => {
                eprintln!("Skipping GPU test, no device available: {}", e);
                None
            }
        }
    }

    #[test]
    fn test_padded_bytes() {
        assert_eq!(padded_bytes(&[]), vec![0, 0, 0, 0]);
        assert_eq!(padded_bytes(&[1, 2]), vec![1, 2, 0, 0]);
        assert_eq!(padded_bytes(&[1, 2, 3, 4, 5]).len(), 8);
    }

    #[test]
    fn test_kernel_lookup() {
        let Some(device) = device() else { return };
        assert!(device.has_kernel(ops::DOT_PARTIALS));
        match device.context.kernel("does_not_exist") {
            Err(EllCoreError::KernelNotFound(name)) => assert_eq!(name, "does_not_exist"),
            other => panic!("Expected KernelNotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_dot_on_gpu() {
        let Some(device) = device() else { return };
        let n = 3000;
        let x: Vec<f32> = (0..n).map(|i| (i % 7) as f32 - 3.0).collect();
        let y: Vec<f32> = (0..n).map(|i| (i % 5) as f32 * 0.5).collect();
        let expected: f32 = x.iter().zip(&y).map(|(a, b)| a * b).sum();
        let gx = device.create_vector("x", &x);
        let gy = device.create_vector("y", &y);
        let dot = block_on(device.dot(&gx, &gy)).unwrap();
        assert!((dot - expected).abs() <= 1e-3 * expected.abs().max(1.0));
        // Second call on fresh reduction buffers must not accumulate
        let again = block_on(device.dot(&gx, &gy)).unwrap();
        assert_eq!(dot, again);
    }

    #[test]
    fn test_dot_empty_vectors() {
        let Some(device) = device() else { return };
        let gx = device.create_vector("x", &[]);
        let gy = device.create_vector("y", &[]);
        assert_eq!(block_on(device.dot(&gx, &gy)).unwrap(), 0.0);
    }

    #[test]
    fn test_axpby_in_place() {
        let Some(device) = device() else { return };
        let gx = device.create_vector("x", &[1.0, 2.0, 3.0]);
        let mut gy = device.create_vector("y", &[10.0, 20.0, 30.0]);
        device.axpby(2.0, &gx, 0.5, &mut gy).unwrap();
        let y = block_on(gy.read_contents()).unwrap();
        assert_eq!(y, vec![7.0, 14.0, 21.0]);
    }

    #[test]
    fn test_spmv_float_and_fixed() {
        let Some(device) = device() else { return };
        let matrix =
            EllMatrix::from_entries(3, 3, 2, &[(0, 0, 2.0f32), (0, 2, -1.0), (1, 1, 4.0), (2, 0, 1.0)])
                .unwrap();
        let x = device.create_vector("x", &[1.0, 0.5, 2.0]);
        let mut y = device.create_empty_vector("y", 3);

        let gpu_matrix = device.create_ell_matrix(&matrix);
        device.spmv(&gpu_matrix, &x, &mut y).unwrap();
        assert_eq!(block_on(y.read_contents()).unwrap(), vec![0.0, 2.0, 1.0]);

        let quantized = QuantizedEllMatrix::from_f32(&matrix).unwrap();
        let gpu_fixed = device.create_fixed_ell_matrix(quantized.matrix());
        device.spmv(&gpu_fixed, &x, &mut y).unwrap();
        let fixed = block_on(y.read_contents()).unwrap();
        for (got, want) in fixed.iter().zip([0.0f32, 2.0, 1.0]) {
            assert!((got * quantized.rescale() - want).abs() < 1e-3);
        }
    }

    #[test]
    fn test_spmv_dimension_mismatch() {
        let Some(device) = device() else { return };
        let matrix: EllMatrix<f32> = EllMatrix::new(3, 4, 1);
        let gpu_matrix = device.create_ell_matrix(&matrix);
        let x = device.create_empty_vector("x", 3);
        let mut y = device.create_empty_vector("y", 3);
        assert!(matches!(
            device.spmv(&gpu_matrix, &x, &mut y),
            Err(EllCoreError::InvalidDimensions(_))
        ));
    }

    #[test]
    fn test_transfer_stats_count_uploads() {
        let Some(device) = device() else { return };
        device.reset_transfer_stats();
        let v = device.create_vector("v", &[1.0; 16]);
        let stats = device.get_transfer_stats();
        assert_eq!(stats.bytes_to_gpu, 64);
        block_on(v.read_contents()).unwrap();
        assert_eq!(device.get_transfer_stats().bytes_from_gpu, 64);
    }
}
