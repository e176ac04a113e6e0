use super::{check_same_len, check_spmv_dims, warn_unsupported_preconditioner, Blas};
use crate::algorithms::conjugate_gradient::{
    run_conjugate_gradient, validate_cg_inputs, CgKernels,
};
use crate::algorithms::ConjugateGradient;
use ell_core::{EllCoreError, EllMatrix, EllMatrixGpu, GpuDevice, GpuVector, TransferStats};
use log::{error, info};

/// wgpu compute backend.
///
/// Created uninitialized; [`GpuBlas::initialize`] acquires the adapter and
/// compiles the kernels. Every operation uploads its operands, runs, and
/// reads the result back before returning, so caller slices are only written
/// once the device work has succeeded.
#[derive(Debug, Default)]
pub struct GpuBlas {
    device: Option<GpuDevice>,
}

impl GpuBlas {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an already initialized device.
    pub fn with_device(device: GpuDevice) -> Self {
        Self {
            device: Some(device),
        }
    }

    /// Acquires the GPU and compiles the kernel set. A no-op when already initialized.
    pub async fn initialize(&mut self) -> Result<(), EllCoreError> {
        if self.device.is_none() {
            self.device = Some(GpuDevice::new().await?);
            info!("GPU BLAS backend initialized");
        }
        Ok(())
    }

    /// Blocking variant of [`GpuBlas::initialize`] for synchronous callers.
    #[cfg(feature = "native")]
    pub fn initialize_blocking(&mut self) -> Result<(), EllCoreError> {
        pollster::block_on(self.initialize())
    }

    pub fn is_initialized(&self) -> bool {
        self.device.is_some()
    }

    /// Releases the device. Later calls fail with `NotInitialized` until re-initialized.
    pub fn teardown(&mut self) {
        if self.device.take().is_some() {
            info!("GPU BLAS backend torn down");
        }
    }

    pub fn transfer_stats(&self) -> Option<TransferStats> {
        self.device.as_ref().map(GpuDevice::get_transfer_stats)
    }

    pub fn reset_transfer_stats(&self) {
        if let Some(device) = &self.device {
            device.reset_transfer_stats();
        }
    }

    fn device(&self) -> Result<&GpuDevice, EllCoreError> {
        self.device.as_ref().ok_or_else(|| {
            error!("GPU BLAS backend used before initialize()");
            EllCoreError::NotInitialized
        })
    }

    async fn spmv_on_device(
        device: &GpuDevice,
        matrix: &EllMatrixGpu,
        vec: &[f32],
        result: &mut [f32],
    ) -> Result<(), EllCoreError> {
        let x = device.create_vector("spmv x", vec);
        let mut out = device.create_empty_vector("spmv result", result.len());
        device.spmv(matrix, &x, &mut out)?;
        let values = out.read_contents().await?;
        result.copy_from_slice(&values);
        Ok(())
    }
}

impl Blas for GpuBlas {
    fn name(&self) -> &'static str {
        "gpu"
    }

    async fn s_axpy(
        &self,
        x: &[f32],
        y: &[f32],
        alpha: f32,
        result: &mut [f32],
    ) -> Result<(), EllCoreError> {
        let device = self.device()?;
        check_same_len("s_axpy", &[x.len(), y.len(), result.len()])?;
        let x_gpu = device.create_vector("axpy x", x);
        let mut out = device.create_vector("axpy y/result", y);
        device.axpby(alpha, &x_gpu, 1.0, &mut out)?;
        let values = out.read_contents().await?;
        result.copy_from_slice(&values);
        Ok(())
    }

    async fn s_dot(&self, x: &[f32], y: &[f32]) -> Result<f32, EllCoreError> {
        let device = self.device()?;
        check_same_len("s_dot", &[x.len(), y.len()])?;
        let x_gpu = device.create_vector("dot x", x);
        let y_gpu = device.create_vector("dot y", y);
        device.dot(&x_gpu, &y_gpu).await
    }

    async fn s_spmv_ell(
        &self,
        mat: &EllMatrix<f32>,
        vec: &[f32],
        result: &mut [f32],
    ) -> Result<(), EllCoreError> {
        let device = self.device()?;
        check_spmv_dims("s_spmv_ell", mat, vec.len(), result.len())?;
        let matrix = device.create_ell_matrix(mat);
        Self::spmv_on_device(device, &matrix, vec, result).await
    }

    async fn h_spmv_ell(
        &self,
        mat: &EllMatrix<i16>,
        vec: &[f32],
        result: &mut [f32],
    ) -> Result<(), EllCoreError> {
        let device = self.device()?;
        check_spmv_dims("h_spmv_ell", mat, vec.len(), result.len())?;
        let matrix = device.create_fixed_ell_matrix(mat);
        Self::spmv_on_device(device, &matrix, vec, result).await
    }

    async fn s_sp_inner_product_ell(
        &self,
        mat: &EllMatrix<f32>,
        x: &[f32],
        y: &[f32],
    ) -> Result<f32, EllCoreError> {
        let device = self.device()?;
        check_spmv_dims("s_sp_inner_product_ell", mat, y.len(), x.len())?;
        let matrix = device.create_ell_matrix(mat);
        let x_gpu = device.create_vector("inner product x", x);
        let y_gpu = device.create_vector("inner product y", y);
        device.inner_product(&matrix, &x_gpu, &y_gpu).await
    }

    async fn s_sp_conj_grad_ell(
        &self,
        mat: &EllMatrix<f32>,
        b: &[f32],
        x: &mut [f32],
        initial: Option<&[f32]>,
        params: &ConjugateGradient,
    ) -> Result<usize, EllCoreError> {
        let device = self.device()?;
        validate_cg_inputs(mat, b, x, initial)?;
        let preconditioner = params
            .preconditioner
            .build(mat)?
            .map(|inverse| device.create_ell_matrix(&inverse));
        let kernels = GpuCgKernels {
            device,
            matrix: device.create_ell_matrix(mat),
            preconditioner,
            n: mat.num_rows(),
        };
        let (iterations, _) = run_conjugate_gradient(
            &kernels,
            b,
            initial,
            params.threshold,
            params.max_iterations,
            x,
        )
        .await?;
        Ok(iterations)
    }

    async fn h_sp_conj_grad_ell(
        &self,
        mat: &EllMatrix<i16>,
        b: &[f32],
        x: &mut [f32],
        initial: Option<&[f32]>,
        params: &ConjugateGradient,
    ) -> Result<usize, EllCoreError> {
        let device = self.device()?;
        validate_cg_inputs(mat, b, x, initial)?;
        warn_unsupported_preconditioner(params);
        let kernels = GpuCgKernels {
            device,
            matrix: device.create_fixed_ell_matrix(mat),
            preconditioner: None,
            n: mat.num_rows(),
        };
        let (iterations, _) = run_conjugate_gradient(
            &kernels,
            b,
            initial,
            params.threshold,
            params.max_iterations,
            x,
        )
        .await?;
        Ok(iterations)
    }
}

/// Device-resident vectors for the shared CG loop. Only the scalars from
/// `dot` and the final solution travel back to the host.
struct GpuCgKernels<'a> {
    device: &'a GpuDevice,
    matrix: EllMatrixGpu,
    preconditioner: Option<EllMatrixGpu>,
    n: usize,
}

impl CgKernels for GpuCgKernels<'_> {
    type Vector = GpuVector;

    fn vector(&self, label: &str, data: &[f32]) -> GpuVector {
        self.device.create_vector(label, data)
    }

    fn zeros(&self, label: &str) -> GpuVector {
        self.device.create_empty_vector(label, self.n)
    }

    fn matvec(&self, x: &GpuVector, out: &mut GpuVector) -> Result<(), EllCoreError> {
        self.device.spmv(&self.matrix, x, out)
    }

    fn precondition(&self, r: &GpuVector, z: &mut GpuVector) -> Result<(), EllCoreError> {
        match &self.preconditioner {
            Some(inverse) => self.device.spmv(inverse, r, z),
            None => z.copy_from(r),
        }
    }

    fn axpby(
        &self,
        alpha: f32,
        x: &GpuVector,
        beta: f32,
        y: &mut GpuVector,
    ) -> Result<(), EllCoreError> {
        self.device.axpby(alpha, x, beta, y)
    }

    fn copy(&self, src: &GpuVector, dst: &mut GpuVector) -> Result<(), EllCoreError> {
        dst.copy_from(src)
    }

    async fn dot(&self, x: &GpuVector, y: &GpuVector) -> Result<f32, EllCoreError> {
        self.device.dot(x, y).await
    }

    async fn read(&self, v: &GpuVector) -> Result<Vec<f32>, EllCoreError> {
        v.read_contents().await
    }
}
