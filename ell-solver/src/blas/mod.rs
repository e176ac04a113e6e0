//! BLAS-like primitives over dense `f32` vectors and ELL matrices.
//!
//! [`CpuBlas`] is the sequential reference implementation and serves as the
//! oracle for [`GpuBlas`], which runs the same primitives as wgpu compute
//! kernels. Every call is synchronous from the caller's perspective: the GPU
//! backend blocks on read-back before its future resolves.

use crate::algorithms::ConjugateGradient;
use ell_core::{EllCoreError, EllMatrix, EllValue};
use std::future::Future;

mod cpu;
mod gpu;

pub use cpu::CpuBlas;
pub use gpu::GpuBlas;

pub trait Blas: std::fmt::Debug {
    /// Short backend name used in log output.
    fn name(&self) -> &'static str;

    /// `result[i] = alpha * x[i] + y[i]`
    fn s_axpy(
        &self,
        x: &[f32],
        y: &[f32],
        alpha: f32,
        result: &mut [f32],
    ) -> impl Future<Output = Result<(), EllCoreError>>;

    /// `x^T y`; zero for empty vectors.
    fn s_dot(&self, x: &[f32], y: &[f32]) -> impl Future<Output = Result<f32, EllCoreError>>;

    /// Euclidean norm, `sqrt(s_dot(x, x))`.
    fn s_nrm2(&self, x: &[f32]) -> impl Future<Output = Result<f32, EllCoreError>> {
        async move { Ok(self.s_dot(x, x).await?.sqrt()) }
    }

    /// `result = mat * vec`
    fn s_spmv_ell(
        &self,
        mat: &EllMatrix<f32>,
        vec: &[f32],
        result: &mut [f32],
    ) -> impl Future<Output = Result<(), EllCoreError>>;

    /// Fixed-point SpMV; every term is `(v * vec[col]) / FIXED_POINT_SCALE`.
    fn h_spmv_ell(
        &self,
        mat: &EllMatrix<i16>,
        vec: &[f32],
        result: &mut [f32],
    ) -> impl Future<Output = Result<(), EllCoreError>>;

    /// `x^T (mat * y)` without materializing `mat * y`.
    fn s_sp_inner_product_ell(
        &self,
        mat: &EllMatrix<f32>,
        x: &[f32],
        y: &[f32],
    ) -> impl Future<Output = Result<f32, EllCoreError>>;

    /// Solves `mat * x = b` with preconditioned CG and returns the iteration count.
    ///
    /// `initial` defaults to zeros. Converged and budget-exhausted runs are not
    /// distinguished; verify the residual when it matters.
    ///
    /// # Errors
    /// `NonSymmetricMatrix` before any iteration if `mat` is not symmetric.
    fn s_sp_conj_grad_ell(
        &self,
        mat: &EllMatrix<f32>,
        b: &[f32],
        x: &mut [f32],
        initial: Option<&[f32]>,
        params: &ConjugateGradient,
    ) -> impl Future<Output = Result<usize, EllCoreError>>;

    /// CG over a fixed-point matrix. The preconditioner in `params` is not supported and ignored.
    fn h_sp_conj_grad_ell(
        &self,
        mat: &EllMatrix<i16>,
        b: &[f32],
        x: &mut [f32],
        initial: Option<&[f32]>,
        params: &ConjugateGradient,
    ) -> impl Future<Output = Result<usize, EllCoreError>>;
}

pub(crate) fn check_same_len(op: &str, lens: &[usize]) -> Result<(), EllCoreError> {
    if let Some((&first, rest)) = lens.split_first() {
        if let Some(&other) = rest.iter().find(|&&len| len != first) {
            return Err(EllCoreError::InvalidDimensions(format!(
                "{}: vector lengths differ ({} != {})",
                op, first, other
            )));
        }
    }
    Ok(())
}

pub(crate) fn check_spmv_dims<T: EllValue>(
    op: &str,
    mat: &EllMatrix<T>,
    input_len: usize,
    result_len: usize,
) -> Result<(), EllCoreError> {
    if input_len != mat.num_cols() || result_len != mat.num_rows() {
        return Err(EllCoreError::InvalidDimensions(format!(
            "{}: {}x{} matrix with input of {} and result of {} elements",
            op,
            mat.num_rows(),
            mat.num_cols(),
            input_len,
            result_len
        )));
    }
    Ok(())
}

pub(crate) fn warn_unsupported_preconditioner(params: &ConjugateGradient) {
    if params.preconditioner != crate::preconditioner::Preconditioner::None {
        log::warn!(
            "Preconditioner {:?} is not supported for fixed-point CG, solving without",
            params.preconditioner
        );
    }
}
