use super::{check_same_len, check_spmv_dims, warn_unsupported_preconditioner, Blas};
use crate::algorithms::conjugate_gradient::{
    run_conjugate_gradient, validate_cg_inputs, CgKernels,
};
use crate::algorithms::ConjugateGradient;
use ell_core::{EllCoreError, EllMatrix, EllValue, EMPTY_SLOT};

/// Sequential reference backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuBlas;

impl CpuBlas {
    pub fn new() -> Self {
        Self
    }
}

fn axpby(alpha: f32, x: &[f32], beta: f32, y: &mut [f32]) {
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi = alpha * xi + beta * *yi;
    }
}

fn dot(x: &[f32], y: &[f32]) -> f32 {
    x.iter().zip(y).map(|(a, b)| a * b).sum()
}

fn row_dot<T: EllValue>(mat: &EllMatrix<T>, row: usize, vec: &[f32]) -> f32 {
    let cpr = mat.num_cols_per_row();
    let start = row * cpr;
    let values = &mat.values()[start..start + cpr];
    let indices = &mat.indices()[start..start + cpr];
    indices
        .iter()
        .zip(values)
        .filter(|(&col, _)| col != EMPTY_SLOT)
        .map(|(&col, &v)| v.mul_real(vec[col as usize]))
        .sum()
}

fn spmv<T: EllValue>(mat: &EllMatrix<T>, vec: &[f32], result: &mut [f32]) {
    for (row, out) in result.iter_mut().enumerate() {
        *out = row_dot(mat, row, vec);
    }
}

impl Blas for CpuBlas {
    fn name(&self) -> &'static str {
        "cpu"
    }

    async fn s_axpy(
        &self,
        x: &[f32],
        y: &[f32],
        alpha: f32,
        result: &mut [f32],
    ) -> Result<(), EllCoreError> {
        check_same_len("s_axpy", &[x.len(), y.len(), result.len()])?;
        result.copy_from_slice(y);
        axpby(alpha, x, 1.0, result);
        Ok(())
    }

    async fn s_dot(&self, x: &[f32], y: &[f32]) -> Result<f32, EllCoreError> {
        check_same_len("s_dot", &[x.len(), y.len()])?;
        Ok(dot(x, y))
    }

    async fn s_spmv_ell(
        &self,
        mat: &EllMatrix<f32>,
        vec: &[f32],
        result: &mut [f32],
    ) -> Result<(), EllCoreError> {
        check_spmv_dims("s_spmv_ell", mat, vec.len(), result.len())?;
        spmv(mat, vec, result);
        Ok(())
    }

    async fn h_spmv_ell(
        &self,
        mat: &EllMatrix<i16>,
        vec: &[f32],
        result: &mut [f32],
    ) -> Result<(), EllCoreError> {
        check_spmv_dims("h_spmv_ell", mat, vec.len(), result.len())?;
        spmv(mat, vec, result);
        Ok(())
    }

    async fn s_sp_inner_product_ell(
        &self,
        mat: &EllMatrix<f32>,
        x: &[f32],
        y: &[f32],
    ) -> Result<f32, EllCoreError> {
        check_spmv_dims("s_sp_inner_product_ell", mat, y.len(), x.len())?;
        Ok(x
            .iter()
            .enumerate()
            .map(|(row, xi)| row_dot(mat, row, y) * xi)
            .sum())
    }

    async fn s_sp_conj_grad_ell(
        &self,
        mat: &EllMatrix<f32>,
        b: &[f32],
        x: &mut [f32],
        initial: Option<&[f32]>,
        params: &ConjugateGradient,
    ) -> Result<usize, EllCoreError> {
        validate_cg_inputs(mat, b, x, initial)?;
        let kernels = CpuCgKernels {
            matrix: mat,
            preconditioner: params.preconditioner.build(mat)?,
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
        validate_cg_inputs(mat, b, x, initial)?;
        warn_unsupported_preconditioner(params);
        let kernels = CpuCgKernels {
            matrix: mat,
            preconditioner: None,
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

/// Host vectors for the shared CG loop.
struct CpuCgKernels<'a, T: EllValue> {
    matrix: &'a EllMatrix<T>,
    preconditioner: Option<EllMatrix<f32>>,
}

impl<T: EllValue> CgKernels for CpuCgKernels<'_, T> {
    type Vector = Vec<f32>;

    fn vector(&self, _label: &str, data: &[f32]) -> Vec<f32> {
        data.to_vec()
    }

    fn zeros(&self, _label: &str) -> Vec<f32> {
        vec![0.0; self.matrix.num_rows()]
    }

    fn matvec(&self, x: &Vec<f32>, out: &mut Vec<f32>) -> Result<(), EllCoreError> {
        spmv(self.matrix, x, out);
        Ok(())
    }

    fn precondition(&self, r: &Vec<f32>, z: &mut Vec<f32>) -> Result<(), EllCoreError> {
        match &self.preconditioner {
            Some(inverse) => spmv(inverse, r, z),
            None => z.copy_from_slice(r),
        }
        Ok(())
    }

    fn axpby(
        &self,
        alpha: f32,
        x: &Vec<f32>,
        beta: f32,
        y: &mut Vec<f32>,
    ) -> Result<(), EllCoreError> {
        axpby(alpha, x, beta, y);
        Ok(())
    }

    fn copy(&self, src: &Vec<f32>, dst: &mut Vec<f32>) -> Result<(), EllCoreError> {
        dst.copy_from_slice(src);
        Ok(())
    }

    async fn dot(&self, x: &Vec<f32>, y: &Vec<f32>) -> Result<f32, EllCoreError> {
        Ok(dot(x, y))
    }

    async fn read(&self, v: &Vec<f32>) -> Result<Vec<f32>, EllCoreError> {
        Ok(v.clone())
    }
}
