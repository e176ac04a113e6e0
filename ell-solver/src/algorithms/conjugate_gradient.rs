use crate::blas::Blas;
use ell_core::{EllCoreError, EllMatrix, EllValue};
use log::{debug, error, info, warn};
use std::future::Future;

use super::{ConjugateGradient, SolveAlgorithm, SolveResult};

#[derive(Debug, Clone, Copy)]
pub struct ConjugateGradientMetadata {
    /// Iterations performed; equals `max_iterations` when the budget ran out.
    pub iterations: usize,
    /// `||A x - b||` of the returned solution.
    pub residual_norm: f32,
}

/// Vector workspace a backend provides to the shared CG loop.
///
/// `matvec` applies the system matrix and `precondition` applies `M^-1`
/// (a copy when there is no preconditioner). Only `dot` and `read` block
/// on the device.
pub(crate) trait CgKernels {
    type Vector;

    fn vector(&self, label: &str, data: &[f32]) -> Self::Vector;
    fn zeros(&self, label: &str) -> Self::Vector;
    fn matvec(&self, x: &Self::Vector, out: &mut Self::Vector) -> Result<(), EllCoreError>;
    fn precondition(&self, r: &Self::Vector, z: &mut Self::Vector) -> Result<(), EllCoreError>;
    /// `y = alpha * x + beta * y`
    fn axpby(
        &self,
        alpha: f32,
        x: &Self::Vector,
        beta: f32,
        y: &mut Self::Vector,
    ) -> Result<(), EllCoreError>;
    fn copy(&self, src: &Self::Vector, dst: &mut Self::Vector) -> Result<(), EllCoreError>;
    fn dot(
        &self,
        x: &Self::Vector,
        y: &Self::Vector,
    ) -> impl Future<Output = Result<f32, EllCoreError>>;
    fn read(&self, v: &Self::Vector) -> impl Future<Output = Result<Vec<f32>, EllCoreError>>;
}

/// Checks the CG preconditions shared by every backend: square symmetric
/// matrix, consistent vector lengths.
pub(crate) fn validate_cg_inputs<T: EllValue>(
    mat: &EllMatrix<T>,
    b: &[f32],
    x: &[f32],
    initial: Option<&[f32]>,
) -> Result<(), EllCoreError> {
    if !mat.is_square() {
        return Err(EllCoreError::InvalidDimensions(format!(
            "CG requires a square matrix (dims: {}x{})",
            mat.num_rows(),
            mat.num_cols()
        )));
    }
    if !mat.is_symmetric() {
        error!("Matrix is not symmetric, refusing to run CG");
        return Err(EllCoreError::NonSymmetricMatrix);
    }
    let n = mat.num_rows();
    let lengths = [
        ("b", Some(b.len())),
        ("x", Some(x.len())),
        ("initial", initial.map(|v| v.len())),
    ];
    for (name, len) in lengths {
        if let Some(len) = len {
            if len != n {
                return Err(EllCoreError::InvalidDimensions(format!(
                    "CG vector {} has {} elements, matrix has {} rows",
                    name, len, n
                )));
            }
        }
    }
    Ok(())
}

/// Preconditioned Conjugate Gradient on top of a backend workspace.
///
/// Writes the solution into `x_out` and returns the iteration count together
/// with the final `sqrt(r . z)`.
pub(crate) async fn run_conjugate_gradient<K: CgKernels>(
    kernels: &K,
    b: &[f32],
    initial: Option<&[f32]>,
    threshold: f32,
    max_iterations: usize,
    x_out: &mut [f32],
) -> Result<(usize, f32), EllCoreError> {
    let mut x = match initial {
        Some(x0) => kernels.vector("x (solution)", x0),
        None => kernels.zeros("x (solution)"),
    };
    let mut r = kernels.vector("r (residual)", b);
    let mut q = kernels.zeros("q (A*p)");
    let mut z = kernels.zeros("z (preconditioned residual)");
    let mut p = kernels.zeros("p (direction)");

    // r = b - A*x
    if initial.is_some() {
        kernels.matvec(&x, &mut q)?;
        kernels.axpby(-1.0, &q, 1.0, &mut r)?;
    }
    kernels.precondition(&r, &mut z)?;
    kernels.copy(&z, &mut p)?;

    let mut rho = kernels.dot(&r, &z).await?;
    debug!("Initial residual estimate: {}", rho.sqrt());

    let mut iterations = 0;
    // A zero residual is exact even for a zero threshold; iterating would divide 0 by 0.
    let mut converged = rho == 0.0 || rho.sqrt() < threshold;
    if converged {
        info!("Initial guess is already within threshold.");
    }
    while !converged && iterations < max_iterations {
        iterations += 1;
        let nom = rho;

        kernels.matvec(&p, &mut q)?;
        let alpha = nom / kernels.dot(&p, &q).await?;
        kernels.axpby(alpha, &p, 1.0, &mut x)?;
        kernels.axpby(-alpha, &q, 1.0, &mut r)?;
        kernels.precondition(&r, &mut z)?;

        rho = kernels.dot(&r, &z).await?;
        log::trace!("Iteration {}: residual estimate = {}", iterations, rho.sqrt());
        converged = rho == 0.0 || rho.sqrt() < threshold;
        if converged {
            break;
        }

        let beta = rho / nom;
        kernels.axpby(1.0, &z, beta, &mut p)?;
    }
    if converged {
        debug!("CG converged after {} iterations", iterations);
    } else {
        warn!(
            "CG reached maximum iterations ({}) without reaching threshold {}",
            max_iterations, threshold
        );
    }

    let solution = kernels.read(&x).await?;
    x_out.copy_from_slice(&solution);
    Ok((iterations, rho.sqrt()))
}

async fn residual_norm<B: Blas>(
    blas: &B,
    ax: &[f32],
    b: &[f32],
) -> Result<f32, EllCoreError> {
    let mut diff = vec![0.0; b.len()];
    blas.s_axpy(b, ax, -1.0, &mut diff).await?;
    blas.s_nrm2(&diff).await
}

impl<B: Blas> SolveAlgorithm<B, EllMatrix<f32>> for ConjugateGradient {
    type Value = f32;
    type Metadata = ConjugateGradientMetadata;

    async fn solve(
        &self,
        blas: &B,
        a: &EllMatrix<f32>,
        b: &[f32],
    ) -> Result<SolveResult<Self::Value, Self::Metadata>, EllCoreError> {
        <Self as SolveAlgorithm<B, EllMatrix<f32>>>::validate_inputs(self, a, b)?;
        let mut x = vec![0.0; b.len()];
        let iterations = blas.s_sp_conj_grad_ell(a, b, &mut x, None, self).await?;

        let mut ax = vec![0.0; b.len()];
        blas.s_spmv_ell(a, &x, &mut ax).await?;
        let residual_norm = residual_norm(blas, &ax, b).await?;
        info!(
            "CG ({}) finished: {} iterations, residual norm {}",
            blas.name(),
            iterations,
            residual_norm
        );

        Ok(SolveResult {
            x,
            metadata: ConjugateGradientMetadata {
                iterations,
                residual_norm,
            },
        })
    }
}

impl<B: Blas> SolveAlgorithm<B, EllMatrix<i16>> for ConjugateGradient {
    type Value = f32;
    type Metadata = ConjugateGradientMetadata;

    /// Solves against the fixed-point matrix as stored, i.e. `A = q / FIXED_POINT_SCALE`.
    async fn solve(
        &self,
        blas: &B,
        a: &EllMatrix<i16>,
        b: &[f32],
    ) -> Result<SolveResult<Self::Value, Self::Metadata>, EllCoreError> {
        <Self as SolveAlgorithm<B, EllMatrix<i16>>>::validate_inputs(self, a, b)?;
        let mut x = vec![0.0; b.len()];
        let iterations = blas.h_sp_conj_grad_ell(a, b, &mut x, None, self).await?;

        let mut ax = vec![0.0; b.len()];
        blas.h_spmv_ell(a, &x, &mut ax).await?;
        let residual_norm = residual_norm(blas, &ax, b).await?;
        info!(
            "Fixed-point CG ({}) finished: {} iterations, residual norm {}",
            blas.name(),
            iterations,
            residual_norm
        );

        Ok(SolveResult {
            x,
            metadata: ConjugateGradientMetadata {
                iterations,
                residual_norm,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_non_symmetric() {
        let mat = EllMatrix::from_entries(2, 2, 2, &[(0, 0, 1.0f32), (0, 1, 2.0), (1, 1, 1.0)])
            .unwrap();
        let result = validate_cg_inputs(&mat, &[1.0, 1.0], &[0.0, 0.0], None);
        assert!(matches!(result, Err(EllCoreError::NonSymmetricMatrix)));
    }

    #[test]
    fn test_validate_rejects_wrong_lengths() {
        let mat = EllMatrix::from_entries(2, 2, 1, &[(0, 0, 1.0f32), (1, 1, 1.0)]).unwrap();
        assert!(validate_cg_inputs(&mat, &[1.0], &[0.0, 0.0], None).is_err());
        assert!(validate_cg_inputs(&mat, &[1.0, 1.0], &[0.0, 0.0], Some(&[0.0])).is_err());
        assert!(validate_cg_inputs(&mat, &[1.0, 1.0], &[0.0, 0.0], None).is_ok());
    }
}
