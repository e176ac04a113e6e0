use ell_core::{EllCoreError, EllMatrix};

/// Diagonal entries below this magnitude are clamped before inversion.
pub const MIN_DIAGONAL: f32 = 1e-6;

/// Preconditioners available to the Conjugate Gradient solver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Preconditioner {
    /// `M = I`; the preconditioned residual is the residual itself.
    #[default]
    None,
    /// `M = diag(A)`.
    Jacobi,
}

impl Preconditioner {
    /// Builds `M^-1` as a sparse matrix so it can be applied with the same SpMV
    /// kernel as the system matrix. `None` means identity.
    pub fn build(&self, mat: &EllMatrix<f32>) -> Result<Option<EllMatrix<f32>>, EllCoreError> {
        match self {
            Preconditioner::None => Ok(None),
            Preconditioner::Jacobi => {
                let diagonal = mat.diagonal();
                let mut inverse = EllMatrix::new(diagonal.len(), diagonal.len(), 1);
                for (i, d) in diagonal.into_iter().enumerate() {
                    inverse.set_value_by_index(i, i, 0, 1.0 / d.max(MIN_DIAGONAL))?;
                }
                log::debug!("Built Jacobi preconditioner for {} rows", mat.num_rows());
                Ok(Some(inverse))
            }
        }
    }
}
