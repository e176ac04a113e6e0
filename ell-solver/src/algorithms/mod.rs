use crate::blas::Blas;
use crate::preconditioner::Preconditioner;
use ell_core::{EllCoreError, Matrix};
use num_traits::Float;

pub mod conjugate_gradient;

pub use conjugate_gradient::ConjugateGradientMetadata;

pub struct SolveResult<V: Float, M> {
    pub x: Vec<V>,   // Solution vector
    pub metadata: M, // Metadata about the solve process
}

// --- Algorithm Trait Definition ---
/// Trait representing a specific linear system solving algorithm.
/// Generic over the BLAS backend (CPU/GPU) and the matrix type it supports.
pub trait SolveAlgorithm<B: Blas, M: Matrix> {
    /// The numeric type of the right-hand side and the solution.
    type Value: Float + Copy + std::fmt::Debug + Default + bytemuck::Pod;
    type Metadata: std::fmt::Debug;

    /// Solves the linear system Ax = b for x.
    ///
    /// # Arguments
    ///
    /// * `blas` - The backend executing the primitives.
    /// * `a` - The coefficient matrix A.
    /// * `b` - The right-hand side vector b.
    fn solve(
        &self,
        blas: &B,
        a: &M,
        b: &[Self::Value],
    ) -> impl std::future::Future<
        Output = Result<SolveResult<Self::Value, Self::Metadata>, EllCoreError>,
    >;

    fn validate_inputs(&self, a: &M, b: &[Self::Value]) -> Result<(), EllCoreError> {
        let (rows, cols) = a.dims();
        if !a.is_square() {
            return Err(EllCoreError::InvalidDimensions(format!(
                "Matrix A must be square (dims: {}x{})",
                rows, cols
            )));
        }
        if rows != b.len() {
            return Err(EllCoreError::InvalidDimensions(format!(
                "Matrix A rows ({}) must match RHS vector b length ({})",
                rows,
                b.len()
            )));
        }
        Ok(())
    }
}

// --- Algorithm Struct Definitions ---

/// Preconditioned Conjugate Gradient.
#[derive(Debug, Clone)]
pub struct ConjugateGradient {
    /// Stop once `sqrt(r . z)` drops below this value.
    pub threshold: f32,
    pub max_iterations: usize,
    /// Ignored by the fixed-point variant.
    pub preconditioner: Preconditioner,
}

impl Default for ConjugateGradient {
    fn default() -> Self {
        Self {
            threshold: 1e-6,
            max_iterations: 1000,
            preconditioner: Preconditioner::None,
        }
    }
}

impl ConjugateGradient {
    /// Creates a new instance of the Conjugate Gradient algorithm with default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new instance of the Conjugate Gradient algorithm with specified parameters.
    pub fn with_params(
        threshold: f32,
        max_iterations: usize,
        preconditioner: Preconditioner,
    ) -> Self {
        Self {
            threshold,
            max_iterations,
            preconditioner,
        }
    }
}
