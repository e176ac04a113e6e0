//! `ell-solver`: BLAS primitives and a preconditioned Conjugate Gradient
//! solver over ELL sparse matrices, with a sequential CPU backend and a WGPU
//! compute backend.
//!
//! Both backends implement [`blas::Blas`]; [`CpuBlas`] doubles as the oracle
//! the [`validation`] harness checks [`GpuBlas`] against.

pub mod algorithms;
pub mod blas;
pub mod preconditioner;
pub mod validation;

pub use algorithms::{ConjugateGradient, ConjugateGradientMetadata, SolveAlgorithm, SolveResult};
pub use blas::{Blas, CpuBlas, GpuBlas};
pub use preconditioner::Preconditioner;

// Re-export from ell_core
pub use ell_core::{
    EllCoreError, EllMatrix, EllValue, GpuDevice, Matrix, QuantizedEllMatrix, TransferStats,
    Vector, EMPTY_SLOT, FIXED_POINT_SCALE,
};
