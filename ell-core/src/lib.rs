//! # ELL Core Library
//!
//! ELL (Ellpack) sparse matrices, 16-bit fixed-point quantization, and the
//! wgpu compute kernels behind the accelerated BLAS backend.

mod context;
pub mod device;
pub mod ell_matrix;
pub mod error;
pub mod gpu_matrix;
mod ops;
pub mod quantize;
pub mod traits;
pub mod vector;

pub use device::{GpuDevice, TransferStats};
pub use ell_matrix::{EllMatrix, EllValue, EMPTY_SLOT, SYMMETRY_TOLERANCE};
pub use error::EllCoreError;
pub use gpu_matrix::{EllFormat, EllMatrixGpu};
pub use quantize::{QuantizedEllMatrix, FIXED_POINT_SCALE};
pub use traits::{Matrix, Vector};
pub use vector::GpuVector;

/// Names of the compute kernels compiled into every [`GpuDevice`].
pub mod kernels {
    pub use crate::ops::{
        AXPBY, DOT_PARTIALS, INNER_PRODUCT_ELL, SPMV_ELL, SPMV_ELL_FIXED16, SUM_PARTIALS,
    };
}
