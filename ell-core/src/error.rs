use thiserror::Error;

#[derive(Error, Debug)]
pub enum EllCoreError {
    #[error("WGPU initialization failed: {0}")]
    WgpuInitError(String),

    #[error("WGPU error: {0}")]
    WgpuError(String),

    #[error("Shader compilation error: {0}")]
    ShaderError(String),

    #[error("No kernel '{0}' found")]
    KernelNotFound(String),

    #[error("Compute backend is not initialized")]
    NotInitialized,

    #[error("Invalid matrix dimensions: {0}")]
    InvalidDimensions(String),

    #[error("Row {row} has no free slot for column {col} (capacity {capacity})")]
    CapacityExceeded {
        row: usize,
        col: usize,
        capacity: usize,
    },

    #[error("Matrix is not symmetric")]
    NonSymmetricMatrix,

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
