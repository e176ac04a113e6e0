use crate::context::GpuContext;
use crate::traits::Matrix;
use std::sync::Arc;

/// Element encoding of a device-resident ELL matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EllFormat {
    /// `f32` values.
    Float,
    /// `i16` fixed-point values, packed two per 32-bit word.
    Fixed16,
}

/// An ELL matrix uploaded to the GPU: value and column-index buffers with the
/// same row-major slot layout as the host `EllMatrix`.
#[derive(Debug)]
pub struct EllMatrixGpu {
    rows: usize,
    cols: usize,
    num_cols_per_row: usize,
    format: EllFormat,
    values_buffer: wgpu::Buffer,
    indices_buffer: wgpu::Buffer,
    // Keeps the device alive as long as the buffers.
    #[allow(dead_code)]
    context: Arc<GpuContext>,
}

impl EllMatrixGpu {
    pub(crate) fn new_internal(
        dims: (usize, usize),
        num_cols_per_row: usize,
        format: EllFormat,
        values_buffer: wgpu::Buffer,
        indices_buffer: wgpu::Buffer,
        context: Arc<GpuContext>,
    ) -> Self {
        Self {
            rows: dims.0,
            cols: dims.1,
            num_cols_per_row,
            format,
            values_buffer,
            indices_buffer,
            context,
        }
    }

    pub fn num_cols_per_row(&self) -> usize {
        self.num_cols_per_row
    }

    pub fn format(&self) -> EllFormat {
        self.format
    }

    pub(crate) fn values_buffer(&self) -> &wgpu::Buffer {
        &self.values_buffer
    }

    pub(crate) fn indices_buffer(&self) -> &wgpu::Buffer {
        &self.indices_buffer
    }
}

impl Matrix for EllMatrixGpu {
    // Raw 32-bit words; fixed-point matrices pack two values per word.
    type Value = u32;

    fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }
}
