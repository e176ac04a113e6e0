use crate::context::GpuContext;
use crate::error::EllCoreError;
use crate::traits::Vector;
use std::{mem, sync::Arc};

/// A dense `f32` vector resident on the GPU.
///
/// The backing buffer always holds at least one element so that empty
/// vectors can still be bound to a kernel.
#[derive(Debug)]
pub struct GpuVector {
    buffer: wgpu::Buffer,
    size: usize,
    label: String,
    pub(crate) context: Arc<GpuContext>,
}

impl GpuVector {
    pub(crate) fn usage() -> wgpu::BufferUsages {
        wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST
    }

    /// Buffer size in bytes for `size` elements.
    pub(crate) fn buffer_size(size: usize) -> u64 {
        (size.max(1) * mem::size_of::<f32>()) as u64
    }

    pub(crate) fn new_internal(
        buffer: wgpu::Buffer,
        size: usize,
        label: String,
        context: Arc<GpuContext>,
    ) -> Self {
        Self {
            buffer,
            size,
            label,
            context,
        }
    }

    pub(crate) fn inner(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Number of elements.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Size in bytes of the logical contents.
    pub fn size_bytes(&self) -> u64 {
        (self.size * mem::size_of::<f32>()) as u64
    }

    pub fn label(&self) -> &str {
        self.label.as_str()
    }

    /// Reads the vector back to the host. Blocks until pending GPU work completes.
    pub async fn read_contents(&self) -> Result<Vec<f32>, EllCoreError> {
        self.context
            .read_buffer_to_cpu(self.inner(), self.size())
            .await
    }

    /// Overwrites the vector with `data`, which must have exactly `size()` elements.
    pub fn write_contents(&self, data: &[f32]) -> Result<(), EllCoreError> {
        if data.len() != self.size {
            return Err(EllCoreError::InvalidDimensions(format!(
                "Data length ({}) does not match GpuVector size ({})",
                data.len(),
                self.size
            )));
        }
        self.context.write_buffer(self.inner(), data)
    }

    /// Copies the contents of `source` into this vector on the GPU.
    pub fn copy_from(&mut self, source: &GpuVector) -> Result<(), EllCoreError> {
        if self.size != source.size {
            return Err(EllCoreError::InvalidDimensions(format!(
                "Vector sizes for copy_from mismatch: {} != {}",
                self.size, source.size
            )));
        }
        if self.size == 0 {
            return Ok(());
        }
        let mut encoder = self.context.create_encoder("GpuVector Copy Encoder");
        encoder.copy_buffer_to_buffer(source.inner(), 0, self.inner(), 0, self.size_bytes());
        self.context.submit(encoder);
        Ok(())
    }
}

impl Vector for GpuVector {
    type Value = f32;

    fn len(&self) -> usize {
        self.size()
    }
}
