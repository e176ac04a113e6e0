// Kernel table and the encode/submit logic behind the GpuDevice operations.

use crate::{
    context::GpuContext,
    error::EllCoreError,
    gpu_matrix::{EllFormat, EllMatrixGpu},
    traits::{Matrix, Vector},
    vector::GpuVector,
};
use bytemuck::{Pod, Zeroable};
use std::mem;

pub const AXPBY: &str = "axpby";
pub const DOT_PARTIALS: &str = "dot_partials";
pub const SUM_PARTIALS: &str = "sum_partials";
pub const SPMV_ELL: &str = "spmv_ell";
pub const SPMV_ELL_FIXED16: &str = "spmv_ell_fixed16";
pub const INNER_PRODUCT_ELL: &str = "inner_product_ell";

/// Every kernel compiled into a context at initialization.
pub(crate) const KERNEL_SOURCES: &[(&str, &str)] = &[
    (AXPBY, include_str!("./shaders/axpby.wgsl")),
    (DOT_PARTIALS, include_str!("./shaders/dot_partials.wgsl")),
    (SUM_PARTIALS, include_str!("./shaders/sum_partials.wgsl")),
    (SPMV_ELL, include_str!("./shaders/spmv_ell.wgsl")),
    (SPMV_ELL_FIXED16, include_str!("./shaders/spmv_ell_fixed16.wgsl")),
    (INNER_PRODUCT_ELL, include_str!("./shaders/inner_product_ell.wgsl")),
];

/// Must match `@workgroup_size` in the shaders.
pub(crate) const WORKGROUP_SIZE: usize = 256;

/// Upper bound on dispatched workgroups; kernels cover larger inputs with grid-stride loops.
pub(crate) const MAX_WORKGROUPS: usize = 1024;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct AxpbyParams {
    alpha: f32,
    beta: f32,
    size: u32,
    _padding: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ReduceParams {
    size: u32,
    _padding: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct EllParams {
    num_rows: u32,
    cols_per_row: u32,
    _padding: [u32; 2],
}

pub(crate) fn workgroups_for(items: usize) -> u32 {
    items.div_ceil(WORKGROUP_SIZE).clamp(1, MAX_WORKGROUPS) as u32
}

fn check_len(what: &str, actual: usize, expected: usize) -> Result<(), EllCoreError> {
    if actual != expected {
        return Err(EllCoreError::InvalidDimensions(format!(
            "{}: expected {} elements, got {}",
            what, expected, actual
        )));
    }
    Ok(())
}

/// Partial-sum and result buffers of a two-pass reduction.
struct Reduction {
    partials: wgpu::Buffer,
    result: wgpu::Buffer,
    groups: u32,
}

impl Reduction {
    fn new(context: &GpuContext, groups: u32) -> Self {
        let usage = wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_SRC
            | wgpu::BufferUsages::COPY_DST;
        Self {
            partials: context.create_empty_buffer(
                "Reduction Partials Buffer",
                groups as u64 * mem::size_of::<f32>() as u64,
                usage,
            ),
            result: context.create_empty_buffer(
                "Reduction Result Buffer",
                mem::size_of::<f32>() as u64,
                usage,
            ),
            groups,
        }
    }

    /// Zeroes both buffers ahead of the first pass, in the same command stream.
    fn encode_clear(&self, encoder: &mut wgpu::CommandEncoder) {
        encoder.clear_buffer(&self.partials, 0, None);
        encoder.clear_buffer(&self.result, 0, None);
    }

    fn encode_sum(
        &self,
        context: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
    ) -> Result<(), EllCoreError> {
        let params = context.create_uniform(
            "Sum Partials Params Buffer",
            &ReduceParams {
                size: self.groups,
                _padding: [0; 3],
            },
        );
        context.encode_dispatch(
            encoder,
            SUM_PARTIALS,
            &[&params, &self.partials, &self.result],
            1,
        )
    }

    async fn read(&self, context: &GpuContext) -> Result<f32, EllCoreError> {
        let values = context.read_buffer_to_cpu::<f32>(&self.result, 1).await?;
        values
            .first()
            .copied()
            .ok_or_else(|| EllCoreError::Internal("Empty reduction readback".to_string()))
    }
}

/// y = alpha * x + beta * y
pub(crate) fn internal_axpby(
    context: &GpuContext,
    alpha: f32,
    x: &GpuVector,
    beta: f32,
    y: &mut GpuVector,
) -> Result<(), EllCoreError> {
    check_len("axpby operand y", y.len(), x.len())?;
    if x.is_empty() {
        return Ok(());
    }
    let params = context.create_uniform(
        "AXPBY Params Buffer",
        &AxpbyParams {
            alpha,
            beta,
            size: x.len() as u32,
            _padding: 0,
        },
    );
    let mut encoder = context.create_encoder("AXPBY Encoder");
    context.encode_dispatch(
        &mut encoder,
        AXPBY,
        &[&params, x.inner(), y.inner()],
        workgroups_for(x.len()),
    )?;
    context.submit(encoder);
    Ok(())
}

/// x^T y
pub(crate) async fn internal_dot(
    context: &GpuContext,
    x: &GpuVector,
    y: &GpuVector,
) -> Result<f32, EllCoreError> {
    check_len("dot operand y", y.len(), x.len())?;
    let groups = workgroups_for(x.len());
    let reduction = Reduction::new(context, groups);
    let params = context.create_uniform(
        "Dot Partials Params Buffer",
        &ReduceParams {
            size: x.len() as u32,
            _padding: [0; 3],
        },
    );

    let mut encoder = context.create_encoder("Dot Product Encoder");
    reduction.encode_clear(&mut encoder);
    context.encode_dispatch(
        &mut encoder,
        DOT_PARTIALS,
        &[&params, x.inner(), y.inner(), &reduction.partials],
        groups,
    )?;
    reduction.encode_sum(context, &mut encoder)?;
    context.submit(encoder);

    reduction.read(context).await
}

fn ell_params(context: &GpuContext, matrix: &EllMatrixGpu) -> wgpu::Buffer {
    context.create_uniform(
        "ELL Params Buffer",
        &EllParams {
            num_rows: matrix.rows() as u32,
            cols_per_row: matrix.num_cols_per_row() as u32,
            _padding: [0; 2],
        },
    )
}

/// result = matrix * x, dispatching the kernel matching the matrix storage format.
pub(crate) fn internal_spmv(
    context: &GpuContext,
    matrix: &EllMatrixGpu,
    x: &GpuVector,
    result: &mut GpuVector,
) -> Result<(), EllCoreError> {
    check_len("spmv input", x.len(), matrix.cols())?;
    check_len("spmv result", result.len(), matrix.rows())?;
    if matrix.rows() == 0 {
        return Ok(());
    }
    let kernel = match matrix.format() {
        EllFormat::Float => SPMV_ELL,
        EllFormat::Fixed16 => SPMV_ELL_FIXED16,
    };
    let params = ell_params(context, matrix);
    let mut encoder = context.create_encoder("SpMV ELL Encoder");
    context.encode_dispatch(
        &mut encoder,
        kernel,
        &[
            &params,
            matrix.values_buffer(),
            matrix.indices_buffer(),
            x.inner(),
            result.inner(),
        ],
        workgroups_for(matrix.rows()),
    )?;
    context.submit(encoder);
    Ok(())
}

/// x^T (matrix * y) without materializing the product.
pub(crate) async fn internal_inner_product(
    context: &GpuContext,
    matrix: &EllMatrixGpu,
    x: &GpuVector,
    y: &GpuVector,
) -> Result<f32, EllCoreError> {
    if matrix.format() != EllFormat::Float {
        return Err(EllCoreError::UnsupportedOperation(
            "Inner product requires a float ELL matrix".to_string(),
        ));
    }
    check_len("inner product x", x.len(), matrix.rows())?;
    check_len("inner product y", y.len(), matrix.cols())?;

    let groups = workgroups_for(matrix.rows());
    let reduction = Reduction::new(context, groups);
    let params = ell_params(context, matrix);

    let mut encoder = context.create_encoder("Inner Product ELL Encoder");
    reduction.encode_clear(&mut encoder);
    context.encode_dispatch(
        &mut encoder,
        INNER_PRODUCT_ELL,
        &[
            &params,
            matrix.values_buffer(),
            matrix.indices_buffer(),
            x.inner(),
            y.inner(),
            &reduction.partials,
        ],
        groups,
    )?;
    reduction.encode_sum(context, &mut encoder)?;
    context.submit(encoder);

    reduction.read(context).await
}
