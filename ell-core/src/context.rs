use crate::error::EllCoreError;
use crate::ops::KERNEL_SOURCES;
use bytemuck::{Pod, Zeroable};
use cfg_if::cfg_if;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use wgpu::{util::DeviceExt, PollType};

/// Device, queue and compiled kernel set, plus host/device transfer counters.
/// Internal to ell-core; shared through `Arc` by `GpuDevice` and the resources it creates.
#[derive(Debug)]
pub(crate) struct GpuContext {
    pub(crate) device: wgpu::Device,
    pub(crate) queue: wgpu::Queue,
    /// Compute pipelines by kernel name, compiled once at initialization.
    kernels: HashMap<&'static str, wgpu::ComputePipeline>,
    /// Bytes uploaded through the instrumented helpers.
    bytes_to_gpu: AtomicU64,
    /// Bytes read back through the instrumented helpers.
    bytes_from_gpu: AtomicU64,
}

impl GpuContext {
    /// Acquires an adapter, device and queue, then compiles every kernel.
    pub(crate) async fn new() -> Result<Self, EllCoreError> {
        log::info!("Initializing native WGPU context");

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        log::debug!("Requesting native adapter");
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|_| {
                EllCoreError::WgpuInitError("No suitable native adapter found".to_string())
            })?;

        log::info!("Selected Native Adapter: {:?}", adapter.get_info());

        let mut limits = wgpu::Limits::default().using_resolution(adapter.limits());
        // The fused inner product binds five storage buffers.
        limits.max_storage_buffers_per_shader_stage =
            limits.max_storage_buffers_per_shader_stage.max(5);
        log::debug!("Adjusted limits: {:?}", limits);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("ell_core device"),
                trace: wgpu::Trace::Off,
                memory_hints: wgpu::MemoryHints::Performance,
                required_features: wgpu::Features::empty(),
                required_limits: limits,
            })
            .await
            .map_err(|e| EllCoreError::WgpuInitError(format!("Failed to request device: {}", e)))?;

        log::info!("Device and queue obtained successfully");

        let kernels = Self::compile_kernels(&device).await?;
        log::info!("Compiled {} compute kernels", kernels.len());

        Ok(Self {
            device,
            queue,
            kernels,
            bytes_to_gpu: AtomicU64::new(0),
            bytes_from_gpu: AtomicU64::new(0),
        })
    }

    async fn compile_kernels(
        device: &wgpu::Device,
    ) -> Result<HashMap<&'static str, wgpu::ComputePipeline>, EllCoreError> {
        let mut kernels = HashMap::with_capacity(KERNEL_SOURCES.len());
        for &(name, source) in KERNEL_SOURCES {
            log::debug!("Compiling kernel '{}'", name);
            device.push_error_scope(wgpu::ErrorFilter::Validation);
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(name),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(name),
                layout: None,
                module: &module,
                entry_point: Some("main"),
                cache: None,
                compilation_options: Default::default(),
            });
            if let Some(error) = device.pop_error_scope().await {
                log::error!("Kernel '{}' failed to compile: {}", name, error);
                return Err(EllCoreError::ShaderError(format!("{}: {}", name, error)));
            }
            kernels.insert(name, pipeline);
        }
        Ok(kernels)
    }

    /// Looks up a compiled kernel by name.
    pub(crate) fn kernel(&self, name: &str) -> Result<&wgpu::ComputePipeline, EllCoreError> {
        self.kernels.get(name).ok_or_else(|| {
            log::error!("No kernel '{}' found", name);
            EllCoreError::KernelNotFound(name.to_string())
        })
    }

    pub(crate) fn has_kernel(&self, name: &str) -> bool {
        self.kernels.contains_key(name)
    }

    /// Records one dispatch of kernel `name` into `encoder`.
    /// `bindings[i]` is bound to `@binding(i)` of group 0.
    pub(crate) fn encode_dispatch(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        name: &str,
        bindings: &[&wgpu::Buffer],
        workgroups: u32,
    ) -> Result<(), EllCoreError> {
        let pipeline = self.kernel(name)?;
        let layout = pipeline.get_bind_group_layout(0);
        let entries: Vec<wgpu::BindGroupEntry> = bindings
            .iter()
            .enumerate()
            .map(|(binding, buffer)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(name),
            layout: &layout,
            entries: &entries,
        });

        log::trace!("Dispatching '{}' with {} workgroups", name, workgroups);
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(name),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(workgroups, 1, 1);
        Ok(())
    }

    pub(crate) fn create_encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    pub(crate) fn submit(&self, encoder: wgpu::CommandEncoder) {
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    /// Creates a buffer holding `contents` and counts the upload.
    pub(crate) fn create_gpu_buffer_with_data(
        &self,
        label: &str,
        contents: &[u8],
        usage: wgpu::BufferUsages,
    ) -> wgpu::Buffer {
        let byte_len = contents.len() as u64;
        log::debug!("Creating GPU buffer '{}' with {} bytes", label, byte_len);
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage,
            });
        self.bytes_to_gpu.fetch_add(byte_len, Ordering::Relaxed);
        buffer
    }

    /// Creates a uniform buffer from a parameter block.
    pub(crate) fn create_uniform<P: Pod>(&self, label: &str, params: &P) -> wgpu::Buffer {
        self.create_gpu_buffer_with_data(
            label,
            bytemuck::bytes_of(params),
            wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        )
    }

    /// Writes `data` into the start of an existing buffer and counts the upload.
    pub(crate) fn write_buffer<T: Pod>(
        &self,
        buffer: &wgpu::Buffer,
        data: &[T],
    ) -> Result<(), EllCoreError> {
        let byte_len = std::mem::size_of_val(data) as u64;
        if byte_len == 0 {
            return Ok(());
        }
        if buffer.size() < byte_len {
            return Err(EllCoreError::Internal(format!(
                "Target buffer size ({}) is smaller than data size ({})",
                buffer.size(),
                byte_len
            )));
        }
        if !buffer.usage().contains(wgpu::BufferUsages::COPY_DST) {
            return Err(EllCoreError::Internal(
                "Target buffer must have COPY_DST usage".to_string(),
            ));
        }
        log::debug!("Writing {} bytes to buffer", byte_len);
        self.queue.write_buffer(buffer, 0, bytemuck::cast_slice(data));
        self.bytes_to_gpu.fetch_add(byte_len, Ordering::Relaxed);
        Ok(())
    }

    /// Creates a zero-initialized buffer. Not counted as a transfer.
    pub(crate) fn create_empty_buffer(
        &self,
        label: &str,
        size: u64,
        usage: wgpu::BufferUsages,
    ) -> wgpu::Buffer {
        log::debug!("Creating empty GPU buffer '{}' of size {}", label, size);
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        })
    }

    /// Copies the first `element_count` elements of `buffer` back to the host,
    /// blocking until every previously submitted command has finished.
    pub(crate) async fn read_buffer_to_cpu<T: Pod + Zeroable>(
        &self,
        buffer: &wgpu::Buffer,
        element_count: usize,
    ) -> Result<Vec<T>, EllCoreError> {
        let size_bytes = (element_count * std::mem::size_of::<T>()) as u64;
        if size_bytes == 0 {
            return Ok(Vec::new());
        }
        if buffer.size() < size_bytes {
            return Err(EllCoreError::Internal(format!(
                "GPU buffer size ({}) is smaller than requested read ({})",
                buffer.size(),
                size_bytes
            )));
        }

        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging_buffer_for_readback"),
            size: size_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self.create_encoder("read_buffer_encoder");
        encoder.copy_buffer_to_buffer(buffer, 0, &staging_buffer, 0, size_bytes);
        self.submit(encoder);

        let buffer_slice = staging_buffer.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            if let Err(e) = sender.send(result) {
                log::error!("Failed to send map result back: {:?}", e);
            }
        });

        self.bytes_from_gpu.fetch_add(size_bytes, Ordering::Relaxed);

        cfg_if! {
            if #[cfg(not(target_arch = "wasm32"))] {
                self.device
                    .poll(PollType::Wait)
                    .map_err(|e| EllCoreError::WgpuError(format!("Device poll failed: {}", e)))?;
            }
        }

        match receiver.await {
            Ok(Ok(())) => {
                let result = {
                    let data = buffer_slice.get_mapped_range();
                    bytemuck::cast_slice::<u8, T>(&data).to_vec()
                };
                staging_buffer.unmap();
                log::trace!("Buffer readback complete ({} bytes)", size_bytes);
                Ok(result)
            }
            Ok(Err(e)) => {
                log::error!("Failed to map buffer: {:?}", e);
                Err(EllCoreError::WgpuError(format!(
                    "Buffer mapping failed: {}",
                    e
                )))
            }
            Err(_) => Err(EllCoreError::Internal(
                "Channel receive error during buffer mapping".to_string(),
            )),
        }
    }

    pub(crate) fn get_transfer_stats(&self) -> (u64, u64) {
        (
            self.bytes_to_gpu.load(Ordering::Relaxed),
            self.bytes_from_gpu.load(Ordering::Relaxed),
        )
    }

    pub(crate) fn reset_transfer_stats(&self) {
        self.bytes_to_gpu.store(0, Ordering::Relaxed);
        self.bytes_from_gpu.store(0, Ordering::Relaxed);
        log::info!("GPU transfer counters reset.");
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        let (up, down) = self.get_transfer_stats();
        log::info!(
            "Releasing WGPU context ({} bytes uploaded, {} bytes read back)",
            up,
            down
        );
    }
}
