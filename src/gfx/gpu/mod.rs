mod convert;
mod encoder;

use std::collections::{
  HashMap,
  HashSet,
};
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::error::HalaRendererError;
use crate::gfx::command::HalaCommandBuffer;
use crate::gfx::device::HalaDevice;
use crate::gfx::kernel::{
  HalaBindingDesc,
  HalaComputeKernel,
  HalaDrawKind,
  HalaGraphicsKernel,
};
use crate::gfx::resource::{
  HalaBufferDesc,
  HalaBufferHandle,
  HalaDepthState,
  HalaDeviceCapabilities,
  HalaImageDesc,
  HalaImageHandle,
  HalaImageViewDesc,
  HalaImageViewHandle,
  HalaPipelineHandle,
};

pub use convert::{
  buffer_allocation_size,
  HALA_GPU_INDEXED_RECORD_SIZE,
  HALA_GPU_MIN_BUFFER_SIZE,
};

const REPACK_BINDINGS: [HalaBindingDesc; 3] = [
  HalaBindingDesc::storage_buffer(0, "source", false),
  HalaBindingDesc::storage_buffer(1, "counts", false),
  HalaBindingDesc::storage_buffer(2, "destination", true),
];

/// The constants of the indirect repack pass, in words.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
struct HalaRepackData {
  source_offset: u32,
  source_stride: u32,
  count_offset: u32,
  max_draw_count: u32,
}

struct HalaGpuBuffer {
  desc: HalaBufferDesc,
  buffer: wgpu::Buffer,
}

struct HalaGpuImage {
  desc: HalaImageDesc,
  texture: wgpu::Texture,
  view_count: usize,
}

struct HalaGpuImageView {
  desc: HalaImageViewDesc,
  view: wgpu::TextureView,
}

enum HalaGpuPipelineKind {
  Compute(wgpu::ComputePipeline),
  Graphics(wgpu::RenderPipeline),
}

struct HalaGpuPipeline {
  name: String,
  bindings: Vec<HalaBindingDesc>,
  push_constant_size: usize,
  /// Group 0 holds the bindings, group 1 the push constant uniform if there is one.
  layouts: Vec<wgpu::BindGroupLayout>,
  kind: HalaGpuPipelineKind,
}

/// The work counters of the GPU device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HalaGpuDeviceStatistics {
  pub submits: u64,
  pub dispatches: u64,
  pub indirect_draws: u64,
}

/// A device backed by wgpu.
///
/// Kernels run their WGSL source, push constants become a small uniform buffer per
/// dispatch or draw, and count-indirect draws map to `multi_draw_indexed_indirect_count`.
/// wgpu tracks resource usage itself, so recorded barriers only order the recording.
pub struct HalaGpuDevice {
  pub name: String,
  pub adapter_info: wgpu::AdapterInfo,
  device: wgpu::Device,
  queue: wgpu::Queue,
  capabilities: HalaDeviceCapabilities,
  next_handle: u64,
  buffers: HashMap<u64, HalaGpuBuffer>,
  images: HashMap<u64, HalaGpuImage>,
  image_views: HashMap<u64, HalaGpuImageView>,
  pipelines: HashMap<u64, HalaGpuPipeline>,
  released: HashSet<u64>,
  repack: HalaGpuPipeline,
  statistics: HalaGpuDeviceStatistics,
}

/// The Drop implementation of the GPU device.
impl Drop for HalaGpuDevice {

  fn drop(&mut self) {
    let alive = self.buffers.len() + self.images.len() + self.image_views.len();
    if alive > 0 {
      log::warn!("The HalaGpuDevice \"{}\" is dropped with {} live resources.", self.name, alive);
    }
    log::debug!("A HalaGpuDevice \"{}\" is dropped.", self.name);
  }

}

/// The implementation of the GPU device.
impl HalaGpuDevice {

  /// Create a GPU device on the first high performance adapter.
  /// param name: The name of the device.
  /// return: The device, an error if no adapter is available.
  pub fn new(name: &str) -> Result<Self, HalaRendererError> {
    pollster::block_on(Self::new_async(name))
  }

  async fn new_async(name: &str) -> Result<Self, HalaRendererError> {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
      backends: wgpu::Backends::PRIMARY,
      ..Default::default()
    });
    let adapter = instance
      .request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        force_fallback_adapter: false,
        compatible_surface: None,
      })
      .await
      .ok_or(HalaRendererError::new("No GPU adapter is available.", None))?;
    let adapter_info = adapter.get_info();

    let wanted = wgpu::Features::MULTI_DRAW_INDIRECT
      | wgpu::Features::MULTI_DRAW_INDIRECT_COUNT
      | wgpu::Features::INDIRECT_FIRST_INSTANCE;
    let required_features = adapter.features() & wanted;
    let required_limits = adapter.limits();
    let (device, queue) = adapter
      .request_device(
        &wgpu::DeviceDescriptor {
          label: Some(name),
          required_features,
          required_limits: required_limits.clone(),
          memory_hints: wgpu::MemoryHints::Performance,
        },
        None,
      )
      .await
      .map_err(|err| HalaRendererError::new("Failed to create the GPU device.", Some(Box::new(err))))?;
    device.on_uncaptured_error(Box::new(|err| log::error!("Uncaptured GPU error: {}", err)));

    let capabilities = HalaDeviceCapabilities {
      draw_indirect_count: required_features
        .contains(wgpu::Features::MULTI_DRAW_INDIRECT_COUNT | wgpu::Features::INDIRECT_FIRST_INSTANCE),
      mesh_shader: false,
      max_compute_work_group_invocations: required_limits.max_compute_invocations_per_workgroup,
      max_image_dimension_2d: required_limits.max_texture_dimension_2d,
    };
    let repack = Self::build_compute_pipeline(
      &device,
      "indirect_repack",
      &REPACK_BINDINGS,
      std::mem::size_of::<HalaRepackData>(),
      include_str!("indirect_repack.wgsl"),
    );

    log::debug!(
      "A HalaGpuDevice \"{}\" is created on \"{}\" [{:?}], count-indirect draws: {}.",
      name, adapter_info.name, adapter_info.backend, capabilities.draw_indirect_count,
    );
    Ok(Self {
      name: name.to_string(),
      adapter_info,
      device,
      queue,
      capabilities,
      next_handle: 1,
      buffers: HashMap::new(),
      images: HashMap::new(),
      image_views: HashMap::new(),
      pipelines: HashMap::new(),
      released: HashSet::new(),
      repack,
      statistics: HalaGpuDeviceStatistics::default(),
    })
  }

  pub fn statistics(&self) -> &HalaGpuDeviceStatistics {
    &self.statistics
  }

  /// Run wgpu calls inside a validation error scope.
  /// param what: The operation, used in the error message.
  /// param body: The calls.
  /// return: The result of the body, or the first validation error.
  fn scoped<T>(
    &self,
    what: &str,
    body: impl FnOnce(&Self) -> Result<T, HalaRendererError>,
  ) -> Result<T, HalaRendererError> {
    self.device.push_error_scope(wgpu::ErrorFilter::Validation);
    let result = body(self);
    match pollster::block_on(self.device.pop_error_scope()) {
      Some(err) => Err(HalaRendererError::new(&format!("{} failed: {}", what, err), Some(Box::new(err)))),
      None => result,
    }
  }

  fn alloc_handle(&mut self) -> u64 {
    let handle = self.next_handle;
    self.next_handle += 1;
    handle
  }

  fn release_error(&self, handle: u64, kind: &str) -> HalaRendererError {
    if self.released.contains(&handle) {
      HalaRendererError::new(&format!("The {} {} is destroyed twice.", kind, handle), None)
    } else {
      HalaRendererError::new(&format!("The {} {} is unknown.", kind, handle), None)
    }
  }

  fn buffer(&self, buffer: HalaBufferHandle) -> Result<&HalaGpuBuffer, HalaRendererError> {
    self.buffers.get(&buffer.0)
      .ok_or(HalaRendererError::new(&format!("The buffer {} is not alive.", buffer.0), None))
  }

  fn image(&self, image: HalaImageHandle) -> Result<&HalaGpuImage, HalaRendererError> {
    self.images.get(&image.0)
      .ok_or(HalaRendererError::new(&format!("The image {} is not alive.", image.0), None))
  }

  fn image_view(&self, view: HalaImageViewHandle) -> Result<&HalaGpuImageView, HalaRendererError> {
    self.image_views.get(&view.0)
      .ok_or(HalaRendererError::new(&format!("The image view {} is not alive.", view.0), None))
  }

  fn pipeline(&self, pipeline: HalaPipelineHandle) -> Result<&HalaGpuPipeline, HalaRendererError> {
    self.pipelines.get(&pipeline.0)
      .ok_or(HalaRendererError::new(&format!("The pipeline {} is not alive.", pipeline.0), None))
  }

  /// Create the bind group layouts and the pipeline layout of a kernel.
  fn build_layouts(
    device: &wgpu::Device,
    name: &str,
    bindings: &[HalaBindingDesc],
    push_constant_size: usize,
    visibility: wgpu::ShaderStages,
  ) -> (Vec<wgpu::BindGroupLayout>, wgpu::PipelineLayout) {
    let entries = bindings.iter()
      .map(|binding| convert::bind_group_layout_entry(binding, visibility))
      .collect::<Vec<_>>();
    let mut layouts = vec![device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
      label: Some(&format!("{}.bindings", name)),
      entries: &entries,
    })];
    if push_constant_size > 0 {
      layouts.push(device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(&format!("{}.push_constants", name)),
        entries: &[convert::push_constant_layout_entry(push_constant_size, visibility)],
      }));
    }
    let layout_refs = layouts.iter().collect::<Vec<_>>();
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
      label: Some(&format!("{}.layout", name)),
      bind_group_layouts: &layout_refs,
      push_constant_ranges: &[],
    });
    (layouts, pipeline_layout)
  }

  fn build_compute_pipeline(
    device: &wgpu::Device,
    name: &str,
    bindings: &[HalaBindingDesc],
    push_constant_size: usize,
    source: &str,
  ) -> HalaGpuPipeline {
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
      label: Some(name),
      source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    let (layouts, pipeline_layout) = Self::build_layouts(
      device,
      name,
      bindings,
      push_constant_size,
      wgpu::ShaderStages::COMPUTE,
    );
    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
      label: Some(name),
      layout: Some(&pipeline_layout),
      module: &module,
      entry_point: Some("main"),
      compilation_options: Default::default(),
      cache: None,
    });
    HalaGpuPipeline {
      name: name.to_string(),
      bindings: bindings.to_vec(),
      push_constant_size,
      layouts,
      kind: HalaGpuPipelineKind::Compute(pipeline),
    }
  }

  /// Create the push constant group of a dispatch or draw.
  /// param pipeline: The pipeline.
  /// param push_constants: The pushed bytes.
  /// return: The bind group, None if the pipeline has no push constants.
  fn create_push_constant_group(
    &self,
    pipeline: &HalaGpuPipeline,
    push_constants: &[u8],
  ) -> Result<Option<wgpu::BindGroup>, HalaRendererError> {
    if pipeline.push_constant_size == 0 {
      return Ok(None);
    }
    if push_constants.len() < pipeline.push_constant_size {
      return Err(HalaRendererError::new(
        &format!("The kernel \"{}\" needs {} bytes of push constants.", pipeline.name, pipeline.push_constant_size),
        None,
      ));
    }
    let layout = pipeline.layouts.get(1)
      .ok_or(HalaRendererError::new("The push constant layout is none!", None))?;
    let uniform = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
      label: Some(&format!("{}.push_constants", pipeline.name)),
      contents: &push_constants[..pipeline.push_constant_size],
      usage: wgpu::BufferUsages::UNIFORM,
    });
    Ok(Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
      label: Some(&format!("{}.push_constants", pipeline.name)),
      layout,
      entries: &[wgpu::BindGroupEntry {
        binding: 0,
        resource: uniform.as_entire_binding(),
      }],
    })))
  }

  /// Map a staging buffer and copy its contents out.
  fn read_staging(&self, staging: &wgpu::Buffer) -> Result<Vec<u8>, HalaRendererError> {
    let slice = staging.slice(..);
    let (sender, receiver) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
      let _ = sender.send(result);
    });
    let _ = self.device.poll(wgpu::Maintain::Wait);
    receiver.recv()
      .map_err(|err| HalaRendererError::new("The readback was never mapped.", Some(Box::new(err))))?
      .map_err(|err| HalaRendererError::new("Failed to map the readback buffer.", Some(Box::new(err))))?;
    let data = slice.get_mapped_range().to_vec();
    staging.unmap();
    Ok(data)
  }

  fn create_staging(&self, size: u64, debug_name: &str) -> wgpu::Buffer {
    self.device.create_buffer(&wgpu::BufferDescriptor {
      label: Some(debug_name),
      size: size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT),
      usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
      mapped_at_creation: false,
    })
  }

}

/// The implementation of the device trait for the GPU device.
impl HalaDevice for HalaGpuDevice {

  fn capabilities(&self) -> &HalaDeviceCapabilities {
    &self.capabilities
  }

  fn create_buffer(&mut self, desc: &HalaBufferDesc) -> Result<HalaBufferHandle, HalaRendererError> {
    if desc.size == 0 {
      return Err(HalaRendererError::new(&format!("The buffer \"{}\" has zero size.", desc.debug_name), None));
    }
    let buffer = self.scoped("Buffer creation", |this| {
      Ok(this.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(&desc.debug_name),
        size: buffer_allocation_size(desc.size),
        usage: convert::buffer_usages(desc.usage),
        mapped_at_creation: false,
      }))
    })?;
    let handle = self.alloc_handle();
    self.buffers.insert(handle, HalaGpuBuffer { desc: desc.clone(), buffer });
    log::debug!("A HalaBuffer \"{}\" with {} bytes is created.", desc.debug_name, desc.size);
    Ok(HalaBufferHandle(handle))
  }

  fn destroy_buffer(&mut self, buffer: HalaBufferHandle) -> Result<(), HalaRendererError> {
    let gpu_buffer = self.buffers.remove(&buffer.0).ok_or(self.release_error(buffer.0, "buffer"))?;
    gpu_buffer.buffer.destroy();
    self.released.insert(buffer.0);
    log::debug!("A HalaBuffer \"{}\" is dropped.", gpu_buffer.desc.debug_name);
    Ok(())
  }

  fn create_image(&mut self, desc: &HalaImageDesc) -> Result<HalaImageHandle, HalaRendererError> {
    if desc.width == 0 || desc.height == 0 {
      return Err(HalaRendererError::new(&format!("The image \"{}\" has zero size.", desc.debug_name), None));
    }
    let max_levels = 32 - desc.width.max(desc.height).leading_zeros();
    if desc.mip_levels == 0 || desc.mip_levels > max_levels {
      return Err(HalaRendererError::new(
        &format!("The image \"{}\" can not have {} mip levels.", desc.debug_name, desc.mip_levels),
        None,
      ));
    }
    if desc.width.max(desc.height) > self.capabilities.max_image_dimension_2d {
      return Err(HalaRendererError::new(
        &format!("The image \"{}\" exceeds {} texels.", desc.debug_name, self.capabilities.max_image_dimension_2d),
        None,
      ));
    }
    let texture = self.scoped("Image creation", |this| {
      Ok(this.device.create_texture(&wgpu::TextureDescriptor {
        label: Some(&desc.debug_name),
        size: wgpu::Extent3d {
          width: desc.width,
          height: desc.height,
          depth_or_array_layers: 1,
        },
        mip_level_count: desc.mip_levels,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: convert::texture_format(desc.format),
        usage: convert::texture_usages(desc.usage, desc.format),
        view_formats: &[],
      }))
    })?;
    let handle = self.alloc_handle();
    self.images.insert(handle, HalaGpuImage { desc: desc.clone(), texture, view_count: 0 });
    log::debug!("A HalaImage \"{}\" [{} x {}, {} levels] is created.", desc.debug_name, desc.width, desc.height, desc.mip_levels);
    Ok(HalaImageHandle(handle))
  }

  fn destroy_image(&mut self, image: HalaImageHandle) -> Result<(), HalaRendererError> {
    let gpu_image = self.images.get(&image.0).ok_or(self.release_error(image.0, "image"))?;
    if gpu_image.view_count > 0 {
      return Err(HalaRendererError::new(
        &format!("The image \"{}\" still has {} views.", gpu_image.desc.debug_name, gpu_image.view_count),
        None,
      ));
    }
    if let Some(gpu_image) = self.images.remove(&image.0) {
      gpu_image.texture.destroy();
      log::debug!("A HalaImage \"{}\" is dropped.", gpu_image.desc.debug_name);
    }
    self.released.insert(image.0);
    Ok(())
  }

  fn create_image_view(&mut self, desc: &HalaImageViewDesc) -> Result<HalaImageViewHandle, HalaRendererError> {
    let image = self.image(desc.image)?;
    if desc.level_count == 0 || desc.base_mip_level + desc.level_count > image.desc.mip_levels {
      return Err(HalaRendererError::new(
        &format!(
          "The view \"{}\" covers levels {}..{} of an image with {}.",
          desc.debug_name, desc.base_mip_level, desc.base_mip_level + desc.level_count, image.desc.mip_levels,
        ),
        None,
      ));
    }
    let view = image.texture.create_view(&wgpu::TextureViewDescriptor {
      label: Some(&desc.debug_name),
      base_mip_level: desc.base_mip_level,
      mip_level_count: Some(desc.level_count),
      ..Default::default()
    });
    if let Some(image) = self.images.get_mut(&desc.image.0) {
      image.view_count += 1;
    }
    let handle = self.alloc_handle();
    self.image_views.insert(handle, HalaGpuImageView { desc: desc.clone(), view });
    Ok(HalaImageViewHandle(handle))
  }

  fn destroy_image_view(&mut self, view: HalaImageViewHandle) -> Result<(), HalaRendererError> {
    let gpu_view = self.image_views.remove(&view.0).ok_or(self.release_error(view.0, "image view"))?;
    if let Some(image) = self.images.get_mut(&gpu_view.desc.image.0) {
      image.view_count = image.view_count.saturating_sub(1);
    }
    self.released.insert(view.0);
    Ok(())
  }

  fn create_compute_pipeline(
    &mut self,
    kernel: Arc<dyn HalaComputeKernel>,
    debug_name: &str,
  ) -> Result<HalaPipelineHandle, HalaRendererError> {
    let source = kernel.shader_source()
      .ok_or(HalaRendererError::new(&format!("The kernel \"{}\" has no WGSL source.", kernel.name()), None))?;
    let [x, y] = kernel.local_size();
    if x * y > self.capabilities.max_compute_work_group_invocations {
      return Err(HalaRendererError::new(
        &format!("The kernel \"{}\" has {} invocations per work group.", kernel.name(), x * y),
        None,
      ));
    }
    let pipeline = self.scoped(&format!("The compute pipeline \"{}\"", debug_name), |this| {
      Ok(Self::build_compute_pipeline(&this.device, debug_name, kernel.bindings(), kernel.push_constant_size(), source))
    })?;
    let handle = self.alloc_handle();
    self.pipelines.insert(handle, pipeline);
    log::debug!("A HalaComputePipeline \"{}\" is created.", debug_name);
    Ok(HalaPipelineHandle(handle))
  }

  fn create_graphics_pipeline(
    &mut self,
    kernel: Arc<dyn HalaGraphicsKernel>,
    depth_state: HalaDepthState,
    debug_name: &str,
  ) -> Result<HalaPipelineHandle, HalaRendererError> {
    if kernel.draw_kind() == HalaDrawKind::MeshTasks {
      return Err(HalaRendererError::new(
        &format!("The device \"{}\" has no mesh shaders for \"{}\".", self.name, kernel.name()),
        None,
      ));
    }
    let source = kernel.shader_source()
      .ok_or(HalaRendererError::new(&format!("The kernel \"{}\" has no WGSL source.", kernel.name()), None))?;
    let pipeline = self.scoped(&format!("The graphics pipeline \"{}\"", debug_name), |this| {
      let module = this.device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(debug_name),
        source: wgpu::ShaderSource::Wgsl(source.into()),
      });
      let (layouts, pipeline_layout) = Self::build_layouts(
        &this.device,
        debug_name,
        kernel.bindings(),
        kernel.push_constant_size(),
        wgpu::ShaderStages::VERTEX,
      );
      let depth_compare = if depth_state.test_enable {
        convert::compare_function(depth_state.compare_op)
      } else {
        wgpu::CompareFunction::Always
      };
      let pipeline = this.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(debug_name),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
          module: &module,
          entry_point: Some("vs_main"),
          compilation_options: Default::default(),
          buffers: &[],
        },
        primitive: wgpu::PrimitiveState {
          topology: wgpu::PrimitiveTopology::TriangleList,
          cull_mode: None,
          ..Default::default()
        },
        depth_stencil: Some(wgpu::DepthStencilState {
          format: wgpu::TextureFormat::Depth32Float,
          depth_write_enabled: depth_state.write_enable,
          depth_compare,
          stencil: Default::default(),
          bias: Default::default(),
        }),
        multisample: Default::default(),
        fragment: None,
        multiview: None,
        cache: None,
      });
      Ok(HalaGpuPipeline {
        name: debug_name.to_string(),
        bindings: kernel.bindings().to_vec(),
        push_constant_size: kernel.push_constant_size(),
        layouts,
        kind: HalaGpuPipelineKind::Graphics(pipeline),
      })
    })?;
    let handle = self.alloc_handle();
    self.pipelines.insert(handle, pipeline);
    log::debug!("A HalaGraphicsPipeline \"{}\" is created.", debug_name);
    Ok(HalaPipelineHandle(handle))
  }

  fn destroy_pipeline(&mut self, pipeline: HalaPipelineHandle) -> Result<(), HalaRendererError> {
    let gpu_pipeline = self.pipelines.remove(&pipeline.0).ok_or(self.release_error(pipeline.0, "pipeline"))?;
    self.released.insert(pipeline.0);
    log::debug!("A HalaPipeline \"{}\" is dropped.", gpu_pipeline.name);
    Ok(())
  }

  fn upload_buffer(&mut self, buffer: HalaBufferHandle, offset: u64, data: &[u8]) -> Result<(), HalaRendererError> {
    let gpu_buffer = self.buffer(buffer)?;
    if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
      return Err(HalaRendererError::new("Upload offsets must be multiples of 4.", None));
    }
    let padded_size = (data.len() as u64).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
    if offset + data.len() as u64 > gpu_buffer.desc.size || offset + padded_size > gpu_buffer.buffer.size() {
      return Err(HalaRendererError::new(
        &format!("The upload of {} bytes at {} overflows \"{}\".", data.len(), offset, gpu_buffer.desc.debug_name),
        None,
      ));
    }
    self.scoped("Buffer upload", |this| {
      if padded_size == data.len() as u64 {
        this.queue.write_buffer(&gpu_buffer.buffer, offset, data);
      } else {
        let mut padded = data.to_vec();
        padded.resize(padded_size as usize, 0);
        this.queue.write_buffer(&gpu_buffer.buffer, offset, &padded);
      }
      this.queue.submit(std::iter::empty());
      let _ = this.device.poll(wgpu::Maintain::Wait);
      Ok(())
    })
  }

  fn read_buffer(&self, buffer: HalaBufferHandle, offset: u64, size: u64) -> Result<Vec<u8>, HalaRendererError> {
    let gpu_buffer = self.buffer(buffer)?;
    if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0 || offset + size > gpu_buffer.desc.size {
      return Err(HalaRendererError::new(
        &format!("The read of {} bytes at {} is out of \"{}\".", size, offset, gpu_buffer.desc.debug_name),
        None,
      ));
    }
    if size == 0 {
      return Ok(Vec::new());
    }
    let staging = self.create_staging(size, "read_buffer.staging");
    let copy_size = staging.size().min(gpu_buffer.buffer.size() - offset);
    self.scoped("Buffer readback", |this| {
      let mut encoder = this.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("read_buffer.commands"),
      });
      encoder.copy_buffer_to_buffer(&gpu_buffer.buffer, offset, &staging, 0, copy_size);
      this.queue.submit(std::iter::once(encoder.finish()));
      Ok(())
    })?;
    let mut data = self.read_staging(&staging)?;
    data.truncate(size as usize);
    Ok(data)
  }

  fn read_image_level(&self, image: HalaImageHandle, mip_level: u32) -> Result<Vec<f32>, HalaRendererError> {
    let gpu_image = self.image(image)?;
    if mip_level >= gpu_image.desc.mip_levels {
      return Err(HalaRendererError::new(
        &format!("The image \"{}\" has no level {}.", gpu_image.desc.debug_name, mip_level),
        None,
      ));
    }
    let width = (gpu_image.desc.width >> mip_level).max(1);
    let height = (gpu_image.desc.height >> mip_level).max(1);
    let (unpadded, padded) = convert::readback_row_pitch(width);
    let staging = self.create_staging(padded as u64 * height as u64, "read_image.staging");
    self.scoped("Image readback", |this| {
      let mut encoder = this.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("read_image.commands"),
      });
      encoder.copy_texture_to_buffer(
        wgpu::ImageCopyTexture {
          texture: &gpu_image.texture,
          mip_level,
          origin: wgpu::Origin3d::ZERO,
          aspect: convert::texture_aspect(gpu_image.desc.format),
        },
        wgpu::ImageCopyBuffer {
          buffer: &staging,
          layout: wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(padded),
            rows_per_image: Some(height),
          },
        },
        wgpu::Extent3d {
          width,
          height,
          depth_or_array_layers: 1,
        },
      );
      this.queue.submit(std::iter::once(encoder.finish()));
      Ok(())
    })?;
    let data = self.read_staging(&staging)?;
    Ok(data.chunks_exact(padded as usize)
      .flat_map(|row| row[..unpadded as usize].chunks_exact(4))
      .map(|texel| f32::from_ne_bytes([texel[0], texel[1], texel[2], texel[3]]))
      .collect())
  }

  fn submit(&mut self, command_buffer: &HalaCommandBuffer) -> Result<(), HalaRendererError> {
    let (dispatches, draws) = self.scoped(&format!("The submission \"{}\"", command_buffer.debug_name), |this| {
      let (encoder, dispatches, draws) = this.encode(command_buffer)?;
      this.queue.submit(std::iter::once(encoder.finish()));
      Ok((dispatches, draws))
    })?;
    self.statistics.submits += 1;
    self.statistics.dispatches += dispatches;
    self.statistics.indirect_draws += draws;
    Ok(())
  }

  fn wait_idle(&mut self) -> Result<(), HalaRendererError> {
    let _ = self.device.poll(wgpu::Maintain::Wait);
    Ok(())
  }

}

#[cfg(test)]
mod tests {
  use super::*;

  fn shader_module(source: &str) -> naga::Module {
    let module = naga::front::wgsl::parse_str(source).unwrap();
    naga::valid::Validator::new(naga::valid::ValidationFlags::all(), naga::valid::Capabilities::default())
      .validate(&module)
      .unwrap();
    module
  }

  #[test]
  fn repack_shader_matches_its_layout() {
    let module = shader_module(include_str!("indirect_repack.wgsl"));
    let mut bindings = module.global_variables.iter()
      .filter_map(|(_, global)| global.binding.as_ref().map(|b| (b.group, b.binding)))
      .collect::<Vec<_>>();
    bindings.sort();
    assert_eq!(bindings, vec![(0, 0), (0, 1), (0, 2), (1, 0)]);
    let uniform = module.global_variables.iter()
      .find(|(_, global)| global.space == naga::AddressSpace::Uniform)
      .map(|(_, global)| module.types[global.ty].inner.size(module.to_ctx()))
      .unwrap();
    assert_eq!(uniform as usize, std::mem::size_of::<HalaRepackData>());
    assert_eq!(module.entry_points[0].workgroup_size, [64, 1, 1]);
  }

  #[test]
  fn missing_adapters_are_reported() {
    let _ = env_logger::builder().is_test(true).try_init();
    // Either outcome is valid, but a failure must be an error rather than a panic.
    match HalaGpuDevice::new("gpu_device_test") {
      Ok(device) => assert!(!device.capabilities().mesh_shader),
      Err(err) => assert!(!err.to_string().is_empty()),
    }
  }
}
