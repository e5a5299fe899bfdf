use std::path::Path;
use std::sync::Arc;

use crate::compute_program::HalaComputeProgram;
use crate::config::{
  HalaCullRendererConfig,
  HalaRenderPath,
};
use crate::culling::{
  cull_kernel::{
    CULL_BINDING_DEPTH_PYRAMID,
    CULL_BINDING_DRAW_COMMANDS,
    CULL_BINDING_DRAW_COUNT,
    CULL_BINDING_INSTANCES,
    CULL_BINDING_MESHES,
  },
  draw_kernels::{
    DRAW_BINDING_DRAW_COMMANDS,
    DRAW_BINDING_INDICES,
    DRAW_BINDING_INSTANCES,
    DRAW_BINDING_MESHLETS,
    DRAW_BINDING_MESHLET_TRIANGLES,
    DRAW_BINDING_MESHLET_VERTICES,
    DRAW_BINDING_VERTICES,
  },
  HalaCamera,
  HalaCullData,
  HalaDepthPyramid,
  HalaDepthReduceKernel,
  HalaDepthTarget,
  HalaDrawCommand,
  HalaDrawCullKernel,
  HalaDrawData,
  HalaFeatureToggles,
  HalaIndexedDrawKernel,
  HalaMeshletDrawKernel,
  HALA_CULL_WORK_GROUP_SIZE,
  HALA_DRAW_COMMAND_INDEXED_OFFSET,
  HALA_DRAW_COMMAND_TASKS_OFFSET,
};
use crate::error::HalaRendererError;
use crate::gfx::{
  HalaAccessFlags,
  HalaBufferBarrierInfo,
  HalaBufferDesc,
  HalaBufferHandle,
  HalaBufferUsageFlags,
  HalaCommandBuffer,
  HalaDescriptor,
  HalaDevice,
  HalaDrawKind,
  HalaImageBarrierInfo,
  HalaImageLayout,
  HalaIndirectCountInfo,
  HalaPipelineStageFlags,
};
use crate::graphics_program::{
  HalaGraphicsProgram,
  HalaGraphicsProgramDesc,
};
use crate::scene::{
  loader::HalaGltfLoader,
  HalaGeometry,
  HalaInstanceTable,
  HalaMeshSource,
  HalaScatterDesc,
};

/// The renderer information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HalaRendererInfo {
  pub name: String,
  pub width: u32,
  pub height: u32,
}

/// The frame statistics, reported once per second.
/// GPU time is the submit to idle time of a frame, CPU time is the recording time.
#[derive(Debug, Clone)]
pub struct HalaRendererStatistics {
  pub total_frames: u64,
  pub last_stat_time: std::time::Instant,
  pub elapsed_time: std::time::Duration,
  pub total_gpu_nanoseconds: u128,
  pub total_cpu_nanoseconds: u128,
  pub total_stat_frames: u64,
}

impl Default for HalaRendererStatistics {
  fn default() -> Self {
    Self {
      total_frames: 0,
      last_stat_time: std::time::Instant::now(),
      elapsed_time: std::time::Duration::from_secs(0),
      total_gpu_nanoseconds: 0,
      total_cpu_nanoseconds: 0,
      total_stat_frames: 0,
    }
  }
}

/// The implementation of the renderer statistics.
impl HalaRendererStatistics {

  /// Account one frame.
  /// param cpu_time: The recording time.
  /// param gpu_time: The execution time.
  pub fn frame(&mut self, cpu_time: std::time::Duration, gpu_time: std::time::Duration) {
    self.total_cpu_nanoseconds += cpu_time.as_nanos();
    self.total_gpu_nanoseconds += gpu_time.as_nanos();
    self.total_stat_frames += 1;

    let now = std::time::Instant::now();
    self.elapsed_time += now - self.last_stat_time;
    if self.elapsed_time > std::time::Duration::from_secs(1) {
      let elapsed_time_nanos = self.elapsed_time.as_nanos();
      log::info!(
        "FPS: {}, GPU Time: {:.4}ms, CPU Time: {:.4}ms, Total Frames: {}",
        self.total_stat_frames as u128 * 1000000000 / elapsed_time_nanos.max(1),
        self.total_gpu_nanoseconds as f64 / self.total_stat_frames as f64 / 1000000.0,
        self.total_cpu_nanoseconds as f64 / self.total_stat_frames as f64 / 1000000.0,
        self.total_frames + 1,
      );
      self.total_gpu_nanoseconds = 0;
      self.total_cpu_nanoseconds = 0;
      self.total_stat_frames = 0;
      self.elapsed_time = std::time::Duration::from_secs(0);
    }
    self.last_stat_time = now;
    self.total_frames += 1;
  }

}

/// The device buffers of a loaded scene.
struct HalaSceneBuffers {
  instances: HalaBufferHandle,
  meshes: HalaBufferHandle,
  vertices: HalaBufferHandle,
  indices: HalaBufferHandle,
  meshlets: HalaBufferHandle,
  meshlet_vertices: HalaBufferHandle,
  meshlet_triangles: HalaBufferHandle,
  draw_commands: HalaBufferHandle,
  draw_count: HalaBufferHandle,
  instance_count: u32,
}

/// The implementation of the scene buffers.
impl HalaSceneBuffers {

  fn create_buffer<D: HalaDevice + ?Sized>(
    device: &mut D,
    data: &[u8],
    usage: HalaBufferUsageFlags,
    debug_name: &str,
  ) -> Result<HalaBufferHandle, HalaRendererError> {
    // Empty arrays still get a word so every binding has a buffer.
    let size = (data.len() as u64).max(4).next_multiple_of(4);
    let buffer = device.create_buffer(&HalaBufferDesc {
      size,
      usage,
      debug_name: debug_name.to_string(),
    })?;
    if !data.is_empty() {
      device.upload_buffer(buffer, 0, data)?;
    }
    Ok(buffer)
  }

  fn upload<D: HalaDevice + ?Sized>(
    device: &mut D,
    geometry: &HalaGeometry,
    instances: &HalaInstanceTable,
  ) -> Result<Self, HalaRendererError> {
    let storage = HalaBufferUsageFlags::STORAGE_BUFFER | HalaBufferUsageFlags::TRANSFER_DST;
    let indirect = storage | HalaBufferUsageFlags::INDIRECT_BUFFER;
    let instance_count = instances.len() as u32;
    let command_bytes = std::mem::size_of::<HalaDrawCommand>() * instances.len();

    let buffers = Self {
      instances: Self::create_buffer(device, bytemuck::cast_slice(instances.as_slice()), storage, "instances.buffer")?,
      meshes: Self::create_buffer(device, bytemuck::cast_slice(&geometry.meshes), storage, "meshes.buffer")?,
      vertices: Self::create_buffer(device, bytemuck::cast_slice(&geometry.vertices), storage, "vertices.buffer")?,
      indices: Self::create_buffer(
        device,
        bytemuck::cast_slice(&geometry.indices),
        storage | HalaBufferUsageFlags::INDEX_BUFFER,
        "indices.buffer",
      )?,
      meshlets: Self::create_buffer(device, bytemuck::cast_slice(&geometry.meshlets), storage, "meshlets.buffer")?,
      meshlet_vertices: Self::create_buffer(
        device,
        bytemuck::cast_slice(&geometry.meshlet_vertices),
        storage,
        "meshlet_vertices.buffer",
      )?,
      meshlet_triangles: Self::create_buffer(
        device,
        bytemuck::cast_slice(&geometry.meshlet_triangles),
        storage,
        "meshlet_triangles.buffer",
      )?,
      draw_commands: Self::create_buffer(device, &vec![0u8; command_bytes], indirect, "draw_commands.buffer")?,
      draw_count: Self::create_buffer(device, &[], indirect, "draw_count.buffer")?,
      instance_count,
    };
    log::debug!(
      "A scene with {} meshes, {} instances, {} vertices, {} indices and {} meshlets is uploaded.",
      geometry.meshes.len(), instance_count, geometry.vertices.len(), geometry.indices.len(), geometry.meshlets.len(),
    );
    Ok(buffers)
  }

  fn draw_commands_size(&self) -> u64 {
    (std::mem::size_of::<HalaDrawCommand>() as u64 * self.instance_count as u64).max(4)
  }

  fn destroy<D: HalaDevice + ?Sized>(self, device: &mut D) -> Result<(), HalaRendererError> {
    for buffer in [
      self.instances,
      self.meshes,
      self.vertices,
      self.indices,
      self.meshlets,
      self.meshlet_vertices,
      self.meshlet_triangles,
      self.draw_commands,
      self.draw_count,
    ] {
      device.destroy_buffer(buffer)?;
    }
    Ok(())
  }

}

/// The GPU-driven culling renderer.
/// Every frame culls the instances on the device, draws the survivors with one indirect call
/// and rebuilds the depth pyramid used by the next frame's occlusion test.
pub struct HalaCullRenderer<D: HalaDevice> {

  pub(crate) info: HalaRendererInfo,
  pub(crate) config: HalaCullRendererConfig,
  pub(crate) render_path: HalaRenderPath,

  pub(crate) device: D,

  pub(crate) cull_program: Option<HalaComputeProgram>,
  pub(crate) reduce_program: Option<HalaComputeProgram>,
  pub(crate) draw_program: Option<HalaGraphicsProgram>,

  scene: Option<HalaSceneBuffers>,
  pub(crate) depth: Option<HalaDepthTarget>,
  pub(crate) depth_pyramid: Option<HalaDepthPyramid>,

  pub(crate) statistics: HalaRendererStatistics,

}

/// The Drop implementation of the renderer.
impl<D: HalaDevice> Drop for HalaCullRenderer<D> {

  fn drop(&mut self) {
    if let Err(err) = self.release() {
      log::error!("Failed to release the HalaCullRenderer \"{}\": {}", self.info.name, err);
    }
    log::debug!("A HalaCullRenderer \"{}\" is dropped.", self.info.name);
  }

}

/// The implementation of the renderer.
impl<D: HalaDevice> HalaCullRenderer<D> {

  /// Create a new renderer.
  /// param device: The device, owned by the renderer.
  /// param config: The configuration.
  /// return: The renderer.
  pub fn new(mut device: D, config: HalaCullRendererConfig) -> Result<Self, HalaRendererError> {
    let config = config.validated();
    let capabilities = *device.capabilities();
    if !capabilities.draw_indirect_count {
      return Err(HalaRendererError::new("The device does not support count-indirect draws.", None));
    }

    let render_path = match (config.render_path, capabilities.mesh_shader) {
      (HalaRenderPath::Indexed, _) | (HalaRenderPath::Auto, false) => HalaRenderPath::Indexed,
      (HalaRenderPath::Meshlet, false) => {
        log::warn!("The device has no mesh shaders, the indexed path is used instead.");
        HalaRenderPath::Indexed
      }
      (_, true) => HalaRenderPath::Meshlet,
    };

    let cull_program = HalaComputeProgram::new(&mut device, Arc::new(HalaDrawCullKernel), "draw_cull")?;
    let reduce_program = HalaComputeProgram::new(&mut device, Arc::new(HalaDepthReduceKernel), "depth_reduce")?;
    let draw_program = match render_path {
      HalaRenderPath::Meshlet => HalaGraphicsProgram::new(
        &mut device,
        Arc::new(HalaMeshletDrawKernel),
        &HalaGraphicsProgramDesc::default(),
        "meshlet_draw",
      )?,
      _ => HalaGraphicsProgram::new(
        &mut device,
        Arc::new(HalaIndexedDrawKernel),
        &HalaGraphicsProgramDesc::default(),
        "indexed_draw",
      )?,
    };

    let info = HalaRendererInfo {
      name: config.name.clone(),
      width: config.width,
      height: config.height,
    };
    log::debug!(
      "A HalaCullRenderer \"{}\"[{} x {}, {:?}] is created.",
      info.name, info.width, info.height, render_path,
    );
    Ok(Self {
      info,
      config,
      render_path,
      device,
      cull_program: Some(cull_program),
      reduce_program: Some(reduce_program),
      draw_program: Some(draw_program),
      scene: None,
      depth: None,
      depth_pyramid: None,
      statistics: HalaRendererStatistics::default(),
    })
  }

  pub fn info(&self) -> &HalaRendererInfo {
    &self.info
  }

  pub fn config(&self) -> &HalaCullRendererConfig {
    &self.config
  }

  /// Get the render path in use, never Auto.
  pub fn render_path(&self) -> HalaRenderPath {
    self.render_path
  }

  pub fn device(&self) -> &D {
    &self.device
  }

  pub fn device_mut(&mut self) -> &mut D {
    &mut self.device
  }

  pub fn statistics(&self) -> &HalaRendererStatistics {
    &self.statistics
  }

  pub fn depth_target(&self) -> Option<&HalaDepthTarget> {
    self.depth.as_ref()
  }

  pub fn depth_pyramid(&self) -> Option<&HalaDepthPyramid> {
    self.depth_pyramid.as_ref()
  }

  /// Get the instance count of the loaded scene.
  pub fn instance_count(&self) -> u32 {
    self.scene.as_ref().map_or(0, |scene| scene.instance_count)
  }

  /// Load glTF meshes and scatter instances of them.
  /// param mesh_paths: The glTF files, one mesh per file.
  /// param scatter: The instance placement.
  /// return: The result.
  pub fn load_scene<P: AsRef<Path>>(
    &mut self,
    mesh_paths: &[P],
    scatter: &HalaScatterDesc,
  ) -> Result<(), HalaRendererError> {
    let sources = mesh_paths.iter()
      .map(HalaGltfLoader::load)
      .collect::<Result<Vec<_>, _>>()?;
    self.load_scene_from_sources(&sources, scatter)
  }

  /// Preprocess source meshes and scatter instances of them.
  /// param sources: The source meshes.
  /// param scatter: The instance placement.
  /// return: The result.
  pub fn load_scene_from_sources(
    &mut self,
    sources: &[HalaMeshSource],
    scatter: &HalaScatterDesc,
  ) -> Result<(), HalaRendererError> {
    let mut geometry = HalaGeometry::default();
    geometry.add_meshes(sources, &self.config.lod_builder(), self.render_path == HalaRenderPath::Meshlet)?;
    let instances = HalaInstanceTable::scatter(&geometry.meshes, scatter)?;
    self.set_scene(&geometry, &instances)
  }

  /// Upload a prepared scene, replacing the current one.
  /// param geometry: The geometry.
  /// param instances: The instances.
  /// return: The result.
  pub fn set_scene(&mut self, geometry: &HalaGeometry, instances: &HalaInstanceTable) -> Result<(), HalaRendererError> {
    for (index, instance) in instances.as_slice().iter().enumerate() {
      let mesh = geometry.meshes.get(instance.mesh_index as usize)
        .ok_or(HalaRendererError::new(
          &format!("The instance {} references the missing mesh {}.", index, instance.mesh_index),
          None,
        ))?;
      if instance.vertex_offset != mesh.vertex_offset {
        return Err(HalaRendererError::new(
          &format!("The instance {} does not match the vertex range of its mesh.", index),
          None,
        ));
      }
    }
    if self.render_path == HalaRenderPath::Meshlet
      && geometry.meshes.iter().flat_map(|mesh| mesh.lods()).any(|lod| lod.index_count > 0 && lod.meshlet_count == 0) {
      return Err(HalaRendererError::new("The meshlet path needs meshlets for every LOD.", None));
    }

    if let Some(scene) = self.scene.take() {
      scene.destroy(&mut self.device)?;
    }
    self.scene = Some(HalaSceneBuffers::upload(&mut self.device, geometry, instances)?);
    Ok(())
  }

  /// Recreate the depth target and the pyramid for a new extent.
  /// Old resources are released before new ones are created.
  fn resize(&mut self, width: u32, height: u32) -> Result<(), HalaRendererError> {
    if let Some(pyramid) = self.depth_pyramid.take() {
      pyramid.destroy(&mut self.device)?;
    }
    if let Some(depth) = self.depth.take() {
      depth.destroy(&mut self.device)?;
    }

    let depth = HalaDepthTarget::new(&mut self.device, width, height)?;
    let pyramid = HalaDepthPyramid::new(&mut self.device, width, height)?;
    pyramid.init(&mut self.device)?;
    self.depth = Some(depth);
    self.depth_pyramid = Some(pyramid);
    self.info.width = width;
    self.info.height = height;
    Ok(())
  }

  /// Render one frame and wait for it.
  /// param camera: The camera.
  /// param width: The render width.
  /// param height: The render height.
  /// param toggles: The feature switches of this frame.
  /// return: The result.
  pub fn render_frame(
    &mut self,
    camera: &HalaCamera,
    width: u32,
    height: u32,
    toggles: &HalaFeatureToggles,
  ) -> Result<(), HalaRendererError> {
    if self.scene.is_none() {
      return Err(HalaRendererError::new("The scene is not loaded.", None));
    }
    // Nothing to draw into while minimized.
    if width == 0 || height == 0 {
      return Ok(());
    }
    let extent = self.depth.as_ref().map(|depth| (depth.width, depth.height));
    if extent != Some((width, height)) {
      self.resize(width, height)?;
    }

    let record_begin = std::time::Instant::now();
    let mut command_buffer = HalaCommandBuffer::new(&format!("{}.frame", self.info.name));
    self.record_frame(&mut command_buffer, camera, toggles)?;
    let submit_begin = std::time::Instant::now();
    self.device.submit(&command_buffer)?;
    self.device.wait_idle()?;
    let submit_end = std::time::Instant::now();

    self.statistics.frame(submit_begin - record_begin, submit_end - submit_begin);
    Ok(())
  }

  fn record_frame(
    &self,
    command_buffer: &mut HalaCommandBuffer,
    camera: &HalaCamera,
    toggles: &HalaFeatureToggles,
  ) -> Result<(), HalaRendererError> {
    let scene = self.scene.as_ref().ok_or(HalaRendererError::new("The scene is not loaded.", None))?;
    let depth = self.depth.as_ref().ok_or(HalaRendererError::new("The depth target is none!", None))?;
    let pyramid = self.depth_pyramid.as_ref().ok_or(HalaRendererError::new("The depth pyramid is none!", None))?;
    let cull_program = self.cull_program.as_ref().ok_or(HalaRendererError::new("The cull program is none!", None))?;
    let reduce_program = self.reduce_program.as_ref().ok_or(HalaRendererError::new("The reduce program is none!", None))?;
    let draw_program = self.draw_program.as_ref().ok_or(HalaRendererError::new("The draw program is none!", None))?;
    let aspect = depth.width as f32 / depth.height as f32;

    // Reset the visible list.
    command_buffer.fill_buffer(scene.draw_count, 0, 4, 0);
    command_buffer.fill_buffer(scene.draw_commands, 0, scene.draw_commands_size(), 0);
    command_buffer.pipeline_barrier(
      HalaPipelineStageFlags::TRANSFER,
      HalaPipelineStageFlags::COMPUTE_SHADER,
      &[scene.draw_count, scene.draw_commands].map(|buffer| HalaBufferBarrierInfo::new(
        buffer,
        HalaAccessFlags::TRANSFER_WRITE,
        HalaAccessFlags::SHADER_READ | HalaAccessFlags::SHADER_WRITE,
      )),
      &[],
    );

    // Cull against last frame's pyramid.
    cull_program.bind(
      command_buffer,
      &[
        (CULL_BINDING_INSTANCES, HalaDescriptor::Buffer(scene.instances)),
        (CULL_BINDING_MESHES, HalaDescriptor::Buffer(scene.meshes)),
        (CULL_BINDING_DRAW_COMMANDS, HalaDescriptor::Buffer(scene.draw_commands)),
        (CULL_BINDING_DRAW_COUNT, HalaDescriptor::Buffer(scene.draw_count)),
        (CULL_BINDING_DEPTH_PYRAMID, HalaDescriptor::Image(pyramid.view)),
      ],
    )?;
    cull_program.push_constants(
      command_buffer,
      &HalaCullData::new(
        camera,
        aspect,
        self.config.draw_distance,
        self.config.lod_base_distance,
        (pyramid.width, pyramid.height, pyramid.level_count),
        scene.instance_count,
        toggles,
      ),
    );
    cull_program.dispatch(command_buffer, scene.instance_count.div_ceil(HALA_CULL_WORK_GROUP_SIZE), 1, 1);

    command_buffer.pipeline_barrier(
      HalaPipelineStageFlags::COMPUTE_SHADER,
      HalaPipelineStageFlags::DRAW_INDIRECT
        | HalaPipelineStageFlags::VERTEX_SHADER
        | HalaPipelineStageFlags::TASK_SHADER
        | HalaPipelineStageFlags::MESH_SHADER,
      &[scene.draw_count, scene.draw_commands].map(|buffer| HalaBufferBarrierInfo::new(
        buffer,
        HalaAccessFlags::SHADER_WRITE,
        HalaAccessFlags::INDIRECT_COMMAND_READ | HalaAccessFlags::SHADER_READ,
      )),
      &[],
    );
    command_buffer.pipeline_barrier(
      HalaPipelineStageFlags::COMPUTE_SHADER,
      HalaPipelineStageFlags::EARLY_FRAGMENT_TESTS | HalaPipelineStageFlags::LATE_FRAGMENT_TESTS,
      &[],
      &[HalaImageBarrierInfo::new(
        depth.image,
        HalaAccessFlags::empty(),
        HalaAccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | HalaAccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        HalaImageLayout::Undefined,
        HalaImageLayout::DepthAttachmentOptimal,
      )],
    );

    // Draw the visible list. We use reverse Z, so clear depth to 0.0.
    command_buffer.begin_rendering(depth.view, Some(0.0));
    let view_proj = camera.projection_matrix(aspect) * camera.view_matrix();
    let draw_data = HalaDrawData {
      view_proj,
      camera_position: camera.position.to_array(),
      cone_cull_enabled: toggles.cone_cull_enabled as u32,
    };
    let (descriptors, offset) = match self.render_path {
      HalaRenderPath::Meshlet => (
        vec![
          (DRAW_BINDING_INSTANCES, HalaDescriptor::Buffer(scene.instances)),
          (DRAW_BINDING_DRAW_COMMANDS, HalaDescriptor::Buffer(scene.draw_commands)),
          (DRAW_BINDING_VERTICES, HalaDescriptor::Buffer(scene.vertices)),
          (DRAW_BINDING_MESHLETS, HalaDescriptor::Buffer(scene.meshlets)),
          (DRAW_BINDING_MESHLET_VERTICES, HalaDescriptor::Buffer(scene.meshlet_vertices)),
          (DRAW_BINDING_MESHLET_TRIANGLES, HalaDescriptor::Buffer(scene.meshlet_triangles)),
        ],
        HALA_DRAW_COMMAND_TASKS_OFFSET,
      ),
      _ => (
        vec![
          (DRAW_BINDING_INSTANCES, HalaDescriptor::Buffer(scene.instances)),
          (DRAW_BINDING_DRAW_COMMANDS, HalaDescriptor::Buffer(scene.draw_commands)),
          (DRAW_BINDING_VERTICES, HalaDescriptor::Buffer(scene.vertices)),
          (DRAW_BINDING_INDICES, HalaDescriptor::Buffer(scene.indices)),
        ],
        HALA_DRAW_COMMAND_INDEXED_OFFSET,
      ),
    };
    draw_program.bind(command_buffer, &descriptors)?;
    if draw_program.draw_kind() == HalaDrawKind::Indexed {
      command_buffer.bind_index_buffer(scene.indices);
    }
    draw_program.push_constants(command_buffer, &draw_data);
    draw_program.draw_indirect_count(
      command_buffer,
      HalaIndirectCountInfo {
        buffer: scene.draw_commands,
        offset,
        count_buffer: scene.draw_count,
        count_offset: 0,
        max_draw_count: scene.instance_count,
        stride: std::mem::size_of::<HalaDrawCommand>() as u32,
      },
    );
    command_buffer.end_rendering();

    // Build the pyramid for the next frame.
    command_buffer.pipeline_barrier(
      HalaPipelineStageFlags::LATE_FRAGMENT_TESTS,
      HalaPipelineStageFlags::COMPUTE_SHADER,
      &[],
      &[HalaImageBarrierInfo::new(
        depth.image,
        HalaAccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        HalaAccessFlags::SHADER_READ,
        HalaImageLayout::DepthAttachmentOptimal,
        HalaImageLayout::ShaderReadOnlyOptimal,
      )],
    );
    pyramid.record_build(command_buffer, reduce_program, depth)
  }

  /// Read the visible counter of the last frame. Waits for the device, diagnostics only.
  pub fn read_visible_count(&self) -> Result<u32, HalaRendererError> {
    let scene = self.scene.as_ref().ok_or(HalaRendererError::new("The scene is not loaded.", None))?;
    let bytes = self.device.read_buffer(scene.draw_count, 0, 4)?;
    Ok(bytemuck::pod_read_unaligned(&bytes))
  }

  /// Read the draw commands of the last frame. Waits for the device, diagnostics only.
  pub fn read_draw_commands(&self) -> Result<Vec<HalaDrawCommand>, HalaRendererError> {
    let scene = self.scene.as_ref().ok_or(HalaRendererError::new("The scene is not loaded.", None))?;
    let count = self.read_visible_count()?.min(scene.instance_count) as usize;
    if count == 0 {
      return Ok(Vec::new());
    }
    let bytes = self.device.read_buffer(
      scene.draw_commands,
      0,
      (count * std::mem::size_of::<HalaDrawCommand>()) as u64,
    )?;
    Ok(bytes.chunks_exact(std::mem::size_of::<HalaDrawCommand>()).map(bytemuck::pod_read_unaligned).collect())
  }

  /// Release every device resource. The renderer can not render afterwards.
  /// Dropping the renderer does the same.
  /// return: The result.
  pub fn release(&mut self) -> Result<(), HalaRendererError> {
    self.device.wait_idle()?;
    if let Some(pyramid) = self.depth_pyramid.take() {
      pyramid.destroy(&mut self.device)?;
    }
    if let Some(depth) = self.depth.take() {
      depth.destroy(&mut self.device)?;
    }
    if let Some(scene) = self.scene.take() {
      scene.destroy(&mut self.device)?;
    }
    if let Some(program) = self.draw_program.take() {
      program.destroy(&mut self.device)?;
    }
    if let Some(program) = self.reduce_program.take() {
      program.destroy(&mut self.device)?;
    }
    if let Some(program) = self.cull_program.take() {
      program.destroy(&mut self.device)?;
    }
    Ok(())
  }

}
