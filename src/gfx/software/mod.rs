mod raster;
pub mod validation;

use std::collections::{
  BTreeMap,
  HashMap,
  HashSet,
};
use std::sync::Arc;
use std::sync::atomic::{
  AtomicU32,
  AtomicU64,
  Ordering,
};

use rayon::prelude::*;

use crate::error::HalaRendererError;
use crate::gfx::command::{
  HalaCommand,
  HalaCommandBuffer,
  HalaIndirectCountInfo,
};
use crate::gfx::device::HalaDevice;
use crate::gfx::flags::{
  HalaAccessFlags,
  HalaBufferUsageFlags,
  HalaDescriptorType,
  HalaImageLayout,
  HalaPipelineStageFlags,
};
use crate::gfx::kernel::{
  HalaBindingDesc,
  HalaBoundResources,
  HalaComputeKernel,
  HalaDescriptor,
  HalaDrawIndexedIndirectCommand,
  HalaDrawKind,
  HalaDrawMeshTasksIndirectCommand,
  HalaDrawRecord,
  HalaGraphicsKernel,
};
use crate::gfx::memory::{
  alloc_words,
  read_bytes,
  write_bytes,
  HalaBufferView,
  HalaImageLevelView,
  HalaImageView,
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

pub use validation::{
  HalaHazard,
  HalaSyncValidator,
  HalaValidationMode,
};
use validation::{
  HalaAccess,
  HalaTrackedResource,
};

const SAMPLED_LAYOUTS: &[HalaImageLayout] = &[HalaImageLayout::ShaderReadOnlyOptimal, HalaImageLayout::General];
const STORAGE_LAYOUTS: &[HalaImageLayout] = &[HalaImageLayout::General];
const CLEAR_LAYOUTS: &[HalaImageLayout] = &[HalaImageLayout::General, HalaImageLayout::TransferDstOptimal];
const DEPTH_LAYOUTS: &[HalaImageLayout] = &[HalaImageLayout::DepthAttachmentOptimal];

struct HalaSoftwareBuffer {
  desc: HalaBufferDesc,
  words: Vec<AtomicU32>,
}

struct HalaSoftwareImageLevel {
  width: u32,
  height: u32,
  texels: Vec<AtomicU32>,
}

struct HalaSoftwareImage {
  desc: HalaImageDesc,
  levels: Vec<HalaSoftwareImageLevel>,
}

enum HalaSoftwarePipeline {
  Compute(Arc<dyn HalaComputeKernel>),
  Graphics(Arc<dyn HalaGraphicsKernel>, HalaDepthState),
}

/// The resource and work counters of the software device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HalaSoftwareDeviceStatistics {
  pub buffers_created: u64,
  pub buffers_destroyed: u64,
  pub images_created: u64,
  pub images_destroyed: u64,
  pub image_views_created: u64,
  pub image_views_destroyed: u64,
  pub submits: u64,
  pub dispatches: u64,
  pub draws: u64,
  pub triangles: u64,
  pub depth_samples_passed: u64,
}

#[derive(Default)]
struct HalaExecutionState {
  compute_pipeline: Option<HalaPipelineHandle>,
  graphics_pipeline: Option<HalaPipelineHandle>,
  index_buffer: Option<HalaBufferHandle>,
  descriptors: BTreeMap<u32, HalaDescriptor>,
  push_constants: Vec<u8>,
  rendering: Option<(HalaImageViewHandle, usize)>,
}

/// A device that executes recorded commands on the CPU.
///
/// Memory is kept as 32-bit atomic words, so kernel invocations running in parallel can use
/// atomics the way shaders do. Every submission is checked by a [`HalaSyncValidator`].
pub struct HalaSoftwareDevice {
  pub name: String,
  capabilities: HalaDeviceCapabilities,
  validator: HalaSyncValidator,
  next_handle: u64,
  buffers: HashMap<u64, HalaSoftwareBuffer>,
  images: HashMap<u64, HalaSoftwareImage>,
  image_views: HashMap<u64, HalaImageViewDesc>,
  pipelines: HashMap<u64, HalaSoftwarePipeline>,
  released: HashSet<u64>,
  statistics: HalaSoftwareDeviceStatistics,
}

/// The Drop implementation of the software device.
impl Drop for HalaSoftwareDevice {

  fn drop(&mut self) {
    let alive = self.buffers.len() + self.images.len() + self.image_views.len();
    if alive > 0 {
      log::warn!("The HalaSoftwareDevice \"{}\" is dropped with {} live resources.", self.name, alive);
    }
    log::debug!("A HalaSoftwareDevice \"{}\" is dropped.", self.name);
  }

}

/// The implementation of the software device.
impl HalaSoftwareDevice {

  /// Create a new software device.
  /// param name: The name of the device.
  /// param capabilities: The capabilities to report.
  /// param validation_mode: The validation mode.
  /// return: The device.
  pub fn new(name: &str, capabilities: HalaDeviceCapabilities, validation_mode: HalaValidationMode) -> Self {
    log::debug!("A HalaSoftwareDevice \"{}\" is created with {:?} validation.", name, validation_mode);
    Self {
      name: name.to_string(),
      capabilities,
      validator: HalaSyncValidator::new(validation_mode),
      next_handle: 1,
      buffers: HashMap::new(),
      images: HashMap::new(),
      image_views: HashMap::new(),
      pipelines: HashMap::new(),
      released: HashSet::new(),
      statistics: HalaSoftwareDeviceStatistics::default(),
    }
  }

  /// Get the hazards found so far.
  pub fn validation_hazards(&self) -> &[HalaHazard] {
    self.validator.hazards()
  }

  /// Take the hazards found so far.
  pub fn take_validation_hazards(&mut self) -> Vec<HalaHazard> {
    self.validator.take_hazards()
  }

  pub fn statistics(&self) -> &HalaSoftwareDeviceStatistics {
    &self.statistics
  }

  pub fn is_image_alive(&self, image: HalaImageHandle) -> bool {
    self.images.contains_key(&image.0)
  }

  pub fn is_image_view_alive(&self, view: HalaImageViewHandle) -> bool {
    self.image_views.contains_key(&view.0)
  }

  pub fn live_image_view_count(&self) -> usize {
    self.image_views.len()
  }

  /// Get the layout the validator tracks for an image level.
  pub fn image_layout(&self, image: HalaImageHandle, mip_level: u32) -> HalaImageLayout {
    self.validator.layout(HalaTrackedResource::ImageLevel(image.0, mip_level))
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

  fn buffer(&self, buffer: HalaBufferHandle) -> Result<&HalaSoftwareBuffer, HalaRendererError> {
    self.buffers.get(&buffer.0)
      .ok_or(HalaRendererError::new(&format!("The buffer {} is not alive.", buffer.0), None))
  }

  fn image(&self, image: HalaImageHandle) -> Result<&HalaSoftwareImage, HalaRendererError> {
    self.images.get(&image.0)
      .ok_or(HalaRendererError::new(&format!("The image {} is not alive.", image.0), None))
  }

  fn image_view(&self, view: HalaImageViewHandle) -> Result<&HalaImageViewDesc, HalaRendererError> {
    self.image_views.get(&view.0)
      .ok_or(HalaRendererError::new(&format!("The image view {} is not alive.", view.0), None))
  }

  fn level_name(image: &HalaSoftwareImage, level: u32) -> String {
    format!("{}[mip {}]", image.desc.debug_name, level)
  }

  /// Resolve an image view into its shader visible levels.
  fn view_levels(&self, view: HalaImageViewHandle) -> Result<HalaImageView<'_>, HalaRendererError> {
    let desc = self.image_view(view)?;
    let image = self.image(desc.image)?;
    let levels = image.levels[desc.base_mip_level as usize..(desc.base_mip_level + desc.level_count) as usize]
      .iter()
      .map(|level| HalaImageLevelView::new(level.width, level.height, &level.texels))
      .collect();
    Ok(HalaImageView::new(levels))
  }

  fn descriptor(
    binding: &HalaBindingDesc,
    state: &HalaExecutionState,
  ) -> Result<HalaDescriptor, HalaRendererError> {
    let descriptor = state.descriptors.get(&binding.binding)
      .copied()
      .ok_or(HalaRendererError::new(
        &format!("The binding {} \"{}\" has no descriptor.", binding.binding, binding.name),
        None,
      ))?;
    match (binding.descriptor_type, descriptor) {
      (HalaDescriptorType::StorageBuffer, HalaDescriptor::Buffer(_)) => Ok(descriptor),
      (HalaDescriptorType::SampledImage, HalaDescriptor::Image(_)) => Ok(descriptor),
      (HalaDescriptorType::StorageImage, HalaDescriptor::Image(_)) => Ok(descriptor),
      _ => Err(HalaRendererError::new(
        &format!("The binding {} \"{}\" expects a {:?}.", binding.binding, binding.name, binding.descriptor_type),
        None,
      )),
    }
  }

  fn bind_resources(
    &self,
    bindings: &[HalaBindingDesc],
    state: &HalaExecutionState,
  ) -> Result<HalaBoundResources<'_>, HalaRendererError> {
    let mut resources = HalaBoundResources::new();
    for binding in bindings {
      match Self::descriptor(binding, state)? {
        HalaDescriptor::Buffer(buffer) => {
          resources.insert_buffer(binding.binding, HalaBufferView::new(&self.buffer(buffer)?.words));
        }
        HalaDescriptor::Image(view) => {
          resources.insert_image(binding.binding, self.view_levels(view)?);
        }
      }
    }
    Ok(resources)
  }

  fn binding_accesses(
    &self,
    bindings: &[HalaBindingDesc],
    state: &HalaExecutionState,
    stage: HalaPipelineStageFlags,
  ) -> Result<Vec<HalaAccess>, HalaRendererError> {
    let mut accesses = Vec::new();
    for binding in bindings {
      match Self::descriptor(binding, state)? {
        HalaDescriptor::Buffer(buffer) => {
          let access = if binding.writable {
            HalaAccessFlags::SHADER_READ | HalaAccessFlags::SHADER_WRITE
          } else {
            HalaAccessFlags::SHADER_READ
          };
          accesses.push(HalaAccess {
            resource: HalaTrackedResource::Buffer(buffer.0),
            name: self.buffer(buffer)?.desc.debug_name.clone(),
            stage,
            access,
            write: binding.writable,
            layouts: None,
          });
        }
        HalaDescriptor::Image(view) => {
          let desc = self.image_view(view)?;
          let image = self.image(desc.image)?;
          let (access, layouts) = match binding.descriptor_type {
            HalaDescriptorType::StorageImage => (HalaAccessFlags::SHADER_WRITE, STORAGE_LAYOUTS),
            _ => (HalaAccessFlags::SHADER_READ, SAMPLED_LAYOUTS),
          };
          for level in desc.base_mip_level..desc.base_mip_level + desc.level_count {
            accesses.push(HalaAccess {
              resource: HalaTrackedResource::ImageLevel(desc.image.0, level),
              name: Self::level_name(image, level),
              stage,
              access,
              write: binding.writable,
              layouts: Some(layouts),
            });
          }
        }
      }
    }
    Ok(accesses)
  }

  fn depth_accesses(&self, view: HalaImageViewHandle) -> Result<Vec<HalaAccess>, HalaRendererError> {
    let desc = self.image_view(view)?;
    let image = self.image(desc.image)?;
    Ok((desc.base_mip_level..desc.base_mip_level + desc.level_count)
      .map(|level| HalaAccess {
        resource: HalaTrackedResource::ImageLevel(desc.image.0, level),
        name: Self::level_name(image, level),
        stage: HalaPipelineStageFlags::EARLY_FRAGMENT_TESTS | HalaPipelineStageFlags::LATE_FRAGMENT_TESTS,
        access: HalaAccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | HalaAccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        write: true,
        layouts: Some(DEPTH_LAYOUTS),
      })
      .collect())
  }

  fn compute_kernel(&self, state: &HalaExecutionState) -> Result<&Arc<dyn HalaComputeKernel>, HalaRendererError> {
    match state.compute_pipeline.and_then(|pipeline| self.pipelines.get(&pipeline.0)) {
      Some(HalaSoftwarePipeline::Compute(kernel)) => Ok(kernel),
      _ => Err(HalaRendererError::new("No compute pipeline is bound.", None)),
    }
  }

  fn graphics_kernel(
    &self,
    state: &HalaExecutionState,
  ) -> Result<(&Arc<dyn HalaGraphicsKernel>, HalaDepthState), HalaRendererError> {
    match state.graphics_pipeline.and_then(|pipeline| self.pipelines.get(&pipeline.0)) {
      Some(HalaSoftwarePipeline::Graphics(kernel, depth_state)) => Ok((kernel, *depth_state)),
      _ => Err(HalaRendererError::new("No graphics pipeline is bound.", None)),
    }
  }

  /// Feed the accesses and barriers of one command to the validator.
  fn validate_command(
    &mut self,
    index: usize,
    command: &HalaCommand,
    state: &HalaExecutionState,
  ) -> Result<(), HalaRendererError> {
    if !self.validator.is_enabled() {
      return Ok(());
    }

    let accesses = match command {
      HalaCommand::FillBuffer { buffer, .. } => vec![HalaAccess {
        resource: HalaTrackedResource::Buffer(buffer.0),
        name: self.buffer(*buffer)?.desc.debug_name.clone(),
        stage: HalaPipelineStageFlags::TRANSFER,
        access: HalaAccessFlags::TRANSFER_WRITE,
        write: true,
        layouts: None,
      }],
      HalaCommand::ClearImage { image, .. } => {
        let software_image = self.image(*image)?;
        (0..software_image.desc.mip_levels)
          .map(|level| HalaAccess {
            resource: HalaTrackedResource::ImageLevel(image.0, level),
            name: Self::level_name(software_image, level),
            stage: HalaPipelineStageFlags::TRANSFER,
            access: HalaAccessFlags::TRANSFER_WRITE,
            write: true,
            layouts: Some(CLEAR_LAYOUTS),
          })
          .collect()
      }
      HalaCommand::PipelineBarrier { src_stage_mask, dst_stage_mask, buffer_barriers, image_barriers } => {
        for barrier in buffer_barriers {
          self.buffer(barrier.buffer)?;
          self.validator.buffer_barrier(
            HalaTrackedResource::Buffer(barrier.buffer.0),
            *src_stage_mask,
            *dst_stage_mask,
            barrier.src_access_mask,
            barrier.dst_access_mask,
          );
        }
        for barrier in image_barriers {
          let image = self.image(barrier.image)?;
          let mip_levels = image.desc.mip_levels;
          let end = barrier.base_mip_level.saturating_add(barrier.level_count).min(mip_levels);
          let names = (barrier.base_mip_level..end)
            .map(|level| (level, Self::level_name(image, level)))
            .collect::<Vec<_>>();
          for (level, name) in names {
            self.validator.image_barrier(
              index,
              HalaTrackedResource::ImageLevel(barrier.image.0, level),
              &name,
              *src_stage_mask,
              *dst_stage_mask,
              barrier.src_access_mask,
              barrier.dst_access_mask,
              barrier.old_layout,
              barrier.new_layout,
            );
          }
        }
        Vec::new()
      }
      HalaCommand::Dispatch(_) => {
        let kernel = Arc::clone(self.compute_kernel(state)?);
        self.binding_accesses(kernel.bindings(), state, HalaPipelineStageFlags::COMPUTE_SHADER)?
      }
      HalaCommand::BeginRendering { depth_view, .. } => self.depth_accesses(*depth_view)?,
      HalaCommand::DrawIndexedIndirectCount(info) | HalaCommand::DrawMeshTasksIndirectCount(info) => {
        let (kernel, _) = self.graphics_kernel(state)?;
        let kernel = Arc::clone(kernel);
        let (depth_view, pass_index) = state.rendering
          .ok_or(HalaRendererError::new("Draw outside of a rendering scope.", None))?;
        let stage = match kernel.draw_kind() {
          HalaDrawKind::Indexed => HalaPipelineStageFlags::VERTEX_SHADER,
          HalaDrawKind::MeshTasks => HalaPipelineStageFlags::TASK_SHADER | HalaPipelineStageFlags::MESH_SHADER,
        };
        let mut accesses = self.binding_accesses(kernel.bindings(), state, stage)?;
        if let (HalaDrawKind::Indexed, Some(buffer)) = (kernel.draw_kind(), state.index_buffer) {
          accesses.push(HalaAccess {
            resource: HalaTrackedResource::Buffer(buffer.0),
            name: self.buffer(buffer)?.desc.debug_name.clone(),
            stage: HalaPipelineStageFlags::VERTEX_INPUT,
            access: HalaAccessFlags::INDEX_READ,
            write: false,
            layouts: None,
          });
        }
        for buffer in [info.buffer, info.count_buffer] {
          accesses.push(HalaAccess {
            resource: HalaTrackedResource::Buffer(buffer.0),
            name: self.buffer(buffer)?.desc.debug_name.clone(),
            stage: HalaPipelineStageFlags::DRAW_INDIRECT,
            access: HalaAccessFlags::INDIRECT_COMMAND_READ,
            write: false,
            layouts: None,
          });
        }
        // Attachment accesses are ordered with the rest of the rendering scope.
        for access in self.depth_accesses(depth_view)? {
          self.validator.access(pass_index, &access);
        }
        accesses
      }
      _ => Vec::new(),
    };

    for access in &accesses {
      self.validator.access(index, access);
    }
    Ok(())
  }

  fn execute_dispatch(&self, state: &HalaExecutionState, group_count: [u32; 3]) -> Result<(), HalaRendererError> {
    let kernel = self.compute_kernel(state)?;
    if state.push_constants.len() < kernel.push_constant_size() {
      return Err(HalaRendererError::new(
        &format!("The kernel \"{}\" needs {} bytes of push constants.", kernel.name(), kernel.push_constant_size()),
        None,
      ));
    }
    let resources = self.bind_resources(kernel.bindings(), state)?;
    kernel.execute(&resources, &state.push_constants, group_count)
  }

  fn execute_draw(
    &self,
    state: &HalaExecutionState,
    info: &HalaIndirectCountInfo,
    kind: HalaDrawKind,
  ) -> Result<(u64, u64, u64), HalaRendererError> {
    let (kernel, depth_state) = self.graphics_kernel(state)?;
    if kernel.draw_kind() != kind {
      return Err(HalaRendererError::new(
        &format!("The pipeline \"{}\" does not consume {:?} draws.", kernel.name(), kind),
        None,
      ));
    }
    let (depth_view, _) = state.rendering
      .ok_or(HalaRendererError::new("Draw outside of a rendering scope.", None))?;
    if kind == HalaDrawKind::Indexed && state.index_buffer.is_none() {
      return Err(HalaRendererError::new("Indexed draw without an index buffer.", None));
    }
    let depth = self.view_levels(depth_view)?;
    let target = depth.level(0)
      .ok_or(HalaRendererError::new("The depth attachment has no level.", None))?;
    if info.offset % 4 != 0 || info.count_offset % 4 != 0 || info.stride % 4 != 0 {
      return Err(HalaRendererError::new("Indirect offsets and stride must be multiples of 4.", None));
    }

    let count = HalaBufferView::new(&self.buffer(info.count_buffer)?.words).load((info.count_offset / 4) as usize);
    let draw_count = count.min(info.max_draw_count);
    let commands = &self.buffer(info.buffer)?.words;
    let record_words = match kind {
      HalaDrawKind::Indexed => std::mem::size_of::<HalaDrawIndexedIndirectCommand>() / 4,
      HalaDrawKind::MeshTasks => std::mem::size_of::<HalaDrawMeshTasksIndirectCommand>() / 4,
    };
    let last = (info.offset / 4) as usize + draw_count.saturating_sub(1) as usize * (info.stride / 4) as usize;
    if draw_count > 0 && last + record_words > commands.len() {
      return Err(HalaRendererError::new("The indirect draw reads past the end of its buffer.", None));
    }

    let resources = self.bind_resources(kernel.bindings(), state)?;
    let triangles = AtomicU64::new(0);
    let passed = AtomicU64::new(0);
    (0..draw_count).into_par_iter().try_for_each(|draw_id| {
      let base = (info.offset / 4) as usize + draw_id as usize * (info.stride / 4) as usize;
      let view = HalaBufferView::new(&commands[base..]);
      let record = match kind {
        HalaDrawKind::Indexed => HalaDrawRecord::Indexed(view.read(0)),
        HalaDrawKind::MeshTasks => HalaDrawRecord::MeshTasks(view.read(0)),
      };
      let mut local_triangles = 0;
      let mut local_passed = 0;
      kernel.assemble(&resources, &state.push_constants, draw_id, &record, &mut |triangle| {
        local_triangles += 1;
        local_passed += raster::rasterize_triangle(triangle, target, &depth_state);
      })?;
      triangles.fetch_add(local_triangles, Ordering::Relaxed);
      passed.fetch_add(local_passed, Ordering::Relaxed);
      Ok::<(), HalaRendererError>(())
    })?;

    Ok((draw_count as u64, triangles.into_inner(), passed.into_inner()))
  }

  fn execute_command(
    &self,
    index: usize,
    state: &mut HalaExecutionState,
    command: &HalaCommand,
    statistics: &mut HalaSoftwareDeviceStatistics,
  ) -> Result<(), HalaRendererError> {
    match command {
      HalaCommand::FillBuffer { buffer, offset, size, data } => {
        if offset % 4 != 0 || size % 4 != 0 {
          return Err(HalaRendererError::new("Fill offset and size must be multiples of 4.", None));
        }
        let words = &self.buffer(*buffer)?.words;
        let range = (offset / 4) as usize..((offset + size) / 4) as usize;
        let words = words.get(range)
          .ok_or(HalaRendererError::new("The fill range is out of the buffer.", None))?;
        words.par_iter().for_each(|word| word.store(*data, Ordering::Relaxed));
      }
      HalaCommand::ClearImage { image, value } => {
        for level in self.image(*image)?.levels.iter() {
          level.texels.par_iter().for_each(|texel| texel.store(value.to_bits(), Ordering::Relaxed));
        }
      }
      HalaCommand::PipelineBarrier { .. } => (),
      HalaCommand::BindComputePipeline(pipeline) => {
        match self.pipelines.get(&pipeline.0) {
          Some(HalaSoftwarePipeline::Compute(_)) => state.compute_pipeline = Some(*pipeline),
          _ => return Err(HalaRendererError::new(&format!("The pipeline {} is not a compute pipeline.", pipeline.0), None)),
        }
      }
      HalaCommand::BindGraphicsPipeline(pipeline) => {
        match self.pipelines.get(&pipeline.0) {
          Some(HalaSoftwarePipeline::Graphics(..)) => state.graphics_pipeline = Some(*pipeline),
          _ => return Err(HalaRendererError::new(&format!("The pipeline {} is not a graphics pipeline.", pipeline.0), None)),
        }
      }
      HalaCommand::BindIndexBuffer(buffer) => {
        let desc = &self.buffer(*buffer)?.desc;
        if !desc.usage.contains(HalaBufferUsageFlags::INDEX_BUFFER) {
          return Err(HalaRendererError::new(
            &format!("The buffer \"{}\" is not an index buffer.", desc.debug_name),
            None,
          ));
        }
        state.index_buffer = Some(*buffer);
      }
      HalaCommand::PushDescriptors(descriptors) => {
        state.descriptors = descriptors.iter().copied().collect();
      }
      HalaCommand::PushConstants(data) => {
        state.push_constants = data.clone();
      }
      HalaCommand::Dispatch(group_count) => {
        self.execute_dispatch(state, *group_count)?;
        statistics.dispatches += 1;
      }
      HalaCommand::BeginRendering { depth_view, clear_depth } => {
        if state.rendering.is_some() {
          return Err(HalaRendererError::new("Rendering scopes can not be nested.", None));
        }
        if let Some(value) = clear_depth {
          let levels = self.view_levels(*depth_view)?;
          for level in 0..levels.level_count() {
            if let Some(level) = levels.level(level) {
              for y in 0..level.height {
                for x in 0..level.width {
                  level.store(x, y, *value);
                }
              }
            }
          }
        }
        state.rendering = Some((*depth_view, index));
      }
      HalaCommand::EndRendering => {
        if state.rendering.take().is_none() {
          return Err(HalaRendererError::new("End of rendering without a begin.", None));
        }
      }
      HalaCommand::DrawIndexedIndirectCount(info) => {
        let (draws, triangles, passed) = self.execute_draw(state, info, HalaDrawKind::Indexed)?;
        statistics.draws += draws;
        statistics.triangles += triangles;
        statistics.depth_samples_passed += passed;
      }
      HalaCommand::DrawMeshTasksIndirectCount(info) => {
        let (draws, triangles, passed) = self.execute_draw(state, info, HalaDrawKind::MeshTasks)?;
        statistics.draws += draws;
        statistics.triangles += triangles;
        statistics.depth_samples_passed += passed;
      }
    }
    Ok(())
  }

}

/// The implementation of the device trait for the software device.
impl HalaDevice for HalaSoftwareDevice {

  fn capabilities(&self) -> &HalaDeviceCapabilities {
    &self.capabilities
  }

  fn create_buffer(&mut self, desc: &HalaBufferDesc) -> Result<HalaBufferHandle, HalaRendererError> {
    if desc.size == 0 {
      return Err(HalaRendererError::new(&format!("The buffer \"{}\" has zero size.", desc.debug_name), None));
    }
    let handle = self.alloc_handle();
    self.buffers.insert(handle, HalaSoftwareBuffer {
      desc: desc.clone(),
      words: alloc_words(desc.size),
    });
    self.statistics.buffers_created += 1;
    log::debug!("A HalaBuffer \"{}\"[{} bytes] is created.", desc.debug_name, desc.size);
    Ok(HalaBufferHandle(handle))
  }

  fn destroy_buffer(&mut self, buffer: HalaBufferHandle) -> Result<(), HalaRendererError> {
    let removed = self.buffers.remove(&buffer.0)
      .ok_or_else(|| self.release_error(buffer.0, "buffer"))?;
    self.released.insert(buffer.0);
    self.validator.forget(HalaTrackedResource::Buffer(buffer.0));
    self.statistics.buffers_destroyed += 1;
    log::debug!("A HalaBuffer \"{}\" is dropped.", removed.desc.debug_name);
    Ok(())
  }

  fn create_image(&mut self, desc: &HalaImageDesc) -> Result<HalaImageHandle, HalaRendererError> {
    let max_dimension = self.capabilities.max_image_dimension_2d;
    if desc.width == 0 || desc.height == 0 || desc.width > max_dimension || desc.height > max_dimension {
      return Err(HalaRendererError::new(
        &format!("The image \"{}\" has an invalid extent {} x {}.", desc.debug_name, desc.width, desc.height),
        None,
      ));
    }
    let max_levels = 32 - desc.width.max(desc.height).leading_zeros();
    if desc.mip_levels == 0 || desc.mip_levels > max_levels {
      return Err(HalaRendererError::new(
        &format!("The image \"{}\" can not have {} mip levels.", desc.debug_name, desc.mip_levels),
        None,
      ));
    }
    let levels = (0..desc.mip_levels)
      .map(|level| {
        let width = (desc.width >> level).max(1);
        let height = (desc.height >> level).max(1);
        HalaSoftwareImageLevel {
          width,
          height,
          texels: alloc_words(width as u64 * height as u64 * 4),
        }
      })
      .collect();
    let handle = self.alloc_handle();
    self.images.insert(handle, HalaSoftwareImage { desc: desc.clone(), levels });
    self.statistics.images_created += 1;
    log::debug!(
      "A HalaImage \"{}\"[{} x {}, {} mips] is created.",
      desc.debug_name, desc.width, desc.height, desc.mip_levels,
    );
    Ok(HalaImageHandle(handle))
  }

  fn destroy_image(&mut self, image: HalaImageHandle) -> Result<(), HalaRendererError> {
    let views = self.image_views.values().filter(|view| view.image == image).count();
    if views > 0 {
      return Err(HalaRendererError::new(
        &format!("The image {} still has {} live views.", image.0, views),
        None,
      ));
    }
    let removed = self.images.remove(&image.0)
      .ok_or_else(|| self.release_error(image.0, "image"))?;
    self.released.insert(image.0);
    for level in 0..removed.desc.mip_levels {
      self.validator.forget(HalaTrackedResource::ImageLevel(image.0, level));
    }
    self.statistics.images_destroyed += 1;
    log::debug!("A HalaImage \"{}\" is dropped.", removed.desc.debug_name);
    Ok(())
  }

  fn create_image_view(&mut self, desc: &HalaImageViewDesc) -> Result<HalaImageViewHandle, HalaRendererError> {
    let mip_levels = self.image(desc.image)?.desc.mip_levels;
    if desc.level_count == 0 || desc.base_mip_level.saturating_add(desc.level_count) > mip_levels {
      return Err(HalaRendererError::new(
        &format!(
          "The image view \"{}\" covers mips {}..{} of an image with {}.",
          desc.debug_name, desc.base_mip_level, desc.base_mip_level.saturating_add(desc.level_count), mip_levels,
        ),
        None,
      ));
    }
    let handle = self.alloc_handle();
    self.image_views.insert(handle, desc.clone());
    self.statistics.image_views_created += 1;
    log::debug!("A HalaImageView \"{}\" is created.", desc.debug_name);
    Ok(HalaImageViewHandle(handle))
  }

  fn destroy_image_view(&mut self, view: HalaImageViewHandle) -> Result<(), HalaRendererError> {
    let removed = self.image_views.remove(&view.0)
      .ok_or_else(|| self.release_error(view.0, "image view"))?;
    self.released.insert(view.0);
    self.statistics.image_views_destroyed += 1;
    log::debug!("A HalaImageView \"{}\" is dropped.", removed.debug_name);
    Ok(())
  }

  fn create_compute_pipeline(
    &mut self,
    kernel: Arc<dyn HalaComputeKernel>,
    debug_name: &str,
  ) -> Result<HalaPipelineHandle, HalaRendererError> {
    let [x, y] = kernel.local_size();
    if x == 0 || y == 0 || x * y > self.capabilities.max_compute_work_group_invocations {
      return Err(HalaRendererError::new(
        &format!("The kernel \"{}\" has an unsupported work group size {} x {}.", kernel.name(), x, y),
        None,
      ));
    }
    let handle = self.alloc_handle();
    self.pipelines.insert(handle, HalaSoftwarePipeline::Compute(kernel));
    log::debug!("A HalaComputePipeline \"{}\" is created.", debug_name);
    Ok(HalaPipelineHandle(handle))
  }

  fn create_graphics_pipeline(
    &mut self,
    kernel: Arc<dyn HalaGraphicsKernel>,
    depth_state: HalaDepthState,
    debug_name: &str,
  ) -> Result<HalaPipelineHandle, HalaRendererError> {
    if kernel.draw_kind() == HalaDrawKind::MeshTasks && !self.capabilities.mesh_shader {
      return Err(HalaRendererError::new(
        &format!("The pipeline \"{}\" needs mesh shader support.", debug_name),
        None,
      ));
    }
    let handle = self.alloc_handle();
    self.pipelines.insert(handle, HalaSoftwarePipeline::Graphics(kernel, depth_state));
    log::debug!("A HalaGraphicsPipeline \"{}\" is created.", debug_name);
    Ok(HalaPipelineHandle(handle))
  }

  fn destroy_pipeline(&mut self, pipeline: HalaPipelineHandle) -> Result<(), HalaRendererError> {
    if self.pipelines.remove(&pipeline.0).is_none() {
      return Err(self.release_error(pipeline.0, "pipeline"));
    }
    self.released.insert(pipeline.0);
    Ok(())
  }

  fn upload_buffer(&mut self, buffer: HalaBufferHandle, offset: u64, data: &[u8]) -> Result<(), HalaRendererError> {
    let target = self.buffer(buffer)?;
    if offset + data.len() as u64 > target.desc.size {
      return Err(HalaRendererError::new(
        &format!("The upload of {} bytes at {} overflows the buffer \"{}\".", data.len(), offset, target.desc.debug_name),
        None,
      ));
    }
    write_bytes(&target.words, offset, data);
    self.validator.host_write(HalaTrackedResource::Buffer(buffer.0));
    Ok(())
  }

  fn read_buffer(&self, buffer: HalaBufferHandle, offset: u64, size: u64) -> Result<Vec<u8>, HalaRendererError> {
    let source = self.buffer(buffer)?;
    if offset + size > source.desc.size {
      return Err(HalaRendererError::new(
        &format!("The read of {} bytes at {} overflows the buffer \"{}\".", size, offset, source.desc.debug_name),
        None,
      ));
    }
    Ok(read_bytes(&source.words, offset, size))
  }

  fn read_image_level(&self, image: HalaImageHandle, mip_level: u32) -> Result<Vec<f32>, HalaRendererError> {
    let level = self.image(image)?.levels.get(mip_level as usize)
      .ok_or(HalaRendererError::new(&format!("The image {} has no mip {}.", image.0, mip_level), None))?;
    Ok(level.texels.iter().map(|texel| f32::from_bits(texel.load(Ordering::Relaxed))).collect())
  }

  fn submit(&mut self, command_buffer: &HalaCommandBuffer) -> Result<(), HalaRendererError> {
    let mut state = HalaExecutionState::default();
    let mut statistics = self.statistics;
    for (index, command) in command_buffer.commands().iter().enumerate() {
      let known_hazards = self.validator.hazards().len();
      self.validate_command(index, command, &state)?;
      if self.validator.mode() == HalaValidationMode::Strict && self.validator.hazards().len() > known_hazards {
        let hazard = &self.validator.hazards()[known_hazards];
        return Err(HalaRendererError::new(
          &format!("The submission \"{}\" failed validation at {}.", command_buffer.debug_name, hazard),
          None,
        ));
      }
      self.execute_command(index, &mut state, command, &mut statistics)?;
    }
    if state.rendering.is_some() {
      return Err(HalaRendererError::new(
        &format!("The submission \"{}\" ends inside a rendering scope.", command_buffer.debug_name),
        None,
      ));
    }
    statistics.submits += 1;
    self.statistics = statistics;
    Ok(())
  }

  fn wait_idle(&mut self) -> Result<(), HalaRendererError> {
    self.validator.device_idle();
    Ok(())
  }

}
