use crate::gfx::barrier::{
  HalaBufferBarrierInfo,
  HalaImageBarrierInfo,
};
use crate::gfx::flags::HalaPipelineStageFlags;
use crate::gfx::kernel::HalaDescriptor;
use crate::gfx::resource::{
  HalaBufferHandle,
  HalaImageHandle,
  HalaImageViewHandle,
  HalaPipelineHandle,
};

/// The parameters of a count-indirect draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HalaIndirectCountInfo {
  pub buffer: HalaBufferHandle,
  pub offset: u64,
  pub count_buffer: HalaBufferHandle,
  pub count_offset: u64,
  pub max_draw_count: u32,
  pub stride: u32,
}

/// A recorded command.
#[derive(Debug, Clone)]
pub enum HalaCommand {
  FillBuffer {
    buffer: HalaBufferHandle,
    offset: u64,
    size: u64,
    data: u32,
  },
  ClearImage {
    image: HalaImageHandle,
    value: f32,
  },
  PipelineBarrier {
    src_stage_mask: HalaPipelineStageFlags,
    dst_stage_mask: HalaPipelineStageFlags,
    buffer_barriers: Vec<HalaBufferBarrierInfo>,
    image_barriers: Vec<HalaImageBarrierInfo>,
  },
  BindComputePipeline(HalaPipelineHandle),
  BindGraphicsPipeline(HalaPipelineHandle),
  BindIndexBuffer(HalaBufferHandle),
  PushDescriptors(Vec<(u32, HalaDescriptor)>),
  PushConstants(Vec<u8>),
  Dispatch([u32; 3]),
  BeginRendering {
    depth_view: HalaImageViewHandle,
    clear_depth: Option<f32>,
  },
  EndRendering,
  DrawIndexedIndirectCount(HalaIndirectCountInfo),
  DrawMeshTasksIndirectCount(HalaIndirectCountInfo),
}

/// A linear command recording, submitted as a whole.
pub struct HalaCommandBuffer {
  pub debug_name: String,
  pub(crate) commands: Vec<HalaCommand>,
}

/// The implementation of the command buffer.
impl HalaCommandBuffer {

  /// Create a new empty command buffer.
  /// param debug_name: The debug name.
  /// return: The command buffer.
  pub fn new(debug_name: &str) -> Self {
    Self {
      debug_name: debug_name.to_string(),
      commands: Vec::new(),
    }
  }

  /// Get the recorded commands.
  pub fn commands(&self) -> &[HalaCommand] {
    &self.commands
  }

  /// Drop all recorded commands.
  pub fn reset(&mut self) {
    self.commands.clear();
  }

  /// Fill a buffer range with a repeated word.
  /// param buffer: The buffer.
  /// param offset: The byte offset, a multiple of 4.
  /// param size: The byte size, a multiple of 4.
  /// param data: The word.
  pub fn fill_buffer(&mut self, buffer: HalaBufferHandle, offset: u64, size: u64, data: u32) {
    self.commands.push(HalaCommand::FillBuffer { buffer, offset, size, data });
  }

  /// Clear all mip levels of a float image. The image must be in General or TransferDst layout.
  pub fn clear_image(&mut self, image: HalaImageHandle, value: f32) {
    self.commands.push(HalaCommand::ClearImage { image, value });
  }

  /// Insert a pipeline barrier.
  /// param src_stage_mask: The stages whose work must complete.
  /// param dst_stage_mask: The stages that wait.
  /// param buffer_barriers: The buffer memory barriers.
  /// param image_barriers: The image memory barriers.
  pub fn pipeline_barrier(
    &mut self,
    src_stage_mask: HalaPipelineStageFlags,
    dst_stage_mask: HalaPipelineStageFlags,
    buffer_barriers: &[HalaBufferBarrierInfo],
    image_barriers: &[HalaImageBarrierInfo],
  ) {
    self.commands.push(HalaCommand::PipelineBarrier {
      src_stage_mask,
      dst_stage_mask,
      buffer_barriers: buffer_barriers.to_vec(),
      image_barriers: image_barriers.to_vec(),
    });
  }

  pub fn bind_compute_pipeline(&mut self, pipeline: HalaPipelineHandle) {
    self.commands.push(HalaCommand::BindComputePipeline(pipeline));
  }

  pub fn bind_graphics_pipeline(&mut self, pipeline: HalaPipelineHandle) {
    self.commands.push(HalaCommand::BindGraphicsPipeline(pipeline));
  }

  /// Bind the 32-bit index buffer used by indexed draws.
  /// param buffer: The buffer, created with the index buffer usage.
  pub fn bind_index_buffer(&mut self, buffer: HalaBufferHandle) {
    self.commands.push(HalaCommand::BindIndexBuffer(buffer));
  }

  /// Push descriptors for the bound pipeline, replacing earlier pushes.
  pub fn push_descriptors(&mut self, descriptors: &[(u32, HalaDescriptor)]) {
    self.commands.push(HalaCommand::PushDescriptors(descriptors.to_vec()));
  }

  pub fn push_constants(&mut self, data: &[u8]) {
    self.commands.push(HalaCommand::PushConstants(data.to_vec()));
  }

  pub fn dispatch(&mut self, group_count_x: u32, group_count_y: u32, group_count_z: u32) {
    self.commands.push(HalaCommand::Dispatch([group_count_x, group_count_y, group_count_z]));
  }

  /// Begin depth-only dynamic rendering.
  /// param depth_view: The depth attachment view.
  /// param clear_depth: The clear value, None loads the contents.
  pub fn begin_rendering(&mut self, depth_view: HalaImageViewHandle, clear_depth: Option<f32>) {
    self.commands.push(HalaCommand::BeginRendering { depth_view, clear_depth });
  }

  pub fn end_rendering(&mut self) {
    self.commands.push(HalaCommand::EndRendering);
  }

  /// Draw indexed primitives with arguments and count read from buffers.
  pub fn draw_indexed_indirect_count(&mut self, info: HalaIndirectCountInfo) {
    self.commands.push(HalaCommand::DrawIndexedIndirectCount(info));
  }

  /// Draw mesh tasks with arguments and count read from buffers.
  pub fn draw_mesh_tasks_indirect_count(&mut self, info: HalaIndirectCountInfo) {
    self.commands.push(HalaCommand::DrawMeshTasksIndirectCount(info));
  }

}
