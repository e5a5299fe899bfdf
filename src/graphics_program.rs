use std::sync::Arc;

use bytemuck::Pod;

use crate::compute_program::check_descriptors;
use crate::error::HalaRendererError;
use crate::gfx::{
  HalaCommandBuffer,
  HalaDepthState,
  HalaDescriptor,
  HalaDevice,
  HalaDrawKind,
  HalaGraphicsKernel,
  HalaIndirectCountInfo,
  HalaPipelineHandle,
};

/// The graphics program description.
#[derive(Debug, Clone, Copy)]
pub struct HalaGraphicsProgramDesc {
  pub depth_info: HalaDepthState,
}

impl Default for HalaGraphicsProgramDesc {
  fn default() -> Self {
    Self {
      depth_info: HalaDepthState::REVERSE_Z,
    }
  }
}

/// The graphics program.
pub struct HalaGraphicsProgram {
  kernel: Arc<dyn HalaGraphicsKernel>,
  pipeline: HalaPipelineHandle,
  pub debug_name: String,
}

/// The implementation of the graphics program.
impl HalaGraphicsProgram {

  /// Create a new graphics program.
  /// param device: The device.
  /// param kernel: The geometry kernel.
  /// param desc: The graphics program description.
  /// param debug_name: The debug name.
  /// return: The result of the graphics program.
  pub fn new<D: HalaDevice + ?Sized>(
    device: &mut D,
    kernel: Arc<dyn HalaGraphicsKernel>,
    desc: &HalaGraphicsProgramDesc,
    debug_name: &str,
  ) -> Result<Self, HalaRendererError> {
    let pipeline = device.create_graphics_pipeline(
      Arc::clone(&kernel),
      desc.depth_info,
      &format!("{}.graphics_pipeline", debug_name),
    )?;
    Ok(Self {
      kernel,
      pipeline,
      debug_name: debug_name.to_string(),
    })
  }

  /// Get the graphics pipeline.
  /// return: The graphics pipeline.
  pub fn get_pso(&self) -> HalaPipelineHandle {
    self.pipeline
  }

  pub fn draw_kind(&self) -> HalaDrawKind {
    self.kernel.draw_kind()
  }

  /// Bind the graphics program.
  /// param command_buffer: The command buffer.
  /// param descriptors: The descriptors, one per reflected binding.
  /// return: The result.
  pub fn bind(
    &self,
    command_buffer: &mut HalaCommandBuffer,
    descriptors: &[(u32, HalaDescriptor)],
  ) -> Result<(), HalaRendererError> {
    check_descriptors(&self.debug_name, self.kernel.bindings(), descriptors)?;
    command_buffer.bind_graphics_pipeline(self.pipeline);
    command_buffer.push_descriptors(descriptors);
    Ok(())
  }

  /// Push the constants of the program.
  /// param command_buffer: The command buffer.
  /// param data: The constants.
  pub fn push_constants<T: Pod>(&self, command_buffer: &mut HalaCommandBuffer, data: &T) {
    debug_assert_eq!(std::mem::size_of::<T>(), self.kernel.push_constant_size());
    command_buffer.push_constants(bytemuck::bytes_of(data));
  }

  /// Draw with the count read from a buffer.
  /// The indirect layout follows the kernel's draw kind.
  /// param command_buffer: The command buffer.
  /// param info: The indirect buffers.
  pub fn draw_indirect_count(&self, command_buffer: &mut HalaCommandBuffer, info: HalaIndirectCountInfo) {
    match self.kernel.draw_kind() {
      HalaDrawKind::Indexed => command_buffer.draw_indexed_indirect_count(info),
      HalaDrawKind::MeshTasks => command_buffer.draw_mesh_tasks_indirect_count(info),
    }
  }

  /// Destroy the pipeline.
  /// param device: The device.
  /// return: The result.
  pub fn destroy<D: HalaDevice + ?Sized>(self, device: &mut D) -> Result<(), HalaRendererError> {
    device.destroy_pipeline(self.pipeline)?;
    log::debug!("A HalaGraphicsProgram \"{}\" is dropped.", self.debug_name);
    Ok(())
  }

}
