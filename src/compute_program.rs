use std::sync::Arc;

use bytemuck::Pod;

use crate::error::HalaRendererError;
use crate::gfx::{
  HalaCommandBuffer,
  HalaComputeKernel,
  HalaDescriptor,
  HalaDevice,
  HalaPipelineHandle,
};

/// Check the descriptors cover every reflected binding.
pub(crate) fn check_descriptors(
  name: &str,
  bindings: &[crate::gfx::HalaBindingDesc],
  descriptors: &[(u32, HalaDescriptor)],
) -> Result<(), HalaRendererError> {
  for binding in bindings {
    if !descriptors.iter().any(|(index, _)| *index == binding.binding) {
      return Err(HalaRendererError::new(
        &format!("The program \"{}\" misses binding {} \"{}\".", name, binding.binding, binding.name),
        None,
      ));
    }
  }
  Ok(())
}

/// The compute program.
pub struct HalaComputeProgram {
  kernel: Arc<dyn HalaComputeKernel>,
  pipeline: HalaPipelineHandle,
  pub debug_name: String,
}

/// The compute program implementation.
impl HalaComputeProgram {

  /// Create a new compute program.
  /// param device: The device.
  /// param kernel: The compute kernel.
  /// param debug_name: The debug name.
  /// return: The compute program.
  pub fn new<D: HalaDevice + ?Sized>(
    device: &mut D,
    kernel: Arc<dyn HalaComputeKernel>,
    debug_name: &str,
  ) -> Result<Self, HalaRendererError> {
    let pipeline = device.create_compute_pipeline(
      Arc::clone(&kernel),
      &format!("{}.compute_pipeline", debug_name),
    )?;
    Ok(Self {
      kernel,
      pipeline,
      debug_name: debug_name.to_string(),
    })
  }

  /// Get the compute pipeline.
  /// return: The compute pipeline.
  pub fn get_pso(&self) -> HalaPipelineHandle {
    self.pipeline
  }

  /// Get the work group size.
  pub fn local_size(&self) -> [u32; 2] {
    self.kernel.local_size()
  }

  /// Bind the compute program.
  /// param command_buffer: The command buffer.
  /// param descriptors: The descriptors, one per reflected binding.
  /// return: The result.
  pub fn bind(
    &self,
    command_buffer: &mut HalaCommandBuffer,
    descriptors: &[(u32, HalaDescriptor)],
  ) -> Result<(), HalaRendererError> {
    check_descriptors(&self.debug_name, self.kernel.bindings(), descriptors)?;
    command_buffer.bind_compute_pipeline(self.pipeline);
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

  /// Dispatch the compute program.
  /// param command_buffer: The command buffer.
  /// param group_count_x: The group count x.
  /// param group_count_y: The group count y.
  /// param group_count_z: The group count z.
  pub fn dispatch(
    &self,
    command_buffer: &mut HalaCommandBuffer,
    group_count_x: u32,
    group_count_y: u32,
    group_count_z: u32,
  ) {
    command_buffer.dispatch(group_count_x, group_count_y, group_count_z);
  }

  /// Dispatch enough work groups to cover a 2D invocation range.
  /// param command_buffer: The command buffer.
  /// param width: The invocation count in x.
  /// param height: The invocation count in y.
  pub fn dispatch_for(&self, command_buffer: &mut HalaCommandBuffer, width: u32, height: u32) {
    let [x, y] = self.kernel.local_size();
    self.dispatch(command_buffer, width.div_ceil(x), height.div_ceil(y), 1);
  }

  /// Destroy the pipeline.
  /// param device: The device.
  /// return: The result.
  pub fn destroy<D: HalaDevice + ?Sized>(self, device: &mut D) -> Result<(), HalaRendererError> {
    device.destroy_pipeline(self.pipeline)?;
    log::debug!("A HalaComputeProgram \"{}\" is dropped.", self.debug_name);
    Ok(())
  }

}
