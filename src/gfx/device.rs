use std::sync::Arc;

use crate::error::HalaRendererError;
use crate::gfx::command::HalaCommandBuffer;
use crate::gfx::kernel::{
  HalaComputeKernel,
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

/// The execution context used by the renderer.
/// Resources are created and destroyed explicitly. Destroying a handle twice is an error.
pub trait HalaDevice {

  /// The capabilities, fixed at device creation.
  fn capabilities(&self) -> &HalaDeviceCapabilities;

  fn create_buffer(&mut self, desc: &HalaBufferDesc) -> Result<HalaBufferHandle, HalaRendererError>;
  fn destroy_buffer(&mut self, buffer: HalaBufferHandle) -> Result<(), HalaRendererError>;

  fn create_image(&mut self, desc: &HalaImageDesc) -> Result<HalaImageHandle, HalaRendererError>;
  fn destroy_image(&mut self, image: HalaImageHandle) -> Result<(), HalaRendererError>;

  fn create_image_view(&mut self, desc: &HalaImageViewDesc) -> Result<HalaImageViewHandle, HalaRendererError>;
  fn destroy_image_view(&mut self, view: HalaImageViewHandle) -> Result<(), HalaRendererError>;

  fn create_compute_pipeline(
    &mut self,
    kernel: Arc<dyn HalaComputeKernel>,
    debug_name: &str,
  ) -> Result<HalaPipelineHandle, HalaRendererError>;
  fn create_graphics_pipeline(
    &mut self,
    kernel: Arc<dyn HalaGraphicsKernel>,
    depth_state: HalaDepthState,
    debug_name: &str,
  ) -> Result<HalaPipelineHandle, HalaRendererError>;
  fn destroy_pipeline(&mut self, pipeline: HalaPipelineHandle) -> Result<(), HalaRendererError>;

  /// Upload data through a staging copy and wait for it.
  /// param buffer: The destination buffer.
  /// param offset: The byte offset.
  /// param data: The data.
  /// return: The result.
  fn upload_buffer(&mut self, buffer: HalaBufferHandle, offset: u64, data: &[u8]) -> Result<(), HalaRendererError>;

  /// Read back buffer contents. Waits for the device, not meant for the frame loop.
  fn read_buffer(&self, buffer: HalaBufferHandle, offset: u64, size: u64) -> Result<Vec<u8>, HalaRendererError>;

  /// Read back one mip level of a float image. Waits for the device, not meant for the frame loop.
  fn read_image_level(&self, image: HalaImageHandle, mip_level: u32) -> Result<Vec<f32>, HalaRendererError>;

  /// Submit a recorded command buffer to the single queue.
  fn submit(&mut self, command_buffer: &HalaCommandBuffer) -> Result<(), HalaRendererError>;

  /// Block until all submitted work is finished.
  fn wait_idle(&mut self) -> Result<(), HalaRendererError>;

}
