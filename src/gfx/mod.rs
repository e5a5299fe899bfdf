pub mod flags;
pub mod resource;
pub mod barrier;
pub mod memory;
pub mod kernel;
pub mod command;
pub mod device;
pub mod software;
pub mod gpu;

pub use flags::{
  HalaAccessFlags,
  HalaBufferUsageFlags,
  HalaCompareOp,
  HalaDescriptorType,
  HalaFormat,
  HalaImageLayout,
  HalaImageUsageFlags,
  HalaPipelineStageFlags,
};
pub use resource::{
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
pub use barrier::{
  HalaBufferBarrierInfo,
  HalaImageBarrierInfo,
};
pub use memory::{
  HalaBufferView,
  HalaImageLevelView,
  HalaImageView,
};
pub use kernel::{
  for_each_invocation,
  read_push_constants,
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
pub use command::{
  HalaCommand,
  HalaCommandBuffer,
  HalaIndirectCountInfo,
};
pub use device::HalaDevice;
pub use software::{
  HalaHazard,
  HalaSoftwareDevice,
  HalaSoftwareDeviceStatistics,
  HalaValidationMode,
};
pub use gpu::{
  HalaGpuDevice,
  HalaGpuDeviceStatistics,
};
