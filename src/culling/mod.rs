pub mod cull_data;
pub mod draw_command;
pub mod cull_kernel;
pub mod reduce_kernel;
pub mod depth_pyramid;
pub mod draw_kernels;

pub use cull_data::{
  HalaCamera,
  HalaCullData,
  HalaDrawData,
  HalaFeatureToggles,
};
pub use draw_command::{
  HalaDrawCommand,
  HALA_DRAW_COMMAND_INDEXED_OFFSET,
  HALA_DRAW_COMMAND_TASKS_OFFSET,
};
pub use cull_kernel::{
  HalaDrawCullKernel,
  HALA_CULL_WORK_GROUP_SIZE,
};
pub use reduce_kernel::{
  HalaDepthReduceKernel,
  HalaReduceData,
};
pub use depth_pyramid::{
  HalaDepthPyramid,
  HalaDepthTarget,
};
pub use draw_kernels::{
  HalaIndexedDrawKernel,
  HalaMeshletDrawKernel,
};
