pub use crate::error::HalaRendererError;
pub use crate::config::{
  HalaCullRendererConfig,
  HalaRenderPath,
};
pub use crate::renderer::{
  HalaCullRenderer,
  HalaRendererInfo,
  HalaRendererStatistics,
};
pub use crate::compute_program::HalaComputeProgram;
pub use crate::graphics_program::{
  HalaGraphicsProgramDesc,
  HalaGraphicsProgram,
};
pub use crate::culling::{
  HalaCamera,
  HalaDrawCommand,
  HalaFeatureToggles,
};
pub use crate::scene::{
  loader::HalaGltfLoader,
  HalaGeometry,
  HalaInstanceTable,
  HalaLodCascadeBuilder,
  HalaMeshSource,
  HalaScatterDesc,
};
pub use crate::gfx::{
  HalaDevice,
  HalaDeviceCapabilities,
  HalaGpuDevice,
  HalaSoftwareDevice,
  HalaValidationMode,
};
