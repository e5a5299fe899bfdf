use crate::gfx::flags::{
  HalaBufferUsageFlags,
  HalaImageUsageFlags,
  HalaFormat,
  HalaCompareOp,
};

/// The buffer handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HalaBufferHandle(pub(crate) u64);

/// The image handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HalaImageHandle(pub(crate) u64);

/// The image view handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HalaImageViewHandle(pub(crate) u64);

/// The pipeline handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HalaPipelineHandle(pub(crate) u64);

/// The buffer description.
#[derive(Debug, Clone)]
pub struct HalaBufferDesc {
  pub size: u64,
  pub usage: HalaBufferUsageFlags,
  pub debug_name: String,
}

/// The image description.
#[derive(Debug, Clone)]
pub struct HalaImageDesc {
  pub width: u32,
  pub height: u32,
  pub mip_levels: u32,
  pub format: HalaFormat,
  pub usage: HalaImageUsageFlags,
  pub debug_name: String,
}

/// The image view description.
/// A view covers the mip range [base_mip_level, base_mip_level + level_count).
#[derive(Debug, Clone)]
pub struct HalaImageViewDesc {
  pub image: HalaImageHandle,
  pub base_mip_level: u32,
  pub level_count: u32,
  pub debug_name: String,
}

/// The depth state of a graphics pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HalaDepthState {
  pub test_enable: bool,
  pub write_enable: bool,
  pub compare_op: HalaCompareOp,
}

/// The implementation of the depth state.
impl HalaDepthState {

  /// Depth state for a reverse-Z depth buffer cleared to zero.
  pub const REVERSE_Z: Self = Self {
    test_enable: true,
    write_enable: true,
    compare_op: HalaCompareOp::Greater,
  };

}

/// The device capabilities. Built once when the device is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HalaDeviceCapabilities {
  pub draw_indirect_count: bool,
  pub mesh_shader: bool,
  pub max_compute_work_group_invocations: u32,
  pub max_image_dimension_2d: u32,
}

impl Default for HalaDeviceCapabilities {
  fn default() -> Self {
    Self {
      draw_indirect_count: true,
      mesh_shader: true,
      max_compute_work_group_invocations: 1024,
      max_image_dimension_2d: 16384,
    }
  }
}
