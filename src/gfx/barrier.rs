use crate::gfx::flags::{
  HalaAccessFlags,
  HalaImageLayout,
};
use crate::gfx::resource::{
  HalaBufferHandle,
  HalaImageHandle,
};

/// The buffer memory barrier.
#[derive(Debug, Clone, Copy)]
pub struct HalaBufferBarrierInfo {
  pub buffer: HalaBufferHandle,
  pub src_access_mask: HalaAccessFlags,
  pub dst_access_mask: HalaAccessFlags,
}

/// The implementation of the buffer memory barrier.
impl HalaBufferBarrierInfo {

  /// Create a new buffer barrier.
  /// param buffer: The buffer.
  /// param src_access_mask: The source access mask.
  /// param dst_access_mask: The destination access mask.
  /// return: The buffer barrier.
  pub fn new(buffer: HalaBufferHandle, src_access_mask: HalaAccessFlags, dst_access_mask: HalaAccessFlags) -> Self {
    Self {
      buffer,
      src_access_mask,
      dst_access_mask,
    }
  }

}

/// The image memory barrier, optionally with a layout transition.
#[derive(Debug, Clone, Copy)]
pub struct HalaImageBarrierInfo {
  pub image: HalaImageHandle,
  pub src_access_mask: HalaAccessFlags,
  pub dst_access_mask: HalaAccessFlags,
  pub old_layout: HalaImageLayout,
  pub new_layout: HalaImageLayout,
  pub base_mip_level: u32,
  pub level_count: u32,
}

/// The implementation of the image memory barrier.
impl HalaImageBarrierInfo {

  /// Marker for "every remaining mip level".
  pub const REMAINING_MIP_LEVELS: u32 = u32::MAX;

  /// Create a new image barrier covering all mip levels.
  /// param image: The image.
  /// param src_access_mask: The source access mask.
  /// param dst_access_mask: The destination access mask.
  /// param old_layout: The old layout, Undefined discards the contents.
  /// param new_layout: The new layout.
  /// return: The image barrier.
  pub fn new(
    image: HalaImageHandle,
    src_access_mask: HalaAccessFlags,
    dst_access_mask: HalaAccessFlags,
    old_layout: HalaImageLayout,
    new_layout: HalaImageLayout,
  ) -> Self {
    Self {
      image,
      src_access_mask,
      dst_access_mask,
      old_layout,
      new_layout,
      base_mip_level: 0,
      level_count: Self::REMAINING_MIP_LEVELS,
    }
  }

  /// Restrict the barrier to a mip range.
  /// param base_mip_level: The first mip level.
  /// param level_count: The number of mip levels.
  /// return: The image barrier.
  pub fn with_mip_range(mut self, base_mip_level: u32, level_count: u32) -> Self {
    self.base_mip_level = base_mip_level;
    self.level_count = level_count;
    self
  }

}
