use std::num::NonZeroU64;

use crate::gfx::flags::{
  HalaBufferUsageFlags,
  HalaCompareOp,
  HalaDescriptorType,
  HalaFormat,
  HalaImageUsageFlags,
};
use crate::gfx::kernel::{
  HalaBindingDesc,
  HalaDrawIndexedIndirectCommand,
};

/// The smallest buffer the device allocates.
/// Runtime sized arrays need at least one element bound, even for empty scenes.
pub const HALA_GPU_MIN_BUFFER_SIZE: u64 = 256;

/// The byte size of one tightly packed indexed indirect record.
pub const HALA_GPU_INDEXED_RECORD_SIZE: u64 = std::mem::size_of::<HalaDrawIndexedIndirectCommand>() as u64;

/// Map buffer usages. Every buffer can be copied both ways for uploads and readbacks.
/// param usage: The usage flags.
/// return: The wgpu usages.
pub fn buffer_usages(usage: HalaBufferUsageFlags) -> wgpu::BufferUsages {
  let mut usages = wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST;
  if usage.contains(HalaBufferUsageFlags::UNIFORM_BUFFER) {
    usages |= wgpu::BufferUsages::UNIFORM;
  }
  if usage.contains(HalaBufferUsageFlags::STORAGE_BUFFER) {
    usages |= wgpu::BufferUsages::STORAGE;
  }
  if usage.contains(HalaBufferUsageFlags::INDEX_BUFFER) {
    usages |= wgpu::BufferUsages::INDEX;
  }
  if usage.contains(HalaBufferUsageFlags::INDIRECT_BUFFER) {
    usages |= wgpu::BufferUsages::INDIRECT;
  }
  usages
}

/// The allocated size of a buffer.
/// param size: The requested size.
/// return: The size, rounded up to the copy alignment and the minimum size.
pub fn buffer_allocation_size(size: u64) -> u64 {
  size.max(HALA_GPU_MIN_BUFFER_SIZE).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT)
}

/// Map image usages.
/// Float images that can be cleared are also render attachments, the clear is a load op.
/// param usage: The usage flags.
/// param format: The format.
/// return: The wgpu usages.
pub fn texture_usages(usage: HalaImageUsageFlags, format: HalaFormat) -> wgpu::TextureUsages {
  let mut usages = wgpu::TextureUsages::COPY_SRC;
  if usage.contains(HalaImageUsageFlags::TRANSFER_SRC) {
    usages |= wgpu::TextureUsages::COPY_SRC;
  }
  if usage.contains(HalaImageUsageFlags::TRANSFER_DST) {
    usages |= wgpu::TextureUsages::COPY_DST;
    if format == HalaFormat::R32Sfloat {
      usages |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
  }
  if usage.contains(HalaImageUsageFlags::SAMPLED) {
    usages |= wgpu::TextureUsages::TEXTURE_BINDING;
  }
  if usage.contains(HalaImageUsageFlags::STORAGE) {
    usages |= wgpu::TextureUsages::STORAGE_BINDING;
  }
  if usage.contains(HalaImageUsageFlags::DEPTH_STENCIL_ATTACHMENT) {
    usages |= wgpu::TextureUsages::RENDER_ATTACHMENT;
  }
  usages
}

pub fn texture_format(format: HalaFormat) -> wgpu::TextureFormat {
  match format {
    HalaFormat::D32Sfloat => wgpu::TextureFormat::Depth32Float,
    HalaFormat::R32Sfloat => wgpu::TextureFormat::R32Float,
  }
}

/// The aspect copied when reading an image back.
pub fn texture_aspect(format: HalaFormat) -> wgpu::TextureAspect {
  match format {
    HalaFormat::D32Sfloat => wgpu::TextureAspect::DepthOnly,
    HalaFormat::R32Sfloat => wgpu::TextureAspect::All,
  }
}

pub fn compare_function(compare_op: HalaCompareOp) -> wgpu::CompareFunction {
  match compare_op {
    HalaCompareOp::Greater => wgpu::CompareFunction::Greater,
    HalaCompareOp::Less => wgpu::CompareFunction::Less,
  }
}

/// Map a reflected binding to a bind group layout entry.
/// Sampled images are read with texture loads, so depth images bind as unfilterable floats.
/// param binding: The binding.
/// param visibility: The stages that see it.
/// return: The layout entry.
pub fn bind_group_layout_entry(binding: &HalaBindingDesc, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
  let ty = match binding.descriptor_type {
    HalaDescriptorType::StorageBuffer => wgpu::BindingType::Buffer {
      ty: wgpu::BufferBindingType::Storage { read_only: !binding.writable },
      has_dynamic_offset: false,
      min_binding_size: None,
    },
    HalaDescriptorType::SampledImage => wgpu::BindingType::Texture {
      sample_type: wgpu::TextureSampleType::Float { filterable: false },
      view_dimension: wgpu::TextureViewDimension::D2,
      multisampled: false,
    },
    HalaDescriptorType::StorageImage => wgpu::BindingType::StorageTexture {
      access: wgpu::StorageTextureAccess::WriteOnly,
      format: wgpu::TextureFormat::R32Float,
      view_dimension: wgpu::TextureViewDimension::D2,
    },
  };
  wgpu::BindGroupLayoutEntry {
    binding: binding.binding,
    visibility,
    ty,
    count: None,
  }
}

/// The layout entry of the uniform holding the push constants.
/// param size: The push constant size.
/// param visibility: The stages that see it.
/// return: The layout entry.
pub fn push_constant_layout_entry(size: usize, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
  wgpu::BindGroupLayoutEntry {
    binding: 0,
    visibility,
    ty: wgpu::BindingType::Buffer {
      ty: wgpu::BufferBindingType::Uniform,
      has_dynamic_offset: false,
      min_binding_size: NonZeroU64::new(size as u64),
    },
    count: None,
  }
}

/// The row pitch of an image readback.
/// param width: The width in texels of 4 bytes.
/// return: The unpadded and the padded bytes per row.
pub fn readback_row_pitch(width: u32) -> (u32, u32) {
  let unpadded = width * 4;
  (unpadded, unpadded.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT))
}

/// Check whether an indexed indirect range can be drawn without repacking.
/// param offset: The byte offset of the first record.
/// param stride: The byte stride.
/// return: True if the records are already tightly packed.
pub fn is_tightly_packed(offset: u64, stride: u32) -> bool {
  stride as u64 == HALA_GPU_INDEXED_RECORD_SIZE && offset % 4 == 0
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn every_buffer_can_be_read_back() {
    let usages = buffer_usages(HalaBufferUsageFlags::STORAGE_BUFFER | HalaBufferUsageFlags::INDIRECT_BUFFER);
    assert!(usages.contains(wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST));
    assert!(usages.contains(wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::INDIRECT));
    assert!(!usages.contains(wgpu::BufferUsages::INDEX));
    assert!(buffer_usages(HalaBufferUsageFlags::INDEX_BUFFER).contains(wgpu::BufferUsages::INDEX));
  }

  #[test]
  fn small_buffers_are_padded() {
    assert_eq!(buffer_allocation_size(4), HALA_GPU_MIN_BUFFER_SIZE);
    assert_eq!(buffer_allocation_size(1001), 1004);
    assert_eq!(buffer_allocation_size(4096), 4096);
  }

  #[test]
  fn clearable_pyramids_are_render_attachments() {
    let pyramid = texture_usages(
      HalaImageUsageFlags::STORAGE | HalaImageUsageFlags::SAMPLED | HalaImageUsageFlags::TRANSFER_DST,
      HalaFormat::R32Sfloat,
    );
    assert!(pyramid.contains(wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::STORAGE_BINDING));
    let depth = texture_usages(
      HalaImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | HalaImageUsageFlags::SAMPLED,
      HalaFormat::D32Sfloat,
    );
    assert!(depth.contains(wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING));
    assert!(!depth.contains(wgpu::TextureUsages::STORAGE_BINDING));
    assert_eq!(texture_aspect(HalaFormat::D32Sfloat), wgpu::TextureAspect::DepthOnly);
  }

  #[test]
  fn bindings_keep_their_access() {
    let read = bind_group_layout_entry(&HalaBindingDesc::storage_buffer(3, "read", false), wgpu::ShaderStages::COMPUTE);
    assert_eq!(read.binding, 3);
    assert!(matches!(
      read.ty,
      wgpu::BindingType::Buffer { ty: wgpu::BufferBindingType::Storage { read_only: true }, .. },
    ));
    let pyramid = bind_group_layout_entry(&HalaBindingDesc::sampled_image(4, "pyramid"), wgpu::ShaderStages::COMPUTE);
    assert!(matches!(
      pyramid.ty,
      wgpu::BindingType::Texture { sample_type: wgpu::TextureSampleType::Float { filterable: false }, .. },
    ));
    let uniform = push_constant_layout_entry(240, wgpu::ShaderStages::VERTEX);
    assert!(matches!(
      uniform.ty,
      wgpu::BindingType::Buffer { ty: wgpu::BufferBindingType::Uniform, min_binding_size: Some(size), .. } if size.get() == 240,
    ));
  }

  #[test]
  fn readback_rows_are_aligned() {
    assert_eq!(readback_row_pitch(64), (256, 256));
    assert_eq!(readback_row_pitch(65), (260, 512));
    assert_eq!(readback_row_pitch(1), (4, 256));
  }

  #[test]
  fn draw_commands_need_repacking() {
    assert!(is_tightly_packed(0, 20));
    assert!(!is_tightly_packed(4, 32));
  }
}
