use bitflags::bitflags;
use serde::{Serialize, Deserialize};

bitflags! {
  /// The pipeline stage flags.
  #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
  pub struct HalaPipelineStageFlags: u32 {
    const TOP_OF_PIPE = 1 << 0;
    const DRAW_INDIRECT = 1 << 1;
    const VERTEX_INPUT = 1 << 2;
    const VERTEX_SHADER = 1 << 3;
    const TASK_SHADER = 1 << 4;
    const MESH_SHADER = 1 << 5;
    const FRAGMENT_SHADER = 1 << 7;
    const EARLY_FRAGMENT_TESTS = 1 << 8;
    const LATE_FRAGMENT_TESTS = 1 << 9;
    const COMPUTE_SHADER = 1 << 11;
    const TRANSFER = 1 << 12;
    const BOTTOM_OF_PIPE = 1 << 13;
    const HOST = 1 << 14;
    const ALL_GRAPHICS = Self::DRAW_INDIRECT.bits()
      | Self::VERTEX_INPUT.bits()
      | Self::VERTEX_SHADER.bits()
      | Self::TASK_SHADER.bits()
      | Self::MESH_SHADER.bits()
      | Self::FRAGMENT_SHADER.bits()
      | Self::EARLY_FRAGMENT_TESTS.bits()
      | Self::LATE_FRAGMENT_TESTS.bits();
    const ALL_COMMANDS = Self::ALL_GRAPHICS.bits()
      | Self::COMPUTE_SHADER.bits()
      | Self::TRANSFER.bits();
  }
}

bitflags! {
  /// The memory access flags.
  #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
  pub struct HalaAccessFlags: u32 {
    const INDIRECT_COMMAND_READ = 1 << 0;
    const INDEX_READ = 1 << 1;
    const VERTEX_ATTRIBUTE_READ = 1 << 2;
    const UNIFORM_READ = 1 << 3;
    const SHADER_READ = 1 << 5;
    const SHADER_WRITE = 1 << 6;
    const DEPTH_STENCIL_ATTACHMENT_READ = 1 << 9;
    const DEPTH_STENCIL_ATTACHMENT_WRITE = 1 << 10;
    const TRANSFER_READ = 1 << 11;
    const TRANSFER_WRITE = 1 << 12;
    const HOST_READ = 1 << 13;
    const HOST_WRITE = 1 << 14;
    const MEMORY_READ = Self::INDIRECT_COMMAND_READ.bits()
      | Self::INDEX_READ.bits()
      | Self::VERTEX_ATTRIBUTE_READ.bits()
      | Self::UNIFORM_READ.bits()
      | Self::SHADER_READ.bits()
      | Self::DEPTH_STENCIL_ATTACHMENT_READ.bits()
      | Self::TRANSFER_READ.bits()
      | Self::HOST_READ.bits();
    const MEMORY_WRITE = Self::SHADER_WRITE.bits()
      | Self::DEPTH_STENCIL_ATTACHMENT_WRITE.bits()
      | Self::TRANSFER_WRITE.bits()
      | Self::HOST_WRITE.bits();
  }
}

bitflags! {
  /// The buffer usage flags.
  #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
  pub struct HalaBufferUsageFlags: u32 {
    const TRANSFER_SRC = 1 << 0;
    const TRANSFER_DST = 1 << 1;
    const UNIFORM_BUFFER = 1 << 4;
    const STORAGE_BUFFER = 1 << 5;
    const INDEX_BUFFER = 1 << 6;
    const INDIRECT_BUFFER = 1 << 8;
  }
}

bitflags! {
  /// The image usage flags.
  #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
  pub struct HalaImageUsageFlags: u32 {
    const TRANSFER_SRC = 1 << 0;
    const TRANSFER_DST = 1 << 1;
    const SAMPLED = 1 << 2;
    const STORAGE = 1 << 3;
    const DEPTH_STENCIL_ATTACHMENT = 1 << 5;
  }
}

/// The image layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HalaImageLayout {
  #[default]
  Undefined,
  General,
  DepthAttachmentOptimal,
  ShaderReadOnlyOptimal,
  TransferDstOptimal,
}

/// The texel format. Only single channel 32-bit formats are used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HalaFormat {
  D32Sfloat,
  R32Sfloat,
}

/// The compare operation used by the depth test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HalaCompareOp {
  Greater,
  Less,
}

/// The descriptor type of a kernel binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HalaDescriptorType {
  StorageBuffer,
  SampledImage,
  StorageImage,
}
