use std::collections::BTreeMap;

use bytemuck::{Pod, Zeroable};
use rayon::prelude::*;

use crate::error::HalaRendererError;
use crate::gfx::flags::HalaDescriptorType;
use crate::gfx::memory::{
  HalaBufferView,
  HalaImageView,
};
use crate::gfx::resource::{
  HalaBufferHandle,
  HalaImageViewHandle,
};

/// The reflected description of one kernel binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HalaBindingDesc {
  pub binding: u32,
  pub descriptor_type: HalaDescriptorType,
  pub writable: bool,
  pub name: &'static str,
}

/// The implementation of the binding description.
impl HalaBindingDesc {

  pub const fn storage_buffer(binding: u32, name: &'static str, writable: bool) -> Self {
    Self { binding, descriptor_type: HalaDescriptorType::StorageBuffer, writable, name }
  }

  pub const fn sampled_image(binding: u32, name: &'static str) -> Self {
    Self { binding, descriptor_type: HalaDescriptorType::SampledImage, writable: false, name }
  }

  pub const fn storage_image(binding: u32, name: &'static str) -> Self {
    Self { binding, descriptor_type: HalaDescriptorType::StorageImage, writable: true, name }
  }

}

/// A resource pushed to a binding slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalaDescriptor {
  Buffer(HalaBufferHandle),
  Image(HalaImageViewHandle),
}

/// The resources visible to one kernel execution, keyed by binding index.
#[derive(Default)]
pub struct HalaBoundResources<'a> {
  buffers: BTreeMap<u32, HalaBufferView<'a>>,
  images: BTreeMap<u32, HalaImageView<'a>>,
}

/// The implementation of the bound resources.
impl<'a> HalaBoundResources<'a> {

  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert_buffer(&mut self, binding: u32, view: HalaBufferView<'a>) {
    self.buffers.insert(binding, view);
  }

  pub fn insert_image(&mut self, binding: u32, view: HalaImageView<'a>) {
    self.images.insert(binding, view);
  }

  /// Get the buffer bound at a binding.
  /// param binding: The binding index.
  /// return: The buffer view.
  pub fn buffer(&self, binding: u32) -> Result<HalaBufferView<'a>, HalaRendererError> {
    self.buffers.get(&binding)
      .copied()
      .ok_or(HalaRendererError::new(&format!("No buffer is bound at binding {}.", binding), None))
  }

  /// Get the image bound at a binding.
  /// param binding: The binding index.
  /// return: The image view.
  pub fn image(&self, binding: u32) -> Result<&HalaImageView<'a>, HalaRendererError> {
    self.images.get(&binding)
      .ok_or(HalaRendererError::new(&format!("No image is bound at binding {}.", binding), None))
  }

}

/// Decode push constants into their record type.
/// param data: The pushed bytes.
/// return: The record.
pub fn read_push_constants<T: Pod>(data: &[u8]) -> Result<T, HalaRendererError> {
  let size = std::mem::size_of::<T>();
  if data.len() < size {
    return Err(HalaRendererError::new(
      &format!("Push constants hold {} bytes, {} are required.", data.len(), size),
      None,
    ));
  }
  Ok(bytemuck::pod_read_unaligned(&data[..size]))
}

/// Run a kernel body once per invocation of a 2D dispatch, in parallel.
/// param group_count: The dispatched work group count, z is ignored.
/// param local_size: The work group size.
/// param body: The invocation body, called with the global invocation id.
pub fn for_each_invocation<F>(group_count: [u32; 3], local_size: [u32; 2], body: F)
where
  F: Fn([u32; 2]) + Sync + Send,
{
  let size_x = (group_count[0] * local_size[0]) as usize;
  let size_y = (group_count[1] * local_size[1]) as usize;
  if size_x == 0 || size_y == 0 {
    return;
  }
  (0..size_x * size_y).into_par_iter().for_each(|i| {
    body([(i % size_x) as u32, (i / size_x) as u32]);
  });
}

/// A compute kernel. Carries the reflection data of a compute shader, its CPU body and,
/// for GPU devices, its WGSL source.
pub trait HalaComputeKernel: Send + Sync {

  /// The debug name.
  fn name(&self) -> &str;

  /// The reflected bindings.
  fn bindings(&self) -> &[HalaBindingDesc];

  /// The reflected push constant size in bytes.
  fn push_constant_size(&self) -> usize;

  /// The work group size.
  fn local_size(&self) -> [u32; 2];

  /// The WGSL source compiled by GPU devices, entry point `main`.
  /// Bindings live in group 0, push constants in a uniform at group 1 binding 0.
  fn shader_source(&self) -> Option<&'static str> {
    None
  }

  /// Execute a dispatch.
  /// param resources: The bound resources.
  /// param push_constants: The pushed constants.
  /// param group_count: The work group count.
  /// return: The result.
  fn execute(
    &self,
    resources: &HalaBoundResources,
    push_constants: &[u8],
    group_count: [u32; 3],
  ) -> Result<(), HalaRendererError>;

}

/// The indexed indirect draw arguments.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct HalaDrawIndexedIndirectCommand {
  pub index_count: u32,
  pub instance_count: u32,
  pub first_index: u32,
  pub vertex_offset: i32,
  pub first_instance: u32,
}

/// The mesh tasks indirect draw arguments.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct HalaDrawMeshTasksIndirectCommand {
  pub task_count: u32,
  pub first_task: u32,
}

/// Which indirect argument layout a graphics kernel consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalaDrawKind {
  Indexed,
  MeshTasks,
}

/// One indirect draw as fetched by the device.
#[derive(Debug, Clone, Copy)]
pub enum HalaDrawRecord {
  Indexed(HalaDrawIndexedIndirectCommand),
  MeshTasks(HalaDrawMeshTasksIndirectCommand),
}

/// A graphics kernel. Describes the geometry stages of a graphics pipeline.
/// It turns one indirect draw into clip-space triangles, rasterization is done by the device.
pub trait HalaGraphicsKernel: Send + Sync {

  /// The debug name.
  fn name(&self) -> &str;

  /// The reflected bindings.
  fn bindings(&self) -> &[HalaBindingDesc];

  /// The reflected push constant size in bytes.
  fn push_constant_size(&self) -> usize;

  /// The indirect argument layout.
  fn draw_kind(&self) -> HalaDrawKind;

  /// The WGSL source compiled by GPU devices, vertex entry point `vs_main`.
  /// The layout rules are the ones of [`HalaComputeKernel::shader_source`].
  fn shader_source(&self) -> Option<&'static str> {
    None
  }

  /// Assemble the triangles of one draw.
  /// param resources: The bound resources.
  /// param push_constants: The pushed constants.
  /// param draw_id: The index of the draw inside the indirect buffer.
  /// param record: The indirect arguments.
  /// param emit: Receives each clip-space triangle.
  /// return: The result.
  fn assemble(
    &self,
    resources: &HalaBoundResources,
    push_constants: &[u8],
    draw_id: u32,
    record: &HalaDrawRecord,
    emit: &mut dyn FnMut([glam::Vec4; 3]),
  ) -> Result<(), HalaRendererError>;

}
