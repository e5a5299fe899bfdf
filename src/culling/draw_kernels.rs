use glam::{Mat4, Quat, Vec3, Vec4};

use crate::culling::{
  cull_data::HalaDrawData,
  draw_command::HalaDrawCommand,
};
use crate::error::HalaRendererError;
use crate::gfx::{
  read_push_constants,
  HalaBindingDesc,
  HalaBoundResources,
  HalaBufferView,
  HalaDrawKind,
  HalaDrawRecord,
  HalaGraphicsKernel,
};
use crate::scene::{
  geometry::HALA_MESHLET_GROUP_SIZE,
  instance::HalaInstance,
  meshlet::{unpack_triangle, HalaMeshlet},
  vertex::HalaVertex,
};

pub const DRAW_BINDING_INSTANCES: u32 = 0;
pub const DRAW_BINDING_DRAW_COMMANDS: u32 = 1;
pub const DRAW_BINDING_VERTICES: u32 = 2;
pub const DRAW_BINDING_INDICES: u32 = 3;
pub const DRAW_BINDING_MESHLETS: u32 = 3;
pub const DRAW_BINDING_MESHLET_VERTICES: u32 = 4;
pub const DRAW_BINDING_MESHLET_TRIANGLES: u32 = 5;

const INDEXED_BINDINGS: [HalaBindingDesc; 4] = [
  HalaBindingDesc::storage_buffer(DRAW_BINDING_INSTANCES, "instances", false),
  HalaBindingDesc::storage_buffer(DRAW_BINDING_DRAW_COMMANDS, "draw_commands", false),
  HalaBindingDesc::storage_buffer(DRAW_BINDING_VERTICES, "vertices", false),
  HalaBindingDesc::storage_buffer(DRAW_BINDING_INDICES, "indices", false),
];

const MESHLET_BINDINGS: [HalaBindingDesc; 6] = [
  HalaBindingDesc::storage_buffer(DRAW_BINDING_INSTANCES, "instances", false),
  HalaBindingDesc::storage_buffer(DRAW_BINDING_DRAW_COMMANDS, "draw_commands", false),
  HalaBindingDesc::storage_buffer(DRAW_BINDING_VERTICES, "vertices", false),
  HalaBindingDesc::storage_buffer(DRAW_BINDING_MESHLETS, "meshlets", false),
  HalaBindingDesc::storage_buffer(DRAW_BINDING_MESHLET_VERTICES, "meshlet_vertices", false),
  HalaBindingDesc::storage_buffer(DRAW_BINDING_MESHLET_TRIANGLES, "meshlet_triangles", false),
];

/// The instance transform as read by the geometry stages.
struct HalaInstanceTransform {
  position: Vec3,
  scale: f32,
  orientation: Quat,
  vertex_offset: u32,
}

impl HalaInstanceTransform {

  fn new(instance: &HalaInstance) -> Self {
    Self {
      position: instance.position(),
      scale: instance.scale,
      orientation: instance.orientation(),
      vertex_offset: instance.vertex_offset,
    }
  }

  fn apply(&self, position: Vec3) -> Vec3 {
    self.position + self.orientation * (position * self.scale)
  }

}

fn checked_read<T: bytemuck::Pod>(
  buffer: &HalaBufferView,
  index: usize,
  name: &str,
) -> Result<T, HalaRendererError> {
  if index >= buffer.len::<T>() {
    return Err(HalaRendererError::new(
      &format!("The {} read at {} is out of range {}.", name, index, buffer.len::<T>()),
      None,
    ));
  }
  Ok(buffer.read(index))
}

/// Fetch the instance of a draw through its draw command.
fn draw_instance(resources: &HalaBoundResources, draw_id: u32) -> Result<HalaInstance, HalaRendererError> {
  let commands = resources.buffer(DRAW_BINDING_DRAW_COMMANDS)?;
  let instances = resources.buffer(DRAW_BINDING_INSTANCES)?;
  let command: HalaDrawCommand = checked_read(&commands, draw_id as usize, "draw command")?;
  checked_read(&instances, command.draw_index as usize, "instance")
}

fn clip_position(view_proj: &Mat4, world: Vec3) -> Vec4 {
  *view_proj * world.extend(1.0)
}

/// The classic indexed geometry pass.
/// Each draw walks the index range of the selected LOD.
pub struct HalaIndexedDrawKernel;

/// The implementation of the graphics kernel trait for the indexed draw kernel.
impl HalaGraphicsKernel for HalaIndexedDrawKernel {

  fn name(&self) -> &str {
    "indexed_draw"
  }

  fn bindings(&self) -> &[HalaBindingDesc] {
    &INDEXED_BINDINGS
  }

  fn push_constant_size(&self) -> usize {
    std::mem::size_of::<HalaDrawData>()
  }

  fn draw_kind(&self) -> HalaDrawKind {
    HalaDrawKind::Indexed
  }

  fn shader_source(&self) -> Option<&'static str> {
    Some(include_str!("shaders/indexed_draw.wgsl"))
  }

  fn assemble(
    &self,
    resources: &HalaBoundResources,
    push_constants: &[u8],
    draw_id: u32,
    record: &HalaDrawRecord,
    emit: &mut dyn FnMut([Vec4; 3]),
  ) -> Result<(), HalaRendererError> {
    let HalaDrawRecord::Indexed(command) = record else {
      return Err(HalaRendererError::new("The indexed draw kernel got a mesh tasks record.", None));
    };
    let data: HalaDrawData = read_push_constants(push_constants)?;
    let transform = HalaInstanceTransform::new(&draw_instance(resources, draw_id)?);
    let vertices = resources.buffer(DRAW_BINDING_VERTICES)?;
    let indices = resources.buffer(DRAW_BINDING_INDICES)?;

    let base_vertex = command.vertex_offset as i64;
    let first_index = command.first_index as usize;
    for triangle in 0..(command.index_count / 3) as usize {
      let mut clip = [Vec4::ZERO; 3];
      for (corner, position) in clip.iter_mut().enumerate() {
        let index: u32 = checked_read(&indices, first_index + triangle * 3 + corner, "index")?;
        let vertex_index = usize::try_from(base_vertex + index as i64)
          .map_err(|err| HalaRendererError::new("The vertex offset is negative.", Some(Box::new(err))))?;
        let vertex: HalaVertex = checked_read(&vertices, vertex_index, "vertex")?;
        *position = clip_position(&data.view_proj, transform.apply(vertex.position()));
      }
      emit(clip);
    }
    Ok(())
  }

}

/// Test a meshlet against its normal cone.
/// param center: The world space meshlet center.
/// param radius: The world space meshlet radius.
/// param axis: The world space cone axis.
/// param cutoff: The cone cutoff, -1 never rejects.
/// param camera_position: The camera position.
/// return: True if every triangle of the meshlet faces away from the camera.
pub fn cone_cull(center: Vec3, radius: f32, axis: Vec3, cutoff: f32, camera_position: Vec3) -> bool {
  if cutoff <= -1.0 {
    return false;
  }
  let to_center = center - camera_position;
  to_center.dot(axis) >= -cutoff * to_center.length() + radius
}

/// The meshlet geometry pass.
/// Every task covers a group of meshlets. Padding meshlets and back facing meshlets emit nothing.
pub struct HalaMeshletDrawKernel;

/// The implementation of the graphics kernel trait for the meshlet draw kernel.
impl HalaGraphicsKernel for HalaMeshletDrawKernel {

  fn name(&self) -> &str {
    "meshlet_draw"
  }

  fn bindings(&self) -> &[HalaBindingDesc] {
    &MESHLET_BINDINGS
  }

  fn push_constant_size(&self) -> usize {
    std::mem::size_of::<HalaDrawData>()
  }

  fn draw_kind(&self) -> HalaDrawKind {
    HalaDrawKind::MeshTasks
  }

  fn assemble(
    &self,
    resources: &HalaBoundResources,
    push_constants: &[u8],
    draw_id: u32,
    record: &HalaDrawRecord,
    emit: &mut dyn FnMut([Vec4; 3]),
  ) -> Result<(), HalaRendererError> {
    let HalaDrawRecord::MeshTasks(command) = record else {
      return Err(HalaRendererError::new("The meshlet draw kernel got an indexed record.", None));
    };
    let data: HalaDrawData = read_push_constants(push_constants)?;
    let transform = HalaInstanceTransform::new(&draw_instance(resources, draw_id)?);
    let camera_position = Vec3::from_array(data.camera_position);
    let vertices = resources.buffer(DRAW_BINDING_VERTICES)?;
    let meshlets = resources.buffer(DRAW_BINDING_MESHLETS)?;
    let meshlet_vertices = resources.buffer(DRAW_BINDING_MESHLET_VERTICES)?;
    let meshlet_triangles = resources.buffer(DRAW_BINDING_MESHLET_TRIANGLES)?;

    let first = command.first_task as usize * HALA_MESHLET_GROUP_SIZE;
    let count = command.task_count as usize * HALA_MESHLET_GROUP_SIZE;
    for meshlet_index in first..first + count {
      // The group of the last task may run past the end of the array.
      if meshlet_index >= meshlets.len::<HalaMeshlet>() {
        break;
      }
      let meshlet: HalaMeshlet = meshlets.read(meshlet_index);
      if meshlet.triangle_count == 0 {
        continue;
      }
      if data.cone_cull_enabled != 0 {
        let center = transform.apply(Vec3::from_array(meshlet.center));
        let axis = transform.orientation * Vec3::from_array(meshlet.cone_axis);
        if cone_cull(center, meshlet.radius * transform.scale, axis, meshlet.cone_cutoff, camera_position) {
          continue;
        }
      }

      for triangle in 0..meshlet.triangle_count as usize {
        let packed: u32 = checked_read(&meshlet_triangles, meshlet.triangle_offset as usize + triangle, "meshlet triangle")?;
        let mut clip = [Vec4::ZERO; 3];
        for (position, slot) in clip.iter_mut().zip(unpack_triangle(packed)) {
          let local: u32 = checked_read(&meshlet_vertices, (meshlet.vertex_offset + slot) as usize, "meshlet vertex")?;
          let vertex: HalaVertex = checked_read(&vertices, (transform.vertex_offset + local) as usize, "vertex")?;
          *position = clip_position(&data.view_proj, transform.apply(vertex.position()));
        }
        emit(clip);
      }
    }
    Ok(())
  }

}
