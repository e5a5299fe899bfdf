use bytemuck::{Pod, Zeroable};

use crate::gfx::{
  HalaDrawIndexedIndirectCommand,
  HalaDrawMeshTasksIndirectCommand,
};
use crate::scene::{
  geometry::HALA_MESHLET_GROUP_SIZE,
  instance::HalaInstance,
  mesh::HalaMeshLod,
};

/// The byte offset of the indexed arguments inside a draw command.
pub const HALA_DRAW_COMMAND_INDEXED_OFFSET: u64 = 4;
/// The byte offset of the mesh task arguments inside a draw command.
pub const HALA_DRAW_COMMAND_TASKS_OFFSET: u64 = 24;

/// One visible instance at its selected LOD.
/// Both render paths read the same record through different offsets. The indexed arguments
/// carry the instance index as first instance, so the vertex stage finds its instance without
/// a draw id.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct HalaDrawCommand {
  pub draw_index: u32,
  pub indexed: HalaDrawIndexedIndirectCommand,
  pub tasks: HalaDrawMeshTasksIndirectCommand,
}

/// The implementation of the draw command.
impl HalaDrawCommand {

  /// Create the draw command of an instance.
  /// param draw_index: The instance index.
  /// param instance: The instance.
  /// param lod: The selected LOD of its mesh.
  /// return: The draw command.
  pub fn new(draw_index: u32, instance: &HalaInstance, lod: &HalaMeshLod) -> Self {
    let group_size = HALA_MESHLET_GROUP_SIZE as u32;
    Self {
      draw_index,
      indexed: HalaDrawIndexedIndirectCommand {
        index_count: lod.index_count,
        instance_count: 1,
        first_index: lod.index_offset,
        vertex_offset: instance.vertex_offset as i32,
        first_instance: draw_index,
      },
      tasks: HalaDrawMeshTasksIndirectCommand {
        task_count: lod.meshlet_count.div_ceil(group_size),
        first_task: lod.meshlet_offset / group_size,
      },
    }
  }

}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn draw_command_layout() {
    assert_eq!(std::mem::size_of::<HalaDrawCommand>(), 32);
    let command = HalaDrawCommand {
      draw_index: 1,
      indexed: HalaDrawIndexedIndirectCommand { index_count: 2, ..Default::default() },
      tasks: HalaDrawMeshTasksIndirectCommand { task_count: 3, first_task: 4 },
    };
    let words: &[u32] = bytemuck::cast_slice(bytemuck::bytes_of(&command));
    assert_eq!(words[(HALA_DRAW_COMMAND_INDEXED_OFFSET / 4) as usize], 2);
    assert_eq!(words[(HALA_DRAW_COMMAND_TASKS_OFFSET / 4) as usize], 3);
  }

  #[test]
  fn tasks_cover_the_meshlet_range() {
    let lod = HalaMeshLod { index_offset: 30, index_count: 99, meshlet_offset: 64, meshlet_count: 40 };
    let command = HalaDrawCommand::new(5, &HalaInstance { vertex_offset: 11, ..Default::default() }, &lod);
    assert_eq!(command.tasks, HalaDrawMeshTasksIndirectCommand { task_count: 2, first_task: 2 });
    assert_eq!(command.indexed.first_index, 30);
    assert_eq!(command.indexed.vertex_offset, 11);
    assert_eq!((command.indexed.instance_count, command.indexed.first_instance), (1, 5));
  }
}
