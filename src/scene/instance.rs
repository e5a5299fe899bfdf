use bytemuck::{Pod, Zeroable};
use glam::{Quat, Vec3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::HalaRendererError;
use crate::scene::{
  bounds::HalaBoundingSphere,
  mesh::HalaMesh,
};

/// The instance.
/// The bounding sphere is in world space.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct HalaInstance {
  pub position: [f32; 3],
  pub scale: f32,
  pub orientation: [f32; 4],
  pub center: [f32; 3],
  pub radius: f32,
  pub mesh_index: u32,
  pub vertex_offset: u32,
  pub _padding: [u32; 2],
}

/// The implementation of the instance.
impl HalaInstance {

  /// Place a mesh.
  /// param mesh_index: The index of the mesh.
  /// param mesh: The mesh.
  /// param position: The translation.
  /// param scale: The uniform scale.
  /// param orientation: The rotation.
  /// return: The instance.
  pub fn new(mesh_index: u32, mesh: &HalaMesh, position: Vec3, scale: f32, orientation: Quat) -> Self {
    let local = HalaBoundingSphere {
      center: mesh.center(),
      radius: mesh.radius,
    };
    let world = local.transform(position, scale, orientation);
    Self {
      position: position.to_array(),
      scale,
      orientation: orientation.to_array(),
      center: world.center.to_array(),
      radius: world.radius,
      mesh_index,
      vertex_offset: mesh.vertex_offset,
      _padding: [0; 2],
    }
  }

  pub fn position(&self) -> Vec3 {
    Vec3::from_array(self.position)
  }

  pub fn orientation(&self) -> Quat {
    Quat::from_array(self.orientation)
  }

  pub fn sphere(&self) -> HalaBoundingSphere {
    HalaBoundingSphere {
      center: Vec3::from_array(self.center),
      radius: self.radius,
    }
  }

}

fn default_count() -> u32 {
  20000
}

fn default_seed() -> u64 {
  512
}

fn default_extent_min() -> [f32; 3] {
  [-20.0; 3]
}

fn default_extent_max() -> [f32; 3] {
  [60.0; 3]
}

fn default_scale_min() -> f32 {
  1.0
}

fn default_scale_max() -> f32 {
  1.5
}

fn default_max_rotation() -> f32 {
  90.0
}

/// The random instance placement.
/// The same seed always gives the same placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HalaScatterDesc {
  #[serde(default = "default_count")]
  pub count: u32,
  #[serde(default = "default_seed")]
  pub seed: u64,
  #[serde(default = "default_extent_min")]
  pub extent_min: [f32; 3],
  #[serde(default = "default_extent_max")]
  pub extent_max: [f32; 3],
  #[serde(default = "default_scale_min")]
  pub scale_min: f32,
  #[serde(default = "default_scale_max")]
  pub scale_max: f32,
  /// In degrees, around a random axis.
  #[serde(default = "default_max_rotation")]
  pub max_rotation: f32,
}

impl Default for HalaScatterDesc {
  fn default() -> Self {
    Self {
      count: default_count(),
      seed: default_seed(),
      extent_min: default_extent_min(),
      extent_max: default_extent_max(),
      scale_min: default_scale_min(),
      scale_max: default_scale_max(),
      max_rotation: default_max_rotation(),
    }
  }
}

/// The instance table.
/// Built once at load, read only afterwards.
#[derive(Debug, Clone, Default)]
pub struct HalaInstanceTable {
  instances: Vec<HalaInstance>,
}

/// The implementation of the instance table.
impl HalaInstanceTable {

  pub fn new() -> Self {
    Self::default()
  }

  /// Add an instance.
  /// param meshes: The meshes of the scene.
  /// param mesh_index: The index of the placed mesh.
  /// param position: The translation.
  /// param scale: The uniform scale.
  /// param orientation: The rotation.
  /// return: The instance index.
  pub fn push(
    &mut self,
    meshes: &[HalaMesh],
    mesh_index: u32,
    position: Vec3,
    scale: f32,
    orientation: Quat,
  ) -> Result<u32, HalaRendererError> {
    let mesh = meshes.get(mesh_index as usize)
      .ok_or(HalaRendererError::new(&format!("The mesh index {} is out of range.", mesh_index), None))?;
    if mesh.lod_count == 0 {
      return Err(HalaRendererError::new(&format!("The mesh {} has no LOD.", mesh_index), None));
    }
    self.instances.push(HalaInstance::new(mesh_index, mesh, position, scale, orientation));
    Ok((self.instances.len() - 1) as u32)
  }

  /// Place random instances of random meshes.
  /// param meshes: The meshes of the scene.
  /// param desc: The placement.
  /// return: The instance table.
  pub fn scatter(meshes: &[HalaMesh], desc: &HalaScatterDesc) -> Result<Self, HalaRendererError> {
    if meshes.is_empty() {
      return Err(HalaRendererError::new("There is no mesh to scatter.", None));
    }
    let min = Vec3::from_array(desc.extent_min);
    let max = Vec3::from_array(desc.extent_max).max(min);
    let scale_max = desc.scale_max.max(desc.scale_min);

    let mut rng = ChaCha8Rng::seed_from_u64(desc.seed);
    let mut table = Self::new();
    table.instances.reserve(desc.count as usize);
    for _ in 0..desc.count {
      let mesh_index = rng.gen_range(0..meshes.len()) as u32;
      let t = Vec3::new(rng.gen::<f32>(), rng.gen::<f32>(), rng.gen::<f32>());
      let position = min + (max - min) * t;
      let scale = desc.scale_min + (scale_max - desc.scale_min) * rng.gen::<f32>();
      let axis = Vec3::new(rng.gen::<f32>() - 0.5, rng.gen::<f32>() - 0.5, rng.gen::<f32>() - 0.5)
        .try_normalize()
        .unwrap_or(Vec3::Y);
      let angle = (rng.gen::<f32>() * desc.max_rotation).to_radians();
      table.push(meshes, mesh_index, position, scale, Quat::from_axis_angle(axis, angle))?;
    }
    Ok(table)
  }

  pub fn len(&self) -> usize {
    self.instances.len()
  }

  pub fn is_empty(&self) -> bool {
    self.instances.is_empty()
  }

  pub fn as_slice(&self) -> &[HalaInstance] {
    &self.instances
  }

}

#[cfg(test)]
mod tests {
  use super::*;

  fn mesh() -> HalaMesh {
    let mut mesh = HalaMesh {
      center: [1.0, 0.0, 0.0],
      radius: 2.0,
      vertex_offset: 7,
      lod_count: 1,
      ..Default::default()
    };
    mesh.lods[0].index_count = 3;
    mesh
  }

  #[test]
  fn instance_record_layout() {
    assert_eq!(std::mem::size_of::<HalaInstance>(), 64);
  }

  #[test]
  fn instance_carries_world_sphere() {
    let meshes = [mesh()];
    let mut table = HalaInstanceTable::new();
    table.push(&meshes, 0, Vec3::new(0.0, 5.0, 0.0), 2.0, Quat::IDENTITY).unwrap();
    let instance = table.as_slice()[0];
    assert_eq!(instance.center, [2.0, 5.0, 0.0]);
    assert_eq!(instance.radius, 4.0);
    assert_eq!(instance.vertex_offset, 7);
    assert!(table.push(&meshes, 1, Vec3::ZERO, 1.0, Quat::IDENTITY).is_err());
  }

  #[test]
  fn scatter_is_deterministic_and_bounded() {
    let meshes = [mesh(), mesh()];
    let desc = HalaScatterDesc { count: 500, ..Default::default() };
    let a = HalaInstanceTable::scatter(&meshes, &desc).unwrap();
    let b = HalaInstanceTable::scatter(&meshes, &desc).unwrap();
    assert_eq!(a.as_slice(), b.as_slice());
    assert_eq!(a.len(), 500);
    for instance in a.as_slice() {
      let p = instance.position();
      assert!(p.cmpge(Vec3::splat(-20.0)).all() && p.cmple(Vec3::splat(60.0)).all());
      assert!(instance.scale >= 1.0 && instance.scale <= 1.5);
      assert!(instance.mesh_index < 2);
    }
  }

  #[test]
  fn scatter_needs_meshes() {
    assert!(HalaInstanceTable::scatter(&[], &HalaScatterDesc::default()).is_err());
  }
}
