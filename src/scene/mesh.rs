use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

use crate::error::HalaRendererError;
use crate::scene::lod::HALA_MAX_LOD_COUNT;

/// One level of detail of a mesh.
/// Offsets point into the global index and meshlet arrays.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct HalaMeshLod {
  pub index_offset: u32,
  pub index_count: u32,
  pub meshlet_offset: u32,
  pub meshlet_count: u32,
}

/// The mesh.
/// All LODs share the vertex range, LOD0 is full detail.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct HalaMesh {
  pub center: [f32; 3],
  pub radius: f32,
  pub vertex_offset: u32,
  pub vertex_count: u32,
  pub lod_count: u32,
  pub _padding: u32,
  pub lods: [HalaMeshLod; HALA_MAX_LOD_COUNT],
}

/// The implementation of the mesh.
impl HalaMesh {

  /// Get the used LODs.
  /// return: The first lod_count levels.
  pub fn lods(&self) -> &[HalaMeshLod] {
    &self.lods[..(self.lod_count as usize).min(HALA_MAX_LOD_COUNT)]
  }

  /// Get the bounding sphere center.
  /// return: The center in mesh space.
  pub fn center(&self) -> Vec3 {
    Vec3::from_array(self.center)
  }

}

/// The parsed source data of a mesh.
/// Normals and texture coordinates are optional, when present they match the positions.
#[derive(Debug, Clone, Default)]
pub struct HalaMeshSource {
  pub name: String,
  pub positions: Vec<Vec3>,
  pub normals: Vec<Vec3>,
  pub tex_coords: Vec<Vec2>,
  pub indices: Vec<u32>,
}

/// The implementation of the mesh source.
impl HalaMeshSource {

  /// Create a mesh source with positions and indices only.
  /// param name: The name used in diagnostics.
  /// param positions: The positions.
  /// param indices: The triangle list.
  /// return: The mesh source.
  pub fn new(name: &str, positions: Vec<Vec3>, indices: Vec<u32>) -> Self {
    Self {
      name: name.to_string(),
      positions,
      indices,
      ..Default::default()
    }
  }

  /// Check the source can be preprocessed.
  /// return: The result.
  pub fn validate(&self) -> Result<(), HalaRendererError> {
    if self.positions.is_empty() || self.indices.is_empty() {
      return Err(HalaRendererError::new(&format!("The mesh \"{}\" is empty.", self.name), None));
    }
    if self.indices.len() % 3 != 0 {
      return Err(HalaRendererError::new(
        &format!("The index count {} of mesh \"{}\" is not a triangle list.", self.indices.len(), self.name),
        None,
      ));
    }
    if let Some(index) = self.indices.iter().find(|&&i| i as usize >= self.positions.len()) {
      return Err(HalaRendererError::new(
        &format!("The index {} of mesh \"{}\" is out of range, the vertex count is {}.", index, self.name, self.positions.len()),
        None,
      ));
    }
    if !self.normals.is_empty() && self.normals.len() != self.positions.len() {
      return Err(HalaRendererError::new(&format!("The normal count of mesh \"{}\" does not match the positions.", self.name), None));
    }
    if !self.tex_coords.is_empty() && self.tex_coords.len() != self.positions.len() {
      return Err(HalaRendererError::new(&format!("The texture coordinate count of mesh \"{}\" does not match the positions.", self.name), None));
    }
    if self.positions.iter().any(|p| !p.is_finite()) {
      return Err(HalaRendererError::new(&format!("The mesh \"{}\" has non-finite positions.", self.name), None));
    }
    Ok(())
  }

  /// Compute the smooth vertex normals from the triangles.
  /// return: The unit normals, zero for unused vertices.
  pub fn compute_normals(&self) -> Vec<Vec3> {
    let mut normals = vec![Vec3::ZERO; self.positions.len()];
    for triangle in self.indices.chunks_exact(3) {
      let [a, b, c] = [triangle[0], triangle[1], triangle[2]].map(|i| self.positions[i as usize]);
      let face = (b - a).cross(c - a);
      for &i in triangle {
        normals[i as usize] += face;
      }
    }
    normals.iter().map(|n| n.normalize_or_zero()).collect()
  }

}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn mesh_record_layout() {
    assert_eq!(std::mem::size_of::<HalaMeshLod>(), 16);
    assert_eq!(std::mem::size_of::<HalaMesh>(), 32 + 16 * HALA_MAX_LOD_COUNT);
  }

  #[test]
  fn accessors_stop_at_the_lod_count() {
    let mesh = HalaMesh { center: [1.0, 2.0, 3.0], lod_count: 3, ..Default::default() };
    assert_eq!(mesh.lods().len(), 3);
    assert_eq!(mesh.center(), Vec3::new(1.0, 2.0, 3.0));
    let broken = HalaMesh { lod_count: 40, ..Default::default() };
    assert_eq!(broken.lods().len(), HALA_MAX_LOD_COUNT);
  }

  #[test]
  fn invalid_sources_are_rejected() {
    let positions = vec![Vec3::ZERO, Vec3::X, Vec3::Y];
    assert!(HalaMeshSource::new("ok", positions.clone(), vec![0, 1, 2]).validate().is_ok());
    assert!(HalaMeshSource::new("empty", positions.clone(), vec![]).validate().is_err());
    assert!(HalaMeshSource::new("partial", positions.clone(), vec![0, 1]).validate().is_err());
    assert!(HalaMeshSource::new("range", positions.clone(), vec![0, 1, 3]).validate().is_err());

    let mut normals = HalaMeshSource::new("normals", positions, vec![0, 1, 2]);
    normals.normals = vec![Vec3::Z];
    assert!(normals.validate().is_err());
  }

  #[test]
  fn computed_normals_face_the_winding() {
    let source = HalaMeshSource::new("tri", vec![Vec3::ZERO, Vec3::X, Vec3::Y], vec![0, 1, 2]);
    for normal in source.compute_normals() {
      assert!((normal - Vec3::Z).length() < 1e-6);
    }
  }
}
