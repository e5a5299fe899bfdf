use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::scene::bounds::HalaBoundingSphere;

/// The maximum number of vertices in a meshlet.
pub const HALA_MESHLET_MAX_VERTICES: usize = 64;
/// The maximum number of triangles in a meshlet.
pub const HALA_MESHLET_MAX_TRIANGLES: usize = 126;

const UNUSED_SLOT: u8 = 0xff;

/// The meshlet.
/// A cone cutoff of -1 marks an omnidirectional cone that never rejects the meshlet.
/// Records with a triangle count of zero are padding.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct HalaMeshlet {
  pub center: [f32; 3],
  pub radius: f32,
  pub cone_axis: [f32; 3],
  pub cone_cutoff: f32,
  pub vertex_offset: u32,
  pub triangle_offset: u32,
  pub vertex_count: u32,
  pub triangle_count: u32,
}

/// Pack three local vertex slots into one word.
pub fn pack_triangle(local: [u8; 3]) -> u32 {
  local[0] as u32 | (local[1] as u32) << 8 | (local[2] as u32) << 16
}

/// Unpack a word written by [`pack_triangle`].
pub fn unpack_triangle(packed: u32) -> [u32; 3] {
  [packed & 0xff, (packed >> 8) & 0xff, (packed >> 16) & 0xff]
}

/// The meshlets of one triangle list.
/// Offsets in the meshlets are relative to the vertex and triangle arrays of the set.
#[derive(Debug, Clone, Default)]
pub struct HalaMeshletSet {
  pub meshlets: Vec<HalaMeshlet>,
  /// Mesh local vertex indices, referenced by the meshlets' local slots.
  pub vertices: Vec<u32>,
  /// Packed triangles of local slots.
  pub triangles: Vec<u32>,
}

/// The implementation of the meshlet set.
impl HalaMeshletSet {

  /// Get one triangle of a meshlet as mesh local vertex indices.
  /// param meshlet: The meshlet.
  /// param triangle: The triangle index inside the meshlet.
  /// return: The vertex indices.
  pub fn triangle(&self, meshlet: &HalaMeshlet, triangle: usize) -> [u32; 3] {
    let local = unpack_triangle(self.triangles[meshlet.triangle_offset as usize + triangle]);
    local.map(|slot| self.vertices[meshlet.vertex_offset as usize + slot as usize])
  }

}

/// Greedy streaming meshlet builder.
///
/// Triangles are taken in index order. A meshlet is closed when the next triangle would
/// bring in too many vertices or the meshlet is full, so every triangle lands in exactly one
/// meshlet and the input order is kept.
#[derive(Debug, Clone, Copy)]
pub struct HalaMeshletBuilder {
  max_vertices: usize,
  max_triangles: usize,
}

impl Default for HalaMeshletBuilder {
  fn default() -> Self {
    Self::new(HALA_MESHLET_MAX_VERTICES, HALA_MESHLET_MAX_TRIANGLES)
  }
}

/// The implementation of the meshlet builder.
impl HalaMeshletBuilder {

  /// Create a meshlet builder.
  /// param max_vertices: The vertex limit, at most 255 and at least 3.
  /// param max_triangles: The triangle limit, at least 1.
  /// return: The builder.
  pub fn new(max_vertices: usize, max_triangles: usize) -> Self {
    Self {
      max_vertices: max_vertices.clamp(3, UNUSED_SLOT as usize),
      max_triangles: max_triangles.max(1),
    }
  }

  /// Split a triangle list into meshlets.
  /// param positions: The vertex positions, every index must be in range.
  /// param indices: The triangle list.
  /// return: The meshlets, empty for an empty list.
  pub fn build(&self, positions: &[Vec3], indices: &[u32]) -> HalaMeshletSet {
    let mut set = HalaMeshletSet::default();
    if indices.len() < 3 {
      return set;
    }

    let mut slots = vec![UNUSED_SLOT; positions.len()];
    let mut cluster_vertices = Vec::with_capacity(self.max_vertices);
    let mut cluster_triangles = Vec::with_capacity(self.max_triangles);

    for triangle in indices.chunks_exact(3) {
      let new_vertices = triangle.iter()
        .enumerate()
        .filter(|&(k, &v)| slots[v as usize] == UNUSED_SLOT && !triangle[..k].contains(&v))
        .count();
      if cluster_vertices.len() + new_vertices > self.max_vertices || cluster_triangles.len() >= self.max_triangles {
        Self::flush(&mut set, positions, &mut slots, &mut cluster_vertices, &mut cluster_triangles);
      }

      let mut local = [0u8; 3];
      for (k, &v) in triangle.iter().enumerate() {
        let slot = &mut slots[v as usize];
        if *slot == UNUSED_SLOT {
          *slot = cluster_vertices.len() as u8;
          cluster_vertices.push(v);
        }
        local[k] = *slot;
      }
      cluster_triangles.push(local);
    }

    if !cluster_triangles.is_empty() {
      Self::flush(&mut set, positions, &mut slots, &mut cluster_vertices, &mut cluster_triangles);
    }
    set
  }

  fn flush(
    set: &mut HalaMeshletSet,
    positions: &[Vec3],
    slots: &mut [u8],
    cluster_vertices: &mut Vec<u32>,
    cluster_triangles: &mut Vec<[u8; 3]>,
  ) {
    let points = cluster_vertices.iter().map(|&v| positions[v as usize]).collect::<Vec<_>>();
    let sphere = HalaBoundingSphere::from_points(&points);
    let normals = cluster_triangles.iter()
      .map(|t| {
        let [a, b, c] = t.map(|slot| points[slot as usize]);
        (b - a).cross(c - a).normalize_or_zero()
      })
      .collect::<Vec<_>>();
    let (cone_axis, cone_cutoff) = compute_cone(&normals);

    set.meshlets.push(HalaMeshlet {
      center: sphere.center.to_array(),
      radius: sphere.radius,
      cone_axis: cone_axis.to_array(),
      cone_cutoff,
      vertex_offset: set.vertices.len() as u32,
      triangle_offset: set.triangles.len() as u32,
      vertex_count: cluster_vertices.len() as u32,
      triangle_count: cluster_triangles.len() as u32,
    });
    set.vertices.extend_from_slice(cluster_vertices);
    set.triangles.extend(cluster_triangles.iter().map(|&t| pack_triangle(t)));

    // Only the slots of this meshlet were touched.
    for &v in cluster_vertices.iter() {
      slots[v as usize] = UNUSED_SLOT;
    }
    cluster_vertices.clear();
    cluster_triangles.clear();
  }

}

/// Compute the normal cone of a set of unit face normals.
/// Degenerate triangles carry a zero normal and are ignored.
/// param normals: The face normals.
/// return: The cone axis and cutoff.
pub fn compute_cone(normals: &[Vec3]) -> (Vec3, f32) {
  let sum = normals.iter().copied().sum::<Vec3>();
  if sum.length_squared() <= 1e-12 {
    return (Vec3::ZERO, -1.0);
  }
  let axis = sum.normalize();
  let min_dot = normals.iter()
    .filter(|normal| **normal != Vec3::ZERO)
    .map(|normal| normal.dot(axis))
    .fold(1.0f32, f32::min);
  let cutoff = if min_dot > 0.0 {
    -(1.0 - min_dot * min_dot).max(0.0).sqrt()
  } else {
    -1.0
  };
  (axis, cutoff)
}

/// Append empty meshlets until the length is a multiple of the given count.
pub fn pad_meshlets(meshlets: &mut Vec<HalaMeshlet>, multiple: usize) {
  let multiple = multiple.max(1);
  let padded = meshlets.len().div_ceil(multiple) * multiple;
  meshlets.resize(padded, HalaMeshlet::default());
}
