use glam::{Vec2, Vec3};
use rayon::prelude::*;

use crate::error::HalaRendererError;
use crate::scene::{
  bounds::HalaBoundingSphere,
  lod::{HalaLodCascadeBuilder, HALA_MAX_LOD_COUNT},
  mesh::{HalaMesh, HalaMeshLod, HalaMeshSource},
  meshlet::{pad_meshlets, HalaMeshlet, HalaMeshletBuilder, HalaMeshletSet},
  vertex::HalaVertex,
};

/// The work group size of the cull and task kernels, meshlet ranges are padded to it.
pub const HALA_MESHLET_GROUP_SIZE: usize = 32;

/// A preprocessed mesh, ready to be appended to the geometry.
/// Preparing is independent per mesh, so it can run in parallel.
#[derive(Debug, Clone)]
pub struct HalaPreparedMesh {
  pub name: String,
  pub vertices: Vec<HalaVertex>,
  pub sphere: HalaBoundingSphere,
  pub lods: Vec<Vec<u32>>,
  pub meshlets: Vec<HalaMeshletSet>,
}

/// The implementation of the prepared mesh.
impl HalaPreparedMesh {

  /// Optimize the source and build its LOD cascade.
  /// Vertices are deduplicated, then the index order is optimized for the vertex cache and the
  /// vertex order for fetching.
  /// param source: The source mesh.
  /// param lod_builder: The LOD cascade builder.
  /// param make_meshlets: Whether to build the meshlets of every LOD.
  /// return: The prepared mesh.
  pub fn prepare(
    source: &HalaMeshSource,
    lod_builder: &HalaLodCascadeBuilder,
    make_meshlets: bool,
  ) -> Result<Self, HalaRendererError> {
    source.validate()?;
    let unindexed = Self::build_vertices(source);

    let (vertex_count, remap) = meshopt::generate_vertex_remap(&unindexed, Some(&source.indices));
    let vertices = meshopt::remap_vertex_buffer(&unindexed, vertex_count, &remap);
    let indices = meshopt::remap_index_buffer(Some(&source.indices), vertex_count, &remap);

    let mut indices = meshopt::optimize_vertex_cache(&indices, vertex_count);
    let vertices = meshopt::optimize_vertex_fetch(&mut indices, &vertices);

    let lods = lod_builder.build(&vertices, indices);
    Ok(Self::finish(source, vertices, lods, make_meshlets))
  }

  /// Take authored LODs as they are.
  /// param source: The source mesh.
  /// param lods: The triangle lists, full detail first, with non-increasing index counts.
  /// param make_meshlets: Whether to build the meshlets of every LOD.
  /// return: The prepared mesh.
  pub fn prepare_with_lods(
    source: &HalaMeshSource,
    lods: Vec<Vec<u32>>,
    make_meshlets: bool,
  ) -> Result<Self, HalaRendererError> {
    source.validate()?;
    if lods.is_empty() || lods.len() > HALA_MAX_LOD_COUNT {
      return Err(HalaRendererError::new(
        &format!("The mesh \"{}\" has {} LODs, expected 1 to {}.", source.name, lods.len(), HALA_MAX_LOD_COUNT),
        None,
      ));
    }
    for (i, lod) in lods.iter().enumerate() {
      let lod_source = HalaMeshSource {
        name: format!("{}[LOD{}]", source.name, i),
        positions: source.positions.clone(),
        indices: lod.clone(),
        ..Default::default()
      };
      lod_source.validate()?;
    }
    if lods.windows(2).any(|pair| pair[1].len() > pair[0].len()) {
      return Err(HalaRendererError::new(
        &format!("The LOD index counts of mesh \"{}\" increase.", source.name),
        None,
      ));
    }

    let vertices = Self::build_vertices(source);
    Ok(Self::finish(source, vertices, lods, make_meshlets))
  }

  fn build_vertices(source: &HalaMeshSource) -> Vec<HalaVertex> {
    let computed;
    let normals = if source.normals.is_empty() {
      computed = source.compute_normals();
      &computed
    } else {
      &source.normals
    };
    source.positions.iter()
      .enumerate()
      .map(|(i, &position)| {
        let tex_coord = source.tex_coords.get(i).copied().unwrap_or(Vec2::ZERO);
        HalaVertex::new(position, normals[i].normalize_or_zero(), tex_coord)
      })
      .collect()
  }

  fn finish(source: &HalaMeshSource, vertices: Vec<HalaVertex>, lods: Vec<Vec<u32>>, make_meshlets: bool) -> Self {
    let positions = vertices.iter().map(|v| v.position()).collect::<Vec<Vec3>>();
    let sphere = HalaBoundingSphere::from_points(&positions);
    let meshlets = if make_meshlets {
      let builder = HalaMeshletBuilder::default();
      lods.iter().map(|lod| builder.build(&positions, lod)).collect()
    } else {
      Vec::new()
    };
    Self {
      name: source.name.clone(),
      vertices,
      sphere,
      lods,
      meshlets,
    }
  }

}

/// The geometry of a scene, every mesh packed into shared arrays.
#[derive(Debug, Clone, Default)]
pub struct HalaGeometry {
  pub vertices: Vec<HalaVertex>,
  /// Mesh local vertex indices of every LOD.
  pub indices: Vec<u32>,
  pub meshlets: Vec<HalaMeshlet>,
  /// Mesh local vertex indices referenced by the meshlets.
  pub meshlet_vertices: Vec<u32>,
  /// Packed meshlet triangles.
  pub meshlet_triangles: Vec<u32>,
  pub meshes: Vec<HalaMesh>,
}

/// The implementation of the geometry.
impl HalaGeometry {

  /// Preprocess and append a mesh.
  /// param source: The source mesh.
  /// param lod_builder: The LOD cascade builder.
  /// param make_meshlets: Whether to build meshlets.
  /// return: The mesh index.
  pub fn add_mesh(
    &mut self,
    source: &HalaMeshSource,
    lod_builder: &HalaLodCascadeBuilder,
    make_meshlets: bool,
  ) -> Result<u32, HalaRendererError> {
    let prepared = HalaPreparedMesh::prepare(source, lod_builder, make_meshlets)?;
    Ok(self.append(prepared))
  }

  /// Append a mesh with authored LODs.
  /// param source: The source mesh.
  /// param lods: The triangle lists, full detail first.
  /// param make_meshlets: Whether to build meshlets.
  /// return: The mesh index.
  pub fn add_mesh_with_lods(
    &mut self,
    source: &HalaMeshSource,
    lods: Vec<Vec<u32>>,
    make_meshlets: bool,
  ) -> Result<u32, HalaRendererError> {
    let prepared = HalaPreparedMesh::prepare_with_lods(source, lods, make_meshlets)?;
    Ok(self.append(prepared))
  }

  /// Preprocess many meshes in parallel and append them in order.
  /// param sources: The source meshes.
  /// param lod_builder: The LOD cascade builder.
  /// param make_meshlets: Whether to build meshlets.
  /// return: The mesh indices.
  pub fn add_meshes(
    &mut self,
    sources: &[HalaMeshSource],
    lod_builder: &HalaLodCascadeBuilder,
    make_meshlets: bool,
  ) -> Result<Vec<u32>, HalaRendererError> {
    let prepared = sources.par_iter()
      .map(|source| HalaPreparedMesh::prepare(source, lod_builder, make_meshlets))
      .collect::<Result<Vec<_>, _>>()?;
    Ok(prepared.into_iter().map(|mesh| self.append(mesh)).collect())
  }

  /// Append a prepared mesh.
  /// param prepared: The prepared mesh.
  /// return: The mesh index.
  pub fn append(&mut self, prepared: HalaPreparedMesh) -> u32 {
    let mut mesh = HalaMesh {
      center: prepared.sphere.center.to_array(),
      radius: prepared.sphere.radius,
      vertex_offset: self.vertices.len() as u32,
      vertex_count: prepared.vertices.len() as u32,
      ..Default::default()
    };
    self.vertices.extend_from_slice(&prepared.vertices);

    for (i, lod_indices) in prepared.lods.iter().take(HALA_MAX_LOD_COUNT).enumerate() {
      let mut lod = HalaMeshLod {
        index_offset: self.indices.len() as u32,
        index_count: lod_indices.len() as u32,
        meshlet_offset: self.meshlets.len() as u32,
        meshlet_count: 0,
      };
      self.indices.extend_from_slice(lod_indices);

      if let Some(set) = prepared.meshlets.get(i) {
        let vertex_base = self.meshlet_vertices.len() as u32;
        let triangle_base = self.meshlet_triangles.len() as u32;
        self.meshlets.extend(set.meshlets.iter().map(|meshlet| HalaMeshlet {
          vertex_offset: meshlet.vertex_offset + vertex_base,
          triangle_offset: meshlet.triangle_offset + triangle_base,
          ..*meshlet
        }));
        self.meshlet_vertices.extend_from_slice(&set.vertices);
        self.meshlet_triangles.extend_from_slice(&set.triangles);
        lod.meshlet_count = set.meshlets.len() as u32;
        pad_meshlets(&mut self.meshlets, HALA_MESHLET_GROUP_SIZE);
      }

      mesh.lods[i] = lod;
      mesh.lod_count += 1;
    }

    log::debug!(
      "A mesh \"{}\" is added with {} vertices, {} LODs and {} meshlets.",
      prepared.name,
      mesh.vertex_count,
      mesh.lod_count,
      mesh.lods().iter().map(|lod| lod.meshlet_count).sum::<u32>(),
    );
    self.meshes.push(mesh);
    (self.meshes.len() - 1) as u32
  }

  /// Get the meshlet set view of the global arrays.
  /// param meshlet: The meshlet.
  /// param triangle: The triangle inside the meshlet.
  /// return: The mesh local vertex indices.
  pub fn meshlet_triangle(&self, meshlet: &HalaMeshlet, triangle: usize) -> [u32; 3] {
    let local = crate::scene::meshlet::unpack_triangle(self.meshlet_triangles[meshlet.triangle_offset as usize + triangle]);
    local.map(|slot| self.meshlet_vertices[meshlet.vertex_offset as usize + slot as usize])
  }

}

#[cfg(test)]
mod tests {
  use super::*;

  fn quad_grid(size: u32) -> HalaMeshSource {
    let mut positions = Vec::new();
    for y in 0..=size {
      for x in 0..=size {
        positions.push(Vec3::new(x as f32, y as f32, ((x * 7 + y * 3) % 5) as f32 * 0.05));
      }
    }
    let mut indices = Vec::new();
    let stride = size + 1;
    for y in 0..size {
      for x in 0..size {
        let a = y * stride + x;
        indices.extend_from_slice(&[a, a + 1, a + stride, a + 1, a + stride + 1, a + stride]);
      }
    }
    HalaMeshSource::new("grid", positions, indices)
  }

  #[test]
  fn meshes_share_the_global_arrays() {
    let mut geometry = HalaGeometry::default();
    let builder = HalaLodCascadeBuilder::default();
    let first = geometry.add_mesh(&quad_grid(16), &builder, true).unwrap();
    let second = geometry.add_mesh(&quad_grid(8), &builder, true).unwrap();
    assert_eq!((first, second), (0, 1));

    assert_eq!(geometry.meshlets.len() % HALA_MESHLET_GROUP_SIZE, 0);
    let a = &geometry.meshes[0];
    let b = &geometry.meshes[1];
    assert_eq!(b.vertex_offset, a.vertex_offset + a.vertex_count);
    for mesh in &geometry.meshes {
      assert!(mesh.lod_count >= 1 && mesh.lod_count as usize <= HALA_MAX_LOD_COUNT);
      for pair in mesh.lods().windows(2) {
        assert!(pair[0].index_count >= pair[1].index_count);
      }
      for lod in mesh.lods() {
        assert_eq!(lod.meshlet_offset as usize % HALA_MESHLET_GROUP_SIZE, 0);
        // Every meshlet triangle is one of the LOD's triangles.
        let lod_triangles = geometry.indices[lod.index_offset as usize..(lod.index_offset + lod.index_count) as usize]
          .chunks_exact(3)
          .map(|t| [t[0], t[1], t[2]])
          .collect::<Vec<_>>();
        let mut count = 0;
        for meshlet in &geometry.meshlets[lod.meshlet_offset as usize..(lod.meshlet_offset + lod.meshlet_count) as usize] {
          for t in 0..meshlet.triangle_count as usize {
            assert!(lod_triangles.contains(&geometry.meshlet_triangle(meshlet, t)));
            count += 1;
          }
        }
        assert_eq!(count, lod_triangles.len());
      }
    }
  }

  #[test]
  fn duplicated_vertices_are_merged() {
    let positions = vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::X, Vec3::Y, Vec3::ONE];
    let mut source = HalaMeshSource::new("dup", positions, vec![0, 1, 2, 3, 5, 4]);
    source.normals = vec![Vec3::Z; 6];
    let mut geometry = HalaGeometry::default();
    geometry.add_mesh(&source, &HalaLodCascadeBuilder::new(1, 0.75, 1e-2), false).unwrap();
    assert_eq!(geometry.meshes[0].vertex_count, 4);
    assert!(geometry.meshlets.is_empty());
  }

  #[test]
  fn authored_lods_must_not_grow() {
    let source = quad_grid(2);
    let full = source.indices.clone();
    let half = full[..full.len() / 2].to_vec();
    let mut geometry = HalaGeometry::default();
    assert!(geometry.add_mesh_with_lods(&source, vec![half.clone(), full.clone()], true).is_err());
    assert!(geometry.add_mesh_with_lods(&source, vec![], true).is_err());
    assert!(geometry.add_mesh_with_lods(&source, vec![full, half], true).is_ok());
    assert_eq!(geometry.meshes[0].lod_count, 2);
  }

  #[test]
  fn bad_source_is_rejected() {
    let source = HalaMeshSource::new("bad", vec![Vec3::ZERO, Vec3::X, Vec3::Y], vec![0, 1, 9]);
    let mut geometry = HalaGeometry::default();
    assert!(geometry.add_mesh(&source, &HalaLodCascadeBuilder::default(), true).is_err());
    assert!(geometry.meshes.is_empty());
  }
}
