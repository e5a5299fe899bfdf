use std::path::Path;
use std::collections::VecDeque;

use glam::{
  Mat3,
  Mat4,
  Vec2,
  Vec3,
};

use crate::error::HalaRendererError;
use crate::scene::mesh::HalaMeshSource;

/// The glTF loader.
/// Every primitive of the default scene is flattened into one mesh source, with the node
/// transforms applied.
pub struct HalaGltfLoader;

/// The implementation of the glTF loader.
impl HalaGltfLoader {
  /// Load the glTF file from the given path.
  /// param path The path of the glTF file.
  /// return The mesh source.
  pub fn load<P: AsRef<Path>>(path: P) -> Result<HalaMeshSource, HalaRendererError> {
    let path = path.as_ref();
    let (gltf, buffers, _) = gltf::import(path)
      .map_err(|err| HalaRendererError::new(&format!("Load glTF file \"{:?}\" failed.", path), Some(Box::new(err))))?;
    let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("<Unnamed>");
    Self::flatten(name, &gltf, &buffers)
  }

  /// Load a glTF document from memory.
  /// param name The name of the mesh source.
  /// param data The glTF or GLB bytes.
  /// return The mesh source.
  pub fn load_slice(name: &str, data: &[u8]) -> Result<HalaMeshSource, HalaRendererError> {
    let (gltf, buffers, _) = gltf::import_slice(data)?;
    Self::flatten(name, &gltf, &buffers)
  }

  fn flatten(name: &str, gltf: &gltf::Document, buffers: &[gltf::buffer::Data]) -> Result<HalaMeshSource, HalaRendererError> {
    let scene = gltf.default_scene()
      .or_else(|| gltf.scenes().next())
      .ok_or(HalaRendererError::new(&format!("No scene in glTF file \"{}\".", name), None))?;
    if gltf.scenes().len() > 1 {
      log::warn!("More than one scene in glTF file \"{}\". Only \"{}\" will be loaded.", name, scene.name().unwrap_or("<Unnamed>"));
    }

    let mut source = HalaMeshSource {
      name: name.to_owned(),
      ..Default::default()
    };
    let mut has_normals = true;

    let mut node_queue = VecDeque::new();
    node_queue.extend(scene.nodes().map(|node| (Mat4::IDENTITY, node)));
    while let Some((parent_mtx, node)) = node_queue.pop_front() {
      let world_mtx = parent_mtx * Mat4::from_cols_array_2d(&node.transform().matrix());
      if let Some(mesh) = node.mesh() {
        has_normals &= Self::load_mesh(&mut source, &mesh, buffers, &world_mtx)?;
      }
      node_queue.extend(node.children().map(|child| (world_mtx, child)));
    }

    // Mixed primitives fall back to computed normals for the whole source.
    if !has_normals {
      source.normals.clear();
    }
    if source.indices.is_empty() {
      return Err(HalaRendererError::new(&format!("No triangle in glTF file \"{}\".", name), None));
    }
    log::debug!(
      "Load glTF \"{}\" with {} vertices and {} triangles.",
      name,
      source.positions.len(),
      source.indices.len() / 3
    );
    Ok(source)
  }

  /// Append the primitives of a mesh.
  /// param source The mesh source.
  /// param mesh The gltf mesh.
  /// param buffers The gltf buffers.
  /// param world_mtx The node transform.
  /// return Whether every primitive has normals.
  fn load_mesh(
    source: &mut HalaMeshSource,
    mesh: &gltf::Mesh,
    buffers: &[gltf::buffer::Data],
    world_mtx: &Mat4,
  ) -> Result<bool, HalaRendererError> {
    let mesh_name = mesh.name().unwrap_or("<Unnamed>");
    let normal_mtx = Mat3::from_mat4(*world_mtx).inverse().transpose();
    let mut has_normals = true;

    for primitive in mesh.primitives() {
      if primitive.mode() != gltf::mesh::Mode::Triangles {
        log::warn!("Skip primitive {} of mesh \"{}\", it is not a triangle list.", primitive.index(), mesh_name);
        continue;
      }
      let reader = primitive.reader(|i| buffers.get(i.index()).map(|data| &data.0[..]));

      let positions = reader.read_positions()
        .ok_or(HalaRendererError::new(&format!("Read positions from mesh \"{}\" failed.", mesh_name), None))?
        .map(|p| world_mtx.transform_point3(Vec3::from(p)))
        .collect::<Vec<_>>();
      let base = source.positions.len() as u32;
      let indices = match reader.read_indices() {
        Some(indices) => indices.into_u32().map(|i| base + i).collect::<Vec<_>>(),
        None => (base..base + positions.len() as u32).collect(),
      };

      match reader.read_normals() {
        Some(normals) => source.normals.extend(normals.map(|n| (normal_mtx * Vec3::from(n)).normalize_or_zero())),
        None => has_normals = false,
      }
      match reader.read_tex_coords(0) {
        Some(tex_coords) => source.tex_coords.extend(tex_coords.into_f32().map(Vec2::from)),
        None => source.tex_coords.extend(std::iter::repeat(Vec2::ZERO).take(positions.len())),
      }

      source.positions.extend(positions);
      source.indices.extend(indices);
    }

    Ok(has_normals)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn base64(data: &[u8]) -> String {
    const TABLE: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::new();
    for chunk in data.chunks(3) {
      let b = [chunk[0], *chunk.get(1).unwrap_or(&0), *chunk.get(2).unwrap_or(&0)];
      let n = (b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32;
      for k in 0..4 {
        if k <= chunk.len() {
          out.push(TABLE[(n >> (18 - 6 * k) & 63) as usize] as char);
        } else {
          out.push('=');
        }
      }
    }
    out
  }

  fn triangle_gltf() -> Vec<u8> {
    let positions: [[f32; 3]; 3] = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
    let indices: [u16; 4] = [0, 1, 2, 0];
    let mut buffer = bytemuck::cast_slice::<[f32; 3], u8>(&positions).to_vec();
    buffer.extend_from_slice(bytemuck::cast_slice(&indices));
    format!(
      r#"{{
        "asset": {{"version": "2.0"}},
        "scene": 0,
        "scenes": [{{"nodes": [0]}}],
        "nodes": [{{"mesh": 0, "translation": [0.0, 0.0, -5.0], "children": [1]}}, {{"mesh": 0, "scale": [2.0, 2.0, 2.0]}}],
        "meshes": [{{"primitives": [{{"attributes": {{"POSITION": 0}}, "indices": 1}}]}}],
        "buffers": [{{"byteLength": {len}, "uri": "data:application/octet-stream;base64,{data}"}}],
        "bufferViews": [
          {{"buffer": 0, "byteOffset": 0, "byteLength": 36}},
          {{"buffer": 0, "byteOffset": 36, "byteLength": 6}}
        ],
        "accessors": [
          {{"bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3", "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0]}},
          {{"bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR"}}
        ]
      }}"#,
      len = buffer.len(),
      data = base64(&buffer),
    ).into_bytes()
  }

  #[test]
  fn nodes_are_flattened_with_transforms() {
    let source = HalaGltfLoader::load_slice("triangle", &triangle_gltf()).unwrap();
    assert_eq!(source.indices, vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(source.positions[1], Vec3::new(1.0, 0.0, -5.0));
    // The child inherits the parent translation.
    assert_eq!(source.positions[4], Vec3::new(2.0, 0.0, -5.0));
    assert!(source.normals.is_empty());
    assert_eq!(source.tex_coords.len(), 6);
    assert!(source.validate().is_ok());
  }

  #[test]
  fn garbage_is_an_error() {
    assert!(HalaGltfLoader::load_slice("garbage", b"not a gltf").is_err());
  }
}
