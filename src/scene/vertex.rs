use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

/// The vertex.
/// The normal is packed to 8 bits per component, the texture coordinate is stored as half floats.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct HalaVertex {
  pub position: [f32; 3],
  pub normal: u32,
  pub tex_coord: [u16; 2],
}

/// The implementation of the vertex.
impl HalaVertex {

  /// Create a packed vertex.
  /// param position: The position.
  /// param normal: The unit normal.
  /// param tex_coord: The texture coordinate.
  /// return: The vertex.
  pub fn new(position: Vec3, normal: Vec3, tex_coord: Vec2) -> Self {
    Self {
      position: position.to_array(),
      normal: pack_normal(normal),
      tex_coord: [meshopt::quantize_half(tex_coord.x), meshopt::quantize_half(tex_coord.y)],
    }
  }

  /// Get the position.
  /// return: The position.
  pub fn position(&self) -> Vec3 {
    Vec3::from_array(self.position)
  }

}

impl meshopt::DecodePosition for HalaVertex {
  fn decode_position(&self) -> [f32; 3] {
    self.position
  }
}

/// Pack a unit normal into the low 24 bits, x in the lowest byte.
/// param normal: The unit normal.
/// return: The packed normal.
pub fn pack_normal(normal: Vec3) -> u32 {
  let encode = |v: f32| (v.clamp(-1.0, 1.0) * 127.0 + 127.0).round() as u32;
  encode(normal.x) | encode(normal.y) << 8 | encode(normal.z) << 16
}

/// Unpack a normal written by [`pack_normal`].
/// param packed: The packed normal.
/// return: The normal, close to unit length.
pub fn unpack_normal(packed: u32) -> Vec3 {
  let decode = |shift: u32| (((packed >> shift) & 0xff) as f32 - 127.0) / 127.0;
  Vec3::new(decode(0), decode(8), decode(16))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn packed_normals_stay_close() {
    for normal in [Vec3::X, Vec3::NEG_Y, Vec3::new(0.6, 0.0, -0.8)] {
      let decoded = unpack_normal(pack_normal(normal));
      assert!((decoded - normal).length() < 1.0 / 100.0, "{:?} -> {:?}", normal, decoded);
    }
  }

  #[test]
  fn position_is_stored_unpacked() {
    let vertex = HalaVertex::new(Vec3::new(0.1, -2.5, 7.0), Vec3::Y, Vec2::new(0.5, 0.25));
    assert_eq!(vertex.position(), Vec3::new(0.1, -2.5, 7.0));
    assert_eq!(unpack_normal(vertex.normal), unpack_normal(pack_normal(Vec3::Y)));
  }

  #[test]
  fn vertex_is_five_words() {
    assert_eq!(std::mem::size_of::<HalaVertex>(), 20);
  }
}
