use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Mat4, Quat, Vec3, Vec4};

use crate::scene::lod::HALA_MAX_LOD_COUNT;

/// The camera.
/// Looks down its local -Z, the projection is reverse-Z with an infinite far plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HalaCamera {
  pub position: Vec3,
  pub orientation: Quat,
  /// The vertical field of view in radians.
  pub fov_y: f32,
  pub znear: f32,
}

impl Default for HalaCamera {
  fn default() -> Self {
    Self {
      position: Vec3::ZERO,
      orientation: Quat::IDENTITY,
      fov_y: std::f32::consts::FRAC_PI_3,
      znear: 0.01,
    }
  }
}

/// The implementation of the camera.
impl HalaCamera {

  /// Create a camera looking at a target.
  /// param position: The eye position.
  /// param target: The point to look at.
  /// param up: The up direction.
  /// param fov_y: The vertical field of view in radians.
  /// param znear: The near plane distance.
  /// return: The camera.
  pub fn look_at(position: Vec3, target: Vec3, up: Vec3, fov_y: f32, znear: f32) -> Self {
    let view = Mat4::look_at_rh(position, target, up);
    let orientation = Quat::from_mat3(&Mat3::from_mat4(view).transpose()).normalize();
    Self {
      position,
      orientation,
      fov_y,
      znear,
    }
  }

  pub fn view_matrix(&self) -> Mat4 {
    Mat4::from_rotation_translation(self.orientation, self.position).inverse()
  }

  /// Get the projection matrix.
  /// param aspect: The width over height ratio.
  /// return: The projection matrix.
  pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
    Mat4::perspective_infinite_reverse_rh(self.fov_y, aspect, self.znear)
  }

}

/// The per frame feature switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HalaFeatureToggles {
  /// Frustum and occlusion culling. When off every instance is drawn.
  pub cull_enabled: bool,
  pub lod_enabled: bool,
  pub occlusion_enabled: bool,
  /// Normal cone culling of meshlets on the meshlet path.
  pub cone_cull_enabled: bool,
}

impl Default for HalaFeatureToggles {
  fn default() -> Self {
    Self {
      cull_enabled: true,
      lod_enabled: true,
      occlusion_enabled: true,
      cone_cull_enabled: true,
    }
  }
}

/// The push constants of the cull pass.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct HalaCullData {
  pub view: Mat4,
  /// View space planes, inside when dot(xyz, p) + w >= 0.
  pub frustum: [Vec4; 6],
  pub lod_distances: [f32; HALA_MAX_LOD_COUNT],
  pub p00: f32,
  pub p11: f32,
  pub znear: f32,
  pub draw_distance: f32,
  pub pyramid_width: f32,
  pub pyramid_height: f32,
  pub pyramid_levels: u32,
  pub draw_count: u32,
  pub cull_enabled: u32,
  pub lod_enabled: u32,
  pub occlusion_enabled: u32,
  pub _padding: u32,
}

/// The implementation of the cull data.
impl HalaCullData {

  /// Build the cull constants of a frame.
  /// param camera: The camera.
  /// param aspect: The width over height ratio.
  /// param draw_distance: The far cutoff.
  /// param lod_base_distance: The distance where LOD1 starts.
  /// param pyramid: The pyramid extent and level count.
  /// param draw_count: The instance count.
  /// param toggles: The feature switches.
  /// return: The cull data.
  pub fn new(
    camera: &HalaCamera,
    aspect: f32,
    draw_distance: f32,
    lod_base_distance: f32,
    pyramid: (u32, u32, u32),
    draw_count: u32,
    toggles: &HalaFeatureToggles,
  ) -> Self {
    let projection = camera.projection_matrix(aspect);
    Self {
      view: camera.view_matrix(),
      frustum: extract_frustum_planes(&projection, draw_distance),
      lod_distances: lod_distances(lod_base_distance),
      p00: projection.x_axis.x,
      p11: projection.y_axis.y,
      znear: camera.znear,
      draw_distance,
      pyramid_width: pyramid.0 as f32,
      pyramid_height: pyramid.1 as f32,
      pyramid_levels: pyramid.2,
      draw_count,
      cull_enabled: toggles.cull_enabled as u32,
      lod_enabled: toggles.lod_enabled as u32,
      occlusion_enabled: toggles.occlusion_enabled as u32,
      _padding: 0,
    }
  }

}

/// The push constants of the geometry pass.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct HalaDrawData {
  pub view_proj: Mat4,
  pub camera_position: [f32; 3],
  pub cone_cull_enabled: u32,
}

/// Extract the view space frustum planes from a projection.
/// The far plane is placed at the draw distance, planes are normalized.
/// param projection: The projection matrix.
/// param draw_distance: The far cutoff.
/// return: Left, right, bottom, top, near and far planes.
pub fn extract_frustum_planes(projection: &Mat4, draw_distance: f32) -> [Vec4; 6] {
  let r0 = projection.row(0);
  let r1 = projection.row(1);
  let r2 = projection.row(2);
  let r3 = projection.row(3);
  let normalize = |plane: Vec4| {
    let length = plane.truncate().length();
    if length > 0.0 { plane / length } else { plane }
  };
  [
    normalize(r3 + r0),
    normalize(r3 - r0),
    normalize(r3 + r1),
    normalize(r3 - r1),
    // Depth runs from 1 at the near plane to 0 at infinity.
    normalize(r3 - r2),
    Vec4::new(0.0, 0.0, 1.0, draw_distance),
  ]
}

/// The LOD ladder, each threshold doubles the previous one.
pub fn lod_distances(base: f32) -> [f32; HALA_MAX_LOD_COUNT] {
  std::array::from_fn(|k| base * (1u32 << k) as f32)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cull_data_has_no_padding() {
    assert_eq!(std::mem::size_of::<HalaCullData>(), 240);
    assert_eq!(std::mem::size_of::<HalaDrawData>(), 80);
  }

  #[test]
  fn look_at_faces_the_target() {
    let camera = HalaCamera::look_at(Vec3::new(0.0, 0.0, 10.0), Vec3::new(0.0, 0.0, 20.0), Vec3::Y, 1.0, 0.1);
    let view_space = camera.view_matrix().transform_point3(Vec3::new(0.0, 0.0, 15.0));
    assert!((view_space - Vec3::new(0.0, 0.0, -5.0)).length() < 1e-4);
  }

  #[test]
  fn planes_point_inwards() {
    let projection = HalaCamera::default().projection_matrix(16.0 / 9.0);
    let planes = extract_frustum_planes(&projection, 100.0);
    let inside = Vec3::new(0.0, 0.0, -10.0);
    for plane in planes {
      assert!((plane.truncate().length() - 1.0).abs() < 1e-5);
      assert!(plane.truncate().dot(inside) + plane.w > 0.0);
    }
    // The near plane sits at znear.
    let near = planes[4];
    assert!((near.truncate().dot(Vec3::new(0.0, 0.0, -0.01)) + near.w).abs() < 1e-6);
    // The far plane sits at the draw distance.
    let far = planes[5];
    assert!(far.truncate().dot(Vec3::new(0.0, 0.0, -101.0)) + far.w < 0.0);
  }

  #[test]
  fn lod_ladder_doubles() {
    let ladder = lod_distances(10.0);
    assert_eq!(ladder[0], 10.0);
    assert_eq!(ladder[3], 80.0);
    assert!(ladder.windows(2).all(|pair| pair[0] < pair[1]));
  }
}
