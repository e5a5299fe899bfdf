use glam::{Vec3, Vec4, Vec4Swizzles};

use crate::error::HalaRendererError;
use crate::gfx::{
  for_each_invocation,
  read_push_constants,
  HalaBindingDesc,
  HalaBoundResources,
  HalaComputeKernel,
  HalaImageView,
};
use crate::culling::{
  cull_data::HalaCullData,
  draw_command::HalaDrawCommand,
};
use crate::scene::{
  instance::HalaInstance,
  mesh::HalaMesh,
};

/// The work group size of the cull pass.
pub const HALA_CULL_WORK_GROUP_SIZE: u32 = 32;

pub const CULL_BINDING_INSTANCES: u32 = 0;
pub const CULL_BINDING_MESHES: u32 = 1;
pub const CULL_BINDING_DRAW_COMMANDS: u32 = 2;
pub const CULL_BINDING_DRAW_COUNT: u32 = 3;
pub const CULL_BINDING_DEPTH_PYRAMID: u32 = 4;

const CULL_BINDINGS: [HalaBindingDesc; 5] = [
  HalaBindingDesc::storage_buffer(CULL_BINDING_INSTANCES, "instances", false),
  HalaBindingDesc::storage_buffer(CULL_BINDING_MESHES, "meshes", false),
  HalaBindingDesc::storage_buffer(CULL_BINDING_DRAW_COMMANDS, "draw_commands", true),
  HalaBindingDesc::storage_buffer(CULL_BINDING_DRAW_COUNT, "draw_count", true),
  HalaBindingDesc::sampled_image(CULL_BINDING_DEPTH_PYRAMID, "depth_pyramid"),
];

/// Test a view space sphere against the frustum planes.
/// param planes: The planes, inside when dot(xyz, p) + w >= 0.
/// param center: The view space center.
/// param radius: The radius.
/// return: True if the sphere is at least partially inside.
pub fn frustum_test(planes: &[Vec4], center: Vec3, radius: f32) -> bool {
  planes.iter().all(|plane| plane.xyz().dot(center) + plane.w >= -radius)
}

/// Project a view space sphere to a UV space box.
/// Uses the tangent lines of the sphere, exact for perspective projections.
/// param center: The view space center, the camera looks down -Z.
/// param radius: The radius.
/// param znear: The near plane distance.
/// param p00: The x scale of the projection.
/// param p11: The y scale of the projection.
/// return: The box as (min u, min v, max u, max v), None if the sphere crosses the near plane.
pub fn project_sphere(center: Vec3, radius: f32, znear: f32, p00: f32, p11: f32) -> Option<Vec4> {
  let c = Vec3::new(center.x, center.y, -center.z);
  if c.z < radius + znear {
    return None;
  }
  let cr = c * radius;
  let czr2 = c.z * c.z - radius * radius;

  let vx = (c.x * c.x + czr2).sqrt();
  let min_x = (vx * c.x - cr.z) / (vx * c.z + cr.x);
  let max_x = (vx * c.x + cr.z) / (vx * c.z - cr.x);

  let vy = (c.y * c.y + czr2).sqrt();
  let min_y = (vy * c.y - cr.z) / (vy * c.z + cr.y);
  let max_y = (vy * c.y + cr.z) / (vy * c.z - cr.y);

  // NDC y points up, texture rows go down.
  Some(Vec4::new(
    min_x * p00 * 0.5 + 0.5,
    0.5 - max_y * p11 * 0.5,
    max_x * p00 * 0.5 + 0.5,
    0.5 - min_y * p11 * 0.5,
  ))
}

/// Choose the pyramid level where a UV box spans at most two texels.
/// An unaligned box then touches 2x2 to 3x3 texels, never more than 4x4.
/// param uv_box: The box.
/// param width: The width of level 0.
/// param height: The height of level 0.
/// param level_count: The level count.
/// return: The level.
pub fn select_pyramid_level(uv_box: Vec4, width: f32, height: f32, level_count: u32) -> u32 {
  let size_x = (uv_box.z - uv_box.x) * width;
  let size_y = (uv_box.w - uv_box.y) * height;
  let level = (size_x.max(size_y).max(1.0).log2().ceil() as u32).saturating_sub(1);
  level.min(level_count.saturating_sub(1))
}

/// Test a view space sphere against the depth pyramid.
/// The pyramid holds reverse-Z depth reduced with min, so every texel is the farthest depth
/// below it.
/// param pyramid: The pyramid.
/// param center: The view space center.
/// param radius: The radius.
/// param data: The cull constants.
/// return: True if the sphere may be visible.
pub fn occlusion_test(pyramid: &HalaImageView, center: Vec3, radius: f32, data: &HalaCullData) -> bool {
  let Some(uv_box) = project_sphere(center, radius, data.znear, data.p00, data.p11) else {
    return true;
  };
  let uv_box = uv_box.clamp(Vec4::ZERO, Vec4::ONE);
  let level_index = select_pyramid_level(uv_box, data.pyramid_width, data.pyramid_height, data.pyramid_levels);
  let Some(level) = pyramid.level(level_index) else {
    return true;
  };

  let to_texel = |uv: f32, size: u32| ((uv * size as f32) as u32).min(size.saturating_sub(1));
  let x0 = to_texel(uv_box.x, level.width);
  let x1 = to_texel(uv_box.z, level.width);
  let y0 = to_texel(uv_box.y, level.height);
  let y1 = to_texel(uv_box.w, level.height);
  let mut occluder_depth = f32::MAX;
  for y in y0..=y1 {
    for x in x0..=x1 {
      occluder_depth = occluder_depth.min(level.load(x, y));
    }
  }

  let sphere_depth = data.znear / (-center.z - radius);
  sphere_depth >= occluder_depth
}

/// Select the LOD of an instance from its distance to the camera.
/// param center: The view space center.
/// param radius: The radius.
/// param lod_distances: The ascending distance thresholds.
/// param lod_count: The LOD count of the mesh.
/// return: The LOD index.
pub fn select_lod(center: Vec3, radius: f32, lod_distances: &[f32], lod_count: u32) -> u32 {
  let distance = (center.length() - radius).max(0.0);
  let max_lod = (lod_count.clamp(1, lod_distances.len().max(1) as u32) - 1) as usize;
  lod_distances.iter()
    .take(max_lod)
    .take_while(|&&threshold| distance > threshold)
    .count() as u32
}

/// The instance cull kernel.
/// One invocation per instance. Survivors get a slot from the atomic draw counter and a draw
/// command at their selected LOD, so the slot order is not the instance order.
pub struct HalaDrawCullKernel;

/// The implementation of the draw cull kernel.
impl HalaDrawCullKernel {

  /// Decide the visibility of one instance.
  /// param instance: The instance.
  /// param mesh: Its mesh.
  /// param data: The cull constants.
  /// param pyramid: The previous frame's depth pyramid.
  /// return: The selected LOD, None if culled.
  pub fn cull_instance(
    instance: &HalaInstance,
    mesh: &HalaMesh,
    data: &HalaCullData,
    pyramid: &HalaImageView,
  ) -> Option<u32> {
    let center = data.view.transform_point3(Vec3::from_array(instance.center));
    let radius = instance.radius;

    if data.cull_enabled != 0 {
      if !frustum_test(&data.frustum, center, radius) {
        return None;
      }
      if data.occlusion_enabled != 0 && !occlusion_test(pyramid, center, radius, data) {
        return None;
      }
    }

    if data.lod_enabled != 0 {
      Some(select_lod(center, radius, &data.lod_distances, mesh.lod_count))
    } else {
      Some(0)
    }
  }

}

/// The implementation of the compute kernel trait for the draw cull kernel.
impl HalaComputeKernel for HalaDrawCullKernel {

  fn name(&self) -> &str {
    "draw_cull"
  }

  fn bindings(&self) -> &[HalaBindingDesc] {
    &CULL_BINDINGS
  }

  fn push_constant_size(&self) -> usize {
    std::mem::size_of::<HalaCullData>()
  }

  fn local_size(&self) -> [u32; 2] {
    [HALA_CULL_WORK_GROUP_SIZE, 1]
  }

  fn shader_source(&self) -> Option<&'static str> {
    Some(include_str!("shaders/draw_cull.wgsl"))
  }

  fn execute(
    &self,
    resources: &HalaBoundResources,
    push_constants: &[u8],
    group_count: [u32; 3],
  ) -> Result<(), HalaRendererError> {
    let data: HalaCullData = read_push_constants(push_constants)?;
    let instances = resources.buffer(CULL_BINDING_INSTANCES)?;
    let meshes = resources.buffer(CULL_BINDING_MESHES)?;
    let commands = resources.buffer(CULL_BINDING_DRAW_COMMANDS)?;
    let counter = resources.buffer(CULL_BINDING_DRAW_COUNT)?;
    let pyramid = resources.image(CULL_BINDING_DEPTH_PYRAMID)?;
    let capacity = commands.len::<HalaDrawCommand>();

    for_each_invocation(group_count, self.local_size(), |[draw_index, _]| {
      if draw_index >= data.draw_count || draw_index as usize >= instances.len::<HalaInstance>() {
        return;
      }
      let instance: HalaInstance = instances.read(draw_index as usize);
      let mesh: HalaMesh = meshes.read(instance.mesh_index as usize);
      let Some(lod_index) = Self::cull_instance(&instance, &mesh, &data, pyramid) else {
        return;
      };

      let slot = counter.atomic_add(0, 1) as usize;
      debug_assert!(slot < capacity, "The draw command buffer overflows at slot {}.", slot);
      if slot < capacity {
        commands.write(slot, &HalaDrawCommand::new(draw_index, &instance, &mesh.lods[lod_index as usize]));
      }
    });
    Ok(())
  }

}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicU32;
  use glam::Mat4;
  use crate::culling::cull_data::{extract_frustum_planes, lod_distances, HalaCamera};
  use crate::gfx::HalaImageLevelView;

  const ZNEAR: f32 = 0.1;

  fn cull_data(width: u32, height: u32, levels: u32) -> HalaCullData {
    let projection = Mat4::perspective_infinite_reverse_rh(std::f32::consts::FRAC_PI_2, 1.0, ZNEAR);
    HalaCullData {
      view: Mat4::IDENTITY,
      frustum: extract_frustum_planes(&projection, 1000.0),
      lod_distances: lod_distances(10.0),
      p00: projection.x_axis.x,
      p11: projection.y_axis.y,
      znear: ZNEAR,
      draw_distance: 1000.0,
      pyramid_width: width as f32,
      pyramid_height: height as f32,
      pyramid_levels: levels,
      draw_count: 1,
      cull_enabled: 1,
      lod_enabled: 1,
      occlusion_enabled: 1,
      _padding: 0,
    }
  }

  /// Storage for a pyramid where every texel holds the same depth.
  fn flat_pyramid(width: u32, height: u32, levels: u32, depth: f32) -> Vec<(u32, u32, Vec<AtomicU32>)> {
    (0..levels)
      .map(|level| {
        let w = (width >> level).max(1);
        let h = (height >> level).max(1);
        let texels = (0..w * h).map(|_| AtomicU32::new(depth.to_bits())).collect();
        (w, h, texels)
      })
      .collect()
  }

  fn view(storage: &[(u32, u32, Vec<AtomicU32>)]) -> HalaImageView<'_> {
    HalaImageView::new(storage.iter().map(|(w, h, t)| HalaImageLevelView::new(*w, *h, t)).collect())
  }

  #[test]
  fn frustum_rejects_outside_and_keeps_straddling() {
    let projection = HalaCamera::default().projection_matrix(1.0);
    let planes = extract_frustum_planes(&projection, 100.0);
    assert!(frustum_test(&planes, Vec3::new(0.0, 0.0, -10.0), 1.0));
    // Behind the camera.
    assert!(!frustum_test(&planes, Vec3::new(0.0, 0.0, 10.0), 1.0));
    // Far to the left.
    assert!(!frustum_test(&planes, Vec3::new(-100.0, 0.0, -10.0), 1.0));
    // Straddling the right plane.
    let right = planes[1];
    let on_plane = Vec3::new(10.0, 0.0, -10.0);
    let offset = right.xyz().dot(on_plane) + right.w;
    assert!(frustum_test(&planes, on_plane - right.xyz() * (offset + 0.5), 1.0));
    // Beyond the draw distance.
    assert!(!frustum_test(&planes, Vec3::new(0.0, 0.0, -110.0), 1.0));
    // Touching a plane from outside is still inside.
    assert!(frustum_test(&planes, Vec3::new(0.0, 0.0, -101.0), 1.0));
  }

  #[test]
  fn projected_box_contains_the_sphere() {
    let data = cull_data(64, 64, 6);
    let center = Vec3::new(1.0, -2.0, -10.0);
    let uv = project_sphere(center, 1.0, ZNEAR, data.p00, data.p11).unwrap();
    assert!(uv.x < uv.z && uv.y < uv.w);
    let projection = Mat4::perspective_infinite_reverse_rh(std::f32::consts::FRAC_PI_2, 1.0, ZNEAR);
    for direction in [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z] {
      let clip = projection * (center + direction).extend(1.0);
      let u = clip.x / clip.w * 0.5 + 0.5;
      let v = 0.5 - clip.y / clip.w * 0.5;
      assert!(u >= uv.x - 1e-5 && u <= uv.z + 1e-5);
      assert!(v >= uv.y - 1e-5 && v <= uv.w + 1e-5);
    }
    assert!(project_sphere(Vec3::new(0.0, 0.0, -0.5), 1.0, ZNEAR, data.p00, data.p11).is_none());
  }

  #[test]
  fn occlusion_is_conservative_at_every_level() {
    let plane_distance = 50.0;
    let plane_depth = ZNEAR / plane_distance;
    let (width, height, levels) = (256, 256, 8);
    let storage = flat_pyramid(width, height, levels, plane_depth);
    let pyramid = view(&storage);
    let data = cull_data(width, height, levels);

    // Growing radii push the footprint through every level.
    for radius in [0.05f32, 0.1, 0.3, 0.6, 1.2, 2.5, 5.0, 10.0] {
      let near_center = Vec3::new(0.0, 0.0, -(plane_distance * 0.5));
      let far_center = Vec3::new(0.0, 0.0, -(plane_distance + radius + 5.0));
      assert!(occlusion_test(&pyramid, near_center, radius, &data), "near sphere of radius {} culled", radius);
      assert!(!occlusion_test(&pyramid, far_center, radius, &data), "far sphere of radius {} kept", radius);
    }
    // A sphere poking through the plane is kept.
    assert!(occlusion_test(&pyramid, Vec3::new(0.0, 0.0, -(plane_distance + 0.5)), 1.0, &data));
  }

  #[test]
  fn footprint_level_grows_with_size() {
    let small = select_pyramid_level(Vec4::new(0.5, 0.5, 0.5 + 1.0 / 256.0, 0.5 + 1.0 / 256.0), 256.0, 256.0, 8);
    let large = select_pyramid_level(Vec4::new(0.0, 0.0, 0.5, 0.5), 256.0, 256.0, 8);
    let huge = select_pyramid_level(Vec4::new(0.0, 0.0, 1.0, 1.0), 256.0, 256.0, 8);
    assert_eq!(small, 0);
    assert_eq!(large, 6);
    assert_eq!(huge, 7);
  }

  #[test]
  fn footprint_samples_at_most_four_by_four_texels() {
    let (width, height, levels) = (256u32, 256u32, 9u32);
    for step in 1..200 {
      let size = step as f32 / 200.0;
      let offset = (step % 7) as f32 * 0.013;
      let uv_box = Vec4::new(offset, offset, (offset + size).min(1.0), (offset + size).min(1.0));
      let level = select_pyramid_level(uv_box, width as f32, height as f32, levels);
      let level_size = (width >> level).max(1);
      let to_texel = |uv: f32| ((uv * level_size as f32) as u32).min(level_size - 1);
      let span = to_texel(uv_box.z) - to_texel(uv_box.x) + 1;
      assert!(span <= 4, "box of {} spans {} texels at level {}", size, span, level);
      // One level finer would need more than two texels.
      if level > 0 {
        assert!((uv_box.z - uv_box.x) * (width >> (level - 1)) as f32 > 2.0);
      }
    }
  }

  #[test]
  fn unbuilt_pyramid_occludes_nothing() {
    let storage = flat_pyramid(64, 64, 6, 0.0);
    let pyramid = view(&storage);
    let data = cull_data(64, 64, 6);
    assert!(occlusion_test(&pyramid, Vec3::new(0.0, 0.0, -900.0), 0.1, &data));
  }

  #[test]
  fn lod_selection_is_monotone() {
    let ladder = lod_distances(10.0);
    let mut previous = 0;
    for step in 0..400 {
      let distance = step as f32;
      let lod = select_lod(Vec3::new(0.0, 0.0, -distance), 0.0, &ladder, 8);
      assert!(lod >= previous && lod < 8);
      previous = lod;
    }
    assert_eq!(select_lod(Vec3::new(0.0, 0.0, -5.0), 0.0, &ladder, 8), 0);
    assert_eq!(select_lod(Vec3::new(0.0, 0.0, -15.0), 0.0, &ladder, 8), 1);
    assert_eq!(select_lod(Vec3::new(0.0, 0.0, -15.0), 0.0, &ladder, 1), 0);
    assert_eq!(select_lod(Vec3::new(0.0, 0.0, -1e6), 0.0, &ladder, 3), 2);
    // The radius pulls the nearest point closer.
    assert_eq!(select_lod(Vec3::new(0.0, 0.0, -15.0), 6.0, &ladder, 8), 0);
  }

  #[test]
  fn disabled_culling_keeps_everything() {
    let storage = flat_pyramid(64, 64, 6, 1.0);
    let pyramid = view(&storage);
    let mut data = cull_data(64, 64, 6);
    let mesh = HalaMesh { lod_count: 2, ..Default::default() };
    let behind = HalaInstance { center: [0.0, 0.0, 50.0], radius: 1.0, ..Default::default() };
    assert_eq!(HalaDrawCullKernel::cull_instance(&behind, &mesh, &data, &pyramid), None);
    data.cull_enabled = 0;
    assert_eq!(HalaDrawCullKernel::cull_instance(&behind, &mesh, &data, &pyramid), Some(1));
    data.lod_enabled = 0;
    assert_eq!(HalaDrawCullKernel::cull_instance(&behind, &mesh, &data, &pyramid), Some(0));
  }
}
