use glam::{Quat, Vec3};

use hala_cull::prelude::*;
use hala_cull::culling::HalaDepthPyramid;
use hala_cull::scene::HalaMeshLod;

fn init() {
  let _ = env_logger::builder().is_test(true).try_init();
}

fn strict_device(mesh_shader: bool) -> HalaSoftwareDevice {
  HalaSoftwareDevice::new(
    "test.device",
    HalaDeviceCapabilities { mesh_shader, ..Default::default() },
    HalaValidationMode::Strict,
  )
}

fn config(render_path: HalaRenderPath) -> HalaCullRendererConfig {
  HalaCullRendererConfig {
    name: "test".to_string(),
    render_path,
    validation_mode: HalaValidationMode::Strict,
    ..Default::default()
  }
}

/// A unit quad in the XY plane facing +Z.
fn quad() -> HalaMeshSource {
  HalaMeshSource::new(
    "quad",
    vec![
      Vec3::new(-1.0, -1.0, 0.0),
      Vec3::new(1.0, -1.0, 0.0),
      Vec3::new(1.0, 1.0, 0.0),
      Vec3::new(-1.0, 1.0, 0.0),
    ],
    vec![0, 1, 2, 0, 2, 3],
  )
}

/// Small disjoint triangles spread over the unit square, no vertex is shared.
fn triangle_soup(count: u32) -> HalaMeshSource {
  let columns = 30;
  let mut positions = Vec::new();
  for i in 0..count {
    let x = (i % columns) as f32 / columns as f32 * 2.0 - 1.0;
    let y = (i / columns) as f32 / columns as f32 * 2.0 - 1.0;
    positions.push(Vec3::new(x, y, 0.0));
    positions.push(Vec3::new(x + 0.05, y, 0.0));
    positions.push(Vec3::new(x, y + 0.05, 0.0));
  }
  HalaMeshSource::new("soup", positions, (0..count * 3).collect())
}

fn uv_sphere(rings: u32, segments: u32) -> HalaMeshSource {
  let mut positions = Vec::new();
  for ring in 0..=rings {
    let theta = ring as f32 / rings as f32 * std::f32::consts::PI;
    for segment in 0..=segments {
      let phi = segment as f32 / segments as f32 * std::f32::consts::TAU;
      positions.push(Vec3::new(theta.sin() * phi.cos(), theta.cos(), theta.sin() * phi.sin()));
    }
  }
  let mut indices = Vec::new();
  for ring in 0..rings {
    for segment in 0..segments {
      let a = ring * (segments + 1) + segment;
      let b = a + segments + 1;
      indices.extend_from_slice(&[a, b, a + 1, a + 1, b, b + 1]);
    }
  }
  HalaMeshSource::new("sphere", positions, indices)
}

fn camera() -> HalaCamera {
  HalaCamera::default()
}

#[test]
fn disabled_culling_draws_every_instance() -> anyhow::Result<()> {
  init();
  let mut geometry = HalaGeometry::default();
  let quad = quad();
  geometry.add_mesh_with_lods(&quad, vec![quad.indices.clone()], false)?;
  let mut instances = HalaInstanceTable::new();
  for i in 0..100 {
    // Half of them behind the camera.
    let z = if i % 2 == 0 { -10.0 } else { 10.0 };
    instances.push(&geometry.meshes, 0, Vec3::new((i % 10) as f32 * 0.1, 0.0, z), 1.0, Quat::IDENTITY)?;
  }

  let mut renderer = HalaCullRenderer::new(strict_device(false), config(HalaRenderPath::Indexed))?;
  renderer.set_scene(&geometry, &instances)?;
  let toggles = HalaFeatureToggles { cull_enabled: false, ..Default::default() };
  renderer.render_frame(&camera(), 64, 64, &toggles)?;

  assert_eq!(renderer.read_visible_count()?, 100);
  let mut drawn = renderer.read_draw_commands()?.iter().map(|command| command.draw_index).collect::<Vec<_>>();
  drawn.sort_unstable();
  assert_eq!(drawn, (0..100).collect::<Vec<_>>());
  assert_eq!(renderer.device().statistics().draws, 100);

  // With culling the instances behind the camera are gone.
  renderer.render_frame(&camera(), 64, 64, &HalaFeatureToggles::default())?;
  assert_eq!(renderer.read_visible_count()?, 50);
  assert!(renderer.read_draw_commands()?.iter().all(|command| command.draw_index % 2 == 0));
  Ok(())
}

#[test]
fn excluding_frustum_draws_nothing() -> anyhow::Result<()> {
  init();
  let mut renderer = HalaCullRenderer::new(strict_device(false), config(HalaRenderPath::Indexed))?;
  let scatter = HalaScatterDesc {
    count: 500,
    extent_min: [-20.0, -20.0, 10.0],
    extent_max: [20.0, 20.0, 60.0],
    ..Default::default()
  };
  renderer.load_scene_from_sources(&[quad()], &scatter)?;
  renderer.render_frame(&camera(), 64, 64, &HalaFeatureToggles::default())?;
  assert_eq!(renderer.read_visible_count()?, 0);
  assert!(renderer.read_draw_commands()?.is_empty());
  assert_eq!(renderer.device().statistics().triangles, 0);
  Ok(())
}

#[test]
fn lod_selection_splits_the_draws_by_distance() -> anyhow::Result<()> {
  init();
  let soup = triangle_soup(840);
  let mut geometry = HalaGeometry::default();
  geometry.add_mesh_with_lods(&soup, vec![soup.indices.clone(), soup.indices[..630].to_vec()], true)?;
  let lods = geometry.meshes[0].lods().to_vec();
  assert_eq!(lods.len(), 2);
  assert_eq!(lods[0], HalaMeshLod { index_offset: 0, index_count: 2520, meshlet_offset: 0, meshlet_count: 40 });
  assert_eq!(lods[1], HalaMeshLod { index_offset: 2520, index_count: 630, meshlet_offset: 64, meshlet_count: 10 });
  assert_eq!(geometry.meshlets.len() % 32, 0);

  let mut instances = HalaInstanceTable::new();
  for i in 0..1000 {
    let x = (i % 10) as f32 * 0.2 - 1.0;
    // The LOD1 threshold is 10 units away.
    let z = if i % 2 == 0 { -5.0 } else { -50.0 };
    instances.push(&geometry.meshes, 0, Vec3::new(x, 0.0, z), 1.0, Quat::IDENTITY)?;
  }

  let mut renderer = HalaCullRenderer::new(strict_device(true), config(HalaRenderPath::Meshlet))?;
  assert_eq!(renderer.render_path(), HalaRenderPath::Meshlet);
  renderer.set_scene(&geometry, &instances)?;
  let toggles = HalaFeatureToggles { occlusion_enabled: false, ..Default::default() };
  renderer.render_frame(&camera(), 64, 64, &toggles)?;

  assert_eq!(renderer.read_visible_count()?, 1000);
  let commands = renderer.read_draw_commands()?;
  let near = commands.iter().filter(|command| command.tasks.first_task == 0).collect::<Vec<_>>();
  let far = commands.iter().filter(|command| command.tasks.first_task == 2).collect::<Vec<_>>();
  assert_eq!(near.len(), 500);
  assert_eq!(far.len(), 500);
  assert!(near.iter().all(|command| command.draw_index % 2 == 0 && command.tasks.task_count == 2));
  assert!(far.iter().all(|command| command.draw_index % 2 == 1 && command.tasks.task_count == 1));
  assert!(far.iter().all(|command| command.indexed.first_index == 2520 && command.indexed.index_count == 630));

  // Without LOD selection everything uses full detail.
  let toggles = HalaFeatureToggles { lod_enabled: false, ..toggles };
  renderer.render_frame(&camera(), 64, 64, &toggles)?;
  assert!(renderer.read_draw_commands()?.iter().all(|command| command.tasks.first_task == 0));
  Ok(())
}

#[test]
fn resize_recreates_the_pyramid_once() -> anyhow::Result<()> {
  init();
  let mut renderer = HalaCullRenderer::new(strict_device(false), config(HalaRenderPath::Indexed))?;
  renderer.load_scene_from_sources(&[quad()], &HalaScatterDesc { count: 16, ..Default::default() })?;

  renderer.render_frame(&camera(), 800, 600, &HalaFeatureToggles::default())?;
  let pyramid = renderer.depth_pyramid().ok_or(anyhow::anyhow!("no pyramid"))?;
  assert_eq!((pyramid.width, pyramid.height, pyramid.level_count), (400, 300, 8));
  assert_eq!(pyramid.mip_views.len(), 8);
  let old_image = pyramid.image;
  let old_views = pyramid.mip_views.iter().copied().chain([pyramid.view]).collect::<Vec<_>>();
  let old_depth = renderer.depth_target().map(|depth| depth.image).ok_or(anyhow::anyhow!("no depth"))?;
  let before = *renderer.device().statistics();

  // Same extent, nothing is recreated.
  renderer.render_frame(&camera(), 800, 600, &HalaFeatureToggles::default())?;
  assert_eq!(renderer.device().statistics().image_views_destroyed, before.image_views_destroyed);

  renderer.render_frame(&camera(), 320, 200, &HalaFeatureToggles::default())?;
  let after = *renderer.device().statistics();
  // Every mip view, the full view and the depth view.
  assert_eq!(after.image_views_destroyed - before.image_views_destroyed, 10);
  assert_eq!(after.images_destroyed - before.images_destroyed, 2);
  assert!(!renderer.device().is_image_alive(old_image));
  assert!(!renderer.device().is_image_alive(old_depth));
  assert!(old_views.iter().all(|&view| !renderer.device().is_image_view_alive(view)));

  let pyramid = renderer.depth_pyramid().ok_or(anyhow::anyhow!("no pyramid"))?;
  assert_eq!(HalaDepthPyramid::compute_extent(320, 200), (160, 100, 6));
  assert_eq!((pyramid.width, pyramid.height, pyramid.level_count), (160, 100, 6));
  assert_eq!(renderer.info().width, 320);
  assert_eq!(renderer.device().live_image_view_count(), 6 + 1 + 1);

  // A minimized window renders nothing and keeps the resources.
  renderer.render_frame(&camera(), 0, 0, &HalaFeatureToggles::default())?;
  assert_eq!(renderer.device().live_image_view_count(), 8);

  renderer.release()?;
  assert_eq!(renderer.device().live_image_view_count(), 0);
  assert!(renderer.render_frame(&camera(), 320, 200, &HalaFeatureToggles::default()).is_err());
  Ok(())
}

#[test]
fn occluded_instances_are_culled_on_the_next_frame() -> anyhow::Result<()> {
  init();
  let quad = quad();
  let mut geometry = HalaGeometry::default();
  geometry.add_mesh_with_lods(&quad, vec![quad.indices.clone()], true)?;
  let mut instances = HalaInstanceTable::new();
  // A wall filling the view and a small quad behind it.
  instances.push(&geometry.meshes, 0, Vec3::new(0.0, 0.0, -5.0), 10.0, Quat::IDENTITY)?;
  instances.push(&geometry.meshes, 0, Vec3::new(0.0, 0.0, -30.0), 1.0, Quat::IDENTITY)?;
  // And one off to the side that stays visible in front of the wall.
  instances.push(&geometry.meshes, 0, Vec3::new(1.0, 0.0, -3.0), 0.2, Quat::IDENTITY)?;

  let mut renderer = HalaCullRenderer::new(strict_device(true), config(HalaRenderPath::Auto))?;
  assert_eq!(renderer.render_path(), HalaRenderPath::Meshlet);
  renderer.set_scene(&geometry, &instances)?;

  // The fresh pyramid hides nothing.
  renderer.render_frame(&camera(), 128, 128, &HalaFeatureToggles::default())?;
  assert_eq!(renderer.read_visible_count()?, 3);
  assert!(renderer.device().statistics().depth_samples_passed > 0);

  renderer.render_frame(&camera(), 128, 128, &HalaFeatureToggles::default())?;
  assert_eq!(renderer.read_visible_count()?, 2);
  let mut drawn = renderer.read_draw_commands()?.iter().map(|command| command.draw_index).collect::<Vec<_>>();
  drawn.sort_unstable();
  assert_eq!(drawn, vec![0, 2]);

  // The occlusion switch brings it back.
  let toggles = HalaFeatureToggles { occlusion_enabled: false, ..Default::default() };
  renderer.render_frame(&camera(), 128, 128, &toggles)?;
  assert_eq!(renderer.read_visible_count()?, 3);
  assert!(renderer.device_mut().take_validation_hazards().is_empty());
  Ok(())
}

#[test]
fn simplified_scene_renders_on_both_paths() -> anyhow::Result<()> {
  init();
  let scatter = HalaScatterDesc {
    count: 300,
    extent_min: [-20.0, -20.0, -80.0],
    extent_max: [20.0, 20.0, -5.0],
    ..Default::default()
  };
  for (mesh_shader, path) in [(false, HalaRenderPath::Indexed), (true, HalaRenderPath::Meshlet)] {
    let mut renderer = HalaCullRenderer::new(strict_device(mesh_shader), config(HalaRenderPath::Auto))?;
    assert_eq!(renderer.render_path(), path);
    renderer.load_scene_from_sources(&[uv_sphere(16, 32), quad()], &scatter)?;
    assert_eq!(renderer.instance_count(), 300);
    for _ in 0..3 {
      renderer.render_frame(&camera(), 96, 64, &HalaFeatureToggles::default())?;
      let visible = renderer.read_visible_count()?;
      assert!(visible > 0 && visible <= 300);
    }
    assert_eq!(renderer.statistics().total_frames, 3);
  }
  Ok(())
}

#[test]
fn meshlet_request_without_mesh_shaders_falls_back() -> anyhow::Result<()> {
  init();
  let renderer = HalaCullRenderer::new(strict_device(false), config(HalaRenderPath::Meshlet))?;
  assert_eq!(renderer.render_path(), HalaRenderPath::Indexed);
  Ok(())
}

#[test]
fn missing_count_indirect_is_fatal() {
  init();
  let device = HalaSoftwareDevice::new(
    "test.device",
    HalaDeviceCapabilities { draw_indirect_count: false, ..Default::default() },
    HalaValidationMode::Log,
  );
  assert!(HalaCullRenderer::new(device, config(HalaRenderPath::Auto)).is_err());
}

#[test]
fn bad_meshes_are_rejected_at_load() -> anyhow::Result<()> {
  init();
  let mut renderer = HalaCullRenderer::new(strict_device(false), config(HalaRenderPath::Indexed))?;
  assert!(renderer.render_frame(&camera(), 64, 64, &HalaFeatureToggles::default()).is_err());

  let mut broken = quad();
  broken.indices[4] = 99;
  assert!(renderer.load_scene_from_sources(&[broken], &HalaScatterDesc::default()).is_err());
  let mut ragged = quad();
  ragged.indices.pop();
  assert!(renderer.load_scene_from_sources(&[ragged], &HalaScatterDesc::default()).is_err());
  assert!(renderer.load_scene(&["does/not/exist.gltf"], &HalaScatterDesc::default()).is_err());

  // A failed load leaves the renderer without a scene.
  assert_eq!(renderer.instance_count(), 0);
  assert!(renderer.render_frame(&camera(), 64, 64, &HalaFeatureToggles::default()).is_err());
  Ok(())
}
