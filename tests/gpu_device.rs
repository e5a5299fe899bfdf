use glam::{Quat, Vec3};

use hala_cull::prelude::*;
use hala_cull::gfx::{
  HalaBufferDesc,
  HalaBufferUsageFlags,
  HalaCommandBuffer,
  HalaFormat,
  HalaImageDesc,
  HalaImageUsageFlags,
};

fn init() {
  let _ = env_logger::builder().is_test(true).try_init();
}

/// The GPU device of the machine, None on machines without a usable adapter.
fn gpu_device() -> Option<HalaGpuDevice> {
  init();
  match HalaGpuDevice::new("test.gpu") {
    Ok(device) if device.capabilities().draw_indirect_count => Some(device),
    Ok(device) => {
      log::warn!("The adapter \"{}\" has no count-indirect draws, skipped.", device.adapter_info.name);
      None
    },
    Err(err) => {
      log::warn!("No GPU device, skipped: {}", err);
      None
    },
  }
}

fn config() -> HalaCullRendererConfig {
  HalaCullRendererConfig {
    name: "gpu_test".to_string(),
    render_path: HalaRenderPath::Auto,
    ..Default::default()
  }
}

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

#[test]
fn buffers_round_trip_through_the_adapter() -> anyhow::Result<()> {
  let Some(mut device) = gpu_device() else { return Ok(()) };
  let buffer = device.create_buffer(&HalaBufferDesc {
    size: 10,
    usage: HalaBufferUsageFlags::STORAGE_BUFFER,
    debug_name: "round_trip".to_string(),
  })?;
  device.upload_buffer(buffer, 0, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10])?;
  assert_eq!(device.read_buffer(buffer, 4, 6)?, vec![5, 6, 7, 8, 9, 10]);
  assert!(device.read_buffer(buffer, 8, 4).is_err());

  let mut command_buffer = HalaCommandBuffer::new("fill");
  command_buffer.fill_buffer(buffer, 0, 8, 0);
  device.submit(&command_buffer)?;
  assert_eq!(device.read_buffer(buffer, 0, 10)?, vec![0, 0, 0, 0, 0, 0, 0, 0, 9, 10]);

  command_buffer.reset();
  command_buffer.fill_buffer(buffer, 0, 8, 7);
  assert!(device.submit(&command_buffer).is_err());

  device.destroy_buffer(buffer)?;
  assert!(device.destroy_buffer(buffer).is_err());
  Ok(())
}

#[test]
fn cleared_images_read_back_every_level() -> anyhow::Result<()> {
  let Some(mut device) = gpu_device() else { return Ok(()) };
  let image = device.create_image(&HalaImageDesc {
    width: 33,
    height: 17,
    mip_levels: 3,
    format: HalaFormat::R32Sfloat,
    usage: HalaImageUsageFlags::STORAGE | HalaImageUsageFlags::SAMPLED | HalaImageUsageFlags::TRANSFER_DST,
    debug_name: "pyramid".to_string(),
  })?;
  let mut command_buffer = HalaCommandBuffer::new("clear");
  command_buffer.clear_image(image, 0.25);
  device.submit(&command_buffer)?;

  let level = device.read_image_level(image, 2)?;
  assert_eq!(level.len(), 8 * 4);
  assert!(level.iter().all(|&depth| depth == 0.25));
  assert!(device.read_image_level(image, 3).is_err());
  device.destroy_image(image)?;
  Ok(())
}

#[test]
fn culling_runs_on_the_adapter() -> anyhow::Result<()> {
  let Some(device) = gpu_device() else { return Ok(()) };
  let quad = quad();
  let mut geometry = HalaGeometry::default();
  geometry.add_mesh_with_lods(&quad, vec![quad.indices.clone()], false)?;
  let mut instances = HalaInstanceTable::new();
  for i in 0..100 {
    let z = if i % 2 == 0 { -10.0 } else { 10.0 };
    instances.push(&geometry.meshes, 0, Vec3::new((i % 10) as f32 * 0.1, 0.0, z), 1.0, Quat::IDENTITY)?;
  }

  let mut renderer = HalaCullRenderer::new(device, config())?;
  assert_eq!(renderer.render_path(), HalaRenderPath::Indexed);
  renderer.set_scene(&geometry, &instances)?;

  let toggles = HalaFeatureToggles { cull_enabled: false, ..Default::default() };
  renderer.render_frame(&HalaCamera::default(), 64, 64, &toggles)?;
  assert_eq!(renderer.read_visible_count()?, 100);

  renderer.render_frame(&HalaCamera::default(), 64, 64, &HalaFeatureToggles::default())?;
  assert_eq!(renderer.read_visible_count()?, 50);
  let mut drawn = renderer.read_draw_commands()?.iter().map(|command| command.draw_index).collect::<Vec<_>>();
  drawn.sort_unstable();
  assert_eq!(drawn, (0..100).step_by(2).collect::<Vec<_>>());
  assert!(renderer.device().statistics().indirect_draws >= 2);
  renderer.release()?;
  Ok(())
}

#[test]
fn occlusion_uses_the_reduced_pyramid() -> anyhow::Result<()> {
  let Some(device) = gpu_device() else { return Ok(()) };
  let quad = quad();
  let mut geometry = HalaGeometry::default();
  geometry.add_mesh_with_lods(&quad, vec![quad.indices.clone()], false)?;
  let mut instances = HalaInstanceTable::new();
  instances.push(&geometry.meshes, 0, Vec3::new(0.0, 0.0, -5.0), 10.0, Quat::IDENTITY)?;
  instances.push(&geometry.meshes, 0, Vec3::new(0.0, 0.0, -30.0), 1.0, Quat::IDENTITY)?;
  instances.push(&geometry.meshes, 0, Vec3::new(1.0, 0.0, -3.0), 0.2, Quat::IDENTITY)?;

  let mut renderer = HalaCullRenderer::new(device, config())?;
  renderer.set_scene(&geometry, &instances)?;
  renderer.render_frame(&HalaCamera::default(), 128, 128, &HalaFeatureToggles::default())?;
  assert_eq!(renderer.read_visible_count()?, 3);

  renderer.render_frame(&HalaCamera::default(), 128, 128, &HalaFeatureToggles::default())?;
  let mut drawn = renderer.read_draw_commands()?.iter().map(|command| command.draw_index).collect::<Vec<_>>();
  drawn.sort_unstable();
  assert_eq!(drawn, vec![0, 2]);
  renderer.release()?;
  Ok(())
}
