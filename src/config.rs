use std::path::Path;

use glam::Vec3;
use serde::{Serialize, Deserialize};

use crate::culling::HalaCamera;
use crate::error::HalaRendererError;
use crate::gfx::{
  HalaDeviceCapabilities,
  HalaGpuDevice,
  HalaSoftwareDevice,
  HalaValidationMode,
};
use crate::scene::{
  HalaLodCascadeBuilder,
  HALA_LOD_TARGET_ERROR,
  HALA_MAX_LOD_COUNT,
};

/// The geometry path of the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HalaRenderPath {
  /// Meshlets when the device has mesh shaders, indexed otherwise.
  #[default]
  Auto,
  Indexed,
  Meshlet,
}

/// The renderer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HalaCullRendererConfig {
  pub name: String,
  pub width: u32,
  pub height: u32,
  pub render_path: HalaRenderPath,
  pub max_lod_count: u32,
  pub lod_reduction_ratio: f32,
  pub lod_target_error: f32,
  /// The distance where LOD1 starts, each next threshold doubles it.
  pub lod_base_distance: f32,
  pub draw_distance: f32,
  /// The vertical field of view in degrees.
  pub fov_y: f32,
  pub znear: f32,
  pub validation_mode: HalaValidationMode,
}

impl Default for HalaCullRendererConfig {
  fn default() -> Self {
    Self {
      name: "hala_cull".to_string(),
      width: 1280,
      height: 720,
      render_path: HalaRenderPath::Auto,
      max_lod_count: HALA_MAX_LOD_COUNT as u32,
      lod_reduction_ratio: 0.75,
      lod_target_error: HALA_LOD_TARGET_ERROR,
      lod_base_distance: 10.0,
      draw_distance: 1000.0,
      fov_y: 60.0,
      znear: 0.01,
      validation_mode: HalaValidationMode::Log,
    }
  }
}

/// The implementation of the renderer configuration.
impl HalaCullRendererConfig {

  /// Load the configuration from a JSON file.
  /// Missing fields keep their defaults, out of range values are clamped.
  /// param path: The file path.
  /// return: The configuration.
  pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, HalaRendererError> {
    let file = std::fs::File::open(path.as_ref())?;
    let config: Self = serde_json::from_reader(std::io::BufReader::new(file))?;
    log::debug!("The configuration \"{}\" is loaded.", path.as_ref().display());
    Ok(config.validated())
  }

  /// Clamp the configuration into its valid ranges.
  /// return: The clamped configuration.
  pub fn validated(mut self) -> Self {
    let max_lod_count = self.max_lod_count.clamp(1, HALA_MAX_LOD_COUNT as u32);
    if max_lod_count != self.max_lod_count {
      log::warn!("The max LOD count {} is clamped to {}.", self.max_lod_count, max_lod_count);
      self.max_lod_count = max_lod_count;
    }
    if !(self.lod_reduction_ratio > 0.0 && self.lod_reduction_ratio < 1.0) {
      log::warn!("The LOD reduction ratio {} is out of (0, 1), use 0.75.", self.lod_reduction_ratio);
      self.lod_reduction_ratio = 0.75;
    }
    if !(self.lod_target_error >= 0.0) {
      log::warn!("The LOD target error {} is invalid, use {}.", self.lod_target_error, HALA_LOD_TARGET_ERROR);
      self.lod_target_error = HALA_LOD_TARGET_ERROR;
    }
    if !(self.lod_base_distance > 0.0) {
      log::warn!("The LOD base distance {} is invalid, use 10.", self.lod_base_distance);
      self.lod_base_distance = 10.0;
    }
    if !(self.znear > 0.0) {
      log::warn!("The near plane {} is invalid, use 0.01.", self.znear);
      self.znear = 0.01;
    }
    if !(self.draw_distance > self.znear) {
      log::warn!("The draw distance {} is not beyond the near plane, use 1000.", self.draw_distance);
      self.draw_distance = 1000.0;
    }
    let fov_y = self.fov_y.clamp(1.0, 179.0);
    if fov_y != self.fov_y {
      log::warn!("The field of view {} is clamped to {}.", self.fov_y, fov_y);
      self.fov_y = fov_y;
    }
    self
  }

  /// Create the LOD cascade builder of the configuration.
  /// return: The builder.
  pub fn lod_builder(&self) -> HalaLodCascadeBuilder {
    HalaLodCascadeBuilder::new(self.max_lod_count as usize, self.lod_reduction_ratio, self.lod_target_error)
  }

  /// Create a camera with the configured projection.
  /// param position: The eye position.
  /// param target: The point to look at.
  /// return: The camera.
  pub fn camera(&self, position: Vec3, target: Vec3) -> HalaCamera {
    HalaCamera::look_at(position, target, Vec3::Y, self.fov_y.to_radians(), self.znear)
  }

  /// Create a software device with the configured validation.
  /// param capabilities: The device capabilities.
  /// return: The device.
  pub fn create_software_device(&self, capabilities: HalaDeviceCapabilities) -> HalaSoftwareDevice {
    HalaSoftwareDevice::new(&format!("{}.device", self.name), capabilities, self.validation_mode)
  }

  /// Create a wgpu device on the first high performance adapter.
  /// return: The device, an error if the machine has no usable adapter.
  pub fn create_gpu_device(&self) -> Result<HalaGpuDevice, HalaRendererError> {
    HalaGpuDevice::new(&format!("{}.device", self.name))
  }

}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_fields_keep_defaults() {
    let config: HalaCullRendererConfig = serde_json::from_str(r#"{"width": 640, "render_path": "Indexed"}"#).unwrap();
    assert_eq!(config.width, 640);
    assert_eq!(config.render_path, HalaRenderPath::Indexed);
    assert_eq!(config.height, HalaCullRendererConfig::default().height);
    assert_eq!(config.validation_mode, HalaValidationMode::Log);
  }

  #[test]
  fn out_of_range_values_are_clamped() {
    let config = HalaCullRendererConfig {
      max_lod_count: 20,
      lod_reduction_ratio: 1.5,
      lod_target_error: f32::NAN,
      znear: -1.0,
      ..Default::default()
    }.validated();
    assert_eq!(config.max_lod_count, 8);
    assert_eq!(config.lod_reduction_ratio, 0.75);
    assert_eq!(config.znear, 0.01);
    assert_eq!(config.lod_target_error, 1e-4);
    assert_eq!(config.lod_builder().max_lod_count, 8);
  }

  #[test]
  fn missing_file_is_an_error() {
    assert!(HalaCullRendererConfig::from_file("does/not/exist.json").is_err());
  }
}
