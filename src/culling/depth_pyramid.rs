use crate::compute_program::HalaComputeProgram;
use crate::culling::reduce_kernel::{
  HalaReduceData,
  REDUCE_BINDING_DESTINATION,
  REDUCE_BINDING_SOURCE,
};
use crate::error::HalaRendererError;
use crate::gfx::{
  HalaAccessFlags,
  HalaCommandBuffer,
  HalaDescriptor,
  HalaDevice,
  HalaFormat,
  HalaImageBarrierInfo,
  HalaImageDesc,
  HalaImageHandle,
  HalaImageLayout,
  HalaImageUsageFlags,
  HalaImageViewDesc,
  HalaImageViewHandle,
  HalaPipelineStageFlags,
};

/// The depth attachment of the geometry pass.
pub struct HalaDepthTarget {
  pub width: u32,
  pub height: u32,
  pub image: HalaImageHandle,
  pub view: HalaImageViewHandle,
}

/// The implementation of the depth target.
impl HalaDepthTarget {

  /// Create a depth target.
  /// param device: The device.
  /// param width: The width.
  /// param height: The height.
  /// return: The depth target.
  pub fn new<D: HalaDevice + ?Sized>(device: &mut D, width: u32, height: u32) -> Result<Self, HalaRendererError> {
    let image = device.create_image(&HalaImageDesc {
      width,
      height,
      mip_levels: 1,
      format: HalaFormat::D32Sfloat,
      usage: HalaImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | HalaImageUsageFlags::SAMPLED,
      debug_name: "depth.image".to_string(),
    })?;
    let view = device.create_image_view(&HalaImageViewDesc {
      image,
      base_mip_level: 0,
      level_count: 1,
      debug_name: "depth.view".to_string(),
    })?;
    log::debug!("A HalaDepthTarget [{} x {}] is created.", width, height);
    Ok(Self { width, height, image, view })
  }

  /// Destroy the view and the image.
  /// param device: The device.
  /// return: The result.
  pub fn destroy<D: HalaDevice + ?Sized>(self, device: &mut D) -> Result<(), HalaRendererError> {
    device.destroy_image_view(self.view)?;
    device.destroy_image(self.image)?;
    log::debug!("A HalaDepthTarget [{} x {}] is dropped.", self.width, self.height);
    Ok(())
  }

}

/// The hierarchical depth pyramid.
/// Level 0 has half the depth target resolution, every texel holds the farthest depth it covers.
/// The image stays in the general layout for its whole lifetime.
pub struct HalaDepthPyramid {
  pub width: u32,
  pub height: u32,
  pub level_count: u32,
  pub image: HalaImageHandle,
  /// Covers every level, used for occlusion tests.
  pub view: HalaImageViewHandle,
  /// One view per level, used by the reduction.
  pub mip_views: Vec<HalaImageViewHandle>,
}

/// The implementation of the depth pyramid.
impl HalaDepthPyramid {

  /// Compute the pyramid extent for a depth target.
  /// param target_width: The depth target width.
  /// param target_height: The depth target height.
  /// return: The level 0 width, height and the level count.
  pub fn compute_extent(target_width: u32, target_height: u32) -> (u32, u32, u32) {
    let width = (target_width / 2).max(1);
    let height = (target_height / 2).max(1);
    let level_count = (31 - width.min(height).leading_zeros()).max(1);
    (width, height, level_count)
  }

  /// Get the extent of one level.
  /// param level: The level.
  /// return: The width and height.
  pub fn level_extent(&self, level: u32) -> (u32, u32) {
    ((self.width >> level).max(1), (self.height >> level).max(1))
  }

  /// Create the pyramid of a depth target.
  /// The contents are undefined until the pyramid is initialized.
  /// param device: The device.
  /// param target_width: The depth target width.
  /// param target_height: The depth target height.
  /// return: The depth pyramid.
  pub fn new<D: HalaDevice + ?Sized>(
    device: &mut D,
    target_width: u32,
    target_height: u32,
  ) -> Result<Self, HalaRendererError> {
    let (width, height, level_count) = Self::compute_extent(target_width, target_height);
    let image = device.create_image(&HalaImageDesc {
      width,
      height,
      mip_levels: level_count,
      format: HalaFormat::R32Sfloat,
      usage: HalaImageUsageFlags::STORAGE | HalaImageUsageFlags::SAMPLED | HalaImageUsageFlags::TRANSFER_DST,
      debug_name: "depth_pyramid.image".to_string(),
    })?;
    let view = device.create_image_view(&HalaImageViewDesc {
      image,
      base_mip_level: 0,
      level_count,
      debug_name: "depth_pyramid.view".to_string(),
    })?;
    let mut mip_views = Vec::with_capacity(level_count as usize);
    for level in 0..level_count {
      mip_views.push(device.create_image_view(&HalaImageViewDesc {
        image,
        base_mip_level: level,
        level_count: 1,
        debug_name: format!("depth_pyramid.mip_{}", level),
      })?);
    }

    log::debug!("A HalaDepthPyramid [{} x {}, {} levels] is created.", width, height, level_count);
    Ok(Self {
      width,
      height,
      level_count,
      image,
      view,
      mip_views,
    })
  }

  /// Record the first transition of the pyramid.
  /// Every level is cleared to zero, which never occludes anything under reverse-Z.
  /// param command_buffer: The command buffer.
  pub fn record_init(&self, command_buffer: &mut HalaCommandBuffer) {
    command_buffer.pipeline_barrier(
      HalaPipelineStageFlags::TOP_OF_PIPE,
      HalaPipelineStageFlags::TRANSFER,
      &[],
      &[HalaImageBarrierInfo::new(
        self.image,
        HalaAccessFlags::empty(),
        HalaAccessFlags::TRANSFER_WRITE,
        HalaImageLayout::Undefined,
        HalaImageLayout::General,
      )],
    );
    command_buffer.clear_image(self.image, 0.0);
    command_buffer.pipeline_barrier(
      HalaPipelineStageFlags::TRANSFER,
      HalaPipelineStageFlags::COMPUTE_SHADER,
      &[],
      &[HalaImageBarrierInfo::new(
        self.image,
        HalaAccessFlags::TRANSFER_WRITE,
        HalaAccessFlags::SHADER_READ | HalaAccessFlags::SHADER_WRITE,
        HalaImageLayout::General,
        HalaImageLayout::General,
      )],
    );
  }

  /// Initialize the pyramid with its own submission and wait for it.
  /// param device: The device.
  /// return: The result.
  pub fn init<D: HalaDevice + ?Sized>(&self, device: &mut D) -> Result<(), HalaRendererError> {
    let mut command_buffer = HalaCommandBuffer::new("depth_pyramid.init");
    self.record_init(&mut command_buffer);
    device.submit(&command_buffer)?;
    device.wait_idle()
  }

  /// Record the reduction of a depth target into every level.
  /// The depth target must be readable by compute shaders.
  /// param command_buffer: The command buffer.
  /// param program: The depth reduce program.
  /// param depth: The depth target.
  /// return: The result.
  pub fn record_build(
    &self,
    command_buffer: &mut HalaCommandBuffer,
    program: &HalaComputeProgram,
    depth: &HalaDepthTarget,
  ) -> Result<(), HalaRendererError> {
    for level in 0..self.level_count {
      let (source, source_width, source_height) = if level == 0 {
        (depth.view, depth.width, depth.height)
      } else {
        let (width, height) = self.level_extent(level - 1);
        (self.mip_views[level as usize - 1], width, height)
      };
      let (destination_width, destination_height) = self.level_extent(level);

      program.bind(
        command_buffer,
        &[
          (REDUCE_BINDING_SOURCE, HalaDescriptor::Image(source)),
          (REDUCE_BINDING_DESTINATION, HalaDescriptor::Image(self.mip_views[level as usize])),
        ],
      )?;
      program.push_constants(
        command_buffer,
        &HalaReduceData {
          source_width,
          source_height,
          destination_width,
          destination_height,
        },
      );
      program.dispatch_for(command_buffer, destination_width, destination_height);

      command_buffer.pipeline_barrier(
        HalaPipelineStageFlags::COMPUTE_SHADER,
        HalaPipelineStageFlags::COMPUTE_SHADER,
        &[],
        &[HalaImageBarrierInfo::new(
          self.image,
          HalaAccessFlags::SHADER_WRITE,
          HalaAccessFlags::SHADER_READ,
          HalaImageLayout::General,
          HalaImageLayout::General,
        ).with_mip_range(level, 1)],
      );
    }
    Ok(())
  }

  /// Destroy every view and the image, each exactly once.
  /// param device: The device.
  /// return: The result.
  pub fn destroy<D: HalaDevice + ?Sized>(self, device: &mut D) -> Result<(), HalaRendererError> {
    for view in self.mip_views {
      device.destroy_image_view(view)?;
    }
    device.destroy_image_view(self.view)?;
    device.destroy_image(self.image)?;
    log::debug!("A HalaDepthPyramid [{} x {}, {} levels] is dropped.", self.width, self.height, self.level_count);
    Ok(())
  }

}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::culling::reduce_kernel::{reduce_range, HalaDepthReduceKernel};
  use crate::gfx::{
    for_each_invocation,
    HalaBindingDesc,
    HalaBoundResources,
    HalaComputeKernel,
    HalaDeviceCapabilities,
    HalaSoftwareDevice,
    HalaValidationMode,
  };

  #[test]
  fn extent_halves_the_target() {
    assert_eq!(HalaDepthPyramid::compute_extent(800, 600), (400, 300, 8));
    assert_eq!(HalaDepthPyramid::compute_extent(1920, 1080), (960, 540, 9));
    assert_eq!(HalaDepthPyramid::compute_extent(3, 3), (1, 1, 1));
    assert_eq!(HalaDepthPyramid::compute_extent(1, 1), (1, 1, 1));
    assert_eq!(HalaDepthPyramid::compute_extent(64, 4), (32, 2, 1));
  }

  fn pattern(x: u32, y: u32) -> f32 {
    ((x * 7 + y * 13) % 17) as f32 / 16.0
  }

  const PATTERN_BINDINGS: [HalaBindingDesc; 1] = [HalaBindingDesc::storage_image(0, "target")];

  struct PatternKernel;

  impl HalaComputeKernel for PatternKernel {
    fn name(&self) -> &str { "pattern" }
    fn bindings(&self) -> &[HalaBindingDesc] { &PATTERN_BINDINGS }
    fn push_constant_size(&self) -> usize { 0 }
    fn local_size(&self) -> [u32; 2] { [8, 8] }
    fn execute(&self, resources: &HalaBoundResources, _: &[u8], group_count: [u32; 3]) -> Result<(), HalaRendererError> {
      let target = *resources.image(0)?.level(0).unwrap();
      for_each_invocation(group_count, self.local_size(), |[x, y]| {
        if x < target.width && y < target.height {
          target.store(x, y, pattern(x, y));
        }
      });
      Ok(())
    }
  }

  #[test]
  fn build_keeps_the_farthest_depth_of_each_footprint() {
    let mut device = HalaSoftwareDevice::new("test", HalaDeviceCapabilities::default(), HalaValidationMode::Strict);
    let depth = HalaDepthTarget::new(&mut device, 37, 23).unwrap();
    let pyramid = HalaDepthPyramid::new(&mut device, 37, 23).unwrap();
    assert_eq!((pyramid.width, pyramid.height, pyramid.level_count), (18, 11, 3));
    pyramid.init(&mut device).unwrap();

    let writer = HalaComputeProgram::new(&mut device, Arc::new(PatternKernel), "pattern").unwrap();
    let reducer = HalaComputeProgram::new(&mut device, Arc::new(HalaDepthReduceKernel), "depth_reduce").unwrap();
    let mut command_buffer = HalaCommandBuffer::new("test.reduce");
    command_buffer.pipeline_barrier(
      HalaPipelineStageFlags::TOP_OF_PIPE,
      HalaPipelineStageFlags::COMPUTE_SHADER,
      &[],
      &[HalaImageBarrierInfo::new(
        depth.image,
        HalaAccessFlags::empty(),
        HalaAccessFlags::SHADER_WRITE,
        HalaImageLayout::Undefined,
        HalaImageLayout::General,
      )],
    );
    writer.bind(&mut command_buffer, &[(0, HalaDescriptor::Image(depth.view))]).unwrap();
    writer.dispatch_for(&mut command_buffer, depth.width, depth.height);
    command_buffer.pipeline_barrier(
      HalaPipelineStageFlags::COMPUTE_SHADER,
      HalaPipelineStageFlags::COMPUTE_SHADER,
      &[],
      &[HalaImageBarrierInfo::new(
        depth.image,
        HalaAccessFlags::SHADER_WRITE,
        HalaAccessFlags::SHADER_READ,
        HalaImageLayout::General,
        HalaImageLayout::ShaderReadOnlyOptimal,
      )],
    );
    pyramid.record_build(&mut command_buffer, &reducer, &depth).unwrap();
    device.submit(&command_buffer).unwrap();
    device.wait_idle().unwrap();
    assert!(device.take_validation_hazards().is_empty());

    let mut source = (depth.width, depth.height, device.read_image_level(depth.image, 0).unwrap());
    for level in 0..pyramid.level_count {
      let (width, height) = pyramid.level_extent(level);
      let texels = device.read_image_level(pyramid.image, level).unwrap();
      assert_eq!(texels.len(), (width * height) as usize);
      for y in 0..height {
        for x in 0..width {
          let (x0, x1) = reduce_range(x, source.0, width);
          let (y0, y1) = reduce_range(y, source.1, height);
          let expected = (y0..y1)
            .flat_map(|sy| (x0..x1).map(move |sx| (sx, sy)))
            .map(|(sx, sy)| source.2[(sy * source.0 + sx) as usize])
            .fold(f32::MAX, f32::min);
          assert_eq!(texels[(y * width + x) as usize], expected, "level {} texel {} {}", level, x, y);
        }
      }
      source = (width, height, texels);
    }

    writer.destroy(&mut device).unwrap();
    reducer.destroy(&mut device).unwrap();
    pyramid.destroy(&mut device).unwrap();
    depth.destroy(&mut device).unwrap();
    assert_eq!(device.live_image_view_count(), 0);
  }
}
