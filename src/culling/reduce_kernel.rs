use bytemuck::{Pod, Zeroable};

use crate::error::HalaRendererError;
use crate::gfx::{
  for_each_invocation,
  read_push_constants,
  HalaBindingDesc,
  HalaBoundResources,
  HalaComputeKernel,
};

pub const REDUCE_BINDING_SOURCE: u32 = 0;
pub const REDUCE_BINDING_DESTINATION: u32 = 1;

const REDUCE_BINDINGS: [HalaBindingDesc; 2] = [
  HalaBindingDesc::sampled_image(REDUCE_BINDING_SOURCE, "source"),
  HalaBindingDesc::storage_image(REDUCE_BINDING_DESTINATION, "destination"),
];

/// The push constants of one reduction pass.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct HalaReduceData {
  pub source_width: u32,
  pub source_height: u32,
  pub destination_width: u32,
  pub destination_height: u32,
}

/// Get the source texels covered by a destination texel along one axis.
/// Ranges of neighbouring texels may overlap for odd sizes, they never leave a gap.
/// param index: The destination texel.
/// param source: The source size.
/// param destination: The destination size.
/// return: The half open source range.
pub fn reduce_range(index: u32, source: u32, destination: u32) -> (u32, u32) {
  let source = source as u64;
  let destination = destination.max(1) as u64;
  let index = index as u64;
  let begin = index * source / destination;
  let end = ((index + 1) * source).div_ceil(destination).max(begin + 1);
  (begin as u32, end.min(source.max(1)) as u32)
}

/// The depth reduction kernel.
/// Every destination texel keeps the farthest, that is the smallest reverse-Z, depth of its
/// source texels.
pub struct HalaDepthReduceKernel;

/// The implementation of the compute kernel trait for the depth reduce kernel.
impl HalaComputeKernel for HalaDepthReduceKernel {

  fn name(&self) -> &str {
    "depth_reduce"
  }

  fn bindings(&self) -> &[HalaBindingDesc] {
    &REDUCE_BINDINGS
  }

  fn push_constant_size(&self) -> usize {
    std::mem::size_of::<HalaReduceData>()
  }

  fn local_size(&self) -> [u32; 2] {
    [8, 8]
  }

  fn shader_source(&self) -> Option<&'static str> {
    Some(include_str!("shaders/depth_reduce.wgsl"))
  }

  fn execute(
    &self,
    resources: &HalaBoundResources,
    push_constants: &[u8],
    group_count: [u32; 3],
  ) -> Result<(), HalaRendererError> {
    let data: HalaReduceData = read_push_constants(push_constants)?;
    let source = resources.image(REDUCE_BINDING_SOURCE)?.level(0).copied()
      .ok_or(HalaRendererError::new("The reduction source has no level.", None))?;
    let destination = resources.image(REDUCE_BINDING_DESTINATION)?.level(0).copied()
      .ok_or(HalaRendererError::new("The reduction destination has no level.", None))?;
    if source.width != data.source_width || source.height != data.source_height
      || destination.width != data.destination_width || destination.height != data.destination_height {
      return Err(HalaRendererError::new(
        &format!(
          "The reduction {} x {} -> {} x {} does not match the bound images {} x {} -> {} x {}.",
          data.source_width, data.source_height, data.destination_width, data.destination_height,
          source.width, source.height, destination.width, destination.height,
        ),
        None,
      ));
    }

    for_each_invocation(group_count, self.local_size(), |[x, y]| {
      if x >= destination.width || y >= destination.height {
        return;
      }
      let (x0, x1) = reduce_range(x, source.width, destination.width);
      let (y0, y1) = reduce_range(y, source.height, destination.height);
      let mut depth = f32::MAX;
      for sy in y0..y1 {
        for sx in x0..x1 {
          depth = depth.min(source.load(sx, sy));
        }
      }
      destination.store(x, y, depth);
    });
    Ok(())
  }

}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ranges_cover_the_source() {
    for (source, destination) in [(8, 4), (7, 3), (5, 2), (1, 1), (3, 1), (640, 320), (641, 320)] {
      let mut covered = vec![false; source as usize];
      let mut previous_begin = 0;
      for i in 0..destination {
        let (begin, end) = reduce_range(i, source, destination);
        assert!(begin < end && end <= source);
        assert!(begin >= previous_begin);
        previous_begin = begin;
        for s in begin..end {
          covered[s as usize] = true;
        }
      }
      assert!(covered.iter().all(|&c| c), "{} -> {}", source, destination);
    }
  }

  #[test]
  fn even_sizes_reduce_two_by_two() {
    assert_eq!(reduce_range(3, 8, 4), (6, 8));
    assert_eq!(reduce_range(0, 2, 1), (0, 2));
    // An odd source gives three texels to the edge.
    assert_eq!(reduce_range(1, 5, 2), (2, 5));
  }
}
