use crate::scene::vertex::HalaVertex;

/// The maximum number of LODs of a mesh.
pub const HALA_MAX_LOD_COUNT: usize = 8;

/// The relative simplification error every level stays under.
pub const HALA_LOD_TARGET_ERROR: f32 = 1e-4;

/// The LOD cascade builder.
/// Every level targets a fraction of the previous level's triangles under a fixed error.
#[derive(Debug, Clone, Copy)]
pub struct HalaLodCascadeBuilder {
  pub max_lod_count: usize,
  pub reduction_ratio: f32,
  pub target_error: f32,
}

impl Default for HalaLodCascadeBuilder {
  fn default() -> Self {
    Self {
      max_lod_count: HALA_MAX_LOD_COUNT,
      reduction_ratio: 0.75,
      target_error: HALA_LOD_TARGET_ERROR,
    }
  }
}

/// The implementation of the LOD cascade builder.
impl HalaLodCascadeBuilder {

  /// Create a LOD cascade builder.
  /// param max_lod_count: The maximum number of levels, clamped to [1, 8].
  /// param reduction_ratio: The triangle count ratio between two levels.
  /// param target_error: The simplification error tolerance.
  /// return: The builder.
  pub fn new(max_lod_count: usize, reduction_ratio: f32, target_error: f32) -> Self {
    Self {
      max_lod_count: max_lod_count.clamp(1, HALA_MAX_LOD_COUNT),
      reduction_ratio: reduction_ratio.clamp(0.0, 1.0),
      target_error: target_error.max(0.0),
    }
  }

  /// Build the cascade.
  /// param vertices: The vertices referenced by the indices.
  /// param lod0: The optimized full detail triangle list.
  /// return: The triangle list of every level, the first one is the input.
  pub fn build(&self, vertices: &[HalaVertex], lod0: Vec<u32>) -> Vec<Vec<u32>> {
    let mut lods = vec![lod0];
    while lods.len() < self.max_lod_count.clamp(1, HALA_MAX_LOD_COUNT) {
      let Some(previous) = lods.last() else {
        break;
      };
      let target_count = ((previous.len() / 3) as f32 * self.reduction_ratio) as usize * 3;
      let simplified = meshopt::simplify_decoder(
        previous,
        vertices,
        target_count,
        self.target_error,
        meshopt::SimplifyOptions::empty(),
        None,
      );
      if simplified.is_empty() || simplified.len() >= previous.len() {
        break;
      }
      lods.push(meshopt::optimize_vertex_cache(&simplified, vertices.len()));
    }

    log::debug!(
      "Build {} LODs, index counts: {:?}.",
      lods.len(),
      lods.iter().map(|lod| lod.len()).collect::<Vec<_>>()
    );
    lods
  }

}
