use glam::{Vec2, Vec4};

use crate::gfx::flags::HalaCompareOp;
use crate::gfx::memory::HalaImageLevelView;
use crate::gfx::resource::HalaDepthState;

const MAX_CLIPPED_VERTICES: usize = 9;

/// Clip a polygon against the half-space distance(v) >= 0.
fn clip_polygon<F>(input: &[Vec4], distance: F) -> Vec<Vec4>
where
  F: Fn(Vec4) -> f32,
{
  let mut output = Vec::with_capacity(MAX_CLIPPED_VERTICES);
  for (i, &current) in input.iter().enumerate() {
    let next = input[(i + 1) % input.len()];
    let dc = distance(current);
    let dn = distance(next);
    if dc >= 0.0 {
      output.push(current);
    }
    if (dc >= 0.0) != (dn >= 0.0) {
      let t = dc / (dc - dn);
      output.push(current + (next - current) * t);
    }
  }
  output
}

/// Signed doubled area of the screen-space triangle (a, b, p).
fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
  (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

/// Rasterize a clip-space triangle into a depth target.
/// Both windings are rasterized and pixel centres on an edge are covered.
/// param triangle: The clip-space vertices.
/// param target: The depth target.
/// param depth_state: The depth state.
/// return: The number of covered pixels that passed the depth test.
pub(crate) fn rasterize_triangle(
  triangle: [Vec4; 3],
  target: &HalaImageLevelView,
  depth_state: &HalaDepthState,
) -> u64 {
  // Depth range [0, w] in clip space.
  let polygon = clip_polygon(&triangle, |v| v.z);
  if polygon.len() < 3 {
    return 0;
  }
  let polygon = clip_polygon(&polygon, |v| v.w - v.z);
  if polygon.len() < 3 {
    return 0;
  }

  let width = target.width as f32;
  let height = target.height as f32;
  let screen = polygon.iter()
    .filter(|v| v.w > f32::EPSILON)
    .map(|v| {
      let ndc = v.truncate() / v.w;
      (Vec2::new((ndc.x * 0.5 + 0.5) * width, (0.5 - ndc.y * 0.5) * height), ndc.z.clamp(0.0, 1.0))
    })
    .collect::<Vec<_>>();
  if screen.len() < 3 {
    return 0;
  }

  let mut passed = 0;
  for i in 1..screen.len() - 1 {
    passed += rasterize_screen_triangle([screen[0], screen[i], screen[i + 1]], target, depth_state);
  }
  passed
}

fn rasterize_screen_triangle(
  vertices: [(Vec2, f32); 3],
  target: &HalaImageLevelView,
  depth_state: &HalaDepthState,
) -> u64 {
  let [(p0, z0), (p1, z1), (p2, z2)] = vertices;
  let area = edge(p0, p1, p2);
  if area.abs() <= f32::EPSILON {
    return 0;
  }

  let min = p0.min(p1).min(p2).floor().max(Vec2::ZERO);
  let max = p0.max(p1).max(p2).ceil().min(Vec2::new(target.width as f32, target.height as f32));
  if min.x >= max.x || min.y >= max.y {
    return 0;
  }

  let mut passed = 0;
  for y in min.y as u32..max.y as u32 {
    for x in min.x as u32..max.x as u32 {
      let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
      let b0 = edge(p1, p2, p) / area;
      let b1 = edge(p2, p0, p) / area;
      let b2 = edge(p0, p1, p) / area;
      if b0 < 0.0 || b1 < 0.0 || b2 < 0.0 {
        continue;
      }
      let depth = (b0 * z0 + b1 * z1 + b2 * z2).clamp(0.0, 1.0);
      if !depth_state.test_enable {
        passed += 1;
        if depth_state.write_enable {
          target.store(x, y, depth);
        }
        continue;
      }
      let stored = target.load(x, y);
      let pass = match depth_state.compare_op {
        HalaCompareOp::Greater => depth > stored,
        HalaCompareOp::Less => depth < stored,
      };
      if !pass {
        continue;
      }
      passed += 1;
      if depth_state.write_enable {
        match depth_state.compare_op {
          HalaCompareOp::Greater => target.depth_max(x, y, depth),
          HalaCompareOp::Less => target.depth_min(x, y, depth),
        };
      }
    }
  }
  passed
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::gfx::memory::alloc_words;

  #[test]
  fn covers_pixels_and_keeps_the_nearest_reverse_depth() {
    let texels = alloc_words(4 * 4 * 4);
    let target = HalaImageLevelView::new(4, 4, &texels);
    // One oversized triangle covers the whole target at depth 0.25, a smaller one sits at 0.5.
    let far = [
      Vec4::new(-1.0, -1.0, 0.25, 1.0),
      Vec4::new(3.0, -1.0, 0.25, 1.0),
      Vec4::new(-1.0, 3.0, 0.25, 1.0),
    ];
    assert_eq!(rasterize_triangle(far, &target, &HalaDepthState::REVERSE_Z), 16);
    let near = [
      Vec4::new(-1.0, -1.0, 0.5, 1.0),
      Vec4::new(0.0, -1.0, 0.5, 1.0),
      Vec4::new(-1.0, 0.0, 0.5, 1.0),
    ];
    rasterize_triangle(near, &target, &HalaDepthState::REVERSE_Z);
    // Bottom-left pixel is covered by the near triangle.
    assert_eq!(target.load(0, 3), 0.5);
    assert_eq!(target.load(3, 0), 0.25);
    // Equal or farther depth fails the test.
    assert_eq!(rasterize_triangle(far, &target, &HalaDepthState::REVERSE_Z), 0);
    let middle = far.map(|v| Vec4::new(v.x, v.y, 0.375, 1.0));
    assert_eq!(rasterize_triangle(middle, &target, &HalaDepthState::REVERSE_Z), 16 - 3);
  }

  #[test]
  fn triangles_behind_the_near_plane_are_clipped() {
    let texels = alloc_words(4 * 4 * 4);
    let target = HalaImageLevelView::new(4, 4, &texels);
    let behind = [
      Vec4::new(-1.0, -1.0, 2.0, 1.0),
      Vec4::new(1.0, -1.0, 2.0, 1.0),
      Vec4::new(-1.0, 1.0, 2.0, 1.0),
    ];
    assert_eq!(rasterize_triangle(behind, &target, &HalaDepthState::REVERSE_Z), 0);
  }
}
