use glam::{Quat, Vec3};

/// Axis-aligned bounding box (AABB) representation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HalaBounds {
  pub center: Vec3,
  pub extents: Vec3,
}

/// Implementation of HalaBounds.
impl HalaBounds {

  /// Create a new HalaBounds instance.
  /// param center: The center of the AABB.
  /// param extents: The extents of the AABB.
  /// return: The new HalaBounds instance.
  pub fn new(center: Vec3, extents: Vec3) -> Self {
    Self { center, extents }
  }

  /// Create the smallest AABB holding all points.
  /// param points: The points.
  /// return: The AABB, None when there are no points.
  pub fn from_points<I>(points: I) -> Option<Self>
  where
    I: IntoIterator<Item = Vec3>,
  {
    let mut points = points.into_iter();
    let first = points.next()?;
    let mut bounds = Self::new(first, Vec3::ZERO);
    for point in points {
      bounds.encapsulate_point(point);
    }
    Some(bounds)
  }

  /// Get the minimum bounds of the AABB.
  pub fn get_min(&self) -> Vec3 {
    self.center - self.extents
  }

  /// Get the maximum bounds of the AABB.
  pub fn get_max(&self) -> Vec3 {
    self.center + self.extents
  }

  /// Set the minimum and maximum bounds of the AABB.
  /// param min: The minimum bounds of the AABB.
  /// param max: The maximum bounds of the AABB.
  pub fn set_min_max(&mut self, min: Vec3, max: Vec3) {
    self.extents = (max - min) * 0.5;
    self.center = min + self.extents;
  }

  /// Grows the AABB to include the given point.
  /// param point: The point to include.
  pub fn encapsulate_point(&mut self, point: Vec3) {
    self.set_min_max(self.get_min().min(point), self.get_max().max(point));
  }

}

/// Bounding sphere representation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HalaBoundingSphere {
  pub center: Vec3,
  pub radius: f32,
}

/// Implementation of HalaBoundingSphere.
impl HalaBoundingSphere {

  /// Create a sphere around a set of points.
  /// The center is the center of their AABB, the radius reaches the farthest point.
  /// param points: The points.
  /// return: The sphere, zero sized when there are no points.
  pub fn from_points(points: &[Vec3]) -> Self {
    let Some(bounds) = HalaBounds::from_points(points.iter().copied()) else {
      return Self::default();
    };
    let radius = points.iter()
      .map(|point| point.distance(bounds.center))
      .fold(0.0f32, f32::max);
    Self {
      center: bounds.center,
      radius,
    }
  }

  /// Place the sphere in the world.
  /// param position: The translation.
  /// param scale: The uniform scale.
  /// param orientation: The rotation.
  /// return: The transformed sphere.
  pub fn transform(&self, position: Vec3, scale: f32, orientation: Quat) -> Self {
    Self {
      center: position + orientation * (self.center * scale),
      radius: self.radius * scale.abs(),
    }
  }

}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sphere_holds_every_point() {
    let points = [
      Vec3::new(0.0, 0.0, 0.0),
      Vec3::new(4.0, 0.0, 0.0),
      Vec3::new(1.0, 3.0, -2.0),
    ];
    let sphere = HalaBoundingSphere::from_points(&points);
    assert_eq!(sphere.center, Vec3::new(2.0, 1.5, -1.0));
    for point in points {
      assert!(point.distance(sphere.center) <= sphere.radius + 1e-5);
    }
  }

  #[test]
  fn transformed_sphere_follows_the_instance() {
    let sphere = HalaBoundingSphere { center: Vec3::X, radius: 2.0 };
    let world = sphere.transform(Vec3::new(0.0, 10.0, 0.0), 3.0, Quat::from_rotation_z(std::f32::consts::FRAC_PI_2));
    assert!((world.center - Vec3::new(0.0, 13.0, 0.0)).length() < 1e-5);
    assert_eq!(world.radius, 6.0);
  }

  #[test]
  fn empty_point_set_gives_empty_sphere() {
    assert_eq!(HalaBoundingSphere::from_points(&[]), HalaBoundingSphere::default());
  }
}
