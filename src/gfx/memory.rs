use std::sync::atomic::{
  AtomicU32,
  Ordering,
};

use bytemuck::Pod;

/// Allocate zeroed device words.
/// param size: The size in bytes, rounded up to whole words.
/// return: The words.
pub(crate) fn alloc_words(size: u64) -> Vec<AtomicU32> {
  let count = size.div_ceil(4) as usize;
  (0..count).map(|_| AtomicU32::new(0)).collect()
}

/// Copy bytes into device words at a byte offset.
pub(crate) fn write_bytes(words: &[AtomicU32], offset: u64, data: &[u8]) {
  let offset = offset as usize;
  if offset % 4 == 0 && data.len() % 4 == 0 {
    for (i, chunk) in data.chunks_exact(4).enumerate() {
      if let Some(word) = words.get(offset / 4 + i) {
        word.store(u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]), Ordering::Relaxed);
      }
    }
    return;
  }
  for (i, byte) in data.iter().enumerate() {
    let address = offset + i;
    if let Some(word) = words.get(address / 4) {
      let mut bytes = word.load(Ordering::Relaxed).to_ne_bytes();
      bytes[address % 4] = *byte;
      word.store(u32::from_ne_bytes(bytes), Ordering::Relaxed);
    }
  }
}

/// Copy device words out as bytes.
pub(crate) fn read_bytes(words: &[AtomicU32], offset: u64, size: u64) -> Vec<u8> {
  (offset..offset + size)
    .map(|address| {
      let address = address as usize;
      words.get(address / 4)
        .map_or(0, |word| word.load(Ordering::Relaxed).to_ne_bytes()[address % 4])
    })
    .collect()
}

/// A shader visible view of a storage buffer.
/// Elements are addressed with the stride of the element type, which must be a multiple of 4 bytes.
#[derive(Clone, Copy)]
pub struct HalaBufferView<'a> {
  words: &'a [AtomicU32],
}

/// The implementation of the buffer view.
impl<'a> HalaBufferView<'a> {

  /// Create a buffer view over device words.
  /// param words: The words.
  /// return: The buffer view.
  pub fn new(words: &'a [AtomicU32]) -> Self {
    Self { words }
  }

  /// Get the size in 32-bit words.
  pub fn word_count(&self) -> usize {
    self.words.len()
  }

  /// Get the number of whole elements of type T in the buffer.
  pub fn len<T: Pod>(&self) -> usize {
    self.words.len() * 4 / std::mem::size_of::<T>()
  }

  /// Is the buffer empty?
  pub fn is_empty(&self) -> bool {
    self.words.is_empty()
  }

  /// Read one element.
  /// param index: The element index.
  /// return: The element, zeroed when out of range.
  pub fn read<T: Pod>(&self, index: usize) -> T {
    let stride = std::mem::size_of::<T>() / 4;
    debug_assert!(std::mem::size_of::<T>() % 4 == 0, "Element size must be a multiple of 4 bytes.");
    debug_assert!((index + 1) * stride <= self.words.len(), "Buffer read out of range.");
    let mut value = T::zeroed();
    if let Some(src) = self.words.get(index * stride..(index + 1) * stride) {
      for (chunk, word) in bytemuck::bytes_of_mut(&mut value).chunks_exact_mut(4).zip(src) {
        chunk.copy_from_slice(&word.load(Ordering::Relaxed).to_ne_bytes());
      }
    }
    value
  }

  /// Write one element.
  /// param index: The element index.
  /// param value: The element.
  pub fn write<T: Pod>(&self, index: usize, value: &T) {
    let stride = std::mem::size_of::<T>() / 4;
    debug_assert!((index + 1) * stride <= self.words.len(), "Buffer write out of range.");
    if let Some(dst) = self.words.get(index * stride..(index + 1) * stride) {
      for (chunk, word) in bytemuck::bytes_of(value).chunks_exact(4).zip(dst) {
        word.store(u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]), Ordering::Relaxed);
      }
    }
  }

  /// Load a single word.
  pub fn load(&self, word: usize) -> u32 {
    self.words.get(word).map_or(0, |w| w.load(Ordering::Relaxed))
  }

  /// Atomically add to a word.
  /// param word: The word index.
  /// param value: The value to add.
  /// return: The previous value.
  pub fn atomic_add(&self, word: usize, value: u32) -> u32 {
    debug_assert!(word < self.words.len(), "Atomic add out of range.");
    self.words.get(word).map_or(0, |w| w.fetch_add(value, Ordering::Relaxed))
  }

}

/// A shader visible view of one image mip level holding 32-bit float texels.
#[derive(Clone, Copy)]
pub struct HalaImageLevelView<'a> {
  pub width: u32,
  pub height: u32,
  texels: &'a [AtomicU32],
}

/// The implementation of the image level view.
impl<'a> HalaImageLevelView<'a> {

  /// Create an image level view.
  /// param width: The width.
  /// param height: The height.
  /// param texels: The texels in row-major order.
  /// return: The image level view.
  pub fn new(width: u32, height: u32, texels: &'a [AtomicU32]) -> Self {
    debug_assert_eq!(texels.len(), (width * height) as usize);
    Self { width, height, texels }
  }

  fn texel_index(&self, x: u32, y: u32) -> usize {
    let x = x.min(self.width.saturating_sub(1));
    let y = y.min(self.height.saturating_sub(1));
    (y * self.width + x) as usize
  }

  /// Load a texel. Coordinates are clamped to the edge.
  pub fn load(&self, x: u32, y: u32) -> f32 {
    self.texels.get(self.texel_index(x, y))
      .map_or(0.0, |t| f32::from_bits(t.load(Ordering::Relaxed)))
  }

  /// Store a texel.
  pub fn store(&self, x: u32, y: u32, value: f32) {
    if x < self.width && y < self.height {
      if let Some(t) = self.texels.get(self.texel_index(x, y)) {
        t.store(value.to_bits(), Ordering::Relaxed);
      }
    }
  }

  /// Keep the greater of the stored and the given depth.
  /// Depth values are non-negative, so their bit patterns order like the floats.
  /// return: True if the value was written.
  pub fn depth_max(&self, x: u32, y: u32, value: f32) -> bool {
    debug_assert!(value >= 0.0);
    self.texels.get(self.texel_index(x, y))
      .map_or(false, |t| t.fetch_max(value.to_bits(), Ordering::Relaxed) < value.to_bits())
  }

  /// Keep the smaller of the stored and the given depth.
  /// return: True if the value was written.
  pub fn depth_min(&self, x: u32, y: u32, value: f32) -> bool {
    debug_assert!(value >= 0.0);
    self.texels.get(self.texel_index(x, y))
      .map_or(false, |t| t.fetch_min(value.to_bits(), Ordering::Relaxed) > value.to_bits())
  }

}

/// A shader visible view of a range of image mip levels.
#[derive(Clone)]
pub struct HalaImageView<'a> {
  levels: Vec<HalaImageLevelView<'a>>,
}

/// The implementation of the image view.
impl<'a> HalaImageView<'a> {

  /// Create an image view from its levels, finest first.
  pub fn new(levels: Vec<HalaImageLevelView<'a>>) -> Self {
    Self { levels }
  }

  /// Get the number of mip levels in the view.
  pub fn level_count(&self) -> u32 {
    self.levels.len() as u32
  }

  /// Get a mip level relative to the view's base level.
  pub fn level(&self, level: u32) -> Option<&HalaImageLevelView<'a>> {
    self.levels.get(level as usize)
  }

}

#[cfg(test)]
mod tests {
  use super::*;

  #[repr(C)]
  #[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
  struct Pair {
    a: u32,
    b: f32,
  }

  #[test]
  fn typed_access_uses_element_stride() {
    let words = alloc_words(32);
    let view = HalaBufferView::new(&words);
    assert_eq!(view.len::<Pair>(), 4);
    view.write(2, &Pair { a: 7, b: 1.5 });
    assert_eq!(view.read::<Pair>(2), Pair { a: 7, b: 1.5 });
    assert_eq!(view.load(4), 7);
    assert_eq!(view.atomic_add(4, 3), 7);
    assert_eq!(view.load(4), 10);
  }

  #[test]
  fn unaligned_host_writes_patch_bytes() {
    let words = alloc_words(8);
    write_bytes(&words, 2, &[0xaa, 0xbb, 0xcc]);
    assert_eq!(read_bytes(&words, 0, 8), vec![0, 0, 0xaa, 0xbb, 0xcc, 0, 0, 0]);
  }

  #[test]
  fn depth_atomics_keep_extremes() {
    let texels = alloc_words(16);
    let level = HalaImageLevelView::new(2, 2, &texels);
    assert!(level.depth_max(1, 1, 0.25));
    assert!(!level.depth_max(1, 1, 0.125));
    assert_eq!(level.load(1, 1), 0.25);
    level.store(0, 0, 1.0);
    assert!(level.depth_min(0, 0, 0.5));
    assert_eq!(level.load(0, 0), 0.5);
    // Clamped to the edge.
    assert_eq!(level.load(9, 9), 0.25);
  }
}
