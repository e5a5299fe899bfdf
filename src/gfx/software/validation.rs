use std::collections::HashMap;

use serde::{Serialize, Deserialize};

use crate::gfx::flags::{
  HalaAccessFlags,
  HalaImageLayout,
  HalaPipelineStageFlags,
};

/// How synchronization hazards are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HalaValidationMode {
  Disabled,
  /// Hazards are logged and recorded, submission continues.
  #[default]
  Log,
  /// The first hazard fails the submission.
  Strict,
}

/// A tracked memory range: a whole buffer or one image mip level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HalaTrackedResource {
  Buffer(u64),
  ImageLevel(u64, u32),
}

/// A detected hazard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HalaHazard {
  pub command_index: usize,
  pub resource: String,
  pub message: String,
}

/// The implementation Display trait for the hazard.
impl std::fmt::Display for HalaHazard {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "command #{} on \"{}\": {}", self.command_index, self.resource, self.message)
  }
}

#[derive(Debug, Clone, Copy)]
struct HalaWriteRecord {
  stage: HalaPipelineStageFlags,
  access: HalaAccessFlags,
  command_index: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct HalaAccessState {
  last_write: Option<HalaWriteRecord>,
  visible_stages: HalaPipelineStageFlags,
  visible_access: HalaAccessFlags,
  layout: HalaImageLayout,
}

/// One access made by a command.
#[derive(Debug, Clone)]
pub struct HalaAccess {
  pub resource: HalaTrackedResource,
  pub name: String,
  pub stage: HalaPipelineStageFlags,
  pub access: HalaAccessFlags,
  pub write: bool,
  /// The layouts the access may happen in. None for buffers.
  pub layouts: Option<&'static [HalaImageLayout]>,
}

/// Tracks writes, their visibility and image layouts across the commands of a submission.
///
/// A read or write of a range last written by an earlier command is a hazard unless a barrier
/// made the write visible to the accessing stage and access type. Write-after-read ordering is
/// not tracked. Waiting for the device to become idle makes every write visible.
pub struct HalaSyncValidator {
  mode: HalaValidationMode,
  states: HashMap<HalaTrackedResource, HalaAccessState>,
  hazards: Vec<HalaHazard>,
}

/// The implementation of the sync validator.
impl HalaSyncValidator {

  /// Create a new validator.
  /// param mode: The validation mode.
  /// return: The validator.
  pub fn new(mode: HalaValidationMode) -> Self {
    Self {
      mode,
      states: HashMap::new(),
      hazards: Vec::new(),
    }
  }

  pub fn mode(&self) -> HalaValidationMode {
    self.mode
  }

  pub fn is_enabled(&self) -> bool {
    self.mode != HalaValidationMode::Disabled
  }

  /// Get all recorded hazards.
  pub fn hazards(&self) -> &[HalaHazard] {
    &self.hazards
  }

  /// Take the recorded hazards.
  pub fn take_hazards(&mut self) -> Vec<HalaHazard> {
    std::mem::take(&mut self.hazards)
  }

  /// The device went idle, so all writes are complete and visible. Layouts persist.
  pub fn device_idle(&mut self) {
    for state in self.states.values_mut() {
      state.last_write = None;
      state.visible_stages = HalaPipelineStageFlags::empty();
      state.visible_access = HalaAccessFlags::empty();
    }
  }

  /// The host wrote the range while the device was idle.
  pub fn host_write(&mut self, resource: HalaTrackedResource) {
    let state = self.states.entry(resource).or_default();
    state.last_write = None;
  }

  /// Stop tracking a destroyed range.
  pub fn forget(&mut self, resource: HalaTrackedResource) {
    self.states.remove(&resource);
  }

  /// Get the tracked layout of an image level.
  pub fn layout(&self, resource: HalaTrackedResource) -> HalaImageLayout {
    self.states.get(&resource).map_or(HalaImageLayout::Undefined, |state| state.layout)
  }

  fn report(&mut self, command_index: usize, resource: &str, message: String) {
    let hazard = HalaHazard {
      command_index,
      resource: resource.to_string(),
      message,
    };
    log::warn!("Synchronization hazard, {}.", hazard);
    self.hazards.push(hazard);
  }

  /// Record an access.
  /// param command_index: The index of the command, accesses sharing an index are unordered with each other.
  /// param access: The access.
  pub fn access(&mut self, command_index: usize, access: &HalaAccess) {
    if !self.is_enabled() {
      return;
    }
    let state = self.states.get(&access.resource).copied().unwrap_or_default();

    if let Some(layouts) = access.layouts {
      if !layouts.contains(&state.layout) {
        self.report(
          command_index,
          &access.name,
          format!("accessed in layout {:?}, expected one of {:?}", state.layout, layouts),
        );
      }
    }

    if let Some(write) = state.last_write {
      let visible = state.visible_stages.intersects(access.stage)
        && state.visible_access.contains(access.access);
      if write.command_index != command_index && !visible {
        let kind = if access.write { "write-after-write" } else { "read-after-write" };
        self.report(
          command_index,
          &access.name,
          format!(
            "{} hazard, {:?} at {:?} is not made visible after the {:?} write at {:?} of command #{}",
            kind, access.access, access.stage, write.access, write.stage, write.command_index,
          ),
        );
      }
    }

    if access.write {
      let state = self.states.entry(access.resource).or_default();
      state.last_write = Some(HalaWriteRecord {
        stage: access.stage,
        access: access.access,
        command_index,
      });
      state.visible_stages = HalaPipelineStageFlags::empty();
      state.visible_access = HalaAccessFlags::empty();
    }
  }

  fn make_visible(
    state: &mut HalaAccessState,
    src_stage_mask: HalaPipelineStageFlags,
    dst_stage_mask: HalaPipelineStageFlags,
    src_access_mask: HalaAccessFlags,
    dst_access_mask: HalaAccessFlags,
  ) -> bool {
    match state.last_write {
      Some(write) => {
        let covered = src_stage_mask.intersects(write.stage)
          && (write.access.is_empty() || src_access_mask.intersects(write.access));
        if covered {
          state.visible_stages |= dst_stage_mask;
          state.visible_access |= dst_access_mask;
        }
        covered
      }
      None => true,
    }
  }

  /// Record a buffer memory barrier.
  pub fn buffer_barrier(
    &mut self,
    resource: HalaTrackedResource,
    src_stage_mask: HalaPipelineStageFlags,
    dst_stage_mask: HalaPipelineStageFlags,
    src_access_mask: HalaAccessFlags,
    dst_access_mask: HalaAccessFlags,
  ) {
    if !self.is_enabled() {
      return;
    }
    let state = self.states.entry(resource).or_default();
    Self::make_visible(state, src_stage_mask, dst_stage_mask, src_access_mask, dst_access_mask);
  }

  /// Record an image memory barrier on one mip level.
  #[allow(clippy::too_many_arguments)]
  pub fn image_barrier(
    &mut self,
    command_index: usize,
    resource: HalaTrackedResource,
    name: &str,
    src_stage_mask: HalaPipelineStageFlags,
    dst_stage_mask: HalaPipelineStageFlags,
    src_access_mask: HalaAccessFlags,
    dst_access_mask: HalaAccessFlags,
    old_layout: HalaImageLayout,
    new_layout: HalaImageLayout,
  ) {
    if !self.is_enabled() {
      return;
    }
    let mut state = self.states.get(&resource).copied().unwrap_or_default();
    let covered = Self::make_visible(&mut state, src_stage_mask, dst_stage_mask, src_access_mask, dst_access_mask);

    if old_layout != HalaImageLayout::Undefined && old_layout != state.layout {
      self.report(
        command_index,
        name,
        format!("barrier expects layout {:?}, but the level is in {:?}", old_layout, state.layout),
      );
    }
    if old_layout != new_layout {
      if !covered && old_layout != HalaImageLayout::Undefined {
        self.report(
          command_index,
          name,
          "layout transition is not ordered after the last write".to_string(),
        );
      }
      // The transition itself is a write, visible to the second scope only.
      state.layout = new_layout;
      state.last_write = Some(HalaWriteRecord {
        stage: src_stage_mask,
        access: HalaAccessFlags::empty(),
        command_index,
      });
      state.visible_stages = dst_stage_mask;
      state.visible_access = dst_access_mask;
    }
    self.states.insert(resource, state);
  }

}

#[cfg(test)]
mod tests {
  use super::*;

  const BUFFER: HalaTrackedResource = HalaTrackedResource::Buffer(1);

  fn shader_read() -> HalaAccess {
    HalaAccess {
      resource: BUFFER,
      name: "counter".to_string(),
      stage: HalaPipelineStageFlags::COMPUTE_SHADER,
      access: HalaAccessFlags::SHADER_READ,
      write: false,
      layouts: None,
    }
  }

  fn transfer_write() -> HalaAccess {
    HalaAccess {
      resource: BUFFER,
      name: "counter".to_string(),
      stage: HalaPipelineStageFlags::TRANSFER,
      access: HalaAccessFlags::TRANSFER_WRITE,
      write: true,
      layouts: None,
    }
  }

  #[test]
  fn read_after_write_needs_a_barrier() {
    let mut validator = HalaSyncValidator::new(HalaValidationMode::Log);
    validator.access(0, &transfer_write());
    validator.access(1, &shader_read());
    assert_eq!(validator.hazards().len(), 1);
    assert_eq!(validator.hazards()[0].command_index, 1);
  }

  #[test]
  fn covering_barrier_makes_write_visible() {
    let mut validator = HalaSyncValidator::new(HalaValidationMode::Strict);
    validator.access(0, &transfer_write());
    validator.buffer_barrier(
      BUFFER,
      HalaPipelineStageFlags::TRANSFER,
      HalaPipelineStageFlags::COMPUTE_SHADER,
      HalaAccessFlags::TRANSFER_WRITE,
      HalaAccessFlags::SHADER_READ,
    );
    validator.access(2, &shader_read());
    assert!(validator.hazards().is_empty());
  }

  #[test]
  fn barrier_with_wrong_destination_stage_is_not_enough() {
    let mut validator = HalaSyncValidator::new(HalaValidationMode::Log);
    validator.access(0, &transfer_write());
    validator.buffer_barrier(
      BUFFER,
      HalaPipelineStageFlags::TRANSFER,
      HalaPipelineStageFlags::DRAW_INDIRECT,
      HalaAccessFlags::TRANSFER_WRITE,
      HalaAccessFlags::SHADER_READ,
    );
    validator.access(2, &shader_read());
    assert_eq!(validator.hazards().len(), 1);
  }

  #[test]
  fn device_idle_clears_pending_writes() {
    let mut validator = HalaSyncValidator::new(HalaValidationMode::Log);
    validator.access(0, &transfer_write());
    validator.device_idle();
    validator.access(0, &shader_read());
    assert!(validator.hazards().is_empty());
  }

  #[test]
  fn layout_transitions_are_tracked() {
    let level = HalaTrackedResource::ImageLevel(7, 0);
    let mut validator = HalaSyncValidator::new(HalaValidationMode::Log);
    validator.image_barrier(
      0,
      level,
      "depth",
      HalaPipelineStageFlags::TOP_OF_PIPE,
      HalaPipelineStageFlags::COMPUTE_SHADER,
      HalaAccessFlags::empty(),
      HalaAccessFlags::SHADER_READ,
      HalaImageLayout::Undefined,
      HalaImageLayout::ShaderReadOnlyOptimal,
    );
    assert_eq!(validator.layout(level), HalaImageLayout::ShaderReadOnlyOptimal);
    validator.access(1, &HalaAccess {
      resource: level,
      name: "depth".to_string(),
      stage: HalaPipelineStageFlags::COMPUTE_SHADER,
      access: HalaAccessFlags::SHADER_WRITE,
      write: true,
      layouts: Some(&[HalaImageLayout::General]),
    });
    // Wrong layout and the write is outside the visible access scope.
    assert_eq!(validator.hazards().len(), 2);
  }
}
