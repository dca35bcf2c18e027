//! Frame navigation and trim-point selection.
//!
//! All frame numbers here are 1-based, the way they are shown to the user.
//! Conversion to the pipeline's 0-based numbering happens in the media adapters.

use crate::error::ValidationError;

/// Result of applying a navigation delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
  /// Moved to the requested frame.
  Moved(u32),
  /// The request overshot a bound and was clamped to this frame.
  Clamped(u32),
  /// The request went below the first frame; nothing changed.
  Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
  current_frame: u32,
  frame_count: Option<u32>,
  in_point: Option<u32>,
  out_point: Option<u32>,
}

impl Default for Selection {
  fn default() -> Self {
    Self::new()
  }
}

impl Selection {
  pub fn new() -> Self {
    Self { current_frame: 1, frame_count: None, in_point: None, out_point: None }
  }

  pub fn current_frame(&self) -> u32 {
    self.current_frame
  }

  pub fn frame_count(&self) -> Option<u32> {
    self.frame_count
  }

  pub fn in_point(&self) -> Option<u32> {
    self.in_point
  }

  pub fn out_point(&self) -> Option<u32> {
    self.out_point
  }

  /// Record the total frame count. Only the first call has any effect.
  ///
  /// A zero count is ignored since it would leave no valid current frame.
  pub fn set_frame_count(&mut self, count: u32) -> bool {
    if self.frame_count.is_some() || count == 0 {
      return false;
    }
    self.frame_count = Some(count);
    self.current_frame = self.current_frame.min(count);
    true
  }

  pub fn step(&mut self, delta: i64) -> Step {
    let candidate = self.current_frame as i64 + delta;
    if candidate < 0 || (candidate == 0 && self.current_frame == 1) {
      return Step::Rejected;
    }
    if candidate == 0 {
      self.current_frame = 1;
      return Step::Clamped(1);
    }
    if let Some(count) = self.frame_count
      && candidate > count as i64
    {
      self.current_frame = count;
      return Step::Clamped(count);
    }
    // No frame count yet: anything up to u32::MAX is provisionally valid.
    let frame = u32::try_from(candidate).unwrap_or(u32::MAX);
    self.current_frame = frame;
    if frame as i64 == candidate { Step::Moved(frame) } else { Step::Clamped(frame) }
  }

  /// Jump straight to `frame`, clamped into the valid range.
  pub fn jump_to(&mut self, frame: u32) -> u32 {
    let upper = self.frame_count.unwrap_or(u32::MAX);
    self.current_frame = frame.clamp(1, upper);
    self.current_frame
  }

  pub fn jump_to_end(&mut self) -> Option<u32> {
    self.frame_count.map(|count| self.jump_to(count))
  }

  pub fn set_in(&mut self) {
    self.in_point = Some(self.current_frame);
  }

  pub fn set_out(&mut self) {
    self.out_point = Some(self.current_frame);
  }

  pub fn clear_points(&mut self) {
    self.in_point = None;
    self.out_point = None;
  }

  /// Both points, once they form an exportable range.
  pub fn validate_export(&self) -> Result<(u32, u32), ValidationError> {
    match (self.in_point, self.out_point) {
      (Some(a), Some(b)) if a == b => Err(ValidationError::SamePoints),
      (Some(a), Some(b)) => Ok((a, b)),
      _ => Err(ValidationError::MissingPoints),
    }
  }

  pub fn can_export(&self) -> bool {
    self.validate_export().is_ok()
  }

  /// Number of frames the current selection covers, inclusive of both ends.
  pub fn selected_len(&self) -> Option<u32> {
    let (a, b) = self.validate_export().ok()?;
    Some(a.abs_diff(b) + 1)
  }
}
