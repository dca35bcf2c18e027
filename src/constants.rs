//! Application constants loaded from `constants.ron` at compile time.
//!
//! The RON file is embedded via `include_str!` so it's always available,
//! no runtime file I/O. Parsed once on first access via `LazyLock`.

use serde::Deserialize;
use std::sync::LazyLock;

/// All tuneable application constants.
#[derive(Debug, Deserialize)]
pub struct Constants {
  // Frame extraction
  pub frame_width: u32,
  pub jpeg_quality: u32,

  // Event loop
  pub poll_interval_ms: u64,

  // Navigation
  pub small_step: i64,
  pub medium_step: i64,
  pub large_step: i64,

  // Export
  pub trimmed_suffix: String,
  pub stderr_tail_lines: usize,

  // Graphics
  pub kitty_chunk_size: usize,
  pub sixel_cell_width: u32,
  pub sixel_cell_height: u32,

  // Logging
  pub log_file_name: String,
}

static CONSTANTS: LazyLock<Constants> = LazyLock::new(|| {
  // Safety: the RON file is embedded at compile time; a malformed file fails the first test run.
  ron::from_str(include_str!("../constants.ron")).expect("constants.ron must be valid RON (embedded at compile time)")
});

/// Returns a reference to the parsed application constants.
pub fn constants() -> &'static Constants {
  &CONSTANTS
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn embedded_constants_parse() {
    let c = constants();
    assert_eq!(c.frame_width, 480);
    assert_eq!((c.small_step, c.medium_step, c.large_step), (1, 10, 100));
    assert_eq!(c.trimmed_suffix, "-trimmed");
    assert!(c.kitty_chunk_size > 0);
  }
}
