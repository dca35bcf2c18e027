//! Error taxonomy for trimming.
//!
//! Media adapters never leak raw process or I/O errors: every failure is mapped
//! into a [`TrimError`] carrying a human-readable detail before it reaches the
//! controller. [`TrimError::is_fatal`] decides whether the app keeps running.

use thiserror::Error;

/// Export preconditions checked before any file is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
  #[error("In and out points must both be set.")]
  MissingPoints,
  #[error("In and out points cannot be the same.")]
  SamePoints,
  #[error("Filename cannot be blank.")]
  BlankFilename,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrimError {
  /// The file could not be probed at all (missing, unreadable, not media).
  #[error("Error reading file. Is the file a valid video? ({0})")]
  Probe(String),

  #[error("No video stream found in file")]
  NoVideoStream,

  /// A single frame could not be decoded. `index` is the 0-based pipeline frame number.
  #[error("Error getting frame {index}: {detail}")]
  FrameExtraction { index: u32, detail: String },

  #[error(transparent)]
  Validation(#[from] ValidationError),

  /// The transcode failed; a partial file may be left at the destination.
  #[error("Error trimming video: {0}")]
  Export(String),
}

impl TrimError {
  pub fn is_fatal(&self) -> bool {
    match self {
      TrimError::Probe(_) | TrimError::NoVideoStream | TrimError::Export(_) => true,
      TrimError::FrameExtraction { .. } | TrimError::Validation(_) => false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fatality_follows_taxonomy() {
    assert!(TrimError::Probe("bad".into()).is_fatal());
    assert!(TrimError::NoVideoStream.is_fatal());
    assert!(TrimError::Export("boom".into()).is_fatal());
    assert!(!TrimError::FrameExtraction { index: 3, detail: "eof".into() }.is_fatal());
    assert!(!TrimError::from(ValidationError::BlankFilename).is_fatal());
  }

  #[test]
  fn validation_messages_pass_through() {
    assert_eq!(TrimError::from(ValidationError::SamePoints).to_string(), "In and out points cannot be the same.");
    assert_eq!(TrimError::from(ValidationError::MissingPoints).to_string(), "In and out points must both be set.");
  }

  #[test]
  fn frame_error_names_index() {
    let err = TrimError::FrameExtraction { index: 41, detail: "no frame decoded".into() };
    assert_eq!(err.to_string(), "Error getting frame 41: no frame decoded");
  }
}
