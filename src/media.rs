//! The external media pipeline seen from the controller.
//!
//! [`MediaPipeline`] is the seam between the interactive app and whatever
//! actually decodes video. The real implementation shells out to ffmpeg and
//! ffprobe (see [`crate::ffmpeg`]); tests substitute a fake.

use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

use crate::error::TrimError;

/// Stream metadata gathered by the probe.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoInfo {
  /// Total frames of the first video stream. May be a container estimate.
  pub frame_count: Option<u32>,
  pub width: Option<u32>,
  pub height: Option<u32>,
  pub frame_rate: Option<f64>,
  /// Seconds.
  pub duration: Option<f64>,
  pub has_audio: bool,
}

impl VideoInfo {
  /// `HH:MM:SS.mmm` position of a 1-based frame, if the frame rate is known.
  pub fn timecode(&self, frame: u32) -> Option<String> {
    let fps = self.frame_rate.filter(|f| *f > 0.0)?;
    Some(hms(frame.saturating_sub(1) as f64 / fps))
  }

  /// Total running time as `HH:MM:SS.mmm`, if the probe reported one.
  pub fn duration_label(&self) -> Option<String> {
    self.duration.filter(|d| d.is_finite() && *d >= 0.0).map(hms)
  }
}

fn hms(seconds: f64) -> String {
  let total_ms = (seconds * 1000.0).round() as u64;
  let (h, rem) = (total_ms / 3_600_000, total_ms % 3_600_000);
  let (m, rem) = (rem / 60_000, rem % 60_000);
  let (s, ms) = (rem / 1000, rem % 1000);
  format!("{:02}:{:02}:{:02}.{:03}", h, m, s, ms)
}

pub trait MediaPipeline: Clone + Send + Sync + 'static {
  /// Read stream metadata. Fails with [`TrimError::Probe`] or [`TrimError::NoVideoStream`].
  fn probe(&self, path: &Path) -> impl Future<Output = Result<VideoInfo, TrimError>> + Send;

  /// Decode the frame with 0-based sequence number `index`, scaled to `width`
  /// pixels wide, as a single encoded still image.
  fn extract_frame(&self, path: &Path, index: u32, width: u32)
  -> impl Future<Output = Result<Vec<u8>, TrimError>> + Send;

  /// Write the video-only range between two 1-based points to `dest`.
  ///
  /// Points may arrive in either order. Frames written so far are reported on
  /// `progress`; the return value is the single terminal outcome.
  fn export_range(
    &self,
    path: &Path,
    in_frame: u32,
    out_frame: u32,
    dest: &Path,
    progress: mpsc::UnboundedSender<u32>,
  ) -> impl Future<Output = Result<PathBuf, TrimError>> + Send;
}

/// Convert two 1-based points into the inclusive 0-based pipeline range, lowest first.
pub fn frame_range(a: u32, b: u32) -> (u32, u32) {
  (a.min(b).saturating_sub(1), a.max(b).saturating_sub(1))
}

/// Default export destination: `<dir>/<stem><suffix><ext>` next to the input.
pub fn trimmed_path(input: &Path, suffix: &str) -> PathBuf {
  let stem = input.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
  let ext = input.extension().map(|e| format!(".{}", e.to_string_lossy())).unwrap_or_default();
  let name = format!("{}{}{}", stem, suffix, ext);
  match input.parent() {
    Some(dir) => dir.join(name),
    None => PathBuf::from(name),
  }
}
