use serde::Deserialize;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::constants::constants;
use crate::error::TrimError;
use crate::media::{MediaPipeline, VideoInfo, frame_range};

/// [`MediaPipeline`] backed by the `ffmpeg` and `ffprobe` executables.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
  ffmpeg: PathBuf,
  ffprobe: PathBuf,
  jpeg_quality: u32,
}

impl Ffmpeg {
  pub fn from_config(config: &Config) -> Self {
    Self { ffmpeg: config.ffmpeg(), ffprobe: config.ffprobe(), jpeg_quality: constants().jpeg_quality }
  }
}

fn spawn_detail(program: &Path, e: std::io::Error) -> String {
  let name = program.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| "ffmpeg".into());
  if e.kind() == std::io::ErrorKind::NotFound {
    format!("{} not found. Install it with: brew install ffmpeg (macOS) or apt install ffmpeg (Linux)", name)
  } else {
    format!("Failed to start {}: {}", name, e)
  }
}

/// Last `n` non-empty lines of ffmpeg's stderr, joined for display.
fn stderr_tail(stderr: &[u8], n: usize) -> String {
  let text = String::from_utf8_lossy(stderr);
  let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
  lines[lines.len().saturating_sub(n)..].join(" | ")
}

// --- ffprobe ---

#[derive(Debug, Deserialize)]
struct ProbeOutput {
  #[serde(default)]
  streams: Vec<ProbeStream>,
  format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
  codec_type: Option<String>,
  width: Option<u32>,
  height: Option<u32>,
  avg_frame_rate: Option<String>,
  r_frame_rate: Option<String>,
  nb_frames: Option<String>,
  duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
  duration: Option<String>,
}

/// Parse an ffprobe rational like `30000/1001`. `0/0` and garbage yield `None`.
fn parse_rational(s: &str) -> Option<f64> {
  let (num, den) = s.split_once('/').unwrap_or((s, "1"));
  let num: f64 = num.trim().parse().ok()?;
  let den: f64 = den.trim().parse().ok()?;
  if den == 0.0 || num <= 0.0 {
    return None;
  }
  Some(num / den)
}

fn parse_seconds(s: Option<&str>) -> Option<f64> {
  s.and_then(|s| s.trim().parse::<f64>().ok()).filter(|d| d.is_finite() && *d > 0.0)
}

/// Turn ffprobe's `-print_format json -show_streams -show_format` output into [`VideoInfo`].
///
/// `nb_frames` is taken as reported. Containers that omit it (Matroska, WebM)
/// get an estimate from duration and average frame rate.
fn parse_probe(json: &[u8]) -> Result<VideoInfo, TrimError> {
  let probe: ProbeOutput =
    serde_json::from_slice(json).map_err(|e| TrimError::Probe(format!("unreadable ffprobe output: {}", e)))?;

  let video = probe.streams.iter().find(|s| s.codec_type.as_deref() == Some("video")).ok_or(TrimError::NoVideoStream)?;
  let has_audio = probe.streams.iter().any(|s| s.codec_type.as_deref() == Some("audio"));

  let frame_rate = video
    .avg_frame_rate
    .as_deref()
    .and_then(parse_rational)
    .or_else(|| video.r_frame_rate.as_deref().and_then(parse_rational));
  let duration =
    parse_seconds(video.duration.as_deref()).or_else(|| parse_seconds(probe.format.as_ref()?.duration.as_deref()));

  let reported = video.nb_frames.as_deref().and_then(|n| n.trim().parse::<u32>().ok()).filter(|n| *n > 0);
  let frame_count = reported.or_else(|| {
    let estimate = (duration? * frame_rate?).round();
    (estimate >= 1.0).then(|| estimate.min(u32::MAX as f64) as u32)
  });

  Ok(VideoInfo { frame_count, width: video.width, height: video.height, frame_rate, duration, has_audio })
}

// --- Argument builders ---

fn frame_filter(index: u32, width: u32) -> String {
  format!("select=eq(n\\,{}),scale={}:-2", index, width)
}

fn export_filter(lo: u32, hi: u32) -> String {
  format!("select=between(n\\,{}\\,{}),setpts=N/FRAME_RATE/TB", lo, hi)
}

fn frame_args(path: &Path, index: u32, width: u32, quality: u32) -> Vec<OsString> {
  let mut args: Vec<OsString> = ["-v", "error", "-nostdin", "-i"].iter().map(OsString::from).collect();
  args.push(path.as_os_str().to_owned());
  for a in [
    "-an".to_string(),
    "-vf".to_string(),
    frame_filter(index, width),
    "-frames:v".to_string(),
    "1".to_string(),
    "-f".to_string(),
    "image2pipe".to_string(),
    "-c:v".to_string(),
    "mjpeg".to_string(),
    "-q:v".to_string(),
    quality.to_string(),
    "pipe:1".to_string(),
  ] {
    args.push(a.into());
  }
  args
}

fn export_args(path: &Path, lo: u32, hi: u32, dest: &Path) -> Vec<OsString> {
  let mut args: Vec<OsString> = ["-v", "error", "-nostdin", "-y", "-i"].iter().map(OsString::from).collect();
  args.push(path.as_os_str().to_owned());
  for a in ["-an".to_string(), "-vf".to_string(), export_filter(lo, hi), "-progress".to_string(), "pipe:1".to_string()]
  {
    args.push(a.into());
  }
  args.push("-nostats".into());
  args.push(dest.as_os_str().to_owned());
  args
}

/// Frames written so far, from one `-progress` key/value line.
fn parse_progress_line(line: &str) -> Option<u32> {
  let (key, value) = line.trim().split_once('=')?;
  if key != "frame" {
    return None;
  }
  value.trim().parse().ok()
}

fn same_file(a: &Path, b: &Path) -> bool {
  if a == b {
    return true;
  }
  match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
    (Ok(a), Ok(b)) => a == b,
    _ => false,
  }
}

/// Read a child's stderr to the end, keeping only the last lines.
async fn drain_tail<R: AsyncRead + Unpin>(reader: R, keep: usize) -> String {
  let mut lines = BufReader::new(reader).lines();
  let mut tail = VecDeque::with_capacity(keep);
  while let Ok(Some(line)) = lines.next_line().await {
    let line = line.trim().to_string();
    if line.is_empty() || keep == 0 {
      continue;
    }
    if tail.len() >= keep {
      tail.pop_front();
    }
    tail.push_back(line);
  }
  tail.into_iter().collect::<Vec<_>>().join(" | ")
}

/// Forward `frame=<n>` lines from ffmpeg's `-progress` output until the pipe closes.
///
/// After a read error the rest is discarded unread so ffmpeg never blocks on a full pipe.
async fn forward_progress<R: AsyncRead + Unpin>(reader: R, progress: &mpsc::UnboundedSender<u32>) {
  let mut lines = BufReader::new(reader).lines();
  loop {
    match lines.next_line().await {
      Ok(Some(line)) => {
        if let Some(frames) = parse_progress_line(&line) {
          let _ = progress.send(frames);
        }
      }
      Ok(None) => return,
      Err(e) => {
        debug!(err = %e, "export: unreadable progress output, discarding the rest");
        break;
      }
    }
  }
  let mut rest = lines.into_inner();
  let _ = tokio::io::copy(&mut rest, &mut tokio::io::sink()).await;
}

impl MediaPipeline for Ffmpeg {
  async fn probe(&self, path: &Path) -> Result<VideoInfo, TrimError> {
    info!(path = %path.display(), "probe: reading stream metadata");
    let output = Command::new(&self.ffprobe)
      .args(["-v", "error", "-print_format", "json", "-show_streams", "-show_format"])
      .arg(path)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .output()
      .await
      .map_err(|e| TrimError::Probe(spawn_detail(&self.ffprobe, e)))?;

    if !output.status.success() {
      let detail = stderr_tail(&output.stderr, constants().stderr_tail_lines);
      warn!(status = ?output.status.code(), detail = %detail, "probe: ffprobe failed");
      return Err(TrimError::Probe(if detail.is_empty() { format!("ffprobe exited with {}", output.status) } else { detail }));
    }

    let info = parse_probe(&output.stdout)?;
    info!(frames = ?info.frame_count, fps = ?info.frame_rate, audio = info.has_audio, "probe: done");
    Ok(info)
  }

  async fn extract_frame(&self, path: &Path, index: u32, width: u32) -> Result<Vec<u8>, TrimError> {
    debug!(index, width, "extract: decoding frame");
    let output = Command::new(&self.ffmpeg)
      .args(frame_args(path, index, width, self.jpeg_quality))
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true)
      .output()
      .await
      .map_err(|e| TrimError::FrameExtraction { index, detail: spawn_detail(&self.ffmpeg, e) })?;

    if !output.status.success() {
      let detail = stderr_tail(&output.stderr, constants().stderr_tail_lines);
      warn!(index, detail = %detail, "extract: ffmpeg failed");
      return Err(TrimError::FrameExtraction { index, detail });
    }
    if output.stdout.is_empty() {
      // ffmpeg exits cleanly when the select filter never matches.
      return Err(TrimError::FrameExtraction { index, detail: "no frame decoded (past end of stream?)".into() });
    }
    debug!(index, bytes = output.stdout.len(), "extract: frame ready");
    Ok(output.stdout)
  }

  async fn export_range(
    &self,
    path: &Path,
    in_frame: u32,
    out_frame: u32,
    dest: &Path,
    progress: mpsc::UnboundedSender<u32>,
  ) -> Result<PathBuf, TrimError> {
    if same_file(path, dest) {
      return Err(TrimError::Export("output file would overwrite the input".into()));
    }
    let (lo, hi) = frame_range(in_frame, out_frame);
    info!(lo, hi, dest = %dest.display(), "export: starting transcode");

    let mut child = Command::new(&self.ffmpeg)
      .args(export_args(path, lo, hi, dest))
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true)
      .spawn()
      .map_err(|e| TrimError::Export(spawn_detail(&self.ffmpeg, e)))?;

    let stdout = child.stdout.take().ok_or_else(|| TrimError::Export("Failed to get ffmpeg stdout".into()))?;
    let stderr = child.stderr.take().ok_or_else(|| TrimError::Export("Failed to get ffmpeg stderr".into()))?;
    // Drain stderr concurrently; an unread pipe fills and stalls ffmpeg.
    let stderr_task = tokio::spawn(drain_tail(stderr, constants().stderr_tail_lines));

    forward_progress(stdout, &progress).await;

    let status = child.wait().await.map_err(|e| TrimError::Export(format!("Failed to wait for ffmpeg: {}", e)))?;
    let tail = stderr_task.await.unwrap_or_default();
    if !status.success() {
      warn!(status = ?status.code(), detail = %tail, "export: ffmpeg failed");
      return Err(TrimError::Export(if tail.is_empty() { format!("ffmpeg exited with {}", status) } else { tail }));
    }

    info!(dest = %dest.display(), "export: done");
    Ok(dest.to_path_buf())
  }
}
