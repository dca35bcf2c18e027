use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// User preferences read from `prefs.toml` in the platform config directory.
///
/// Every field is optional; CLI flags take precedence and built-in defaults
/// fill whatever is left.
#[derive(Serialize, Deserialize, Default, Debug, PartialEq)]
pub struct Config {
  pub display_mode: Option<String>,
  pub frame_width: Option<u32>,
  pub ffmpeg_path: Option<PathBuf>,
  pub ffprobe_path: Option<PathBuf>,
  /// Force (`true`) or suppress (`false`) tmux passthrough wrapping. Unset means detect via `$TMUX`.
  pub tmux_passthrough: Option<bool>,
}

impl Config {
  pub fn load() -> Self {
    if let Some(proj_dirs) = ProjectDirs::from("", "", "itrim") {
      let config_file = proj_dirs.config_dir().join("prefs.toml");
      if let Ok(content) = std::fs::read_to_string(config_file) {
        return Self::parse(&content);
      }
    }
    Self::default()
  }

  fn parse(content: &str) -> Self {
    match toml::from_str(content) {
      Ok(config) => config,
      Err(e) => {
        tracing::warn!(err = %e, "config: prefs.toml is malformed, using defaults");
        Self::default()
      }
    }
  }

  pub fn ffmpeg(&self) -> PathBuf {
    self.ffmpeg_path.clone().unwrap_or_else(|| PathBuf::from("ffmpeg"))
  }

  pub fn ffprobe(&self) -> PathBuf {
    self.ffprobe_path.clone().unwrap_or_else(|| PathBuf::from("ffprobe"))
  }

  /// Whether graphics payloads must be wrapped for tmux.
  pub fn wants_passthrough(&self) -> bool {
    self.tmux_passthrough.unwrap_or_else(|| std::env::var_os("TMUX").is_some_and(|v| !v.is_empty()))
  }
}
