mod app;
mod config;
mod constants;
mod display;
mod error;
mod ffmpeg;
mod graphics;
mod input;
mod media;
mod selection;
mod ui;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use directories::ProjectDirs;
use ratatui::{
  DefaultTerminal,
  crossterm::event::{self, Event, KeyEventKind},
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use app::{App, GraphicsStep, Outcome};
use config::Config;
use constants::constants;
use display::{CliDisplayMode, DisplayMode};
use ffmpeg::Ffmpeg;
use graphics::{FramePayload, kitty_delete_all};
use media::MediaPipeline;

// --- CLI ---

#[derive(Parser, Debug)]
#[command(author, version = env!("CARGO_PKG_VERSION"), about, long_about = None)]
struct Args {
  /// Video file to trim
  #[arg(required_unless_present = "completions")]
  file: Option<PathBuf>,

  /// Display mode: 'auto', 'kitty', 'sixel', 'iterm', 'direct', or 'ascii' (default: auto-detect)
  #[arg(short, long)]
  display_mode: Option<CliDisplayMode>,

  /// Width in pixels that preview frames are decoded at
  #[arg(short = 'w', long)]
  frame_width: Option<u32>,

  /// Print a shell completion script and exit
  #[arg(long, value_name = "SHELL")]
  completions: Option<clap_complete::Shell>,
}

// --- Logging ---

/// Log to a file under the user data dir; stdout belongs to the TUI.
fn init_logging() -> Option<WorkerGuard> {
  let dir = ProjectDirs::from("", "", "itrim")
    .map(|dirs| dirs.data_local_dir().to_path_buf())
    .unwrap_or_else(std::env::temp_dir);
  std::fs::create_dir_all(&dir).ok()?;
  let appender = tracing_appender::rolling::never(&dir, &constants().log_file_name);
  let (writer, guard) = tracing_appender::non_blocking(appender);
  let filter = EnvFilter::try_from_env("ITRIM_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::fmt().with_env_filter(filter).with_writer(writer).with_ansi(false).try_init().ok()?;
  Some(guard)
}

// --- Main ---

#[tokio::main]
async fn main() -> Result<ExitCode> {
  let args = Args::parse();

  if let Some(shell) = args.completions {
    clap_complete::generate(shell, &mut Args::command(), "itrim", &mut std::io::stdout());
    return Ok(ExitCode::SUCCESS);
  }
  let path = args.file.context("no input file given")?;

  let _log_guard = init_logging();
  let config = Config::load();
  let pipeline = Ffmpeg::from_config(&config);

  let video = match pipeline.probe(&path).await {
    Ok(video) => video,
    Err(e) => {
      eprintln!("Fatal error: {}", e);
      return Ok(ExitCode::FAILURE);
    }
  };
  info!(path = %path.display(), frames = ?video.frame_count, "opened video");

  let cli_mode = args
    .display_mode
    .or_else(|| config.display_mode.as_deref().map(CliDisplayMode::from_config))
    .unwrap_or(CliDisplayMode::Auto);
  let display_mode = display::resolve_display_mode(cli_mode);
  let frame_width = args.frame_width.or(config.frame_width).unwrap_or(constants().frame_width).max(16);
  info!(display_mode = display_mode.label(), frame_width, "display");

  let app = App::new(pipeline, path, video, display_mode, config.wants_passthrough(), frame_width);

  let default_hook = std::panic::take_hook();
  std::panic::set_hook(Box::new(move |info| {
    ratatui::restore();
    default_hook(info);
  }));

  let mut terminal = ratatui::init();
  let result = run(&mut terminal, app).await;
  ratatui::restore();

  match result? {
    Outcome::Quit => Ok(ExitCode::SUCCESS),
    Outcome::Saved(dest) => {
      println!("Saved to {}!", dest.display());
      Ok(ExitCode::SUCCESS)
    }
    Outcome::Fatal(message) => {
      eprintln!("Fatal error: {}", message);
      Ok(ExitCode::FAILURE)
    }
  }
}

async fn run<P: MediaPipeline>(terminal: &mut DefaultTerminal, mut app: App<P>) -> Result<Outcome> {
  let poll = Duration::from_millis(constants().poll_interval_ms);
  app.request_frame();

  let outcome = loop {
    app.check_pending();
    if app.take_bell() {
      graphics::beep()?;
    }
    if let Some(outcome) = app.outcome.take() {
      break outcome;
    }

    if app.gfx.needs_clear {
      terminal.clear()?;
      app.gfx.needs_clear = false;
    }
    terminal.draw(|frame| ui::ui(frame, &mut app))?;
    sync_graphics(&mut app)?;

    if event::poll(poll)? {
      match event::read()? {
        Event::Key(key) if key.kind == KeyEventKind::Press => input::handle_key_event(&mut app, key),
        Event::Resize(..) => app.on_resize(),
        _ => {}
      }
    }
  };

  if app.display_mode == DisplayMode::Kitty {
    kitty_delete_all(app.passthrough)?;
  }
  Ok(outcome)
}

/// Write the graphics-protocol payload for the displayed frame when it or its viewport changed.
fn sync_graphics<P: MediaPipeline>(app: &mut App<P>) -> Result<()> {
  match app.next_graphics_step() {
    GraphicsStep::Idle => {}
    GraphicsStep::DeleteKitty => kitty_delete_all(app.passthrough)?,
    GraphicsStep::Send(area) => {
      let Some(shown) = &app.displayed else { return Ok(()) };
      if let FramePayload::Escape { area: placed, data } =
        graphics::render(&shown.image, area, app.display_mode, app.passthrough)?
      {
        if app.display_mode == DisplayMode::Kitty {
          kitty_delete_all(app.passthrough)?;
        }
        graphics::write_escape(placed, &data)?;
      }
    }
  }
  Ok(())
}
