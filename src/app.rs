use image::DynamicImage;
use ratatui::layout::Rect;
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::constants::constants;
use crate::display::DisplayMode;
use crate::error::{TrimError, ValidationError};
use crate::media::{MediaPipeline, VideoInfo, frame_range, trimmed_path};
use crate::selection::{Selection, Step};

// --- Types ---

/// Where key presses go.
#[derive(Debug, Clone, PartialEq)]
pub enum InputMode {
  Normal,
  Prompt(Prompt),
  Error { message: String, fatal: bool },
  Exporting { dest: PathBuf, written: u32, total: u32 },
}

/// Single-line text input used for the export filename.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
  pub input: String,
  /// Cursor position as a char index.
  pub cursor: usize,
  /// Horizontal scroll offset in display columns.
  pub scroll: usize,
}

impl Prompt {
  pub fn new(initial: String) -> Self {
    let cursor = initial.chars().count();
    Self { input: initial, cursor, scroll: 0 }
  }
}

/// How the session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
  Quit,
  Saved(PathBuf),
  Fatal(String),
}

/// The frame currently on screen.
pub struct DisplayedFrame {
  /// 1-based frame number.
  pub number: u32,
  /// Sequence number of the request that produced it.
  pub seq: u64,
  pub image: DynamicImage,
}

pub(crate) struct FrameResult {
  pub(crate) seq: u64,
  pub(crate) number: u32,
  pub(crate) result: Result<DynamicImage, TrimError>,
}

/// Terminal graphics protocol rendering state (Kitty/Sixel/iTerm2).
#[derive(Default)]
pub struct GraphicsCache {
  /// Viewport the frame should occupy this draw; `None` hides it.
  pub frame_area: Option<Rect>,
  /// `(seq, area)` of the last escape payload written.
  pub last_sent: Option<(u64, Rect)>,
  /// Cell-mode image resized for `(seq, area)`.
  pub cells: Option<(u64, Rect, DynamicImage)>,
  /// Wipe the whole terminal before the next draw.
  pub needs_clear: bool,
}

impl GraphicsCache {
  /// Forget what is on screen so the current frame is painted again.
  pub fn invalidate(&mut self) {
    self.last_sent = None;
    self.cells = None;
  }
}

/// What the run loop must write for the graphics-protocol frame after a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphicsStep {
  Idle,
  /// Encode the displayed frame for this viewport and write it.
  Send(Rect),
  /// Remove the Kitty image that is on screen.
  DeleteKitty,
}

struct ExportTask {
  progress_rx: mpsc::UnboundedReceiver<u32>,
  done_rx: oneshot::Receiver<Result<PathBuf, TrimError>>,
}

pub struct App<P: MediaPipeline> {
  pipeline: P,
  pub path: PathBuf,
  pub info: VideoInfo,
  pub selection: Selection,
  pub mode: InputMode,
  pub display_mode: DisplayMode,
  pub passthrough: bool,
  frame_width: u32,
  pub displayed: Option<DisplayedFrame>,
  /// Frame number of the newest extraction still in flight.
  pub loading: Option<u32>,
  next_seq: u64,
  /// Highest sequence number whose result has been applied.
  applied_seq: u64,
  frame_tx: mpsc::UnboundedSender<FrameResult>,
  frame_rx: mpsc::UnboundedReceiver<FrameResult>,
  export: Option<ExportTask>,
  pub gfx: GraphicsCache,
  pub outcome: Option<Outcome>,
  bell: bool,
}

impl<P: MediaPipeline> App<P> {
  pub fn new(
    pipeline: P,
    path: PathBuf,
    info: VideoInfo,
    display_mode: DisplayMode,
    passthrough: bool,
    frame_width: u32,
  ) -> Self {
    let mut selection = Selection::new();
    if let Some(count) = info.frame_count {
      selection.set_frame_count(count);
    }
    let (frame_tx, frame_rx) = mpsc::unbounded_channel();
    Self {
      pipeline,
      path,
      info,
      selection,
      mode: InputMode::Normal,
      display_mode,
      passthrough,
      frame_width,
      displayed: None,
      loading: None,
      next_seq: 0,
      applied_seq: 0,
      frame_tx,
      frame_rx,
      export: None,
      gfx: GraphicsCache::default(),
      outcome: None,
      bell: false,
    }
  }

  /// Returns and clears the pending audible alert.
  pub fn take_bell(&mut self) -> bool {
    std::mem::take(&mut self.bell)
  }

  pub fn quit(&mut self) {
    self.outcome = Some(Outcome::Quit);
  }

  // --- Frames ---

  /// Start decoding the current frame. The result arrives through `check_pending`.
  pub fn request_frame(&mut self) {
    self.next_seq += 1;
    let seq = self.next_seq;
    let number = self.selection.current_frame();
    let index = number - 1;
    self.loading = Some(number);
    debug!(seq, number, "extract: requested");

    let pipeline = self.pipeline.clone();
    let path = self.path.clone();
    let width = self.frame_width;
    let tx = self.frame_tx.clone();
    tokio::spawn(async move {
      let result = pipeline.extract_frame(&path, index, width).await.and_then(|bytes| {
        image::load_from_memory(&bytes)
          .map_err(|e| TrimError::FrameExtraction { index, detail: format!("could not decode image: {}", e) })
      });
      let _ = tx.send(FrameResult { seq, number, result });
    });
  }

  /// Apply one finished extraction. Results older than the newest applied one are dropped.
  pub(crate) fn apply_frame(&mut self, frame: FrameResult) {
    if frame.seq <= self.applied_seq {
      debug!(seq = frame.seq, applied = self.applied_seq, "extract: discarding stale result");
      return;
    }
    self.applied_seq = frame.seq;
    if frame.seq == self.next_seq {
      self.loading = None;
    }
    match frame.result {
      Ok(image) => {
        debug!(seq = frame.seq, number = frame.number, "extract: displaying");
        self.displayed = Some(DisplayedFrame { number: frame.number, seq: frame.seq, image });
      }
      Err(e) => {
        if self.mode == InputMode::Normal {
          self.show_error(e);
        } else {
          warn!(err = %e, "extract: failed while a dialog is open");
        }
      }
    }
  }

  fn navigate(&mut self, step: Step, before: u32) {
    match step {
      Step::Rejected => self.bell = true,
      Step::Moved(frame) | Step::Clamped(frame) => {
        if frame != before {
          self.request_frame();
        }
      }
    }
  }

  pub fn step(&mut self, delta: i64) {
    let before = self.selection.current_frame();
    let step = self.selection.step(delta);
    self.navigate(step, before);
  }

  pub fn jump_to(&mut self, frame: u32) {
    let before = self.selection.current_frame();
    let after = self.selection.jump_to(frame);
    self.navigate(Step::Moved(after), before);
  }

  pub fn jump_to_end(&mut self) {
    let before = self.selection.current_frame();
    match self.selection.jump_to_end() {
      Some(after) => self.navigate(Step::Moved(after), before),
      None => self.bell = true,
    }
  }

  pub fn jump_to_in(&mut self) {
    match self.selection.in_point() {
      Some(frame) => self.jump_to(frame),
      None => self.bell = true,
    }
  }

  pub fn jump_to_out(&mut self) {
    match self.selection.out_point() {
      Some(frame) => self.jump_to(frame),
      None => self.bell = true,
    }
  }

  /// The viewport changed size; repaint from the held frame.
  pub fn on_resize(&mut self) {
    self.gfx.needs_clear = true;
    self.gfx.invalidate();
  }

  /// Decide what graphics-protocol output the last draw needs, and record it as sent.
  ///
  /// A frame is re-sent only when its sequence number or viewport changed. Hiding it
  /// deletes the Kitty image; Sixel and iTerm2 pixels have no delete command, so the
  /// terminal is cleared and repainted instead.
  pub fn next_graphics_step(&mut self) -> GraphicsStep {
    if !self.display_mode.uses_graphics_protocol() {
      return GraphicsStep::Idle;
    }
    match (self.gfx.frame_area, &self.displayed) {
      (Some(area), Some(shown)) => {
        let key = (shown.seq, area);
        if self.gfx.last_sent == Some(key) {
          return GraphicsStep::Idle;
        }
        self.gfx.last_sent = Some(key);
        GraphicsStep::Send(area)
      }
      _ => {
        if self.gfx.last_sent.take().is_none() {
          return GraphicsStep::Idle;
        }
        if self.display_mode == DisplayMode::Kitty {
          GraphicsStep::DeleteKitty
        } else {
          self.gfx.needs_clear = true;
          GraphicsStep::Idle
        }
      }
    }
  }

  // --- Dialogs ---

  pub fn show_error(&mut self, e: TrimError) {
    let fatal = e.is_fatal();
    if fatal {
      error!(err = %e, "fatal error");
    } else {
      warn!(err = %e, "error dialog");
    }
    self.mode = InputMode::Error { message: e.to_string(), fatal };
  }

  /// Close the error dialog. Fatal errors end the session instead.
  pub fn dismiss_error(&mut self) {
    if let InputMode::Error { message, fatal } = &self.mode {
      if *fatal {
        self.outcome = Some(Outcome::Fatal(message.clone()));
        return;
      }
      self.mode = InputMode::Normal;
      self.gfx.invalidate();
    }
  }

  /// Enter: check the selection and open the filename prompt.
  pub fn begin_export(&mut self) {
    if let Err(v) = self.selection.validate_export() {
      self.show_error(v.into());
      return;
    }
    let default = trimmed_path(&self.path, &constants().trimmed_suffix);
    self.mode = InputMode::Prompt(Prompt::new(default.display().to_string()));
  }

  pub fn cancel_prompt(&mut self) {
    if matches!(self.mode, InputMode::Prompt(_)) {
      self.mode = InputMode::Normal;
      self.gfx.invalidate();
    }
  }

  pub fn submit_prompt(&mut self) {
    let InputMode::Prompt(prompt) = &self.mode else { return };
    let filename = prompt.input.trim().to_string();
    if filename.is_empty() {
      self.show_error(ValidationError::BlankFilename.into());
      return;
    }
    self.start_export(PathBuf::from(filename));
  }

  fn start_export(&mut self, dest: PathBuf) {
    let (a, b) = match self.selection.validate_export() {
      Ok(points) => points,
      Err(v) => {
        self.show_error(v.into());
        return;
      }
    };
    let (lo, hi) = frame_range(a, b);
    info!(in_point = a, out_point = b, dest = %dest.display(), "export: triggered");

    let (progress_tx, progress_rx) = mpsc::unbounded_channel();
    let (done_tx, done_rx) = oneshot::channel();
    let pipeline = self.pipeline.clone();
    let path = self.path.clone();
    let target = dest.clone();
    tokio::spawn(async move {
      let _ = done_tx.send(pipeline.export_range(&path, a, b, &target, progress_tx).await);
    });

    self.export = Some(ExportTask { progress_rx, done_rx });
    self.mode = InputMode::Exporting { dest, written: 0, total: hi - lo + 1 };
  }

  // --- Polling ---

  pub fn check_pending(&mut self) {
    while let Ok(frame) = self.frame_rx.try_recv() {
      self.apply_frame(frame);
    }

    let Some(mut task) = self.export.take() else { return };
    while let Ok(n) = task.progress_rx.try_recv() {
      if let InputMode::Exporting { written, .. } = &mut self.mode {
        *written = n;
      }
    }
    match task.done_rx.try_recv() {
      Ok(Ok(dest)) => {
        info!(dest = %dest.display(), "export: saved");
        self.outcome = Some(Outcome::Saved(dest));
      }
      Ok(Err(e)) => self.show_error(e),
      Err(oneshot::error::TryRecvError::Empty) => self.export = Some(task),
      Err(oneshot::error::TryRecvError::Closed) => {
        self.show_error(TrimError::Export("export task ended without a result".into()));
      }
    }
  }

  /// Wait for the next extraction result and apply it.
  #[cfg(test)]
  pub(crate) async fn settle_frame(&mut self) {
    let frame = self.frame_rx.recv().await.expect("frame channel open");
    self.apply_frame(frame);
  }

  /// Wait for the export task to report its outcome.
  #[cfg(test)]
  pub(crate) async fn settle_export(&mut self) {
    while self.export.is_some() {
      tokio::task::yield_now().await;
      self.check_pending();
    }
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::media::fake::FakePipeline;

  pub(crate) fn app_with(pipeline: FakePipeline) -> App<FakePipeline> {
    let info = VideoInfo { frame_count: Some(pipeline.frames), frame_rate: Some(25.0), ..VideoInfo::default() };
    App::new(pipeline, PathBuf::from("/clips/cat.mp4"), info, DisplayMode::Direct, false, 480)
  }

  fn ok_frame(seq: u64, number: u32) -> FrameResult {
    FrameResult { seq, number, result: Ok(DynamicImage::new_rgb8(2, 2)) }
  }

  #[tokio::test]
  async fn initial_frame_is_displayed() {
    let mut app = app_with(FakePipeline::with_frames(100));
    app.request_frame();
    assert_eq!(app.loading, Some(1));
    app.settle_frame().await;
    assert_eq!(app.displayed.as_ref().map(|f| f.number), Some(1));
    assert_eq!(app.loading, None);
  }

  #[tokio::test]
  async fn navigation_fetches_new_frame() {
    let mut app = app_with(FakePipeline::with_frames(100));
    app.step(10);
    app.settle_frame().await;
    assert_eq!(app.selection.current_frame(), 11);
    let shown = app.displayed.as_ref().unwrap();
    assert_eq!(shown.number, 11);
    // Fake frames encode their 0-based index in the red channel.
    assert_eq!(shown.image.to_rgb8().get_pixel(0, 0)[0], 10);
  }

  #[tokio::test]
  async fn stepping_below_start_rings_bell_without_fetch() {
    let mut app = app_with(FakePipeline::with_frames(100));
    app.step(-1);
    assert!(app.take_bell());
    assert!(!app.take_bell());
    assert_eq!(app.selection.current_frame(), 1);
    assert_eq!(app.loading, None);
  }

  #[tokio::test]
  async fn clamped_at_end_does_not_refetch() {
    let mut app = app_with(FakePipeline::with_frames(5));
    app.step(100);
    app.settle_frame().await;
    assert_eq!(app.selection.current_frame(), 5);
    app.step(1);
    assert_eq!(app.loading, None);
    assert!(!app.take_bell());
  }

  #[test]
  fn stale_results_are_discarded() {
    let mut app = app_with(FakePipeline::with_frames(100));
    app.next_seq = 3;
    app.apply_frame(ok_frame(3, 30));
    app.apply_frame(ok_frame(1, 10));
    app.apply_frame(ok_frame(2, 20));
    assert_eq!(app.displayed.as_ref().map(|f| (f.seq, f.number)), Some((3, 30)));
    assert_eq!(app.loading, None);
  }

  #[test]
  fn stale_failures_are_discarded() {
    let mut app = app_with(FakePipeline::with_frames(100));
    app.next_seq = 2;
    app.apply_frame(ok_frame(2, 20));
    app.apply_frame(FrameResult {
      seq: 1,
      number: 10,
      result: Err(TrimError::FrameExtraction { index: 9, detail: "boom".into() }),
    });
    assert_eq!(app.mode, InputMode::Normal);
  }

  #[tokio::test]
  async fn extraction_failure_is_non_fatal_and_keeps_previous_frame() {
    let mut app = app_with(FakePipeline::with_frames(100));
    app.request_frame();
    app.settle_frame().await;
    // Past the last frame the probe reported: the selection allows it, decoding does not.
    app.selection = Selection::new();
    app.step(199);
    app.settle_frame().await;
    assert!(matches!(&app.mode, InputMode::Error { fatal: false, message } if message.starts_with("Error getting frame 199")));
    assert_eq!(app.selection.current_frame(), 200);
    assert_eq!(app.displayed.as_ref().map(|f| f.number), Some(1));

    app.dismiss_error();
    assert_eq!(app.mode, InputMode::Normal);
    assert_eq!(app.outcome, None);
    assert_eq!(app.displayed.as_ref().map(|f| f.number), Some(1));
  }

  #[tokio::test]
  async fn export_without_both_points_is_rejected() {
    let mut app = app_with(FakePipeline::with_frames(100));
    app.selection.set_in();
    app.begin_export();
    assert_eq!(
      app.mode,
      InputMode::Error { message: "In and out points must both be set.".into(), fatal: false }
    );
    app.dismiss_error();
    assert_eq!(app.mode, InputMode::Normal);
    assert_eq!(app.selection.in_point(), Some(1));
  }

  #[tokio::test]
  async fn export_with_equal_points_is_rejected() {
    let mut app = app_with(FakePipeline::with_frames(100));
    app.step(4);
    app.selection.set_in();
    app.selection.set_out();
    app.begin_export();
    assert_eq!(
      app.mode,
      InputMode::Error { message: "In and out points cannot be the same.".into(), fatal: false }
    );
    assert_eq!((app.selection.in_point(), app.selection.out_point()), (Some(5), Some(5)));
  }

  #[tokio::test]
  async fn prompt_defaults_to_trimmed_name() {
    let mut app = app_with(FakePipeline::with_frames(100));
    app.selection.set_in();
    app.step(20);
    app.selection.set_out();
    app.begin_export();
    let InputMode::Prompt(prompt) = &app.mode else { panic!("expected prompt, got {:?}", app.mode) };
    assert_eq!(prompt.input, "/clips/cat-trimmed.mp4");
    assert_eq!(prompt.cursor, prompt.input.chars().count());
  }

  #[tokio::test]
  async fn blank_filename_is_rejected() {
    let mut app = app_with(FakePipeline::with_frames(100));
    app.request_frame();
    app.settle_frame().await;
    app.selection.set_in();
    app.selection.jump_to(30);
    app.selection.set_out();
    app.mode = InputMode::Prompt(Prompt::new("   ".into()));
    app.submit_prompt();
    assert_eq!(app.mode, InputMode::Error { message: "Filename cannot be blank.".into(), fatal: false });
    app.dismiss_error();
    assert_eq!(app.mode, InputMode::Normal);
    assert_eq!(app.selection.current_frame(), 30);
    assert_eq!(app.displayed.as_ref().map(|f| f.number), Some(1));
  }

  #[tokio::test]
  async fn cancel_prompt_returns_to_normal() {
    let mut app = app_with(FakePipeline::with_frames(100));
    app.mode = InputMode::Prompt(Prompt::new("out.mp4".into()));
    app.cancel_prompt();
    assert_eq!(app.mode, InputMode::Normal);
  }

  #[tokio::test]
  async fn successful_export_ends_session() {
    let pipeline = FakePipeline::with_frames(100);
    let exports = pipeline.exports.clone();
    let mut app = app_with(pipeline);
    app.selection.jump_to(50);
    app.selection.set_in();
    app.selection.jump_to(10);
    app.selection.set_out();
    app.mode = InputMode::Prompt(Prompt::new("/tmp/out.mp4".into()));
    app.submit_prompt();
    assert!(matches!(app.mode, InputMode::Exporting { total: 41, .. }));

    app.settle_export().await;
    assert_eq!(app.outcome, Some(Outcome::Saved(PathBuf::from("/tmp/out.mp4"))));
    let exports = exports.lock().unwrap();
    assert_eq!(exports.as_slice(), &[(9, 49, PathBuf::from("/tmp/out.mp4"))]);
  }

  #[tokio::test]
  async fn failed_export_is_fatal() {
    let pipeline = FakePipeline { fail_export: true, ..FakePipeline::with_frames(100) };
    let mut app = app_with(pipeline);
    app.selection.set_in();
    app.selection.jump_to(2);
    app.selection.set_out();
    app.mode = InputMode::Prompt(Prompt::new("out.mp4".into()));
    app.submit_prompt();
    app.settle_export().await;
    assert_eq!(
      app.mode,
      InputMode::Error { message: "Error trimming video: encoder exploded".into(), fatal: true }
    );
    assert_eq!(app.outcome, None);
    app.dismiss_error();
    assert_eq!(app.outcome, Some(Outcome::Fatal("Error trimming video: encoder exploded".into())));
  }

  // --- graphics protocol output ---

  fn shown_app(mode: DisplayMode) -> (App<FakePipeline>, Rect) {
    let mut app = app_with(FakePipeline::with_frames(100));
    app.display_mode = mode;
    app.next_seq = 1;
    app.apply_frame(ok_frame(1, 1));
    let area = Rect::new(1, 2, 40, 20);
    app.gfx.frame_area = Some(area);
    (app, area)
  }

  #[test]
  fn frame_is_sent_once_per_seq_and_area() {
    let (mut app, area) = shown_app(DisplayMode::Kitty);
    assert_eq!(app.next_graphics_step(), GraphicsStep::Send(area));
    assert_eq!(app.gfx.last_sent, Some((1, area)));
    assert_eq!(app.next_graphics_step(), GraphicsStep::Idle);

    app.next_seq = 2;
    app.apply_frame(ok_frame(2, 5));
    assert_eq!(app.next_graphics_step(), GraphicsStep::Send(area));

    let wider = Rect::new(1, 2, 60, 20);
    app.gfx.frame_area = Some(wider);
    assert_eq!(app.next_graphics_step(), GraphicsStep::Send(wider));
  }

  #[test]
  fn cell_modes_never_write_escapes() {
    let (mut app, _) = shown_app(DisplayMode::Direct);
    assert_eq!(app.next_graphics_step(), GraphicsStep::Idle);
    assert_eq!(app.gfx.last_sent, None);
  }

  #[test]
  fn resize_forgets_sent_frame_and_clears_screen() {
    let (mut app, area) = shown_app(DisplayMode::Sixel);
    assert_eq!(app.next_graphics_step(), GraphicsStep::Send(area));
    app.gfx.cells = Some((1, area, DynamicImage::new_rgb8(2, 2)));

    app.on_resize();
    assert!(app.gfx.needs_clear);
    assert_eq!(app.gfx.last_sent, None);
    assert!(app.gfx.cells.is_none());
    // Same seq and area as before, but the resize forces a fresh payload.
    assert_eq!(app.next_graphics_step(), GraphicsStep::Send(area));
  }

  #[test]
  fn hiding_frame_clears_sixel_and_iterm() {
    for mode in [DisplayMode::Sixel, DisplayMode::Iterm] {
      let (mut app, area) = shown_app(mode);
      assert_eq!(app.next_graphics_step(), GraphicsStep::Send(area));
      app.gfx.frame_area = None;
      assert_eq!(app.next_graphics_step(), GraphicsStep::Idle);
      assert!(app.gfx.needs_clear, "{:?}", mode);
      assert_eq!(app.gfx.last_sent, None);
    }
  }

  #[test]
  fn hiding_frame_deletes_kitty_image() {
    let (mut app, area) = shown_app(DisplayMode::Kitty);
    assert_eq!(app.next_graphics_step(), GraphicsStep::Send(area));
    app.gfx.frame_area = None;
    assert_eq!(app.next_graphics_step(), GraphicsStep::DeleteKitty);
    assert!(!app.gfx.needs_clear);
    assert_eq!(app.next_graphics_step(), GraphicsStep::Idle);
  }

  #[test]
  fn dismissed_error_resends_held_frame() {
    let (mut app, area) = shown_app(DisplayMode::Sixel);
    assert_eq!(app.next_graphics_step(), GraphicsStep::Send(area));

    app.show_error(ValidationError::MissingPoints.into());
    // The dialog hides the frame for this draw.
    app.gfx.frame_area = None;
    assert_eq!(app.next_graphics_step(), GraphicsStep::Idle);
    assert!(app.gfx.needs_clear);

    app.dismiss_error();
    assert_eq!(app.mode, InputMode::Normal);
    app.gfx.frame_area = Some(area);
    assert_eq!(app.next_graphics_step(), GraphicsStep::Send(area));
    assert_eq!(app.displayed.as_ref().map(|f| f.number), Some(1));
  }

  #[test]
  fn frame_count_comes_from_probe() {
    let app = app_with(FakePipeline::with_frames(240));
    assert_eq!(app.selection.frame_count(), Some(240));
  }
}
