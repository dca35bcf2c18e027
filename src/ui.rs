use ratatui::{
  Frame,
  layout::{Alignment, Constraint, Layout, Rect},
  style::{Color, Modifier, Style},
  text::{Line, Span},
  widgets::{Block, BorderType, Clear, Padding, Paragraph, Wrap},
};

use crate::app::{App, InputMode, Prompt};
use crate::constants::constants;
use crate::graphics::{self, FramePayload, FrameWidget};
use crate::media::MediaPipeline;

struct Palette {
  bg: Color,
  fg: Color,
  accent: Color,
  muted: Color,
  border: Color,
  status: Color,
  error: Color,
  key_fg: Color,
  key_bg: Color,
  marker: Color,
}

const PALETTE: Palette = Palette {
  bg: Color::Reset,
  fg: Color::White,
  accent: Color::Cyan,
  muted: Color::DarkGray,
  border: Color::Gray,
  status: Color::Yellow,
  error: Color::LightRed,
  key_fg: Color::Black,
  key_bg: Color::Gray,
  marker: Color::LightGreen,
};

// --- Helpers ---

/// Compute the display width of the first `n` chars (accounting for double-width CJK).
pub fn display_width(s: &str, n: usize) -> usize {
  use unicode_width::UnicodeWidthChar;
  s.chars().take(n).map(|c| c.width().unwrap_or(0)).sum()
}

/// Truncate a string to `max_width` characters, appending "…" if truncated.
fn truncate_str(s: &str, max_width: usize) -> String {
  if s.chars().count() <= max_width {
    s.to_string()
  } else {
    let truncated: String = s.chars().take(max_width.saturating_sub(1)).collect();
    format!("{}…", truncated)
  }
}

/// A `width` x `height` box centred in `area`, shrunk to fit.
fn centered(width: u16, height: u16, area: Rect) -> Rect {
  let width = width.min(area.width);
  let height = height.min(area.height);
  Rect {
    x: area.x + (area.width - width) / 2,
    y: area.y + (area.height - height) / 2,
    width,
    height,
  }
}

fn point_label(point: Option<u32>) -> String {
  point.map_or_else(|| "(none set)".to_string(), |p| p.to_string())
}

// --- UI Rendering ---

pub fn ui<P: MediaPipeline>(frame: &mut Frame, app: &mut App<P>) {
  frame.render_widget(Block::default().style(Style::default().bg(PALETTE.bg)), frame.area());

  let [header_area, main_area, status_area, footer_area] =
    Layout::vertical([Constraint::Length(1), Constraint::Min(3), Constraint::Length(1), Constraint::Length(1)])
      .areas(frame.area());

  render_header(frame, app, header_area);
  render_main(frame, app, main_area);
  render_status(frame, app, status_area);
  render_footer(frame, app, footer_area);

  match &mut app.mode {
    InputMode::Prompt(prompt) => render_prompt(frame, prompt, main_area),
    InputMode::Error { message, fatal } => render_error(frame, message, *fatal, main_area),
    InputMode::Normal | InputMode::Exporting { .. } => {}
  }
}

fn render_header<P: MediaPipeline>(frame: &mut Frame, app: &App<P>, area: Rect) {
  let name = app.path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
  let version = format!("v{} ", env!("CARGO_PKG_VERSION"));
  let name_w = (area.width as usize).saturating_sub(version.len() + 10);
  let left = Line::from(vec![
    Span::styled(" ✂ itrim ", Style::default().fg(PALETTE.accent).add_modifier(Modifier::BOLD)),
    Span::styled(truncate_str(&name, name_w), Style::default().fg(PALETTE.fg)),
  ]);
  frame.render_widget(left, area);

  let right = Line::from(Span::styled(&version, Style::default().fg(PALETTE.muted)));
  let right_area =
    Rect { x: area.x + area.width.saturating_sub(version.len() as u16), width: version.len() as u16, ..area };
  frame.render_widget(right, right_area);
}

fn render_main<P: MediaPipeline>(frame: &mut Frame, app: &mut App<P>, area: Rect) {
  let [frame_area, info_area] =
    Layout::horizontal([Constraint::Percentage(70), Constraint::Percentage(30)]).areas(area);

  let block = Block::bordered()
    .border_type(BorderType::Rounded)
    .border_style(Style::default().fg(PALETTE.border))
    .title(Span::styled(
      format!(" Frame {} ", app.displayed.as_ref().map_or(0, |f| f.number)),
      Style::default().fg(PALETTE.accent).add_modifier(Modifier::BOLD),
    ));
  let inner = block.inner(frame_area);
  frame.render_widget(block, frame_area);
  render_frame(frame, app, inner);
  render_info(frame, app, info_area);
}

fn render_frame<P: MediaPipeline>(frame: &mut Frame, app: &mut App<P>, area: Rect) {
  app.gfx.frame_area = None;
  let Some(shown) = &app.displayed else {
    let text = Paragraph::new("Loading…").alignment(Alignment::Center).style(Style::default().fg(PALETTE.muted));
    frame.render_widget(text, centered(area.width, 1, area));
    return;
  };

  if app.display_mode.uses_graphics_protocol() {
    // Escape payloads would cover the dialog, so hide the frame while one is open.
    if matches!(app.mode, InputMode::Normal | InputMode::Exporting { .. }) {
      app.gfx.frame_area = Some(area);
    }
    return;
  }

  let fresh = matches!(&app.gfx.cells, Some((seq, cached, _)) if *seq == shown.seq && *cached == area);
  if !fresh && let Ok(FramePayload::Cells(img)) = graphics::render(&shown.image, area, app.display_mode, false) {
    app.gfx.cells = Some((shown.seq, area, img));
  }
  if let Some((_, _, img)) = &app.gfx.cells {
    frame.render_widget(FrameWidget { image: img, display_mode: app.display_mode }, area);
  }
}

fn render_info<P: MediaPipeline>(frame: &mut Frame, app: &App<P>, area: Rect) {
  let label = Style::default().fg(PALETTE.muted);
  let value = Style::default().fg(PALETTE.fg);
  let marker = Style::default().fg(PALETTE.marker).add_modifier(Modifier::BOLD);
  let sel = &app.selection;
  let current = sel.current_frame();

  let position = match sel.frame_count() {
    Some(total) => format!("{} / {}", current, total),
    None => current.to_string(),
  };
  let mut frame_spans = vec![Span::styled("Frame   ", label), Span::styled(position, value)];
  if sel.in_point() == Some(current) {
    frame_spans.push(Span::styled("  [in]", marker));
  }
  if sel.out_point() == Some(current) {
    frame_spans.push(Span::styled("  [out]", marker));
  }

  let mut lines = vec![
    Line::from(""),
    Line::from(frame_spans),
    Line::from(vec![Span::styled("In      ", label), Span::styled(point_label(sel.in_point()), value)]),
    Line::from(vec![Span::styled("Out     ", label), Span::styled(point_label(sel.out_point()), value)]),
  ];
  if let Some(len) = sel.selected_len() {
    lines.push(Line::from(vec![Span::styled("Length  ", label), Span::styled(format!("{} frames", len), value)]));
  }
  lines.push(Line::from(""));
  if let Some(tc) = app.info.timecode(current) {
    lines.push(Line::from(vec![Span::styled("Time    ", label), Span::styled(tc, value)]));
  }
  if let Some(total) = app.info.duration_label() {
    lines.push(Line::from(vec![Span::styled("Total   ", label), Span::styled(total, value)]));
  }
  if let (Some(w), Some(h)) = (app.info.width, app.info.height) {
    lines.push(Line::from(vec![Span::styled("Size    ", label), Span::styled(format!("{}x{}", w, h), value)]));
  }
  if let Some(fps) = app.info.frame_rate {
    lines.push(Line::from(vec![Span::styled("Rate    ", label), Span::styled(format!("{:.3} fps", fps), value)]));
  }
  if app.info.has_audio {
    lines.push(Line::from(Span::styled("Audio is dropped on export", label)));
  }
  lines.push(Line::from(""));

  let c = constants();
  let legend = [
    ("[ ]", format!("-/+ {} frame", c.small_step)),
    ("← →", format!("-/+ {} frames", c.medium_step)),
    ("j l", format!("-/+ {} frames", c.large_step)),
    ("i o", "set in / out".to_string()),
    ("I O", "go to in / out".to_string()),
    ("x", "clear points".to_string()),
    ("Enter", "save trimmed".to_string()),
    ("q", "quit".to_string()),
  ];
  for (key, action) in legend {
    lines.push(Line::from(vec![
      Span::styled(format!("{:<6}", key), Style::default().fg(PALETTE.accent)),
      Span::styled(action, label),
    ]));
  }

  let title = Line::from(vec![
    Span::styled(" Trim ", Style::default().fg(PALETTE.accent).add_modifier(Modifier::BOLD)),
    Span::styled(format!("[{}] ", app.display_mode.label().to_lowercase()), label),
  ]);
  let block = Block::bordered()
    .title(title)
    .border_type(BorderType::Rounded)
    .border_style(Style::default().fg(PALETTE.border))
    .padding(Padding::horizontal(1));
  frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_status<P: MediaPipeline>(frame: &mut Frame, app: &App<P>, area: Rect) {
  let (text, style) = match &app.mode {
    InputMode::Exporting { dest, written, total } => {
      let pct = (*written as u64 * 100).checked_div(*total as u64).unwrap_or(0).min(100);
      (
        format!(" ⏳ Saving {} … {}/{} frames ({}%)", dest.display(), written.min(total), total, pct),
        Style::default().fg(PALETTE.status),
      )
    }
    InputMode::Error { message, .. } => (format!(" ⚠  {}", message), Style::default().fg(PALETTE.error)),
    _ => match app.loading {
      Some(n) => (format!(" ⏳ Loading frame {}…", n), Style::default().fg(PALETTE.status)),
      None => (" Ready".to_string(), Style::default().fg(PALETTE.muted)),
    },
  };
  frame.render_widget(Paragraph::new(text).style(style), area);
}

fn render_footer<P: MediaPipeline>(frame: &mut Frame, app: &App<P>, area: Rect) {
  let keys: Vec<(&str, &str)> = match &app.mode {
    InputMode::Normal => {
      let mut k = vec![("←/→", "Step"), ("i/o", "Mark")];
      if app.selection.can_export() {
        k.push(("Enter", "Save"));
      }
      k.push(("q", "Quit"));
      k
    }
    InputMode::Prompt(_) => vec![("Enter", "Save"), ("Esc", "Cancel")],
    InputMode::Error { fatal: true, .. } => vec![("Enter", "Exit")],
    InputMode::Error { fatal: false, .. } => vec![("Enter", "Dismiss")],
    InputMode::Exporting { .. } => vec![("q", "Abort")],
  };

  let spans: Vec<Span> = keys
    .iter()
    .enumerate()
    .flat_map(|(i, (key, action))| {
      let mut s = vec![
        Span::styled(format!(" {} ", key), Style::default().fg(PALETTE.key_fg).bg(PALETTE.key_bg)),
        Span::styled(format!(" {} ", action), Style::default().fg(PALETTE.muted)),
      ];
      if i < keys.len() - 1 {
        s.push(Span::raw("  "));
      }
      s
    })
    .collect();
  frame.render_widget(Line::from(spans), area);
}

fn render_prompt(frame: &mut Frame, prompt: &mut Prompt, area: Rect) {
  let popup = centered(area.width.saturating_sub(8).min(72), 6, area);
  frame.render_widget(Clear, popup);
  let block = Block::bordered()
    .title(" Save trimmed video ")
    .title_style(Style::default().fg(PALETTE.accent).add_modifier(Modifier::BOLD))
    .border_type(BorderType::Rounded)
    .border_style(Style::default().fg(PALETTE.accent))
    .padding(Padding::horizontal(1));
  let inner = block.inner(popup);
  frame.render_widget(block, popup);

  let [question_area, _, input_area] =
    Layout::vertical([Constraint::Length(1), Constraint::Length(1), Constraint::Length(1)]).areas(inner);
  frame.render_widget(
    Paragraph::new("What should the trimmed file be saved as?").style(Style::default().fg(PALETTE.fg)),
    question_area,
  );

  let inner_w = (input_area.width as usize).max(1);
  let cursor_col = display_width(&prompt.input, prompt.cursor);
  if cursor_col < prompt.scroll {
    prompt.scroll = cursor_col;
  } else if cursor_col >= prompt.scroll + inner_w {
    prompt.scroll = cursor_col.saturating_sub(inner_w) + 1;
  }

  let visible: String = prompt
    .input
    .chars()
    .scan(0usize, |col, c| {
      let w = unicode_width::UnicodeWidthChar::width(c).unwrap_or(0);
      let start = *col;
      *col += w;
      Some((start, *col, c))
    })
    .skip_while(|(_, end, _)| *end <= prompt.scroll)
    .take_while(|(start, _, _)| *start < prompt.scroll + inner_w)
    .map(|(_, _, c)| c)
    .collect();
  frame.render_widget(
    Paragraph::new(visible).style(Style::default().fg(PALETTE.fg).add_modifier(Modifier::UNDERLINED)),
    input_area,
  );
  frame.set_cursor_position((input_area.x + (cursor_col - prompt.scroll) as u16, input_area.y));
}

fn render_error(frame: &mut Frame, message: &str, fatal: bool, area: Rect) {
  let width = area.width.saturating_sub(8).min(64);
  let text_w = width.saturating_sub(4).max(1) as usize;
  let rows = message.chars().count().div_ceil(text_w).max(1) as u16;
  let popup = centered(width, rows + 4, area);
  frame.render_widget(Clear, popup);

  let hint = if fatal { "Press Enter to exit" } else { "Press Enter to continue" };
  let lines = vec![
    Line::from(Span::styled(message.to_string(), Style::default().fg(PALETTE.fg))),
    Line::from(""),
    Line::from(Span::styled(hint, Style::default().fg(PALETTE.muted))),
  ];
  let block = Block::bordered()
    .title(" Error ")
    .title_style(Style::default().fg(PALETTE.error).add_modifier(Modifier::BOLD))
    .border_type(BorderType::Rounded)
    .border_style(Style::default().fg(PALETTE.error))
    .padding(Padding::horizontal(1));
  frame.render_widget(Paragraph::new(lines).wrap(Wrap { trim: true }).block(block), popup);
}
