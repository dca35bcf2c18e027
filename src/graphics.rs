use anyhow::{Context, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use color_quant::NeuQuant;
use image::{DynamicImage, ImageFormat, RgbImage, imageops::FilterType};
use ratatui::{
  buffer::Buffer,
  layout::Rect,
  style::{Color, Style},
  widgets::Widget,
};
use std::fmt::Write as _;
use std::io::{Cursor, Write};

use crate::constants::constants;
use crate::display::DisplayMode;

/// A frame ready to put on screen.
pub enum FramePayload {
  /// Graphics-protocol escape data, written at `area` after the cell buffer is flushed.
  Escape { area: Rect, data: String },
  /// An image pre-sized for `FrameWidget`, drawn into the cell buffer.
  Cells(DynamicImage),
}

/// Convert a decoded frame into terminal output for the given viewport.
pub fn render(image: &DynamicImage, area: Rect, mode: DisplayMode, passthrough: bool) -> Result<FramePayload> {
  let (w, h) = (area.width.max(1) as u32, area.height.max(1) as u32);
  let escape = |data: String, placed: Rect| {
    let data = if passthrough { tmux_passthrough(&data) } else { data };
    FramePayload::Escape { area: placed, data }
  };
  match mode {
    DisplayMode::Direct => Ok(FramePayload::Cells(image.resize(w, h * 2, FilterType::Triangle))),
    DisplayMode::Ascii => {
      // One glyph per pixel: squash vertically to undo the tall cell shape.
      let fitted = image.resize(w, h * 2, FilterType::Triangle);
      let rows = (fitted.height() / 2).max(1);
      Ok(FramePayload::Cells(fitted.resize_exact(fitted.width(), rows, FilterType::Triangle)))
    }
    DisplayMode::Kitty => {
      let placed = fit_area(image.width(), image.height(), area);
      Ok(escape(kitty_encode(image, placed)?, placed))
    }
    DisplayMode::Iterm => {
      let placed = fit_area(image.width(), image.height(), area);
      Ok(escape(iterm_encode(image, placed)?, placed))
    }
    DisplayMode::Sixel => {
      let placed = fit_area(image.width(), image.height(), area);
      Ok(escape(sixel_encode(image, placed), placed))
    }
  }
}

/// Largest cell box inside `area` that keeps the image's aspect ratio, centred.
pub fn fit_area(img_w: u32, img_h: u32, area: Rect) -> Rect {
  if area.is_empty() || img_w == 0 || img_h == 0 {
    return Rect { width: 0, height: 0, ..area };
  }
  let c = constants();
  let (cell_w, cell_h) = (c.sixel_cell_width as f64, c.sixel_cell_height as f64);
  let scale = (area.width as f64 * cell_w / img_w as f64).min(area.height as f64 * cell_h / img_h as f64);
  let cols = ((img_w as f64 * scale / cell_w).round() as u16).clamp(1, area.width);
  let rows = ((img_h as f64 * scale / cell_h).round() as u16).clamp(1, area.height);
  Rect {
    x: area.x + (area.width - cols) / 2,
    y: area.y + (area.height - rows) / 2,
    width: cols,
    height: rows,
  }
}

/// Wrap a payload for tmux so it reaches the outer terminal.
///
/// Drops the first newline, doubles every ESC and encloses the result in a
/// `DCS tmux; ... ST` envelope.
pub fn tmux_passthrough(data: &str) -> String {
  let data = data.replacen('\n', "", 1);
  format!("\x1BPtmux;{}\x1B\\", data.replace('\x1B', "\x1B\x1B"))
}

/// Write an escape payload with the cursor parked at the top-left of `area`.
pub fn write_escape(area: Rect, data: &str) -> Result<()> {
  let mut stdout = std::io::stdout();
  write_escape_to(&mut stdout, area, data)?;
  stdout.flush().context("Failed to flush frame payload")?;
  Ok(())
}

fn write_escape_to(out: &mut impl Write, area: Rect, data: &str) -> Result<()> {
  write!(out, "\x1B[{};{}H{}", area.y.saturating_add(1), area.x.saturating_add(1), data)
    .context("Failed to write frame payload")
}

/// Sound the terminal bell.
pub fn beep() -> Result<()> {
  let mut stdout = std::io::stdout();
  stdout.write_all(b"\x07").context("Failed to write bell")?;
  stdout.flush().context("Failed to flush bell")?;
  Ok(())
}

// --- Frame Widget ---

pub struct FrameWidget<'a> {
  pub image: &'a DynamicImage,
  pub display_mode: DisplayMode,
}

const ASCII_CHARS: [&str; 10] = [" ", ".", ":", "-", "=", "+", "*", "#", "%", "@"];

impl Widget for FrameWidget<'_> {
  fn render(self, area: Rect, buf: &mut Buffer) {
    if area.is_empty() {
      return;
    }
    match self.display_mode {
      DisplayMode::Direct => render_direct(self.image, area, buf),
      DisplayMode::Ascii => render_ascii(self.image, area, buf),
      DisplayMode::Kitty | DisplayMode::Sixel | DisplayMode::Iterm => {}
    }
  }
}

fn cell_coord(base: u16, offset: u32, i: u32) -> u16 {
  base.saturating_add((offset + i).min(u16::MAX as u32) as u16)
}

fn render_direct(image: &DynamicImage, area: Rect, buf: &mut Buffer) {
  let rgb = image.to_rgb8();
  let img_w = rgb.width().min(area.width as u32);
  let img_h = rgb.height();
  let cell_h = img_h.div_ceil(2);
  let offset_x = (area.width as u32).saturating_sub(img_w) / 2;
  let offset_y = (area.height as u32).saturating_sub(cell_h) / 2;

  for y in 0..cell_h.min(area.height as u32) {
    for x in 0..img_w {
      let upper = rgb.get_pixel(x, y * 2);
      let lower_y = y * 2 + 1;
      let fg = Color::Rgb(upper[0], upper[1], upper[2]);
      let bg = if lower_y < img_h {
        let lower = rgb.get_pixel(x, lower_y);
        Color::Rgb(lower[0], lower[1], lower[2])
      } else {
        Color::Reset
      };
      buf.set_string(
        cell_coord(area.x, offset_x, x),
        cell_coord(area.y, offset_y, y),
        "▀",
        Style::default().fg(fg).bg(bg),
      );
    }
  }
}

fn render_ascii(image: &DynamicImage, area: Rect, buf: &mut Buffer) {
  let luma = image.to_luma8();
  let img_w = luma.width().min(area.width as u32);
  let img_h = luma.height().min(area.height as u32);
  let offset_x = (area.width as u32).saturating_sub(img_w) / 2;
  let offset_y = (area.height as u32).saturating_sub(img_h) / 2;

  for y in 0..img_h {
    for x in 0..img_w {
      let pixel = luma.get_pixel(x, y)[0];
      let idx = ((pixel as f32 / 255.0) * (ASCII_CHARS.len() - 1) as f32).round() as usize;
      let glyph = ASCII_CHARS[idx.min(ASCII_CHARS.len() - 1)];
      buf.set_string(cell_coord(area.x, offset_x, x), cell_coord(area.y, offset_y, y), glyph, Style::default());
    }
  }
}

fn png_bytes(image: &DynamicImage) -> Result<Vec<u8>> {
  let mut png_buf = Vec::new();
  image.write_to(&mut Cursor::new(&mut png_buf), ImageFormat::Png).context("Failed to encode frame as PNG")?;
  Ok(png_buf)
}

// --- Kitty Graphics Protocol ---
//
//   Transmit:  \x1B_G a=T,f=100,t=d,i=1,p=1,c=<cols>,r=<rows>,q=2,m=1;<base64 chunk>\x1B\\
//   Continue:  \x1B_G m=1;<base64 chunk>\x1B\\
//   Last:      \x1B_G m=0;<base64 chunk>\x1B\\
//   Delete all:       \x1B_G a=d,d=a,q=2\x1B\\
//
// A fixed image id and placement id make every new frame replace the last
// one in place. `c`/`r` scale the PNG over the fitted cell box.

fn kitty_encode(image: &DynamicImage, area: Rect) -> Result<String> {
  let b64 = BASE64.encode(png_bytes(image)?);
  let chunks: Vec<&[u8]> = b64.as_bytes().chunks(constants().kitty_chunk_size).collect();
  let last = chunks.len().saturating_sub(1);
  let mut out = String::with_capacity(b64.len() + chunks.len() * 16 + 64);

  for (i, chunk) in chunks.iter().enumerate() {
    let data = std::str::from_utf8(chunk).context("base64 chunk was not valid UTF-8")?;
    let more = if i < last { 1 } else { 0 };
    if i == 0 {
      let _ = write!(out, "\x1B_Ga=T,f=100,t=d,i=1,p=1,c={},r={},q=2,m={};{}\x1B\\", area.width, area.height, more, data);
    } else {
      let _ = write!(out, "\x1B_Gm={};{}\x1B\\", more, data);
    }
  }
  Ok(out)
}

/// Delete every Kitty image on screen (frame area hidden, or app exit).
pub fn kitty_delete_all(passthrough: bool) -> Result<()> {
  let seq = "\x1B_Ga=d,d=a,q=2\x1B\\";
  let seq = if passthrough { tmux_passthrough(seq) } else { seq.to_string() };
  let mut stdout = std::io::stdout();
  stdout.write_all(seq.as_bytes()).context("Failed to write kitty delete all")?;
  stdout.flush().context("Failed to flush kitty delete")?;
  Ok(())
}

// --- iTerm2 Inline Images ---
//
//   \x1B]1337;File=inline=1;size=<bytes>;width=<cols>;height=<rows>;preserveAspectRatio=1:<base64>\x07

fn iterm_encode(image: &DynamicImage, area: Rect) -> Result<String> {
  let png = png_bytes(image)?;
  Ok(format!(
    "\x1B]1337;File=inline=1;size={};width={};height={};preserveAspectRatio=1:{}\x07",
    png.len(),
    area.width,
    area.height,
    BASE64.encode(&png)
  ))
}

// --- Sixel Graphics Protocol ---
//
//   DCS q "1;1;<w>;<h> #<n>;2;<r%>;<g%>;<b%> ... <sixel rows> ST
//
// Each sixel character covers a 1x6 pixel column: 0x3F + a 6-bit mask of the
// rows drawn in the current colour. `$` rewinds to the start of the band,
// `-` moves to the next band, `!<n><c>` repeats a character n times.
// Colours are reduced to a 256-entry palette with NeuQuant.

const SIXEL_MAX_COLORS: usize = 256;

fn sixel_encode(image: &DynamicImage, area: Rect) -> String {
  let c = constants();
  let pixel_w = (area.width as u32 * c.sixel_cell_width).max(1);
  let pixel_h = (area.height as u32 * c.sixel_cell_height).max(1);
  let rgb = image.resize_exact(pixel_w, pixel_h, FilterType::Lanczos3).into_rgb8();
  encode_sixel_rgb(&rgb)
}

fn encode_sixel_rgb(rgb: &RgbImage) -> String {
  let (w, h) = (rgb.width() as usize, rgb.height() as usize);
  let rgba: Vec<u8> = rgb.pixels().flat_map(|p| [p[0], p[1], p[2], 255]).collect();
  let nq = NeuQuant::new(3, SIXEL_MAX_COLORS, &rgba);
  let color_map = nq.color_map_rgb();
  let palette: Vec<[u8; 3]> =
    color_map.chunks_exact(3).take(SIXEL_MAX_COLORS).map(|rgb| [rgb[0], rgb[1], rgb[2]]).collect();
  // NeuQuant was built for 256 colours, so every index fits in a u8.
  let indices: Vec<u8> = rgb.pixels().map(|p| nq.index_of(&[p[0], p[1], p[2], 255]).min(255) as u8).collect();

  let mut out = String::with_capacity(w * h / 2);
  let _ = write!(out, "\x1BPq\"1;1;{};{}", w, h);
  for (i, c) in palette.iter().enumerate() {
    let pct = |v: u8| v as u32 * 100 / 255;
    let _ = write!(out, "#{};2;{};{};{}", i, pct(c[0]), pct(c[1]), pct(c[2]));
  }

  let mut band = vec![0u8; w];
  for y_base in (0..h).step_by(6) {
    for color in 0..palette.len() {
      let mut used = false;
      for (x, cell) in band.iter_mut().enumerate() {
        *cell = 0;
        for bit in 0..6 {
          let y = y_base + bit;
          if y < h && indices[y * w + x] as usize == color {
            *cell |= 1 << bit;
            used = true;
          }
        }
      }
      if !used {
        continue;
      }
      let _ = write!(out, "#{}", color);
      push_sixel_run(&mut out, &band);
      out.push('$');
    }
    out.push('-');
  }

  out.push_str("\x1B\\");
  out
}

/// Append a band of sixel masks, run-length encoding repeats longer than three.
fn push_sixel_run(out: &mut String, band: &[u8]) {
  let mut i = 0;
  while i < band.len() {
    let val = band[i];
    let mut run = 1;
    while i + run < band.len() && band[i + run] == val {
      run += 1;
    }
    let ch = (val + 0x3F) as char;
    if run > 3 {
      let _ = write!(out, "!{}{}", run, ch);
    } else {
      out.extend(std::iter::repeat_n(ch, run));
    }
    i += run;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  fn solid(w: u32, h: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([200, 40, 40])))
  }

  #[test]
  fn passthrough_wraps_and_doubles_escapes() {
    let wrapped = tmux_passthrough("\x1B_Gm=0;AAAA\x1B\\\n");
    assert_eq!(wrapped, "\x1BPtmux;\x1B\x1B_Gm=0;AAAA\x1B\x1B\\\x1B\\");
  }

  #[test]
  fn passthrough_removes_only_first_newline() {
    assert_eq!(tmux_passthrough("a\nb\n"), "\x1BPtmux;ab\n\x1B\\");
  }

  #[test]
  fn fit_area_keeps_aspect_and_centres() {
    // 16:9 into 80x40 cells of 8x16 px: width-bound, 80 cols x 23 rows.
    let placed = fit_area(1920, 1080, Rect::new(0, 0, 80, 40));
    assert_eq!((placed.width, placed.height), (80, 23));
    assert_eq!(placed.y, (40 - 23) / 2);
    // Tall image into a wide area: height-bound, centred horizontally.
    let placed = fit_area(480, 960, Rect::new(10, 0, 100, 20));
    assert_eq!(placed.height, 20);
    assert!(placed.x > 10 && placed.width < 100);
  }

  #[test]
  fn fit_area_empty_inputs() {
    assert!(fit_area(0, 10, Rect::new(0, 0, 10, 10)).is_empty());
    assert!(fit_area(10, 10, Rect::new(3, 3, 0, 10)).is_empty());
  }

  #[test]
  fn kitty_payload_is_chunked() {
    let payload = render(&solid(64, 36), Rect::new(0, 0, 40, 20), DisplayMode::Kitty, false).unwrap();
    let FramePayload::Escape { data, .. } = payload else { panic!("kitty must produce escape data") };
    assert!(data.starts_with("\x1B_Ga=T,f=100"));
    assert!(data.contains("m=0;"));
    assert!(data.ends_with("\x1B\\"));
  }

  #[test]
  fn iterm_payload_under_tmux() {
    let payload = render(&solid(8, 8), Rect::new(0, 0, 10, 5), DisplayMode::Iterm, true).unwrap();
    let FramePayload::Escape { data, .. } = payload else { panic!("iterm must produce escape data") };
    assert!(data.starts_with("\x1BPtmux;\x1B\x1B]1337;File=inline=1;"));
    assert!(data.ends_with("\x07\x1B\\"));
  }

  #[test]
  fn sixel_payload_frames() {
    let data = encode_sixel_rgb(&RgbImage::from_pixel(64, 13, Rgb([0, 0, 0])));
    assert!(data.starts_with("\x1BPq\"1;1;64;13"));
    assert!(data.ends_with("-\x1B\\"));
    // Three bands of six rows.
    assert_eq!(data.matches('-').count(), 3);
  }

  #[test]
  fn sixel_run_length() {
    let mut out = String::new();
    push_sixel_run(&mut out, &[1, 1, 1, 1, 1, 0, 0]);
    assert_eq!(out, "!5@??");
  }

  #[test]
  fn cell_modes_fit_viewport() {
    let area = Rect::new(0, 0, 40, 10);
    let FramePayload::Cells(direct) = render(&solid(160, 90), area, DisplayMode::Direct, false).unwrap() else {
      panic!("direct renders into cells")
    };
    assert!(direct.width() <= 40 && direct.height() <= 20);
    let FramePayload::Cells(ascii) = render(&solid(160, 90), area, DisplayMode::Ascii, false).unwrap() else {
      panic!("ascii renders into cells")
    };
    assert!(ascii.width() <= 40 && ascii.height() <= 10);
  }

  #[test]
  fn frame_widget_draws_half_blocks() {
    let area = Rect::new(0, 0, 4, 2);
    let mut buf = Buffer::empty(area);
    FrameWidget { image: &solid(4, 4), display_mode: DisplayMode::Direct }.render(area, &mut buf);
    assert_eq!(buf[(0, 0)].symbol(), "▀");
    assert_eq!(buf[(3, 1)].symbol(), "▀");
  }

  #[test]
  fn escape_is_positioned_one_based() {
    let mut out = Vec::new();
    write_escape_to(&mut out, Rect::new(4, 2, 10, 10), "X").unwrap();
    assert_eq!(out, b"\x1B[3;5HX");
  }
}
