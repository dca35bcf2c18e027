use clap::ValueEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliDisplayMode {
  Auto,
  Kitty,
  Sixel,
  Iterm,
  Direct,
  Ascii,
}

impl CliDisplayMode {
  /// Parse the `display_mode` preference; unknown names mean auto-detect.
  pub fn from_config(s: &str) -> Self {
    <CliDisplayMode as ValueEnum>::from_str(s, true).unwrap_or(CliDisplayMode::Auto)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
  Ascii,
  Direct,
  Sixel,
  Iterm,
  Kitty,
}

impl DisplayMode {
  pub fn label(self) -> &'static str {
    match self {
      DisplayMode::Ascii => "ASCII",
      DisplayMode::Direct => "Half-block",
      DisplayMode::Sixel => "Sixel",
      DisplayMode::Iterm => "iTerm2",
      DisplayMode::Kitty => "Kitty",
    }
  }

  /// Modes that bypass the cell buffer and write an escape payload straight to the terminal.
  pub fn uses_graphics_protocol(self) -> bool {
    matches!(self, DisplayMode::Kitty | DisplayMode::Sixel | DisplayMode::Iterm)
  }
}

/// Detect the best display mode the terminal supports.
///
/// Probe order: Kitty graphics > iTerm2 inline images > Sixel > true-color half-block > ASCII
///
/// - Kitty: `TERM=xterm-kitty`, or `TERM_PROGRAM` is kitty/WezTerm/ghostty
/// - iTerm2: `TERM_PROGRAM=iTerm.app`, or `LC_TERMINAL=iTerm2` (survives tmux)
/// - Sixel: `TERM_PROGRAM` is foot/mlterm, or `TERM` contains "sixel"
/// - Direct: `COLORTERM` is `truecolor` or `24bit`
/// - Ascii: fallback
pub fn detect_display_mode() -> DisplayMode {
  let term = std::env::var("TERM").unwrap_or_default();
  let term_program = std::env::var("TERM_PROGRAM").unwrap_or_default().to_lowercase();
  let lc_terminal = std::env::var("LC_TERMINAL").unwrap_or_default().to_lowercase();
  let colorterm = std::env::var("COLORTERM").unwrap_or_default().to_lowercase();
  classify(&term, &term_program, &lc_terminal, &colorterm)
}

fn classify(term: &str, term_program: &str, lc_terminal: &str, colorterm: &str) -> DisplayMode {
  if term == "xterm-kitty" || matches!(term_program, "kitty" | "wezterm" | "ghostty") {
    return DisplayMode::Kitty;
  }

  if term_program == "iterm.app" || lc_terminal == "iterm2" {
    return DisplayMode::Iterm;
  }

  if matches!(term_program, "foot" | "mlterm" | "contour") || term.contains("sixel") {
    return DisplayMode::Sixel;
  }

  if colorterm == "truecolor" || colorterm == "24bit" {
    return DisplayMode::Direct;
  }

  DisplayMode::Ascii
}

pub fn resolve_display_mode(cli: CliDisplayMode) -> DisplayMode {
  match cli {
    CliDisplayMode::Auto => detect_display_mode(),
    CliDisplayMode::Kitty => DisplayMode::Kitty,
    CliDisplayMode::Sixel => DisplayMode::Sixel,
    CliDisplayMode::Iterm => DisplayMode::Iterm,
    CliDisplayMode::Direct => DisplayMode::Direct,
    CliDisplayMode::Ascii => DisplayMode::Ascii,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn classify_kitty_family() {
    assert_eq!(classify("xterm-kitty", "", "", ""), DisplayMode::Kitty);
    assert_eq!(classify("xterm-256color", "wezterm", "", "truecolor"), DisplayMode::Kitty);
    assert_eq!(classify("xterm-ghostty", "ghostty", "", ""), DisplayMode::Kitty);
  }

  #[test]
  fn classify_iterm_inside_tmux() {
    assert_eq!(classify("screen-256color", "tmux", "iterm2", "truecolor"), DisplayMode::Iterm);
    assert_eq!(classify("xterm-256color", "iterm.app", "", ""), DisplayMode::Iterm);
  }

  #[test]
  fn classify_sixel_then_fallbacks() {
    assert_eq!(classify("foot", "foot", "", ""), DisplayMode::Sixel);
    assert_eq!(classify("xterm-sixel", "", "", ""), DisplayMode::Sixel);
    assert_eq!(classify("xterm-256color", "", "", "24bit"), DisplayMode::Direct);
    assert_eq!(classify("vt100", "", "", ""), DisplayMode::Ascii);
  }

  #[test]
  fn config_names_are_case_insensitive() {
    assert_eq!(CliDisplayMode::from_config("Sixel"), CliDisplayMode::Sixel);
    assert_eq!(CliDisplayMode::from_config("iterm"), CliDisplayMode::Iterm);
    assert_eq!(CliDisplayMode::from_config("hologram"), CliDisplayMode::Auto);
  }
}
