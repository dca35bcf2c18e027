use ratatui::crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::app::{App, InputMode, Prompt};
use crate::constants::constants;
use crate::media::MediaPipeline;

// --- Helpers ---

/// Convert a char index to a byte offset within the string.
pub fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
  s.char_indices().nth(char_idx).map_or(s.len(), |(i, _)| i)
}

// --- Event Handling ---

pub fn handle_key_event<P: MediaPipeline>(app: &mut App<P>, key: KeyEvent) {
  if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
    app.quit();
    return;
  }

  match app.mode {
    InputMode::Normal => handle_normal_key(app, key),
    InputMode::Prompt(_) => handle_prompt_key(app, key),
    InputMode::Error { .. } => handle_error_key(app, key),
    // Navigation is locked while ffmpeg runs; quitting drops the task and kills it.
    InputMode::Exporting { .. } => {
      if matches!(key.code, KeyCode::Char('q') | KeyCode::Esc) {
        app.quit();
      }
    }
  }
}

fn handle_normal_key<P: MediaPipeline>(app: &mut App<P>, key: KeyEvent) {
  let c = constants();
  match key.code {
    KeyCode::Char('[') => app.step(-c.small_step),
    KeyCode::Char(']') => app.step(c.small_step),
    KeyCode::Left => app.step(-c.medium_step),
    KeyCode::Right => app.step(c.medium_step),
    KeyCode::Char('j') => app.step(-c.large_step),
    KeyCode::Char('l') => app.step(c.large_step),
    KeyCode::Home => app.jump_to(1),
    KeyCode::End => app.jump_to_end(),
    KeyCode::Char('i') => app.selection.set_in(),
    KeyCode::Char('o') => app.selection.set_out(),
    KeyCode::Char('I') => app.jump_to_in(),
    KeyCode::Char('O') => app.jump_to_out(),
    KeyCode::Char('x') => app.selection.clear_points(),
    KeyCode::Enter => app.begin_export(),
    KeyCode::Char('q') | KeyCode::Esc => app.quit(),
    _ => {}
  }
}

fn handle_prompt_key<P: MediaPipeline>(app: &mut App<P>, key: KeyEvent) {
  match key.code {
    KeyCode::Enter => app.submit_prompt(),
    KeyCode::Esc => app.cancel_prompt(),
    _ => {
      if let InputMode::Prompt(prompt) = &mut app.mode {
        edit_prompt(prompt, key.code);
      }
    }
  }
}

fn edit_prompt(prompt: &mut Prompt, code: KeyCode) {
  match code {
    KeyCode::Char(c) => {
      let byte_idx = char_to_byte_index(&prompt.input, prompt.cursor);
      prompt.input.insert(byte_idx, c);
      prompt.cursor += 1;
    }
    KeyCode::Backspace => {
      if prompt.cursor > 0 {
        prompt.cursor -= 1;
        let byte_idx = char_to_byte_index(&prompt.input, prompt.cursor);
        prompt.input.remove(byte_idx);
      }
    }
    KeyCode::Delete => {
      if prompt.cursor < prompt.input.chars().count() {
        let byte_idx = char_to_byte_index(&prompt.input, prompt.cursor);
        prompt.input.remove(byte_idx);
      }
    }
    KeyCode::Left => {
      prompt.cursor = prompt.cursor.saturating_sub(1);
    }
    KeyCode::Right => {
      if prompt.cursor < prompt.input.chars().count() {
        prompt.cursor += 1;
      }
    }
    KeyCode::Home => {
      prompt.cursor = 0;
    }
    KeyCode::End => {
      prompt.cursor = prompt.input.chars().count();
    }
    _ => {}
  }
}

fn handle_error_key<P: MediaPipeline>(app: &mut App<P>, key: KeyEvent) {
  if matches!(key.code, KeyCode::Enter | KeyCode::Esc | KeyCode::Char(' ') | KeyCode::Char('q')) {
    app.dismiss_error();
  }
}
