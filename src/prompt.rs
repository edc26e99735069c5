use std::io::{self, BufRead, Write};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};

use crate::domain::{Archive, Credentials};
use crate::error::SkyError;

/// Prints `label` on stderr and reads one trimmed line from stdin.
pub fn prompt_line(label: &str) -> Result<String, SkyError> {
    let mut stderr = io::stderr();
    write!(stderr, "{label}").map_err(prompt_error)?;
    stderr.flush().map_err(prompt_error)?;

    let mut line = String::new();
    let read = io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(prompt_error)?;
    if read == 0 {
        return Err(SkyError::Prompt("end of input".to_string()));
    }
    Ok(line.trim().to_string())
}

/// Reads a password without echoing it.
pub fn prompt_password(label: &str) -> Result<String, SkyError> {
    let mut stderr = io::stderr();
    write!(stderr, "{label}").map_err(prompt_error)?;
    stderr.flush().map_err(prompt_error)?;

    enable_raw_mode().map_err(prompt_error)?;
    let result = read_hidden();
    disable_raw_mode().map_err(prompt_error)?;
    writeln!(stderr).map_err(prompt_error)?;
    result
}

fn read_hidden() -> Result<String, SkyError> {
    let mut buffer = String::new();
    loop {
        if let Event::Key(key) = event::read().map_err(prompt_error)? {
            match apply_key(&mut buffer, key) {
                KeyAction::Continue => {}
                KeyAction::Submit => return Ok(buffer),
                KeyAction::Abort => return Err(SkyError::Prompt("aborted".to_string())),
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum KeyAction {
    Continue,
    Submit,
    Abort,
}

fn apply_key(buffer: &mut String, key: KeyEvent) -> KeyAction {
    if key.kind == KeyEventKind::Release {
        return KeyAction::Continue;
    }
    match key.code {
        KeyCode::Enter => KeyAction::Submit,
        KeyCode::Esc => KeyAction::Abort,
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => KeyAction::Abort,
        KeyCode::Backspace => {
            buffer.pop();
            KeyAction::Continue
        }
        KeyCode::Char(ch) => {
            buffer.push(ch);
            KeyAction::Continue
        }
        _ => KeyAction::Continue,
    }
}

/// Asks for an archive account. An empty user name skips the archive.
pub fn prompt_credentials(archive: Archive) -> Result<Option<Credentials>, SkyError> {
    let username = prompt_line(&format!("{} user name (empty to skip): ", archive.label()))?;
    if username.is_empty() {
        return Ok(None);
    }
    let password = prompt_password(&format!("{} password: ", archive.label()))?;
    Ok(Some(Credentials::new(username, password)))
}

fn prompt_error(err: io::Error) -> SkyError {
    SkyError::Prompt(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn hidden_input_supports_backspace() {
        let mut buffer = String::new();
        for code in [
            KeyCode::Char('s'),
            KeyCode::Char('x'),
            KeyCode::Backspace,
            KeyCode::Char('k'),
        ] {
            assert_eq!(apply_key(&mut buffer, press(code)), KeyAction::Continue);
        }
        assert_eq!(apply_key(&mut buffer, press(KeyCode::Enter)), KeyAction::Submit);
        assert_eq!(buffer, "sk");
    }

    #[test]
    fn ctrl_c_aborts() {
        let mut buffer = String::new();
        let key = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(apply_key(&mut buffer, key), KeyAction::Abort);
        assert!(buffer.is_empty());
    }
}
