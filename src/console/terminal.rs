//! The process's controlling terminal.
//!
//! Hidden input uses crossterm's raw mode: echo and line editing are off, so
//! key events are assembled into a line here. Visible replies are read from
//! stdin in ordinary canonical mode.

use std::io::{self, BufRead, Read, Write};

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use zeroize::Zeroize;

use super::{CaptureError, Console, EchoState};

#[derive(Debug, Default)]
pub struct TerminalConsole;

impl TerminalConsole {
    pub fn new() -> Self {
        Self
    }
}

impl Console for TerminalConsole {
    fn echo_state(&mut self) -> Result<EchoState, CaptureError> {
        let raw = terminal::is_raw_mode_enabled().map_err(|e| CaptureError::terminal("get", e))?;
        Ok(if raw {
            EchoState::Hidden
        } else {
            EchoState::Visible
        })
    }

    fn set_echo_state(&mut self, state: EchoState) -> Result<(), CaptureError> {
        let result = match state {
            EchoState::Hidden => terminal::enable_raw_mode(),
            EchoState::Visible => terminal::disable_raw_mode(),
        };
        result.map_err(|e| CaptureError::terminal("set", e))
    }

    fn write_prompt(&mut self, prompt: &str) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        stdout.write_all(prompt.as_bytes())?;
        stdout.flush()
    }

    fn read_secret(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        let mut len = 0;
        loop {
            let Event::Key(key) = event::read()? else {
                continue;
            };
            if key.kind != KeyEventKind::Press {
                continue;
            }
            match key.code {
                KeyCode::Enter => {
                    // Raw mode does not translate the newline.
                    self.write_prompt("\r\n")?;
                    return Ok(Some(len));
                }
                KeyCode::Char('c' | 'd') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    self.write_prompt("\r\n")?;
                    return Ok(None);
                }
                KeyCode::Backspace => len = erase_last_char(buf, len),
                KeyCode::Char(c) => len = push_char(buf, len, c),
                _ => {}
            }
        }
    }

    fn read_line(&mut self, limit: usize) -> io::Result<Option<Vec<u8>>> {
        let mut line = Vec::with_capacity(limit);
        let read = io::stdin()
            .lock()
            .take(limit as u64)
            .read_until(b'\n', &mut line)?;
        Ok((read > 0).then_some(line))
    }
}

/// Append `c` if all of its UTF-8 bytes fit; past the end input is dropped.
fn push_char(buf: &mut [u8], len: usize, c: char) -> usize {
    let mut utf8 = [0u8; 4];
    let bytes = c.encode_utf8(&mut utf8).as_bytes();
    let end = len + bytes.len();
    let fits = end <= buf.len();
    if fits {
        buf[len..end].copy_from_slice(bytes);
    }
    utf8.zeroize();
    if fits {
        end
    } else {
        len
    }
}

/// Remove the last whole character, zeroing its bytes.
fn erase_last_char(buf: &mut [u8], len: usize) -> usize {
    let mut start = len;
    while start > 0 {
        start -= 1;
        // UTF-8 continuation bytes are 0b10xx_xxxx.
        if buf[start] & 0xC0 != 0x80 {
            break;
        }
    }
    buf[start..len].zeroize();
    start
}
