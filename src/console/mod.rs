//! Operator interaction: hidden PIN capture and short replies.
//!
//! The controlling terminal is a single process-wide resource. Echo is only
//! ever suspended through an [`EchoGuard`], which restores the saved state
//! exactly once before the next capture can begin.

pub mod terminal;

use std::io;
use std::ops::{Deref, DerefMut};

use thiserror::Error;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::secret::{Encoding, EncodingError, Secret, SECRET_MAX_LEN};

pub use terminal::TerminalConsole;

/// Capture buffers hold the longest secret plus a terminator byte.
const CAPTURE_BUFFER_LEN: usize = SECRET_MAX_LEN + 1;

pub const CONFIRM_PROMPT: &str = "Confirm PIN: ";

/// Capture failures.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Terminal attributes could not be read or changed.
    #[error("cannot {action} terminal attributes: {source}")]
    Terminal {
        action: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("PINs didn't match")]
    SecretMismatch,

    #[error("no PIN was entered")]
    NoInput,

    #[error("failed to read from the terminal: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

impl CaptureError {
    pub fn terminal(action: &'static str, source: io::Error) -> Self {
        Self::Terminal { action, source }
    }
}

/// Whether typed characters are echoed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoState {
    Visible,
    Hidden,
}

/// Whether a capture must be entered twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Required,
    NotRequired,
}

/// The operator's terminal.
pub trait Console {
    /// Read the current echo setting.
    fn echo_state(&mut self) -> Result<EchoState, CaptureError>;

    /// Apply an echo setting.
    fn set_echo_state(&mut self, state: EchoState) -> Result<(), CaptureError>;

    fn write_prompt(&mut self, prompt: &str) -> io::Result<()>;

    /// Read one line of hidden input into `buf`.
    ///
    /// Bytes past the end of `buf` are consumed and discarded. Returns the
    /// number of bytes stored, or `None` once input has ended.
    fn read_secret(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>>;

    /// Read at most `limit` bytes, stopping after the first newline.
    ///
    /// Returns `None` when input has ended before any byte was read.
    fn read_line(&mut self, limit: usize) -> io::Result<Option<Vec<u8>>>;
}

/// Suspended echo on a console, restored on every exit path.
pub struct EchoGuard<'c, C: Console + ?Sized> {
    console: &'c mut C,
    saved: EchoState,
    restored: bool,
}

impl<'c, C: Console + ?Sized> EchoGuard<'c, C> {
    /// Save the current echo state and hide input.
    ///
    /// If hiding fails, the saved state is put back before returning.
    pub fn suspend(console: &'c mut C) -> Result<Self, CaptureError> {
        let saved = console.echo_state()?;
        if let Err(err) = console.set_echo_state(EchoState::Hidden) {
            let _ = console.set_echo_state(saved);
            return Err(err);
        }
        Ok(Self {
            console,
            saved,
            restored: false,
        })
    }

    /// Put the saved echo state back, reporting failure.
    pub fn restore(mut self) -> Result<(), CaptureError> {
        self.restored = true;
        self.console.set_echo_state(self.saved)
    }
}

impl<C: Console + ?Sized> Deref for EchoGuard<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.console
    }
}

impl<C: Console + ?Sized> DerefMut for EchoGuard<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        self.console
    }
}

impl<C: Console + ?Sized> Drop for EchoGuard<'_, C> {
    fn drop(&mut self) {
        if !self.restored {
            if let Err(err) = self.console.set_echo_state(self.saved) {
                warn!("Failed to restore terminal echo: {}", err);
            }
        }
    }
}

/// Prompt for a secret with echo suspended.
///
/// With [`Confirmation::Required`] the secret is read a second time and both
/// capture buffers are compared across their full width. The capture buffers
/// are zeroed on every return path.
pub fn capture_secret<C: Console + ?Sized>(
    console: &mut C,
    prompt: &str,
    confirmation: Confirmation,
    encoding: Encoding,
) -> Result<Secret, CaptureError> {
    let mut first = Zeroizing::new([0u8; CAPTURE_BUFFER_LEN]);
    let mut second = Zeroizing::new([0u8; CAPTURE_BUFFER_LEN]);

    console.write_prompt(prompt)?;
    let mut echo = EchoGuard::suspend(console)?;

    let len = read_hidden(&mut *echo, &mut first[..])?;

    if confirmation == Confirmation::Required {
        echo.write_prompt(CONFIRM_PROMPT)?;
        read_hidden(&mut *echo, &mut second[..])?;

        if !buffers_match(&first, &second) {
            warn!("Confirmation entry does not match the first entry");
            return Err(CaptureError::SecretMismatch);
        }
    }

    let secret = encoding.encode(&first[..len])?;
    echo.restore()?;
    debug!(len = secret.len(), "Captured secret");
    Ok(secret)
}

/// Prompt for a short visible reply such as a yes/no answer.
///
/// Returns `None` when input ended or when the line was longer than
/// `max_len` characters; a truncated reply is never acted on.
pub fn read_reply<C: Console + ?Sized>(
    console: &mut C,
    prompt: &str,
    max_len: usize,
) -> io::Result<Option<String>> {
    console.write_prompt(prompt)?;

    let Some(mut line) = console.read_line(max_len + 1)? else {
        return Ok(None);
    };

    // A complete line ends at or before max_len.
    if line.len() > max_len && line[max_len] != b'\n' {
        debug!(max_len, "Discarding over-long reply");
        return Ok(None);
    }

    if line.last() == Some(&b'\n') {
        line.pop();
    }
    Ok(Some(String::from_utf8_lossy(&line).into_owned()))
}

fn read_hidden<C: Console + ?Sized>(console: &mut C, buf: &mut [u8]) -> Result<usize, CaptureError> {
    // The final byte always stays zero.
    match console.read_secret(&mut buf[..SECRET_MAX_LEN])? {
        Some(len) if len > 0 => Ok(len),
        _ => Err(CaptureError::NoInput),
    }
}

/// Compare every byte of both buffers without stopping at the first difference.
fn buffers_match(a: &[u8; CAPTURE_BUFFER_LEN], b: &[u8; CAPTURE_BUFFER_LEN]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
