//! PIN and password material with guaranteed wiping.
//!
//! A [`Secret`] is created by the capture layer, handed to exactly one token
//! operation (or a confirmation comparison) and then released. Its storage is
//! overwritten with zeroes before it is freed, on every path that drops it.

use std::fmt;

use thiserror::Error;
use zeroize::Zeroize;

/// Longest secret accepted from the terminal, in bytes.
pub const SECRET_MAX_LEN: usize = 255;

/// Errors raised while transforming captured bytes into a secret.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("secret is not valid UTF-8 and cannot be widened")]
    NotUtf8,
}

/// Owned secret bytes.
///
/// The buffer is allocated once at its final size and never grows, so no
/// stale copy is left behind by a reallocation. There is deliberately no
/// `Clone`: a copy must be made with [`Secret::from_slice`], which gives it
/// its own wipe obligation.
pub struct Secret {
    bytes: Box<[u8]>,
}

impl Secret {
    /// Copy `bytes` into a new secret.
    pub fn from_slice(bytes: &[u8]) -> Self {
        audit::created();
        Self {
            bytes: bytes.to_vec().into_boxed_slice(),
        }
    }

    /// A documented default credential, wrapped so it is wiped like any other.
    pub fn well_known(pin: &str) -> Self {
        Self::from_slice(pin.as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Wipe and free the secret.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.bytes.zeroize();
        audit::wiped(&self.bytes);
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("len", &self.bytes.len())
            .finish_non_exhaustive()
    }
}

/// Release a secret that may not exist. A `None` is a no-op.
pub fn release(secret: Option<Secret>) {
    if let Some(secret) = secret {
        secret.release();
    }
}

/// Byte representation handed to the token provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encoding {
    /// The bytes exactly as typed.
    #[default]
    Native,
    /// UTF-16LE with a two-byte NUL terminator, as TSS unicode mode expects.
    Wide,
}

impl Encoding {
    /// Build a secret from captured bytes in this representation.
    ///
    /// The returned length covers every encoded byte, terminator included.
    pub fn encode(self, captured: &[u8]) -> Result<Secret, EncodingError> {
        match self {
            Encoding::Native => Ok(Secret::from_slice(captured)),
            Encoding::Wide => {
                let text = std::str::from_utf8(captured).map_err(|_| EncodingError::NotUtf8)?;
                let units = text.encode_utf16().count() + 1;
                let mut wide = vec![0u8; units * 2];
                for (slot, unit) in wide.chunks_exact_mut(2).zip(text.encode_utf16()) {
                    slot.copy_from_slice(&unit.to_le_bytes());
                }
                let secret = Secret::from_slice(&wide);
                wide.zeroize();
                Ok(secret)
            }
        }
    }
}

/// Drop accounting for tests. Compiled to nothing outside test builds.
#[cfg(not(test))]
mod audit {
    #[inline(always)]
    pub(super) fn created() {}

    #[inline(always)]
    pub(super) fn wiped(_storage: &[u8]) {}
}
