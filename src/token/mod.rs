//! Boundary to the PKCS#11 token provider.
//!
//! Commands never talk to the provider directly. They open a
//! [`ProviderContext`] and, through it, [`TokenSession`]s; both close
//! themselves when dropped, so every exit path tears them down in reverse
//! order of acquisition.

pub mod pkcs11;

use std::fmt;
use std::ops::RangeInclusive;

use thiserror::Error;
use tracing::debug;

use crate::secret::Secret;

pub use pkcs11::Pkcs11Provider;

/// Security officer PIN of a freshly cleared token.
pub const WELL_KNOWN_SO_PIN: &str = "87654321";

/// User PIN of a freshly cleared token.
pub const WELL_KNOWN_USER_PIN: &str = "12345678";

/// Errors reported by the token provider.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("PKCS#11 provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("no token present in the selected slot")]
    NoToken,

    #[error("the token has not been initialized")]
    NotInitialized,

    #[error("the PIN contains characters the token does not accept")]
    PinInvalid,

    #[error("the PIN length is outside the range the token accepts")]
    PinLengthOutOfRange,

    #[error("incorrect PIN")]
    PinIncorrect,

    #[error("the PIN cannot be passed to the token in this encoding")]
    PinEncoding,

    #[error("{operation} failed: {reason}")]
    Rejected {
        operation: &'static str,
        reason: String,
    },
}

impl TokenError {
    /// Errors that a different PIN could fix.
    pub fn is_pin_validation(&self) -> bool {
        matches!(self, Self::PinInvalid | Self::PinLengthOutOfRange)
    }

    pub fn rejected(operation: &'static str, reason: impl fmt::Display) -> Self {
        Self::Rejected {
            operation,
            reason: reason.to_string(),
        }
    }
}

/// Token role a session authenticates as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserRole {
    SecurityOfficer,
    User,
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRole::SecurityOfficer => f.write_str("SO"),
            UserRole::User => f.write_str("user"),
        }
    }
}

/// Opaque provider session handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

/// Operations of the token provider.
pub trait TokenProvider {
    /// Load the provider and connect to the token.
    fn open(&mut self) -> Result<(), TokenError>;

    /// Disconnect. Safe to call when nothing is open.
    fn close(&mut self);

    fn is_token_initialized(&mut self) -> Result<bool, TokenError>;

    /// PIN lengths the token accepts.
    fn pin_length_range(&mut self) -> Result<RangeInclusive<usize>, TokenError>;

    /// Clear the token, authorizing with the current SO PIN.
    fn init_token(&mut self, so_pin: &Secret) -> Result<(), TokenError>;

    /// Open a read-write session.
    fn open_session(&mut self) -> Result<SessionId, TokenError>;

    fn login(&mut self, session: SessionId, role: UserRole, pin: &Secret) -> Result<(), TokenError>;

    /// Change the PIN of the role logged in on `session`.
    fn set_pin(&mut self, session: SessionId, old: &Secret, new: &Secret) -> Result<(), TokenError>;

    fn close_session(&mut self, session: SessionId);
}

/// An open provider, closed when dropped.
pub struct ProviderContext<'p, P: TokenProvider + ?Sized> {
    provider: &'p mut P,
}

impl<'p, P: TokenProvider + ?Sized> ProviderContext<'p, P> {
    /// Open the provider. A partially opened provider is closed again on failure.
    pub fn open(provider: &'p mut P) -> Result<Self, TokenError> {
        if let Err(err) = provider.open() {
            provider.close();
            return Err(err);
        }
        debug!("Token provider opened");
        Ok(Self { provider })
    }

    pub fn is_token_initialized(&mut self) -> Result<bool, TokenError> {
        self.provider.is_token_initialized()
    }

    pub fn pin_length_range(&mut self) -> Result<RangeInclusive<usize>, TokenError> {
        self.provider.pin_length_range()
    }

    pub fn init_token(&mut self, so_pin: &Secret) -> Result<(), TokenError> {
        self.provider.init_token(so_pin)
    }

    pub fn open_session(&mut self) -> Result<TokenSession<'_, P>, TokenError> {
        let id = self.provider.open_session()?;
        debug!(session = id.0, "Token session opened");
        Ok(TokenSession {
            provider: &mut *self.provider,
            id,
        })
    }
}

impl<P: TokenProvider + ?Sized> Drop for ProviderContext<'_, P> {
    fn drop(&mut self) {
        self.provider.close();
        debug!("Token provider closed");
    }
}

/// An open token session, closed when dropped.
pub struct TokenSession<'c, P: TokenProvider + ?Sized> {
    provider: &'c mut P,
    id: SessionId,
}

impl<P: TokenProvider + ?Sized> TokenSession<'_, P> {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn login(&mut self, role: UserRole, pin: &Secret) -> Result<(), TokenError> {
        self.provider.login(self.id, role, pin)?;
        debug!(session = self.id.0, %role, "Logged in");
        Ok(())
    }

    pub fn set_pin(&mut self, old: &Secret, new: &Secret) -> Result<(), TokenError> {
        self.provider.set_pin(self.id, old, new)
    }
}

impl<P: TokenProvider + ?Sized> Drop for TokenSession<'_, P> {
    fn drop(&mut self) {
        self.provider.close_session(self.id);
        debug!(session = self.id.0, "Token session closed");
    }
}
