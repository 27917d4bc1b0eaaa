//! Token provider backed by a PKCS#11 module.

use std::collections::HashMap;
use std::ops::RangeInclusive;

use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::error::{Error as CryptokiError, RvError};
use cryptoki::session::{Session, UserType};
use cryptoki::slot::Slot;
use cryptoki::types::AuthPin;
use tracing::{debug, info};

use super::{SessionId, TokenError, TokenProvider, UserRole};
use crate::config::Pkcs11Config;
use crate::secret::Secret;

/// PKCS#11 module, slot and open sessions for one command invocation.
pub struct Pkcs11Provider {
    config: Pkcs11Config,
    context: Option<(Pkcs11, Slot)>,
    sessions: HashMap<SessionId, Session>,
    next_session: u64,
}

impl Pkcs11Provider {
    pub fn new(config: Pkcs11Config) -> Self {
        Self {
            config,
            context: None,
            sessions: HashMap::new(),
            next_session: 1,
        }
    }

    fn connected(&self) -> Result<&(Pkcs11, Slot), TokenError> {
        self.context
            .as_ref()
            .ok_or_else(|| TokenError::ProviderUnavailable("provider is not open".to_string()))
    }

    fn session(&self, id: SessionId) -> Result<&Session, TokenError> {
        self.sessions
            .get(&id)
            .ok_or_else(|| TokenError::rejected("session lookup", format!("unknown session {}", id.0)))
    }
}

impl TokenProvider for Pkcs11Provider {
    fn open(&mut self) -> Result<(), TokenError> {
        let module = &self.config.module;
        let pkcs11 = Pkcs11::new(module).map_err(|e| {
            TokenError::ProviderUnavailable(format!("cannot load {}: {}", module.display(), e))
        })?;
        pkcs11
            .initialize(CInitializeArgs::OsThreads)
            .map_err(|e| TokenError::ProviderUnavailable(e.to_string()))?;

        let slots = pkcs11
            .get_slots_with_token()
            .map_err(|e| TokenError::ProviderUnavailable(e.to_string()))?;
        let slot = match self.config.slot {
            Some(id) => slots.into_iter().find(|slot| slot.id() == id),
            None => slots.into_iter().next(),
        }
        .ok_or(TokenError::NoToken)?;

        info!(module = %module.display(), slot = slot.id(), "Connected to PKCS#11 token");
        self.context = Some((pkcs11, slot));
        Ok(())
    }

    fn close(&mut self) {
        // Sessions must go before the library is finalized.
        self.sessions.clear();
        if self.context.take().is_some() {
            debug!("PKCS#11 library finalized");
        }
    }

    fn is_token_initialized(&mut self) -> Result<bool, TokenError> {
        let (pkcs11, slot) = self.connected()?;
        let info = pkcs11
            .get_token_info(*slot)
            .map_err(|e| token_error("C_GetTokenInfo", e))?;
        Ok(info.token_initialized())
    }

    fn pin_length_range(&mut self) -> Result<RangeInclusive<usize>, TokenError> {
        let (pkcs11, slot) = self.connected()?;
        let info = pkcs11
            .get_token_info(*slot)
            .map_err(|e| token_error("C_GetTokenInfo", e))?;
        Ok(info.min_pin_length()..=info.max_pin_length())
    }

    fn init_token(&mut self, so_pin: &Secret) -> Result<(), TokenError> {
        let (pkcs11, slot) = self.connected()?;
        let pin = auth_pin(so_pin)?;
        pkcs11
            .init_token(*slot, &pin, &self.config.token_label)
            .map_err(|e| token_error("C_InitToken", e))
    }

    fn open_session(&mut self) -> Result<SessionId, TokenError> {
        let (pkcs11, slot) = self.connected()?;
        let session = pkcs11
            .open_rw_session(*slot)
            .map_err(|e| token_error("C_OpenSession", e))?;

        let id = SessionId(self.next_session);
        self.next_session += 1;
        self.sessions.insert(id, session);
        Ok(id)
    }

    fn login(&mut self, session: SessionId, role: UserRole, pin: &Secret) -> Result<(), TokenError> {
        let pin = auth_pin(pin)?;
        let user_type = match role {
            UserRole::SecurityOfficer => UserType::So,
            UserRole::User => UserType::User,
        };
        self.session(session)?
            .login(user_type, Some(&pin))
            .map_err(|e| token_error("C_Login", e))
    }

    fn set_pin(&mut self, session: SessionId, old: &Secret, new: &Secret) -> Result<(), TokenError> {
        let old = auth_pin(old)?;
        let new = auth_pin(new)?;
        self.session(session)?
            .set_pin(&old, &new)
            .map_err(|e| token_error("C_SetPIN", e))
    }

    fn close_session(&mut self, session: SessionId) {
        // Dropping the handle closes the session.
        self.sessions.remove(&session);
    }
}

/// PKCS#11 PINs are UTF-8 strings; the copy lives in a zeroizing secret string.
fn auth_pin(secret: &Secret) -> Result<AuthPin, TokenError> {
    let text = std::str::from_utf8(secret.as_bytes()).map_err(|_| TokenError::PinEncoding)?;
    Ok(AuthPin::new(text.to_owned().into()))
}

fn token_error(operation: &'static str, err: CryptokiError) -> TokenError {
    match err {
        CryptokiError::Pkcs11(RvError::PinInvalid, _) => TokenError::PinInvalid,
        CryptokiError::Pkcs11(RvError::PinLenRange, _) => TokenError::PinLengthOutOfRange,
        CryptokiError::Pkcs11(RvError::PinIncorrect, _) => TokenError::PinIncorrect,
        CryptokiError::Pkcs11(RvError::UserPinNotInitialized, _) => TokenError::NotInitialized,
        other => TokenError::rejected(operation, other),
    }
}
