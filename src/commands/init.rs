//! Token (re)initialization.
//!
//! Clears the token, then walks it from its well-known PINs to operator
//! chosen ones: SO login, new SO PIN, fresh session, user login, new user
//! PIN. Every guard and secret is released by scope, so an abort at any
//! step tears down whatever had been acquired up to that point.

use tracing::{debug, info};

use super::{replace_pin, Outcome};
use crate::console::{capture_secret, read_reply, Confirmation, Console};
use crate::error::ToolResult;
use crate::secret::{Encoding, Secret};
use crate::token::{ProviderContext, TokenProvider, UserRole, WELL_KNOWN_SO_PIN, WELL_KNOWN_USER_PIN};

pub const CLEAR_PROMPT: &str =
    "The PKCS#11 TPM token is already initialized. Clear it and destroy all of its objects? [y/N]: ";
pub const CURRENT_SO_PIN_PROMPT: &str = "Enter current SO PIN: ";

/// Where the current SO PIN of an initialized token comes from.
#[derive(Debug, Default)]
pub enum SoPinSource {
    /// Ask the operator.
    #[default]
    Prompt,
    /// Given on the command line.
    Supplied(Secret),
    /// The token still has its well-known SO PIN.
    WellKnown,
}

/// Parsed options of the token-init command.
#[derive(Debug, Default)]
pub struct InitRequest {
    /// Skip the clear confirmation prompt.
    pub assume_yes: bool,
    pub so_pin: SoPinSource,
    pub encoding: Encoding,
    pub max_pin_attempts: Option<u32>,
}

pub fn init_token<C, P>(console: &mut C, provider: &mut P, request: &InitRequest) -> ToolResult<Outcome>
where
    C: Console + ?Sized,
    P: TokenProvider + ?Sized,
{
    let mut context = ProviderContext::open(provider)?;

    let so_pin = if context.is_token_initialized()? {
        if !request.assume_yes && !clear_confirmed(console)? {
            return Ok(Outcome::Declined);
        }
        current_so_pin(console, request)?
    } else {
        debug!("Token is not initialized, clearing with the well-known SO PIN");
        Secret::well_known(WELL_KNOWN_SO_PIN)
    };

    let cleared = context.init_token(&so_pin);
    so_pin.release();
    cleared?;
    info!("Token cleared");

    let lengths = context.pin_length_range()?;

    // A cleared token always comes back with the well-known PINs.
    let default_so = Secret::well_known(WELL_KNOWN_SO_PIN);
    {
        let mut session = context.open_session()?;
        session.login(UserRole::SecurityOfficer, &default_so)?;
        replace_pin(
            console,
            &mut session,
            UserRole::SecurityOfficer,
            &default_so,
            &lengths,
            request.encoding,
            request.max_pin_attempts,
        )?;
    }
    default_so.release();

    let default_user = Secret::well_known(WELL_KNOWN_USER_PIN);
    {
        let mut session = context.open_session()?;
        session.login(UserRole::User, &default_user)?;
        replace_pin(
            console,
            &mut session,
            UserRole::User,
            &default_user,
            &lengths,
            request.encoding,
            request.max_pin_attempts,
        )?;
    }
    default_user.release();

    Ok(Outcome::Completed)
}

/// Only an explicit "y" clears an initialized token.
fn clear_confirmed<C: Console + ?Sized>(console: &mut C) -> ToolResult<bool> {
    let reply = read_reply(console, CLEAR_PROMPT, 1)?;
    let confirmed = reply.is_some_and(|answer| answer.eq_ignore_ascii_case("y"));
    if !confirmed {
        info!("Token left untouched");
    }
    Ok(confirmed)
}

fn current_so_pin<C: Console + ?Sized>(console: &mut C, request: &InitRequest) -> ToolResult<Secret> {
    let pin = match &request.so_pin {
        SoPinSource::Prompt => capture_secret(
            console,
            CURRENT_SO_PIN_PROMPT,
            Confirmation::NotRequired,
            request.encoding,
        )?,
        SoPinSource::Supplied(pin) => Secret::from_slice(pin.as_bytes()),
        SoPinSource::WellKnown => Secret::well_known(WELL_KNOWN_SO_PIN),
    };
    Ok(pin)
}
