//! PIN change on an initialized token.

use super::{replace_pin, Outcome};
use crate::console::{capture_secret, Confirmation, Console};
use crate::error::ToolResult;
use crate::secret::Encoding;
use crate::token::{ProviderContext, TokenError, TokenProvider, UserRole};

/// Parsed options of the change-pin command.
#[derive(Debug, Clone, Copy)]
pub struct ChangePinRequest {
    pub role: UserRole,
    pub encoding: Encoding,
    pub max_pin_attempts: Option<u32>,
}

impl Default for ChangePinRequest {
    fn default() -> Self {
        Self {
            role: UserRole::User,
            encoding: Encoding::Native,
            max_pin_attempts: None,
        }
    }
}

pub fn change_pin<C, P>(
    console: &mut C,
    provider: &mut P,
    request: &ChangePinRequest,
) -> ToolResult<Outcome>
where
    C: Console + ?Sized,
    P: TokenProvider + ?Sized,
{
    let mut context = ProviderContext::open(provider)?;
    if !context.is_token_initialized()? {
        return Err(TokenError::NotInitialized.into());
    }

    let role = request.role;
    let current = capture_secret(
        console,
        &format!("Enter current {} PIN: ", role),
        Confirmation::NotRequired,
        request.encoding,
    )?;
    let lengths = context.pin_length_range()?;

    {
        let mut session = context.open_session()?;
        session.login(role, &current)?;
        replace_pin(
            console,
            &mut session,
            role,
            &current,
            &lengths,
            request.encoding,
            request.max_pin_attempts,
        )?;
    }
    current.release();

    Ok(Outcome::Completed)
}
