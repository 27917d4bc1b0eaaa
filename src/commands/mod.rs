//! Token commands.
//!
//! The front-end parses arguments into a [`Command`] and hands it to
//! [`execute`] together with the console and token provider to use.

pub mod change_pin;
pub mod init;

use std::ops::RangeInclusive;

use tracing::{error, info, warn};

use crate::console::{capture_secret, Confirmation, Console};
use crate::error::{ToolError, ToolResult};
use crate::secret::{Encoding, Secret};
use crate::token::{TokenProvider, TokenSession, UserRole};

pub use change_pin::ChangePinRequest;
pub use init::{InitRequest, SoPinSource};

/// A parsed command, ready to run.
#[derive(Debug)]
pub enum Command {
    /// Clear the token and set new SO and user PINs.
    TokenInit(InitRequest),
    /// Change the SO or user PIN of an initialized token.
    ChangePin(ChangePinRequest),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::TokenInit(_) => "token-init",
            Command::ChangePin(_) => "change-pin",
        }
    }
}

/// How a command that did not fail came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// The operator answered a confirmation prompt with no.
    Declined,
}

/// Final status of a command invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Succeeded,
    Declined,
    Failed,
}

impl CommandStatus {
    pub fn exit_code(self) -> u8 {
        match self {
            CommandStatus::Succeeded => 0,
            CommandStatus::Declined | CommandStatus::Failed => 1,
        }
    }
}

/// Run a command and log its summary line.
pub fn execute<C, P>(command: &Command, console: &mut C, provider: &mut P) -> CommandStatus
where
    C: Console + ?Sized,
    P: TokenProvider + ?Sized,
{
    let name = command.name();
    let result = match command {
        Command::TokenInit(request) => init::init_token(console, provider, request),
        Command::ChangePin(request) => change_pin::change_pin(console, provider, request),
    };

    match result {
        Ok(Outcome::Completed) => {
            info!("{} succeeded", name);
            CommandStatus::Succeeded
        }
        Ok(Outcome::Declined) => {
            info!("{} cancelled", name);
            CommandStatus::Declined
        }
        Err(err) => {
            error!("{}", err);
            info!("{} failed", name);
            CommandStatus::Failed
        }
    }
}

/// Prompt for a new PIN until the token accepts one.
///
/// PINs the token rejects as malformed are released and the operator is
/// asked again, without limit unless `max_attempts` is set. Any other
/// failure ends the loop.
pub(crate) fn replace_pin<C, P>(
    console: &mut C,
    session: &mut TokenSession<'_, P>,
    role: UserRole,
    current: &Secret,
    lengths: &RangeInclusive<usize>,
    encoding: Encoding,
    max_attempts: Option<u32>,
) -> ToolResult<()>
where
    C: Console + ?Sized,
    P: TokenProvider + ?Sized,
{
    let prompt = format!(
        "Enter new {} PIN ({}-{} characters): ",
        role,
        lengths.start(),
        lengths.end()
    );
    let mut rejected = 0;

    loop {
        let new_pin = capture_secret(console, &prompt, Confirmation::Required, encoding)?;
        let result = session.set_pin(current, &new_pin);
        new_pin.release();

        match result {
            Ok(()) => {
                info!("New {} PIN set", role);
                return Ok(());
            }
            Err(err) if err.is_pin_validation() => {
                warn!("Invalid {} PIN: {}, please try again", role, err);
                rejected += 1;
                if max_attempts.is_some_and(|limit| rejected >= limit) {
                    return Err(ToolError::AttemptsExhausted {
                        role,
                        attempts: rejected,
                    });
                }
            }
            Err(err) => return Err(err.into()),
        }
    }
}
