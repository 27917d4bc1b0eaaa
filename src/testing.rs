//! Test doubles for the console and the token provider, and a log recorder.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use crate::console::{CaptureError, Console, EchoState};
use crate::secret::audit;
use crate::secret::Secret;
use crate::token::{SessionId, TokenError, TokenProvider, UserRole};

/// Console that replays scripted keyboard input and records prompts.
pub(crate) struct ScriptedConsole {
    pub(crate) echo: EchoState,
    pub(crate) prompts: Vec<String>,
    /// Successful echo changes, in order.
    pub(crate) echo_changes: Vec<EchoState>,
    /// Hidden reads attempted while echo was on.
    pub(crate) visible_secret_reads: usize,
    pub(crate) fail_echo_query: bool,
    pub(crate) fail_hide: bool,
    pub(crate) fail_restore: bool,
    secrets: VecDeque<Vec<u8>>,
    input: VecDeque<u8>,
}

impl ScriptedConsole {
    pub(crate) fn new() -> Self {
        Self {
            echo: EchoState::Visible,
            prompts: Vec::new(),
            echo_changes: Vec::new(),
            visible_secret_reads: 0,
            fail_echo_query: false,
            fail_hide: false,
            fail_restore: false,
            secrets: VecDeque::new(),
            input: VecDeque::new(),
        }
    }

    /// Queue hidden lines, one per capture read.
    pub(crate) fn with_secrets<'a>(mut self, lines: impl IntoIterator<Item = &'a str>) -> Self {
        self.secrets
            .extend(lines.into_iter().map(|line| line.as_bytes().to_vec()));
        self
    }

    /// Queue raw bytes for visible line reads.
    pub(crate) fn with_input(mut self, input: &str) -> Self {
        self.input.extend(input.bytes());
        self
    }

    pub(crate) fn secrets_remaining(&self) -> usize {
        self.secrets.len()
    }
}

impl Console for ScriptedConsole {
    fn echo_state(&mut self) -> Result<EchoState, CaptureError> {
        if self.fail_echo_query {
            return Err(CaptureError::terminal(
                "get",
                io::Error::new(io::ErrorKind::Unsupported, "not a terminal"),
            ));
        }
        Ok(self.echo)
    }

    fn set_echo_state(&mut self, state: EchoState) -> Result<(), CaptureError> {
        let failing = match state {
            EchoState::Hidden => self.fail_hide,
            EchoState::Visible => self.fail_restore,
        };
        if failing {
            return Err(CaptureError::terminal(
                "set",
                io::Error::new(io::ErrorKind::Other, "tcsetattr refused"),
            ));
        }
        self.echo = state;
        self.echo_changes.push(state);
        Ok(())
    }

    fn write_prompt(&mut self, prompt: &str) -> io::Result<()> {
        self.prompts.push(prompt.to_string());
        Ok(())
    }

    fn read_secret(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        if self.echo == EchoState::Visible {
            self.visible_secret_reads += 1;
        }
        let Some(line) = self.secrets.pop_front() else {
            return Ok(None);
        };
        let len = line.len().min(buf.len());
        buf[..len].copy_from_slice(&line[..len]);
        Ok(Some(len))
    }

    fn read_line(&mut self, limit: usize) -> io::Result<Option<Vec<u8>>> {
        let mut line = Vec::new();
        while line.len() < limit {
            let Some(byte) = self.input.pop_front() else {
                break;
            };
            line.push(byte);
            if byte == b'\n' {
                break;
            }
        }
        Ok((!line.is_empty()).then_some(line))
    }
}

/// One recorded provider operation. PINs are recorded as plain bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ProviderCall {
    Open,
    IsInitialized,
    InitToken(Vec<u8>),
    OpenSession,
    Login(UserRole, Vec<u8>),
    SetPin { old: Vec<u8>, new: Vec<u8> },
    CloseSession(SessionId),
    Close,
}

/// In-memory token that records every call.
pub(crate) struct MockProvider {
    pub(crate) initialized: bool,
    pub(crate) fail_open: bool,
    pub(crate) init_result: Result<(), TokenError>,
    pub(crate) login_result: Result<(), TokenError>,
    pub(crate) calls: Vec<ProviderCall>,
    pub(crate) open_sessions: usize,
    /// Secrets alive on this thread at each `set_pin` call.
    pub(crate) live_secrets_at_set_pin: Vec<usize>,
    set_pin_results: VecDeque<Result<(), TokenError>>,
    next_session: u64,
}

impl MockProvider {
    pub(crate) fn new() -> Self {
        Self {
            initialized: false,
            fail_open: false,
            init_result: Ok(()),
            login_result: Ok(()),
            calls: Vec::new(),
            open_sessions: 0,
            live_secrets_at_set_pin: Vec::new(),
            set_pin_results: VecDeque::new(),
            next_session: 1,
        }
    }

    pub(crate) fn initialized(mut self) -> Self {
        self.initialized = true;
        self
    }

    /// Queue `set_pin` outcomes; calls past the queue succeed.
    pub(crate) fn with_set_pin_results(
        mut self,
        results: impl IntoIterator<Item = Result<(), TokenError>>,
    ) -> Self {
        self.set_pin_results.extend(results);
        self
    }

    pub(crate) fn set_pin_calls(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                ProviderCall::SetPin { old, new } => Some((old.clone(), new.clone())),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn called(&self, wanted: fn(&ProviderCall) -> bool) -> bool {
        self.calls.iter().any(wanted)
    }
}

impl TokenProvider for MockProvider {
    fn open(&mut self) -> Result<(), TokenError> {
        self.calls.push(ProviderCall::Open);
        if self.fail_open {
            return Err(TokenError::ProviderUnavailable("no such module".to_string()));
        }
        Ok(())
    }

    fn close(&mut self) {
        self.calls.push(ProviderCall::Close);
    }

    fn is_token_initialized(&mut self) -> Result<bool, TokenError> {
        self.calls.push(ProviderCall::IsInitialized);
        Ok(self.initialized)
    }

    fn pin_length_range(&mut self) -> Result<RangeInclusive<usize>, TokenError> {
        Ok(6..=127)
    }

    fn init_token(&mut self, so_pin: &Secret) -> Result<(), TokenError> {
        self.calls.push(ProviderCall::InitToken(so_pin.as_bytes().to_vec()));
        self.init_result.clone()
    }

    fn open_session(&mut self) -> Result<SessionId, TokenError> {
        self.calls.push(ProviderCall::OpenSession);
        let id = SessionId(self.next_session);
        self.next_session += 1;
        self.open_sessions += 1;
        Ok(id)
    }

    fn login(&mut self, _session: SessionId, role: UserRole, pin: &Secret) -> Result<(), TokenError> {
        self.calls.push(ProviderCall::Login(role, pin.as_bytes().to_vec()));
        self.login_result.clone()
    }

    fn set_pin(&mut self, _session: SessionId, old: &Secret, new: &Secret) -> Result<(), TokenError> {
        self.calls.push(ProviderCall::SetPin {
            old: old.as_bytes().to_vec(),
            new: new.as_bytes().to_vec(),
        });
        self.live_secrets_at_set_pin.push(audit::live());
        self.set_pin_results.pop_front().unwrap_or(Ok(()))
    }

    fn close_session(&mut self, session: SessionId) {
        self.calls.push(ProviderCall::CloseSession(session));
        self.open_sessions -= 1;
    }
}

/// One recorded tracing event.
#[derive(Debug, Clone)]
pub(crate) struct CapturedEvent {
    pub(crate) level: Level,
    pub(crate) message: String,
}

/// Layer that keeps every event emitted while [`LogCapture::record`] runs.
#[derive(Debug, Clone, Default)]
pub(crate) struct LogCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl LogCapture {
    /// Run `f` with this capture as the thread's subscriber.
    pub(crate) fn record<T>(&self, f: impl FnOnce() -> T) -> T {
        let subscriber = tracing_subscriber::registry().with(self.clone());
        tracing::subscriber::with_default(subscriber, f)
    }

    pub(crate) fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn contains(&self, message: &str) -> bool {
        self.events().iter().any(|e| e.message.contains(message))
    }

    pub(crate) fn count(&self, level: Level) -> usize {
        self.events().iter().filter(|e| e.level == level).count()
    }
}

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{:?}", value);
        }
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        self.events.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            message: visitor.0,
        });
    }
}
