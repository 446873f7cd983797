//! Client-side reconnection state machine
//!
//! Transport agnostic: the caller feeds [`ClientEvent`]s and performs the
//! returned [`ClientAction`]. Every reconnect opens a brand-new server
//! session.

use std::time::Duration;
use thiserror::Error;

/// Exponential backoff bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Consecutive failed connection attempts before giving up
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(250),
            max: Duration::from_secs(10),
            max_attempts: 8,
        }
    }
}

impl BackoffPolicy {
    /// `base * 2^failures`, capped at `max`
    pub fn delay(&self, failures: u32) -> Duration {
        let factor = 1u32.checked_shl(failures).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Connecting { failures: u32 },
    Streaming,
    Reconnecting { failures: u32 },
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    Start,
    Connected,
    ConnectFailed,
    Disconnected,
    BackoffElapsed,
    Stop,
}

/// What the caller must do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAction {
    Connect,
    Wait(Duration),
    Stream,
    GiveUp,
    Shutdown,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("event {event:?} is not valid in state {state:?}")]
pub struct InvalidTransition {
    pub state: ClientState,
    pub event: ClientEvent,
}

/// Idle -> Connecting -> Streaming -> Reconnecting -> ... -> Closed
#[derive(Debug, Clone)]
pub struct ReconnectMachine {
    state: ClientState,
    policy: BackoffPolicy,
}

impl ReconnectMachine {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            state: ClientState::Idle,
            policy,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ClientState::Closed
    }

    pub fn handle(&mut self, event: ClientEvent) -> Result<ClientAction, InvalidTransition> {
        use ClientEvent as E;
        use ClientState as S;

        let (next, action) = match (self.state, event) {
            (S::Closed, _) => return Err(self.invalid(event)),
            (_, E::Stop) => (S::Closed, ClientAction::Shutdown),

            (S::Idle, E::Start) => (S::Connecting { failures: 0 }, ClientAction::Connect),
            (S::Connecting { .. }, E::Connected) => (S::Streaming, ClientAction::Stream),
            (S::Connecting { failures }, E::ConnectFailed) => {
                let failures = failures + 1;
                if failures >= self.policy.max_attempts {
                    (S::Closed, ClientAction::GiveUp)
                } else {
                    (
                        S::Reconnecting { failures },
                        ClientAction::Wait(self.policy.delay(failures - 1)),
                    )
                }
            }
            (S::Streaming, E::Disconnected) => (
                S::Reconnecting { failures: 0 },
                ClientAction::Wait(self.policy.delay(0)),
            ),
            (S::Reconnecting { failures }, E::BackoffElapsed) => {
                (S::Connecting { failures }, ClientAction::Connect)
            }
            _ => return Err(self.invalid(event)),
        };

        log::debug!("Client {:?} --{:?}--> {:?}", self.state, event, next);
        self.state = next;
        Ok(action)
    }

    fn invalid(&self, event: ClientEvent) -> InvalidTransition {
        InvalidTransition {
            state: self.state,
            event,
        }
    }
}
