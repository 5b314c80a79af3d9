// Call state machine — gates the user's start/stop actions in the 1:1 shape

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Call lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallState {
    /// Idle; the user may start a call
    CanStart,
    /// Offer in flight, waiting for the coordinator's answer
    Starting,
    /// Call active; the user may stop it
    CanStop,
}

/// Everything that moves the call state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallTrigger {
    /// User pressed start
    Start,
    /// The coordinator's answer was applied
    AnswerApplied,
    /// User pressed stop, or the call was torn down
    Stop,
    /// Capture, offer, answer, server error, unrecognized reply
    Failure,
}

impl CallTrigger {
    pub const ALL: [CallTrigger; 4] = [
        CallTrigger::Start,
        CallTrigger::AnswerApplied,
        CallTrigger::Stop,
        CallTrigger::Failure,
    ];
}

/// Which user actions are enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Affordances {
    pub start_enabled: bool,
    pub stop_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallStateError {
    #[error("Cannot {action} while {state}")]
    NotAllowed { action: &'static str, state: CallState },
}

impl CallState {
    pub const ALL: [CallState; 3] = [CallState::CanStart, CallState::Starting, CallState::CanStop];

    /// Start/stop enablement as a pure function of the state
    pub fn affordances(self) -> Affordances {
        match self {
            CallState::CanStart => Affordances {
                start_enabled: true,
                stop_enabled: false,
            },
            CallState::Starting => Affordances {
                start_enabled: false,
                stop_enabled: false,
            },
            CallState::CanStop => Affordances {
                start_enabled: false,
                stop_enabled: true,
            },
        }
    }

    /// Whether `trigger` means anything in this state
    pub fn accepts(self, trigger: CallTrigger) -> bool {
        matches!(
            (self, trigger),
            (CallState::CanStart, CallTrigger::Start)
                | (CallState::Starting, CallTrigger::AnswerApplied)
                | (CallState::Starting, CallTrigger::Stop)
                | (CallState::Starting, CallTrigger::Failure)
                | (CallState::CanStop, CallTrigger::Stop)
                | (CallState::CanStop, CallTrigger::Failure)
        )
    }

    /// Total transition function. Triggers that mean nothing in a state
    /// leave it unchanged.
    pub fn next(self, trigger: CallTrigger) -> CallState {
        match (self, trigger) {
            (CallState::CanStart, CallTrigger::Start) => CallState::Starting,
            (CallState::CanStart, _) => CallState::CanStart,

            (CallState::Starting, CallTrigger::AnswerApplied) => CallState::CanStop,
            (CallState::Starting, CallTrigger::Stop | CallTrigger::Failure) => CallState::CanStart,
            (CallState::Starting, CallTrigger::Start) => CallState::Starting,

            (CallState::CanStop, CallTrigger::Stop | CallTrigger::Failure) => CallState::CanStart,
            (CallState::CanStop, CallTrigger::Start | CallTrigger::AnswerApplied) => CallState::CanStop,
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallState::CanStart => write!(f, "idle"),
            CallState::Starting => write!(f, "starting"),
            CallState::CanStop => write!(f, "active"),
        }
    }
}

/// State plus the affordances derived from it, as published to the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallStatus {
    pub state: CallState,
    pub affordances: Affordances,
}

impl From<CallState> for CallStatus {
    fn from(state: CallState) -> Self {
        Self {
            state,
            affordances: state.affordances(),
        }
    }
}

/// One call attempt's state, republished on every transition
#[derive(Debug)]
pub struct CallMachine {
    state: CallState,
    status_tx: watch::Sender<CallStatus>,
}

impl CallMachine {
    pub fn new() -> (Self, watch::Receiver<CallStatus>) {
        let (status_tx, status_rx) = watch::channel(CallStatus::from(CallState::CanStart));
        (
            Self {
                state: CallState::CanStart,
                status_tx,
            },
            status_rx,
        )
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn subscribe(&self) -> watch::Receiver<CallStatus> {
        self.status_tx.subscribe()
    }

    /// Apply a trigger and republish the affordances, even when nothing changed
    pub fn fire(&mut self, trigger: CallTrigger) -> CallState {
        let from = self.state;
        if !from.accepts(trigger) {
            warn!("Call trigger {:?} ignored while {}", trigger, from);
        }
        self.state = from.next(trigger);
        self.status_tx.send_replace(CallStatus::from(self.state));
        debug!("Call state {} -> {} ({:?})", from, self.state, trigger);
        self.state
    }

    /// Check a user action against the current affordances
    pub fn check(&self, trigger: CallTrigger) -> Result<(), CallStateError> {
        let affordances = self.state.affordances();
        let allowed = match trigger {
            CallTrigger::Start => affordances.start_enabled,
            CallTrigger::Stop => affordances.stop_enabled,
            CallTrigger::AnswerApplied | CallTrigger::Failure => true,
        };
        if allowed {
            Ok(())
        } else {
            Err(CallStateError::NotAllowed {
                action: match trigger {
                    CallTrigger::Start => "start",
                    CallTrigger::Stop => "stop",
                    CallTrigger::AnswerApplied => "apply answer",
                    CallTrigger::Failure => "fail",
                },
                state: self.state,
            })
        }
    }
}
