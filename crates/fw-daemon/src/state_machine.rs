use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// ReconcileState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileState {
    Planning,
    NoOp,
    Executing,
    Validating,
    Retrying,
    Committed,
    Abandoned,
    Failed,
    Done,
}

impl ReconcileState {
    /// States that end an attempt; only `Finish` leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReconcileState::NoOp
                | ReconcileState::Committed
                | ReconcileState::Abandoned
                | ReconcileState::Failed
        )
    }
}

impl fmt::Display for ReconcileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ReconcileState::Planning => "Planning",
            ReconcileState::NoOp => "NoOp",
            ReconcileState::Executing => "Executing",
            ReconcileState::Validating => "Validating",
            ReconcileState::Retrying => "Retrying",
            ReconcileState::Committed => "Committed",
            ReconcileState::Abandoned => "Abandoned",
            ReconcileState::Failed => "Failed",
            ReconcileState::Done => "Done",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// ReconcileEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileEvent {
    /// Planning found nothing pending on top of an existing checkpoint.
    NothingPending,
    /// Planning chose a mode and built the first brief.
    Planned,
    /// The executor round returned.
    Executed,
    Clean,
    Dirty,
    /// Still dirty and no rounds left.
    Exhausted,
    Retry,
    Fail,
    Finish,
}

impl fmt::Display for ReconcileEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ReconcileEvent::NothingPending => "NothingPending",
            ReconcileEvent::Planned => "Planned",
            ReconcileEvent::Executed => "Executed",
            ReconcileEvent::Clean => "Clean",
            ReconcileEvent::Dirty => "Dirty",
            ReconcileEvent::Exhausted => "Exhausted",
            ReconcileEvent::Retry => "Retry",
            ReconcileEvent::Fail => "Fail",
            ReconcileEvent::Finish => "Finish",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StateMachineError {
    #[error("invalid transition: cannot apply {event} in state {state}")]
    InvalidTransition {
        state: ReconcileState,
        event: ReconcileEvent,
    },
}

// ---------------------------------------------------------------------------
// ReconcileStateMachine
// ---------------------------------------------------------------------------

/// Lifecycle of one reconciliation attempt.
///
/// Valid transitions:
/// - Planning   + NothingPending -> NoOp
/// - Planning   + Planned        -> Executing
/// - Executing  + Executed       -> Validating
/// - Validating + Clean          -> Committed
/// - Validating + Dirty          -> Retrying
/// - Validating + Exhausted      -> Abandoned
/// - Retrying   + Retry          -> Executing
/// - Planning | Executing | Validating + Fail -> Failed
/// - NoOp | Committed | Abandoned | Failed + Finish -> Done
#[derive(Debug, Clone)]
pub struct ReconcileStateMachine {
    current: ReconcileState,
    history: Vec<(ReconcileState, ReconcileEvent, ReconcileState)>,
}

fn next_state(state: ReconcileState, event: ReconcileEvent) -> Option<ReconcileState> {
    use ReconcileEvent as E;
    use ReconcileState as S;
    Some(match (state, event) {
        (S::Planning, E::NothingPending) => S::NoOp,
        (S::Planning, E::Planned) => S::Executing,
        (S::Executing, E::Executed) => S::Validating,
        (S::Validating, E::Clean) => S::Committed,
        (S::Validating, E::Dirty) => S::Retrying,
        (S::Validating, E::Exhausted) => S::Abandoned,
        (S::Retrying, E::Retry) => S::Executing,
        (S::Planning | S::Executing | S::Validating, E::Fail) => S::Failed,
        (s, E::Finish) if s.is_terminal() => S::Done,
        _ => return None,
    })
}

impl ReconcileStateMachine {
    /// Create a new state machine starting in `Planning`.
    pub fn new() -> Self {
        Self {
            current: ReconcileState::Planning,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> ReconcileState {
        self.current
    }

    pub fn history(&self) -> &[(ReconcileState, ReconcileEvent, ReconcileState)] {
        &self.history
    }

    pub fn transition(&mut self, event: ReconcileEvent) -> Result<ReconcileState, StateMachineError> {
        let Some(next) = next_state(self.current, event) else {
            return Err(StateMachineError::InvalidTransition {
                state: self.current,
                event,
            });
        };

        let from = self.current;
        self.current = next;
        self.history.push((from, event, next));
        tracing::debug!(from = %from, event = %event, to = %next, "reconcile state transition");
        Ok(next)
    }

    pub fn can_transition(&self, event: ReconcileEvent) -> bool {
        next_state(self.current, event).is_some()
    }
}

impl Default for ReconcileStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
