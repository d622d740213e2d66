//! Message-order validators for the two streaming calls.
//!
//! Each protocol is a small table of `(state, event) -> state`. Anything not
//! in the table is an [`InvalidTransition`], and the machine stays failed
//! afterwards: the caller is expected to abandon the stream.
//!
//! Task creation repeats a header/payload cycle until `LastTask`. Result
//! ingestion carries exactly one key per call.

use std::fmt;
use std::marker::PhantomData;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{machine}: invalid transition from {state} on {event}")]
pub struct InvalidTransition {
    pub machine: &'static str,
    pub state: &'static str,
    pub event: &'static str,
}

/// A finite message-order grammar.
pub trait Protocol {
    const NAME: &'static str;
    type State: Copy + Eq + fmt::Debug;
    type Event: Copy + Eq + fmt::Debug;

    fn initial() -> Self::State;
    fn transition(state: Self::State, event: Self::Event) -> Option<Self::State>;
    fn is_terminal(state: Self::State) -> bool;
    fn state_name(state: Self::State) -> &'static str;
    fn event_name(event: Self::Event) -> &'static str;
}

pub struct ProtocolStateMachine<P: Protocol> {
    state: P::State,
    failed: bool,
    _protocol: PhantomData<P>,
}

impl<P: Protocol> ProtocolStateMachine<P> {
    pub fn new() -> Self {
        Self {
            state: P::initial(),
            failed: false,
            _protocol: PhantomData,
        }
    }

    pub fn state(&self) -> P::State {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        !self.failed && P::is_terminal(self.state)
    }

    /// Apply one event. On failure the state is left as it was and every
    /// later event is refused too.
    pub fn fire(&mut self, event: P::Event) -> Result<P::State, InvalidTransition> {
        let next = if self.failed {
            None
        } else {
            P::transition(self.state, event)
        };

        match next {
            Some(next) => {
                tracing::trace!(
                    machine = P::NAME,
                    from = P::state_name(self.state),
                    to = P::state_name(next),
                    event = P::event_name(event),
                    "transition"
                );
                self.state = next;
                Ok(next)
            }
            None => {
                self.failed = true;
                Err(InvalidTransition {
                    machine: P::NAME,
                    state: P::state_name(self.state),
                    event: P::event_name(event),
                })
            }
        }
    }
}

impl<P: Protocol> Default for ProtocolStateMachine<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Protocol> fmt::Debug for ProtocolStateMachine<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(P::NAME)
            .field("state", &self.state)
            .field("failed", &self.failed)
            .finish()
    }
}

// ── Task creation ─────────────────────────────────────────────────────────────

pub enum TaskCreation {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskCreationState {
    Idle,
    AwaitingHeaderOrEnd,
    ReceivingChunks,
    Terminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskCreationEvent {
    InitRequest,
    Header,
    Data,
    DataComplete,
    LastTask,
}

impl Protocol for TaskCreation {
    const NAME: &'static str = "TaskCreation";
    type State = TaskCreationState;
    type Event = TaskCreationEvent;

    fn initial() -> Self::State {
        TaskCreationState::Idle
    }

    fn transition(state: Self::State, event: Self::Event) -> Option<Self::State> {
        use TaskCreationEvent as E;
        use TaskCreationState as S;
        match (state, event) {
            (S::Idle, E::InitRequest) => Some(S::AwaitingHeaderOrEnd),
            (S::AwaitingHeaderOrEnd, E::Header) => Some(S::ReceivingChunks),
            (S::AwaitingHeaderOrEnd, E::LastTask) => Some(S::Terminal),
            (S::ReceivingChunks, E::Data) => Some(S::ReceivingChunks),
            (S::ReceivingChunks, E::DataComplete) => Some(S::AwaitingHeaderOrEnd),
            _ => None,
        }
    }

    fn is_terminal(state: Self::State) -> bool {
        state == TaskCreationState::Terminal
    }

    fn state_name(state: Self::State) -> &'static str {
        match state {
            TaskCreationState::Idle => "Idle",
            TaskCreationState::AwaitingHeaderOrEnd => "AwaitingHeaderOrEnd",
            TaskCreationState::ReceivingChunks => "ReceivingChunks",
            TaskCreationState::Terminal => "Terminal",
        }
    }

    fn event_name(event: Self::Event) -> &'static str {
        match event {
            TaskCreationEvent::InitRequest => "InitRequest",
            TaskCreationEvent::Header => "Header",
            TaskCreationEvent::Data => "Data",
            TaskCreationEvent::DataComplete => "DataComplete",
            TaskCreationEvent::LastTask => "LastTask",
        }
    }
}

pub type TaskCreationMachine = ProtocolStateMachine<TaskCreation>;

// ── Result ingestion ──────────────────────────────────────────────────────────

pub enum ResultIngestion {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultIngestionState {
    Idle,
    ReceivingChunks,
    AwaitingEnd,
    Terminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultIngestionEvent {
    InitKey,
    Data,
    DataComplete,
    LastResult,
}

impl Protocol for ResultIngestion {
    const NAME: &'static str = "ResultIngestion";
    type State = ResultIngestionState;
    type Event = ResultIngestionEvent;

    fn initial() -> Self::State {
        ResultIngestionState::Idle
    }

    fn transition(state: Self::State, event: Self::Event) -> Option<Self::State> {
        use ResultIngestionEvent as E;
        use ResultIngestionState as S;
        match (state, event) {
            (S::Idle, E::InitKey) => Some(S::ReceivingChunks),
            (S::ReceivingChunks, E::Data) => Some(S::ReceivingChunks),
            (S::ReceivingChunks, E::DataComplete) => Some(S::AwaitingEnd),
            (S::AwaitingEnd, E::LastResult) => Some(S::Terminal),
            _ => None,
        }
    }

    fn is_terminal(state: Self::State) -> bool {
        state == ResultIngestionState::Terminal
    }

    fn state_name(state: Self::State) -> &'static str {
        match state {
            ResultIngestionState::Idle => "Idle",
            ResultIngestionState::ReceivingChunks => "ReceivingChunks",
            ResultIngestionState::AwaitingEnd => "AwaitingEnd",
            ResultIngestionState::Terminal => "Terminal",
        }
    }

    fn event_name(event: Self::Event) -> &'static str {
        match event {
            ResultIngestionEvent::InitKey => "InitKey",
            ResultIngestionEvent::Data => "Data",
            ResultIngestionEvent::DataComplete => "DataComplete",
            ResultIngestionEvent::LastResult => "LastResult",
        }
    }
}

pub type ResultIngestionMachine = ProtocolStateMachine<ResultIngestion>;
