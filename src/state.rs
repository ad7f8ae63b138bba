//! The flow state machine.
//!
//! Every data flow carries a [`FlowStateMachine`] guarding the legality
//! of operation orderings. Transitions are driven by the flow itself;
//! illegal transitions are programmer errors and assert in debug builds.

/// The labelled states a flow moves through.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FlowState {
    /// Freshly created, nothing issued yet.
    Init,
    /// A connect is in flight.
    Connecting,
    /// Connected, no data operation outstanding.
    Established,
    /// A read is outstanding.
    Reading,
    /// A write is outstanding.
    Writing,
    /// One read and one write are outstanding.
    ReadingWriting,
    /// The read side has been closed.
    ReadClosed,
    /// The write side has been closed.
    WriteClosed,
    /// Fully closed.
    Closed,
    /// An error occurred; terminal for data operations.
    Errored,
}

impl FlowState {
    /// Whether a read is outstanding in this state.
    pub fn is_reading(self) -> bool {
        matches!(self, FlowState::Reading | FlowState::ReadingWriting)
    }

    /// Whether a write is outstanding in this state.
    pub fn is_writing(self) -> bool {
        matches!(self, FlowState::Writing | FlowState::ReadingWriting)
    }
}

/// Transition guard for a flow.
///
/// Kept as a flat enum with a transition table rather than per-state
/// types; the owning flow calls the transition methods at each operation
/// boundary and the outer flow consults the predicates to coalesce
/// pending inner I/O.
#[derive(Debug)]
pub struct FlowStateMachine {
    state: FlowState,
}

impl Default for FlowStateMachine {
    fn default() -> FlowStateMachine {
        FlowStateMachine::new()
    }
}

impl FlowStateMachine {
    /// A machine in `Init`.
    pub fn new() -> FlowStateMachine {
        FlowStateMachine {
            state: FlowState::Init,
        }
    }

    /// The current state.
    pub fn state(&self) -> FlowState {
        self.state
    }

    /// Whether a read is outstanding.
    pub fn is_reading(&self) -> bool {
        self.state.is_reading()
    }

    /// Whether a write is outstanding.
    pub fn is_writing(&self) -> bool {
        self.state.is_writing()
    }

    /// A connect has been issued.
    pub fn connect_begin(&mut self) {
        let next = match self.state {
            FlowState::Init => Some(FlowState::Connecting),
            _ => None,
        };
        self.advance("connect_begin", next);
    }

    /// The connect completed successfully.
    pub fn connected(&mut self) {
        let next = match self.state {
            FlowState::Connecting => Some(FlowState::Established),
            _ => None,
        };
        self.advance("connected", next);
    }

    /// A read has been issued.
    pub fn read_begin(&mut self) {
        let next = match self.state {
            FlowState::Established | FlowState::WriteClosed => Some(FlowState::Reading),
            FlowState::Writing => Some(FlowState::ReadingWriting),
            _ => None,
        };
        self.advance("read_begin", next);
    }

    /// The outstanding read has completed.
    pub fn read_end(&mut self) {
        let next = match self.state {
            FlowState::Reading => Some(FlowState::Established),
            FlowState::ReadingWriting => Some(FlowState::Writing),
            _ => None,
        };
        self.advance("read_end", next);
    }

    /// A write has been issued.
    pub fn write_begin(&mut self) {
        let next = match self.state {
            FlowState::Established | FlowState::ReadClosed => Some(FlowState::Writing),
            FlowState::Reading => Some(FlowState::ReadingWriting),
            _ => None,
        };
        self.advance("write_begin", next);
    }

    /// The outstanding write has completed.
    pub fn write_end(&mut self) {
        let next = match self.state {
            FlowState::Writing => Some(FlowState::Established),
            FlowState::ReadingWriting => Some(FlowState::Reading),
            _ => None,
        };
        self.advance("write_end", next);
    }

    /// The read side has been closed.
    pub fn read_close(&mut self) {
        let next = match self.state {
            FlowState::Established => Some(FlowState::ReadClosed),
            FlowState::WriteClosed => Some(FlowState::Closed),
            _ => None,
        };
        self.advance("read_close", next);
    }

    /// The write side has been closed.
    pub fn write_close(&mut self) {
        let next = match self.state {
            FlowState::Established => Some(FlowState::WriteClosed),
            FlowState::ReadClosed => Some(FlowState::Closed),
            _ => None,
        };
        self.advance("write_close", next);
    }

    /// An error occurred. Idempotent; terminal for data operations.
    pub fn errored(&mut self) {
        match self.state {
            FlowState::Closed => self.advance("errored", None),
            _ => self.state = FlowState::Errored,
        }
    }

    /// The flow has been closed.
    pub fn close(&mut self) {
        self.state = FlowState::Closed;
    }

    fn advance(&mut self, op: &'static str, next: Option<FlowState>) {
        match next {
            Some(state) => self.state = state,
            None => {
                debug_assert!(false, "illegal transition {} in {:?}", op, self.state);
            }
        }
    }
}
