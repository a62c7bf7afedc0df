use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    /// New commands are dropped, in-flight ones finish.
    Draining,
    Stopped,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Phase::Running,
            1 => Phase::Draining,
            _ => Phase::Stopped,
        }
    }
}

/// Process-wide lifecycle shared by the HTTP layer, the signal handler and
/// request handling. Phases only ever move forward.
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    phase: Arc<AtomicU8>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn is_draining(&self) -> bool {
        self.phase() != Phase::Running
    }

    /// Returns true if this call moved the process out of `Running`.
    pub fn begin_draining(&self) -> bool {
        self.advance(Phase::Draining)
    }

    pub fn mark_stopped(&self) -> bool {
        self.advance(Phase::Stopped)
    }

    fn advance(&self, to: Phase) -> bool {
        let to = to as u8;
        self.phase.fetch_max(to, Ordering::AcqRel) < to
    }
}
