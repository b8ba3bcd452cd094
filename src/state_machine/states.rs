use serde::{Deserialize, Serialize};

/// Lifecycle states of a composite stream
///
/// `Idle -> Flowing -> Ending -> Ended`. The `errored` flag on
/// [`Lifecycle`](super::Lifecycle) is orthogonal to these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FacadeState {
    /// Connected, nothing written or read yet
    Idle,

    /// Chunks are moving through the pipeline
    Flowing,

    /// Write side closed, waiting for the tail to finish
    Ending,

    /// Both sides finished, links torn down
    Ended,
}

impl FacadeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FacadeState::Idle => "Idle",
            FacadeState::Flowing => "Flowing",
            FacadeState::Ending => "Ending",
            FacadeState::Ended => "Ended",
        }
    }

    /// Whether the write side still accepts chunks
    pub fn is_writable(&self) -> bool {
        matches!(self, FacadeState::Idle | FacadeState::Flowing)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FacadeState::Ended)
    }
}

impl Default for FacadeState {
    fn default() -> Self {
        FacadeState::Idle
    }
}

impl std::fmt::Display for FacadeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change, reported so callers can log and emit it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: FacadeState,
    pub to: FacadeState,
}

impl Transition {
    pub fn new(from: FacadeState, to: FacadeState) -> Self {
        Self { from, to }
    }
}
