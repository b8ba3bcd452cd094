/// Lifecycle state machine for composite streams
///
/// The facade's lifecycle is an explicit value rather than a set of flags
/// scattered over event callbacks. Link teardown happens exactly once, on the
/// transition into `Ended`.
///
/// # States
///
/// - `Idle` - Connected, nothing written or read yet
/// - `Flowing` - Chunks are moving
/// - `Ending` - Write side closed, tail still producing
/// - `Ended` - Both sides finished
///
/// `errored` is tracked independently: a pipeline can be `Flowing` and
/// `errored` at the same time, since stage errors never stop the pipeline.
///
/// # Example
///
/// ```
/// use stream_connect::state_machine::{FacadeState, Lifecycle};
///
/// let mut lifecycle = Lifecycle::new();
/// lifecycle.on_write().unwrap();
/// assert_eq!(lifecycle.state(), FacadeState::Flowing);
///
/// lifecycle.on_end();
/// lifecycle.on_read_finished();
/// assert_eq!(lifecycle.state(), FacadeState::Ended);
/// ```
pub mod states;
pub mod transitions;

pub use states::*;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifecycle {
    state: FacadeState,
    errored: bool,
    error_count: usize,
    write_finished: bool,
    read_finished: bool,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> FacadeState {
        self.state
    }

    pub fn is_errored(&self) -> bool {
        self.errored
    }

    /// Number of stage errors observed so far
    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn is_write_finished(&self) -> bool {
        self.write_finished
    }

    pub fn is_read_finished(&self) -> bool {
        self.read_finished
    }
}
