/// State transition implementations
///
/// Every event the facade observes goes through one of these methods. A
/// method returns the `Transition` it caused, or `None` when the event did
/// not change the state, which makes repeated `end()` calls and late events
/// after `Ended` harmless.
use super::states::{FacadeState, Transition};
use super::Lifecycle;
use crate::error::{StreamError, StreamResult};

impl Lifecycle {
    fn move_to(&mut self, to: FacadeState) -> Option<Transition> {
        if self.state == to {
            return None;
        }
        let transition = Transition::new(self.state, to);
        self.state = to;
        Some(transition)
    }

    // ============================================================================
    // Write Side
    // ============================================================================

    /// A chunk is about to be written
    ///
    /// # Errors
    /// `WriteAfterEnd` once the write side is closed.
    pub fn on_write(&mut self) -> StreamResult<Option<Transition>> {
        if self.write_finished || !self.state.is_writable() {
            return Err(StreamError::WriteAfterEnd);
        }
        Ok(match self.state {
            FacadeState::Idle => self.move_to(FacadeState::Flowing),
            _ => None,
        })
    }

    /// The write side was closed, by `end()` or by handing it to a piped producer
    pub fn on_end(&mut self) -> Option<Transition> {
        if self.write_finished {
            return None;
        }
        self.write_finished = true;
        if self.read_finished {
            self.move_to(FacadeState::Ended)
        } else {
            self.move_to(FacadeState::Ending)
        }
    }

    // ============================================================================
    // Read Side
    // ============================================================================

    /// The tail produced a chunk
    pub fn on_data(&mut self) -> Option<Transition> {
        match self.state {
            FacadeState::Idle => self.move_to(FacadeState::Flowing),
            _ => None,
        }
    }

    /// The tail finished; no chunk will ever arrive again
    pub fn on_read_finished(&mut self) -> Option<Transition> {
        if self.read_finished {
            return None;
        }
        self.read_finished = true;
        if self.write_finished {
            self.move_to(FacadeState::Ended)
        } else {
            // Tail ended before the writer did; upstream stages are left alone.
            None
        }
    }

    // ============================================================================
    // Errors
    // ============================================================================

    /// A stage reported an error. Returns `true` for the first one.
    pub fn on_error(&mut self) -> bool {
        self.error_count += 1;
        let first = !self.errored;
        self.errored = true;
        first
    }
}
