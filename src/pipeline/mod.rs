//! Stages and the wiring that chains them
//!
//! A stage is an opaque running unit with an input channel and an output
//! channel ([`StageHandle`]). [`Pipeline`] holds two or more stages in data-flow
//! order, and [`wire`] links each stage's output to the next stage's input with
//! one forwarding task per pair.
//!
//! # Example
//! ```no_run
//! use stream_connect::pipeline::{stages::PassThrough, wire, Inbound, StageHandle};
//!
//! # async fn demo() -> stream_connect::error::StreamResult<()> {
//! let wired = wire(vec![
//!     StageHandle::<String>::spawn(PassThrough::new("pass1")),
//!     StageHandle::spawn(PassThrough::new("pass2")),
//! ])?;
//!
//! assert_eq!(wired.head_name(), "pass1");
//! assert_eq!(wired.tail_name(), "pass2");
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod executor;
pub mod stages;
pub mod wiring;

// Re-export main types
pub use self::core::{Inbound, StageFailure, StageHandle, StageOutput, Transform};
pub use executor::spawn_stage;
pub use wiring::{wire, Pipeline, WiredPipeline};
