//! Connect an ordered chain of async stages into a single bidirectional stream.
//!
//! Writing to the [`CompositeStream`] feeds the first stage, reading from it
//! yields what the last stage produces, and every stage's errors surface on
//! the read side.
//!
//! ```no_run
//! use stream_connect::pipeline::{stages::PassThrough, StageHandle};
//!
//! # async fn demo() -> stream_connect::error::StreamResult<()> {
//! let mut connected = stream_connect::connect!(
//!     StageHandle::spawn(PassThrough::new("pass1")),
//!     StageHandle::spawn(PassThrough::new("pass2")),
//! )?;
//!
//! connected.write("testing".to_string()).await?;
//! connected.end();
//! while let Some(chunk) = connected.read().await.ok().flatten() {
//!     println!("{chunk}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod composite;
pub mod config;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod state_machine;

pub use composite::{
    connect, connect_with, CompositeReader, CompositeStream, CompositeWriter, ConnectBuilder,
};
pub use config::{ChunkMode, ConnectConfig, FlowControl};
pub use error::{StreamError, StreamResult};
pub use events::FacadeEvent;
pub use pipeline::{spawn_stage, StageFailure, StageHandle, Transform};
pub use state_machine::FacadeState;

/// Connect two or more stage handles, in data-flow order
///
/// Expands to [`connect`]`(vec![...])`.
#[macro_export]
macro_rules! connect {
    ($($stage:expr),+ $(,)?) => {
        $crate::connect(vec![$($stage),+])
    };
}

/// Install a `tracing` subscriber filtered by `RUST_LOG`
///
/// Defaults to `pipeline=info` when `RUST_LOG` is unset. Calling it more
/// than once, or after another subscriber was installed, does nothing.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pipeline=info"));

    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
    {
        tracing::debug!(target: "pipeline", "tracing initialized");
    }
}
