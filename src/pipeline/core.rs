use crate::error::{StreamError, StreamResult};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Message delivered to a stage's input
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound<T> {
    /// A chunk to process
    Chunk(T),

    /// An upstream producer was piped into this stage
    PipeAttached { source: String },
}

/// Event produced on a stage's output
///
/// A closed output channel means the stage is finished.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput<T> {
    Data(T),
    Error(StreamError),
}

/// An opaque, running stage
///
/// A stage is anything that reads [`Inbound`] messages from its input channel
/// and writes [`StageOutput`] events to its output channel. Dropping every
/// sender of the input channel ends the stage's input; the stage signals it is
/// finished by dropping its output sender.
///
/// Build one from a [`Transform`] with [`StageHandle::spawn`], or wrap
/// hand-made channels with [`StageHandle::new`].
#[derive(Debug)]
pub struct StageHandle<T> {
    name: String,
    input: mpsc::Sender<Inbound<T>>,
    output: mpsc::Receiver<StageOutput<T>>,
}

impl<T> StageHandle<T> {
    pub fn new(
        name: impl Into<String>,
        input: mpsc::Sender<Inbound<T>>,
        output: mpsc::Receiver<StageOutput<T>>,
    ) -> Self {
        Self {
            name: name.into(),
            input,
            output,
        }
    }

    /// Get stage name for logging
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn into_parts(
        self,
    ) -> (
        String,
        mpsc::Sender<Inbound<T>>,
        mpsc::Receiver<StageOutput<T>>,
    ) {
        (self.name, self.input, self.output)
    }

    /// Write a chunk directly to this stage
    pub async fn write(&self, chunk: T) -> StreamResult<()> {
        self.input
            .send(Inbound::Chunk(chunk))
            .await
            .map_err(|_| StreamError::StageClosed(self.name.clone()))
    }

    /// Receive the next output event; `None` once the stage is finished
    pub async fn recv(&mut self) -> Option<StageOutput<T>> {
        self.output.recv().await
    }
}

/// Chunk transformation run inside a stage task
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use stream_connect::error::StreamResult;
/// use stream_connect::pipeline::Transform;
///
/// struct Upper;
///
/// #[async_trait]
/// impl Transform<String> for Upper {
///     fn name(&self) -> &str {
///         "upper"
///     }
///
///     async fn transform(&mut self, chunk: String) -> StreamResult<Vec<String>> {
///         Ok(vec![chunk.to_uppercase()])
///     }
/// }
/// ```
#[async_trait]
pub trait Transform<T: Send + 'static>: Send + 'static {
    /// Get stage name for logging and error reports
    fn name(&self) -> &str;

    /// Turn one input chunk into zero or more output chunks
    ///
    /// An `Err` is emitted on the stage's output as an error event. The stage
    /// keeps processing later chunks unless [`halt_on_error`](Self::halt_on_error)
    /// says otherwise.
    async fn transform(&mut self, chunk: T) -> StreamResult<Vec<T>>;

    /// Called once after the input ended; may emit trailing chunks
    async fn flush(&mut self) -> StreamResult<Vec<T>> {
        Ok(Vec::new())
    }

    /// Called when an upstream producer is piped into this stage
    fn pipe_attached(&mut self, _source: &str) {}

    /// Whether the stage stops after its first error
    fn halt_on_error(&self) -> bool {
        false
    }
}

/// A stage error as it surfaces on a composite stream
///
/// `error` is the value the stage emitted, untouched. `index` is the stage's
/// position in the pipeline (0 is the head).
#[derive(Debug, Clone, PartialEq)]
pub struct StageFailure {
    pub index: usize,
    pub stage: String,
    pub error: StreamError,
}

impl StageFailure {
    pub fn new(index: usize, stage: impl Into<String>, error: StreamError) -> Self {
        Self {
            index,
            stage: stage.into(),
            error,
        }
    }
}

impl std::fmt::Display for StageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stage {} ({}): {}", self.index, self.stage, self.error)
    }
}

impl std::error::Error for StageFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
