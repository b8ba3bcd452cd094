//! The composite stream: one bidirectional facade over a wired pipeline
//!
//! Writes go to the head stage, reads come from the tail stage, and errors
//! from every stage surface on the read side as `Err(StageFailure)` items.
//! A failure is counted and published on the event channel as soon as its
//! stage reports it, whether or not anyone is reading.
//!
//! The read side ends once the tail finished and no stage can report a
//! failure any more.
//!
//! # Flow control
//!
//! The discipline is picked once, through [`ConnectConfig::flow`]:
//!
//! - [`FlowControl::Paused`] hands tail output over through a bounded buffer.
//!   Every channel in the chain is bounded, so a slow consumer eventually
//!   makes `write` wait.
//! - [`FlowControl::Flowing`] moves tail output into an unbounded buffer as
//!   soon as it is produced. Writers are never held back by the consumer; the
//!   buffer grows instead.

use crate::config::{ChunkMode, ConnectConfig, FlowControl};
use crate::error::{StreamError, StreamResult};
use crate::events::{EventEmitter, FacadeEvent};
use crate::pipeline::{
    spawn_stage, Inbound, Pipeline, StageFailure, StageHandle, StageOutput, Transform,
    WiredPipeline,
};
use crate::state_machine::{FacadeState, Lifecycle, Transition};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{Context, Poll};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Connect stages into a composite stream with the default configuration
///
/// # Errors
/// `InvalidPipeline` when fewer than 2 stages are given.
///
/// # Example
/// ```no_run
/// use stream_connect::connect;
/// use stream_connect::pipeline::{stages::PassThrough, StageHandle};
///
/// # async fn demo() -> stream_connect::error::StreamResult<()> {
/// let mut connected = connect(vec![
///     StageHandle::spawn(PassThrough::new("pass1")),
///     StageHandle::spawn(PassThrough::new("pass2")),
/// ])?;
///
/// connected.write("testing".to_string()).await?;
/// connected.end();
/// assert_eq!(connected.read().await.unwrap(), Some("testing".to_string()));
/// # Ok(())
/// # }
/// ```
pub fn connect<T: Send + 'static>(stages: Vec<StageHandle<T>>) -> StreamResult<CompositeStream<T>> {
    connect_with(ConnectConfig::default(), stages)
}

/// Connect stages with an explicit configuration
pub fn connect_with<T: Send + 'static>(
    config: ConnectConfig,
    stages: Vec<StageHandle<T>>,
) -> StreamResult<CompositeStream<T>> {
    let pipeline = Pipeline::try_from(stages).map_err(|e| {
        warn!(target: "pipeline", name = %config.name, error = %e, "refusing to connect");
        e
    })?;
    Ok(CompositeStream::from_pipeline(pipeline, config))
}

// ============================================================================
// Shared state
// ============================================================================

/// State shared by the writer and reader halves and the relay tasks
struct Shared {
    facade_id: Uuid,
    name: String,
    lifecycle: Lifecycle,
    links: Vec<JoinHandle<()>>,
    events: EventEmitter,
}

impl Shared {
    fn apply(&mut self, transition: Option<Transition>) {
        let Some(transition) = transition else {
            return;
        };
        debug!(
            target: "pipeline",
            facade = %self.facade_id,
            name = %self.name,
            from = %transition.from,
            to = %transition.to,
            "state changed"
        );
        self.events.state_changed(transition);
        if transition.to == FacadeState::Ended {
            self.teardown();
        }
    }

    /// Count a stage failure and publish it
    fn record_failure(&mut self, failure: &StageFailure) {
        if self.lifecycle.on_error() {
            debug!(target: "pipeline", facade = %self.facade_id, "first stage error");
        }
        self.events
            .stage_failed(failure.index, &failure.stage, &failure.error.to_string());
        warn!(
            target: "pipeline",
            facade = %self.facade_id,
            stage = %failure.stage,
            index = failure.index,
            error = %failure.error,
            "stage error surfaced"
        );
    }

    /// Release the task handles; runs once, on entering `Ended`
    fn teardown(&mut self) {
        let links = self.links.len();
        for link in self.links.drain(..) {
            link.abort();
        }
        info!(
            target: "pipeline",
            facade = %self.facade_id,
            name = %self.name,
            links,
            errors = self.lifecycle.error_count(),
            "composite stream finished"
        );
        self.events.finished(self.lifecycle.error_count());
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        for link in self.links.drain(..) {
            link.abort();
        }
    }
}

#[derive(Clone)]
struct SharedState(Arc<Mutex<Shared>>);

impl SharedState {
    fn lock(&self) -> StreamResult<MutexGuard<'_, Shared>> {
        Ok(self.0.lock()?)
    }

    // Nothing under this lock runs user code, so a poisoned guard is still consistent.
    fn lock_recovering(&self) -> MutexGuard<'_, Shared> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn downgrade(&self) -> WeakShared {
        WeakShared(Arc::downgrade(&self.0))
    }
}

/// Handle held by relay tasks; does not keep the facade alive
struct WeakShared(Weak<Mutex<Shared>>);

impl WeakShared {
    fn record_failure(&self, failure: &StageFailure) {
        if let Some(shared) = self.0.upgrade() {
            let mut shared = shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            shared.record_failure(failure);
        }
    }
}

// ============================================================================
// Writer half
// ============================================================================

/// Write side of a composite stream, bound to the head stage
pub struct CompositeWriter<T> {
    head: Option<mpsc::Sender<Inbound<T>>>,
    head_name: String,
    shared: SharedState,
}

impl<T: Send + 'static> CompositeWriter<T> {
    /// Forward a chunk to the head stage
    ///
    /// Returns once the head accepted the chunk into its input buffer; it does
    /// not wait for the chunk to reach the tail.
    ///
    /// # Errors
    /// `WriteAfterEnd` after [`end`](Self::end) or [`pipe_from`](Self::pipe_from),
    /// `StageClosed` when the head stage stopped reading its input.
    pub async fn write(&mut self, chunk: T) -> StreamResult<()> {
        {
            let mut shared = self.shared.lock()?;
            let transition = shared.lifecycle.on_write()?;
            shared.apply(transition);
        }

        let head = self.head.as_ref().ok_or(StreamError::WriteAfterEnd)?;
        head.send(Inbound::Chunk(chunk))
            .await
            .map_err(|_| StreamError::StageClosed(self.head_name.clone()))
    }

    /// Close the write side; the end cascades from the head to the tail
    ///
    /// Calling it again is a no-op.
    pub fn end(&mut self) {
        if self.head.take().is_some() {
            debug!(target: "pipeline", head = %self.head_name, "write side ended");
        }
        let mut shared = self.shared.lock_recovering();
        let transition = shared.lifecycle.on_end();
        shared.apply(transition);
    }

    /// Pipe an external producer into the head stage
    ///
    /// The head stage receives `Inbound::PipeAttached` exactly as if the
    /// producer had been piped into it directly, and every produced item is
    /// forwarded with the head's own backpressure. The write side belongs to
    /// the producer from now on and closes when the producer is exhausted.
    ///
    /// # Errors
    /// `WriteAfterEnd` if the write side is already closed, `StageClosed` if
    /// the head stopped reading.
    pub async fn pipe_from<S>(&mut self, source: impl Into<String>, producer: S) -> StreamResult<()>
    where
        S: Stream<Item = T> + Send + 'static,
    {
        let source = source.into();
        if !self.shared.lock()?.lifecycle.state().is_writable() {
            return Err(StreamError::WriteAfterEnd);
        }
        self.notify_pipe(&source).await?;

        let head = self.head.take().ok_or(StreamError::WriteAfterEnd)?;
        let forward = tokio::spawn(pipe_producer(
            source,
            self.head_name.clone(),
            head,
            producer,
        ));

        let mut shared = self.shared.lock()?;
        shared.links.push(forward);
        let transition = shared.lifecycle.on_end();
        shared.apply(transition);
        Ok(())
    }

    async fn notify_pipe(&self, source: &str) -> StreamResult<()> {
        let head = self.head.as_ref().ok_or(StreamError::WriteAfterEnd)?;
        head.send(Inbound::PipeAttached {
            source: source.to_string(),
        })
        .await
        .map_err(|_| StreamError::StageClosed(self.head_name.clone()))?;

        info!(target: "pipeline", %source, head = %self.head_name, "pipe attached");
        self.shared
            .lock_recovering()
            .events
            .pipe_attached(source, &self.head_name);
        Ok(())
    }
}

async fn pipe_producer<T, S>(
    source: String,
    head_name: String,
    head: mpsc::Sender<Inbound<T>>,
    producer: S,
) where
    T: Send + 'static,
    S: Stream<Item = T> + Send + 'static,
{
    let mut producer = Box::pin(producer);
    let mut piped: u64 = 0;

    while let Some(chunk) = producer.next().await {
        if head.send(Inbound::Chunk(chunk)).await.is_err() {
            warn!(target: "pipeline", %source, head = %head_name, piped, "head closed while piping");
            return;
        }
        piped += 1;
    }

    debug!(target: "pipeline", %source, head = %head_name, piped, "producer exhausted, ending head");
}

// ============================================================================
// Reader half
// ============================================================================

enum TailSink<T> {
    Paused(mpsc::Sender<T>),
    Flowing(mpsc::UnboundedSender<T>),
}

impl<T> TailSink<T> {
    /// Returns `false` once the reader is gone
    async fn send(&self, chunk: T) -> bool {
        match self {
            TailSink::Paused(tx) => tx.send(chunk).await.is_ok(),
            TailSink::Flowing(tx) => tx.send(chunk).is_ok(),
        }
    }
}

enum Readable<T> {
    Paused(mpsc::Receiver<T>),
    Flowing(mpsc::UnboundedReceiver<T>),
}

impl<T> Readable<T> {
    fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<T>> {
        match self {
            Readable::Paused(rx) => rx.poll_recv(cx),
            Readable::Flowing(rx) => rx.poll_recv(cx),
        }
    }
}

/// Record failures reported by the links and queue them for the reader
async fn relay_failures(
    mut reported: mpsc::UnboundedReceiver<StageFailure>,
    queue: mpsc::UnboundedSender<StageFailure>,
    shared: WeakShared,
) {
    while let Some(failure) = reported.recv().await {
        shared.record_failure(&failure);
        // Counted and published even when nobody reads any more.
        let _ = queue.send(failure);
    }
}

/// Split tail output into chunks for the reader and recorded failures
async fn relay_tail<T>(
    mut tail: mpsc::Receiver<StageOutput<T>>,
    sink: TailSink<T>,
    queue: mpsc::UnboundedSender<StageFailure>,
    tail_index: usize,
    tail_name: String,
    shared: WeakShared,
) {
    while let Some(event) = tail.recv().await {
        match event {
            StageOutput::Data(chunk) => {
                if !sink.send(chunk).await {
                    debug!(target: "pipeline", tail = %tail_name, "reader gone, releasing tail");
                    return;
                }
            }
            StageOutput::Error(error) => {
                let failure = StageFailure::new(tail_index, tail_name.clone(), error);
                shared.record_failure(&failure);
                let _ = queue.send(failure);
            }
        }
    }
    debug!(target: "pipeline", tail = %tail_name, "tail finished");
}

/// Read side of a composite stream, fed by the tail stage
///
/// Yields `Ok(chunk)` in tail order and `Err(StageFailure)` for every error any
/// stage reports. `None` means the tail finished and every stage is done.
pub struct CompositeReader<T> {
    readable: Readable<T>,
    readable_open: bool,
    failures: mpsc::UnboundedReceiver<StageFailure>,
    failures_open: bool,
    finished: bool,
    shared: SharedState,
}

// Only channel receivers and handles are held, never a `T` by value.
impl<T> Unpin for CompositeReader<T> {}

impl<T> CompositeReader<T> {
    fn record_data(&mut self) {
        let mut shared = self.shared.lock_recovering();
        let transition = shared.lifecycle.on_data();
        shared.apply(transition);
    }

    fn finish(&mut self) {
        self.finished = true;
        let mut shared = self.shared.lock_recovering();
        debug!(target: "pipeline", facade = %shared.facade_id, "read side ended");
        let transition = shared.lifecycle.on_read_finished();
        shared.apply(transition);
    }
}

impl<T: Send + 'static> CompositeReader<T> {
    /// Read the next chunk; `Ok(None)` once the read side ended
    ///
    /// # Errors
    /// The next stage failure, if one is pending. Reading may continue after it.
    pub async fn read(&mut self) -> Result<Option<T>, StageFailure> {
        self.next().await.transpose()
    }

    /// Read until the read side ends, keeping chunks and failures apart
    pub async fn collect_all(&mut self) -> (Vec<T>, Vec<StageFailure>) {
        let mut chunks = Vec::new();
        let mut failures = Vec::new();
        while let Some(item) = self.next().await {
            match item {
                Ok(chunk) => chunks.push(chunk),
                Err(failure) => failures.push(failure),
            }
        }
        (chunks, failures)
    }
}

impl<T> Stream for CompositeReader<T> {
    type Item = Result<T, StageFailure>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        if this.failures_open {
            match this.failures.poll_recv(cx) {
                Poll::Ready(Some(failure)) => return Poll::Ready(Some(Err(failure))),
                Poll::Ready(None) => this.failures_open = false,
                Poll::Pending => {}
            }
        }

        if this.readable_open {
            match this.readable.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => {
                    this.record_data();
                    return Poll::Ready(Some(Ok(chunk)));
                }
                Poll::Ready(None) => this.readable_open = false,
                Poll::Pending => return Poll::Pending,
            }
        }

        // The tail is done; upstream stages may still report failures.
        if this.failures_open {
            return Poll::Pending;
        }

        this.finish();
        Poll::Ready(None)
    }
}

// ============================================================================
// Facade
// ============================================================================

/// A pipeline of stages presented as one bidirectional stream
///
/// Created by [`connect`], [`connect_with`], the `connect!` macro or
/// [`CompositeStream::builder`]. Implements `Stream<Item = Result<T, StageFailure>>`.
pub struct CompositeStream<T> {
    id: Uuid,
    config: ConnectConfig,
    stage_names: Vec<String>,
    events: EventEmitter,
    writer: CompositeWriter<T>,
    reader: CompositeReader<T>,
}

impl<T> Unpin for CompositeStream<T> {}

impl<T: Send + 'static> CompositeStream<T> {
    /// Create a new connect builder
    pub fn builder() -> ConnectBuilder<T> {
        ConnectBuilder::new()
    }

    fn from_pipeline(pipeline: Pipeline<T>, config: ConnectConfig) -> Self {
        let wired = pipeline.wire();
        let id = Uuid::new_v4();
        let events = EventEmitter::new(id);

        let head_name = wired.head_name().to_string();
        let tail_name = wired.tail_name().to_string();
        let tail_index = wired.tail_index();
        let WiredPipeline {
            stage_names,
            head,
            tail,
            failures: reported,
            links,
        } = wired;

        info!(
            target: "pipeline",
            facade = %id,
            name = %config.name,
            stages = ?stage_names,
            mode = config.mode.as_str(),
            flow = config.flow.as_str(),
            "stages connected"
        );

        let shared = SharedState(Arc::new(Mutex::new(Shared {
            facade_id: id,
            name: config.name.clone(),
            lifecycle: Lifecycle::new(),
            links,
            events: events.clone(),
        })));

        let (sink, readable) = match config.flow {
            FlowControl::Paused => {
                let (tx, rx) = mpsc::channel(config.capacity());
                (TailSink::Paused(tx), Readable::Paused(rx))
            }
            FlowControl::Flowing => {
                let (tx, rx) = mpsc::unbounded_channel();
                (TailSink::Flowing(tx), Readable::Flowing(rx))
            }
        };

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let relays = [
            tokio::spawn(relay_failures(reported, queue_tx.clone(), shared.downgrade())),
            tokio::spawn(relay_tail(
                tail,
                sink,
                queue_tx,
                tail_index,
                tail_name,
                shared.downgrade(),
            )),
        ];
        shared.lock_recovering().links.extend(relays);

        Self {
            id,
            config,
            stage_names,
            events,
            writer: CompositeWriter {
                head: Some(head),
                head_name,
                shared: shared.clone(),
            },
            reader: CompositeReader {
                readable,
                readable_open: true,
                failures: queue_rx,
                failures_open: true,
                finished: false,
                shared,
            },
        }
    }
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ConnectConfig {
        &self.config
    }

    pub fn mode(&self) -> ChunkMode {
        self.config.mode
    }

    pub fn flow(&self) -> FlowControl {
        self.config.flow
    }

    /// Stage names in data-flow order
    pub fn stage_names(&self) -> &[String] {
        &self.stage_names
    }

    pub fn stage_count(&self) -> usize {
        self.stage_names.len()
    }

    pub fn state(&self) -> FacadeState {
        self.reader.shared.lock_recovering().lifecycle.state()
    }

    pub fn is_errored(&self) -> bool {
        self.reader.shared.lock_recovering().lifecycle.is_errored()
    }

    /// Number of stage errors surfaced so far
    pub fn error_count(&self) -> usize {
        self.reader.shared.lock_recovering().lifecycle.error_count()
    }

    /// Link tasks still registered on the pipeline
    pub fn active_links(&self) -> usize {
        self.reader.shared.lock_recovering().links.len()
    }

    /// Subscribe to lifecycle notifications
    pub fn subscribe(&self) -> broadcast::Receiver<FacadeEvent> {
        self.events.subscribe()
    }

    /// See [`CompositeWriter::write`]
    pub async fn write(&mut self, chunk: T) -> StreamResult<()> {
        self.writer.write(chunk).await
    }

    /// See [`CompositeWriter::end`]
    pub fn end(&mut self) {
        self.writer.end()
    }

    /// See [`CompositeWriter::pipe_from`]
    pub async fn pipe_from<S>(&mut self, source: impl Into<String>, producer: S) -> StreamResult<()>
    where
        S: Stream<Item = T> + Send + 'static,
    {
        self.writer.pipe_from(source, producer).await
    }

    /// See [`CompositeReader::read`]
    pub async fn read(&mut self) -> Result<Option<T>, StageFailure> {
        self.reader.read().await
    }

    /// See [`CompositeReader::collect_all`]
    pub async fn collect_all(&mut self) -> (Vec<T>, Vec<StageFailure>) {
        self.reader.collect_all().await
    }

    /// Split into halves that can be driven from different tasks
    pub fn split(self) -> (CompositeWriter<T>, CompositeReader<T>) {
        (self.writer, self.reader)
    }

    /// Turn this composite stream into a stage of another pipeline
    ///
    /// Inner stage failures become error events of the returned stage, with
    /// the unchanged error value.
    pub fn into_stage(self) -> StageHandle<T> {
        let capacity = self.config.capacity();
        let name = self.config.name.clone();
        let (input_tx, mut input_rx) = mpsc::channel::<Inbound<T>>(capacity);
        let (output_tx, output_rx) = mpsc::channel(capacity);
        let (mut writer, mut reader) = self.split();

        let stage_name = name.clone();
        tokio::spawn(async move {
            while let Some(message) = input_rx.recv().await {
                let result = match message {
                    Inbound::Chunk(chunk) => writer.write(chunk).await,
                    Inbound::PipeAttached { source } => writer.notify_pipe(&source).await,
                };
                if let Err(e) = result {
                    warn!(target: "pipeline", stage = %stage_name, error = %e, "nested write failed");
                    break;
                }
            }
            writer.end();
        });

        tokio::spawn(async move {
            while let Some(item) = reader.next().await {
                let event = match item {
                    Ok(chunk) => StageOutput::Data(chunk),
                    Err(failure) => StageOutput::Error(failure.error),
                };
                if output_tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        StageHandle::new(name, input_tx, output_rx)
    }
}

impl<T> Stream for CompositeStream<T> {
    type Item = Result<T, StageFailure>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().reader).poll_next(cx)
    }
}

// ============================================================================
// Builder
// ============================================================================

enum PendingStage<T> {
    Running(StageHandle<T>),
    Deferred(Box<dyn FnOnce(usize) -> StageHandle<T> + Send>),
}

/// Builder for composite streams
///
/// Stages added with [`transform`](Self::transform) are spawned at `build()`
/// time with the configured capacity.
///
/// # Example
/// ```no_run
/// use stream_connect::{CompositeStream, ConnectConfig, FlowControl};
/// use stream_connect::pipeline::stages::PassThrough;
///
/// # async fn demo() -> stream_connect::error::StreamResult<()> {
/// let connected = CompositeStream::<String>::builder()
///     .config(ConnectConfig::builder().flow(FlowControl::Flowing).build()?)
///     .transform(PassThrough::new("pass1"))
///     .transform(PassThrough::new("pass2"))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ConnectBuilder<T> {
    config: ConnectConfig,
    stages: Vec<PendingStage<T>>,
}

impl<T: Send + 'static> ConnectBuilder<T> {
    pub fn new() -> Self {
        Self {
            config: ConnectConfig::default(),
            stages: Vec::new(),
        }
    }

    /// Set the facade configuration
    pub fn config(mut self, config: ConnectConfig) -> Self {
        self.config = config;
        self
    }

    /// Add an already running stage
    pub fn stage(mut self, stage: StageHandle<T>) -> Self {
        self.stages.push(PendingStage::Running(stage));
        self
    }

    /// Add a transform, spawned with the configured capacity at build time
    pub fn transform<S: Transform<T>>(mut self, transform: S) -> Self {
        self.stages.push(PendingStage::Deferred(Box::new(move |capacity| {
            spawn_stage(transform, capacity)
        })));
        self
    }

    /// Build the composite stream
    ///
    /// # Errors
    /// `InvalidPipeline` when fewer than 2 stages were added.
    pub fn build(self) -> StreamResult<CompositeStream<T>> {
        if self.stages.len() < 2 {
            return Err(StreamError::InvalidPipeline(self.stages.len()));
        }

        let capacity = self.config.capacity();
        let stages = self
            .stages
            .into_iter()
            .map(|pending| match pending {
                PendingStage::Running(stage) => stage,
                PendingStage::Deferred(spawn) => spawn(capacity),
            })
            .collect();

        connect_with(self.config, stages)
    }
}

impl<T: Send + 'static> Default for ConnectBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stages::{MapStage, PassThrough};
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn pass(name: &str) -> StageHandle<String> {
        spawn_stage(PassThrough::new(name), 4)
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_write_then_read_in_order() {
        let mut connected = connect(vec![pass("a"), pass("b")]).unwrap();
        assert_eq!(connected.stage_count(), 2);
        assert_eq!(connected.state(), FacadeState::Idle);

        for chunk in ["a", "b", "c"] {
            connected.write(chunk.to_string()).await.unwrap();
        }
        connected.end();

        let (chunks, failures) = timeout(WAIT, connected.collect_all()).await.unwrap();
        assert_eq!(chunks, strings(&["a", "b", "c"]));
        assert!(failures.is_empty());
        assert_eq!(connected.state(), FacadeState::Ended);
    }

    #[tokio::test]
    async fn test_connect_rejects_single_stage() {
        let result = connect(vec![pass("lonely")]);
        assert!(matches!(result, Err(StreamError::InvalidPipeline(1))));

        let result = CompositeStream::<String>::builder().build();
        assert!(matches!(result, Err(StreamError::InvalidPipeline(0))));
    }

    #[tokio::test]
    async fn test_write_after_end() {
        let mut connected = connect(vec![pass("a"), pass("b")]).unwrap();
        connected.end();
        connected.end();

        let err = connected.write("late".to_string()).await.unwrap_err();
        assert_eq!(err, StreamError::WriteAfterEnd);
        assert_eq!(connected.state(), FacadeState::Ending);
    }

    #[tokio::test]
    async fn test_read_after_end_of_output() {
        let mut connected = connect(vec![pass("a"), pass("b")]).unwrap();
        connected.end();

        assert_eq!(timeout(WAIT, connected.read()).await.unwrap(), Ok(None));
        assert_eq!(timeout(WAIT, connected.read()).await.unwrap(), Ok(None));
    }

    #[tokio::test]
    async fn test_state_events() {
        let mut connected = connect(vec![pass("a"), pass("b")]).unwrap();
        let mut events = connected.subscribe();

        connected.write("x".to_string()).await.unwrap();
        connected.end();
        timeout(WAIT, connected.collect_all()).await.unwrap();

        let mut names = Vec::new();
        let mut states = Vec::new();
        while let Ok(event) = events.try_recv() {
            names.push(event.name());
            if let FacadeEvent::StateChanged { to, .. } = event {
                states.push(to);
            }
        }

        assert_eq!(
            states,
            vec![FacadeState::Flowing, FacadeState::Ending, FacadeState::Ended]
        );
        assert_eq!(names.last(), Some(&crate::events::event_names::FINISHED));
    }

    #[tokio::test]
    async fn test_tail_error_is_tagged_with_tail_index() {
        let tail = spawn_stage(
            MapStage::new("tail", |s: String, n| {
                if n == 1 {
                    Err(StreamError::InvalidChunk(s))
                } else {
                    Ok(s)
                }
            }),
            4,
        );
        let mut connected = connect(vec![pass("head"), tail]).unwrap();

        connected.write("bad".to_string()).await.unwrap();
        connected.write("good".to_string()).await.unwrap();
        connected.end();

        let failure = timeout(WAIT, connected.read()).await.unwrap().unwrap_err();
        assert_eq!(failure.index, 1);
        assert_eq!(failure.stage, "tail");
        assert_eq!(failure.error, StreamError::InvalidChunk("bad".to_string()));

        let (chunks, _) = timeout(WAIT, connected.collect_all()).await.unwrap();
        assert_eq!(chunks, strings(&["good"]));
        assert!(connected.is_errored());
        assert_eq!(connected.error_count(), 1);
    }

    #[tokio::test]
    async fn test_paused_mode_applies_backpressure() {
        let config = ConnectConfig::builder().capacity(1).build().unwrap();
        let mut connected = CompositeStream::<u32>::builder()
            .config(config)
            .transform(PassThrough::new("a"))
            .transform(PassThrough::new("b"))
            .build()
            .unwrap();

        // Nobody reads, so the bounded chain fills up and a write has to wait.
        let writes = async {
            for n in 0..100u32 {
                connected.write(n).await.unwrap();
            }
        };
        assert!(timeout(Duration::from_millis(200), writes).await.is_err());
    }

    #[tokio::test]
    async fn test_flowing_mode_drains_tail() {
        let config = ConnectConfig::builder()
            .capacity(1)
            .flow(FlowControl::Flowing)
            .build()
            .unwrap();
        let mut connected = CompositeStream::<u32>::builder()
            .config(config)
            .transform(PassThrough::new("a"))
            .transform(PassThrough::new("b"))
            .build()
            .unwrap();
        assert_eq!(connected.flow(), FlowControl::Flowing);

        let writes = async {
            for n in 0..100u32 {
                connected.write(n).await.unwrap();
            }
        };
        timeout(WAIT, writes).await.unwrap();
        connected.end();

        let (chunks, _) = timeout(WAIT, connected.collect_all()).await.unwrap();
        assert_eq!(chunks, (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_links_torn_down_when_both_sides_end() {
        let mut connected = connect(vec![pass("a"), pass("b"), pass("c")]).unwrap();
        // Two stage links plus the failure and tail relays.
        assert_eq!(connected.active_links(), 4);

        connected.end();
        timeout(WAIT, connected.collect_all()).await.unwrap();
        assert_eq!(connected.active_links(), 0);
    }

    #[tokio::test]
    async fn test_tail_finishing_early_waits_for_upstream() {
        let tail = spawn_stage(
            MapStage::new("strict", |_: String, _| {
                Err(StreamError::stage_failed("strict", "rejects everything"))
            })
            .stop_on_error(),
            4,
        );
        let mut connected = connect(vec![pass("head"), tail]).unwrap();

        connected.write("x".to_string()).await.unwrap();
        let failure = timeout(WAIT, connected.read()).await.unwrap().unwrap_err();
        assert_eq!(failure.index, 1);

        // The head can still fail, so the read side stays open.
        assert!(timeout(Duration::from_millis(100), connected.read())
            .await
            .is_err());
        assert_eq!(connected.state(), FacadeState::Flowing);

        connected.end();
        assert_eq!(timeout(WAIT, connected.read()).await.unwrap(), Ok(None));
        assert_eq!(connected.state(), FacadeState::Ended);
        assert_eq!(connected.active_links(), 0);
    }

    #[tokio::test]
    async fn test_failures_recorded_without_reading() {
        let middle = spawn_stage(
            MapStage::new("picky", |s: String, _| Err(StreamError::InvalidChunk(s))),
            4,
        );
        let mut connected = connect(vec![pass("head"), middle, pass("tail")]).unwrap();
        let mut events = connected.subscribe();

        connected.write("nope".to_string()).await.unwrap();

        let failed = timeout(WAIT, async {
            loop {
                match events.recv().await {
                    Ok(FacadeEvent::StageFailed { stage_index, .. }) => break stage_index,
                    Ok(_) => continue,
                    Err(e) => panic!("event channel closed: {e}"),
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(failed, 1);
        assert!(connected.is_errored());
        assert_eq!(connected.error_count(), 1);
    }

    #[tokio::test]
    async fn test_split_halves() {
        let connected = connect(vec![pass("a"), pass("b")]).unwrap();
        let (mut writer, mut reader) = connected.split();

        let producer = tokio::spawn(async move {
            for n in 0..50 {
                writer.write(n.to_string()).await.unwrap();
            }
            writer.end();
        });

        let (chunks, failures) = timeout(WAIT, reader.collect_all()).await.unwrap();
        producer.await.unwrap();
        assert_eq!(chunks.len(), 50);
        assert_eq!(chunks[49], "49");
        assert!(failures.is_empty());
    }
}
