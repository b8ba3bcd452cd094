use super::core::{Inbound, StageFailure, StageHandle, StageOutput};
use crate::error::{StreamError, StreamResult};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// An ordered chain of at least two stages
///
/// Order is fixed at construction: stage `i` feeds stage `i + 1`.
///
/// # Example
/// ```no_run
/// use stream_connect::pipeline::{stages::PassThrough, Pipeline, StageHandle};
///
/// # async fn demo() {
/// let pipeline = Pipeline::new(
///     StageHandle::<String>::spawn(PassThrough::new("decode")),
///     StageHandle::spawn(PassThrough::new("parse")),
/// )
/// .then(StageHandle::spawn(PassThrough::new("render")));
///
/// assert_eq!(pipeline.len(), 3);
/// # }
/// ```
#[derive(Debug)]
pub struct Pipeline<T> {
    first: StageHandle<T>,
    second: StageHandle<T>,
    rest: Vec<StageHandle<T>>,
}

impl<T> Pipeline<T> {
    /// Create a two-stage pipeline
    pub fn new(first: StageHandle<T>, second: StageHandle<T>) -> Self {
        Self {
            first,
            second,
            rest: Vec::new(),
        }
    }

    /// Append a stage after the current tail
    pub fn then(mut self, stage: StageHandle<T>) -> Self {
        self.rest.push(stage);
        self
    }

    /// Get the number of stages
    pub fn len(&self) -> usize {
        2 + self.rest.len()
    }

    /// Always `false`: a pipeline holds at least two stages
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Stage names in data-flow order
    pub fn stage_names(&self) -> Vec<&str> {
        [&self.first, &self.second]
            .into_iter()
            .chain(self.rest.iter())
            .map(|s| s.name())
            .collect()
    }
}

impl<T> TryFrom<Vec<StageHandle<T>>> for Pipeline<T> {
    type Error = StreamError;

    fn try_from(stages: Vec<StageHandle<T>>) -> StreamResult<Self> {
        let count = stages.len();
        let mut stages = stages.into_iter();
        match (stages.next(), stages.next()) {
            (Some(first), Some(second)) => Ok(Self {
                first,
                second,
                rest: stages.collect(),
            }),
            _ => Err(StreamError::InvalidPipeline(count)),
        }
    }
}

/// A pipeline whose stages are linked head to tail
///
/// Holds what the facade binds to: the head's input, the tail's output, the
/// failures reported by every non-tail stage, and the link tasks.
#[derive(Debug)]
pub struct WiredPipeline<T> {
    pub(crate) stage_names: Vec<String>,
    pub(crate) head: mpsc::Sender<Inbound<T>>,
    pub(crate) tail: mpsc::Receiver<StageOutput<T>>,
    pub(crate) failures: mpsc::UnboundedReceiver<StageFailure>,
    pub(crate) links: Vec<JoinHandle<()>>,
}

impl<T> WiredPipeline<T> {
    pub fn stage_names(&self) -> &[String] {
        &self.stage_names
    }

    pub fn head_name(&self) -> &str {
        &self.stage_names[0]
    }

    pub fn tail_name(&self) -> &str {
        &self.stage_names[self.stage_names.len() - 1]
    }

    /// Index of the tail stage
    pub fn tail_index(&self) -> usize {
        self.stage_names.len() - 1
    }

    /// Number of link tasks, one per adjacent pair
    pub fn link_count(&self) -> usize {
        self.links.len()
    }
}

/// Link every stage's output to the next stage's input
///
/// # Errors
/// `InvalidPipeline` when fewer than 2 stages are given. Nothing is spawned in
/// that case.
pub fn wire<T: Send + 'static>(stages: Vec<StageHandle<T>>) -> StreamResult<WiredPipeline<T>> {
    Ok(Pipeline::try_from(stages)?.wire())
}

impl<T: Send + 'static> Pipeline<T> {
    /// Spawn one forwarding link per adjacent pair of stages
    ///
    /// Must be called from within a tokio runtime.
    pub fn wire(self) -> WiredPipeline<T> {
        let Pipeline {
            first,
            second,
            rest,
        } = self;
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();

        let (head_name, head, mut upstream) = first.into_parts();
        let mut stage_names = vec![head_name];
        let mut links = Vec::with_capacity(1 + rest.len());

        for (index, stage) in std::iter::once(second).chain(rest).enumerate() {
            let (name, input, output) = stage.into_parts();
            let link = Link {
                index,
                name: stage_names[index].clone(),
                next_name: name.clone(),
                failures: failure_tx.clone(),
            };
            links.push(tokio::spawn(link.run(upstream, input)));
            stage_names.push(name);
            upstream = output;
        }

        debug!(
            target: "pipeline::wiring",
            stages = ?stage_names,
            links = links.len(),
            "pipeline wired"
        );

        WiredPipeline {
            stage_names,
            head,
            tail: upstream,
            failures: failure_rx,
            links,
        }
    }
}

/// Forwarding link from stage `index` to stage `index + 1`
struct Link {
    index: usize,
    name: String,
    next_name: String,
    failures: mpsc::UnboundedSender<StageFailure>,
}

impl Link {
    /// Forward data downstream and errors to the facade until `output` closes
    ///
    /// Returning drops `next`, which ends the downstream stage's input.
    async fn run<T: Send + 'static>(
        self,
        mut output: mpsc::Receiver<StageOutput<T>>,
        next: mpsc::Sender<Inbound<T>>,
    ) {
        let mut downstream_open = true;
        let mut forwarded: u64 = 0;

        while let Some(event) = output.recv().await {
            match event {
                StageOutput::Data(chunk) => {
                    if !downstream_open {
                        continue;
                    }
                    if next.send(Inbound::Chunk(chunk)).await.is_ok() {
                        forwarded += 1;
                        continue;
                    }
                    // Keep draining so later errors from this stage still surface.
                    downstream_open = false;
                    warn!(
                        target: "pipeline::wiring",
                        stage = %self.name,
                        next = %self.next_name,
                        "downstream stage stopped accepting input, dropping its chunks"
                    );
                }
                StageOutput::Error(error) => {
                    self.report(error);
                }
            }
        }

        debug!(
            target: "pipeline::wiring",
            stage = %self.name,
            index = self.index,
            forwarded,
            "stage output finished, ending next stage"
        );
    }

    fn report(&self, error: StreamError) {
        warn!(
            target: "pipeline::wiring",
            stage = %self.name,
            index = self.index,
            error = %error,
            "stage error"
        );
        // The facade may already be gone; nothing left to notify then.
        let _ = self.failures.send(StageFailure::new(self.index, self.name.clone(), error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stages::{MapStage, PassThrough};
    use crate::pipeline::spawn_stage;

    fn pass(name: &str) -> StageHandle<String> {
        spawn_stage(PassThrough::new(name), 4)
    }

    #[tokio::test]
    async fn test_wire_rejects_short_pipelines() {
        let err = wire::<String>(Vec::new()).unwrap_err();
        assert_eq!(err, StreamError::InvalidPipeline(0));

        let err = wire(vec![pass("only")]).unwrap_err();
        assert_eq!(err, StreamError::InvalidPipeline(1));
    }

    #[tokio::test]
    async fn test_wire_links_head_to_tail() {
        let mut wired = wire(vec![pass("a"), pass("b"), pass("c")]).unwrap();
        assert_eq!(wired.head_name(), "a");
        assert_eq!(wired.tail_name(), "c");
        assert_eq!(wired.tail_index(), 2);
        assert_eq!(wired.link_count(), 2);

        for chunk in ["x", "y", "z"] {
            wired.head.send(Inbound::Chunk(chunk.to_string())).await.unwrap();
        }

        for expected in ["x", "y", "z"] {
            assert_eq!(
                wired.tail.recv().await,
                Some(StageOutput::Data(expected.to_string()))
            );
        }
    }

    #[tokio::test]
    async fn test_end_cascades_to_tail() {
        let WiredPipeline { head, mut tail, .. } =
            wire(vec![pass("a"), pass("b"), pass("c")]).unwrap();

        head.send(Inbound::Chunk("last".to_string())).await.unwrap();
        drop(head);

        assert_eq!(tail.recv().await, Some(StageOutput::Data("last".to_string())));
        assert_eq!(tail.recv().await, None);
    }

    #[tokio::test]
    async fn test_upstream_errors_go_to_failures() {
        let failing = spawn_stage(
            MapStage::new("picky", |s: String, _| {
                if s == "bad" {
                    Err(StreamError::InvalidChunk(s))
                } else {
                    Ok(s)
                }
            }),
            4,
        );
        let mut wired = wire(vec![failing, pass("tail")]).unwrap();

        wired.head.send(Inbound::Chunk("bad".to_string())).await.unwrap();
        wired.head.send(Inbound::Chunk("good".to_string())).await.unwrap();

        let failure = wired.failures.recv().await.unwrap();
        assert_eq!(failure.index, 0);
        assert_eq!(failure.stage, "picky");
        assert_eq!(failure.error, StreamError::InvalidChunk("bad".to_string()));

        assert_eq!(wired.tail.recv().await, Some(StageOutput::Data("good".to_string())));
    }

    #[tokio::test]
    async fn test_halted_stage_reports_only_its_own_error() {
        let halting = spawn_stage(
            MapStage::new("mid", |s: String, n| {
                if n == 2 {
                    Err(StreamError::stage_failed("mid", s))
                } else {
                    Ok(s)
                }
            })
            .stop_on_error(),
            1,
        );
        let WiredPipeline {
            head,
            tail: _tail,
            mut failures,
            ..
        } = wire(vec![
            spawn_stage(PassThrough::new("head"), 1),
            halting,
            spawn_stage(PassThrough::new("tail"), 1),
        ])
        .unwrap();

        for chunk in ["a", "b", "c", "d", "e", "f"] {
            head.send(Inbound::Chunk(chunk.to_string())).await.unwrap();
        }
        drop(head);

        let mut reported = Vec::new();
        while let Some(failure) = failures.recv().await {
            reported.push(failure);
        }
        assert_eq!(
            reported,
            vec![StageFailure::new(1, "mid", StreamError::stage_failed("mid", "b"))]
        );
    }

    #[tokio::test]
    async fn test_pipeline_builder_order() {
        let pipeline = Pipeline::new(pass("one"), pass("two")).then(pass("three"));
        assert_eq!(pipeline.len(), 3);
        assert!(!pipeline.is_empty());
        assert_eq!(pipeline.stage_names(), vec!["one", "two", "three"]);
    }
}
