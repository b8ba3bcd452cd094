use super::core::{Inbound, StageHandle, StageOutput, Transform};
use crate::config::ChunkMode;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Run a transform in its own tokio task and return its handle
///
/// Both the input and the output channel hold at most `capacity` chunks, so a
/// stage whose consumer is slow stops pulling input. Must be called from
/// within a tokio runtime.
///
/// # Example
/// ```no_run
/// use stream_connect::pipeline::{spawn_stage, stages::PassThrough};
///
/// # async fn demo() {
/// let stage = spawn_stage::<String, _>(PassThrough::new("pass"), 16);
/// stage.write("testing".to_string()).await.unwrap();
/// # }
/// ```
pub fn spawn_stage<T, S>(stage: S, capacity: usize) -> StageHandle<T>
where
    T: Send + 'static,
    S: Transform<T>,
{
    let capacity = capacity.max(1);
    let name = stage.name().to_string();
    let (input_tx, input_rx) = mpsc::channel(capacity);
    let (output_tx, output_rx) = mpsc::channel(capacity);

    tokio::spawn(run_stage(stage, input_rx, output_tx));

    StageHandle::new(name, input_tx, output_rx)
}

impl<T: Send + 'static> StageHandle<T> {
    /// Spawn a transform with the default object-mode capacity
    pub fn spawn<S: Transform<T>>(stage: S) -> Self {
        spawn_stage(stage, ChunkMode::Object.default_capacity())
    }
}

/// Stage task body: transform every chunk, flush at end of input
async fn run_stage<T, S>(
    mut stage: S,
    mut input: mpsc::Receiver<Inbound<T>>,
    output: mpsc::Sender<StageOutput<T>>,
) where
    T: Send + 'static,
    S: Transform<T>,
{
    let mut processed: u64 = 0;

    while let Some(message) = input.recv().await {
        match message {
            Inbound::PipeAttached { source } => {
                debug!(target: "pipeline::stage", stage = stage.name(), %source, "pipe attached");
                stage.pipe_attached(&source);
            }
            Inbound::Chunk(chunk) => {
                processed += 1;
                match stage.transform(chunk).await {
                    Ok(chunks) => {
                        if !emit_all(&output, chunks).await {
                            debug!(target: "pipeline::stage", stage = stage.name(), "output closed, stopping");
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(target: "pipeline::stage", stage = stage.name(), chunk = processed, error = %e, "transform failed");
                        if output.send(StageOutput::Error(e)).await.is_err() {
                            return;
                        }
                        if stage.halt_on_error() {
                            debug!(target: "pipeline::stage", stage = stage.name(), "halting after error");
                            return;
                        }
                    }
                }
            }
        }
    }

    match stage.flush().await {
        Ok(chunks) => {
            emit_all(&output, chunks).await;
        }
        Err(e) => {
            warn!(target: "pipeline::stage", stage = stage.name(), error = %e, "flush failed");
            let _ = output.send(StageOutput::Error(e)).await;
        }
    }

    debug!(target: "pipeline::stage", stage = stage.name(), processed, "stage finished");
}

/// Returns `false` once the output receiver is gone
async fn emit_all<T>(output: &mpsc::Sender<StageOutput<T>>, chunks: Vec<T>) -> bool {
    for chunk in chunks {
        if output.send(StageOutput::Data(chunk)).await.is_err() {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{StreamError, StreamResult};
    use async_trait::async_trait;

    // Test stage that splits strings on whitespace and counts what it saw
    struct SplitStage;

    #[async_trait]
    impl Transform<String> for SplitStage {
        fn name(&self) -> &str {
            "split"
        }

        async fn transform(&mut self, chunk: String) -> StreamResult<Vec<String>> {
            Ok(chunk.split_whitespace().map(str::to_string).collect())
        }

        async fn flush(&mut self) -> StreamResult<Vec<String>> {
            Ok(vec!["<eof>".to_string()])
        }
    }

    // Test stage that fails on odd numbers
    struct RejectOdd {
        halt: bool,
    }

    #[async_trait]
    impl Transform<u32> for RejectOdd {
        fn name(&self) -> &str {
            "reject-odd"
        }

        async fn transform(&mut self, chunk: u32) -> StreamResult<Vec<u32>> {
            if chunk % 2 == 1 {
                Err(StreamError::InvalidChunk(chunk.to_string()))
            } else {
                Ok(vec![chunk])
            }
        }

        fn halt_on_error(&self) -> bool {
            self.halt
        }
    }

    #[tokio::test]
    async fn test_one_to_many_and_flush() {
        let stage = spawn_stage(SplitStage, 8);
        assert_eq!(stage.name(), "split");

        stage.write("a b".to_string()).await.unwrap();
        let (_, input, mut output) = stage.into_parts();
        drop(input);

        let mut seen = Vec::new();
        while let Some(event) = output.recv().await {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                StageOutput::Data("a".to_string()),
                StageOutput::Data("b".to_string()),
                StageOutput::Data("<eof>".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_error_does_not_stop_stage() {
        let mut stage = spawn_stage(RejectOdd { halt: false }, 8);
        for n in [2, 3, 4] {
            stage.write(n).await.unwrap();
        }

        assert_eq!(stage.recv().await, Some(StageOutput::Data(2)));
        assert_eq!(
            stage.recv().await,
            Some(StageOutput::Error(StreamError::InvalidChunk("3".to_string())))
        );
        assert_eq!(stage.recv().await, Some(StageOutput::Data(4)));
    }

    #[tokio::test]
    async fn test_halt_on_error_closes_output() {
        let mut stage = spawn_stage(RejectOdd { halt: true }, 8);
        stage.write(1).await.unwrap();

        assert!(matches!(stage.recv().await, Some(StageOutput::Error(_))));
        assert_eq!(stage.recv().await, None);
    }
}
