use crate::error::StreamResult;
use crate::pipeline::Transform;
use async_trait::async_trait;
use tracing::debug;

/// Stage that forwards every chunk unchanged
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
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PassThrough {
    name: String,
}

impl PassThrough {
    /// Create a new pass-through stage
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for PassThrough {
    fn default() -> Self {
        Self::new("pass-through")
    }
}

#[async_trait]
impl<T: Send + 'static> Transform<T> for PassThrough {
    fn name(&self) -> &str {
        &self.name
    }

    async fn transform(&mut self, chunk: T) -> StreamResult<Vec<T>> {
        Ok(vec![chunk])
    }

    fn pipe_attached(&mut self, source: &str) {
        debug!(target: "pipeline::stage", stage = %self.name, %source, "pass-through piped");
    }
}
