use crate::error::StreamResult;
use crate::pipeline::Transform;
use async_trait::async_trait;

/// Stage that applies a fallible closure to every chunk
///
/// The closure gets the chunk's 1-based position, which makes "fail on the
/// n-th chunk" stages easy to write.
///
/// # Example
/// ```
/// use stream_connect::pipeline::stages::MapStage;
///
/// let upper = MapStage::new("upper", |s: String, _n| Ok(s.to_uppercase()));
/// ```
pub struct MapStage<F> {
    name: String,
    seen: u64,
    halt_on_error: bool,
    f: F,
}

impl<F> MapStage<F> {
    /// Create a new map stage
    pub fn new<T>(name: impl Into<String>, f: F) -> Self
    where
        F: FnMut(T, u64) -> StreamResult<T>,
    {
        Self {
            name: name.into(),
            seen: 0,
            halt_on_error: false,
            f,
        }
    }

    /// Stop the stage after the first error
    pub fn stop_on_error(mut self) -> Self {
        self.halt_on_error = true;
        self
    }
}

#[async_trait]
impl<T, F> Transform<T> for MapStage<F>
where
    T: Send + 'static,
    F: FnMut(T, u64) -> StreamResult<T> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn transform(&mut self, chunk: T) -> StreamResult<Vec<T>> {
        self.seen += 1;
        (self.f)(chunk, self.seen).map(|mapped| vec![mapped])
    }

    fn halt_on_error(&self) -> bool {
        self.halt_on_error
    }
}
