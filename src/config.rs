use crate::error::{StreamError, StreamResult};
use serde::{Deserialize, Serialize};

/// Environment variable selecting the flow-control discipline (`paused` or `flowing`)
pub const ENV_FLOW: &str = "STREAM_CONNECT_FLOW";

/// Environment variable selecting the chunk mode (`bytes` or `object`)
pub const ENV_MODE: &str = "STREAM_CONNECT_MODE";

/// Environment variable overriding the per-channel buffer capacity
pub const ENV_CAPACITY: &str = "STREAM_CONNECT_CAPACITY";

/// Facade configuration, fixed for the lifetime of a `CompositeStream`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectConfig {
    /// Name used in logs and events
    pub name: String,

    /// Kind of chunks flowing through every stage
    pub mode: ChunkMode,

    /// How the facade drains the tail stage
    pub flow: FlowControl,

    /// Buffer capacity in chunks; `None` uses the mode default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<usize>,
}

/// Chunk mode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChunkMode {
    /// Raw byte sequences
    Bytes,

    /// Arbitrary structured values
    Object,
}

/// Flow-control discipline between the tail stage and the facade's consumer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    /// Pull from the tail only when the consumer polls. Backpressure is end to end.
    Paused,

    /// Drain the tail eagerly into an unbounded buffer. Backpressure stops at the tail.
    Flowing,
}

impl ChunkMode {
    /// Default number of chunks buffered per channel
    pub fn default_capacity(self) -> usize {
        match self {
            ChunkMode::Object => 16,
            ChunkMode::Bytes => 64,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChunkMode::Bytes => "bytes",
            ChunkMode::Object => "object",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bytes" => Some(ChunkMode::Bytes),
            "object" => Some(ChunkMode::Object),
            _ => None,
        }
    }
}

impl FlowControl {
    pub fn as_str(self) -> &'static str {
        match self {
            FlowControl::Paused => "paused",
            FlowControl::Flowing => "flowing",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "paused" => Some(FlowControl::Paused),
            "flowing" => Some(FlowControl::Flowing),
            _ => None,
        }
    }
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            name: "connected".to_string(),
            mode: ChunkMode::Object,
            flow: FlowControl::Paused,
            capacity: None,
        }
    }
}

impl ConnectConfig {
    /// Create a builder
    pub fn builder() -> ConnectConfigBuilder {
        ConnectConfigBuilder::new()
    }

    /// Effective buffer capacity in chunks
    pub fn capacity(&self) -> usize {
        self.capacity
            .unwrap_or_else(|| self.mode.default_capacity())
    }

    /// Load configuration from `STREAM_CONNECT_*` variables, falling back to defaults
    pub fn from_env() -> StreamResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> StreamResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = ConnectConfigBuilder::new();

        if let Some(flow) = lookup(ENV_FLOW) {
            let flow = FlowControl::from_str(&flow).ok_or_else(|| {
                StreamError::ConfigError(format!("{} must be 'paused' or 'flowing', got '{}'", ENV_FLOW, flow))
            })?;
            builder = builder.flow(flow);
        }

        if let Some(mode) = lookup(ENV_MODE) {
            let mode = ChunkMode::from_str(&mode).ok_or_else(|| {
                StreamError::ConfigError(format!("{} must be 'bytes' or 'object', got '{}'", ENV_MODE, mode))
            })?;
            builder = builder.mode(mode);
        }

        if let Some(capacity) = lookup(ENV_CAPACITY) {
            let capacity = capacity.trim().parse::<usize>().map_err(|e| {
                StreamError::ConfigError(format!("{} is not a valid capacity: {}", ENV_CAPACITY, e))
            })?;
            builder = builder.capacity(capacity);
        }

        builder.build()
    }
}

/// Builder for constructing ConnectConfig instances with a fluent API
///
/// # Example
/// ```
/// use stream_connect::{ChunkMode, ConnectConfig, FlowControl};
///
/// let config = ConnectConfig::builder()
///     .name("decode")
///     .mode(ChunkMode::Bytes)
///     .flow(FlowControl::Flowing)
///     .capacity(8)
///     .build()
///     .unwrap();
/// assert_eq!(config.capacity(), 8);
/// ```
#[derive(Debug, Default)]
pub struct ConnectConfigBuilder {
    name: Option<String>,
    mode: Option<ChunkMode>,
    flow: Option<FlowControl>,
    capacity: Option<usize>,
}

impl ConnectConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the facade name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the chunk mode
    pub fn mode(mut self, mode: ChunkMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Set the flow-control discipline
    pub fn flow(mut self, flow: FlowControl) -> Self {
        self.flow = Some(flow);
        self
    }

    /// Set the buffer capacity in chunks
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    /// Returns `ConfigError` if the capacity is zero or the name is empty.
    pub fn build(self) -> StreamResult<ConnectConfig> {
        let defaults = ConnectConfig::default();

        if self.capacity == Some(0) {
            return Err(StreamError::ConfigError(
                "capacity must be at least 1".to_string(),
            ));
        }

        let name = self.name.unwrap_or(defaults.name);
        if name.trim().is_empty() {
            return Err(StreamError::ConfigError("name cannot be empty".to_string()));
        }

        Ok(ConnectConfig {
            name,
            mode: self.mode.unwrap_or(defaults.mode),
            flow: self.flow.unwrap_or(defaults.flow),
            capacity: self.capacity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ConnectConfig::default();
        assert_eq!(config.mode, ChunkMode::Object);
        assert_eq!(config.flow, FlowControl::Paused);
        assert_eq!(config.capacity(), 16);
    }

    #[test]
    fn test_bytes_mode_capacity() {
        let config = ConnectConfig::builder().mode(ChunkMode::Bytes).build().unwrap();
        assert_eq!(config.capacity(), 64);
    }

    #[test]
    fn test_builder_rejects_zero_capacity() {
        let result = ConnectConfig::builder().capacity(0).build();
        assert!(matches!(result, Err(StreamError::ConfigError(_))));
    }

    #[test]
    fn test_builder_rejects_empty_name() {
        let result = ConnectConfig::builder().name("  ").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_from_lookup() {
        let config = ConnectConfig::from_lookup(lookup_from(&[
            (ENV_FLOW, "Flowing"),
            (ENV_MODE, "bytes"),
            (ENV_CAPACITY, "4"),
        ]))
        .unwrap();

        assert_eq!(config.flow, FlowControl::Flowing);
        assert_eq!(config.mode, ChunkMode::Bytes);
        assert_eq!(config.capacity(), 4);
    }

    #[test]
    fn test_from_lookup_empty_uses_defaults() {
        let config = ConnectConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, ConnectConfig::default());
    }

    #[test]
    fn test_from_lookup_invalid_values() {
        assert!(ConnectConfig::from_lookup(lookup_from(&[(ENV_FLOW, "sideways")])).is_err());
        assert!(ConnectConfig::from_lookup(lookup_from(&[(ENV_MODE, "text")])).is_err());
        assert!(ConnectConfig::from_lookup(lookup_from(&[(ENV_CAPACITY, "-1")])).is_err());
        assert!(ConnectConfig::from_lookup(lookup_from(&[(ENV_CAPACITY, "0")])).is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = ConnectConfig::builder()
            .flow(FlowControl::Flowing)
            .build()
            .unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"flowing\""));
        assert!(!json.contains("capacity"));

        let deserialized: ConnectConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }
}
