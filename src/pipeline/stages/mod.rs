//! Ready-made stages
//!
//! - PassThrough - Forward every chunk unchanged
//! - MapStage - Apply a fallible closure to every chunk

pub mod map;
pub mod passthrough;

// Re-export stages
pub use map::MapStage;
pub use passthrough::PassThrough;
