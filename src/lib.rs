pub mod config;
pub mod driver;
pub mod error;
pub mod provider;
pub mod ranking;

pub use driver::{run, RankOutcome, RunOptions};
pub use error::{EmbedError, RankError};
pub use provider::{EmbeddingProvider, OnnxProvider};
pub use ranking::RankingEntry;

// Re-export vision types for convenience
pub use facematch_vision::{Embedding, ModelKind, Pipeline, PipelineOptions, Representation};
