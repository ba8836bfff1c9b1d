use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Why an embedding could not be produced for one image
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("unknown model `{name}` (supported: {supported})")]
    UnknownModel { name: String, supported: String },

    #[error("failed to load {model} model: {error:#}")]
    ModelLoad { model: String, error: anyhow::Error },

    #[error("failed to read image {}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("no face detected in {}", path.display())]
    NoFace { path: PathBuf },

    #[error("face extraction failed for {}: {error:#}", path.display())]
    Extraction { path: PathBuf, error: anyhow::Error },
}

#[derive(Debug, Error)]
pub enum RankError {
    #[error("failed to list doubles directory {}: {source}", path.display())]
    ListDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("embedding for `{name}` has {actual} dimensions, subject has {expected}")]
    DimensionMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
}
