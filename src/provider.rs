use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::info;

use crate::config::{Config, DetectorBackend};
use crate::error::EmbedError;
use crate::{Embedding, ModelKind, Pipeline, PipelineOptions};

/// Source of face embeddings: image path + model name in, vector or failure out.
pub trait EmbeddingProvider {
    fn embed(&mut self, path: &Path, model_name: &str) -> Result<Embedding, EmbedError>;
}

/// ONNX Runtime backed provider.
///
/// Pipelines are built on first use of a model name and kept for the rest of the run.
pub struct OnnxProvider {
    models_dir: PathBuf,
    detect: bool,
    score_threshold: f32,
    nms_threshold: f32,
    pipelines: HashMap<ModelKind, Pipeline>,
}

impl OnnxProvider {
    pub fn new(cfg: &Config) -> Self {
        Self {
            models_dir: cfg.models_dir.clone(),
            detect: cfg.detector == DetectorBackend::Yunet,
            score_threshold: cfg.score_threshold,
            nms_threshold: cfg.nms_threshold,
            pipelines: HashMap::new(),
        }
    }

    fn pipeline(&mut self, model_name: &str) -> Result<&mut Pipeline, EmbedError> {
        let kind: ModelKind = model_name
            .parse()
            .map_err(|_| EmbedError::UnknownModel {
                name: model_name.to_string(),
                supported: ModelKind::supported_names(),
            })?;

        match self.pipelines.entry(kind) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => {
                info!("Loading {} model from {}", kind, self.models_dir.display());
                let opts = PipelineOptions {
                    models_dir: self.models_dir.clone(),
                    model: kind,
                    detect: self.detect,
                    score_threshold: self.score_threshold,
                    nms_threshold: self.nms_threshold,
                };
                let pipeline = Pipeline::new(&opts).map_err(|error| EmbedError::ModelLoad {
                    model: kind.to_string(),
                    error,
                })?;
                Ok(e.insert(pipeline))
            }
        }
    }
}

impl EmbeddingProvider for OnnxProvider {
    fn embed(&mut self, path: &Path, model_name: &str) -> Result<Embedding, EmbedError> {
        let pipeline = self.pipeline(model_name)?;

        let img = image::open(path).map_err(|source| EmbedError::Image {
            path: path.to_path_buf(),
            source,
        })?;

        let faces = pipeline
            .represent(&img)
            .map_err(|error| EmbedError::Extraction {
                path: path.to_path_buf(),
                error,
            })?;

        let best = faces.into_iter().next().ok_or_else(|| EmbedError::NoFace {
            path: path.to_path_buf(),
        })?;
        log::debug!(
            "{}: face at {:?} (confidence {:.3}), {} dims",
            path.display(),
            best.facial_area,
            best.face_confidence,
            best.embedding.len()
        );
        Ok(best.embedding)
    }
}
