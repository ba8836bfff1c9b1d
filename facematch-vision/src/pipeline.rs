use std::path::PathBuf;

use anyhow::{Context, Result};
use image::{DynamicImage, GenericImageView};
use ort::session::Session;

use crate::face::{self, Embedding};
use crate::model::{self, ModelKind};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub models_dir: PathBuf,
    pub model: ModelKind,
    /// Locate faces with YuNet before encoding; when false the whole image is encoded
    pub detect: bool,
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

/// One face found in an image
#[derive(Debug, Clone)]
pub struct Representation {
    pub embedding: Embedding,
    /// x, y, w, h in source image pixels
    pub facial_area: [f32; 4],
    pub face_confidence: f32,
}

/// Full pipeline: detect faces → align → encode
pub struct Pipeline {
    detector: Option<Session>,
    encoder: Session,
    model: ModelKind,
    score_threshold: f32,
    nms_threshold: f32,
}

impl Pipeline {
    pub fn new(opts: &PipelineOptions) -> Result<Self> {
        let detector = if opts.detect {
            Some(model::detector_session(&opts.models_dir)?)
        } else {
            None
        };
        Ok(Self {
            detector,
            encoder: model::embedding_session(&opts.models_dir, opts.model)?,
            model: opts.model,
            score_threshold: opts.score_threshold,
            nms_threshold: opts.nms_threshold,
        })
    }

    pub fn model(&self) -> ModelKind {
        self.model
    }

    /// Embed every face in `img`, highest detector confidence first.
    ///
    /// An empty result means no face passed the score threshold.
    pub fn represent(&mut self, img: &DynamicImage) -> Result<Vec<Representation>> {
        let spec = self.model.spec();

        let Some(detector) = self.detector.as_mut() else {
            let (w, h) = img.dimensions();
            let embedding =
                face::encode_face(&mut self.encoder, img, &spec).context("encoding image")?;
            return Ok(vec![Representation {
                embedding,
                facial_area: [0.0, 0.0, w as f32, h as f32],
                face_confidence: 0.0,
            }]);
        };

        let detections =
            face::detect_faces(detector, img, self.score_threshold, self.nms_threshold)
                .context("detecting faces")?;

        detections
            .into_iter()
            .map(|detection| {
                let face_img = face::align_face(img, &detection, spec.input_size)
                    .context("aligning face")?;
                let embedding = face::encode_face(&mut self.encoder, &face_img, &spec)
                    .context("encoding face")?;
                Ok(Representation {
                    embedding,
                    facial_area: detection.bbox,
                    face_confidence: detection.score,
                })
            })
            .collect()
    }
}
