use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use ort::{
    ep::{self, ExecutionProvider},
    session::{
        builder::{GraphOptimizationLevel, SessionBuilder},
        Session,
    },
};

pub const DETECTOR_MODEL_FILE: &str = "face_detection_yunet_2023mar.onnx";

/// Face recognition models understood by the pipeline, named the way users pass them on the
/// command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    VggFace,
    Facenet,
    Facenet512,
    ArcFace,
    SFace,
}

/// Plane order of the input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

/// How 0..255 pixel values are mapped before inference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PixelNorm {
    /// Values stay in 0..255
    Raw,
    /// Subtract a per-plane mean, given in tensor plane order
    MeanSubtract([f32; 3]),
    /// `(x - offset) / scale`
    Affine { offset: f32, scale: f32 },
    /// Per-image standardisation over every value of the tensor
    Prewhiten,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelSpec {
    pub file_name: &'static str,
    /// Square input edge in pixels
    pub input_size: u32,
    pub channels: ChannelOrder,
    pub norm: PixelNorm,
}

impl ModelKind {
    pub const ALL: [ModelKind; 5] = [
        ModelKind::VggFace,
        ModelKind::Facenet,
        ModelKind::Facenet512,
        ModelKind::ArcFace,
        ModelKind::SFace,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ModelKind::VggFace => "VGG-Face",
            ModelKind::Facenet => "Facenet",
            ModelKind::Facenet512 => "Facenet512",
            ModelKind::ArcFace => "ArcFace",
            ModelKind::SFace => "SFace",
        }
    }

    pub fn spec(self) -> ModelSpec {
        match self {
            ModelKind::VggFace => ModelSpec {
                file_name: "vgg_face.onnx",
                input_size: 224,
                channels: ChannelOrder::Bgr,
                norm: PixelNorm::MeanSubtract([93.5940, 104.7624, 129.1863]),
            },
            ModelKind::Facenet => ModelSpec {
                file_name: "facenet.onnx",
                input_size: 160,
                channels: ChannelOrder::Rgb,
                norm: PixelNorm::Prewhiten,
            },
            ModelKind::Facenet512 => ModelSpec {
                file_name: "facenet512.onnx",
                input_size: 160,
                channels: ChannelOrder::Rgb,
                norm: PixelNorm::Prewhiten,
            },
            ModelKind::ArcFace => ModelSpec {
                file_name: "arcface.onnx",
                input_size: 112,
                channels: ChannelOrder::Rgb,
                norm: PixelNorm::Affine {
                    offset: 127.5,
                    scale: 128.0,
                },
            },
            ModelKind::SFace => ModelSpec {
                file_name: "face_recognition_sface_2021dec.onnx",
                input_size: 112,
                channels: ChannelOrder::Bgr,
                norm: PixelNorm::Raw,
            },
        }
    }

    /// Comma separated list of every accepted model name
    pub fn supported_names() -> String {
        Self::ALL
            .iter()
            .map(|k| k.name())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "unknown model `{}` (supported: {})",
                    s,
                    Self::supported_names()
                )
            })
    }
}

pub fn session_builder() -> Result<SessionBuilder> {
    let mut builder =
        Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    #[cfg(feature = "openvino")]
    {
        let ep = ep::OpenVINO::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    #[cfg(feature = "cuda")]
    {
        let ep = ep::CUDA::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
        }
    }

    Ok(builder)
}

fn load_session(path: &Path) -> Result<Session> {
    if !path.is_file() {
        anyhow::bail!("model file not found: {}", path.display());
    }
    log::debug!("loading onnx model {}", path.display());
    session_builder()?
        .commit_from_file(path)
        .with_context(|| format!("load model {}", path.display()))
}

pub fn embedding_session(models_dir: &Path, kind: ModelKind) -> Result<Session> {
    load_session(&models_dir.join(kind.spec().file_name))
        .with_context(|| format!("load {} recognition model", kind))
}

pub fn detector_session(models_dir: &Path) -> Result<Session> {
    load_session(&models_dir.join(DETECTOR_MODEL_FILE)).context("load detector model")
}
