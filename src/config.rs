use anyhow::{Context, Result};
use directories::ProjectDirs;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEMATCH_CONFIG_PATH").unwrap_or("/usr/local/etc/facematch/config.toml"))
});

pub static DEFAULT_MODELS_DIR: Lazy<PathBuf> = Lazy::new(|| {
    if let Some(dir) = option_env!("FACEMATCH_MODELS_DIR") {
        return PathBuf::from(dir);
    }
    ProjectDirs::from("", "", "facematch")
        .map(|dirs| dirs.data_dir().join("models"))
        .unwrap_or_else(|| PathBuf::from("models"))
});

/// How faces are located before they are encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DetectorBackend {
    /// YuNet face detector with landmark alignment
    Yunet,
    /// Encode the whole image as a single face
    Skip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub models_dir: PathBuf,
    pub detector: DetectorBackend,
    pub score_threshold: f32,
    pub nms_threshold: f32,
    /// File name suffixes accepted as candidate images, matched case-sensitively
    pub extensions: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            models_dir: DEFAULT_MODELS_DIR.to_path_buf(),
            detector: DetectorBackend::Yunet,
            score_threshold: 0.6,
            nms_threshold: 0.3,
            extensions: vec![".jpg".to_string(), ".jpeg".to_string(), ".png".to_string()],
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        log::debug!("no config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}
