use std::fs;
use std::path::{Path, PathBuf};

use log::{error, info, warn};

use crate::error::RankError;
use crate::provider::EmbeddingProvider;
use crate::ranking::{self, RankingEntry};
use crate::Embedding;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub subject_path: PathBuf,
    pub doubles_path: PathBuf,
    pub model_name: String,
    /// Log progress and the final ranking
    pub verbose: bool,
    /// Accepted candidate file name suffixes, case-sensitive
    pub extensions: Vec<String>,
}

/// Result of one ranking run
#[derive(Debug, Clone, PartialEq)]
pub enum RankOutcome {
    /// Doubles sorted by similarity, most similar first; never empty
    Ranked(Vec<RankingEntry>),
    /// The subject was embedded but no double could be scored
    Empty,
    /// The subject image produced no embedding, so nothing was compared
    SubjectUnavailable { reason: String },
}

impl RankOutcome {
    /// The ranking, empty unless the run produced one
    pub fn entries(&self) -> &[RankingEntry] {
        match self {
            RankOutcome::Ranked(entries) => entries,
            _ => &[],
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            RankOutcome::Ranked(_) => "ranked",
            RankOutcome::Empty => "empty",
            RankOutcome::SubjectUnavailable { .. } => "subject_unavailable",
        }
    }
}

/// Candidate images in `dir`, in file name order.
///
/// Only regular files whose name ends with one of `extensions` are returned.
pub fn list_candidates(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>, RankError> {
    let list_err = |source| RankError::ListDirectory {
        path: dir.to_path_buf(),
        source,
    };

    let mut candidates = Vec::new();
    for entry in fs::read_dir(dir).map_err(list_err)? {
        let entry = entry.map_err(list_err)?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            warn!("Skipping non UTF-8 file name {:?}", file_name);
            continue;
        };
        if !extensions.iter().any(|ext| name.ends_with(ext.as_str())) {
            continue;
        }
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        candidates.push(path);
    }

    candidates.sort();
    Ok(candidates)
}

/// Embed every candidate image in `dir`; images that fail are logged and left out.
pub fn doubles_embeddings<P: EmbeddingProvider + ?Sized>(
    provider: &mut P,
    dir: &Path,
    model_name: &str,
    extensions: &[String],
) -> Result<Vec<(String, Embedding)>, RankError> {
    let mut embeddings = Vec::new();
    for path in list_candidates(dir, extensions)? {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match provider.embed(&path, model_name) {
            Ok(embedding) => embeddings.push((name, embedding)),
            Err(e) => error!("Error getting embedding for double image {}: {}", name, e),
        }
    }
    Ok(embeddings)
}

/// Rank the doubles in `opts.doubles_path` by similarity to the subject image.
pub fn run<P: EmbeddingProvider + ?Sized>(
    provider: &mut P,
    opts: &RunOptions,
) -> Result<RankOutcome, RankError> {
    if opts.verbose {
        info!(
            "Getting the embedding for the subject image: {}",
            opts.subject_path.display()
        );
    }
    let subject = match provider.embed(&opts.subject_path, &opts.model_name) {
        Ok(embedding) => embedding,
        Err(e) => {
            error!("Error getting embedding for subject image: {}", e);
            return Ok(RankOutcome::SubjectUnavailable {
                reason: e.to_string(),
            });
        }
    };

    if opts.verbose {
        info!(
            "Getting the embeddings for the doubles images in: {}",
            opts.doubles_path.display()
        );
    }
    let doubles = doubles_embeddings(
        provider,
        &opts.doubles_path,
        &opts.model_name,
        &opts.extensions,
    )?;

    if opts.verbose {
        for (name, _) in &doubles {
            info!("Calculating similarity for double: {}", name);
        }
    }
    let rankings = ranking::rank(&subject, &doubles)?;

    if rankings.is_empty() {
        if opts.verbose {
            info!("No doubles could be ranked");
        }
        return Ok(RankOutcome::Empty);
    }

    if opts.verbose {
        info!("Doubles images sorted by similarity to the subject image:");
        for entry in &rankings {
            info!("{}: {}", entry.name, entry.score);
        }
    }
    Ok(RankOutcome::Ranked(rankings))
}
