use serde::Serialize;

use crate::error::RankError;
use crate::Embedding;

/// One double and how closely it resembles the subject
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingEntry {
    pub name: String,
    pub score: f32,
}

/// Cosine similarity of two embeddings of the same length
pub fn cosine_similarity(a: &Embedding, b: &Embedding) -> Option<f32> {
    (a.len() == b.len()).then(|| facematch_vision::face::cosine_similarity(a, b))
}

/// Score every candidate against `subject` and sort, most similar first.
///
/// Candidates with equal scores keep their input order.
pub fn rank(
    subject: &Embedding,
    candidates: &[(String, Embedding)],
) -> Result<Vec<RankingEntry>, RankError> {
    let mut entries = candidates
        .iter()
        .map(|(name, embedding)| {
            let score = cosine_similarity(subject, embedding).ok_or_else(|| {
                RankError::DimensionMismatch {
                    name: name.clone(),
                    expected: subject.len(),
                    actual: embedding.len(),
                }
            })?;
            Ok(RankingEntry {
                name: name.clone(),
                score,
            })
        })
        .collect::<Result<Vec<_>, RankError>>()?;

    // stable sort
    entries.sort_by(|a, b| b.score.total_cmp(&a.score));
    Ok(entries)
}
