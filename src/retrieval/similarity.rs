//! Cosine similarity between embedding vectors.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimilarityError {
    #[error("degenerate vector: zero or non-finite norm")]
    DegenerateVector,

    #[error("dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },

    #[error("empty vector")]
    Empty,
}

/// Compute the cosine similarity of two vectors: dot(a, b) / (|a| |b|).
///
/// The result lies in [-1, 1]. A zero (or non-finite) norm on either side
/// is reported as [`SimilarityError::DegenerateVector`] rather than
/// producing NaN; callers are expected to skip such comparisons.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, SimilarityError> {
    if a.len() != b.len() {
        return Err(SimilarityError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    if a.is_empty() {
        return Err(SimilarityError::Empty);
    }

    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if !is_usable_norm(norm_a) || !is_usable_norm(norm_b) {
        return Err(SimilarityError::DegenerateVector);
    }

    // f64 accumulation; the clamp absorbs what rounding remains.
    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let score = dot / (norm_a * norm_b);
    if !score.is_finite() {
        return Err(SimilarityError::DegenerateVector);
    }
    Ok(score.clamp(-1.0, 1.0) as f32)
}

/// Whether `v` can take part in a similarity comparison at all.
pub fn is_degenerate(v: &[f32]) -> bool {
    v.is_empty() || !is_usable_norm(l2_norm(v))
}

fn l2_norm(v: &[f32]) -> f64 {
    v.iter().map(|x| *x as f64 * *x as f64).sum::<f64>().sqrt()
}

fn is_usable_norm(norm: f64) -> bool {
    norm.is_finite() && norm > 0.0
}
