//! Ranking of vector-store matches.
//!
//! Stores return candidates in whatever order their index produces. Every
//! caller goes through [`rank_matches`] so results are reproducible:
//!
//! 1. score, descending;
//! 2. `sequence_index`, ascending;
//! 3. `document_id`, ascending.
//!
//! [`select_top`] applies the score floor and the `top_k` cut after ranking.

use std::cmp::Ordering;

use crate::models::ChunkMatch;

/// Sort matches into the canonical result order.
pub fn rank_matches(matches: &mut [ChunkMatch]) {
    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.sequence_index.cmp(&b.sequence_index))
            .then_with(|| a.document_id.cmp(&b.document_id))
    });
}

/// Rank, drop matches scoring below `min_score`, and keep the best `top_k`.
pub fn select_top(mut matches: Vec<ChunkMatch>, top_k: usize, min_score: f32) -> Vec<ChunkMatch> {
    matches.retain(|m| m.score.is_finite() && m.score >= min_score);
    rank_matches(&mut matches);
    matches.truncate(top_k);
    matches
}

/// Similarity as shown to viewers: `max(0, score) × 100`, one decimal place.
pub fn similarity_percent(score: f32) -> f32 {
    (score.max(0.0) * 1000.0).round() / 10.0
}
