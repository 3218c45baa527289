//! Progress scoring shared by local progress display and remote finalisation.
//!
//! Everything here is pure integer arithmetic so both paths agree to the point.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ScoreError {
    #[error("total must be at least 1")]
    NoQuestions,

    #[error("correct count ({correct}) exceeds total ({total})")]
    CorrectExceedsTotal { correct: u32, total: u32 },
}

/// Inputs reported by an exercise when it finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeInput {
    pub correct_count: u32,
    pub total: u32,
    pub pass_min: u32,
}

/// Result written onto a completed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalScore {
    /// Rounded percentage, 0..=100.
    pub score: u8,
    pub passed: bool,
}

/// Sum of per-question points.
#[must_use]
pub fn total_points(points: &[u8]) -> u32 {
    points.iter().map(|p| u32::from(*p)).sum()
}

#[must_use]
pub fn is_passed(points: &[u8], pass_min: u32) -> bool {
    total_points(points) >= pass_min
}

/// `round(sum / len * 100)`; an empty list scores 0.
#[must_use]
pub fn percentage(points: &[u8]) -> u8 {
    rounded_percent(u64::from(total_points(points)), points.len() as u64)
}

/// Map answer slots to points: correct is 1, incorrect and unanswered are 0.
#[must_use]
pub fn points_from_answers(answers: &[Option<bool>]) -> Vec<u8> {
    answers
        .iter()
        .map(|slot| u8::from(matches!(slot, Some(true))))
        .collect()
}

/// Score a finished attempt.
///
/// # Errors
///
/// Returns `ScoreError` if `total` is zero or `correct_count` exceeds it.
pub fn final_score(input: FinalizeInput) -> Result<FinalScore, ScoreError> {
    if input.total == 0 {
        return Err(ScoreError::NoQuestions);
    }
    if input.correct_count > input.total {
        return Err(ScoreError::CorrectExceedsTotal {
            correct: input.correct_count,
            total: input.total,
        });
    }
    Ok(FinalScore {
        score: rounded_percent(u64::from(input.correct_count), u64::from(input.total)),
        passed: input.correct_count >= input.pass_min,
    })
}

// Half rounds up, matching the percentage shown to users.
fn rounded_percent(part: u64, whole: u64) -> u8 {
    if whole == 0 {
        return 0;
    }
    let pct = (part * 200 + whole) / (whole * 2);
    u8::try_from(pct.min(100)).unwrap_or(100)
}
