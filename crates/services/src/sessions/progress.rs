use ladico_core::model::{Session, SessionModelError};
use ladico_core::scoring::{self, FinalizeInput};
use serde::Serialize;

/// Aggregated view of session progress, useful for UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionProgress {
    pub total: usize,
    pub answered: usize,
    pub remaining: usize,
    pub correct: u32,
    pub percentage: u8,
    pub is_complete: bool,
}

impl SessionProgress {
    #[must_use]
    pub fn from_session(session: &Session) -> Self {
        Self::from_answers(session.answers(), session.is_completed())
    }

    fn from_answers(answers: &[Option<bool>], is_complete: bool) -> Self {
        let points = scoring::points_from_answers(answers);
        let answered = answers.iter().filter(|slot| slot.is_some()).count();
        Self {
            total: answers.len(),
            answered,
            remaining: answers.len().saturating_sub(answered),
            correct: scoring::total_points(&points),
            percentage: scoring::percentage(&points),
            is_complete,
        }
    }
}

/// Progress kept on the client only.
///
/// Lets an exercise keep scoring when no remote session could be ensured;
/// the arithmetic is the same as remote finalisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalProgress {
    answers: Vec<Option<bool>>,
}

impl LocalProgress {
    /// # Errors
    ///
    /// Returns `SessionModelError::NoQuestions` if `total` is zero.
    pub fn new(total: u32) -> Result<Self, SessionModelError> {
        if total == 0 {
            return Err(SessionModelError::NoQuestions);
        }
        Ok(Self {
            answers: vec![None; total as usize],
        })
    }

    /// Record (or revise) the outcome of one question.
    ///
    /// # Errors
    ///
    /// Returns `SessionModelError::InvalidIndex` if `index` is out of range.
    pub fn record(&mut self, index: usize, correct: bool) -> Result<(), SessionModelError> {
        let count = u32::try_from(self.answers.len()).unwrap_or(u32::MAX);
        let slot = self
            .answers
            .get_mut(index)
            .ok_or(SessionModelError::InvalidIndex { index, count })?;
        *slot = Some(correct);
        Ok(())
    }

    #[must_use]
    pub fn answers(&self) -> &[Option<bool>] {
        &self.answers
    }

    /// Complete once every question has an outcome.
    #[must_use]
    pub fn progress(&self) -> SessionProgress {
        let all_answered = self.answers.iter().all(Option::is_some);
        SessionProgress::from_answers(&self.answers, all_answered)
    }

    /// Inputs for `finalize_session` once a remote session is available.
    #[must_use]
    pub fn finalize_input(&self, pass_min: u32) -> FinalizeInput {
        let points = scoring::points_from_answers(&self.answers);
        FinalizeInput {
            correct_count: scoring::total_points(&points),
            total: u32::try_from(self.answers.len()).unwrap_or(u32::MAX),
            pass_min,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ladico_core::scoring::final_score;

    #[test]
    fn local_progress_tracks_answers() {
        let mut local = LocalProgress::new(3).unwrap();
        local.record(0, true).unwrap();
        local.record(1, false).unwrap();
        let partial = local.progress();
        assert_eq!(partial.answered, 2);
        assert_eq!(partial.remaining, 1);
        assert!(!partial.is_complete);

        local.record(2, true).unwrap();
        let done = local.progress();
        assert!(done.is_complete);
        assert_eq!(done.correct, 2);
        assert_eq!(done.percentage, 67);
    }

    #[test]
    fn revising_an_answer_overwrites() {
        let mut local = LocalProgress::new(2).unwrap();
        local.record(0, false).unwrap();
        local.record(0, true).unwrap();
        assert_eq!(local.answers(), &[Some(true), None]);
    }

    #[test]
    fn out_of_range_index_fails() {
        let mut local = LocalProgress::new(2).unwrap();
        assert_eq!(
            local.record(2, true),
            Err(SessionModelError::InvalidIndex { index: 2, count: 2 })
        );
    }

    #[test]
    fn local_percentage_matches_final_score() {
        let mut local = LocalProgress::new(3).unwrap();
        local.record(0, true).unwrap();
        local.record(1, false).unwrap();
        local.record(2, true).unwrap();
        let remote = final_score(local.finalize_input(2)).unwrap();
        assert_eq!(remote.score, local.progress().percentage);
        assert!(remote.passed);
    }
}
