use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{SessionId, SessionKey};
use crate::scoring::{self, FinalScore};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionModelError {
    #[error("question count must be at least 1")]
    NoQuestions,

    #[error("answers length ({len}) does not match question count ({count})")]
    AnswerCountMismatch { len: usize, count: u32 },

    #[error("ended_at is before started_at")]
    InvalidTimeRange,

    #[error("score out of range: {0}")]
    ScoreOutOfRange(u8),

    #[error("score recorded on a session that has not ended")]
    ResultWithoutEnd,

    #[error("question index {index} out of range for {count} questions")]
    InvalidIndex { index: usize, count: u32 },
}

/// A session that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    key: SessionKey,
    question_count: u32,
    started_at: DateTime<Utc>,
}

impl NewSession {
    /// # Errors
    ///
    /// Returns `SessionModelError::NoQuestions` if `question_count` is zero.
    pub fn new(
        key: SessionKey,
        question_count: u32,
        started_at: DateTime<Utc>,
    ) -> Result<Self, SessionModelError> {
        if question_count == 0 {
            return Err(SessionModelError::NoQuestions);
        }
        Ok(Self {
            key,
            question_count,
            started_at,
        })
    }

    #[must_use]
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    #[must_use]
    pub fn question_count(&self) -> u32 {
        self.question_count
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// All-unanswered slots, one per question.
    #[must_use]
    pub fn initial_answers(&self) -> Vec<Option<bool>> {
        vec![None; self.question_count as usize]
    }

    /// Attach the id the store assigned on insert.
    #[must_use]
    pub fn into_session(self, id: SessionId) -> Session {
        let answers = self.initial_answers();
        Session {
            id,
            key: self.key,
            question_count: self.question_count,
            answers,
            started_at: self.started_at,
            ended_at: None,
            result: None,
        }
    }
}

/// One attempt at a (user, competence, level) key.
///
/// In progress while `ended_at` is absent; completed once it is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: SessionId,
    key: SessionKey,
    question_count: u32,
    answers: Vec<Option<bool>>,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    result: Option<FinalScore>,
}

impl Session {
    /// Rehydrate a session from a persisted record.
    ///
    /// # Errors
    ///
    /// Returns `SessionModelError` if the record breaks a session invariant.
    pub fn from_persisted(
        id: SessionId,
        key: SessionKey,
        question_count: u32,
        answers: Vec<Option<bool>>,
        started_at: DateTime<Utc>,
        ended_at: Option<DateTime<Utc>>,
        result: Option<FinalScore>,
    ) -> Result<Self, SessionModelError> {
        if question_count == 0 {
            return Err(SessionModelError::NoQuestions);
        }
        if answers.len() != question_count as usize {
            return Err(SessionModelError::AnswerCountMismatch {
                len: answers.len(),
                count: question_count,
            });
        }
        if ended_at.is_some_and(|end| end < started_at) {
            return Err(SessionModelError::InvalidTimeRange);
        }
        if let Some(result) = result {
            if ended_at.is_none() {
                return Err(SessionModelError::ResultWithoutEnd);
            }
            if result.score > 100 {
                return Err(SessionModelError::ScoreOutOfRange(result.score));
            }
        }

        Ok(Self {
            id,
            key,
            question_count,
            answers,
            started_at,
            ended_at,
            result,
        })
    }

    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    #[must_use]
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    #[must_use]
    pub fn question_count(&self) -> u32 {
        self.question_count
    }

    #[must_use]
    pub fn answers(&self) -> &[Option<bool>] {
        &self.answers
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Score and pass flag, present only on completed sessions.
    #[must_use]
    pub fn result(&self) -> Option<FinalScore> {
        self.result
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.ended_at.is_some()
    }

    /// Number of slots holding a recorded outcome.
    #[must_use]
    pub fn answered_count(&self) -> usize {
        self.answers.iter().filter(|slot| slot.is_some()).count()
    }

    /// Per-question points: 1 for a correct answer, 0 otherwise.
    #[must_use]
    pub fn points(&self) -> Vec<u8> {
        scoring::points_from_answers(&self.answers)
    }

    /// Check that `index` addresses one of this session's questions.
    ///
    /// # Errors
    ///
    /// Returns `SessionModelError::InvalidIndex` when `index >= question_count`.
    pub fn check_index(&self, index: usize) -> Result<(), SessionModelError> {
        if index < self.answers.len() {
            Ok(())
        } else {
            Err(SessionModelError::InvalidIndex {
                index,
                count: self.question_count,
            })
        }
    }
}
