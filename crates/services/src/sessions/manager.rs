use std::sync::Arc;

use ladico_core::Clock;
use ladico_core::consolidation::{consolidate, open_attempt_since};
use ladico_core::model::{
    Answer, ExpectedAnswer, NewSession, Session, SessionId, SessionKey, SessionModelError,
};
use ladico_core::scoring::{self, FinalScore, FinalizeInput};
use serde::{Deserialize, Serialize};
use storage::repository::{SessionPatch, SessionRepository, StorageError};
use tracing::{debug, info, warn};

use super::cache::SessionCacheMirror;
use super::inflight::InFlight;
use super::progress::SessionProgress;
use crate::error::SessionError;

/// Request to obtain the session a user should answer into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnsureSession {
    pub user_id: String,
    pub competence: String,
    pub level: String,
    pub total_questions: u32,
}

/// Where an ensured session id came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOrigin {
    /// Returned from the local cache without a remote check.
    Cached,
    /// An existing in-progress session from the store.
    Resumed,
    /// Inserted by this call.
    Created,
    /// This call inserted a session, but a concurrently created one won
    /// consolidation and is used instead.
    Adopted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnsuredSession {
    pub id: SessionId,
    pub origin: SessionOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerOutcome {
    Recorded,
    /// The session was already closed; nothing was written.
    AlreadyFinalized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "result")]
pub enum FinalizeOutcome {
    Finalized(FinalScore),
    /// The session was already closed; carries the stored result.
    AlreadyFinalized(Option<FinalScore>),
}

/// Session engine used by exercise pages.
///
/// Resolves the authoritative session per (user, competence, level), records
/// answers slot by slot and closes sessions with their score. Creation is
/// serialised per key within one manager; duplicates created by other
/// processes are repaired through consolidation.
pub struct SessionManager {
    clock: Clock,
    sessions: Arc<dyn SessionRepository>,
    cache: SessionCacheMirror,
    in_flight: InFlight,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        clock: Clock,
        sessions: Arc<dyn SessionRepository>,
        cache: SessionCacheMirror,
    ) -> Self {
        Self {
            clock,
            sessions,
            cache,
            in_flight: InFlight::default(),
        }
    }

    #[must_use]
    pub fn cache(&self) -> &SessionCacheMirror {
        &self.cache
    }

    /// Return the id of the session to answer into, creating one if needed.
    ///
    /// A cached id is returned without contacting the store; a stale one
    /// surfaces later as `SessionNotFound` from the write operations.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidInput` for blank key parts or zero
    /// questions, `SessionError::StoreUnavailable` if the store fails.
    pub async fn ensure_session(
        &self,
        request: EnsureSession,
    ) -> Result<EnsuredSession, SessionError> {
        let key = SessionKey::new(request.user_id, request.competence, request.level)?;
        let total = request.total_questions;
        if total == 0 {
            return Err(SessionModelError::NoQuestions.into());
        }

        self.cache.observe_user(key.user_id());
        if let Some(id) = self.cache.get(&key) {
            debug!(key = %key, session = %id, "session cache hit");
            return Ok(EnsuredSession {
                id,
                origin: SessionOrigin::Cached,
            });
        }

        let _in_flight = self.in_flight.acquire(&key).await;
        // A caller we waited on may have just resolved this key.
        if let Some(id) = self.cache.get(&key) {
            debug!(key = %key, session = %id, "session resolved by concurrent caller");
            return Ok(EnsuredSession {
                id,
                origin: SessionOrigin::Cached,
            });
        }

        let ensured = self.resolve(&key, total).await?;
        self.cache.set(&key, &ensured.id);
        Ok(ensured)
    }

    /// Record whether the answer to `question_index` (0-based) was correct.
    ///
    /// Only that slot is written; answering the same index again overwrites it.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::SessionNotFound` for an unknown id,
    /// `SessionError::InvalidIndex` for an index outside the session, and
    /// `SessionError::StoreUnavailable` if the store fails.
    pub async fn mark_answered(
        &self,
        session_id: &SessionId,
        question_index: usize,
        is_correct: bool,
    ) -> Result<AnswerOutcome, SessionError> {
        self.write_answer(session_id, question_index, Some(is_correct))
            .await
    }

    /// Normalise a raw exercise answer and record it.
    ///
    /// An `Answer::Unanswered` clears the slot.
    ///
    /// # Errors
    ///
    /// Same as [`SessionManager::mark_answered`].
    pub async fn record_answer(
        &self,
        session_id: &SessionId,
        question_index: usize,
        answer: &Answer,
        expected: &ExpectedAnswer,
    ) -> Result<AnswerOutcome, SessionError> {
        self.write_answer(session_id, question_index, answer.normalize(expected))
            .await
    }

    /// Close the session with its score and drop its cache entry.
    ///
    /// A session that is already closed keeps its stored result.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidInput` if `total` is zero or smaller than
    /// `correct_count`, `SessionError::SessionNotFound` for an unknown id, and
    /// `SessionError::StoreUnavailable` if the store fails.
    pub async fn finalize_session(
        &self,
        session_id: &SessionId,
        input: FinalizeInput,
    ) -> Result<FinalizeOutcome, SessionError> {
        let result = scoring::final_score(input)?;
        let session = self.load(session_id).await?;

        if session.is_completed() {
            warn!(session = %session_id, "finalize ignored: session already finalized");
            self.cache.clear_if(session.key(), session_id);
            return Ok(FinalizeOutcome::AlreadyFinalized(session.result()));
        }

        // Another client's clock may run ahead of ours.
        let ended_at = self.clock.now().max(session.started_at());
        self.sessions
            .patch(session_id, &SessionPatch::completion(ended_at, result))
            .await
            .map_err(|err| write_error(session_id, err))?;
        self.cache.clear_if(session.key(), session_id);

        info!(
            session = %session_id,
            key = %session.key(),
            score = result.score,
            passed = result.passed,
            "session finalized"
        );
        Ok(FinalizeOutcome::Finalized(result))
    }

    /// # Errors
    ///
    /// Returns `SessionError::SessionNotFound` for an unknown id, or
    /// `SessionError::StoreUnavailable` if the store fails.
    pub async fn get_session(&self, session_id: &SessionId) -> Result<Session, SessionError> {
        self.load(session_id).await
    }

    /// # Errors
    ///
    /// Same as [`SessionManager::get_session`].
    pub async fn progress(&self, session_id: &SessionId) -> Result<SessionProgress, SessionError> {
        let session = self.load(session_id).await?;
        Ok(SessionProgress::from_session(&session))
    }

    /// Completed sessions for `key`, newest first. For display only: they are
    /// never resumed.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::StoreUnavailable` if the store fails.
    pub async fn history(&self, key: &SessionKey) -> Result<Vec<Session>, SessionError> {
        let mut completed: Vec<Session> = self
            .lookup(key)
            .await?
            .into_iter()
            .filter(Session::is_completed)
            .collect();
        completed.sort_by(|a, b| b.started_at().cmp(&a.started_at()));
        Ok(completed)
    }

    /// Tell the engine who is signed in. Cached sessions of a previous user
    /// are wiped. Returns `true` if the user changed.
    pub fn switch_user(&self, user_id: &str) -> bool {
        self.cache.observe_user(user_id)
    }

    async fn resolve(&self, key: &SessionKey, total: u32) -> Result<EnsuredSession, SessionError> {
        let candidates = self.lookup(key).await?;
        if let Some(existing) = pick_resumable(&candidates, total) {
            debug!(key = %key, session = %existing.id(), "resuming session");
            return Ok(EnsuredSession {
                id: existing.id().clone(),
                origin: SessionOrigin::Resumed,
            });
        }

        let draft = NewSession::new(key.clone(), total, self.clock.now())?;
        let created = self
            .sessions
            .insert(&draft)
            .await
            .map_err(SessionError::from_storage)?;
        info!(key = %key, session = %created.id(), questions = total, "session created");

        self.settle(key, created.id().clone(), total).await
    }

    // Re-read after inserting so a record another process created at the same
    // time is adopted if it wins consolidation.
    async fn settle(
        &self,
        key: &SessionKey,
        created: SessionId,
        total: u32,
    ) -> Result<EnsuredSession, SessionError> {
        let candidates = match self.lookup(key).await {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(key = %key, error = %err, "could not re-read sessions after insert");
                return Ok(EnsuredSession {
                    id: created,
                    origin: SessionOrigin::Created,
                });
            }
        };

        match pick_resumable(&candidates, total) {
            Some(winner) if winner.id() != &created => {
                info!(
                    key = %key,
                    created = %created,
                    adopted = %winner.id(),
                    "concurrent session won consolidation"
                );
                Ok(EnsuredSession {
                    id: winner.id().clone(),
                    origin: SessionOrigin::Adopted,
                })
            }
            _ => Ok(EnsuredSession {
                id: created,
                origin: SessionOrigin::Created,
            }),
        }
    }

    async fn lookup(&self, key: &SessionKey) -> Result<Vec<Session>, SessionError> {
        match self.sessions.find_by_key(key).await {
            Ok(candidates) => Ok(candidates),
            Err(StorageError::NotFound) => Ok(Vec::new()),
            Err(err) => Err(SessionError::from_storage(err)),
        }
    }

    async fn load(&self, session_id: &SessionId) -> Result<Session, SessionError> {
        match self.sessions.get(session_id).await {
            Ok(Some(session)) => Ok(session),
            Ok(None) | Err(StorageError::NotFound) => {
                Err(SessionError::SessionNotFound(session_id.clone()))
            }
            Err(err) => Err(SessionError::from_storage(err)),
        }
    }

    async fn write_answer(
        &self,
        session_id: &SessionId,
        index: usize,
        value: Option<bool>,
    ) -> Result<AnswerOutcome, SessionError> {
        let session = self.load(session_id).await?;
        if session.is_completed() {
            warn!(session = %session_id, index, "answer ignored: session already finalized");
            return Ok(AnswerOutcome::AlreadyFinalized);
        }
        session.check_index(index)?;

        self.sessions
            .patch(session_id, &SessionPatch::answer(index, value))
            .await
            .map_err(|err| write_error(session_id, err))?;
        debug!(session = %session_id, index, ?value, "answer recorded");
        Ok(AnswerOutcome::Recorded)
    }
}

fn write_error(session_id: &SessionId, err: StorageError) -> SessionError {
    match err {
        StorageError::NotFound => SessionError::SessionNotFound(session_id.clone()),
        other => SessionError::from_storage(other),
    }
}

/// The session an ensure call should hand out, if any can be reused.
///
/// Only candidates with the requested question count are considered. A
/// completed winner is never resumed, but an attempt opened after it ended is.
fn pick_resumable(candidates: &[Session], total: u32) -> Option<&Session> {
    let matching: Vec<Session> = candidates
        .iter()
        .filter(|s| s.question_count() == total)
        .cloned()
        .collect();
    if matching.len() < candidates.len() {
        debug!(
            skipped = candidates.len() - matching.len(),
            "ignoring sessions with a different question count"
        );
    }

    let consolidation = consolidate(&matching)?;
    if !consolidation.superseded.is_empty() {
        debug!(
            winner = %consolidation.winner.id(),
            superseded = ?consolidation.superseded,
            "consolidated duplicate sessions"
        );
    }

    let winner = consolidation.winner;
    let chosen = if winner.is_completed() {
        let ended_at = winner.ended_at().unwrap_or_else(|| winner.started_at());
        open_attempt_since(&matching, ended_at)?
    } else {
        winner
    };
    candidates.iter().find(|s| s.id() == chosen.id())
}
