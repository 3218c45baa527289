use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ladico_core::model::{NewSession, Session, SessionId, SessionKey};
use ladico_core::scoring::FinalScore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::document::{DocumentStore, FieldPath, Fields, Filter, OrderBy, Patch, StoredDocument};
use crate::memory::InMemoryDocumentStore;

/// Collection holding one document per session attempt.
pub const SESSIONS_COLLECTION: &str = "testSessions";

/// Errors surfaced by storage adapters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

/// Persisted shape of a session document.
///
/// Timestamps are epoch milliseconds so they order correctly inside the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub user_id: String,
    pub competence: String,
    pub level: String,
    #[serde(alias = "totalQuestions")]
    pub question_count: u32,
    pub answers: Vec<Option<bool>>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_time: DateTime<Utc>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passed: Option<bool>,
}

impl SessionRecord {
    #[must_use]
    pub fn from_new(draft: &NewSession) -> Self {
        let key = draft.key();
        Self {
            user_id: key.user_id().to_owned(),
            competence: key.competence().to_owned(),
            level: key.level().to_owned(),
            question_count: draft.question_count(),
            answers: draft.initial_answers(),
            start_time: draft.started_at(),
            end_time: None,
            score: None,
            passed: None,
        }
    }

    #[must_use]
    pub fn from_session(session: &Session) -> Self {
        let key = session.key();
        let result = session.result();
        Self {
            user_id: key.user_id().to_owned(),
            competence: key.competence().to_owned(),
            level: key.level().to_owned(),
            question_count: session.question_count(),
            answers: session.answers().to_vec(),
            start_time: session.started_at(),
            end_time: session.ended_at(),
            score: result.map(|r| r.score),
            passed: result.map(|r| r.passed),
        }
    }

    /// Convert the record back into a domain `Session`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` if the record breaks a session
    /// invariant or carries only half of the final result.
    pub fn into_session(self, id: SessionId) -> Result<Session, StorageError> {
        let key = SessionKey::new(self.user_id, self.competence, self.level).map_err(ser)?;
        let result = match (self.score, self.passed) {
            (Some(score), Some(passed)) => Some(FinalScore { score, passed }),
            (None, None) => None,
            _ => {
                return Err(StorageError::Serialization(format!(
                    "session {id} has a partial result"
                )));
            }
        };
        Session::from_persisted(
            id,
            key,
            self.question_count,
            self.answers,
            self.start_time,
            self.end_time,
            result,
        )
        .map_err(ser)
    }

    /// Encode as top-level document fields.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` if encoding fails.
    pub fn to_fields(&self) -> Result<Fields, StorageError> {
        match serde_json::to_value(self).map_err(ser)? {
            Value::Object(map) => Ok(map),
            other => Err(StorageError::Serialization(format!(
                "session record encoded as {other}"
            ))),
        }
    }

    /// Decode from document fields.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` if the fields do not form a record.
    pub fn from_fields(fields: Fields) -> Result<Self, StorageError> {
        serde_json::from_value(Value::Object(fields)).map_err(ser)
    }
}

fn map_document(doc: StoredDocument) -> Result<Session, StorageError> {
    let id = SessionId::new(doc.id).map_err(ser)?;
    SessionRecord::from_fields(doc.fields)?.into_session(id)
}

/// Partial update of a session document.
///
/// Only the named answer slots and completion fields are written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionPatch {
    answers: Vec<(usize, Option<bool>)>,
    completion: Option<(DateTime<Utc>, FinalScore)>,
}

impl SessionPatch {
    /// Write a single answer slot.
    #[must_use]
    pub fn answer(index: usize, value: Option<bool>) -> Self {
        Self::default().with_answer(index, value)
    }

    /// Close the session with its final result.
    #[must_use]
    pub fn completion(ended_at: DateTime<Utc>, result: FinalScore) -> Self {
        Self {
            answers: Vec::new(),
            completion: Some((ended_at, result)),
        }
    }

    #[must_use]
    pub fn with_answer(mut self, index: usize, value: Option<bool>) -> Self {
        self.answers.push((index, value));
        self
    }

    #[must_use]
    pub fn answers(&self) -> &[(usize, Option<bool>)] {
        &self.answers
    }

    #[must_use]
    pub fn completion_fields(&self) -> Option<(DateTime<Utc>, FinalScore)> {
        self.completion
    }

    /// Translate into document field-path assignments.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` if a field path cannot be built.
    pub fn to_patch(&self) -> Result<Patch, StorageError> {
        let mut patch = Patch::new();
        for (index, value) in &self.answers {
            patch = patch.set(FieldPath::field("answers")?.index(*index), *value);
        }
        if let Some((ended_at, result)) = self.completion {
            patch = patch
                .set(FieldPath::field("endTime")?, ended_at.timestamp_millis())
                .set(FieldPath::field("score")?, result.score)
                .set(FieldPath::field("passed")?, result.passed);
        }
        Ok(patch)
    }
}

/// Repository contract for session attempts.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// All sessions stored under `key`, newest `started_at` first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on transport failures or corrupt records; never
    /// for an empty result.
    async fn find_by_key(&self, key: &SessionKey) -> Result<Vec<Session>, StorageError>;

    /// Fetch a session by id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on transport failures or a corrupt record.
    async fn get(&self, id: &SessionId) -> Result<Option<Session>, StorageError>;

    /// Persist a new, unanswered session.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the write fails. Not retried.
    async fn insert(&self, draft: &NewSession) -> Result<Session, StorageError>;

    /// Apply a partial update.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the session no longer exists.
    async fn patch(&self, id: &SessionId, patch: &SessionPatch) -> Result<(), StorageError>;
}

/// `SessionRepository` over any `DocumentStore`.
#[derive(Clone)]
pub struct DocumentSessionRepository {
    store: Arc<dyn DocumentStore>,
}

impl DocumentSessionRepository {
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SessionRepository for DocumentSessionRepository {
    async fn find_by_key(&self, key: &SessionKey) -> Result<Vec<Session>, StorageError> {
        let filters = [
            Filter::eq("userId", key.user_id()),
            Filter::eq("competence", key.competence()),
            Filter::eq("level", key.level()),
        ];
        let docs = self
            .store
            .query(SESSIONS_COLLECTION, &filters, Some(&OrderBy::desc("startTime")))
            .await?;

        // An undecodable candidate must not block the key; the others still
        // consolidate and `get` keeps reporting it.
        let mut out = Vec::with_capacity(docs.len());
        for doc in docs {
            let id = doc.id.clone();
            match map_document(doc) {
                Ok(session) => out.push(session),
                Err(StorageError::Serialization(reason)) => {
                    warn!(session = %id, key = %key, %reason, "skipping undecodable session");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(out)
    }

    async fn get(&self, id: &SessionId) -> Result<Option<Session>, StorageError> {
        self.store
            .get(SESSIONS_COLLECTION, id.as_str())
            .await?
            .map(map_document)
            .transpose()
    }

    async fn insert(&self, draft: &NewSession) -> Result<Session, StorageError> {
        let fields = SessionRecord::from_new(draft).to_fields()?;
        let id = self.store.insert(SESSIONS_COLLECTION, fields).await?;
        let id = SessionId::new(id).map_err(ser)?;
        Ok(draft.clone().into_session(id))
    }

    async fn patch(&self, id: &SessionId, patch: &SessionPatch) -> Result<(), StorageError> {
        let patch = patch.to_patch()?;
        self.store
            .update(SESSIONS_COLLECTION, id.as_str(), &patch)
            .await
    }
}

/// Aggregates the document store and the repositories built on it.
#[derive(Clone)]
pub struct Storage {
    pub documents: Arc<dyn DocumentStore>,
    pub sessions: Arc<dyn SessionRepository>,
}

impl Storage {
    #[must_use]
    pub fn from_documents(documents: Arc<dyn DocumentStore>) -> Self {
        let sessions: Arc<dyn SessionRepository> =
            Arc::new(DocumentSessionRepository::new(Arc::clone(&documents)));
        Self {
            documents,
            sessions,
        }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_documents(Arc::new(InMemoryDocumentStore::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ladico_core::time::fixed_now;
    use serde_json::json;

    fn key() -> SessionKey {
        SessionKey::new("u1", "1.1", "basico").unwrap()
    }

    fn repo() -> (InMemoryDocumentStore, DocumentSessionRepository) {
        let store = InMemoryDocumentStore::new();
        let repo = DocumentSessionRepository::new(Arc::new(store.clone()));
        (store, repo)
    }

    #[tokio::test]
    async fn insert_then_find_newest_first() {
        let (_store, repo) = repo();
        let first = repo
            .insert(&NewSession::new(key(), 3, fixed_now()).unwrap())
            .await
            .unwrap();
        let second = repo
            .insert(&NewSession::new(key(), 3, fixed_now() + Duration::seconds(10)).unwrap())
            .await
            .unwrap();
        repo.insert(
            &NewSession::new(SessionKey::new("u2", "1.1", "basico").unwrap(), 3, fixed_now())
                .unwrap(),
        )
        .await
        .unwrap();

        let found = repo.find_by_key(&key()).await.unwrap();
        let ids: Vec<_> = found.iter().map(Session::id).collect();
        assert_eq!(ids, vec![second.id(), first.id()]);
        assert_eq!(found[1].answers(), &[None, None, None]);
    }

    #[tokio::test]
    async fn find_by_unknown_key_is_empty() {
        let (_store, repo) = repo();
        assert!(repo.find_by_key(&key()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn patch_touches_only_named_slot() {
        let (_store, repo) = repo();
        let session = repo
            .insert(&NewSession::new(key(), 3, fixed_now()).unwrap())
            .await
            .unwrap();
        repo.patch(session.id(), &SessionPatch::answer(0, Some(true)))
            .await
            .unwrap();
        repo.patch(session.id(), &SessionPatch::answer(2, Some(false)))
            .await
            .unwrap();

        let stored = repo.get(session.id()).await.unwrap().unwrap();
        assert_eq!(stored.answers(), &[Some(true), None, Some(false)]);
        assert!(!stored.is_completed());
    }

    #[tokio::test]
    async fn completion_patch_sets_result() {
        let (_store, repo) = repo();
        let session = repo
            .insert(&NewSession::new(key(), 3, fixed_now()).unwrap())
            .await
            .unwrap();
        let ended = fixed_now() + Duration::minutes(3);
        let result = FinalScore {
            score: 67,
            passed: true,
        };
        repo.patch(session.id(), &SessionPatch::completion(ended, result))
            .await
            .unwrap();

        let stored = repo.get(session.id()).await.unwrap().unwrap();
        assert_eq!(stored.ended_at(), Some(ended));
        assert_eq!(stored.result(), Some(result));
    }

    #[tokio::test]
    async fn record_accepts_total_questions_alias() {
        let (store, repo) = repo();
        let fields = match json!({
            "userId": "u1",
            "competence": "1.1",
            "level": "basico",
            "totalQuestions": 2,
            "answers": [true, null],
            "startTime": fixed_now().timestamp_millis(),
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let id = store.insert(SESSIONS_COLLECTION, fields).await.unwrap();

        let session = repo
            .get(&SessionId::new(id).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.question_count(), 2);
        assert_eq!(session.answered_count(), 1);
    }

    #[tokio::test]
    async fn partial_result_is_rejected() {
        let (store, repo) = repo();
        let mut record = SessionRecord::from_new(&NewSession::new(key(), 1, fixed_now()).unwrap());
        record.end_time = Some(fixed_now());
        record.score = Some(100);
        let id = store
            .insert(SESSIONS_COLLECTION, record.to_fields().unwrap())
            .await
            .unwrap();

        let err = repo.get(&SessionId::new(id).unwrap()).await.unwrap_err();
        assert!(matches!(err, StorageError::Serialization(_)));
    }

    #[tokio::test]
    async fn find_by_key_skips_undecodable_records() {
        let (store, repo) = repo();
        let valid = repo
            .insert(&NewSession::new(key(), 3, fixed_now()).unwrap())
            .await
            .unwrap();
        let fields = match json!({
            "userId": "u1",
            "competence": "1.1",
            "level": "basico",
            "questionCount": 3,
            "answers": [1, null, [0, 2]],
            "startTime": (fixed_now() + Duration::seconds(5)).timestamp_millis(),
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let raw = store.insert(SESSIONS_COLLECTION, fields).await.unwrap();

        let found = repo.find_by_key(&key()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), valid.id());

        // Direct reads still surface the bad record.
        let err = repo.get(&SessionId::new(raw).unwrap()).await.unwrap_err();
        assert!(matches!(err, StorageError::Serialization(_)));
    }

    #[tokio::test]
    async fn patch_unknown_session_is_not_found() {
        let (_store, repo) = repo();
        let err = repo
            .patch(
                &SessionId::new("missing").unwrap(),
                &SessionPatch::answer(0, Some(true)),
            )
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::NotFound);
    }

    #[test]
    fn record_round_trips_through_session() {
        let session = NewSession::new(key(), 2, fixed_now())
            .unwrap()
            .into_session(SessionId::new("s1").unwrap());
        let record = SessionRecord::from_session(&session);
        let fields = record.to_fields().unwrap();
        assert!(!fields.contains_key("endTime"));
        assert_eq!(fields.get("startTime"), Some(&json!(fixed_now().timestamp_millis())));
        let back = SessionRecord::from_fields(fields)
            .unwrap()
            .into_session(SessionId::new("s1").unwrap())
            .unwrap();
        assert_eq!(back, session);
    }
}
