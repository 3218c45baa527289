use std::sync::Arc;

use chrono::Duration;
use ladico_core::model::{Answer, ExpectedAnswer, NewSession, SessionId, SessionKey};
use ladico_core::scoring::{FinalScore, FinalizeInput};
use ladico_core::time::fixed_now;
use serde_json::{Value, json};
use services::sessions::LAST_USER_KEY;
use services::{
    AnswerOutcome, Clock, EnsureSession, FinalizeOutcome, SessionCacheMirror, SessionError,
    SessionManager, SessionOrigin,
};
use storage::{
    DocumentStore, InMemoryDocumentStore, InMemoryLocalStorage, LocalStorage, SESSIONS_COLLECTION,
    SessionPatch, SessionRepository, Storage,
};

struct Harness {
    documents: InMemoryDocumentStore,
    local: InMemoryLocalStorage,
    storage: Storage,
    manager: SessionManager,
}

fn harness() -> Harness {
    let documents = InMemoryDocumentStore::new();
    let local = InMemoryLocalStorage::new();
    let storage = Storage::from_documents(Arc::new(documents.clone()));
    let manager = SessionManager::new(
        Clock::fixed(fixed_now()),
        Arc::clone(&storage.sessions),
        SessionCacheMirror::new(Arc::new(local.clone())),
    );
    Harness {
        documents,
        local,
        storage,
        manager,
    }
}

fn request(user: &str, total: u32) -> EnsureSession {
    EnsureSession {
        user_id: user.into(),
        competence: "1.1".into(),
        level: "basico".into(),
        total_questions: total,
    }
}

fn key(user: &str) -> SessionKey {
    SessionKey::new(user, "1.1", "basico").unwrap()
}

fn finalize(correct_count: u32, total: u32, pass_min: u32) -> FinalizeInput {
    FinalizeInput {
        correct_count,
        total,
        pass_min,
    }
}

impl Harness {
    fn session_count(&self) -> usize {
        self.documents.count(SESSIONS_COLLECTION).unwrap()
    }

    async fn seed(
        &self,
        offset_secs: i64,
        answered: &[Option<bool>],
        completed: bool,
    ) -> SessionId {
        let started_at = fixed_now() + Duration::seconds(offset_secs);
        let draft = NewSession::new(key("u1"), 3, started_at).unwrap();
        let session = self.storage.sessions.insert(&draft).await.unwrap();
        let mut patch = SessionPatch::default();
        for (index, value) in answered.iter().enumerate() {
            patch = patch.with_answer(index, *value);
        }
        if completed {
            patch = SessionPatch::completion(
                started_at + Duration::minutes(5),
                FinalScore {
                    score: 100,
                    passed: true,
                },
            )
            .with_answer(0, Some(true));
        }
        self.storage
            .sessions
            .patch(session.id(), &patch)
            .await
            .unwrap();
        session.id().clone()
    }
}

#[tokio::test]
async fn ensure_is_idempotent() {
    let h = harness();
    let first = h.manager.ensure_session(request("u1", 3)).await.unwrap();
    assert_eq!(first.origin, SessionOrigin::Created);

    let second = h.manager.ensure_session(request("u1", 3)).await.unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.origin, SessionOrigin::Cached);
    assert_eq!(h.session_count(), 1);
}

#[tokio::test]
async fn ensure_without_cache_resumes_existing_session() {
    let h = harness();
    let seeded = h.seed(0, &[Some(true)], false).await;

    let ensured = h.manager.ensure_session(request("u1", 3)).await.unwrap();
    assert_eq!(ensured.id, seeded);
    assert_eq!(ensured.origin, SessionOrigin::Resumed);
    assert_eq!(h.session_count(), 1);
}

#[tokio::test]
async fn most_progress_wins_among_in_progress() {
    let h = harness();
    let _newer = h.seed(60, &[Some(true)], false).await;
    let busier = h.seed(0, &[Some(true), Some(false)], false).await;

    let ensured = h.manager.ensure_session(request("u1", 3)).await.unwrap();
    assert_eq!(ensured.id, busier);
}

#[tokio::test]
async fn completed_session_is_not_resumed() {
    let h = harness();
    let _open = h.seed(0, &[Some(true), Some(true)], false).await;
    let done = h.seed(60, &[], true).await;

    let ensured = h.manager.ensure_session(request("u1", 3)).await.unwrap();
    assert_eq!(ensured.origin, SessionOrigin::Created);
    assert_ne!(ensured.id, done);
    assert_eq!(h.session_count(), 3);

    let history = h.manager.history(&key("u1")).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id(), &done);
}

#[tokio::test]
async fn mismatched_question_count_starts_new_session() {
    let h = harness();
    let seeded = h.seed(0, &[Some(true)], false).await;

    let ensured = h.manager.ensure_session(request("u1", 5)).await.unwrap();
    assert_ne!(ensured.id, seeded);
    let session = h.manager.get_session(&ensured.id).await.unwrap();
    assert_eq!(session.question_count(), 5);
}

#[tokio::test]
async fn answers_touch_only_their_slot() {
    let h = harness();
    let id = h.manager.ensure_session(request("u1", 3)).await.unwrap().id;

    h.manager.mark_answered(&id, 0, true).await.unwrap();
    h.manager.mark_answered(&id, 2, true).await.unwrap();
    // Last write on the same index wins.
    h.manager.mark_answered(&id, 2, false).await.unwrap();

    let session = h.manager.get_session(&id).await.unwrap();
    assert_eq!(session.answers(), &[Some(true), None, Some(false)]);

    let progress = h.manager.progress(&id).await.unwrap();
    assert_eq!(progress.answered, 2);
    assert_eq!(progress.correct, 1);
    assert!(!progress.is_complete);
}

#[tokio::test]
async fn record_answer_normalises_choices() {
    let h = harness();
    let id = h.manager.ensure_session(request("u1", 3)).await.unwrap().id;

    h.manager
        .record_answer(&id, 0, &Answer::SingleChoice(2), &ExpectedAnswer::Single(2))
        .await
        .unwrap();
    h.manager
        .record_answer(
            &id,
            1,
            &Answer::MultiChoice(vec![3, 1]),
            &ExpectedAnswer::Multi(vec![1, 2]),
        )
        .await
        .unwrap();

    let session = h.manager.get_session(&id).await.unwrap();
    assert_eq!(session.answers(), &[Some(true), Some(false), None]);
}

#[tokio::test]
async fn finalize_scores_and_clears_cache() {
    let h = harness();
    let id = h.manager.ensure_session(request("u1", 3)).await.unwrap().id;
    for (index, correct) in [true, false, true].into_iter().enumerate() {
        h.manager.mark_answered(&id, index, correct).await.unwrap();
    }

    let outcome = h.manager.finalize_session(&id, finalize(2, 3, 2)).await.unwrap();
    assert_eq!(
        outcome,
        FinalizeOutcome::Finalized(FinalScore {
            score: 67,
            passed: true
        })
    );
    assert_eq!(h.manager.cache().get(&key("u1")), None);

    let session = h.manager.get_session(&id).await.unwrap();
    assert!(session.is_completed());
    assert_eq!(session.ended_at(), Some(fixed_now()));

    // Next ensure starts a fresh attempt.
    let next = h.manager.ensure_session(request("u1", 3)).await.unwrap();
    assert_ne!(next.id, id);
    assert_eq!(next.origin, SessionOrigin::Created);
}

#[tokio::test]
async fn finalize_failing_score() {
    let h = harness();
    let id = h.manager.ensure_session(request("u1", 3)).await.unwrap().id;
    let outcome = h.manager.finalize_session(&id, finalize(1, 3, 2)).await.unwrap();
    assert_eq!(
        outcome,
        FinalizeOutcome::Finalized(FinalScore {
            score: 33,
            passed: false
        })
    );
}

#[tokio::test]
async fn finalize_is_terminal() {
    let h = harness();
    let id = h.manager.ensure_session(request("u1", 3)).await.unwrap().id;
    h.manager.finalize_session(&id, finalize(3, 3, 2)).await.unwrap();

    let again = h.manager.finalize_session(&id, finalize(0, 3, 2)).await.unwrap();
    assert_eq!(
        again,
        FinalizeOutcome::AlreadyFinalized(Some(FinalScore {
            score: 100,
            passed: true
        }))
    );

    let write = h.manager.mark_answered(&id, 0, false).await.unwrap();
    assert_eq!(write, AnswerOutcome::AlreadyFinalized);
    let session = h.manager.get_session(&id).await.unwrap();
    assert_eq!(session.answers(), &[None, None, None]);
}

#[tokio::test]
async fn invalid_inputs_are_rejected() {
    let h = harness();
    assert!(matches!(
        h.manager.ensure_session(request("u1", 0)).await,
        Err(SessionError::InvalidInput(_))
    ));
    assert!(matches!(
        h.manager.ensure_session(request("  ", 3)).await,
        Err(SessionError::InvalidInput(_))
    ));

    let id = h.manager.ensure_session(request("u1", 3)).await.unwrap().id;
    assert!(matches!(
        h.manager.mark_answered(&id, 3, true).await,
        Err(SessionError::InvalidIndex { index: 3, count: 3 })
    ));
    assert!(matches!(
        h.manager.finalize_session(&id, finalize(4, 3, 2)).await,
        Err(SessionError::InvalidInput(_))
    ));
    assert!(matches!(
        h.manager.finalize_session(&id, finalize(0, 0, 0)).await,
        Err(SessionError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let h = harness();
    let missing = SessionId::new("missing").unwrap();
    assert!(matches!(
        h.manager.mark_answered(&missing, 0, true).await,
        Err(SessionError::SessionNotFound(id)) if id == missing
    ));
    assert!(matches!(
        h.manager.finalize_session(&missing, finalize(1, 3, 2)).await,
        Err(SessionError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn offline_store_is_unavailable() {
    let h = harness();
    h.documents.set_offline(true);
    assert!(matches!(
        h.manager.ensure_session(request("u1", 3)).await,
        Err(SessionError::StoreUnavailable(_))
    ));

    h.documents.set_offline(false);
    let id = h.manager.ensure_session(request("u1", 3)).await.unwrap().id;
    h.documents.set_offline(true);
    assert!(matches!(
        h.manager.mark_answered(&id, 0, true).await,
        Err(SessionError::StoreUnavailable(_))
    ));
}

#[tokio::test]
async fn user_switch_wipes_cached_sessions() {
    let h = harness();
    let first = h.manager.ensure_session(request("u1", 3)).await.unwrap();
    assert_eq!(h.local.get(LAST_USER_KEY).unwrap().as_deref(), Some("u1"));

    let other = h.manager.ensure_session(request("u2", 3)).await.unwrap();
    assert_ne!(other.id, first.id);
    assert_eq!(h.manager.cache().get(&key("u1")), None);

    // Back to u1: the cache is gone, the store still resolves the same session.
    assert!(h.manager.switch_user("u1"));
    let again = h.manager.ensure_session(request("u1", 3)).await.unwrap();
    assert_eq!(again.id, first.id);
    assert_eq!(again.origin, SessionOrigin::Resumed);
}

#[tokio::test]
async fn keys_containing_colons_get_their_own_sessions() {
    let h = harness();
    let mut first = request("u1", 3);
    first.competence = "1.1:x".into();
    let mut second = request("u1", 3);
    second.level = "x:basico".into();

    let a = h.manager.ensure_session(first).await.unwrap();
    let b = h.manager.ensure_session(second).await.unwrap();
    assert_ne!(a.id, b.id);
    assert_eq!(b.origin, SessionOrigin::Created);

    let session = h.manager.get_session(&b.id).await.unwrap();
    assert_eq!(session.key().competence(), "1.1");
    assert_eq!(session.key().level(), "x:basico");
}

#[tokio::test]
async fn undecodable_record_does_not_block_the_key() {
    let h = harness();
    let fields = match json!({
        "userId": "u1",
        "competence": "1.1",
        "level": "basico",
        "questionCount": 3,
        "answers": [1, null, [0, 2]],
        "startTime": fixed_now().timestamp_millis(),
    }) {
        Value::Object(map) => map,
        _ => unreachable!(),
    };
    h.documents.insert(SESSIONS_COLLECTION, fields).await.unwrap();

    let ensured = h.manager.ensure_session(request("u1", 3)).await.unwrap();
    assert_eq!(ensured.origin, SessionOrigin::Created);
    h.manager.mark_answered(&ensured.id, 1, true).await.unwrap();
    assert_eq!(h.session_count(), 2);
}
