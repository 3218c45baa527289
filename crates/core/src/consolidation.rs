//! Read-time repair of duplicate sessions.
//!
//! The store cannot enforce one session per key, so racing clients may each
//! insert one. Every reader runs the same total order over the candidates and
//! therefore converges on the same winner without coordination.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;

use crate::model::{Session, SessionId};

/// Outcome of consolidating the candidates of one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consolidation<'a> {
    pub winner: &'a Session,
    /// Candidates that lost, in input order.
    pub superseded: Vec<&'a SessionId>,
}

/// Pick the authoritative session among `candidates` for a single key.
///
/// Precedence:
/// 1. no candidates: `None`;
/// 2. any completed: the completed one with the latest `started_at`;
/// 3. otherwise: most answered slots, then latest `started_at`.
///
/// Remaining ties go to the lexicographically smallest id. The result does
/// not depend on input order.
#[must_use]
pub fn consolidate(candidates: &[Session]) -> Option<Consolidation<'_>> {
    let any_completed = candidates.iter().any(Session::is_completed);
    let winner = if any_completed {
        candidates
            .iter()
            .filter(|s| s.is_completed())
            .max_by(|a, b| completed_precedence(a, b))?
    } else {
        candidates.iter().max_by(|a, b| in_progress_precedence(a, b))?
    };

    let superseded = candidates
        .iter()
        .filter(|s| s.id() != winner.id())
        .map(Session::id)
        .collect();

    Some(Consolidation { winner, superseded })
}

/// Best in-progress attempt started at or after `after`, ranked like
/// in-progress candidates in [`consolidate`].
///
/// Used to find a retry that was opened once the latest completion ended.
#[must_use]
pub fn open_attempt_since(candidates: &[Session], after: DateTime<Utc>) -> Option<&Session> {
    candidates
        .iter()
        .filter(|s| !s.is_completed() && s.started_at() >= after)
        .max_by(|a, b| in_progress_precedence(a, b))
}

fn completed_precedence(a: &Session, b: &Session) -> Ordering {
    a.started_at()
        .cmp(&b.started_at())
        .then_with(|| id_precedence(a, b))
}

fn in_progress_precedence(a: &Session, b: &Session) -> Ordering {
    a.answered_count()
        .cmp(&b.answered_count())
        .then_with(|| a.started_at().cmp(&b.started_at()))
        .then_with(|| id_precedence(a, b))
}

// Smaller id ranks higher.
fn id_precedence(a: &Session, b: &Session) -> Ordering {
    b.id().cmp(a.id())
}
