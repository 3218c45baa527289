mod cache;
mod inflight;
mod manager;
mod progress;

// Public API of the session subsystem.
pub use crate::error::SessionError;
pub use cache::{LAST_USER_KEY, SESSION_KEY_PREFIX, SessionCacheMirror};
pub use manager::{
    AnswerOutcome, EnsureSession, EnsuredSession, FinalizeOutcome, SessionManager, SessionOrigin,
};
pub use progress::{LocalProgress, SessionProgress};
