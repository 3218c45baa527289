#![forbid(unsafe_code)]

pub mod error;
pub mod sessions;

pub use ladico_core::Clock;

pub use error::SessionError;
pub use sessions::{
    AnswerOutcome, EnsureSession, EnsuredSession, FinalizeOutcome, LocalProgress,
    SessionCacheMirror, SessionManager, SessionOrigin, SessionProgress,
};
