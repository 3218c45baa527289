#![forbid(unsafe_code)]

pub mod document;
pub mod local;
pub mod memory;
pub mod repository;
pub mod sqlite;

pub use document::{
    DocumentStore, FieldPath, Fields, Filter, FilterOp, OrderBy, Patch, StoredDocument,
};
pub use local::{FileLocalStorage, InMemoryLocalStorage, LocalStorage, LocalStorageError};
pub use memory::InMemoryDocumentStore;
pub use repository::{
    DocumentSessionRepository, SESSIONS_COLLECTION, SessionPatch, SessionRecord,
    SessionRepository, Storage, StorageError,
};
