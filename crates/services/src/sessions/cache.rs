use std::sync::Arc;

use ladico_core::model::{SessionId, SessionKey};
use storage::local::LocalStorage;
use tracing::{debug, warn};

/// Prefix of every cached session entry.
pub const SESSION_KEY_PREFIX: &str = "ladico:session:";
/// Entry remembering which user the cached entries belong to.
pub const LAST_USER_KEY: &str = "ladico:lastUser";

/// Write-through mirror of the authoritative session id per key.
///
/// Never the source of truth: failures of the underlying storage are logged
/// and read as cache misses.
#[derive(Clone)]
pub struct SessionCacheMirror {
    storage: Arc<dyn LocalStorage>,
}

impl SessionCacheMirror {
    #[must_use]
    pub fn new(storage: Arc<dyn LocalStorage>) -> Self {
        Self { storage }
    }

    /// Local storage key for `key`. Parts are percent-encoded so a `:` inside
    /// one part cannot shift the separators.
    #[must_use]
    pub fn cache_key(key: &SessionKey) -> String {
        format!(
            "{SESSION_KEY_PREFIX}{}:{}:{}",
            urlencoding::encode(key.user_id()),
            urlencoding::encode(key.competence()),
            urlencoding::encode(key.level())
        )
    }

    #[must_use]
    pub fn get(&self, key: &SessionKey) -> Option<SessionId> {
        let cache_key = Self::cache_key(key);
        let raw = match self.storage.get(&cache_key) {
            Ok(raw) => raw?,
            Err(err) => {
                warn!(error = %err, key = %cache_key, "session cache read failed");
                return None;
            }
        };
        match SessionId::new(raw) {
            Ok(id) => Some(id),
            Err(_) => {
                debug!(key = %cache_key, "dropping malformed cached session id");
                self.remove(&cache_key);
                None
            }
        }
    }

    pub fn set(&self, key: &SessionKey, id: &SessionId) {
        let cache_key = Self::cache_key(key);
        if let Err(err) = self.storage.set(&cache_key, id.as_str()) {
            warn!(error = %err, key = %cache_key, "session cache write failed");
        }
    }

    pub fn clear(&self, key: &SessionKey) {
        self.remove(&Self::cache_key(key));
    }

    /// Clear the entry for `key` unless it already points at another session.
    pub fn clear_if(&self, key: &SessionKey, id: &SessionId) {
        match self.get(key) {
            Some(cached) if &cached != id => {
                debug!(cached = %cached, finalized = %id, "keeping cache entry for newer session");
            }
            Some(_) => self.clear(key),
            None => {}
        }
    }

    /// Remove every cached session entry.
    pub fn clear_all(&self) {
        let keys = match self.storage.keys() {
            Ok(keys) => keys,
            Err(err) => {
                warn!(error = %err, "session cache scan failed");
                return;
            }
        };
        for key in keys.iter().filter(|k| k.starts_with(SESSION_KEY_PREFIX)) {
            self.remove(key);
        }
    }

    /// Record the signed-in user, wiping cached sessions when it changed.
    ///
    /// Returns `true` if entries of a previous user were wiped.
    pub fn observe_user(&self, user_id: &str) -> bool {
        let last = match self.storage.get(LAST_USER_KEY) {
            Ok(last) => last,
            Err(err) => {
                warn!(error = %err, "session cache read failed");
                None
            }
        };
        if last.as_deref() == Some(user_id) {
            return false;
        }

        let switched = last.is_some();
        if switched {
            debug!(user = %user_id, "user changed, clearing cached sessions");
            self.clear_all();
        }
        if let Err(err) = self.storage.set(LAST_USER_KEY, user_id) {
            warn!(error = %err, "session cache write failed");
        }
        switched
    }

    fn remove(&self, cache_key: &str) {
        if let Err(err) = self.storage.remove(cache_key) {
            warn!(error = %err, key = %cache_key, "session cache remove failed");
        }
    }
}
