use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ladico_core::model::SessionKey;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Locks = HashMap<SessionKey, Arc<AsyncMutex<()>>>;

/// Per-key async locks serialising session creation within one manager.
///
/// Entries are dropped once nobody holds or waits on them.
#[derive(Default)]
pub(crate) struct InFlight {
    locks: Mutex<Locks>,
}

impl InFlight {
    pub(crate) async fn acquire(&self, key: &SessionKey) -> InFlightGuard<'_> {
        let lock = {
            let mut locks = self.locks();
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        let guard = Arc::clone(&lock).lock_owned().await;
        InFlightGuard {
            owner: self,
            key: key.clone(),
            lock,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks().len()
    }

    // The map only holds `Arc`s, so a poisoned lock is still consistent.
    fn locks(&self) -> MutexGuard<'_, Locks> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) struct InFlightGuard<'a> {
    owner: &'a InFlight,
    key: SessionKey,
    lock: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.owner.locks();
        // One reference in the map, one here: nobody else is waiting.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn key() -> SessionKey {
        SessionKey::new("u1", "1.1", "basico").unwrap()
    }

    #[tokio::test]
    async fn entry_removed_after_release() {
        let in_flight = InFlight::default();
        {
            let _guard = in_flight.acquire(&key()).await;
            assert_eq!(in_flight.len(), 1);
        }
        assert_eq!(in_flight.len(), 0);
    }

    #[tokio::test]
    async fn second_caller_waits_for_first() {
        let in_flight = Arc::new(InFlight::default());
        let first = in_flight.acquire(&key()).await;

        let waiter = {
            let in_flight = Arc::clone(&in_flight);
            tokio::spawn(async move {
                let _guard = in_flight.acquire(&key()).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        waiter.await.unwrap();
        assert_eq!(in_flight.len(), 0);
    }
}
