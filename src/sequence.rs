//! Per-destination-domain sequence counters
//!
//! Destination chains reject transactions whose nonce (EVM) or account
//! sequence (Cosmos) is out of order, so broadcasts for one domain must be
//! serialized. The map hands each broadcaster an async mutex over its
//! domain's counter; the guard is held for the whole broadcast invocation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;

use crate::protocol::Domain;

#[derive(Debug, Default)]
pub struct SequenceMap {
    inner: Mutex<HashMap<Domain, Arc<AsyncMutex<u64>>>>,
}

impl SequenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the counter for a domain, creating it at zero on first use
    pub fn entry(&self, domain: Domain) -> Arc<AsyncMutex<u64>> {
        self.inner
            .lock()
            .expect("sequence map lock poisoned")
            .entry(domain)
            .or_default()
            .clone()
    }

    /// Seeds the counter for a domain (broadcaster initialization)
    pub async fn put(&self, domain: Domain, value: u64) {
        let entry = self.entry(domain);
        *entry.lock().await = value;
    }

    /// Reads the current counter value
    pub async fn get(&self, domain: Domain) -> u64 {
        let entry = self.entry(domain);
        let value = *entry.lock().await;
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get() {
        let map = SequenceMap::new();
        map.put(Domain::ETHEREUM, 17).await;
        assert_eq!(map.get(Domain::ETHEREUM).await, 17);
        assert_eq!(map.get(Domain::NOBLE).await, 0);
    }

    #[tokio::test]
    async fn test_entry_is_shared() {
        let map = SequenceMap::new();
        let first = map.entry(Domain::NOBLE);
        *first.lock().await = 5;
        assert_eq!(map.get(Domain::NOBLE).await, 5);
    }

    #[tokio::test]
    async fn test_guard_serializes_increments() {
        let map = Arc::new(SequenceMap::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let map = map.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    let entry = map.entry(Domain::ETHEREUM);
                    let mut guard = entry.lock().await;
                    *guard += 1;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(map.get(Domain::ETHEREUM).await, 800);
    }
}
