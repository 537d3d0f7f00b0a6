//! Time-boxed in-memory cache for identity lookups.
//!
//! Item and user lookups hit the same handful of ids every cycle; caching them
//! for an hour keeps the per-cycle API call count flat. The cache is read and
//! written from the single cycle task, so a plain mutex is enough.

use crate::clock::{Clock, MonotonicClock};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Map from key to value stamped with its insertion time; entries older than
/// the freshness window read as absent and are replaced on the next insert.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: Mutex<HashMap<K, (V, u64)>>,
    ttl_millis: u64,
    clock: Arc<dyn Clock>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(MonotonicClock::default()))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl_millis: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
            clock,
        }
    }

    /// Fetch a value if present and still fresh.
    pub fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.lock().unwrap();
        let (value, stamp) = entries.get(key)?;
        let age = self.clock.now_millis().saturating_sub(*stamp);
        if age < self.ttl_millis {
            Some(value.clone())
        } else {
            None
        }
    }

    /// Insert or refresh a value, stamping it with the current time.
    pub fn insert(&self, key: K, value: V) {
        let now = self.clock.now_millis();
        self.entries.lock().unwrap().insert(key, (value, now));
    }
}
