// Shared State Store Port (Interface)
//
// Redis-shaped primitives shared by every process of the fleet.
// All queue state lives behind this trait; processes hold no authoritative copy.

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;

/// External key/value store with sorted sets, sets, hashes, expiry and pub/sub
#[async_trait]
pub trait SharedStateStore: Send + Sync {
    /// Add or re-score a sorted-set member
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()>;

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>>;

    /// 0-based rank by ascending score (ties ordered by member)
    async fn zrank(&self, key: &str, member: &str) -> Result<Option<u64>>;

    async fn zcard(&self, key: &str) -> Result<u64>;

    /// Returns true if the member was present
    async fn zrem(&self, key: &str, member: &str) -> Result<bool>;

    /// Remove and return the lowest-scored member
    async fn zpopmin(&self, key: &str) -> Result<Option<(String, f64)>>;

    /// Members with a score strictly below `max`, ascending
    async fn zrange_below(&self, key: &str, max: f64) -> Result<Vec<String>>;

    /// Returns true if the member was newly added
    async fn sadd(&self, key: &str, member: &str) -> Result<bool>;

    async fn srem(&self, key: &str, member: &str) -> Result<bool>;

    async fn sismember(&self, key: &str, member: &str) -> Result<bool>;

    async fn scard(&self, key: &str) -> Result<u64>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>>;

    async fn hset_multiple(&self, key: &str, fields: &[(&str, String)]) -> Result<()>;

    /// Empty map when the key does not exist
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    async fn del(&self, key: &str) -> Result<bool>;

    /// Returns false if the key does not exist
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Set a string key with a TTL only if absent (lease acquisition)
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Delete a string key only if it holds `value` (lease release)
    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool>;

    /// Fan a message out to every subscriber of `channel`, in every process
    async fn publish(&self, channel: &str, message: &str) -> Result<()>;

    /// Subscribe to `channel`; the stream ends when the store connection drops
    async fn subscribe(&self, channel: &str) -> Result<mpsc::UnboundedReceiver<String>>;
}

// ============================================================================
// In-process implementation (single-node mode and tests)
// ============================================================================

pub mod memory {
    use super::*;
    use crate::error::AppError;
    use std::collections::HashSet;
    use std::sync::{Mutex, MutexGuard};
    use tokio::time::Instant;

    enum Value {
        Str(String),
        Set(HashSet<String>),
        Hash(HashMap<String, String>),
        Sorted(HashMap<String, f64>),
    }

    impl Value {
        fn sorted(&mut self) -> Option<&mut HashMap<String, f64>> {
            match self {
                Value::Sorted(z) => Some(z),
                _ => None,
            }
        }

        fn set(&mut self) -> Option<&mut HashSet<String>> {
            match self {
                Value::Set(s) => Some(s),
                _ => None,
            }
        }

        fn hash(&mut self) -> Option<&mut HashMap<String, String>> {
            match self {
                Value::Hash(h) => Some(h),
                _ => None,
            }
        }

        fn is_empty(&self) -> bool {
            match self {
                Value::Str(_) => false,
                Value::Set(s) => s.is_empty(),
                Value::Hash(h) => h.is_empty(),
                Value::Sorted(z) => z.is_empty(),
            }
        }
    }

    struct Entry {
        value: Value,
        expires_at: Option<Instant>,
    }

    #[derive(Default)]
    struct State {
        entries: HashMap<String, Entry>,
        subscribers: Vec<(String, mpsc::UnboundedSender<String>)>,
    }

    fn wrong_type(key: &str) -> AppError {
        AppError::Store(format!(
            "WRONGTYPE operation against key holding the wrong kind of value: {}",
            key
        ))
    }

    /// Members ordered by (score, member), as Redis orders sorted sets
    fn ordered(z: &HashMap<String, f64>) -> Vec<(&String, f64)> {
        let mut members: Vec<(&String, f64)> = z.iter().map(|(m, s)| (m, *s)).collect();
        members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        members
    }

    impl State {
        fn purge_if_expired(&mut self, key: &str) {
            let expired = self
                .entries
                .get(key)
                .and_then(|entry| entry.expires_at)
                .is_some_and(|at| at <= Instant::now());
            if expired {
                self.entries.remove(key);
            }
        }

        fn get<T>(
            &mut self,
            key: &str,
            project: fn(&mut Value) -> Option<&mut T>,
        ) -> Result<Option<&mut T>> {
            self.purge_if_expired(key);
            match self.entries.get_mut(key) {
                None => Ok(None),
                Some(entry) => project(&mut entry.value)
                    .map(Some)
                    .ok_or_else(|| wrong_type(key)),
            }
        }

        fn get_or_insert<T>(
            &mut self,
            key: &str,
            empty: fn() -> Value,
            project: fn(&mut Value) -> Option<&mut T>,
        ) -> Result<&mut T> {
            self.purge_if_expired(key);
            let entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: empty(),
                expires_at: None,
            });
            project(&mut entry.value).ok_or_else(|| wrong_type(key))
        }

        /// Redis deletes collections once their last member is removed
        fn remove_if_empty(&mut self, key: &str) {
            if self.entries.get(key).is_some_and(|entry| entry.value.is_empty()) {
                self.entries.remove(key);
            }
        }
    }

    /// SharedStateStore held in process memory
    ///
    /// Behaves like a single Redis instance: member tie-breaking, key expiry
    /// (on `tokio::time`, so paused-clock tests work) and channel fan-out.
    #[derive(Default)]
    pub struct InMemoryStateStore {
        state: Mutex<State>,
    }

    impl InMemoryStateStore {
        pub fn new() -> Self {
            Self::default()
        }

        fn state(&self) -> Result<MutexGuard<'_, State>> {
            self.state
                .lock()
                .map_err(|_| AppError::Store("in-memory store lock poisoned".to_string()))
        }
    }

    #[async_trait]
    impl SharedStateStore for InMemoryStateStore {
        async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
            let mut state = self.state()?;
            let z = state.get_or_insert(key, || Value::Sorted(HashMap::new()), Value::sorted)?;
            z.insert(member.to_string(), score);
            Ok(())
        }

        async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>> {
            let mut state = self.state()?;
            Ok(state
                .get(key, Value::sorted)?
                .and_then(|z| z.get(member).copied()))
        }

        async fn zrank(&self, key: &str, member: &str) -> Result<Option<u64>> {
            let mut state = self.state()?;
            Ok(state.get(key, Value::sorted)?.and_then(|z| {
                ordered(z)
                    .iter()
                    .position(|(m, _)| m.as_str() == member)
                    .map(|rank| rank as u64)
            }))
        }

        async fn zcard(&self, key: &str) -> Result<u64> {
            let mut state = self.state()?;
            Ok(state.get(key, Value::sorted)?.map_or(0, |z| z.len() as u64))
        }

        async fn zrem(&self, key: &str, member: &str) -> Result<bool> {
            let mut state = self.state()?;
            let removed = state
                .get(key, Value::sorted)?
                .is_some_and(|z| z.remove(member).is_some());
            state.remove_if_empty(key);
            Ok(removed)
        }

        async fn zpopmin(&self, key: &str) -> Result<Option<(String, f64)>> {
            let mut state = self.state()?;
            let popped = match state.get(key, Value::sorted)? {
                Some(z) => {
                    let head = ordered(z).first().map(|(m, s)| ((*m).clone(), *s));
                    if let Some((member, _)) = &head {
                        z.remove(member);
                    }
                    head
                }
                None => None,
            };
            state.remove_if_empty(key);
            Ok(popped)
        }

        async fn zrange_below(&self, key: &str, max: f64) -> Result<Vec<String>> {
            let mut state = self.state()?;
            Ok(state
                .get(key, Value::sorted)?
                .map(|z| {
                    ordered(z)
                        .into_iter()
                        .filter(|(_, score)| *score < max)
                        .map(|(m, _)| m.clone())
                        .collect()
                })
                .unwrap_or_default())
        }

        async fn sadd(&self, key: &str, member: &str) -> Result<bool> {
            let mut state = self.state()?;
            let set = state.get_or_insert(key, || Value::Set(HashSet::new()), Value::set)?;
            Ok(set.insert(member.to_string()))
        }

        async fn srem(&self, key: &str, member: &str) -> Result<bool> {
            let mut state = self.state()?;
            let removed = state
                .get(key, Value::set)?
                .is_some_and(|set| set.remove(member));
            state.remove_if_empty(key);
            Ok(removed)
        }

        async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
            let mut state = self.state()?;
            Ok(state
                .get(key, Value::set)?
                .is_some_and(|set| set.contains(member)))
        }

        async fn scard(&self, key: &str) -> Result<u64> {
            let mut state = self.state()?;
            Ok(state.get(key, Value::set)?.map_or(0, |set| set.len() as u64))
        }

        async fn smembers(&self, key: &str) -> Result<Vec<String>> {
            let mut state = self.state()?;
            Ok(state
                .get(key, Value::set)?
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default())
        }

        async fn hset_multiple(&self, key: &str, fields: &[(&str, String)]) -> Result<()> {
            let mut state = self.state()?;
            let hash = state.get_or_insert(key, || Value::Hash(HashMap::new()), Value::hash)?;
            for (field, value) in fields {
                hash.insert(field.to_string(), value.clone());
            }
            Ok(())
        }

        async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
            let mut state = self.state()?;
            Ok(state
                .get(key, Value::hash)?
                .map(|hash| hash.clone())
                .unwrap_or_default())
        }

        async fn del(&self, key: &str) -> Result<bool> {
            let mut state = self.state()?;
            state.purge_if_expired(key);
            Ok(state.entries.remove(key).is_some())
        }

        async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
            let mut state = self.state()?;
            state.purge_if_expired(key);
            match state.entries.get_mut(key) {
                Some(entry) => {
                    entry.expires_at = Some(Instant::now() + ttl);
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
            let mut state = self.state()?;
            state.purge_if_expired(key);
            if state.entries.contains_key(key) {
                return Ok(false);
            }
            state.entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Str(value.to_string()),
                    expires_at: Some(Instant::now() + ttl),
                },
            );
            Ok(true)
        }

        async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool> {
            let mut state = self.state()?;
            state.purge_if_expired(key);
            let matches = matches!(
                state.entries.get(key),
                Some(Entry { value: Value::Str(current), .. }) if current == value
            );
            if matches {
                state.entries.remove(key);
            }
            Ok(matches)
        }

        async fn publish(&self, channel: &str, message: &str) -> Result<()> {
            let mut state = self.state()?;
            state.subscribers.retain(|(subscribed, tx)| {
                subscribed != channel || tx.send(message.to_string()).is_ok()
            });
            Ok(())
        }

        async fn subscribe(&self, channel: &str) -> Result<mpsc::UnboundedReceiver<String>> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.state()?.subscribers.push((channel.to_string(), tx));
            Ok(rx)
        }
    }

}
