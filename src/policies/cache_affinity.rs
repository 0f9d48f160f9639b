//! CacheAffinity policy: session-hash LRU, refresh-ordered (not access-ordered).
//!
//! Grounded on `PrefixCacheExecutor.cpp` for the pick algorithm (first-turn
//! detection, two-hash history/new split, threshold fallback to round-robin)
//! and on `LRUCache.cpp` for the cache itself: `Get` never reorders, only
//! `Put`/`UpdateKey` do, and `UpdateKey` moves the refreshed key to the back.

use std::collections::{HashMap, VecDeque};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use xxhash_rust::xxh3::xxh3_64;

use crate::core::{DeployMode, RequestBody, RequestType, RoutingDecision, WorkerId};
use crate::errors::{CoordinatorError, Feature, Module, Result};
use crate::node_store::NodeStore;

use super::RoutingPolicy;

#[derive(Debug, Clone, Copy)]
pub struct CacheAffinityConfig {
    pub cache_capacity: usize,
    pub slots_thresh: f64,
    pub block_thresh: f64,
}

impl Default for CacheAffinityConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 100,
            slots_thresh: 0.05,
            block_thresh: 0.05,
        }
    }
}

/// Insertion/refresh-ordered LRU: `get` is a pure lookup, `put` and
/// `update_key` are the only operations that move a key to the back.
struct SessionLru {
    capacity: usize,
    order: VecDeque<u64>,
    map: HashMap<u64, WorkerId>,
}

impl SessionLru {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            map: HashMap::new(),
        }
    }

    fn get(&self, key: u64) -> Option<WorkerId> {
        self.map.get(&key).copied()
    }

    fn put(&mut self, key: u64, value: WorkerId) {
        if self.map.contains_key(&key) {
            self.map.insert(key, value);
            return;
        }
        if self.map.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.map.remove(&oldest);
            }
        }
        self.order.push_back(key);
        self.map.insert(key, value);
    }

    fn erase(&mut self, key: u64) {
        if self.map.remove(&key).is_some() {
            self.order.retain(|k| *k != key);
        }
    }

    /// Moves the value under `old_key` to `new_key`, placed at the back.
    fn update_key(&mut self, old_key: u64, new_key: u64) {
        if let Some(value) = self.map.remove(&old_key) {
            self.order.retain(|k| *k != old_key);
            self.order.push_back(new_key);
            self.map.insert(new_key, value);
        }
    }
}

pub struct CacheAffinityPolicy {
    config: CacheAffinityConfig,
    lru: RwLock<SessionLru>,
    fallback_cursor: Mutex<usize>,
}

impl CacheAffinityPolicy {
    pub fn new(config: CacheAffinityConfig) -> Self {
        Self {
            lru: RwLock::new(SessionLru::new(config.cache_capacity)),
            config,
            fallback_cursor: Mutex::new(0),
        }
    }

    fn hash_messages(messages: &[Value]) -> u64 {
        let serialized = serde_json::to_vec(messages).unwrap_or_default();
        xxh3_64(&serialized)
    }

    /// Cursor-advance-then-scan round robin, using the cache-affinity
    /// fractional-threshold predicate instead of the plain availability one.
    /// The cursor advances on every invocation, including ones reached from
    /// a cache-lookup path, because this is a genuine pick, not a peek.
    fn round_robin_fallback(&self, store: &NodeStore) -> Option<WorkerId> {
        let nodes = store.get_node_list();
        if nodes.is_empty() {
            return None;
        }
        let len = nodes.len();
        let mut cursor = self.fallback_cursor.lock();
        for _ in 0..len {
            *cursor = (*cursor + 1) % len;
            let candidate = nodes[*cursor];
            if let Some((static_info, dynamic_info)) = store.get_by_id(candidate) {
                if static_info.passes_thresholds(
                    &dynamic_info,
                    self.config.slots_thresh,
                    self.config.block_thresh,
                ) {
                    return Some(candidate);
                }
            }
        }
        None
    }

    fn unavailable() -> CoordinatorError {
        CoordinatorError::Unavailable {
            module: Module::Policy,
            feature: Feature::CacheAffinity,
        }
    }
}

impl RoutingPolicy for CacheAffinityPolicy {
    fn pick(
        &self,
        store: &NodeStore,
        mode: DeployMode,
        _request_type: RequestType,
        body: &RequestBody,
    ) -> Result<RoutingDecision> {
        if mode != DeployMode::SingleNode {
            return Err(Self::unavailable());
        }
        let text = body.as_text().ok_or_else(|| CoordinatorError::InvalidInput {
            module: Module::Policy,
            feature: Feature::CacheAffinity,
            message: "cache-affinity requires a text body of chat messages".into(),
        })?;
        let messages: Vec<Value> = serde_json::from_str(text).map_err(|e| CoordinatorError::InvalidInput {
            module: Module::Policy,
            feature: Feature::CacheAffinity,
            message: format!("body is not a JSON array of messages: {e}"),
        })?;
        if messages.is_empty() {
            return Err(CoordinatorError::InvalidInput {
                module: Module::Policy,
                feature: Feature::CacheAffinity,
                message: "message array must have at least one element".into(),
            });
        }

        if messages.len() <= 2 {
            let full_hash = Self::hash_messages(&messages);
            let picked = self.round_robin_fallback(store).ok_or_else(Self::unavailable)?;
            self.lru.write().put(full_hash, picked);
            return Ok(RoutingDecision::Single(picked));
        }

        let history_hash = Self::hash_messages(&messages[..messages.len() - 2]);
        let new_hash = Self::hash_messages(&messages);
        if history_hash == 0 || new_hash == 0 {
            let picked = self.round_robin_fallback(store).ok_or_else(Self::unavailable)?;
            return Ok(RoutingDecision::Single(picked));
        }

        let cached = self.lru.read().get(history_hash);
        if let Some(worker) = cached {
            if let Some((static_info, dynamic_info)) = store.get_by_id(worker) {
                if static_info.passes_thresholds(&dynamic_info, self.config.slots_thresh, self.config.block_thresh)
                {
                    self.lru.write().update_key(history_hash, new_hash);
                    return Ok(RoutingDecision::Single(worker));
                }
            }
        }

        let picked = self.round_robin_fallback(store).ok_or_else(Self::unavailable)?;
        let mut lru = self.lru.write();
        lru.erase(history_hash);
        lru.put(new_hash, picked);
        Ok(RoutingDecision::Single(picked))
    }

    fn name(&self) -> &'static str {
        "cache_affinity"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DynamicInfo, StaticInfo, WorkerRole};

    fn register(store: &NodeStore, id: u64) {
        store.register(vec![StaticInfo {
            id: WorkerId(id),
            role: WorkerRole::Undefined,
            label: "w".into(),
            max_seq_len: 1,
            max_output_len: 1,
            total_slots: 100,
            total_blocks: 100,
            block_size: 1,
        }]);
        store.update(vec![(
            WorkerId(id),
            DynamicInfo {
                avail_slots: 100,
                avail_blocks: 100,
                peers: vec![],
            },
        )]);
    }

    fn body(json: &str) -> RequestBody {
        RequestBody::Text(json.to_string())
    }

    #[test]
    fn first_turn_then_continuation_hits_cache() {
        let store = NodeStore::new();
        register(&store, 1);
        register(&store, 2);
        let policy = CacheAffinityPolicy::new(CacheAffinityConfig::default());

        let req1 = body(r#"[{"role":"user","content":"123"}]"#);
        let pick1 = policy.pick(&store, DeployMode::SingleNode, RequestType::OpenAi, &req1).unwrap();

        let req2 = body(
            r#"[{"role":"user","content":"123"},{"role":"assistant","content":"456"},{"role":"user","content":"789"}]"#,
        );
        let pick2 = policy.pick(&store, DeployMode::SingleNode, RequestType::OpenAi, &req2).unwrap();
        assert_eq!(pick1, pick2);
    }

    #[test]
    fn distinct_history_then_matching_continuation_round_trips() {
        let store = NodeStore::new();
        register(&store, 1);
        register(&store, 2);
        let policy = CacheAffinityPolicy::new(CacheAffinityConfig::default());

        let req3 = body(
            r#"[{"role":"user","content":"aaa"},{"role":"assistant","content":"bbb"},{"role":"user","content":"ccc"}]"#,
        );
        let pick3 = policy.pick(&store, DeployMode::SingleNode, RequestType::OpenAi, &req3).unwrap();

        let req4 = body(
            r#"[{"role":"user","content":"aaa"},{"role":"assistant","content":"bbb"},{"role":"user","content":"zzz"}]"#,
        );
        let pick4 = policy.pick(&store, DeployMode::SingleNode, RequestType::OpenAi, &req4).unwrap();
        assert_eq!(pick3, pick4);
    }

    #[test]
    fn lru_evicts_oldest_on_overflow() {
        let mut lru = SessionLru::new(2);
        lru.put(1, WorkerId(1));
        lru.put(2, WorkerId(2));
        lru.put(3, WorkerId(3));
        assert_eq!(lru.get(1), None);
        assert_eq!(lru.get(2), Some(WorkerId(2)));
        assert_eq!(lru.get(3), Some(WorkerId(3)));
    }

    #[test]
    fn update_key_moves_refreshed_entry_to_back() {
        let mut lru = SessionLru::new(2);
        lru.put(1, WorkerId(1));
        lru.put(2, WorkerId(2));
        lru.update_key(1, 10);
        // capacity 2: inserting a third distinct key must evict key 2 (oldest),
        // because 10 was refreshed to the back ahead of it.
        lru.put(3, WorkerId(3));
        assert_eq!(lru.get(2), None);
        assert_eq!(lru.get(10), Some(WorkerId(1)));
        assert_eq!(lru.get(3), Some(WorkerId(3)));
    }
}
