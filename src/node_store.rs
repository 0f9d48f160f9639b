//! C1 — threadsafe repository of worker static info, dynamic info, and the
//! prefill <-> decode peering graph.
//!
//! Grounded directly on the reference `NodeStore`: one mutex guards five maps,
//! `p2d` is always rebuilt wholesale from `d2p` rather than mutated directly,
//! and every operation is structurally infallible (unknown ids are logged and
//! skipped, never failed as a batch).

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::core::{DynamicInfo, StaticInfo, WorkerId, WorkerRole};

#[derive(Default)]
struct Inner {
    static_map: HashMap<WorkerId, StaticInfo>,
    dynamic_map: HashMap<WorkerId, DynamicInfo>,
    index_list: Vec<WorkerId>,
    prefill_list: Vec<WorkerId>,
    /// Decode id -> the Prefill ids it reported as peers.
    d2p: HashMap<WorkerId, Vec<WorkerId>>,
    /// Prefill id -> Decode ids that named it as a peer. Always derived from `d2p`.
    p2d: HashMap<WorkerId, Vec<WorkerId>>,
}

/// Threadsafe worker registry. A single mutex guards all internal state;
/// readers receive owned copies so no lock is held across policy evaluation.
pub struct NodeStore {
    inner: Mutex<Inner>,
}

impl Default for NodeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Idempotent per id: re-registering an already-present id is a logged
    /// no-op for that id, not a failure for the whole batch.
    pub fn register(&self, instances: Vec<StaticInfo>) {
        let mut inner = self.inner.lock();
        for info in instances {
            if inner.static_map.contains_key(&info.id) {
                warn!(worker_id = %info.id, "node already registered, skipping");
                continue;
            }
            info!(worker_id = %info.id, role = ?info.role, "registering worker");
            let role = info.role;
            let id = info.id;
            inner.index_list.push(id);
            if role == WorkerRole::Prefill {
                inner.prefill_list.push(id);
            }
            inner.static_map.insert(id, info);
        }
    }

    /// Missing ids are ignored. Removes the id from every internal structure.
    pub fn remove(&self, ids: &[WorkerId]) {
        let mut inner = self.inner.lock();
        for id in ids {
            inner.static_map.remove(id);
            inner.dynamic_map.remove(id);
            inner.index_list.retain(|x| x != id);
            inner.prefill_list.retain(|x| x != id);
            inner.d2p.remove(id);
            info!(worker_id = %id, "removed worker");
        }
        Self::rebuild_p2d(&mut inner);
    }

    /// Replaces the dynamic record for each instance. For Decode records,
    /// rebuilds `d2p[id]` from reported peers, then rebuilds `p2d` wholesale
    /// from the union of every `d2p` entry. `p2d` is always derived, never
    /// directly mutated.
    pub fn update(&self, instances: Vec<(WorkerId, DynamicInfo)>) {
        let mut inner = self.inner.lock();
        for (id, dynamic) in instances {
            let role = inner.static_map.get(&id).map(|s| s.role);
            if role == Some(WorkerRole::Decode) {
                inner.d2p.insert(id, dynamic.peers.clone());
            }
            inner.dynamic_map.insert(id, dynamic);
        }
        Self::rebuild_p2d(&mut inner);
    }

    fn rebuild_p2d(inner: &mut Inner) {
        inner.p2d.clear();
        for (decode_id, peers) in inner.d2p.iter() {
            for prefill_id in peers {
                inner.p2d.entry(*prefill_id).or_default().push(*decode_id);
            }
        }
    }

    pub fn get_by_id(&self, id: WorkerId) -> Option<(StaticInfo, DynamicInfo)> {
        let inner = self.inner.lock();
        let s = inner.static_map.get(&id)?.clone();
        let d = inner.dynamic_map.get(&id).cloned().unwrap_or_default();
        Some((s, d))
    }

    pub fn get_node_list(&self) -> Vec<WorkerId> {
        self.inner.lock().index_list.clone()
    }

    pub fn get_prefill_list(&self) -> Vec<WorkerId> {
        self.inner.lock().prefill_list.clone()
    }

    pub fn get_p2d(&self) -> HashMap<WorkerId, Vec<WorkerId>> {
        self.inner.lock().p2d.clone()
    }

    pub fn is_node_available(&self, id: WorkerId) -> bool {
        self.inner.lock().static_map.contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn static_info(id: u64, role: WorkerRole) -> StaticInfo {
        StaticInfo {
            id: WorkerId(id),
            role,
            label: "test".into(),
            max_seq_len: 4096,
            max_output_len: 1024,
            total_slots: 10,
            total_blocks: 10,
            block_size: 128,
        }
    }

    #[test]
    fn register_is_idempotent_per_id() {
        let store = NodeStore::new();
        store.register(vec![static_info(1, WorkerRole::Prefill)]);
        store.register(vec![static_info(1, WorkerRole::Decode)]);
        assert_eq!(store.get_node_list(), vec![WorkerId(1)]);
        // second registration was a no-op: role remains Prefill
        let (s, _) = store.get_by_id(WorkerId(1)).unwrap();
        assert_eq!(s.role, WorkerRole::Prefill);
    }

    #[test]
    fn register_remove_round_trip() {
        let store = NodeStore::new();
        store.register(vec![
            static_info(1, WorkerRole::Prefill),
            static_info(2, WorkerRole::Decode),
        ]);
        store.remove(&[WorkerId(1), WorkerId(2)]);
        assert!(store.get_node_list().is_empty());
        assert!(store.get_prefill_list().is_empty());
        assert!(store.get_p2d().is_empty());
    }

    #[test]
    fn update_twice_is_a_no_op_after_the_first() {
        let store = NodeStore::new();
        store.register(vec![static_info(1, WorkerRole::Prefill)]);
        let dynamic = DynamicInfo {
            avail_slots: 5,
            avail_blocks: 5,
            peers: vec![],
        };
        store.update(vec![(WorkerId(1), dynamic.clone())]);
        store.update(vec![(WorkerId(1), dynamic.clone())]);
        let (_, d) = store.get_by_id(WorkerId(1)).unwrap();
        assert_eq!(d, dynamic);
    }

    #[test]
    fn p2d_is_the_transpose_of_d2p() {
        let store = NodeStore::new();
        store.register(vec![
            static_info(0, WorkerRole::Prefill),
            static_info(1, WorkerRole::Prefill),
            static_info(2, WorkerRole::Decode),
        ]);
        store.update(vec![(
            WorkerId(2),
            DynamicInfo {
                avail_slots: 1,
                avail_blocks: 1,
                peers: vec![WorkerId(0), WorkerId(1)],
            },
        )]);
        let p2d = store.get_p2d();
        assert_eq!(p2d.get(&WorkerId(0)), Some(&vec![WorkerId(2)]));
        assert_eq!(p2d.get(&WorkerId(1)), Some(&vec![WorkerId(2)]));
    }

    #[test]
    fn unknown_worker_id_is_unavailable() {
        let store = NodeStore::new();
        assert!(!store.is_node_available(WorkerId(99)));
    }
}
