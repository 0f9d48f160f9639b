//! RoundRobin policy: cursor advances before the availability scan, one
//! revolution per call, independent per-P decode sub-cursor in PD mode.
//!
//! Grounded on `RoundRobinExecutor.cpp`: `SingleNodeExecute` advances the
//! cursor modulo list size *before* testing availability and stops at the
//! first hit within one revolution; `PickDNodeByP` keeps one sub-cursor per
//! Prefill id into that Prefill's decode-peer list.

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::core::{DeployMode, RequestBody, RequestType, RoutingDecision, WorkerId};
use crate::errors::{CoordinatorError, Feature, Module, Result};
use crate::node_store::NodeStore;

use super::RoutingPolicy;

pub struct RoundRobinPolicy {
    cursor: Mutex<usize>,
    prefill_cursor: Mutex<usize>,
    /// Per-Prefill decode sub-cursor, keyed by Prefill worker id.
    decode_cursors: DashMap<WorkerId, usize>,
}

impl Default for RoundRobinPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundRobinPolicy {
    pub fn new() -> Self {
        Self {
            cursor: Mutex::new(0),
            prefill_cursor: Mutex::new(0),
            decode_cursors: DashMap::new(),
        }
    }

    fn pick_single(&self, store: &NodeStore) -> Result<RoutingDecision> {
        let nodes = store.get_node_list();
        if nodes.is_empty() {
            return Err(CoordinatorError::Unavailable {
                module: Module::Policy,
                feature: Feature::RoundRobin,
            });
        }
        let len = nodes.len();
        let mut cursor = self.cursor.lock();
        for _ in 0..len {
            *cursor = (*cursor + 1) % len;
            let candidate = nodes[*cursor];
            if let Some((static_info, dynamic_info)) = store.get_by_id(candidate) {
                if static_info.is_available(&dynamic_info) {
                    return Ok(RoutingDecision::Single(candidate));
                }
            }
        }
        Err(CoordinatorError::Unavailable {
            module: Module::Policy,
            feature: Feature::RoundRobin,
        })
    }

    fn pick_pair(&self, store: &NodeStore) -> Result<RoutingDecision> {
        let prefills = store.get_prefill_list();
        if prefills.is_empty() {
            return Err(CoordinatorError::Unavailable {
                module: Module::Policy,
                feature: Feature::RoundRobin,
            });
        }
        let p2d = store.get_p2d();
        let len = prefills.len();
        let mut cursor = self.prefill_cursor.lock();
        for _ in 0..len {
            *cursor = (*cursor + 1) % len;
            let p = prefills[*cursor];
            let Some((p_static, p_dynamic)) = store.get_by_id(p) else {
                continue;
            };
            if !p_static.is_available(&p_dynamic) {
                continue;
            }
            let Some(decodes) = p2d.get(&p) else {
                continue;
            };
            if decodes.is_empty() {
                continue;
            }
            if let Some(d) = self.pick_decode_for_prefill(store, p, decodes) {
                return Ok(RoutingDecision::Pair(p, d));
            }
        }
        Err(CoordinatorError::Unavailable {
            module: Module::Policy,
            feature: Feature::RoundRobin,
        })
    }

    fn pick_decode_for_prefill(
        &self,
        store: &NodeStore,
        prefill: WorkerId,
        decodes: &[WorkerId],
    ) -> Option<WorkerId> {
        let len = decodes.len();
        let mut entry = self.decode_cursors.entry(prefill).or_insert(0);
        for _ in 0..len {
            *entry = (*entry + 1) % len;
            let candidate = decodes[*entry];
            if let Some((static_info, dynamic_info)) = store.get_by_id(candidate) {
                if static_info.is_available(&dynamic_info) {
                    return Some(candidate);
                }
            }
        }
        None
    }
}

impl RoutingPolicy for RoundRobinPolicy {
    fn pick(
        &self,
        store: &NodeStore,
        mode: DeployMode,
        _request_type: RequestType,
        _body: &RequestBody,
    ) -> Result<RoutingDecision> {
        match mode {
            DeployMode::SingleNode => self.pick_single(store),
            DeployMode::PdDisaggregated => self.pick_pair(store),
        }
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DynamicInfo, StaticInfo, WorkerRole};

    fn register_three(store: &NodeStore) {
        for id in 1..=3u64 {
            store.register(vec![StaticInfo {
                id: WorkerId(id),
                role: WorkerRole::Undefined,
                label: "w".into(),
                max_seq_len: 1,
                max_output_len: 1,
                total_slots: 10,
                total_blocks: 10,
                block_size: 1,
            }]);
            store.update(vec![(
                WorkerId(id),
                DynamicInfo {
                    avail_slots: 5,
                    avail_blocks: 5,
                    peers: vec![],
                },
            )]);
        }
    }

    #[test]
    fn single_node_round_robins_in_order() {
        let store = NodeStore::new();
        register_three(&store);
        let policy = RoundRobinPolicy::new();
        let mut picks = vec![];
        for _ in 0..6 {
            match policy
                .pick(&store, DeployMode::SingleNode, RequestType::Raw, &RequestBody::Text(String::new()))
                .unwrap()
            {
                RoutingDecision::Single(id) => picks.push(id.0),
                _ => panic!("expected single"),
            }
        }
        assert_eq!(picks, vec![1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn single_node_skips_unavailable_worker() {
        let store = NodeStore::new();
        register_three(&store);
        // Make worker 2 unavailable.
        store.update(vec![(
            WorkerId(2),
            DynamicInfo {
                avail_slots: 0,
                avail_blocks: 5,
                peers: vec![],
            },
        )]);
        let policy = RoundRobinPolicy::new();
        // Drain the first revolution to land cursor at a known spot.
        let mut picks = vec![];
        for _ in 0..3 {
            match policy
                .pick(&store, DeployMode::SingleNode, RequestType::Raw, &RequestBody::Text(String::new()))
                .unwrap()
            {
                RoutingDecision::Single(id) => picks.push(id.0),
                _ => panic!("expected single"),
            }
        }
        assert_eq!(picks, vec![1, 3, 1]);
    }

    #[test]
    fn unavailable_when_all_fleet_fails_availability() {
        let store = NodeStore::new();
        store.register(vec![StaticInfo {
            id: WorkerId(1),
            role: WorkerRole::Undefined,
            label: "w".into(),
            max_seq_len: 1,
            max_output_len: 1,
            total_slots: 10,
            total_blocks: 10,
            block_size: 1,
        }]);
        store.update(vec![(
            WorkerId(1),
            DynamicInfo {
                avail_slots: 0,
                avail_blocks: 0,
                peers: vec![],
            },
        )]);
        let policy = RoundRobinPolicy::new();
        let result = policy.pick(&store, DeployMode::SingleNode, RequestType::Raw, &RequestBody::Text(String::new()));
        assert!(matches!(result, Err(CoordinatorError::Unavailable { .. })));
    }

    #[test]
    fn pd_disaggregated_cycles_prefill_and_matching_decode_peers() {
        let store = NodeStore::new();
        for id in 0..3u64 {
            store.register(vec![StaticInfo {
                id: WorkerId(id),
                role: WorkerRole::Prefill,
                label: "p".into(),
                max_seq_len: 1,
                max_output_len: 1,
                total_slots: 10,
                total_blocks: 10,
                block_size: 1,
            }]);
        }
        for id in 3..5u64 {
            store.register(vec![StaticInfo {
                id: WorkerId(id),
                role: WorkerRole::Decode,
                label: "d".into(),
                max_seq_len: 1,
                max_output_len: 1,
                total_slots: 10,
                total_blocks: 10,
                block_size: 1,
            }]);
        }
        store.update(vec![
            (WorkerId(0), DynamicInfo { avail_slots: 5, avail_blocks: 5, peers: vec![] }),
            (WorkerId(1), DynamicInfo { avail_slots: 5, avail_blocks: 5, peers: vec![] }),
            (WorkerId(2), DynamicInfo { avail_slots: 5, avail_blocks: 5, peers: vec![] }),
            (WorkerId(3), DynamicInfo { avail_slots: 5, avail_blocks: 5, peers: vec![WorkerId(0), WorkerId(2)] }),
            (WorkerId(4), DynamicInfo { avail_slots: 5, avail_blocks: 5, peers: vec![WorkerId(1)] }),
        ]);

        let policy = RoundRobinPolicy::new();
        let mut prefill_picks = vec![];
        for _ in 0..6 {
            match policy
                .pick(&store, DeployMode::PdDisaggregated, RequestType::Raw, &RequestBody::Text(String::new()))
                .unwrap()
            {
                RoutingDecision::Pair(p, d) => {
                    prefill_picks.push(p.0);
                    assert!(d.0 == 3 || d.0 == 4);
                }
                _ => panic!("expected pair"),
            }
        }
        assert_eq!(prefill_picks, vec![1, 2, 0, 1, 2, 0]);
    }
}
