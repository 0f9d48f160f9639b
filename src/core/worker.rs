//! Worker identity, static capacity, and dynamic availability.
//!
//! Grounded on the Worker trait/metadata split in the reference worker
//! registry (static connection properties vs. mutable load state), adapted
//! from an object-safe trait to a plain value type since workers here are
//! data records owned by [`crate::node_store::NodeStore`], not live handles.

use serde::{Deserialize, Serialize};

/// Opaque worker identifier, assigned by the caller and unique while registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub u64);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index into the group table assigned by the group generator. Stable until
/// the next regeneration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId(pub u32);

/// A worker's role in a disaggregated deployment. Flex workers can serve
/// either role; Undefined workers only appear in single-node deployments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerRole {
    Prefill,
    Decode,
    Flex,
    Undefined,
}

/// Capacity and identity that do not change for the lifetime of a registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticInfo {
    pub id: WorkerId,
    pub role: WorkerRole,
    pub label: String,
    pub max_seq_len: u32,
    pub max_output_len: u32,
    pub total_slots: u32,
    pub total_blocks: u32,
    pub block_size: u32,
}

/// Availability refreshed by periodic `Update` calls.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DynamicInfo {
    pub avail_slots: u32,
    pub avail_blocks: u32,
    /// For Decode workers: the Prefill workers they are physically connected to.
    pub peers: Vec<WorkerId>,
}

impl StaticInfo {
    /// The plain availability predicate used by RoundRobin: non-zero capacity
    /// declared, and some of it currently free.
    pub fn is_available(&self, dynamic: &DynamicInfo) -> bool {
        self.total_slots >= 1
            && self.total_blocks >= 1
            && dynamic.avail_slots > 0
            && dynamic.avail_blocks > 0
    }

    /// The fractional-threshold predicate used by CacheAffinity.
    pub fn passes_thresholds(
        &self,
        dynamic: &DynamicInfo,
        slots_thresh: f64,
        blocks_thresh: f64,
    ) -> bool {
        if self.total_slots == 0 || self.total_blocks == 0 {
            return false;
        }
        let slots_ratio = dynamic.avail_slots as f64 / self.total_slots as f64;
        let blocks_ratio = dynamic.avail_blocks as f64 / self.total_blocks as f64;
        slots_ratio > slots_thresh && blocks_ratio > blocks_thresh
    }
}
