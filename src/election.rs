//! EK-TAKT - Deterministic election and schedule derivation
//!
//! Once discovery closes, every node sorts the same candidate set by
//! device id under the same policy, so every node computes the same total
//! order, the same coordinator and the same slot schedule without any
//! further communication. The derivation runs exactly once per process
//! lifetime; membership is frozen from here on.

use crate::discovery::DiscoverySet;
use crate::types::*;
use heapless::Vec;

// ============================================================================
// Topology
// ============================================================================

/// The elected total order over all known nodes
///
/// Ranks are the positions in `order`: a contiguous 0-based permutation
/// with exactly one rank 0, the coordinator.
pub struct Topology {
    order: Vec<DeviceId, MAX_NODES>,
    my_rank: NodeRank,
}

impl Topology {
    /// Number of nodes in the swarm (self included)
    pub fn node_count(&self) -> usize {
        self.order.len()
    }

    /// This node's rank in the elected order
    pub fn my_rank(&self) -> NodeRank {
        self.my_rank
    }

    /// This node's 1-based wire number
    pub fn my_physical_id(&self) -> PhysicalId {
        self.my_rank + 1
    }

    /// This node's role
    pub fn role(&self) -> Role {
        if self.my_rank == 0 {
            Role::Coordinator
        } else {
            Role::Participant
        }
    }

    /// Whether this node is the coordinator
    pub fn is_coordinator(&self) -> bool {
        self.my_rank == 0
    }

    /// Device id of the coordinator (rank 0)
    pub fn coordinator(&self) -> DeviceId {
        self.order[0]
    }

    /// Device id at a given rank
    pub fn device_at_rank(&self, rank: NodeRank) -> Option<DeviceId> {
        self.order.get(rank as usize).copied()
    }

    /// The full elected order, rank 0 first
    pub fn order(&self) -> &[DeviceId] {
        &self.order
    }
}

// ============================================================================
// Schedule
// ============================================================================

/// Slot ownership for one round's generation
///
/// Immutable after derivation; the round controller reads it every round.
pub struct Schedule {
    distribution: Vec<PhysicalId, MAX_SLOTS>,
    initiator: PhysicalId,
}

impl Schedule {
    /// Number of payload slots in the generation
    pub fn generation_size(&self) -> usize {
        self.distribution.len()
    }

    /// Physical id owning a slot
    pub fn owner_of(&self, slot: SlotIndex) -> PhysicalId {
        self.distribution[slot as usize]
    }

    /// Physical id of the node that starts each round (always slot 0's owner)
    pub fn initiator(&self) -> PhysicalId {
        self.initiator
    }

    /// The full slot-to-owner mapping
    pub fn distribution(&self) -> &[PhysicalId] {
        &self.distribution
    }

    /// Iterate over the slots a node owns
    pub fn owned_slots(&self, id: PhysicalId) -> impl Iterator<Item = SlotIndex> + '_ {
        self.distribution
            .iter()
            .enumerate()
            .filter(move |(_, owner)| **owner == id)
            .map(|(slot, _)| slot as SlotIndex)
    }
}

// ============================================================================
// Derivation
// ============================================================================

/// Derive the topology and round schedule from a closed discovery set
///
/// Candidates are the discovered peers plus self, sorted by device id
/// under the configured policy. A duplicate identity in the candidate set
/// or a missing self entry is unrecoverable: both would hand out wrong
/// roles, so startup must abort.
pub fn derive_topology(set: &DiscoverySet, config: &NodeConfig) -> Result<(Topology, Schedule)> {
    let mut order: Vec<DeviceId, MAX_NODES> = Vec::new();
    for peer in set.peers() {
        order.push(peer.device_id).map_err(|_| Error::NoMemory)?;
    }
    order.push(set.my_device_id()).map_err(|_| Error::NoMemory)?;

    match config.selection {
        SelectionPolicy::LowestId => order.sort_unstable(),
        SelectionPolicy::HighestId => order.sort_unstable_by(|a, b| b.cmp(a)),
    }

    // Hardware ids are unique by construction; a collision here would
    // silently give two nodes the same slots, so reject it outright.
    if order.windows(2).any(|w| w[0] == w[1]) {
        return Err(Error::DuplicateDeviceId);
    }

    let my_rank = order
        .iter()
        .position(|&id| id == set.my_device_id())
        .ok_or(Error::SelfMissing)? as NodeRank;

    let mut distribution: Vec<PhysicalId, MAX_SLOTS> = Vec::new();
    for rank in 0..order.len() {
        for _ in 0..config.slots_per_node {
            distribution
                .push((rank + 1) as PhysicalId)
                .map_err(|_| Error::NoMemory)?;
        }
    }
    let initiator = *distribution.first().ok_or(Error::InvalidArg)?;

    Ok((Topology { order, my_rank }, Schedule { distribution, initiator }))
}
