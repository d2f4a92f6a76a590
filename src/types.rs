//! EK-TAKT - Base types and configuration
//!
//! Shared data model for the discovery, election and round phases.

// ============================================================================
// Configuration Constants
// ============================================================================

/// Maximum nodes in a swarm (self included)
pub const MAX_NODES: usize = 50;

/// Maximum peers in the discovery table (candidate set = peers + self)
pub const MAX_PEERS: usize = MAX_NODES - 1;

/// Maximum payload slots a single node may own
pub const MAX_SLOTS_PER_NODE: usize = 4;

/// Maximum payload slots in a generation
pub const MAX_SLOTS: usize = MAX_NODES * MAX_SLOTS_PER_NODE;

/// Maximum exchange payload size in bytes
pub const MAX_PAYLOAD: usize = 32;

/// Payload bytes consumed by the kernel header (slot, rank, id, round)
pub const ROUND_HEADER_LEN: usize = 7;

/// Discovery phase duration in milliseconds (default)
pub const DISCOVERY_DURATION_MS: u32 = 10_000;

/// Beacon transmit interval in milliseconds (default)
pub const BEACON_INTERVAL_MS: u32 = 200;

/// Sleep between discovery polling passes in milliseconds
pub const POLL_SLEEP_MS: u32 = 10;

/// Exchange slot length in microseconds (default)
pub const SLOT_LEN_US: u64 = 5_000;

/// Slots of lead time the coordinator grants before starting a round
pub const START_LEAD_SLOTS: u32 = 3;

/// Minimum inter-round spacing in slots
pub const MIN_SPACING_SLOTS: u32 = 10;

/// Minimum inter-round spacing in milliseconds
pub const MIN_SPACING_MS: u32 = 1_000;

/// Exchange payload size in bytes (default)
pub const PAYLOAD_SIZE: u8 = 16;

// ============================================================================
// Basic Types
// ============================================================================

/// Globally unique 64-bit hardware identifier
pub type DeviceId = u64;

/// Position in the elected total order (0 = coordinator)
pub type NodeRank = u8;

/// 1-based node number used on the wire (rank + 1)
pub type PhysicalId = u8;

/// Payload slot index within a generation
pub type SlotIndex = u8;

/// Timestamp in microseconds
pub type TimeUs = u64;

// ============================================================================
// Error Types
// ============================================================================

/// Result type for EK-TAKT operations
pub type Result<T> = core::result::Result<T, Error>;

/// Error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum Error {
    /// Invalid argument provided
    InvalidArg,
    /// Out of memory
    NoMemory,
    /// Two candidates carry the same device id
    DuplicateDeviceId,
    /// Own device id missing from the elected order
    SelfMissing,
    /// HAL failure
    HalFailure,
}

// ============================================================================
// Node Role
// ============================================================================

/// Role assigned by the election
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum Role {
    /// Rank 0: starts each round and anchors round numbering
    Coordinator,
    /// Any other rank
    #[default]
    Participant,
}

// ============================================================================
// Coordinator Selection
// ============================================================================

/// How the total order over device ids is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum SelectionPolicy {
    /// Lowest device id becomes coordinator
    #[default]
    LowestId,
    /// Highest device id becomes coordinator
    HighestId,
}

// ============================================================================
// Peer Record
// ============================================================================

/// Information about a discovered peer
///
/// At most one record exists per device id; repeated beacons update the
/// signal reading and timestamp in place.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct PeerRecord {
    /// Peer's unique device id
    pub device_id: DeviceId,
    /// Signal strength of the last beacon (dBm)
    pub rssi: i8,
    /// Timestamp of the last beacon (milliseconds)
    pub last_seen_ms: u32,
    /// Peer is considered present
    pub active: bool,
}

impl PeerRecord {
    /// Create a record from a first beacon
    pub fn new(device_id: DeviceId, rssi: i8, now_ms: u32) -> Self {
        Self {
            device_id,
            rssi,
            last_seen_ms: now_ms,
            active: true,
        }
    }
}

// ============================================================================
// Node Configuration
// ============================================================================

/// Static configuration, fixed before the node starts
#[derive(Debug, Clone, Copy)]
pub struct NodeConfig {
    /// Discovery phase duration (milliseconds)
    pub discovery_duration_ms: u32,
    /// Beacon transmit interval (milliseconds)
    pub beacon_interval_ms: u32,
    /// Peer table limit (at most [`MAX_PEERS`])
    pub max_peers: usize,
    /// Coordinator selection policy
    pub selection: SelectionPolicy,
    /// Payload slots owned by each node
    pub slots_per_node: u8,
    /// Exchange payload size in bytes
    pub payload_size: u8,
    /// Exchange slot length (microseconds)
    pub slot_len_us: u64,
    /// Coordinator start lead (slots)
    pub start_lead_slots: u32,
    /// Minimum inter-round spacing (slots)
    pub min_spacing_slots: u32,
    /// Minimum inter-round spacing (milliseconds)
    pub min_spacing_ms: u32,
    /// Slot released with the weak sentinel, if the primitive supports it
    pub weak_release_slot: Option<SlotIndex>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            discovery_duration_ms: DISCOVERY_DURATION_MS,
            beacon_interval_ms: BEACON_INTERVAL_MS,
            max_peers: MAX_PEERS,
            selection: SelectionPolicy::LowestId,
            slots_per_node: 2,
            payload_size: PAYLOAD_SIZE,
            slot_len_us: SLOT_LEN_US,
            start_lead_slots: START_LEAD_SLOTS,
            min_spacing_slots: MIN_SPACING_SLOTS,
            min_spacing_ms: MIN_SPACING_MS,
            weak_release_slot: None,
        }
    }
}

impl NodeConfig {
    /// Check configuration bounds
    pub fn validate(&self) -> Result<()> {
        if self.beacon_interval_ms == 0 || self.discovery_duration_ms < self.beacon_interval_ms {
            return Err(Error::InvalidArg);
        }
        if self.max_peers == 0 || self.max_peers > MAX_PEERS {
            return Err(Error::InvalidArg);
        }
        if self.slots_per_node == 0 || self.slots_per_node as usize > MAX_SLOTS_PER_NODE {
            return Err(Error::InvalidArg);
        }
        if (self.payload_size as usize) < ROUND_HEADER_LEN
            || self.payload_size as usize > MAX_PAYLOAD
        {
            return Err(Error::InvalidArg);
        }
        if self.slot_len_us == 0 {
            return Err(Error::InvalidArg);
        }
        Ok(())
    }
}
