//! EK-TAKT - Bulk-exchange primitive interface
//!
//! The round controller drives an external many-to-all flooding primitive
//! (slot scheduling, network coding and statistics live inside it) through
//! this trait. The kernel only arms, starts and reads it back; correctness
//! of the primitive itself is assumed.

use crate::types::*;

// ============================================================================
// Slot Read Result
// ============================================================================

/// Outcome of reading one payload slot after a round
///
/// A tagged result instead of sentinel pointers: the primitive reports
/// "nothing decoded" and "weak decode" as explicit variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotRead {
    /// Slot decoded to a full payload
    Decoded(heapless::Vec<u8, MAX_PAYLOAD>),
    /// Slot could not be decoded this round
    NotDecoded,
    /// Slot released early with the weak sentinel
    Weak,
}

// ============================================================================
// Arm Flags
// ============================================================================

/// Role flags passed when arming a round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct ArmFlags {
    /// This node starts the flood
    pub initiator: bool,
    /// Scan indefinitely for the initiator's first transmission
    pub infinite_scan: bool,
}

// ============================================================================
// Exchange Trait
// ============================================================================

/// External bulk-exchange primitive
///
/// Call order within a round: `init`, optional `set_weak_release`, `write`
/// for every owned slot, `arm`, then `start` once the shared start deadline
/// has passed. After the returned end deadline, `read` and `stat_slot` are
/// valid until the next `init`.
pub trait Exchange {
    /// Reset the primitive for a new round under the given rank
    fn init(&mut self, rank: NodeRank);

    /// Configure the slot released early with the weak sentinel
    fn set_weak_release(&mut self, slot: SlotIndex);

    /// Provide the payload for a slot this node owns
    ///
    /// `payload` may be shorter than the negotiated payload size; the
    /// primitive zero-fills the remainder.
    fn write(&mut self, slot: SlotIndex, payload: &[u8]) -> Result<()>;

    /// Set role flags for the upcoming round
    fn arm(&mut self, flags: ArmFlags);

    /// Start the round; returns the authoritative end-of-round deadline
    ///
    /// The returned deadline supersedes any locally computed one - the
    /// primitive accounts for its own protocol overhead.
    fn start(&mut self) -> TimeUs;

    /// Read back one slot of the generation
    fn read(&self, slot: SlotIndex) -> SlotRead;

    /// Slot number at which this payload ranked up, or -1 if it never did
    fn stat_slot(&self, slot: SlotIndex) -> i16;

    /// Emit the primitive's internal statistics (optional)
    fn log_statistics(&self) {}

    /// Seed the primitive's random number generator
    fn seed_random(&mut self, seed: u32);
}

// ============================================================================
// Scripted Exchange (for testing)
// ============================================================================

/// Exchange double with scripted per-slot outcomes
///
/// Tests preload what each `read`/`stat_slot` should return and inspect
/// what the controller wrote and armed.
#[cfg(any(test, feature = "std"))]
pub struct ScriptedExchange {
    results: heapless::Vec<SlotRead, MAX_SLOTS>,
    stats: heapless::Vec<i16, MAX_SLOTS>,
    /// Deadline returned from `start`
    pub start_deadline: TimeUs,
    /// Rank passed to the last `init`
    pub last_rank: Option<NodeRank>,
    /// Flags passed to the last `arm`
    pub last_arm: Option<ArmFlags>,
    /// Weak-release slot configured this round, if any
    pub weak_release: Option<SlotIndex>,
    /// Payloads written this round, in call order
    pub writes: heapless::Vec<(SlotIndex, heapless::Vec<u8, MAX_PAYLOAD>), MAX_SLOTS>,
    /// Seed passed to `seed_random`
    pub seed: Option<u32>,
    /// Number of `init` calls observed
    pub init_count: u32,
}

#[cfg(any(test, feature = "std"))]
impl ScriptedExchange {
    /// Create a double for a generation of `size` slots, all not decoded
    pub fn new(size: usize) -> Self {
        let mut results = heapless::Vec::new();
        let mut stats = heapless::Vec::new();
        for _ in 0..size {
            results.push(SlotRead::NotDecoded).unwrap();
            stats.push(-1).unwrap();
        }
        Self {
            results,
            stats,
            start_deadline: 0,
            last_rank: None,
            last_arm: None,
            weak_release: None,
            writes: heapless::Vec::new(),
            seed: None,
            init_count: 0,
        }
    }

    /// Script the outcome of reading `slot`
    pub fn set_result(&mut self, slot: SlotIndex, result: SlotRead) {
        self.results[slot as usize] = result;
    }

    /// Script a decoded payload for `slot`
    pub fn set_decoded(&mut self, slot: SlotIndex, payload: &[u8]) {
        let mut stored = heapless::Vec::new();
        stored.extend_from_slice(payload).unwrap();
        self.results[slot as usize] = SlotRead::Decoded(stored);
    }

    /// Script the rank-up slot reported for `slot`
    pub fn set_stat(&mut self, slot: SlotIndex, value: i16) {
        self.stats[slot as usize] = value;
    }
}

#[cfg(any(test, feature = "std"))]
impl Exchange for ScriptedExchange {
    fn init(&mut self, rank: NodeRank) {
        self.init_count += 1;
        self.last_rank = Some(rank);
        self.weak_release = None;
        self.writes.clear();
    }

    fn set_weak_release(&mut self, slot: SlotIndex) {
        self.weak_release = Some(slot);
    }

    fn write(&mut self, slot: SlotIndex, payload: &[u8]) -> Result<()> {
        let mut stored = heapless::Vec::new();
        stored.extend_from_slice(payload).map_err(|_| Error::InvalidArg)?;
        self.writes
            .push((slot, stored))
            .map_err(|_| Error::NoMemory)?;
        Ok(())
    }

    fn arm(&mut self, flags: ArmFlags) {
        self.last_arm = Some(flags);
    }

    fn start(&mut self) -> TimeUs {
        self.start_deadline
    }

    fn read(&self, slot: SlotIndex) -> SlotRead {
        self.results[slot as usize].clone()
    }

    fn stat_slot(&self, slot: SlotIndex) -> i16 {
        self.stats[slot as usize]
    }

    fn seed_random(&mut self, seed: u32) {
        self.seed = Some(seed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_defaults_not_decoded() {
        let x = ScriptedExchange::new(4);
        assert_eq!(x.read(0), SlotRead::NotDecoded);
        assert_eq!(x.stat_slot(3), -1);
    }

    #[test]
    fn test_scripted_records_round_calls() {
        let mut x = ScriptedExchange::new(2);
        x.init(1);
        x.write(0, &[9; 7]).unwrap();
        x.arm(ArmFlags {
            initiator: true,
            infinite_scan: false,
        });

        assert_eq!(x.last_rank, Some(1));
        assert_eq!(x.writes.len(), 1);
        assert!(x.last_arm.unwrap().initiator);
    }
}
