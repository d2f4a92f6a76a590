//! Property tests for the coordination protocol
//!
//! Tests the protocol invariants:
//! - Dedup: at most one peer record per identity, never self
//! - Election: ranks form a complete permutation with one coordinator
//! - Schedule: generation size = nodes x slots-per-node
//! - Classification: the four buckets sum to the generation size
//! - Resync: a mismatched round number restarts numbering at 1

use ekt::exchange::ScriptedExchange;
use ekt::hal::TestHal;
use ekt::prelude::*;
use ekt::{BeaconOutcome, MAX_PEERS, ROUND_HEADER_LEN};
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

fn beacon_sequence() -> impl Strategy<Value = Vec<(u64, i8)>> {
    prop::collection::vec((1u64..200, -90i8..0i8), 0..80)
}

fn peer_ids() -> impl Strategy<Value = std::collections::BTreeSet<u64>> {
    prop::collection::btree_set(2u64..100_000, 0..30)
}

/// Test config with pacing small enough for the virtual clock
fn fast_config() -> NodeConfig {
    NodeConfig {
        min_spacing_ms: 1,
        min_spacing_slots: 1,
        slot_len_us: 100,
        ..Default::default()
    }
}

fn set_from_ids(my_id: u64, peers: &std::collections::BTreeSet<u64>) -> DiscoverySet {
    let mut set = DiscoverySet::new(my_id, MAX_PEERS);
    for &id in peers.iter().take(MAX_PEERS) {
        set.observe(id, -50, 0);
    }
    set
}

fn round_payload(slot: u8, owner: u8, round: u32) -> [u8; ROUND_HEADER_LEN] {
    let mut p = [0u8; ROUND_HEADER_LEN];
    p[0] = slot;
    p[1] = owner.wrapping_sub(1);
    p[2] = owner;
    p[3..7].copy_from_slice(&round.to_le_bytes());
    p
}

// ============================================================================
// Discovery Properties
// ============================================================================

proptest! {
    /// CORE INVARIANT: idempotent dedup, and never our own identity
    #[test]
    fn dedup_one_record_per_identity(
        my_id in 1u64..200,
        beacons in beacon_sequence()
    ) {
        let mut set = DiscoverySet::new(my_id, MAX_PEERS);
        for (t, (id, rssi)) in beacons.iter().enumerate() {
            set.observe(*id, *rssi, t as u32);
        }

        prop_assert!(!set.contains(my_id));

        let peers = set.peers();
        for (i, a) in peers.iter().enumerate() {
            for b in peers.iter().skip(i + 1) {
                prop_assert_ne!(a.device_id, b.device_id);
            }
        }
    }

    /// A full table drops new identities without disturbing known ones
    #[test]
    fn full_table_drops_silently(
        my_id in 1u64..10,
        limit in 1usize..10,
        beacons in beacon_sequence()
    ) {
        let mut set = DiscoverySet::new(my_id, limit);
        for (t, (id, rssi)) in beacons.iter().enumerate() {
            let outcome = set.observe(*id, *rssi, t as u32);
            if outcome == BeaconOutcome::TableFull {
                prop_assert!(!set.contains(*id));
            }
            prop_assert!(set.peer_count() <= limit);
        }
    }
}

// ============================================================================
// Election Properties
// ============================================================================

proptest! {
    /// Ranks are a contiguous permutation; the policy picks the extreme id
    #[test]
    fn election_complete_permutation(
        my_id in 1u64..100_000,
        peers in peer_ids(),
        descending in any::<bool>()
    ) {
        prop_assume!(!peers.contains(&my_id));

        let config = NodeConfig {
            selection: if descending {
                SelectionPolicy::HighestId
            } else {
                SelectionPolicy::LowestId
            },
            ..Default::default()
        };
        let set = set_from_ids(my_id, &peers);
        let (topology, schedule) = derive_topology(&set, &config).unwrap();

        let n = set.peer_count() + 1;
        prop_assert_eq!(topology.node_count(), n);

        // Every candidate appears exactly once
        prop_assert!(topology.order().contains(&my_id));
        for peer in set.peers() {
            prop_assert!(topology.order().contains(&peer.device_id));
        }

        // The order is strictly monotonic under the policy
        for pair in topology.order().windows(2) {
            if descending {
                prop_assert!(pair[0] > pair[1]);
            } else {
                prop_assert!(pair[0] < pair[1]);
            }
        }

        // Exactly one coordinator, at the extreme id
        let extreme = if descending {
            *topology.order().iter().max().unwrap()
        } else {
            *topology.order().iter().min().unwrap()
        };
        prop_assert_eq!(topology.coordinator(), extreme);
        prop_assert_eq!(topology.is_coordinator(), my_id == extreme);

        // Self is ranked where the sort put it
        prop_assert_eq!(
            topology.device_at_rank(topology.my_rank()),
            Some(my_id)
        );

        // Schedule shape
        prop_assert_eq!(
            schedule.generation_size(),
            n * config.slots_per_node as usize
        );
        prop_assert_eq!(schedule.initiator(), 1);
        prop_assert_eq!(schedule.owner_of(0), 1);
    }

    /// The derivation is independent of beacon arrival order
    #[test]
    fn election_order_independent(
        my_id in 1u64..1000,
        peers in peer_ids()
    ) {
        prop_assume!(!peers.contains(&my_id));

        let config = NodeConfig::default();
        let forward = set_from_ids(my_id, &peers);

        let mut reversed = DiscoverySet::new(my_id, MAX_PEERS);
        for &id in peers.iter().take(MAX_PEERS).rev() {
            reversed.observe(id, -50, 0);
        }

        let (ta, _) = derive_topology(&forward, &config).unwrap();
        let (tb, _) = derive_topology(&reversed, &config).unwrap();
        prop_assert_eq!(ta.order(), tb.order());
        prop_assert_eq!(ta.my_rank(), tb.my_rank());
    }
}

// ============================================================================
// Round Properties
// ============================================================================

proptest! {
    /// Every slot lands in exactly one bucket; the buckets sum up
    #[test]
    fn classification_covers_generation(
        peer_count in 0usize..5,
        outcomes in prop::collection::vec(0u8..4, 20)
    ) {
        let my_id = 1u64;
        let peers: std::collections::BTreeSet<u64> =
            (2..2 + peer_count as u64).collect();
        let config = fast_config();
        let set = set_from_ids(my_id, &peers);
        let (topology, schedule) = derive_topology(&set, &config).unwrap();
        let generation = schedule.generation_size();

        let mut exchange = ScriptedExchange::new(generation);
        let mut expect = [0u32; 4];
        for slot in 0..generation {
            let outcome = outcomes[slot % outcomes.len()];
            expect[outcome as usize] += 1;
            let owner = schedule.owner_of(slot as u8);
            match outcome {
                0 => {} // not decoded (default)
                1 => exchange.set_result(slot as u8, SlotRead::Weak),
                2 => {
                    let p = round_payload(slot as u8, owner, 1);
                    exchange.set_decoded(slot as u8, &p);
                }
                _ => {
                    // Owner field off by one: decoded but wrong
                    let p = round_payload(slot as u8, owner.wrapping_add(1), 1);
                    exchange.set_decoded(slot as u8, &p);
                }
            }
        }

        let mut hal = TestHal::new(my_id);
        let mut ctl = RoundController::new(&topology, &schedule, &config, 0);
        let report = ctl.run_round(&mut hal, &mut exchange).unwrap();

        prop_assert_eq!(report.not_decoded, expect[0]);
        prop_assert_eq!(report.weak, expect[1]);
        prop_assert_eq!(report.decoded, expect[2]);
        prop_assert_eq!(report.wrong, expect[3]);
        prop_assert_eq!(
            report.decoded + report.not_decoded + report.weak + report.wrong,
            generation as u32
        );
    }

    /// Any slot-0 round number disagreeing with the local counter forces
    /// numbering to restart at 1, never a one-step correction
    #[test]
    fn resync_restarts_at_one(
        local in 2u32..20,
        received in 1u32..1_000
    ) {
        prop_assume!(received != local);

        let my_id = 2u64;
        let peers: std::collections::BTreeSet<u64> = [1u64, 3u64].into_iter().collect();
        let config = fast_config();
        let set = set_from_ids(my_id, &peers);
        let (topology, schedule) = derive_topology(&set, &config).unwrap();

        let mut hal = TestHal::new(my_id);
        let mut exchange = ScriptedExchange::new(schedule.generation_size());
        let mut ctl = RoundController::new(&topology, &schedule, &config, 0);

        // Advance the local counter with no slot-0 information
        for _ in 0..local - 1 {
            ctl.run_round(&mut hal, &mut exchange).unwrap();
        }

        // The mismatching round arrives
        let p = round_payload(0, schedule.owner_of(0), received);
        exchange.set_decoded(0, &p);
        let report = ctl.run_round(&mut hal, &mut exchange).unwrap();
        prop_assert_eq!(
            report.sync,
            SyncStatus::Restarted { received, local }
        );

        // Numbering restarts at 1, not local + 1
        exchange.set_result(0, SlotRead::NotDecoded);
        let report = ctl.run_round(&mut hal, &mut exchange).unwrap();
        prop_assert_eq!(report.round, 1);
    }
}
