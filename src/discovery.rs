//! EK-TAKT - Beacon discovery engine
//!
//! Drives the bounded discovery phase: broadcast our identity at a fixed
//! cadence, collect and deduplicate the identities of everyone in range,
//! and freeze the result when the window closes. The phase always
//! terminates after the configured duration, even with zero peers found -
//! a node alone in the world elects itself coordinator later.

use crate::beacon::Beacon;
use crate::hal::{log_line, Hal};
use crate::types::*;
use heapless::Vec;

// ============================================================================
// Beacon Outcome
// ============================================================================

/// What happened to one validated beacon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum BeaconOutcome {
    /// A never-seen identity was recorded
    Added,
    /// A known identity's signal reading and timestamp were refreshed
    Refreshed,
    /// Our own beacon echoed back
    SelfEcho,
    /// A never-seen identity arrived with the table at its limit
    TableFull,
}

// ============================================================================
// Discovery Set
// ============================================================================

/// Everything learned during the discovery window
///
/// Mutated only by the discovery engine; read-only once the window closes.
pub struct DiscoverySet {
    my_device_id: DeviceId,
    peers: Vec<PeerRecord, MAX_PEERS>,
    limit: usize,
    dropped: u32,
}

impl DiscoverySet {
    /// Create an empty set for the given identity and peer limit
    pub fn new(my_device_id: DeviceId, limit: usize) -> Self {
        Self {
            my_device_id,
            peers: Vec::new(),
            limit: limit.min(MAX_PEERS),
            dropped: 0,
        }
    }

    /// This node's device id
    pub fn my_device_id(&self) -> DeviceId {
        self.my_device_id
    }

    /// Discovered peers, in arrival order
    pub fn peers(&self) -> &[PeerRecord] {
        &self.peers
    }

    /// Number of distinct peers discovered
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Frames from never-seen identities refused because the table was full
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    /// Check whether an identity has been recorded
    pub fn contains(&self, device_id: DeviceId) -> bool {
        self.peers.iter().any(|p| p.device_id == device_id)
    }

    /// Fold one validated beacon into the set
    ///
    /// Dedup invariant: at most one record per identity, and never our own.
    pub fn observe(&mut self, device_id: DeviceId, rssi: i8, now_ms: u32) -> BeaconOutcome {
        if device_id == self.my_device_id {
            return BeaconOutcome::SelfEcho;
        }

        for peer in self.peers.iter_mut() {
            if peer.device_id == device_id {
                peer.rssi = rssi;
                peer.last_seen_ms = now_ms;
                return BeaconOutcome::Refreshed;
            }
        }

        if self.peers.len() >= self.limit {
            self.dropped += 1;
            return BeaconOutcome::TableFull;
        }

        // limit <= MAX_PEERS, so the push cannot fail
        let _ = self.peers.push(PeerRecord::new(device_id, rssi, now_ms));
        BeaconOutcome::Added
    }
}

// ============================================================================
// Discovery Engine
// ============================================================================

/// Run the discovery phase to completion
///
/// Broadcasts a beacon every `beacon_interval_ms`, drains at most one
/// received frame per polling pass and sleeps [`POLL_SLEEP_MS`] between
/// passes. Malformed frames and self-echoes are discarded silently.
pub fn run_discovery<H: Hal>(hal: &mut H, config: &NodeConfig) -> DiscoverySet {
    let my_id = hal.device_id();
    let mut set = DiscoverySet::new(my_id, config.max_peers);

    log_line(
        hal,
        format_args!(
            "Discovery start: id=0x{:016X} duration={}ms interval={}ms",
            my_id, config.discovery_duration_ms, config.beacon_interval_ms
        ),
    );

    let start_ms = hal.time_ms();
    // Backdate so the first pass transmits immediately
    let mut last_beacon_ms = start_ms.wrapping_sub(config.beacon_interval_ms);
    let mut buf = [0u8; MAX_PAYLOAD];

    loop {
        let now_ms = hal.time_ms();
        if now_ms.wrapping_sub(start_ms) >= config.discovery_duration_ms {
            break;
        }

        if now_ms.wrapping_sub(last_beacon_ms) >= config.beacon_interval_ms {
            let beacon = Beacon {
                device_id: my_id,
                seen_count: set.peer_count() as u8,
                rssi_hint: 0,
            };
            // Fire-and-forget: a lost beacon is repaired by the next one
            let _ = hal.send_beacon(&beacon.encode());
            last_beacon_ms = now_ms;
        }

        // Drain at most one pending frame per pass
        if let Some(rx) = hal.recv_beacon(&mut buf) {
            if let Some(beacon) = Beacon::parse(&buf[..rx.len]) {
                let now_ms = hal.time_ms();
                if set.observe(beacon.device_id, rx.rssi, now_ms) == BeaconOutcome::Added {
                    log_line(
                        hal,
                        format_args!(
                            "Discovered node: DevID=0x{:016X} RSSI={} dBm Total={}",
                            beacon.device_id,
                            rx.rssi,
                            set.peer_count()
                        ),
                    );
                }
            }
        }

        hal.sleep_ms(POLL_SLEEP_MS);
    }

    log_line(
        hal,
        format_args!(
            "Discovery complete: {} peer(s) found, {} frame(s) dropped at capacity",
            set.peer_count(),
            set.dropped()
        ),
    );

    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::BEACON_LEN;
    use crate::hal::TestHal;

    fn frame(device_id: DeviceId) -> [u8; BEACON_LEN] {
        Beacon {
            device_id,
            seen_count: 0,
            rssi_hint: 0,
        }
        .encode()
    }

    #[test]
    fn test_observe_dedup_updates_in_place() {
        let mut set = DiscoverySet::new(1, MAX_PEERS);

        assert_eq!(set.observe(2, -70, 100), BeaconOutcome::Added);
        assert_eq!(set.observe(2, -40, 250), BeaconOutcome::Refreshed);

        assert_eq!(set.peer_count(), 1);
        assert_eq!(set.peers()[0].rssi, -40);
        assert_eq!(set.peers()[0].last_seen_ms, 250);
    }

    #[test]
    fn test_observe_rejects_self() {
        let mut set = DiscoverySet::new(7, MAX_PEERS);
        assert_eq!(set.observe(7, -30, 0), BeaconOutcome::SelfEcho);
        assert_eq!(set.peer_count(), 0);
    }

    #[test]
    fn test_capacity_drops_eleventh_identity() {
        let mut set = DiscoverySet::new(1, 10);

        for id in 100..110 {
            assert_eq!(set.observe(id, -50, 0), BeaconOutcome::Added);
        }
        assert_eq!(set.observe(999, -50, 0), BeaconOutcome::TableFull);

        assert_eq!(set.peer_count(), 10);
        assert!(!set.contains(999));
        assert_eq!(set.dropped(), 1);

        // A known identity still refreshes at capacity
        assert_eq!(set.observe(105, -20, 9), BeaconOutcome::Refreshed);
    }

    #[test]
    fn test_run_discovery_filters_and_terminates() {
        let mut hal = TestHal::new(0xAA);
        hal.push_frame(&frame(0xBB), -42); // new peer
        hal.push_frame(&frame(0xBB), -38); // duplicate
        hal.push_frame(&frame(0xAA), -10); // self echo
        hal.push_frame(&frame(0xCC)[..BEACON_LEN - 2], -50); // too short
        let mut bad = frame(0xDD);
        bad[0] = 0x00; // foreign magic
        hal.push_frame(&bad, -50);
        hal.push_frame(&frame(0xEE), -60); // new peer

        let config = NodeConfig {
            discovery_duration_ms: 100,
            beacon_interval_ms: 30,
            ..Default::default()
        };
        let set = run_discovery(&mut hal, &config);

        assert_eq!(set.peer_count(), 2);
        assert!(set.contains(0xBB));
        assert!(set.contains(0xEE));
        assert!(!set.contains(0xAA));
        assert!(!set.contains(0xDD));

        // Beacons went out at the configured cadence
        assert!(!hal.sent.is_empty());
        assert!(Beacon::parse(&hal.sent[0]).is_some());
    }
}
