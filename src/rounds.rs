//! EK-TAKT - Round controller
//!
//! Runs the unbounded sequence of synchronized exchange rounds:
//! Prepare -> Arm -> WaitStart -> Execute -> Evaluate -> Pace. Within a
//! round those stages are strictly ordered; round N+1 never prepares
//! before round N's pacing completed.
//!
//! Round numbering is anchored by the coordinator: its slot-0 payload
//! carries the round counter, participants adopt it on their first round
//! and restart numbering from scratch whenever it later disagrees with
//! their own.

use crate::election::{Schedule, Topology};
use crate::exchange::{ArmFlags, Exchange, SlotRead};
use crate::hal::{log_line, spin_until, Hal};
use crate::types::*;
use heapless::Vec;

// ============================================================================
// Round State
// ============================================================================

/// Mutable per-round state
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct RoundState {
    /// Local round counter (0 = not started)
    pub round: u32,
    /// Reference deadline for the next round start
    pub t_ref: TimeUs,
    /// Slots decoded with matching header fields
    pub decoded: u32,
    /// Slots that never decoded
    pub not_decoded: u32,
    /// Slots released with the weak sentinel
    pub weak: u32,
    /// Slots decoded with mismatching header fields
    pub wrong: u32,
}

// ============================================================================
// Sync Status
// ============================================================================

/// Round-number synchronization outcome of one round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum SyncStatus {
    /// Slot 0 agreed with the local counter, or carried no information
    #[default]
    InSync,
    /// First round: adopted the coordinator's round number
    Adopted(u32),
    /// Counter disagreement: numbering restarts from 1 next round
    Restarted {
        /// Round number received in slot 0
        received: u32,
        /// Local counter at the time of the mismatch
        local: u32,
    },
}

// ============================================================================
// Round Report
// ============================================================================

/// Aggregate outcome of one round
#[derive(Debug, Clone, Default)]
pub struct RoundReport {
    /// Round number as counted after evaluation
    pub round: u32,
    /// Slots that ranked up at this node (stat >= 0)
    pub rank: u32,
    /// Slots decoded with matching header fields
    pub decoded: u32,
    /// Slots that never decoded
    pub not_decoded: u32,
    /// Slots released with the weak sentinel
    pub weak: u32,
    /// Slots decoded with mismatching header fields
    pub wrong: u32,
    /// Round-number synchronization outcome
    pub sync: SyncStatus,
    /// Rank-up slot values, grouped ascending
    pub rank_up_slots: Vec<i16, MAX_SLOTS>,
    /// Slot rows in rank-up order (parallel to `rank_up_slots`)
    pub rank_up_rows: Vec<SlotIndex, MAX_SLOTS>,
}

// ============================================================================
// Round Controller
// ============================================================================

/// Drives the exchange primitive round after round
///
/// Owns only the round state; the HAL and the primitive are passed per
/// call so harnesses can inspect them between rounds.
pub struct RoundController<'a> {
    topology: &'a Topology,
    schedule: &'a Schedule,
    config: &'a NodeConfig,
    state: RoundState,
}

impl<'a> RoundController<'a> {
    /// Create a controller; `now` anchors the first round's start deadline
    pub fn new(
        topology: &'a Topology,
        schedule: &'a Schedule,
        config: &'a NodeConfig,
        now: TimeUs,
    ) -> Self {
        Self {
            topology,
            schedule,
            config,
            state: RoundState {
                t_ref: now,
                ..Default::default()
            },
        }
    }

    /// Current round state
    pub fn state(&self) -> &RoundState {
        &self.state
    }

    /// Run rounds forever
    ///
    /// Returns only on error; there is no natural "done" state.
    pub fn run<H: Hal, X: Exchange>(&mut self, hal: &mut H, exchange: &mut X) -> Result<()> {
        loop {
            self.run_round(hal, exchange)?;
        }
    }

    /// Run exactly one round of the state machine
    pub fn run_round<H: Hal, X: Exchange>(
        &mut self,
        hal: &mut H,
        exchange: &mut X,
    ) -> Result<RoundReport> {
        self.state.round = self.state.round.wrapping_add(1);
        let round = self.state.round;
        log_line(hal, format_args!("Preparing round {} ...", round));

        // Prepare
        exchange.init(self.topology.my_rank());
        if let Some(slot) = self.config.weak_release_slot {
            exchange.set_weak_release(slot);
        }
        self.write_payloads(exchange, round)?;

        // Arm: round 1 also covers every restart after a resync, where
        // infinite scan re-locks onto the initiator
        exchange.arm(ArmFlags {
            initiator: self.topology.is_coordinator(),
            infinite_scan: round == 1,
        });

        // WaitStart: the coordinator grants everyone a short lead
        if self.topology.is_coordinator() {
            self.state.t_ref += self.config.start_lead_slots as u64 * self.config.slot_len_us;
        }
        log_line(hal, format_args!("Starting round {} ...", round));
        spin_until(hal, self.state.t_ref);

        // The returned deadline supersedes the precomputed one
        self.state.t_ref = exchange.start();

        // Execute
        spin_until(hal, self.state.t_ref);

        // Evaluate
        let sync = self.evaluate(hal, exchange);

        // Pace
        let report = self.report(hal, exchange, sync);
        let spacing_slots = self.config.min_spacing_slots as u64 * self.config.slot_len_us;
        let spacing_wall = self.config.min_spacing_ms as u64 * 1000;
        self.state.t_ref += spacing_slots.max(spacing_wall);

        Ok(report)
    }

    /// Fill every slot this node owns with its tagged payload
    fn write_payloads<X: Exchange>(&self, exchange: &mut X, round: u32) -> Result<()> {
        let mut data = [0u8; ROUND_HEADER_LEN];
        data[1] = self.topology.my_rank();
        data[2] = self.topology.my_physical_id();
        data[3..7].copy_from_slice(&round.to_le_bytes());

        let len = ROUND_HEADER_LEN.min(self.config.payload_size as usize);
        for slot in 0..self.schedule.generation_size() {
            if self.schedule.owner_of(slot as SlotIndex) == self.topology.my_physical_id() {
                data[0] = slot as u8;
                exchange.write(slot as SlotIndex, &data[..len])?;
            }
        }
        Ok(())
    }

    /// Classify every slot and track round-number synchronization
    fn evaluate<H: Hal, X: Exchange>(&mut self, hal: &H, exchange: &X) -> SyncStatus {
        let mut sync = SyncStatus::InSync;

        for slot in 0..self.schedule.generation_size() {
            match exchange.read(slot as SlotIndex) {
                SlotRead::NotDecoded => self.state.not_decoded += 1,
                SlotRead::Weak => self.state.weak += 1,
                SlotRead::Decoded(payload) => {
                    let mut hdr = [0u8; ROUND_HEADER_LEN];
                    let n = hdr.len().min(payload.len());
                    hdr[..n].copy_from_slice(&payload[..n]);

                    if hdr[0] == slot as u8
                        && hdr[2] == self.schedule.owner_of(slot as SlotIndex)
                    {
                        self.state.decoded += 1;
                    } else {
                        self.state.wrong += 1;
                    }

                    // Slot 0 anchors round numbering, whatever its
                    // classification came out as
                    if slot == 0 && payload.len() >= ROUND_HEADER_LEN {
                        let received = u32::from_le_bytes([hdr[3], hdr[4], hdr[5], hdr[6]]);
                        if self.state.round == 1 {
                            self.state.round = received;
                            sync = SyncStatus::Adopted(received);
                            log_line(hal, format_args!("Synchronized to round {}", received));
                        } else if received != self.state.round {
                            log_line(
                                hal,
                                format_args!(
                                    "Round mismatch: received {} <> local {}! Restarting numbering ...",
                                    received, self.state.round
                                ),
                            );
                            let local = self.state.round;
                            // Increments to 1 with the next round
                            self.state.round = 0;
                            sync = SyncStatus::Restarted { received, local };
                        }
                    }
                }
            }
        }

        sync
    }

    /// Emit the per-round status lines and reset the counters
    fn report<H: Hal, X: Exchange>(
        &mut self,
        hal: &H,
        exchange: &X,
        sync: SyncStatus,
    ) -> RoundReport {
        exchange.log_statistics();

        let generation = self.schedule.generation_size();
        let mut rank = 0u32;
        for slot in 0..generation {
            if exchange.stat_slot(slot as SlotIndex) >= 0 {
                rank += 1;
            }
        }

        let (rank_up_slots, rank_up_rows) = self.collect_rank_up(exchange);

        let report = RoundReport {
            round: self.state.round,
            rank,
            decoded: self.state.decoded,
            not_decoded: self.state.not_decoded,
            weak: self.state.weak,
            wrong: self.state.wrong,
            sync,
            rank_up_slots,
            rank_up_rows,
        };

        let id = self.topology.my_physical_id();
        log_line(
            hal,
            format_args!(
                "# ID:{} round={} rank={} dec={} !dec={} weak={} wrong={}",
                id, report.round, report.rank, report.decoded, report.not_decoded,
                report.weak, report.wrong
            ),
        );
        self.log_rank_up(hal, &report);

        self.state.decoded = 0;
        self.state.not_decoded = 0;
        self.state.weak = 0;
        self.state.wrong = 0;

        report
    }

    /// Group rank-up stats ascending by slot value
    fn collect_rank_up<X: Exchange>(
        &self,
        exchange: &X,
    ) -> (Vec<i16, MAX_SLOTS>, Vec<SlotIndex, MAX_SLOTS>) {
        let generation = self.schedule.generation_size();
        let mut slots: Vec<i16, MAX_SLOTS> = Vec::new();
        let mut rows: Vec<SlotIndex, MAX_SLOTS> = Vec::new();

        let mut floor: i16 = 0;
        loop {
            let mut next: Option<i16> = None;
            for row in 0..generation {
                let stat = exchange.stat_slot(row as SlotIndex);
                if stat >= floor && next.map_or(true, |n| stat < n) {
                    next = Some(stat);
                }
            }
            let Some(stat) = next else { break };

            for row in 0..generation {
                if exchange.stat_slot(row as SlotIndex) == stat {
                    let _ = slots.push(stat);
                    let _ = rows.push(row as SlotIndex);
                }
            }

            if stat == i16::MAX {
                break;
            }
            floor = stat + 1;
        }

        (slots, rows)
    }

    fn log_rank_up<H: Hal>(&self, hal: &H, report: &RoundReport) {
        use core::fmt::Write as _;

        let id = self.topology.my_physical_id();

        let mut line: heapless::String<{ crate::hal::LOG_LINE_MAX }> = heapless::String::new();
        let _ = write!(line, "# ID:{} rank_up_slot=[", id);
        for stat in &report.rank_up_slots {
            let _ = write!(line, "{};", stat);
        }
        let _ = write!(line, "]");
        hal.debug_print(&line);

        line.clear();
        let _ = write!(line, "# ID:{} rank_up_row=[", id);
        for row in &report.rank_up_rows {
            let _ = write!(line, "{};", row);
        }
        let _ = write!(line, "]");
        hal.debug_print(&line);
    }
}
