//! EK-TAKT - Multi-node swarm simulation harness
//!
//! Spins up N kernel nodes in one process, wired over the in-memory bus
//! and exchange medium, runs a fixed number of rounds and emits one JSON
//! line per node per round for cross-checking against hardware logs.

use ekt::prelude::*;
use ekt::sim::{SimBus, SimMedium};
use ekt::{log_summary, mix_seed, MAX_NODES};

use serde::Serialize;
use std::sync::mpsc;
use std::{env, thread};

// ============================================================================
// Result Lines
// ============================================================================

#[derive(Debug, Serialize)]
struct RoundLine {
    node: u8,
    round: u32,
    rank: u32,
    decoded: u32,
    not_decoded: u32,
    weak: u32,
    wrong: u32,
    resynced: bool,
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() {
    let args: Vec<String> = env::args().collect();
    let nodes: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(3);
    let rounds: u32 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(5);

    if nodes == 0 || nodes > MAX_NODES || rounds == 0 {
        eprintln!("Usage: swarm_sim [nodes (1..={})] [rounds]", MAX_NODES);
        std::process::exit(1);
    }

    let config = NodeConfig {
        discovery_duration_ms: 1_000,
        beacon_interval_ms: 100,
        slot_len_us: 1_000,
        min_spacing_ms: 100,
        min_spacing_slots: 10,
        ..Default::default()
    };
    config.validate().expect("sim config");

    let generation = nodes * config.slots_per_node as usize;
    let round_len_us = 50 * config.slot_len_us;

    let bus = SimBus::new();
    let medium = SimMedium::new(generation);

    let (tx, rx) = mpsc::channel();
    let mut handles = Vec::new();

    for i in 0..nodes {
        // Distinct deterministic "hardware" ids
        let device_id = 0x1111_1111_u64 * (i as u64 + 1);
        let mut hal = bus.attach(device_id);
        let mut exchange = medium.attach(&bus, round_len_us);
        let tx = tx.clone();

        handles.push(thread::spawn(move || {
            let set = run_discovery(&mut hal, &config);
            let (topology, schedule) = derive_topology(&set, &config).expect("election");
            log_summary(&hal, &topology, &schedule, &config);

            let tick = hal.time_us();
            let entropy = hal.entropy();
            exchange.seed_random(mix_seed(entropy, topology.my_physical_id(), tick));

            let mut controller =
                RoundController::new(&topology, &schedule, &config, hal.time_us());
            for _ in 0..rounds {
                let report = controller
                    .run_round(&mut hal, &mut exchange)
                    .expect("round");
                let line = RoundLine {
                    node: topology.my_physical_id(),
                    round: report.round,
                    rank: report.rank,
                    decoded: report.decoded,
                    not_decoded: report.not_decoded,
                    weak: report.weak,
                    wrong: report.wrong,
                    resynced: matches!(report.sync, SyncStatus::Restarted { .. }),
                };
                if tx.send(line).is_err() {
                    break;
                }
            }
        }));
    }
    drop(tx);

    let mut lines: Vec<RoundLine> = rx.iter().collect();
    for handle in handles {
        handle.join().expect("node thread panicked");
    }

    lines.sort_by_key(|line| (line.round, line.node));
    for line in &lines {
        println!("{}", serde_json::to_string(line).expect("serialize"));
    }
}
