//! EK-TAKT - Node orchestration
//!
//! Wires the three phases together in their fixed order: discovery, then
//! the one-shot election, then the unbounded round loop. A node enters
//! `run` anonymous and leaves it only on an unrecoverable error.

use crate::discovery::run_discovery;
use crate::election::{derive_topology, Schedule, Topology};
use crate::exchange::Exchange;
use crate::hal::{log_line, Hal};
use crate::rounds::RoundController;
use crate::types::*;

// ============================================================================
// Seeding
// ============================================================================

/// Mix a seed for the exchange primitive's RNG
///
/// Folds the entropy word with the node's wire number and the current
/// tick so that nodes booted from identical firmware seed differently.
pub fn mix_seed(entropy: u32, physical_id: PhysicalId, tick: TimeUs) -> u32 {
    entropy.wrapping_mul((physical_id as u32).wrapping_mul(tick as u32))
}

// ============================================================================
// Node
// ============================================================================

/// A swarm node: HAL, exchange primitive and static configuration
pub struct Node<H: Hal, X: Exchange> {
    hal: H,
    exchange: X,
    config: NodeConfig,
}

impl<H: Hal, X: Exchange> Node<H, X> {
    /// Create a node after validating the configuration
    pub fn new(hal: H, exchange: X, config: NodeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            hal,
            exchange,
            config,
        })
    }

    /// Run the node: discovery, election, then rounds forever
    ///
    /// Returns only on an unrecoverable error (invariant violation or a
    /// failing HAL/exchange call); there is no normal termination.
    pub fn run(mut self) -> Result<()> {
        log_line(
            &self.hal,
            format_args!(
                "EK-TAKT v{} on {}",
                crate::VERSION_STRING,
                self.hal.platform_name()
            ),
        );

        let set = run_discovery(&mut self.hal, &self.config);
        let (topology, schedule) = derive_topology(&set, &self.config)?;
        log_summary(&self.hal, &topology, &schedule, &self.config);

        let tick = self.hal.time_us();
        let entropy = self.hal.entropy();
        let seed = mix_seed(entropy, topology.my_physical_id(), tick);
        log_line(&self.hal, format_args!("Random seed for exchange: {}", seed));
        self.exchange.seed_random(seed);

        let now = self.hal.time_us();
        let mut controller = RoundController::new(&topology, &schedule, &self.config, now);
        controller.run(&mut self.hal, &mut self.exchange)
    }
}

// ============================================================================
// Summary
// ============================================================================

/// Emit the topology/role summary after election
pub fn log_summary<H: Hal>(
    hal: &H,
    topology: &Topology,
    schedule: &Schedule,
    config: &NodeConfig,
) {
    log_line(
        hal,
        format_args!(
            "Role assignment: rank={} id={} role={:?} nodes={}",
            topology.my_rank(),
            topology.my_physical_id(),
            topology.role(),
            topology.node_count()
        ),
    );

    log_line(hal, format_args!("Network topology (sorted by device id):"));
    for (rank, device_id) in topology.order().iter().enumerate() {
        let marker = if rank == topology.my_rank() as usize {
            " <-- ME"
        } else {
            ""
        };
        log_line(
            hal,
            format_args!("  Node {}: DevID=0x{:016X}{}", rank + 1, device_id, marker),
        );
    }

    log_line(
        hal,
        format_args!(
            "Exchange config: nodes={} generation={} payload={}B slot={}us initiator={}",
            topology.node_count(),
            schedule.generation_size(),
            config.payload_size,
            config.slot_len_us,
            schedule.initiator()
        ),
    );
}
