//! Prometheus metrics for the consensus core.
//!
//! [`ConsensusMetrics`] owns a dedicated [`Registry`] so an embedding
//! process can expose it next to its own metrics.

use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry, Encoder, Histogram,
    HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

pub struct ConsensusMetrics {
    pub registry: Registry,

    // ── Counters ────────────────────────────────────────────────────────
    /// Blocks applied to the chain.
    pub blocks_accepted: IntCounter,
    /// Blocks rejected or discarded by the block processor.
    pub blocks_rejected: IntCounter,
    /// Blocks classified as forks.
    pub forks_detected: IntCounter,
    /// Blocks removed from the chain by rollbacks and fork recovery.
    pub blocks_rolled_back: IntCounter,
    /// State machine transitions, labelled by event.
    pub state_transitions: IntCounterVec,

    // ── Gauges ──────────────────────────────────────────────────────────
    /// Height of the last applied block.
    pub chain_height: IntGauge,
    /// Blocks waiting in the processing queue.
    pub queue_length: IntGauge,

    // ── Histograms ──────────────────────────────────────────────────────
    /// Time spent processing one block, in milliseconds.
    pub block_process_time_ms: Histogram,
}

impl ConsensusMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let blocks_accepted = register_int_counter_with_registry!(
            Opts::new("dpos_blocks_accepted_total", "Blocks applied to the chain"),
            registry
        )?;
        let blocks_rejected = register_int_counter_with_registry!(
            Opts::new(
                "dpos_blocks_rejected_total",
                "Blocks rejected or discarded by the block processor"
            ),
            registry
        )?;
        let forks_detected = register_int_counter_with_registry!(
            Opts::new("dpos_forks_detected_total", "Blocks classified as forks"),
            registry
        )?;
        let blocks_rolled_back = register_int_counter_with_registry!(
            Opts::new(
                "dpos_blocks_rolled_back_total",
                "Blocks removed by rollbacks and fork recovery"
            ),
            registry
        )?;
        let state_transitions = register_int_counter_vec_with_registry!(
            Opts::new(
                "dpos_state_transitions_total",
                "Blockchain state machine transitions"
            ),
            &["event"],
            registry
        )?;

        let chain_height = register_int_gauge_with_registry!(
            Opts::new("dpos_chain_height", "Height of the last applied block"),
            registry
        )?;
        let queue_length = register_int_gauge_with_registry!(
            Opts::new("dpos_queue_length", "Blocks waiting in the processing queue"),
            registry
        )?;

        let block_process_time_ms = register_histogram_with_registry!(
            HistogramOpts::new(
                "dpos_block_process_time_ms",
                "Block processing time in milliseconds"
            )
            .buckets(prometheus::exponential_buckets(0.1, 2.0, 15)?),
            registry
        )?;

        Ok(Self {
            registry,
            blocks_accepted,
            blocks_rejected,
            forks_detected,
            blocks_rolled_back,
            state_transitions,
            chain_height,
            queue_length,
            block_process_time_ms,
        })
    }

    /// Encode every metric in the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
