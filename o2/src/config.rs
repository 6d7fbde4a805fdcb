//! Process-wide configuration, constructed explicitly at `initialize` time
//! rather than read from the environment (§9: "explicit process handle").

use core::time::Duration;

/// Tunables for a single O2 process.
///
/// Defaults reproduce the source's compile-time constants (§6: "Broadcast
/// port and ephemeral port range are compile-time constants of the
/// implementation").
#[derive(Debug, Clone)]
pub struct Config {
    /// The ensemble ("application") this process joins. Must be non-empty.
    pub ensemble_name: String,
    /// Well-known UDP port all processes in an ensemble broadcast discovery
    /// datagrams to (§4.5).
    pub discovery_port: u16,
    /// Range of ephemeral ports tried, in order, when binding the data UDP
    /// socket and TCP listener, so multiple O2 processes can coexist on one
    /// host.
    pub port_search_range: core::ops::RangeInclusive<u16>,
    /// Initial discovery broadcast period (§4.6, ~100ms).
    pub discovery_period_min: Duration,
    /// Steady-state discovery broadcast period cap (§4.6, ~4s).
    pub discovery_period_max: Duration,
    /// Geometric backoff factor applied to the discovery period after each
    /// broadcast until `discovery_period_max` is reached.
    pub discovery_backoff_factor: f64,
    /// Consecutive missed discovery replies before a peer is torn down
    /// (§4.4).
    pub missed_heartbeats_limit: u32,
    /// Timing wheel bin width, in seconds, for both schedulers (§4.8).
    pub scheduler_granularity: f64,
    /// Clock probe cadence once synchronized (§4.7, ~0.5 Hz).
    pub clock_sync_period: Duration,
    /// Clock probe cadence for the first few samples after an unsynced
    /// process starts probing (§4.7, "faster for the first few samples").
    pub clock_sync_period_fast: Duration,
    /// Number of initial samples taken at `clock_sync_period_fast` before
    /// switching to `clock_sync_period`.
    pub clock_sync_fast_samples: u32,
    /// Upper bound on how fast `skew` may slew toward the target offset,
    /// expressed as a fraction of real time (§4.7, "≤10% of real time").
    pub max_skew_slew_rate: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ensemble_name: String::new(),
            discovery_port: 64547,
            port_search_range: 64546..=64547 + 100,
            discovery_period_min: Duration::from_millis(100),
            discovery_period_max: Duration::from_secs(4),
            discovery_backoff_factor: 1.5,
            missed_heartbeats_limit: 3,
            scheduler_granularity: 1.0 / 128.0,
            clock_sync_period: Duration::from_millis(2000),
            clock_sync_period_fast: Duration::from_millis(200),
            clock_sync_fast_samples: 8,
            max_skew_slew_rate: 0.1,
        }
    }
}

impl Config {
    pub fn new(ensemble_name: impl Into<String>) -> Self {
        Self {
            ensemble_name: ensemble_name.into(),
            ..Default::default()
        }
    }
}
