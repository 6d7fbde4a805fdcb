//! Shared harness for the multi-process integration tests: spins up real
//! `O2` instances bound to loopback/ephemeral ports within the test process
//! and polls them by hand, the way an integration suite drives a system
//! under test in a loop rather than blocking on it.

use std::sync::Once;
use std::time::{Duration, Instant};

use o2::clock::SystemClock;
use o2::{Config, O2};

static LOG_INIT: Once = Once::new();

/// Initializes `env_logger` once per test binary, so `RUST_LOG=o2=trace cargo
/// test` shows the poll loop's `log` output instead of it being dropped.
pub fn init_logging() {
    LOG_INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Builds an `O2` process for ensemble `ensemble`, sharing `discovery_port`
/// with every other instance in the same test (so UDP broadcast discovery
/// actually reaches them) while letting the OS pick the data/TCP ports.
pub fn spawn(ensemble: &str, discovery_port: u16) -> O2 {
    init_logging();
    let mut cfg = Config::new(ensemble);
    cfg.discovery_port = discovery_port;
    cfg.port_search_range = 0..=0;
    O2::initialize(cfg).expect("O2::initialize should succeed in a test sandbox")
}

/// Installs the default local clock as an explicit collaborator, which is
/// what makes a process a master candidate (§4.7: "if the user installs a
/// clock via `set_clock`, that process becomes a master candidate").
pub fn make_master_candidate(o2: &mut O2) {
    o2.set_clock(Box::new(SystemClock::default()));
}

/// Repeatedly polls every instance in `instances` until `pred` holds or
/// `timeout` elapses, returning whether `pred` was satisfied.
pub fn poll_until(instances: &mut [&mut O2], timeout: Duration, mut pred: impl FnMut(&mut [&mut O2]) -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        for inst in instances.iter_mut() {
            let _ = inst.poll();
        }
        if pred(instances) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
