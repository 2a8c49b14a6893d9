//! Fixed-rate host loop: `read` then `write` once per period, with a status
//! line logged at a slower interval.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use phoenix_hal::{CommandInterface, StateInterface, SystemInterface};
use phoenix_types::{BridgeError, ReturnType};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub period: Duration,
    /// Stop after this long; `None` runs until shutdown is requested.
    pub duration: Option<Duration>,
    pub status_interval: Duration,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoopReport {
    pub cycles: u64,
    pub read_errors: u64,
    pub write_errors: u64,
    /// Cycles that started later than their scheduled time.
    pub overruns: u64,
}

/// Write each setpoint into the command handle of the joint it names.
/// Returns how many handles were set.
pub fn apply_setpoints(
    commands: &[CommandInterface],
    setpoints: &BTreeMap<String, f64>,
) -> Result<usize, BridgeError> {
    let mut applied = 0;
    for (joint, value) in setpoints {
        let handle = commands
            .iter()
            .find(|c| c.joint_name() == joint.as_str())
            .ok_or_else(|| BridgeError::UnknownJoint(joint.clone()))?;
        handle.set(*value)?;
        applied += 1;
    }
    Ok(applied)
}

/// Log one line per state handle.
pub fn log_status(state: &[StateInterface]) {
    for handle in state {
        match handle.get() {
            Ok(value) => info!(interface = %handle.full_name(), value, "status"),
            Err(e) => warn!(interface = %handle.full_name(), error = %e, "status unavailable"),
        }
    }
}

/// Drive `system` until `shutdown` is set or `settings.duration` elapses.
pub fn run<S: SystemInterface>(
    system: &mut S,
    state: &[StateInterface],
    settings: &LoopSettings,
    shutdown: &AtomicBool,
) -> LoopReport {
    let mut report = LoopReport::default();
    let start = Instant::now();
    let mut next = start;
    let mut last_status = start;

    while !shutdown.load(Ordering::SeqCst) {
        let now = Instant::now();
        if settings.duration.is_some_and(|d| now.duration_since(start) >= d) {
            break;
        }

        if system.read(now, settings.period) != ReturnType::Ok {
            report.read_errors += 1;
        }
        if system.write(now, settings.period) != ReturnType::Ok {
            report.write_errors += 1;
        }
        report.cycles += 1;

        if now.duration_since(last_status) >= settings.status_interval {
            log_status(state);
            last_status = now;
        }

        next += settings.period;
        let after = Instant::now();
        if next > after {
            thread::sleep(next - after);
        } else {
            // Behind schedule: skip the missed slots instead of bursting.
            report.overruns += 1;
            next = after;
        }
    }

    info!(
        cycles = report.cycles,
        overruns = report.overruns,
        elapsed = ?start.elapsed(),
        "control loop finished"
    );
    report
}
