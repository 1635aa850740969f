// src/schedule/mod.rs

//! Scheduling primitives: pure next-run-time functions and the single
//! blocking wait used by every worker.

use std::time::{Duration, SystemTime};

use rand::Rng;

/// Upper bound for a single sleep inside [`wait_until`]. Re-reading the wall
/// clock at least this often keeps a backward clock jump from over-sleeping.
const MAX_SLEEP_CHUNK: Duration = Duration::from_secs(1);

/// When the next run of a node should happen, as a pure function of a
/// reference time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Schedule {
    /// Fixed interval after the reference time.
    Periodic(Duration),
    /// Uniform random interval in `[min, max]` after the reference time.
    /// Draws are independent across calls. `max >= min` is checked when the
    /// config is loaded.
    UniformRandom { min: Duration, max: Duration },
}

impl Schedule {
    pub fn next_after(&self, t: SystemTime) -> SystemTime {
        match *self {
            Schedule::Periodic(d) => t + d,
            Schedule::UniformRandom { min, max } => {
                let mn = min.as_secs_f64();
                let mx = max.as_secs_f64();
                let secs = if mx > mn {
                    rand::thread_rng().gen_range(mn..=mx)
                } else {
                    mn
                };
                t + Duration::from_secs_f64(secs)
            }
        }
    }
}

/// Sleep until the wall clock reaches `t`.
///
/// Sleeps in short chunks and re-reads the clock each iteration, so a clock
/// that jumps backward mid-wait cannot make us sleep past `t`. Returns
/// immediately if `t` is already in the past. Cancellation is by dropping
/// the future (e.g. losing a `select!`).
pub async fn wait_until(t: SystemTime) {
    loop {
        let remaining = match t.duration_since(SystemTime::now()) {
            Ok(d) if !d.is_zero() => d,
            _ => return,
        };
        tokio::time::sleep(remaining.min(MAX_SLEEP_CHUNK)).await;
    }
}
