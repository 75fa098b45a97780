//! The simulated clock: scaled and offset time used for stamps and timer durations.
//!
//! All stamps in the system come from [`now`], not the wall clock directly,
//! so that an accelerated simulation produces consistent timestamps. Timer
//! durations (debounce, buffers) go through [`scaled_duration`], which divides
//! by the simulation speed but keeps a minimum wall-clock floor so that
//! fast-forwarded runs still observe distinct edges.

use std::sync::RwLock;
use std::time::Duration;

use chrono::Utc;

/// Durations at or above this many seconds are floored when accelerated.
const MIN_SCALED_SECONDS: f64 = 2.0;

#[derive(Debug, Clone, Copy)]
struct Simulation {
    active: bool,
    start_time: f64,
    started_at: f64,
    speed: f64,
}

static SIMULATION: RwLock<Simulation> = RwLock::new(Simulation {
    active: false,
    start_time: 0.0,
    started_at: 0.0,
    speed: 1.0,
});

fn wall_now() -> f64 {
    let now = Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}

fn read() -> Simulation {
    *SIMULATION
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Current time in epoch seconds, following the simulation when active.
#[must_use]
pub fn now() -> f64 {
    let sim = read();
    if !sim.active {
        return wall_now();
    }
    sim.start_time + (wall_now() - sim.started_at) * sim.speed
}

/// Switch the process clock into simulation mode.
///
/// `start_time` is the simulated epoch second corresponding to "now";
/// `speed` is the acceleration factor (2.0 = twice as fast).
pub fn simulate(start_time: f64, speed: f64) {
    let mut sim = SIMULATION
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    *sim = Simulation {
        active: true,
        start_time,
        started_at: wall_now(),
        speed: if speed > 0.0 { speed } else { 1.0 },
    };
}

/// Switch back to the wall clock.
pub fn reset() {
    let mut sim = SIMULATION
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    sim.active = false;
    sim.speed = 1.0;
}

/// Whether the process clock is simulated.
#[must_use]
pub fn is_simulating() -> bool {
    read().active
}

/// Scale a duration for the active simulation.
///
/// Durations of two seconds or more never shrink below two wall-clock
/// seconds under acceleration; durations that were already shorter pass
/// through scaled without a floor.
#[must_use]
pub fn scaled_duration(seconds: f64) -> Duration {
    let seconds = seconds.max(0.0);
    let sim = read();
    if !sim.active {
        return Duration::from_secs_f64(seconds);
    }
    let scaled = seconds / sim.speed;
    if scaled > MIN_SCALED_SECONDS || seconds < MIN_SCALED_SECONDS {
        Duration::from_secs_f64(scaled)
    } else {
        Duration::from_secs_f64(MIN_SCALED_SECONDS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The clock is process-wide state, so everything lives in one test
    // to keep parallel test threads from interfering.
    #[test]
    fn should_follow_simulation_settings() {
        // Wall clock by default.
        assert!(!is_simulating());
        let before = wall_now();
        let ts = now();
        assert!(ts >= before);
        assert_eq!(scaled_duration(10.0), Duration::from_secs_f64(10.0));

        // Accelerated clock.
        simulate(1_000_000.0, 10.0);
        assert!(is_simulating());
        let ts = now();
        assert!(ts >= 1_000_000.0);
        assert!(ts < 1_000_100.0);

        // 10s at 10x would be 1s, floored to 2s because the original
        // duration was above the floor.
        assert_eq!(scaled_duration(10.0), Duration::from_secs_f64(2.0));
        // 100s at 10x stays 10s (above the floor even scaled).
        assert_eq!(scaled_duration(100.0), Duration::from_secs_f64(10.0));
        // Sub-floor durations scale without flooring.
        assert_eq!(scaled_duration(1.0), Duration::from_secs_f64(0.1));
        // Negative durations clamp to zero.
        assert_eq!(scaled_duration(-1.0), Duration::ZERO);

        reset();
        assert!(!is_simulating());
    }
}
