//! Target worker count computation.
//!
//! ```text
//! aggressive && initial_workers not yet reached:
//!     target = initial_workers
//! otherwise:
//!     base   = live_workers (or 1 when there are none but load exists)
//!     target = clamp(ceil(base * busy_fraction / target_utilization), min, max)
//!     conservative: target >= live_workers - idle_eligible   (capped at max)
//! ```

use fleet_core::{AutoscalingMode, ClusterSpec};

/// Absorbs float noise such as `3.0000000000000004` before rounding up.
const CEIL_EPSILON: f64 = 1e-9;

/// Minimum launch batch when `upscaling_speed` limits scale-up.
const MIN_UPSCALE_BATCH: u32 = 5;

/// Inputs observed during one cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetInputs {
    pub live_workers: u32,
    pub busy_fraction: f64,
    /// Live workers past the idle timeout.
    pub idle_eligible: u32,
    /// The aggressive pre-start has not yet reached `initial_workers`.
    pub bootstrap_pending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetReason {
    /// Aggressive pre-start of `initial_workers`, held until reached.
    Bootstrap,
    /// Derived from utilization.
    Utilization,
    /// Utilization asked for less, conservative damping held it up.
    Damped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetDecision {
    pub target: u32,
    /// Utilization-derived count before clamping.
    pub unclamped: u64,
    pub reason: TargetReason,
}

/// Compute the desired worker count. Always within `[min_workers, max_workers]`.
pub fn compute_target(spec: &ClusterSpec, inputs: TargetInputs) -> TargetDecision {
    if inputs.bootstrap_pending && spec.mode == AutoscalingMode::Aggressive {
        return TargetDecision {
            target: spec.initial_workers,
            unclamped: u64::from(spec.initial_workers),
            reason: TargetReason::Bootstrap,
        };
    }

    let busy = inputs.busy_fraction.clamp(0.0, 1.0);
    let base = if inputs.live_workers == 0 && busy > 0.0 {
        1
    } else {
        inputs.live_workers
    };
    let raw = f64::from(base) * busy / spec.target_utilization;
    let unclamped = (raw - CEIL_EPSILON).ceil().max(0.0) as u64;
    let clamped = spec.clamp_workers(u32::try_from(unclamped).unwrap_or(u32::MAX));

    if spec.mode == AutoscalingMode::Conservative {
        let floor = inputs
            .live_workers
            .saturating_sub(inputs.idle_eligible)
            .min(spec.max_workers);
        if clamped < floor {
            return TargetDecision {
                target: floor,
                unclamped,
                reason: TargetReason::Damped,
            };
        }
    }

    TargetDecision {
        target: clamped,
        unclamped,
        reason: TargetReason::Utilization,
    }
}

/// Largest launch batch allowed this cycle, or `None` for no limit.
///
/// Only conservative mode with an `upscaling_speed` is limited.
pub fn launch_limit(spec: &ClusterSpec, live_workers: u32) -> Option<u32> {
    if spec.mode != AutoscalingMode::Conservative {
        return None;
    }
    let speed = spec.upscaling_speed?;
    let scaled = (speed * f64::from(live_workers.max(1))).ceil() as u32;
    Some(scaled.max(MIN_UPSCALE_BATCH))
}
