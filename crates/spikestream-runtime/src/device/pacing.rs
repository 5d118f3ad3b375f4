//! Adaptive pacing against a synchronized datagram device

use super::codec::STEP_COUNTER_MODULUS;
use std::time::{Duration, Instant};

/// Upper bound on the estimated device step time
pub const MAX_PEER_STEP: Duration = Duration::from_millis(100);

/// Local steps without input after which the estimate starts to grow
pub const SILENT_STEP_THRESHOLD: u32 = 10;

/// What the worker should do after a local step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacingDecision {
    /// Time to sleep before the next step
    pub sleep: Duration,
    /// Whether this worker is now delaying for the device
    pub delaying: bool,
}

/// Estimates the device's step time from its message stream
#[derive(Debug, Clone, Default)]
pub struct PacingEstimator {
    last_message: Option<(Instant, u16)>,
    peer_step: Option<Duration>,
    silent_steps: u32,
}

impl PacingEstimator {
    /// Create an estimator with no estimate
    pub fn new() -> Self {
        Self::default()
    }

    /// Current per-step estimate of the device
    pub fn peer_step(&self) -> Option<Duration> {
        self.peer_step
    }

    /// Local steps since the last message
    pub fn silent_steps(&self) -> u32 {
        self.silent_steps
    }

    /// Record a message stamped with the device's step counter
    pub fn on_message(&mut self, now: Instant, step_counter: u16) {
        if let Some((last_time, last_counter)) = self.last_message {
            let delta = (step_counter as u32 + STEP_COUNTER_MODULUS - last_counter as u32) % STEP_COUNTER_MODULUS;
            if delta == 0 {
                return;
            }
            let interval = now.saturating_duration_since(last_time);
            self.peer_step = Some((interval / delta).min(MAX_PEER_STEP));
        }
        self.last_message = Some((now, step_counter));
        self.silent_steps = 0;
    }

    /// Decide how long to wait after a local step that took `local_compute`.
    ///
    /// `other_delaying` is true when another worker already delays for the
    /// same device; delays are then not compounded.
    pub fn on_local_step(&mut self, local_compute: Duration, other_delaying: bool) -> PacingDecision {
        self.silent_steps = self.silent_steps.saturating_add(1);
        let estimate = match self.peer_step {
            Some(step) if self.silent_steps > SILENT_STEP_THRESHOLD => {
                step.saturating_mul(self.silent_steps).min(MAX_PEER_STEP)
            }
            Some(step) => step,
            None => return PacingDecision::default(),
        };

        if estimate > local_compute && !other_delaying {
            PacingDecision {
                sleep: estimate - local_compute,
                delaying: true,
            }
        } else {
            PacingDecision::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_estimate_no_delay() {
        let mut pacing = PacingEstimator::new();
        assert_eq!(pacing.on_local_step(Duration::from_millis(1), false), PacingDecision::default());
    }

    #[test]
    fn test_estimate_from_interval_and_counter_delta() {
        let mut pacing = PacingEstimator::new();
        let t0 = Instant::now();
        pacing.on_message(t0, 10);
        pacing.on_message(t0 + Duration::from_millis(40), 14);
        assert_eq!(pacing.peer_step(), Some(Duration::from_millis(10)));

        let decision = pacing.on_local_step(Duration::from_millis(4), false);
        assert_eq!(decision, PacingDecision { sleep: Duration::from_millis(6), delaying: true });
    }

    #[test]
    fn test_counter_wraps() {
        let mut pacing = PacingEstimator::new();
        let t0 = Instant::now();
        pacing.on_message(t0, 32_766);
        pacing.on_message(t0 + Duration::from_millis(30), 1);
        assert_eq!(pacing.peer_step(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn test_fast_worker_does_not_delay_when_peer_is_delaying() {
        let mut pacing = PacingEstimator::new();
        let t0 = Instant::now();
        pacing.on_message(t0, 0);
        pacing.on_message(t0 + Duration::from_millis(20), 1);
        assert!(!pacing.on_local_step(Duration::from_millis(1), true).delaying);
        // slower than the device
        assert!(!pacing.on_local_step(Duration::from_millis(50), false).delaying);
    }

    #[test]
    fn test_silence_scales_estimate_up_to_cap() {
        let mut pacing = PacingEstimator::new();
        let t0 = Instant::now();
        pacing.on_message(t0, 0);
        pacing.on_message(t0 + Duration::from_millis(5), 1);

        let mut last = PacingDecision::default();
        for _ in 0..SILENT_STEP_THRESHOLD {
            last = pacing.on_local_step(Duration::ZERO, false);
        }
        assert_eq!(last.sleep, Duration::from_millis(5));

        let grown = pacing.on_local_step(Duration::ZERO, false);
        assert_eq!(grown.sleep, Duration::from_millis(5 * (SILENT_STEP_THRESHOLD as u64 + 1)));

        for _ in 0..100 {
            last = pacing.on_local_step(Duration::ZERO, false);
        }
        assert_eq!(last.sleep, MAX_PEER_STEP);

        pacing.on_message(t0 + Duration::from_millis(10), 2);
        assert_eq!(pacing.silent_steps(), 0);
    }
}
