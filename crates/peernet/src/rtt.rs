//! See [`RttEstimator`].

use std::time::Duration;

/// Exponentially-weighted round-trip time estimate for a single peer.
///
/// Samples are derived from the creation timestamp echoed back in a
/// `ReliableAck`/`OrderedAck` datagram: `sample = now - echoed_timestamp`.
/// Smoothing uses the classic TCP/RFC 6298 weight of α = 0.125, matching
/// [`aeronet_transport::rtt::RttEstimator`]'s `(7 * smoothed + rtt) / 8`
/// update but without its RFC 9002 `min`/`pto` machinery, which this crate
/// has no use for.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    smoothed: Duration,
    has_sample: bool,
}

impl RttEstimator {
    /// Creates an estimator with no samples yet; [`RttEstimator::get`]
    /// returns zero until the first [`RttEstimator::update`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            smoothed: Duration::ZERO,
            has_sample: false,
        }
    }

    /// Current smoothed RTT estimate, in milliseconds.
    #[must_use]
    pub fn get_ms(&self) -> f64 {
        self.smoothed.as_secs_f64() * 1000.0
    }

    /// Current smoothed RTT estimate as a [`Duration`].
    #[must_use]
    pub const fn get(&self) -> Duration {
        self.smoothed
    }

    /// Folds a fresh round-trip sample into the smoothed estimate.
    ///
    /// The first sample seeds the estimate directly; subsequent samples are
    /// blended with weight 7/8 old, 1/8 new (α = 0.125).
    pub fn update(&mut self, sample: Duration) {
        if self.has_sample {
            self.smoothed = (self.smoothed * 7 + sample) / 8;
        } else {
            self.smoothed = sample;
            self.has_sample = true;
        }
    }
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::RttEstimator;
    use std::time::Duration;

    #[test]
    fn starts_at_zero() {
        let rtt = RttEstimator::new();
        assert_eq!(Duration::ZERO, rtt.get());
    }

    #[test]
    fn first_sample_seeds_estimate() {
        let mut rtt = RttEstimator::new();
        rtt.update(Duration::from_millis(100));
        assert_eq!(Duration::from_millis(100), rtt.get());
    }

    #[test]
    fn smooths_towards_new_samples() {
        let mut rtt = RttEstimator::new();
        rtt.update(Duration::from_millis(100));
        rtt.update(Duration::from_millis(20));
        // (100*7 + 20) / 8 = 90
        assert_eq!(Duration::from_millis(90), rtt.get());
    }

    #[test]
    fn converges_within_bound_of_constant_sample() {
        let mut rtt = RttEstimator::new();
        let sample = Duration::from_millis(80);
        for _ in 0..50 {
            rtt.update(sample);
        }
        let ms = rtt.get_ms();
        assert!(ms > 0.0 && ms <= 2.0 * 80.0);
    }
}
