//! Round-trip-time estimator using the same EWMA coefficients as TCP's RTO
//! estimator (Jacobson/Karels): `alpha ≈ 0.125`
//! for the mean, `beta ≈ 0.25` for the deviation.

use std::time::Duration;

const ALPHA: f64 = 0.125;
const BETA: f64 = 0.25;

#[derive(Debug, Clone)]
pub struct RttEstimator {
    srtt: Option<Duration>,
    rttvar: Duration,
    min_rto: Duration,
}

impl RttEstimator {
    pub fn new(min_rto: Duration) -> Self {
        Self {
            srtt: None,
            rttvar: Duration::ZERO,
            min_rto,
        }
    }

    /// Fold in a fresh RTT sample measured from an ack.
    pub fn sample(&mut self, measured: Duration) {
        match self.srtt {
            None => {
                self.srtt = Some(measured);
                self.rttvar = measured / 2;
            }
            Some(srtt) => {
                let delta = abs_diff(srtt, measured);
                self.rttvar = self.rttvar.mul_f64(1.0 - BETA) + delta.mul_f64(BETA);
                self.srtt = Some(srtt.mul_f64(1.0 - ALPHA) + measured.mul_f64(ALPHA));
            }
        }
    }

    pub fn smoothed_rtt(&self) -> Duration {
        self.srtt.unwrap_or(self.min_rto)
    }

    /// `max(min_rto, srtt + 4*rttvar)`, the retransmission timeout used by the
    /// reliability layer to decide whether an unacked packet is lost.
    pub fn rto(&self) -> Duration {
        let srtt = self.srtt.unwrap_or(Duration::ZERO);
        let candidate = srtt + self.rttvar * 4;
        candidate.max(self.min_rto)
    }
}

fn abs_diff(a: Duration, b: Duration) -> Duration {
    if a > b {
        a - b
    } else {
        b - a
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_seeds_srtt() {
        let mut rtt = RttEstimator::new(Duration::from_millis(100));
        rtt.sample(Duration::from_millis(50));
        assert_eq!(rtt.smoothed_rtt(), Duration::from_millis(50));
    }

    #[test]
    fn rto_never_below_min() {
        let mut rtt = RttEstimator::new(Duration::from_millis(200));
        rtt.sample(Duration::from_millis(10));
        assert!(rtt.rto() >= Duration::from_millis(200));
    }

    #[test]
    fn converges_toward_stable_samples() {
        let mut rtt = RttEstimator::new(Duration::from_millis(1));
        for _ in 0..50 {
            rtt.sample(Duration::from_millis(80));
        }
        let smoothed = rtt.smoothed_rtt().as_millis() as i64;
        assert!((smoothed - 80).abs() <= 2);
    }
}
