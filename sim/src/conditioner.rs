//! Latency, jitter, and loss applied to simulated datagrams.

use serde::{Deserialize, Serialize};

/// Link quality knobs for one direction of a simulated connection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkConditioner {
    /// One-way delay applied to every packet.
    pub latency_ms: u32,
    /// Extra delay drawn uniformly from `0..=jitter_ms`. Jitter reorders.
    pub jitter_ms: u32,
    /// Probability in `0.0..=1.0` that a packet is dropped.
    pub loss: f32,
}

impl Default for LinkConditioner {
    fn default() -> Self {
        Self::perfect()
    }
}

impl LinkConditioner {
    /// No delay, no loss.
    #[must_use]
    pub const fn perfect() -> Self {
        Self {
            latency_ms: 0,
            jitter_ms: 0,
            loss: 0.0,
        }
    }

    #[must_use]
    pub const fn good_condition() -> Self {
        Self {
            latency_ms: 40,
            jitter_ms: 6,
            loss: 0.002,
        }
    }

    #[must_use]
    pub const fn average_condition() -> Self {
        Self {
            latency_ms: 100,
            jitter_ms: 25,
            loss: 0.02,
        }
    }

    #[must_use]
    pub const fn poor_condition() -> Self {
        Self {
            latency_ms: 200,
            jitter_ms: 60,
            loss: 0.08,
        }
    }

    /// Delay for the next packet, or `None` if it is lost.
    pub fn sample(&self, rng: &mut fastrand::Rng) -> Option<u32> {
        if self.loss > 0.0 && rng.f32() < self.loss {
            return None;
        }
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rng.u32(0..=self.jitter_ms)
        };
        Some(self.latency_ms + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_link_never_delays_or_drops() {
        let mut rng = fastrand::Rng::with_seed(1);
        for _ in 0..100 {
            assert_eq!(LinkConditioner::perfect().sample(&mut rng), Some(0));
        }
    }

    #[test]
    fn delay_stays_inside_the_jitter_window() {
        let mut rng = fastrand::Rng::with_seed(7);
        let link = LinkConditioner {
            latency_ms: 30,
            jitter_ms: 10,
            loss: 0.0,
        };
        for _ in 0..200 {
            let delay = link.sample(&mut rng).unwrap();
            assert!((30..=40).contains(&delay));
        }
    }

    #[test]
    fn loss_rate_is_roughly_honoured() {
        let mut rng = fastrand::Rng::with_seed(3);
        let link = LinkConditioner {
            loss: 0.25,
            ..LinkConditioner::perfect()
        };
        let lost = (0..4000).filter(|_| link.sample(&mut rng).is_none()).count();
        assert!((800..1200).contains(&lost), "lost {lost}");
    }

    #[test]
    fn presets_round_trip_through_json() {
        let link = LinkConditioner::average_condition();
        let json = serde_json::to_string(&link).unwrap();
        assert_eq!(serde_json::from_str::<LinkConditioner>(&json).unwrap(), link);
    }
}
