//! Client clock: server tick estimate, interpolation tick, predicted tick.
//!
//! Everything here is measured in simulation ticks. Between snapshots the
//! clock advances by the frame delta; each snapshot nudges the server
//! estimate toward its tick, and the interpolation tick converges on its
//! target by running slightly faster or slower rather than jumping.

use codec::NetworkTick;

use crate::config::ClientConfig;

/// Smoothing is never shorter than this many ticks, whatever the config says.
pub const MIN_INTERPOLATION_TICKS: u32 = 2;

/// Gain applied to the interpolation error when picking the playback rate.
const RATE_GAIN: f32 = 0.1;
/// Playback never runs more than this much faster or slower than real time.
const MAX_RATE_ADJUST: f32 = 0.1;
/// Share of each snapshot's clock error absorbed at once.
const SERVER_NUDGE: f32 = 0.1;

/// Smoothed round trip time and jitter, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RttEstimator {
    srtt_ms: f32,
    jitter_ms: f32,
    samples: u32,
}

impl RttEstimator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            srtt_ms: 0.0,
            jitter_ms: 0.0,
            samples: 0,
        }
    }

    /// Folds in one round trip measurement.
    pub fn sample(&mut self, rtt_ms: f32) {
        if !rtt_ms.is_finite() || rtt_ms < 0.0 {
            log::warn!("ignoring bogus rtt sample {rtt_ms}");
            return;
        }
        if self.samples == 0 {
            self.srtt_ms = rtt_ms;
            self.jitter_ms = rtt_ms / 2.0;
        } else {
            let error = rtt_ms - self.srtt_ms;
            self.jitter_ms += (error.abs() - self.jitter_ms) / 4.0;
            self.srtt_ms += error / 8.0;
        }
        self.samples = self.samples.saturating_add(1);
    }

    #[must_use]
    pub const fn rtt_ms(&self) -> f32 {
        self.srtt_ms
    }

    #[must_use]
    pub const fn jitter_ms(&self) -> f32 {
        self.jitter_ms
    }

    #[must_use]
    pub const fn samples(&self) -> u32 {
        self.samples
    }
}

/// A tick plus a fraction toward the next one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickTime {
    pub tick: NetworkTick,
    /// In `[0, 1)`.
    pub fraction: f32,
}

impl TickTime {
    #[must_use]
    pub const fn new(tick: NetworkTick) -> Self {
        Self {
            tick,
            fraction: 0.0,
        }
    }

    /// Moves by `ticks`, which may be negative.
    #[must_use]
    pub fn offset(self, ticks: f32) -> Self {
        let total = self.fraction + ticks;
        let whole = total.floor();
        let fraction = total - whole;
        #[allow(clippy::cast_possible_truncation)]
        let whole = whole as i64;
        let magnitude = u32::try_from(whole.unsigned_abs()).unwrap_or(u32::MAX);
        let tick = if whole >= 0 {
            self.tick.add(magnitude)
        } else {
            self.tick.subtract(magnitude)
        };
        Self { tick, fraction }
    }

    /// Signed distance in ticks from `older` to `self`.
    #[must_use]
    pub fn ticks_since(self, older: Self) -> f32 {
        self.tick.ticks_since(older.tick) as f32 + self.fraction - older.fraction
    }
}

/// The client's view of time, updated once per frame.
#[derive(Debug, Clone)]
pub struct NetworkTime {
    config: ClientConfig,
    rtt: RttEstimator,
    latest_snapshot: Option<NetworkTick>,
    server: Option<TickTime>,
    interpolation: Option<TickTime>,
}

impl NetworkTime {
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            rtt: RttEstimator::new(),
            latest_snapshot: None,
            server: None,
            interpolation: None,
        }
    }

    #[must_use]
    pub const fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    pub fn record_rtt(&mut self, rtt_ms: f32) {
        self.rtt.sample(rtt_ms);
    }

    #[must_use]
    pub const fn latest_snapshot(&self) -> Option<NetworkTick> {
        self.latest_snapshot
    }

    /// Feeds the tick of a decoded snapshot.
    pub fn on_snapshot(&mut self, tick: NetworkTick) {
        if self
            .latest_snapshot
            .map_or(true, |latest| tick.is_newer_than(latest))
        {
            self.latest_snapshot = Some(tick);
        }
        let arrived = TickTime::new(tick);
        match self.server {
            Some(server) => {
                let error = arrived.ticks_since(server);
                if error.abs() > self.config.resync_threshold_ticks as f32 {
                    log::debug!("server clock resync: off by {error:.1} ticks");
                    self.server = Some(arrived);
                } else {
                    self.server = Some(server.offset(error * SERVER_NUDGE));
                }
            }
            None => self.server = Some(arrived),
        }
    }

    /// Ticks the interpolation tick trails the newest snapshot.
    #[must_use]
    pub fn interpolation_delay(&self) -> u32 {
        let jitter_ticks = (self.rtt.jitter_ms() * 2.0 / self.config.tick_ms()).ceil();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let jitter_ticks = jitter_ticks.max(0.0) as u32;
        let wanted = self.config.interpolation_ticks.max(jitter_ticks);
        wanted
            .min(self.config.max_interpolation_ticks)
            .max(MIN_INTERPOLATION_TICKS)
    }

    /// Advances the clock by one frame of `dt_ticks`.
    pub fn advance(&mut self, dt_ticks: f32) {
        let Some(server) = self.server else {
            return;
        };
        let server = server.offset(dt_ticks.max(0.0));
        self.server = Some(server);

        let target = server.offset(-(self.interpolation_delay() as f32));
        let next = match self.interpolation {
            None => target,
            Some(current) => {
                // Error left after a plain real-time step.
                let error = target.ticks_since(current.offset(dt_ticks.max(0.0)));
                if error.abs() > self.config.resync_threshold_ticks as f32 {
                    log::debug!("interpolation resync: off by {error:.1} ticks");
                    target
                } else {
                    let rate = (1.0 + error * RATE_GAIN)
                        .clamp(1.0 - MAX_RATE_ADJUST, 1.0 + MAX_RATE_ADJUST);
                    current.offset(dt_ticks.max(0.0) * rate)
                }
            }
        };
        self.interpolation = Some(next);
    }

    /// Estimated newest tick the server has simulated, as seen locally.
    #[must_use]
    pub fn server_tick(&self) -> Option<TickTime> {
        self.server
    }

    /// Point in time interpolated ghosts are displayed at.
    #[must_use]
    pub const fn interpolation_tick(&self) -> Option<TickTime> {
        self.interpolation
    }

    /// Tick the client should simulate and send commands for, ahead of the
    /// server by half a round trip plus margins.
    #[must_use]
    pub fn predicted_tick(&self) -> Option<NetworkTick> {
        let server = self.server?;
        let tick_ms = self.config.tick_ms();
        let lead_ms = self.rtt.rtt_ms() / 2.0 + self.rtt.jitter_ms() * 2.0;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let lead = (lead_ms / tick_ms).ceil().max(0.0) as u32;
        Some(server.tick.add(lead + self.config.command_slack_ticks))
    }

    #[must_use]
    pub const fn max_extrapolation_ticks(&self) -> u32 {
        self.config.max_extrapolation_ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time() -> NetworkTime {
        NetworkTime::new(ClientConfig::for_testing())
    }

    #[test]
    fn rtt_converges() {
        let mut rtt = RttEstimator::new();
        rtt.sample(100.0);
        assert!((rtt.rtt_ms() - 100.0).abs() < f32::EPSILON);
        assert!((rtt.jitter_ms() - 50.0).abs() < f32::EPSILON);
        for _ in 0..200 {
            rtt.sample(40.0);
        }
        assert!((rtt.rtt_ms() - 40.0).abs() < 0.5);
        assert!(rtt.jitter_ms() < 1.0);
    }

    #[test]
    fn rtt_ignores_negative_samples() {
        let mut rtt = RttEstimator::new();
        rtt.sample(-5.0);
        rtt.sample(f32::NAN);
        assert_eq!(rtt.samples(), 0);
    }

    #[test]
    fn tick_time_offsets_across_wrap() {
        let t = TickTime::new(NetworkTick::new(u32::MAX)).offset(1.5);
        assert_eq!(t.tick.value(), 0);
        assert!((t.fraction - 0.5).abs() < f32::EPSILON);
        let back = t.offset(-2.0);
        assert_eq!(back.tick.value(), u32::MAX - 1);
        assert!((t.ticks_since(back) - 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn minimum_delay_applies_when_configured_zero() {
        let mut config = ClientConfig::for_testing();
        config.interpolation_ticks = 0;
        let time = NetworkTime::new(config);
        assert_eq!(time.interpolation_delay(), MIN_INTERPOLATION_TICKS);
    }

    #[test]
    fn jitter_widens_delay_up_to_the_cap() {
        let mut time = time();
        time.record_rtt(100.0);
        time.record_rtt(300.0);
        assert_eq!(time.interpolation_delay(), 8);
    }

    #[test]
    fn interpolation_trails_snapshots() {
        let mut time = time();
        assert!(time.interpolation_tick().is_none());
        for tick in 10..40 {
            time.on_snapshot(NetworkTick::new(tick));
            time.advance(1.0);
        }
        let interp = time.interpolation_tick().unwrap();
        let server = time.server_tick().unwrap();
        let lag = server.ticks_since(interp);
        assert!((lag - 2.0).abs() < 0.5, "lag {lag}");
    }

    #[test]
    fn large_clock_error_resyncs() {
        let mut time = time();
        time.on_snapshot(NetworkTick::new(5));
        time.advance(1.0);
        time.on_snapshot(NetworkTick::new(500));
        time.advance(1.0);
        assert_eq!(time.server_tick().unwrap().tick.value(), 501);
        assert_eq!(time.interpolation_tick().unwrap().tick.value(), 499);
    }

    #[test]
    fn predicted_tick_leads_by_half_rtt_and_slack() {
        let mut time = time();
        time.on_snapshot(NetworkTick::new(100));
        // 60 ms rtt at 60 Hz: 30 ms out plus a 60 ms jitter margin.
        time.record_rtt(60.0);
        let predicted = time.predicted_tick().unwrap();
        assert_eq!(predicted.value(), 100 + 6 + 2);
    }
}
