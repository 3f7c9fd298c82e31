//! Queued switches between predicted and interpolated representation.

use codec::NetworkTick;
use schema::Representation;

use crate::world::LocalEntity;

/// One queued switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchRequest {
    pub entity: LocalEntity,
    pub target: Representation,
    /// Ticks to blend the transform over; zero switches instantly.
    pub duration_ticks: u32,
}

/// The to-predicted and to-interpolated queues.
///
/// Requests are applied in the order they were enqueued across both queues,
/// so the last request for an entity in a tick decides its representation.
#[derive(Debug, Default)]
pub struct PredictionSwitchQueue {
    to_predicted: Vec<(u64, SwitchRequest)>,
    to_interpolated: Vec<(u64, SwitchRequest)>,
    next_seq: u64,
}

impl PredictionSwitchQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_predicted(&mut self, entity: LocalEntity, duration_ticks: u32) {
        let seq = self.bump();
        self.to_predicted.push((
            seq,
            SwitchRequest {
                entity,
                target: Representation::Predicted,
                duration_ticks,
            },
        ));
    }

    pub fn to_interpolated(&mut self, entity: LocalEntity, duration_ticks: u32) {
        let seq = self.bump();
        self.to_interpolated.push((
            seq,
            SwitchRequest {
                entity,
                target: Representation::Interpolated,
                duration_ticks,
            },
        ));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.to_predicted.len() + self.to_interpolated.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empties both queues in global enqueue order.
    pub fn drain(&mut self) -> Vec<SwitchRequest> {
        let mut all: Vec<_> = self
            .to_predicted
            .drain(..)
            .chain(self.to_interpolated.drain(..))
            .collect();
        all.sort_by_key(|(seq, _)| *seq);
        all.into_iter().map(|(_, request)| request).collect()
    }

    fn bump(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

/// Tracks since when an entity has been predicted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PredictionState {
    predicted_since: Option<NetworkTick>,
}

impl PredictionState {
    #[must_use]
    pub const fn predicted_from(tick: NetworkTick) -> Self {
        Self {
            predicted_since: Some(tick),
        }
    }

    #[must_use]
    pub const fn is_predicted(&self) -> bool {
        self.predicted_since.is_some()
    }

    #[must_use]
    pub const fn predicted_since(&self) -> Option<NetworkTick> {
        self.predicted_since
    }

    pub fn start(&mut self, tick: NetworkTick) {
        self.predicted_since = Some(tick);
    }

    pub fn stop(&mut self) {
        self.predicted_since = None;
    }

    /// First tick a rollback from `snapshot_tick` may resimulate.
    ///
    /// Never earlier than the tick the entity became predicted; `None` when
    /// the entity is not predicted.
    #[must_use]
    pub fn resimulation_start(&self, snapshot_tick: NetworkTick) -> Option<NetworkTick> {
        let since = self.predicted_since?;
        Some(if since.is_newer_than(snapshot_tick) {
            since
        } else {
            snapshot_tick
        })
    }
}

/// Blend of a transform field from its pre-switch value.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformBlend {
    pub from: codec::FieldValue,
    pub elapsed: u32,
    pub duration: u32,
}

impl TransformBlend {
    /// Blend weight of the new value after one more tick, and whether the
    /// blend is finished.
    pub fn step(&mut self) -> (f32, bool) {
        self.elapsed = self.elapsed.saturating_add(1).min(self.duration);
        let done = self.elapsed >= self.duration;
        let weight = if self.duration == 0 {
            1.0
        } else {
            self.elapsed as f32 / self.duration as f32
        };
        (weight, done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_preserves_global_enqueue_order() {
        let mut queue = PredictionSwitchQueue::new();
        queue.to_interpolated(LocalEntity(1), 0);
        queue.to_predicted(LocalEntity(1), 4);
        queue.to_interpolated(LocalEntity(2), 0);
        assert_eq!(queue.len(), 3);

        let drained = queue.drain();
        assert!(queue.is_empty());
        let order: Vec<_> = drained.iter().map(|r| (r.entity, r.target)).collect();
        assert_eq!(
            order,
            vec![
                (LocalEntity(1), Representation::Interpolated),
                (LocalEntity(1), Representation::Predicted),
                (LocalEntity(2), Representation::Interpolated),
            ]
        );
    }

    #[test]
    fn resimulation_never_starts_before_prediction() {
        let mut state = PredictionState::default();
        assert_eq!(state.resimulation_start(NetworkTick::new(5)), None);

        state.start(NetworkTick::new(50));
        assert_eq!(
            state.resimulation_start(NetworkTick::new(40)),
            Some(NetworkTick::new(50))
        );
        assert_eq!(
            state.resimulation_start(NetworkTick::new(60)),
            Some(NetworkTick::new(60))
        );

        state.stop();
        assert!(!state.is_predicted());
    }

    #[test]
    fn transform_blend_finishes_after_duration() {
        let mut blend = TransformBlend {
            from: codec::FieldValue::Float3([0.0; 3]),
            elapsed: 0,
            duration: 2,
        };
        assert_eq!(blend.step(), (0.5, false));
        assert_eq!(blend.step(), (1.0, true));
    }
}
