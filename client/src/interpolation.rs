//! Per-field smoothing of remote ghosts and of prediction corrections.

use codec::{CodecResult, FieldValue, GhostState, QuantizedState, SnapshotHistory};
use schema::{FieldDef, GhostLayout, Smoothing};

use crate::time::TickTime;

/// Distance between two values of a continuous field.
///
/// Quaternions measure the rotation angle in radians. Discrete kinds report
/// zero when equal and infinity otherwise.
#[must_use]
pub fn field_distance(from: &FieldValue, to: &FieldValue) -> f32 {
    match (from, to) {
        (FieldValue::Double(a), FieldValue::Double(b)) => (a - b).abs() as f32,
        (FieldValue::Quaternion(a), FieldValue::Quaternion(b)) => {
            let dot = dot4(*a, *b).abs().min(1.0);
            2.0 * dot.acos()
        }
        _ => match (from.lanes(), to.lanes()) {
            (Some((n, a)), Some((m, b))) if n == m => a
                .iter()
                .zip(&b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
            _ if from == to => 0.0,
            _ => f32::INFINITY,
        },
    }
}

fn dot4(a: [f32; 4], b: [f32; 4]) -> f32 {
    a.iter().zip(&b).map(|(x, y)| x * y).sum()
}

fn lerp_lanes(a: [f32; 4], b: [f32; 4], t: f32) -> [f32; 4] {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
        a[3] + (b[3] - a[3]) * t,
    ]
}

/// Straight blend of two continuous values; `t` may exceed 1.
///
/// Returns `None` for discrete values.
#[must_use]
pub fn blend_values(from: &FieldValue, to: &FieldValue, t: f32) -> Option<FieldValue> {
    match (from, to) {
        (FieldValue::Double(a), FieldValue::Double(b)) => {
            Some(FieldValue::Double(a + (b - a) * f64::from(t)))
        }
        (FieldValue::Quaternion(a), FieldValue::Quaternion(b)) => {
            // Shortest arc.
            let b = if dot4(*a, *b) < 0.0 {
                b.map(|c| -c)
            } else {
                *b
            };
            Some(FieldValue::Quaternion(codec::normalize(lerp_lanes(*a, b, t))))
        }
        _ => match (from.lanes(), to.lanes()) {
            (Some((n, a)), Some((m, b))) if n == m => {
                Some(FieldValue::from_lanes(n, lerp_lanes(a, b, t)))
            }
            _ => None,
        },
    }
}

/// Value of a field `t` of the way from `from` to `to`.
///
/// `Clamp` fields hold `from` until `t` reaches 1. `Interpolate` fields stop
/// at `to`; only `InterpolateAndExtrapolate` fields continue past it. A jump
/// larger than the field's max smoothing distance is clamped like a `Clamp`
/// field.
#[must_use]
pub fn smooth_field(def: &FieldDef, from: &FieldValue, to: &FieldValue, t: f32) -> FieldValue {
    let clamped = || if t >= 1.0 { to.clone() } else { from.clone() };
    if !def.kind.is_continuous() || def.smoothing == Smoothing::Clamp {
        return clamped();
    }
    if def
        .max_smoothing_distance
        .is_some_and(|max| field_distance(from, to) > max)
    {
        return clamped();
    }
    let t = match def.smoothing {
        Smoothing::InterpolateAndExtrapolate => t.max(0.0),
        _ => t.clamp(0.0, 1.0),
    };
    blend_values(from, to, t).unwrap_or_else(clamped)
}

fn expand(layout: &GhostLayout, state: &QuantizedState) -> CodecResult<GhostState> {
    let mut out = GhostState::default_for(layout);
    state.apply_to(layout, &mut out)?;
    Ok(out)
}

/// Blends two snapshots field by field.
pub fn blend_states(
    layout: &GhostLayout,
    from: &QuantizedState,
    to: &QuantizedState,
    t: f32,
) -> CodecResult<GhostState> {
    let older = expand(layout, from)?;
    let mut out = expand(layout, to)?;
    for (slot, component) in layout.replicated_components() {
        for (i, def) in component.fields.iter().enumerate() {
            let a = &older.components[slot].fields[i];
            let b = &out.components[slot].fields[i];
            out.components[slot].fields[i] = smooth_field(def, a, b, t);
        }
    }
    if t < 1.0 {
        for (target, old) in out.components.iter_mut().zip(&older.components) {
            target.enabled = old.enabled;
        }
    }
    Ok(out)
}

/// Samples a ghost's snapshot history at `at`.
///
/// Between two snapshots fields are smoothed per their policy. Before the
/// oldest snapshot the oldest is used. Past the newest, extrapolating fields
/// continue along the last two snapshots for at most `max_extrapolation`
/// ticks; everything else holds the newest value.
pub fn sample_state(
    layout: &GhostLayout,
    history: &SnapshotHistory<QuantizedState>,
    at: TickTime,
    max_extrapolation: u32,
) -> CodecResult<Option<GhostState>> {
    let before = history.latest_at_or_before(at.tick);
    let after = history.earliest_after(at.tick);
    match (before, after) {
        (None, None) => Ok(None),
        (None, Some((_, newer))) => expand(layout, newer).map(Some),
        (Some((from_tick, from)), Some((to_tick, to))) => {
            let span = to_tick.ticks_since(from_tick) as f32;
            let t = at.ticks_since(TickTime::new(from_tick)) / span;
            blend_states(layout, from, to, t).map(Some)
        }
        (Some((newest_tick, newest)), None) => {
            let ahead = at.ticks_since(TickTime::new(newest_tick));
            let previous = history.latest_at_or_before(newest_tick.subtract(1));
            match previous {
                Some((prev_tick, prev)) if ahead > 0.0 && max_extrapolation > 0 => {
                    let span = newest_tick.ticks_since(prev_tick) as f32;
                    let ahead = ahead.min(max_extrapolation as f32);
                    blend_states(layout, prev, newest, 1.0 + ahead / span).map(Some)
                }
                _ => expand(layout, newest).map(Some),
            }
        }
    }
}

/// Error smoothing for predicted ghosts.
///
/// When a correction arrives the displayed value moves `blend` of the way
/// from the locally predicted value toward the corrected one each tick. A
/// correction beyond the field's max smoothing distance snaps.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PredictionSmoothing {
    pub blend: f32,
}

impl Default for PredictionSmoothing {
    fn default() -> Self {
        Self { blend: 0.25 }
    }
}

impl PredictionSmoothing {
    #[must_use]
    pub fn apply(&self, def: &FieldDef, local: &FieldValue, corrected: &FieldValue) -> FieldValue {
        if !def.kind.is_continuous() {
            return corrected.clone();
        }
        if def
            .max_smoothing_distance
            .is_some_and(|max| field_distance(local, corrected) > max)
        {
            return corrected.clone();
        }
        blend_values(local, corrected, self.blend.clamp(0.0, 1.0)).unwrap_or_else(|| corrected.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::NetworkTick;
    use schema::{ComponentType, FieldKind, GhostRegistry, GhostTypeDef};

    fn float(smoothing: Smoothing) -> FieldDef {
        FieldDef::new("x", FieldKind::float(0)).smoothing(smoothing)
    }

    #[test]
    fn clamp_holds_the_older_value() {
        let def = float(Smoothing::Clamp);
        let a = FieldValue::Float(0.0);
        let b = FieldValue::Float(10.0);
        assert_eq!(smooth_field(&def, &a, &b, 0.9), a);
        assert_eq!(smooth_field(&def, &a, &b, 1.0), b);
    }

    #[test]
    fn interpolate_stops_at_the_newer_value() {
        let def = float(Smoothing::Interpolate);
        let a = FieldValue::Float(0.0);
        let b = FieldValue::Float(10.0);
        assert_eq!(smooth_field(&def, &a, &b, 0.5), FieldValue::Float(5.0));
        assert_eq!(smooth_field(&def, &a, &b, 1.5), b);
    }

    #[test]
    fn extrapolate_continues_the_trend() {
        let def = float(Smoothing::InterpolateAndExtrapolate);
        let a = FieldValue::Float(0.0);
        let b = FieldValue::Float(10.0);
        assert_eq!(smooth_field(&def, &a, &b, 1.5), FieldValue::Float(15.0));
    }

    #[test]
    fn jumps_beyond_max_distance_clamp() {
        let def = float(Smoothing::Interpolate).max_smoothing_distance(5.0);
        let a = FieldValue::Float(0.0);
        let b = FieldValue::Float(10.0);
        assert_eq!(smooth_field(&def, &a, &b, 0.5), a);
        let near = FieldValue::Float(4.0);
        assert_eq!(smooth_field(&def, &a, &near, 0.5), FieldValue::Float(2.0));
    }

    #[test]
    fn discrete_fields_never_blend() {
        let def = FieldDef::new("n", FieldKind::int32()).smoothing(Smoothing::Interpolate);
        let a = FieldValue::Int(1);
        let b = FieldValue::Int(9);
        assert_eq!(smooth_field(&def, &a, &b, 0.5), a);
    }

    #[test]
    fn quaternions_take_the_short_way() {
        let def = FieldDef::new("rot", FieldKind::quaternion(0)).smoothing(Smoothing::Interpolate);
        let identity = FieldValue::Quaternion([0.0, 0.0, 0.0, 1.0]);
        let flipped = FieldValue::Quaternion([0.0, 0.0, 0.0, -1.0]);
        assert!(field_distance(&identity, &flipped) < 1e-3);
        let FieldValue::Quaternion(q) = smooth_field(&def, &identity, &flipped, 0.5) else {
            panic!("expected a quaternion");
        };
        assert!((q[3].abs() - 1.0).abs() < 1e-5);
    }

    fn layout() -> GhostRegistry {
        GhostRegistry::builder()
            .component(ComponentType::single(
                "Pos",
                vec![
                    FieldDef::new("x", FieldKind::float(0)).smoothing(Smoothing::Interpolate),
                    FieldDef::new("y", FieldKind::float(0))
                        .smoothing(Smoothing::InterpolateAndExtrapolate),
                ],
            ))
            .ghost(GhostTypeDef::new("Dot").component("Pos"))
            .build()
            .unwrap()
    }

    fn frame(layout: &GhostLayout, x: f32, y: f32) -> QuantizedState {
        let mut state = GhostState::default_for(layout);
        state.set_field(0, 0, FieldValue::Float(x));
        state.set_field(0, 1, FieldValue::Float(y));
        QuantizedState::from_state(layout, &state).unwrap()
    }

    #[test]
    fn sample_between_and_beyond_snapshots() {
        let registry = layout();
        let layout = &registry.ghosts()[0];
        let mut history = SnapshotHistory::with_default_depth();
        history.insert(NetworkTick::new(10), frame(layout, 0.0, 0.0)).unwrap();
        history.insert(NetworkTick::new(12), frame(layout, 2.0, 2.0)).unwrap();

        let mid = TickTime::new(NetworkTick::new(11));
        let state = sample_state(layout, &history, mid, 4).unwrap().unwrap();
        assert_eq!(state.field(0, 0), Some(&FieldValue::Float(1.0)));

        let early = TickTime::new(NetworkTick::new(3));
        let state = sample_state(layout, &history, early, 4).unwrap().unwrap();
        assert_eq!(state.field(0, 0), Some(&FieldValue::Float(0.0)));

        let late = TickTime::new(NetworkTick::new(20));
        let state = sample_state(layout, &history, late, 4).unwrap().unwrap();
        assert_eq!(state.field(0, 0), Some(&FieldValue::Float(2.0)));
        // Four ticks of extrapolation at one unit per tick.
        assert_eq!(state.field(0, 1), Some(&FieldValue::Float(6.0)));
    }

    #[test]
    fn sample_empty_history() {
        let registry = layout();
        let history = SnapshotHistory::with_default_depth();
        let at = TickTime::new(NetworkTick::new(1));
        assert!(sample_state(&registry.ghosts()[0], &history, at, 4)
            .unwrap()
            .is_none());
    }

    #[test]
    fn prediction_smoothing_blends_small_errors_and_snaps_large_ones() {
        let smoothing = PredictionSmoothing { blend: 0.5 };
        let def = float(Smoothing::Interpolate).max_smoothing_distance(3.0);
        let local = FieldValue::Float(0.0);
        assert_eq!(
            smoothing.apply(&def, &local, &FieldValue::Float(2.0)),
            FieldValue::Float(1.0)
        );
        assert_eq!(
            smoothing.apply(&def, &local, &FieldValue::Float(8.0)),
            FieldValue::Float(8.0)
        );
    }
}
