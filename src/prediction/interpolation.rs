//! Interpolation/extrapolation for non-owned entities: rather than snapping
//! to each incoming authoritative update, render a short delay behind the
//! most recent two samples and interpolate between them; extrapolate
//! forward when the next sample hasn't arrived yet.

use std::collections::VecDeque;

use crate::ids::Tick;

#[derive(Clone, Copy, Debug)]
pub struct InterpolationSample<V> {
    pub tick: Tick,
    pub value: V,
}

pub trait Interpolate {
    fn lerp(&self, other: &Self, t: f32) -> Self;
}

/// Buffers the last few authoritative samples for one non-owned entity and
/// produces an interpolated (or, past the buffer, extrapolated) value for
/// any render tick behind the newest sample by `delay_ticks`.
pub struct InterpolationBuffer<V> {
    samples: VecDeque<InterpolationSample<V>>,
    capacity: usize,
    delay_ticks: u32,
    /// Ticks past the newest sample the buffer will still extrapolate
    /// forward; beyond this it holds the last known value instead.
    extrapolation_limit_ticks: u32,
}

impl<V: Interpolate + Clone> InterpolationBuffer<V> {
    pub fn new(capacity: usize, delay_ticks: u32) -> Self {
        Self::with_extrapolation_limit(capacity, delay_ticks, u32::MAX)
    }

    pub fn with_extrapolation_limit(capacity: usize, delay_ticks: u32, extrapolation_limit_ticks: u32) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            delay_ticks,
            extrapolation_limit_ticks,
        }
    }

    pub fn push(&mut self, tick: Tick, value: V) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(InterpolationSample { tick, value });
    }

    /// Value to render at `render_tick = latest_tick - delay_ticks`.
    /// Interpolates between the two samples bracketing the render tick, or
    /// extrapolates from the last two samples if the render tick is newer
    /// than everything buffered (the buffer has fallen behind).
    pub fn sample_at(&self, render_tick: Tick) -> Option<V> {
        if self.samples.is_empty() {
            return None;
        }
        if self.samples.len() == 1 {
            return Some(self.samples[0].value.clone());
        }

        for window in self.samples.iter().collect::<Vec<_>>().windows(2) {
            let [a, b] = window else { unreachable!() };
            if !a.tick.is_after(render_tick) && (b.tick.is_after(render_tick) || b.tick == render_tick) {
                let span = (b.tick - a.tick).max(1) as f32;
                let elapsed = (render_tick - a.tick) as f32;
                let t = (elapsed / span).clamp(0.0, 1.0);
                return Some(a.value.lerp(&b.value, t));
            }
        }

        let last = self.samples.back().unwrap();
        let second_last = &self.samples[self.samples.len() - 2];
        if render_tick.is_after(last.tick) {
            let overshoot = (render_tick - last.tick) as u32;
            if overshoot > self.extrapolation_limit_ticks {
                return Some(last.value.clone());
            }
            let span = (last.tick - second_last.tick).max(1) as f32;
            let elapsed = (render_tick - second_last.tick) as f32;
            let t = elapsed / span;
            return Some(second_last.value.lerp(&last.value, t));
        }
        Some(last.value.clone())
    }

    pub fn render_tick(&self, latest_tick: Tick) -> Tick {
        latest_tick.wrapping_sub(self.delay_ticks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq)]
    struct Scalar(f32);

    impl Interpolate for Scalar {
        fn lerp(&self, other: &Self, t: f32) -> Self {
            Scalar(self.0 + (other.0 - self.0) * t)
        }
    }

    #[test]
    fn interpolates_between_bracketing_samples() {
        let mut buf = InterpolationBuffer::new(8, 2);
        buf.push(Tick(0), Scalar(0.0));
        buf.push(Tick(10), Scalar(10.0));
        let mid = buf.sample_at(Tick(5)).unwrap();
        approx::assert_relative_eq!(mid.0, 5.0, epsilon = 0.001);
    }

    #[test]
    fn extrapolates_past_newest_sample_within_limit() {
        let mut buf = InterpolationBuffer::with_extrapolation_limit(8, 2, 15);
        buf.push(Tick(0), Scalar(0.0));
        buf.push(Tick(10), Scalar(10.0));
        let extrapolated = buf.sample_at(Tick(20)).unwrap();
        approx::assert_relative_eq!(extrapolated.0, 20.0, epsilon = 0.001);
    }

    #[test]
    fn holds_last_value_beyond_extrapolation_limit() {
        let mut buf = InterpolationBuffer::with_extrapolation_limit(8, 2, 5);
        buf.push(Tick(0), Scalar(0.0));
        buf.push(Tick(10), Scalar(10.0));
        let held = buf.sample_at(Tick(20)).unwrap();
        assert_eq!(held, Scalar(10.0));
    }
}
