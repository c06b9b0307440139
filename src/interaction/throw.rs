//! Throw velocity estimation.
//!
//! Every tracked body records its linear and angular velocity each fixed
//! tick into bounded ring buffers. At release, a short window of recent
//! samples is averaged with an outlier filter, and the hand's angular
//! motion about the grab point is converted into extra linear velocity.

use nalgebra::Vector3;

use crate::config::ThrowConfig;
use crate::math;
use crate::world::{BodyId, SpatialWorld};
use nalgebra::UnitQuaternion;

/// Samples retained per channel. At 90 Hz this is just over two seconds.
const SAMPLE_CAPACITY: usize = 200;

/// Cosine threshold under which a sample is discarded as pointing away
/// from the window's consensus direction.
const DIRECTION_FILTER: f32 = 0.2;

/// Fixed-capacity ring buffer, newest sample first.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    samples: Vec<Vector3<f32>>,
    head: usize,
    len: usize,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self {
            samples: vec![Vector3::zeros(); SAMPLE_CAPACITY],
            head: 0,
            len: 0,
        }
    }

    pub fn push(&mut self, sample: Vector3<f32>) {
        self.head = (self.head + SAMPLE_CAPACITY - 1) % SAMPLE_CAPACITY;
        self.samples[self.head] = sample;
        self.len = (self.len + 1).min(SAMPLE_CAPACITY);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// The i-th most recent sample. `recent(0)` is the newest.
    pub fn recent(&self, i: usize) -> Option<Vector3<f32>> {
        if i < self.len {
            Some(self.samples[(self.head + i) % SAMPLE_CAPACITY])
        } else {
            None
        }
    }

    /// Filtered average of `window` samples, skipping the newest `offset`.
    ///
    /// The raw mean of the window establishes a consensus direction;
    /// samples whose direction disagrees with it (normalized dot below
    /// the filter threshold) are dropped and the rest re-averaged. An
    /// empty window yields the zero vector.
    pub fn average(&self, window: usize, offset: usize) -> Vector3<f32> {
        let available = self.len.saturating_sub(offset);
        let count = window.min(available);
        if count == 0 {
            return Vector3::zeros();
        }

        let mut mean = Vector3::zeros();
        for i in 0..count {
            if let Some(s) = self.recent(offset + i) {
                mean += s;
            }
        }
        mean /= count as f32;

        let mean_norm = mean.norm();
        if mean_norm < f32::EPSILON {
            return mean;
        }
        let dir = mean / mean_norm;

        let mut filtered = Vector3::zeros();
        let mut kept = 0usize;
        for i in 0..count {
            let Some(s) = self.recent(offset + i) else { continue };
            let norm = s.norm();
            if norm < f32::EPSILON || s.dot(&dir) / norm >= DIRECTION_FILTER {
                filtered += s;
                kept += 1;
            }
        }

        if kept == 0 {
            mean
        } else {
            filtered / kept as f32
        }
    }
}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-body velocity history, advanced once per fixed tick.
#[derive(Debug, Clone, Default)]
pub struct VelocityTracker {
    pub linear: SampleBuffer,
    pub angular: SampleBuffer,
    prev_rotation: Option<UnitQuaternion<f32>>,
}

impl VelocityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one tick of motion for `body`. Angular velocity is derived
    /// from the orientation delta rather than the solver's angvel, so
    /// kinematic hands report useful values too.
    pub fn track(&mut self, world: &SpatialWorld, body: BodyId, dt: f32) {
        let Some(linvel) = world.linvel(body) else {
            return;
        };
        let Some(rotation) = world.rotation(body) else {
            return;
        };

        self.linear.push(linvel);
        if let Some(prev) = self.prev_rotation {
            self.angular.push(math::angular_velocity(&prev, &rotation, dt));
        }
        self.prev_rotation = Some(rotation);
    }

    pub fn reset(&mut self) {
        self.linear.clear();
        self.angular.clear();
        self.prev_rotation = None;
    }

    pub fn average_linear(&self, config: &ThrowConfig) -> Vector3<f32> {
        self.linear.average(config.lookback, config.lookback_start)
    }

    pub fn average_angular(&self, config: &ThrowConfig) -> Vector3<f32> {
        self.angular.average(config.lookback, config.lookback_start)
    }
}

/// Linear and angular velocity to hand a candidate at release.
#[derive(Debug, Clone, Copy)]
pub struct ReleaseVelocities {
    pub linear: Vector3<f32>,
    pub angular: Vector3<f32>,
}

/// Combines hand and candidate motion into the release velocity.
///
/// The linear part blends both averaged linear velocities, then adds the
/// tangential velocity of the grab point as swept by the hand's angular
/// motion about `throw_center`, gated on the hand actually rotating.
pub fn compute_release_velocities(
    hand: &VelocityTracker,
    candidate: &VelocityTracker,
    grab_point: Vector3<f32>,
    throw_center: Vector3<f32>,
    angular_conversion_scale: f32,
    config: &ThrowConfig,
) -> ReleaseVelocities {
    let hand_linear = hand.average_linear(config);
    let candidate_linear = candidate.average_linear(config);
    let hand_angular = hand.average_angular(config);
    let candidate_angular = candidate.average_angular(config);

    let mut linear = hand_linear * config.hand_velocity_factor
        + candidate_linear * config.candidate_velocity_factor;

    if hand_angular.norm() > config.angular_threshold {
        let lever = grab_point - throw_center;
        linear += hand_angular.cross(&lever)
            * config.angular_conversion_factor
            * angular_conversion_scale;
    }

    ReleaseVelocities {
        linear,
        angular: candidate_angular * config.angular_factor,
    }
}
