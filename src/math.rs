//! Small vector/quaternion helpers shared by the joint drives, throw
//! tracking, and the ballistic pull solver.

use nalgebra::{UnitQuaternion, Vector3};

/// Shortest rotation taking `from` to `to`.
pub fn delta_rotation(
    from: &UnitQuaternion<f32>,
    to: &UnitQuaternion<f32>,
) -> UnitQuaternion<f32> {
    to * from.inverse()
}

/// Angle between two orientations, in degrees.
pub fn angle_between_deg(a: &UnitQuaternion<f32>, b: &UnitQuaternion<f32>) -> f32 {
    a.angle_to(b).to_degrees()
}

/// Decomposes a rotation into a scaled axis (axis * angle, radians),
/// taking the short way around. Zero rotation yields the zero vector.
pub fn scaled_axis(q: &UnitQuaternion<f32>) -> Vector3<f32> {
    match q.axis_angle() {
        Some((axis, angle)) => axis.into_inner() * angle,
        None => Vector3::zeros(),
    }
}

/// Angular velocity that rotates `prev` onto `cur` over `dt` seconds.
pub fn angular_velocity(
    prev: &UnitQuaternion<f32>,
    cur: &UnitQuaternion<f32>,
    dt: f32,
) -> Vector3<f32> {
    if dt <= f32::EPSILON {
        return Vector3::zeros();
    }
    scaled_axis(&delta_rotation(prev, cur)) / dt
}

/// Clamps `v` to at most `max` length, preserving direction.
pub fn clamp_magnitude(v: Vector3<f32>, max: f32) -> Vector3<f32> {
    let len = v.norm();
    if len > max && len > f32::EPSILON {
        v * (max / len)
    } else {
        v
    }
}

/// Launch state for a lofted trajectory: initial velocity plus the
/// (downward, possibly non-standard) gravity to apply while in flight.
#[derive(Debug, Clone, Copy)]
pub struct BallisticArc {
    pub velocity: Vector3<f32>,
    pub gravity: Vector3<f32>,
}

/// Solves for a velocity and gravity pair that carries a body from
/// `start` to `target` in `time` seconds, peaking at height `apex_y`
/// halfway through the flight.
///
/// The lateral component is uniform (`diff_xz / time`); the vertical
/// component and gravity come from fitting a parabola through the
/// start height, the apex, and the target height.
pub fn solve_ballistic_arc(
    start: Vector3<f32>,
    target: Vector3<f32>,
    time: f32,
    apex_y: f32,
) -> BallisticArc {
    let time = time.max(1e-4);
    let diff = target - start;

    let a = start.y;
    let b = apex_y;
    let c = target.y;

    let vy = -(3.0 * a - 4.0 * b + c) / time;
    let gravity_y = 4.0 * (a - 2.0 * b + c) / (time * time);

    BallisticArc {
        velocity: Vector3::new(diff.x / time, vy, diff.z / time),
        gravity: Vector3::new(0.0, gravity_y, 0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn simulate(arc: BallisticArc, start: Vector3<f32>, time: f32, steps: usize) -> Vector3<f32> {
        let dt = time / steps as f32;
        let mut pos = start;
        let mut vel = arc.velocity;
        for _ in 0..steps {
            vel += arc.gravity * dt;
            pos += vel * dt;
        }
        pos
    }

    #[test]
    fn arc_reaches_target() {
        let start = Vector3::new(0.0, 1.0, 0.0);
        let target = Vector3::new(2.0, 1.2, -1.0);
        let arc = solve_ballistic_arc(start, target, 0.8, 2.0);
        let end = simulate(arc, start, 0.8, 8000);
        assert_relative_eq!(end.x, target.x, epsilon = 1e-2);
        assert_relative_eq!(end.y, target.y, epsilon = 1e-2);
        assert_relative_eq!(end.z, target.z, epsilon = 1e-2);
    }

    #[test]
    fn arc_peaks_at_apex_midway() {
        let start = Vector3::new(0.0, 0.5, 0.0);
        let target = Vector3::new(1.0, 0.5, 0.0);
        let arc = solve_ballistic_arc(start, target, 1.0, 1.5);
        // Closed form: y(t/2) = a + vy*T/2 + g/2*(T/2)^2 = apex.
        let mid = start.y + arc.velocity.y * 0.5 + 0.5 * arc.gravity.y * 0.25;
        assert_relative_eq!(mid, 1.5, epsilon = 1e-4);
    }

    #[test]
    fn arc_gravity_points_down_when_apex_is_above() {
        let start = Vector3::new(0.0, 0.5, 0.0);
        let target = Vector3::new(1.0, 0.5, 0.0);
        let arc = solve_ballistic_arc(start, target, 1.0, 1.5);
        // g = 4(a - 2b + c)/t^2 = 4(0.5 - 3.0 + 0.5) = -8.
        assert_relative_eq!(arc.gravity.y, -8.0, epsilon = 1e-4);
        assert!(arc.velocity.y > 0.0);
    }

    #[test]
    fn vertical_pull_has_no_lateral_velocity() {
        let start = Vector3::new(0.0, 0.0, 0.0);
        let target = Vector3::new(0.0, 1.0, 0.0);
        let arc = solve_ballistic_arc(start, target, 0.5, 1.3);
        assert_relative_eq!(arc.velocity.x, 0.0);
        assert_relative_eq!(arc.velocity.z, 0.0);
        assert!(arc.velocity.y > 0.0);
    }

    #[test]
    fn angular_velocity_matches_axis_rotation() {
        let prev = UnitQuaternion::identity();
        let cur = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.3);
        let w = angular_velocity(&prev, &cur, 0.1);
        assert_relative_eq!(w.y, 3.0, epsilon = 1e-5);
        assert_relative_eq!(w.x, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn angle_takes_short_path() {
        let a = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.1);
        let b = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), -0.1);
        assert_relative_eq!(angle_between_deg(&a, &b), 0.2f32.to_degrees(), epsilon = 1e-3);
    }

    #[test]
    fn clamp_magnitude_preserves_short_vectors() {
        let v = Vector3::new(1.0, 0.0, 0.0);
        assert_relative_eq!(clamp_magnitude(v, 2.0).norm(), 1.0);
        assert_relative_eq!(clamp_magnitude(v * 5.0, 2.0).norm(), 2.0, epsilon = 1e-5);
    }
}
