//! Velocity-level joint drives for held candidates.
//!
//! A fresh grab starts on a soft pulling drive, converges toward the hand
//! anchor while monitored, then promotes to its terminal behavior: the
//! full-strength drive for spring tracking, or a rigid follow. The drive
//! is integrated implicitly, so stiff settings stay stable at fixed tick
//! rates.

use nalgebra::{UnitQuaternion, Vector3};

use super::candidate::GrabCandidate;
use super::{CandidateId, GrabberId};
use crate::config::JointConfig;
use crate::math;
use crate::world::{BodyId, SpatialWorld};

/// Why a hold ended by itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JointOutcome {
    Held,
    /// Anchor separation exceeded the candidate's break distance.
    BrokeDistance,
    /// Required drive force exceeded the candidate's break force.
    BrokeForce,
}

/// The live coupling between one grabber and one held candidate.
#[derive(Debug, Clone)]
pub struct JointAttachment {
    pub grabber: GrabberId,
    pub candidate: CandidateId,
    /// Grip point in candidate-local space.
    pub anchor_local: Vector3<f32>,
    /// Candidate rotation maintained relative to the grabber rotation.
    pub target_rotation: UnitQuaternion<f32>,
    /// Zero-DOF follow, entered at promotion for rigid tracking. Never
    /// set while the grab is still being pulled in.
    pub rigid: bool,
    /// Promote to the rigid follow instead of the full-strength drive.
    rigid_on_promote: bool,
    /// Soft drive while the grab is still being pulled in.
    pub pulling: bool,
    /// Watch for convergence and promote when reached.
    pub monitoring: bool,
    elapsed: f32,
}

impl JointAttachment {
    pub fn new(
        grabber: GrabberId,
        candidate: CandidateId,
        anchor_local: Vector3<f32>,
        target_rotation: UnitQuaternion<f32>,
        rigid: bool,
    ) -> Self {
        Self {
            grabber,
            candidate,
            anchor_local,
            target_rotation,
            rigid: false,
            rigid_on_promote: rigid,
            pulling: true,
            monitoring: true,
            elapsed: 0.0,
        }
    }
}

/// Temporary drive-strength override on a held candidate, dropped when its
/// timer runs out. Recoil and two-hand steadying effects use this.
#[derive(Debug, Clone, Copy)]
pub struct JointOverride {
    pub time_left: f32,
    pub max_force: f32,
    pub slerp_max_force: f32,
    pub velocity_power: f32,
}

/// World-space grip point of an attachment at the candidate's current pose.
pub fn anchor_world(
    world: &SpatialWorld,
    body: BodyId,
    anchor_local: Vector3<f32>,
) -> Option<Vector3<f32>> {
    let pos = world.position(body)?;
    let rot = world.rotation(body)?;
    Some(pos + rot * anchor_local)
}

/// Advances one attachment by one tick.
///
/// `grabber_anchor` is the grabber's grip point in world space. Velocities
/// are written to the candidate body; the following `step` integrates them.
pub fn update_attachment(
    world: &mut SpatialWorld,
    att: &mut JointAttachment,
    grabber_anchor: Vector3<f32>,
    grabber_rotation: UnitQuaternion<f32>,
    candidate: &GrabCandidate,
    config: &JointConfig,
    dt: f32,
) -> JointOutcome {
    let body = candidate.body;
    let (Some(pos), Some(rot)) = (world.position(body), world.rotation(body)) else {
        return JointOutcome::Held;
    };

    let anchor_now = pos + rot * att.anchor_local;
    let err = grabber_anchor - anchor_now;

    if let Some(break_distance) = candidate.break_distance {
        if err.norm() > break_distance {
            return JointOutcome::BrokeDistance;
        }
    }

    let desired_rot = grabber_rotation * att.target_rotation;

    if att.monitoring {
        att.elapsed += dt;
        let angle = math::angle_between_deg(&desired_rot, &rot);
        let converged = angle < config.final_joint_max_angle
            && err.norm() < config.parenting_max_distance;
        let timed_out = config.final_joint_quick && att.elapsed > config.final_joint_timeout;
        if converged || timed_out {
            att.pulling = false;
            att.monitoring = false;
            att.rigid = att.rigid_on_promote;
        }
    }

    if att.rigid {
        let desired_pos = grabber_anchor - desired_rot * att.anchor_local;
        world.set_linvel(body, (desired_pos - pos) / dt);
        let delta = math::delta_rotation(&rot, &desired_rot);
        world.set_angvel(body, math::scaled_axis(&delta) / dt);
        return JointOutcome::Held;
    }

    let mass = world.mass(body).unwrap_or(1.0).max(1e-3);
    let (spring, damper) = if att.pulling {
        (config.pulling_spring, config.pulling_damper)
    } else {
        (config.spring, config.damper)
    };
    let (max_force, slerp_max_force, velocity_power) = match candidate.joint_override {
        Some(o) => (o.max_force, o.slerp_max_force, o.velocity_power),
        None => (config.max_force, config.slerp_max_force, config.velocity_power),
    };

    // Positional drive, implicit in the damper term. The target velocity
    // scales with remaining error and is delayed by velocity_power.
    let v = world.linvel(body).unwrap_or_else(Vector3::zeros);
    let v_target = err / (velocity_power.max(1.0) * dt);
    let v_sprung = v + err * (spring / mass) * dt;
    let v_new = v_target + (v_sprung - v_target) / (1.0 + (damper / mass) * dt);

    let required_force = mass * (v_new - v).norm() / dt;
    if candidate.break_force.is_some_and(|bf| required_force > bf) {
        return JointOutcome::BrokeForce;
    }

    let dv = math::clamp_magnitude(v_new - v, max_force * dt / mass);
    world.set_linvel(body, v + dv);

    // Rotational slerp drive against the angle-axis error, unit inertia.
    let w = world.angvel(body).unwrap_or_else(Vector3::zeros);
    let angle_err = math::scaled_axis(&math::delta_rotation(&rot, &desired_rot));
    let w_target = angle_err / (velocity_power.max(1.0) * dt);
    let w_sprung = w + angle_err * config.slerp_spring * dt;
    let w_new = w_target + (w_sprung - w_target) / (1.0 + config.slerp_damper * dt);
    let dw = math::clamp_magnitude(w_new - w, slerp_max_force * dt);
    world.set_angvel(body, w + dw);

    JointOutcome::Held
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interaction::candidate::{CandidateDesc, GrabTracking};
    use crate::world::BodyShape;

    fn setup() -> (SpatialWorld, BodyId) {
        let mut world = SpatialWorld::new();
        let body = world.add_body(
            Vector3::new(0.5, 1.0, 0.0),
            UnitQuaternion::identity(),
            BodyShape::Ball { radius: 0.05 },
            false,
            true,
        );
        world.set_gravity_scale(body, 0.0);
        (world, body)
    }

    fn tick(
        world: &mut SpatialWorld,
        att: &mut JointAttachment,
        candidate: &GrabCandidate,
        config: &JointConfig,
        target: Vector3<f32>,
    ) -> JointOutcome {
        let dt = 1.0 / 90.0;
        let out = update_attachment(
            world,
            att,
            target,
            UnitQuaternion::identity(),
            candidate,
            config,
            dt,
        );
        world.step(dt);
        out
    }

    #[test]
    fn spring_drive_converges_toward_anchor() {
        let (mut world, body) = setup();
        let candidate = GrabCandidate::new(CandidateDesc::new(body));
        let config = JointConfig::default();
        let target = Vector3::new(0.0, 1.0, 0.0);

        let mut att = JointAttachment::new(
            GrabberId(1),
            CandidateId(1),
            Vector3::zeros(),
            UnitQuaternion::identity(),
            false,
        );

        let start_err = (world.position(body).unwrap() - target).norm();
        for _ in 0..180 {
            assert_eq!(tick(&mut world, &mut att, &candidate, &config, target), JointOutcome::Held);
        }
        let end_err = (world.position(body).unwrap() - target).norm();
        assert!(end_err < start_err * 0.2, "drive did not converge: {end_err}");
    }

    #[test]
    fn rigid_candidate_pulls_in_before_locking() {
        let (mut world, body) = setup();
        let candidate = GrabCandidate::new(CandidateDesc::new(body).tracking(GrabTracking::Rigid));
        let mut config = JointConfig::default();
        config.final_joint_timeout = 0.1;
        let target = Vector3::new(0.0, 1.0, 0.0);

        let mut att = JointAttachment::new(
            GrabberId(1),
            CandidateId(1),
            Vector3::zeros(),
            UnitQuaternion::identity(),
            true,
        );

        // The first tick drives the body in; it must not teleport the
        // whole half meter.
        tick(&mut world, &mut att, &candidate, &config, target);
        assert!(!att.rigid);
        let err = (world.position(body).unwrap() - target).norm();
        assert!(err > 0.25, "rigid grab snapped instead of pulling in: {err}");

        // Past the quick timeout the attachment locks and tracks exactly.
        for _ in 0..30 {
            tick(&mut world, &mut att, &candidate, &config, target);
        }
        assert!(att.rigid);
        let err = (world.position(body).unwrap() - target).norm();
        assert!(err < 0.01, "locked follow left error {err}");
    }

    #[test]
    fn break_distance_reports_broke() {
        let (mut world, body) = setup();
        let mut desc = CandidateDesc::new(body);
        desc.break_distance = Some(0.2);
        let candidate = GrabCandidate::new(desc);
        let config = JointConfig::default();

        let mut att = JointAttachment::new(
            GrabberId(1),
            CandidateId(1),
            Vector3::zeros(),
            UnitQuaternion::identity(),
            false,
        );
        // Anchor yanked a meter away.
        let out = tick(
            &mut world,
            &mut att,
            &candidate,
            &config,
            Vector3::new(0.5, 2.0, 0.0),
        );
        assert_eq!(out, JointOutcome::BrokeDistance);
    }

    #[test]
    fn weak_break_force_snaps_under_load() {
        let (mut world, body) = setup();
        let mut desc = CandidateDesc::new(body);
        desc.break_force = Some(0.01);
        let candidate = GrabCandidate::new(desc);
        let config = JointConfig::default();

        let mut att = JointAttachment::new(
            GrabberId(1),
            CandidateId(1),
            Vector3::zeros(),
            UnitQuaternion::identity(),
            false,
        );
        let out = tick(
            &mut world,
            &mut att,
            &candidate,
            &config,
            Vector3::new(0.4, 1.0, 0.0),
        );
        assert_eq!(out, JointOutcome::BrokeForce);
    }

    #[test]
    fn override_caps_the_drive_force() {
        let (mut world, body) = setup();
        let mut candidate = GrabCandidate::new(CandidateDesc::new(body));
        candidate.joint_override = Some(JointOverride {
            time_left: 1.0,
            max_force: 1e-5,
            slerp_max_force: 1e-5,
            velocity_power: 15.0,
        });
        let config = JointConfig::default();
        let target = Vector3::new(0.0, 1.0, 0.0);

        let mut att = JointAttachment::new(
            GrabberId(1),
            CandidateId(1),
            Vector3::zeros(),
            UnitQuaternion::identity(),
            false,
        );
        for _ in 0..45 {
            tick(&mut world, &mut att, &candidate, &config, target);
        }
        // The capped drive has barely pulled the body in.
        let err = (world.position(body).unwrap() - target).norm();
        assert!(err > 0.45, "override failed to cap the drive: {err}");
    }

    #[test]
    fn monitored_grab_promotes_on_timeout() {
        let (mut world, body) = setup();
        let candidate = GrabCandidate::new(CandidateDesc::new(body));
        let mut config = JointConfig::default();
        config.final_joint_timeout = 0.05;

        let mut att = JointAttachment::new(
            GrabberId(1),
            CandidateId(1),
            Vector3::zeros(),
            UnitQuaternion::identity(),
            false,
        );
        assert!(att.monitoring);
        for _ in 0..10 {
            tick(&mut world, &mut att, &candidate, &config, Vector3::new(0.0, 1.0, 0.0));
        }
        assert!(!att.monitoring);
        assert!(!att.pulling);
    }
}
