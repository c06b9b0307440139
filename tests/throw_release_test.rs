//! Carrying and throwing: the joint drive keeps a held body tracking the
//! hand, and release hands the averaged hand velocity to the body.
//!
//! Run with: cargo test --test throw_release_test -- --nocapture

use nalgebra::{UnitQuaternion, Vector3};

use clasp::config::InteractionConfig;
use clasp::interaction::{
    CandidateDesc, CandidateId, GrabberDesc, GrabberId, HandSide, InputSnapshot, InteractionSystem,
};
use clasp::world::{BodyId, BodyShape};

const DT: f32 = 1.0 / 90.0;

struct Rig {
    system: InteractionSystem,
    hand_body: BodyId,
    hand: GrabberId,
    ball_body: BodyId,
    ball: CandidateId,
}

fn rig() -> Rig {
    let mut system = InteractionSystem::new(InteractionConfig::default());
    system.world.gravity = Vector3::zeros();

    let ball_body = system.world.add_body(
        Vector3::new(0.0, 1.0, 0.0),
        UnitQuaternion::identity(),
        BodyShape::Ball { radius: 0.05 },
        false,
        true,
    );
    let ball =
        system.register_candidate(CandidateDesc::new(ball_body).require_line_of_sight(false));

    let hand_body = system.world.add_body(
        Vector3::new(0.05, 1.0, 0.0),
        UnitQuaternion::identity(),
        BodyShape::Ball { radius: 0.05 },
        true,
        false,
    );
    let hand = system.register_grabber(GrabberDesc::hand(hand_body, HandSide::Right));

    Rig { system, hand_body, hand, ball_body, ball }
}

fn gripping() -> InputSnapshot {
    let mut input = InputSnapshot::default();
    input.right.grab_active = true;
    input.right.hold_active = true;
    input
}

#[test]
fn held_body_tracks_a_moving_hand() {
    let mut rig = rig();
    let input = gripping();
    rig.system.fixed_tick(&input, DT);
    assert_eq!(rig.system.grabber(rig.hand).unwrap().held, Some(rig.ball));

    // Carry the hand 1 m sideways over a second.
    let ticks = 90;
    for i in 0..ticks {
        let x = 0.05 + (i + 1) as f32 / ticks as f32;
        rig.system.world.set_kinematic_pose(
            rig.hand_body,
            Vector3::new(x, 1.0, 0.0),
            UnitQuaternion::identity(),
        );
        rig.system.fixed_tick(&input, DT);
    }
    // Settle.
    for _ in 0..60 {
        rig.system.fixed_tick(&input, DT);
    }

    let hand_pos = rig.system.world.position(rig.hand_body).unwrap();
    let ball_pos = rig.system.world.position(rig.ball_body).unwrap();
    let err = (hand_pos - ball_pos).norm();
    println!("carry error after settle: {:.4} m", err);
    assert!(err < 0.05, "held body should track the hand, err={err:.4}");
}

#[test]
fn release_mid_swing_throws_with_hand_velocity() {
    let mut rig = rig();
    let mut input = gripping();
    rig.system.fixed_tick(&input, DT);
    assert_eq!(rig.system.grabber(rig.hand).unwrap().held, Some(rig.ball));

    // Swing along +x at 2 m/s for half a second.
    let speed = 2.0;
    let mut x = 0.05;
    for _ in 0..45 {
        x += speed * DT;
        rig.system.world.set_kinematic_pose(
            rig.hand_body,
            Vector3::new(x, 1.0, 0.0),
            UnitQuaternion::identity(),
        );
        rig.system.fixed_tick(&input, DT);
    }

    input.right.grab_active = false;
    input.right.hold_active = false;
    rig.system.fixed_tick(&input, DT);

    assert!(rig.system.grabber(rig.hand).unwrap().held.is_none());
    let v = rig.system.world.linvel(rig.ball_body).unwrap();
    println!("release velocity: ({:.2}, {:.2}, {:.2})", v.x, v.y, v.z);
    // Hand average is about 2 m/s along +x, scaled by the hand factor.
    assert!(v.x > 1.0, "throw should carry hand velocity, got vx={:.2}", v.x);
    assert!(v.x < 6.0, "throw velocity should stay near the swing speed");
    assert!(v.y.abs() < 1.0 && v.z.abs() < 1.0);
}

#[test]
fn stationary_release_drops_without_velocity() {
    let mut rig = rig();
    let mut input = gripping();
    rig.system.fixed_tick(&input, DT);

    for _ in 0..30 {
        rig.system.fixed_tick(&input, DT);
    }

    input.right.grab_active = false;
    input.right.hold_active = false;
    rig.system.fixed_tick(&input, DT);

    let v = rig.system.world.linvel(rig.ball_body).unwrap();
    assert!(v.norm() < 0.5, "stationary release should not fling, |v|={:.2}", v.norm());
}

/// Grabs the ball, spins the hand in place at 2 rad/s about z for half a
/// second, then releases mid-spin and returns the ball's velocity.
fn spin_and_release(throw_center: Option<Vector3<f32>>) -> Vector3<f32> {
    let mut system = InteractionSystem::new(InteractionConfig::default());
    system.world.gravity = Vector3::zeros();

    // Small colliders keep depenetration from adding its own lever arm.
    let ball_body = system.world.add_body(
        Vector3::new(0.0, 1.0, 0.0),
        UnitQuaternion::identity(),
        BodyShape::Ball { radius: 0.02 },
        false,
        true,
    );
    let ball =
        system.register_candidate(CandidateDesc::new(ball_body).require_line_of_sight(false));

    let hand_body = system.world.add_body(
        Vector3::new(0.05, 1.0, 0.0),
        UnitQuaternion::identity(),
        BodyShape::Ball { radius: 0.02 },
        true,
        false,
    );
    let mut desc = GrabberDesc::hand(hand_body, HandSide::Right);
    if let Some(center) = throw_center {
        desc = desc.throw_center(center);
    }
    let hand = system.register_grabber(desc);

    let mut input = gripping();
    system.fixed_tick(&input, DT);
    assert_eq!(system.grabber(hand).unwrap().held, Some(ball));

    let mut angle = 0.0;
    for _ in 0..45 {
        angle += 2.0 * DT;
        system.world.set_kinematic_pose(
            hand_body,
            Vector3::new(0.05, 1.0, 0.0),
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), angle),
        );
        system.fixed_tick(&input, DT);
    }

    input.right.grab_active = false;
    input.right.hold_active = false;
    system.fixed_tick(&input, DT);
    system.world.linvel(ball_body).unwrap()
}

#[test]
fn throw_center_offset_adds_rotational_sweep() {
    // Gripped at the hand itself, the lever arm is tiny and a pure wrist
    // spin throws almost nothing.
    let plain = spin_and_release(None);
    assert!(plain.norm() < 0.25, "plain spin threw at {:.2} m/s", plain.norm());

    // A throw center down at the wrist gives the same spin a 0.3 m lever.
    let offset = spin_and_release(Some(Vector3::new(0.0, -0.3, 0.0)));
    assert!(offset.norm() > 0.35, "offset spin threw at {:.2} m/s", offset.norm());
}

#[test]
fn released_body_collides_with_the_hand_again_after_timeout() {
    let mut config = InteractionConfig::default();
    config.release.overlap_timeout = 0.2;
    let mut system = InteractionSystem::new(config);
    system.world.gravity = Vector3::zeros();

    let ball_body = system.world.add_body(
        Vector3::new(0.0, 1.0, 0.0),
        UnitQuaternion::identity(),
        BodyShape::Ball { radius: 0.05 },
        false,
        true,
    );
    let ball =
        system.register_candidate(CandidateDesc::new(ball_body).require_line_of_sight(false));

    let hand_body = system.world.add_body(
        Vector3::new(0.05, 1.0, 0.0),
        UnitQuaternion::identity(),
        BodyShape::Ball { radius: 0.05 },
        true,
        false,
    );
    let hand = system.register_grabber(GrabberDesc::hand(hand_body, HandSide::Right));

    let mut input = gripping();
    system.fixed_tick(&input, DT);
    assert_eq!(system.grabber(hand).unwrap().held, Some(ball));

    input = InputSnapshot::default();
    system.fixed_tick(&input, DT);
    assert!(system.grabber(hand).unwrap().held.is_none());
    // Right after a stationary release the body still overlaps the hand,
    // but the pair is suppressed.
    assert!(!system.world.contacts_any(ball_body, &[]));

    let mut restored_at = None;
    for tick in 0..40 {
        system.fixed_tick(&input, DT);
        if system.world.contacts_any(ball_body, &[]) {
            restored_at = Some(tick);
            break;
        }
    }
    let restored_at = restored_at.expect("collision should come back after the timeout");
    // The body never cleared the hand volume, so only the time since
    // release can lift the suppression.
    assert!(restored_at >= 15, "suppression lifted too early: tick {restored_at}");
}

#[test]
fn released_body_regains_gravity() {
    let mut rig = rig();
    rig.system.world.gravity = Vector3::new(0.0, -9.81, 0.0);

    let mut input = gripping();
    rig.system.fixed_tick(&input, DT);
    assert!(rig.system.candidate(rig.ball).unwrap().is_held());
    assert_eq!(rig.system.world.gravity_scale(rig.ball_body), Some(1.0));

    input.right.grab_active = false;
    input.right.hold_active = false;
    rig.system.fixed_tick(&input, DT);

    assert_eq!(rig.system.world.gravity_scale(rig.ball_body), Some(1.0));
    assert!(rig.system.candidate(rig.ball).unwrap().saved.is_none());

    let y0 = rig.system.world.position(rig.ball_body).unwrap().y;
    for _ in 0..30 {
        rig.system.fixed_tick(&input, DT);
    }
    let y1 = rig.system.world.position(rig.ball_body).unwrap().y;
    assert!(y1 < y0, "released body should fall");
}
