//! Force pull flight: ballistic arcs toward the hand, the auto-grab
//! window, collision aborts, and hands stealing mid-flight targets.
//!
//! Run with: cargo test --test force_pull_test -- --nocapture

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
    force: GrabberId,
    ball_body: BodyId,
    ball: CandidateId,
}

/// Hand 1 m above the candidate, so the pull is purely vertical.
fn rig() -> Rig {
    let mut system = InteractionSystem::new(InteractionConfig::default());

    let ball_body = system.world.add_body(
        Vector3::new(0.0, 0.05, 0.0),
        UnitQuaternion::identity(),
        BodyShape::Ball { radius: 0.05 },
        false,
        true,
    );
    let ball = system.register_candidate(
        CandidateDesc::new(ball_body)
            .force_grabbable(true)
            .require_line_of_sight(false),
    );

    let hand_body = system.world.add_body(
        Vector3::new(0.0, 1.05, 0.0),
        UnitQuaternion::identity(),
        BodyShape::Ball { radius: 0.05 },
        true,
        false,
    );
    let hand = system.register_grabber(GrabberDesc::hand(hand_body, HandSide::Right));
    let force = system.register_grabber(GrabberDesc::force(hand_body, hand));

    // Keep the ball from falling before the pull starts.
    system.world.gravity = Vector3::zeros();

    Rig { system, hand_body, hand, force, ball_body, ball }
}

fn idle() -> InputSnapshot {
    InputSnapshot::default()
}

fn force_button() -> InputSnapshot {
    let mut input = InputSnapshot::default();
    input.right.force_grab_active = true;
    input
}

/// Aim first so the force grabber hovers, then press.
fn start_pull(rig: &mut Rig) {
    rig.system.fixed_tick(&idle(), DT);
    assert_eq!(
        rig.system.grabber(rig.force).unwrap().hover,
        Some(rig.ball),
        "force grabber should hover the candidate before the press"
    );
    rig.system.fixed_tick(&force_button(), DT);
    assert_eq!(rig.system.grabber(rig.force).unwrap().held, Some(rig.ball));
}

#[test]
fn vertical_pull_flies_to_the_hand_and_auto_grabs() {
    let mut rig = rig();
    start_pull(&mut rig);

    // Gravity is off for the body while force-held.
    assert_eq!(rig.system.world.gravity_scale(rig.ball_body), Some(0.0));
    assert!(rig.system.candidate(rig.ball).unwrap().is_force_grabbed);

    // Fly with the grip closed so the hand catches on arrival.
    let mut input = force_button();
    input.right.grab_active = true;
    input.right.hold_active = true;

    let mut caught_at = None;
    for tick in 0..300 {
        rig.system.fixed_tick(&input, DT);
        if rig.system.grabber(rig.hand).unwrap().held == Some(rig.ball) {
            caught_at = Some(tick);
            break;
        }
    }
    let caught_at = caught_at.expect("hand should auto-grab the pulled candidate");
    println!("auto-grabbed after {} ticks", caught_at);

    // The force grabber yielded and the body kept its snapshot through the
    // hand grab; gravity comes back only at the final release.
    assert!(rig.system.grabber(rig.force).unwrap().held.is_none());
    assert!(!rig.system.candidate(rig.ball).unwrap().is_force_grabbed);
    assert_eq!(rig.system.world.gravity_scale(rig.ball_body), Some(1.0));

    // The joint drive pulls it the rest of the way in.
    for _ in 0..90 {
        rig.system.fixed_tick(&input, DT);
    }
    let ball_pos = rig.system.world.position(rig.ball_body).unwrap();
    let hand_pos = rig.system.world.position(rig.hand_body).unwrap();
    assert!(
        (ball_pos - hand_pos).norm() < 0.05,
        "caught candidate should settle at the hand"
    );
}

#[test]
fn expired_auto_grab_window_drops_the_candidate() {
    let mut rig = rig();
    rig.system.world.gravity = Vector3::new(0.0, -9.81, 0.0);
    start_pull(&mut rig);

    // Never close the grip; the window must expire on its own.
    let input = force_button();
    let window_ticks =
        ((rig.system.config.force.force_time + rig.system.config.force.auto_grab_time) / DT) as usize
            + 30;
    for _ in 0..window_ticks {
        rig.system.fixed_tick(&input, DT);
    }

    assert!(rig.system.grabber(rig.hand).unwrap().held.is_none());
    assert!(rig.system.grabber(rig.force).unwrap().held.is_none());
    assert!(!rig.system.candidate(rig.ball).unwrap().is_held());
    // Gravity restored, so the candidate falls away.
    assert_eq!(rig.system.world.gravity_scale(rig.ball_body), Some(1.0));
}

#[test]
fn hand_grab_mid_flight_takes_over_from_the_force_grabber() {
    let mut rig = rig();
    start_pull(&mut rig);

    // Fly until the candidate is inside hand range, then press the grip.
    let mut input = force_button();
    let mut took = false;
    for _ in 0..300 {
        let ball_pos = rig.system.world.position(rig.ball_body).unwrap();
        let hand_pos = rig.system.world.position(rig.hand_body).unwrap();
        if (ball_pos - hand_pos).norm() < 0.12 && !took {
            input.right.grab_active = true;
            input.right.hold_active = true;
        }
        rig.system.fixed_tick(&input, DT);
        if rig.system.grabber(rig.hand).unwrap().held == Some(rig.ball) {
            took = true;
            break;
        }
    }

    assert!(took, "hand should take the candidate");
    assert!(rig.system.grabber(rig.force).unwrap().held.is_none());
    assert!(!rig.system.candidate(rig.ball).unwrap().is_force_grabbed);
}

#[test]
fn force_button_alone_does_not_pull_unhoverable_candidates() {
    let mut rig = rig();
    // Not flagged force grabbable.
    rig.system.candidate_mut(rig.ball).unwrap().force_grabbable = false;

    rig.system.fixed_tick(&idle(), DT);
    assert_eq!(rig.system.grabber(rig.force).unwrap().hover, None);
    rig.system.fixed_tick(&force_button(), DT);
    assert!(rig.system.grabber(rig.force).unwrap().held.is_none());
}

#[test]
fn wall_collision_after_grace_aborts_the_pull() {
    let mut system = InteractionSystem::new(InteractionConfig::default());
    system.world.gravity = Vector3::zeros();

    let ball_body = system.world.add_body(
        Vector3::new(0.0, 0.05, 0.0),
        UnitQuaternion::identity(),
        BodyShape::Ball { radius: 0.05 },
        false,
        true,
    );
    let ball = system.register_candidate(
        CandidateDesc::new(ball_body)
            .force_grabbable(true)
            .require_line_of_sight(false),
    );

    // Thin solid shelf between the candidate and the hand.
    system.world.add_body(
        Vector3::new(0.0, 1.5, 0.0),
        UnitQuaternion::identity(),
        BodyShape::Cuboid { half_extents: [1.0, 0.05, 1.0] },
        true,
        true,
    );

    let hand_body = system.world.add_body(
        Vector3::new(0.0, 2.5, 0.0),
        UnitQuaternion::identity(),
        BodyShape::Ball { radius: 0.05 },
        true,
        false,
    );
    let hand = system.register_grabber(GrabberDesc::hand(hand_body, HandSide::Right));
    let force = system.register_grabber(GrabberDesc::force(hand_body, hand));

    system.fixed_tick(&InputSnapshot::default(), DT);
    let mut input = InputSnapshot::default();
    input.right.force_grab_active = true;
    system.fixed_tick(&input, DT);
    assert_eq!(system.grabber(force).unwrap().held, Some(ball));

    let mut aborted_at = None;
    for tick in 0..400 {
        system.fixed_tick(&input, DT);
        if system.grabber(force).unwrap().held.is_none() {
            aborted_at = Some(tick);
            break;
        }
    }
    assert!(aborted_at.is_some(), "shelf impact should abort the pull");

    // Abort clamps speed and gives the body back to physics.
    let v = system.world.linvel(ball_body).unwrap();
    assert!(v.norm() <= system.config.force.post_collision_speed + 0.1);
    assert!(!system.candidate(ball).unwrap().is_force_grabbed);
    let ball_pos = system.world.position(ball_body).unwrap();
    assert!(ball_pos.y < 2.0, "candidate should not pass the shelf");
}
