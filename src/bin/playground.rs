//! Scripted playground: a hand grabs a ball, carries it, and throws it.
//!
//! Run with `RUST_LOG=debug` to watch the interaction lines.

use nalgebra::{UnitQuaternion, Vector3};

use clasp::config::InteractionConfig;
use clasp::interaction::{
    CandidateDesc, GrabberDesc, HandSide, InputSnapshot, InteractionEvent, InteractionSystem,
};
use clasp::world::BodyShape;

const DT: f32 = 1.0 / 90.0;

fn main() {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => match InteractionConfig::from_file(std::path::Path::new(&path)) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("{err}");
                std::process::exit(1);
            }
        },
        None => InteractionConfig::default(),
    };

    let mut system = InteractionSystem::new(config);
    system.events.subscribe(|event| {
        if let InteractionEvent::Grabbed { .. } | InteractionEvent::Released { .. } = event {
            println!("event: {event:?}");
        }
    });

    // Static floor.
    system.world.add_body(
        Vector3::new(0.0, -0.5, 0.0),
        UnitQuaternion::identity(),
        BodyShape::Cuboid { half_extents: [10.0, 0.5, 10.0] },
        true,
        true,
    );

    let ball_body = system.world.add_body(
        Vector3::new(0.0, 0.05, 0.3),
        UnitQuaternion::identity(),
        BodyShape::Ball { radius: 0.05 },
        false,
        true,
    );
    let ball = system.register_candidate(CandidateDesc::new(ball_body).require_line_of_sight(false));

    let hand_body = system.world.add_body(
        Vector3::new(0.0, 1.0, 0.0),
        UnitQuaternion::identity(),
        BodyShape::Ball { radius: 0.05 },
        true,
        false,
    );
    let hand = system.register_grabber(GrabberDesc::hand(hand_body, HandSide::Right));

    let mut input = InputSnapshot::default();

    // Reach down to the ball.
    for i in 0..90 {
        let t = i as f32 / 89.0;
        let y = 1.0 - 0.9 * t;
        system.world.set_kinematic_pose(
            hand_body,
            Vector3::new(0.0, y, 0.3 * t),
            UnitQuaternion::identity(),
        );
        system.fixed_tick(&input, DT);
    }

    // Close the grip.
    input.right.grab_active = true;
    input.right.hold_active = true;
    system.fixed_tick(&input, DT);
    println!(
        "holding: {}",
        system.grabber(hand).is_some_and(|g| g.held == Some(ball))
    );

    // Swing up and forward, then let go mid-swing.
    for i in 0..45 {
        let t = i as f32 / 44.0;
        system.world.set_kinematic_pose(
            hand_body,
            Vector3::new(0.0, 0.1 + 1.2 * t, 0.3 - 1.0 * t),
            UnitQuaternion::identity(),
        );
        system.fixed_tick(&input, DT);
    }
    input.right.grab_active = false;
    input.right.hold_active = false;
    system.fixed_tick(&input, DT);

    if let Some(v) = system.world.linvel(ball_body) {
        println!("released at {:.2} m/s", v.norm());
    }

    // Watch it fly.
    for _ in 0..90 {
        system.fixed_tick(&input, DT);
    }
    if let Some(pos) = system.world.position(ball_body) {
        println!("ball landed near ({:.2}, {:.2}, {:.2})", pos.x, pos.y, pos.z);
    }
}
