//! Fixed-tick phase ordering.
//!
//! Every phase runs exactly once per tick, in this order, for every tick.
//! Grabber state machines run in registration order; a grab observed by an
//! earlier grabber is visible to every later one in the same tick.

use super::{input::InputSnapshot, InteractionSystem};

pub(super) fn run_tick_phases(system: &mut InteractionSystem, input: &InputSnapshot, dt: f32) {
    // Query structures reflect poses written since the last step.
    system.world.refresh_queries();

    // Proximity: overlap sampling, bag membership, ranking, socket search.
    system.update_proximity();

    // Velocity history for throws and flick detection.
    system.track_velocities(dt);

    // Joint drives, convergence promotion, break checks.
    system.update_joints(dt);

    // Grabber state machines: release, unhover, grab, hover.
    system.run_grabbers(input, dt);

    // Resumable routines: force pulls, auto-grab windows, socket retries,
    // overlap clearance.
    system.advance_routines(input, dt);

    // Integrate the world with everything the tick wrote.
    system.world.step(dt);

    system.finish_tick(input);
}
