//! Clasp grab interaction library
//!
//! Deterministic grab arbitration, joint-style manipulation drives, throw
//! velocity estimation, and force-pull flight over a rapier3d world. The
//! embedder feeds [`interaction::InteractionSystem::fixed_tick`] input
//! snapshots at a fixed rate and reacts to the events it emits.

pub mod config;
pub mod interaction;
pub mod math;
pub mod world;
