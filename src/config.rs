//! Interaction tuning parsed from interaction.toml files.
//!
//! Every field carries a working default, so embedders can construct
//! [`InteractionConfig::default()`] and never touch a file.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

fn toml_default<T: for<'de> Deserialize<'de>>() -> T {
    // An empty table exercises every serde default in one place.
    match toml::from_str("") {
        Ok(v) => v,
        Err(_) => unreachable!("section defaults are total"),
    }
}

/// Joint drive tuning for held bodies.
#[derive(Debug, Clone, Deserialize)]
pub struct JointConfig {
    /// Spring constant of the positional drive while pulling a fresh grab in.
    #[serde(default = "default_pulling_spring")]
    pub pulling_spring: f32,
    #[serde(default = "default_pulling_damper")]
    pub pulling_damper: f32,
    /// Positional drive once the grab has converged.
    #[serde(default = "default_spring")]
    pub spring: f32,
    #[serde(default = "default_damper")]
    pub damper: f32,
    /// Force cap of the positional drive, in newtons.
    #[serde(default = "default_max_force")]
    pub max_force: f32,
    /// Rotational slerp drive.
    #[serde(default = "default_slerp_spring")]
    pub slerp_spring: f32,
    #[serde(default = "default_slerp_damper")]
    pub slerp_damper: f32,
    #[serde(default = "default_slerp_max_force")]
    pub slerp_max_force: f32,
    /// Scales the drive's target velocity against remaining positional
    /// error. Higher values delay the correction.
    #[serde(default = "default_velocity_power")]
    pub velocity_power: f32,
    /// Angular error, in degrees, under which a monitored grab may be
    /// promoted to its terminal drive.
    #[serde(default = "default_final_joint_max_angle")]
    pub final_joint_max_angle: f32,
    /// Positional error, in meters, under which a monitored grab may be
    /// promoted.
    #[serde(default = "default_parenting_max_distance")]
    pub parenting_max_distance: f32,
    /// Seconds after which a still-converging grab is promoted anyway,
    /// when `final_joint_quick` is set.
    #[serde(default = "default_final_joint_timeout")]
    pub final_joint_timeout: f32,
    #[serde(default = "default_true")]
    pub final_joint_quick: bool,
}

fn default_pulling_spring() -> f32 {
    3000.0
}
fn default_pulling_damper() -> f32 {
    250.0
}
fn default_spring() -> f32 {
    3000.0
}
fn default_damper() -> f32 {
    1000.0
}
fn default_max_force() -> f32 {
    1000.0
}
fn default_slerp_spring() -> f32 {
    50_000.0
}
fn default_slerp_damper() -> f32 {
    1000.0
}
fn default_slerp_max_force() -> f32 {
    100.0
}
fn default_velocity_power() -> f32 {
    15.0
}
fn default_final_joint_max_angle() -> f32 {
    3.0
}
fn default_parenting_max_distance() -> f32 {
    0.01
}
fn default_final_joint_timeout() -> f32 {
    5.0
}
fn default_true() -> bool {
    true
}

impl Default for JointConfig {
    fn default() -> Self {
        toml_default()
    }
}

/// Throw velocity sampling and release tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct ThrowConfig {
    /// Number of recent samples averaged at release.
    #[serde(default = "default_lookback")]
    pub lookback: usize,
    /// Number of newest samples skipped before averaging.
    #[serde(default)]
    pub lookback_start: usize,
    /// Scale applied to the hand's averaged linear velocity.
    #[serde(default = "default_hand_velocity_factor")]
    pub hand_velocity_factor: f32,
    /// Scale applied to the candidate's own averaged linear velocity.
    #[serde(default)]
    pub candidate_velocity_factor: f32,
    /// Scale applied to the candidate's averaged angular velocity.
    #[serde(default = "default_one")]
    pub angular_factor: f32,
    /// Converts hand angular motion swept about the throw center into
    /// linear velocity. Applied only above `angular_threshold`.
    #[serde(default = "default_one")]
    pub angular_conversion_factor: f32,
    /// Hand angular speed, in radians per second, above which the angular
    /// contribution is added.
    #[serde(default = "default_one")]
    pub angular_threshold: f32,
}

fn default_lookback() -> usize {
    5
}
fn default_hand_velocity_factor() -> f32 {
    1.1
}
fn default_one() -> f32 {
    1.0
}

impl Default for ThrowConfig {
    fn default() -> Self {
        toml_default()
    }
}

/// Force pull tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct ForceGrabConfig {
    /// Nominal flight time of the pull, in seconds.
    #[serde(default = "default_force_time")]
    pub force_time: f32,
    /// Extra apex height above the higher endpoint at launch. Decays
    /// linearly to zero over the flight.
    #[serde(default = "default_y_offset")]
    pub y_offset: f32,
    /// Remaining distance under which the pull counts as arrived.
    #[serde(default = "default_arrival_distance")]
    pub arrival_distance: f32,
    /// Fraction of the nominal flight during which collisions are forgiven.
    #[serde(default = "default_collision_grace")]
    pub collision_grace: f32,
    /// Speed cap applied when a collision aborts the pull.
    #[serde(default = "default_post_collision_speed")]
    pub post_collision_speed: f32,
    /// Seconds the hand keeps trying to auto-grab after the arc ends.
    #[serde(default = "default_one")]
    pub auto_grab_time: f32,
    /// Speed cap while waiting for the auto grab; excess is damped.
    #[serde(default = "default_auto_grab_speed")]
    pub auto_grab_speed: f32,
    /// Per-tick velocity retention applied above `auto_grab_speed`.
    #[serde(default = "default_auto_grab_damping")]
    pub auto_grab_damping: f32,
    /// Fraction of the flight after which rotation starts tracking the hand.
    #[serde(default = "default_rotation_start")]
    pub rotation_start: f32,
    /// Hand rotation, in degrees, that re-baselines the in-flight target
    /// orientation.
    #[serde(default = "default_rebaseline_angle")]
    pub rebaseline_angle: f32,
    /// When true, the pull starts from a wrist flick instead of the button.
    #[serde(default)]
    pub requires_flick: bool,
    /// Hand angular speed, in radians per second, that counts as a flick.
    #[serde(default = "default_flick_threshold")]
    pub flick_threshold: f32,
    /// Seconds after the button press during which a flick is accepted.
    #[serde(default = "default_flick_window")]
    pub flick_window: f32,
    /// Range of the force hover volume, in meters.
    #[serde(default = "default_force_range")]
    pub range: f32,
}

fn default_force_time() -> f32 {
    1.0
}
fn default_y_offset() -> f32 {
    0.3
}
fn default_arrival_distance() -> f32 {
    0.1
}
fn default_collision_grace() -> f32 {
    0.3
}
fn default_post_collision_speed() -> f32 {
    5.0
}
fn default_auto_grab_speed() -> f32 {
    5.0
}
fn default_auto_grab_damping() -> f32 {
    0.9
}
fn default_rotation_start() -> f32 {
    0.3
}
fn default_rebaseline_angle() -> f32 {
    20.0
}
fn default_flick_threshold() -> f32 {
    3.0
}
fn default_flick_window() -> f32 {
    0.4
}
fn default_force_range() -> f32 {
    6.0
}

impl Default for ForceGrabConfig {
    fn default() -> Self {
        toml_default()
    }
}

/// Proximity index defaults applied to grabbers that do not override them.
#[derive(Debug, Clone, Deserialize)]
pub struct ProximityConfig {
    /// Overlap sphere radius of the hand grab volume.
    #[serde(default = "default_hand_radius")]
    pub hand_radius: f32,
    /// Candidates farther than this from the index center are evicted.
    #[serde(default = "default_max_distance")]
    pub max_distance: f32,
    /// Radius within which a hand notices sockets.
    #[serde(default = "default_socket_radius")]
    pub socket_search_radius: f32,
    /// Distance penalty added to held candidates so free ones sort first.
    #[serde(default = "default_held_penalty")]
    pub held_penalty: f32,
}

fn default_hand_radius() -> f32 {
    0.15
}
fn default_max_distance() -> f32 {
    1.5
}
fn default_socket_radius() -> f32 {
    0.25
}
fn default_held_penalty() -> f32 {
    1000.0
}

impl Default for ProximityConfig {
    fn default() -> Self {
        toml_default()
    }
}

/// Release bookkeeping shared by hand grabbers.
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseConfig {
    /// Seconds after which hand/candidate collision is re-enabled even if
    /// the released body never cleared the hand volume.
    #[serde(default = "default_overlap_timeout")]
    pub overlap_timeout: f32,
}

fn default_overlap_timeout() -> f32 {
    5.0
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        toml_default()
    }
}

/// Top-level interaction configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InteractionConfig {
    #[serde(default)]
    pub joint: JointConfig,
    #[serde(default)]
    pub throw: ThrowConfig,
    #[serde(default)]
    pub force: ForceGrabConfig,
    #[serde(default)]
    pub proximity: ProximityConfig,
    #[serde(default)]
    pub release: ReleaseConfig,
}

impl InteractionConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
    }
}

/// Errors that can occur when loading interaction configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("failed to parse {0}: {1}")]
    Parse(PathBuf, #[source] toml::de::Error),
}
