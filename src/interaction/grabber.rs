//! Grabbers: hands, sockets, and force pullers.
//!
//! A grabber owns its hover/held state and its proximity indices; all
//! arbitration between grabbers lives in the system, which advances each
//! grabber's state machine in registration order every tick.

use nalgebra::{UnitQuaternion, Vector3};

use super::candidate::{AnchorPoint, GrabCandidate};
use super::input::HandSide;
use super::proximity::ProximityIndex;
use super::throw::VelocityTracker;
use super::{CandidateId, GrabberId};
use crate::world::BodyId;

/// Degrees of anchor misalignment worth one meter of distance when
/// scoring grip points. Distance dominates; rotation breaks ties.
const ANCHOR_ROTATION_WEIGHT: f32 = 1.0 / 360.0;

/// How a hand's grip maps to holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GrabTrigger {
    /// Hold lasts while the grip is squeezed.
    #[default]
    Active,
    /// Grip press toggles the hold on and off.
    Toggle,
}

/// What kind of grabber this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabberKind {
    Hand { side: HandSide },
    /// Holster/mount. Grabs only released candidates, holds kinematically.
    Socket,
    /// Long-range puller that flies candidates to its hand.
    Force { hand: GrabberId },
}

/// Registration-time description of a grabber.
#[derive(Debug, Clone)]
pub struct GrabberDesc {
    pub body: BodyId,
    pub kind: GrabberKind,
    /// Grip point in grabber-local space.
    pub anchor_local: Vector3<f32>,
    /// Line-of-sight origin in grabber-local space.
    pub sight_local: Vector3<f32>,
    /// Center of mass the throw's angular sweep is measured about, in
    /// grabber-local space. Roughly the wrist, not the grip point.
    pub throw_center_local: Vector3<f32>,
    pub grab_trigger: GrabTrigger,
    /// Holders with this set can be displaced by any grab attempt.
    /// Defaults on for sockets.
    pub allow_swap: bool,
    /// Socket only: requires the candidate to be hand-held nearby before
    /// it will hover, and catches it on release.
    pub socket_grabs_held_only: bool,
    /// Socket only: hands may pull the held candidate back out.
    pub socket_can_remove: bool,
    /// Overlap radius overrides; zero means use configured defaults.
    pub bag_radius: f32,
    pub bag_max_distance: f32,
}

impl GrabberDesc {
    pub fn hand(body: BodyId, side: HandSide) -> Self {
        Self {
            body,
            kind: GrabberKind::Hand { side },
            anchor_local: Vector3::zeros(),
            sight_local: Vector3::zeros(),
            throw_center_local: Vector3::zeros(),
            grab_trigger: GrabTrigger::default(),
            allow_swap: false,
            socket_grabs_held_only: false,
            socket_can_remove: true,
            bag_radius: 0.0,
            bag_max_distance: 0.0,
        }
    }

    pub fn socket(body: BodyId) -> Self {
        Self {
            allow_swap: true,
            socket_grabs_held_only: true,
            ..Self::hand(body, HandSide::Left)
        }
        .kind(GrabberKind::Socket)
    }

    pub fn force(body: BodyId, hand: GrabberId) -> Self {
        Self::hand(body, HandSide::Left).kind(GrabberKind::Force { hand })
    }

    fn kind(mut self, kind: GrabberKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn anchor(mut self, local: Vector3<f32>) -> Self {
        self.anchor_local = local;
        self
    }

    pub fn throw_center(mut self, local: Vector3<f32>) -> Self {
        self.throw_center_local = local;
        self
    }

    pub fn grab_trigger(mut self, trigger: GrabTrigger) -> Self {
        self.grab_trigger = trigger;
        self
    }

    pub fn bag(mut self, radius: f32, max_distance: f32) -> Self {
        self.bag_radius = radius;
        self.bag_max_distance = max_distance;
        self
    }
}

/// A registered grabber plus its live state.
#[derive(Debug)]
pub struct Grabber {
    pub body: BodyId,
    pub kind: GrabberKind,
    pub anchor_local: Vector3<f32>,
    pub sight_local: Vector3<f32>,
    pub throw_center_local: Vector3<f32>,
    pub grab_trigger: GrabTrigger,
    pub allow_swap: bool,
    pub allow_grabbing: bool,
    pub allow_hovering: bool,
    pub socket_grabs_held_only: bool,
    pub socket_can_remove: bool,

    /// Proximity indices scanned in order at grab time.
    pub bags: Vec<ProximityIndex>,
    pub hover: Option<CandidateId>,
    pub held: Option<CandidateId>,
    /// Latch for `GrabTrigger::Toggle`.
    pub toggle_latched: bool,
    /// Socket a hand is currently hovering, if any.
    pub hovered_socket: Option<GrabberId>,
    /// Force grabbers hold through their routine, not through input.
    pub force_holding: bool,
    /// Seconds left in the flick acceptance window.
    pub flick_window_left: f32,
    /// A flick must start from below the threshold.
    pub flick_armed: bool,
    pub tracker: VelocityTracker,
}

impl Grabber {
    pub fn new(desc: GrabberDesc, bags: Vec<ProximityIndex>) -> Self {
        Self {
            body: desc.body,
            kind: desc.kind,
            anchor_local: desc.anchor_local,
            sight_local: desc.sight_local,
            throw_center_local: desc.throw_center_local,
            grab_trigger: desc.grab_trigger,
            allow_swap: desc.allow_swap,
            allow_grabbing: true,
            allow_hovering: true,
            socket_grabs_held_only: desc.socket_grabs_held_only,
            socket_can_remove: desc.socket_can_remove,
            bags,
            hover: None,
            held: None,
            toggle_latched: false,
            hovered_socket: None,
            force_holding: false,
            flick_window_left: 0.0,
            flick_armed: false,
            tracker: VelocityTracker::new(),
        }
    }

    pub fn is_hand(&self) -> bool {
        matches!(self.kind, GrabberKind::Hand { .. })
    }

    pub fn is_socket(&self) -> bool {
        self.kind == GrabberKind::Socket
    }

    pub fn is_force(&self) -> bool {
        matches!(self.kind, GrabberKind::Force { .. })
    }

    pub fn hand_side(&self) -> Option<HandSide> {
        match self.kind {
            GrabberKind::Hand { side } => Some(side),
            _ => None,
        }
    }

    pub fn is_grabbing(&self) -> bool {
        self.held.is_some()
    }

    /// First valid candidate across bags, scanned in bag order.
    pub fn closest_valid(&self) -> Option<CandidateId> {
        self.bags.iter().find_map(|bag| bag.closest())
    }

    /// Whether any bag ranks this candidate as valid.
    pub fn tracks_valid(&self, id: CandidateId) -> bool {
        self.bags.iter().any(|bag| bag.valid().contains(&id))
    }
}

/// Picks the best grip point on a candidate for a hand at the given pose.
///
/// Side-restricted anchors only match their hand. Score is hand distance
/// plus a small rotational misalignment term; lowest wins, earlier
/// authored anchors break exact ties. Returns `None` when every anchor is
/// side-restricted to the other hand; an anchorless candidate grips at its
/// body origin via the implicit default.
pub fn select_anchor(
    anchors: &[AnchorPoint],
    candidate_position: Vector3<f32>,
    candidate_rotation: UnitQuaternion<f32>,
    hand_anchor: Vector3<f32>,
    hand_rotation: UnitQuaternion<f32>,
    side: Option<HandSide>,
) -> Option<AnchorPoint> {
    if anchors.is_empty() {
        return Some(AnchorPoint::at(Vector3::zeros()));
    }

    let mut best: Option<(f32, AnchorPoint)> = None;
    for anchor in anchors {
        if let (Some(restricted), Some(hand)) = (anchor.side, side) {
            if restricted != hand {
                continue;
            }
        }
        let world_pos = candidate_position + candidate_rotation * anchor.local_position;
        let world_rot = candidate_rotation * anchor.local_rotation;
        let distance = (world_pos - hand_anchor).norm();
        let angle = hand_rotation.angle_to(&world_rot).to_degrees();
        if anchor.allowed_angle_deg.is_some_and(|max| angle > max) {
            continue;
        }
        let score = distance + angle * ANCHOR_ROTATION_WEIGHT;
        if best.as_ref().is_none_or(|(s, _)| score < *s) {
            best = Some((score, *anchor));
        }
    }
    best.map(|(_, anchor)| anchor)
}
