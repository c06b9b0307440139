//! Grab candidates: the bodies that hands, sockets, and force pulls
//! compete over.

use nalgebra::{UnitQuaternion, Vector3};

use super::input::HandSide;
use super::joint::JointOverride;
use super::throw::VelocityTracker;
use super::{CandidateId, GrabberId};
use crate::world::BodyId;

/// How many holders a candidate admits, and whether holders can be
/// displaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HoldType {
    /// A single holder; further grab attempts fail.
    #[default]
    OneHand,
    /// At most two holders.
    TwoHanded,
    /// A single effective holder, but a new hand displaces the old one.
    AllowSwap,
    /// Unbounded holders.
    ManyHands,
}

impl HoldType {
    /// Maximum holder count, if bounded.
    pub fn capacity(self) -> Option<usize> {
        match self {
            HoldType::OneHand => Some(1),
            HoldType::TwoHanded => Some(2),
            HoldType::AllowSwap | HoldType::ManyHands => None,
        }
    }
}

/// How a held candidate follows its holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GrabTracking {
    /// Spring-damper drive toward the hand anchor, promoted to a rigid
    /// follow once converged.
    #[default]
    Spring,
    /// Rigid follow from the first tick.
    Rigid,
    /// No physical coupling. Climbable bars and levers use this.
    Loose,
}

/// Authored grip point on a candidate, in candidate-local space.
#[derive(Debug, Clone, Copy)]
pub struct AnchorPoint {
    pub local_position: Vector3<f32>,
    pub local_rotation: UnitQuaternion<f32>,
    /// Restricts the anchor to one hand, when set.
    pub side: Option<HandSide>,
    /// Maximum hand misalignment in degrees before this anchor is skipped
    /// during selection, when set.
    pub allowed_angle_deg: Option<f32>,
}

impl AnchorPoint {
    pub fn at(local_position: Vector3<f32>) -> Self {
        Self {
            local_position,
            local_rotation: UnitQuaternion::identity(),
            side: None,
            allowed_angle_deg: None,
        }
    }
}

/// Body state captured at first grab and restored at last release, so a
/// candidate never stays modified with no owner.
#[derive(Debug, Clone, Copy)]
pub struct SavedBodyState {
    pub gravity_scale: f32,
    pub linear_damping: f32,
    pub kinematic: bool,
}

/// Registration-time description of a candidate.
#[derive(Debug, Clone)]
pub struct CandidateDesc {
    pub body: BodyId,
    pub hold_type: HoldType,
    pub tracking: GrabTracking,
    pub anchors: Vec<AnchorPoint>,
    pub force_grabbable: bool,
    pub require_line_of_sight: bool,
    /// Joint snap distance after which the hold breaks, if set.
    pub break_distance: Option<f32>,
    /// Drive force after which the hold breaks, if set.
    pub break_force: Option<f32>,
    /// This candidate is only grabbable while the named candidate is held
    /// by a hand. Magazines in a held weapon use this.
    pub requires_held: Option<CandidateId>,
    /// Force-release this candidate when its required candidate is
    /// released.
    pub drop_on_required_released: bool,
    /// Hold hand/candidate collision off after release until the body has
    /// cleared the hand volume.
    pub require_overlap_clearance: bool,
    /// Per-candidate scale on the thrown linear velocity.
    pub released_velocity_factor: f32,
    /// Per-candidate scale on the thrown angular velocity.
    pub released_angular_factor: f32,
    /// Per-candidate scale on the angular-to-linear sweep term.
    pub released_angular_conversion_factor: f32,
}

impl CandidateDesc {
    pub fn new(body: BodyId) -> Self {
        Self {
            body,
            hold_type: HoldType::default(),
            tracking: GrabTracking::default(),
            anchors: Vec::new(),
            force_grabbable: false,
            require_line_of_sight: true,
            break_distance: None,
            break_force: None,
            requires_held: None,
            drop_on_required_released: false,
            require_overlap_clearance: true,
            released_velocity_factor: 1.0,
            released_angular_factor: 1.0,
            released_angular_conversion_factor: 1.0,
        }
    }

    pub fn hold_type(mut self, hold_type: HoldType) -> Self {
        self.hold_type = hold_type;
        self
    }

    pub fn tracking(mut self, tracking: GrabTracking) -> Self {
        self.tracking = tracking;
        self
    }

    pub fn anchor(mut self, anchor: AnchorPoint) -> Self {
        self.anchors.push(anchor);
        self
    }

    pub fn force_grabbable(mut self, yes: bool) -> Self {
        self.force_grabbable = yes;
        self
    }

    pub fn require_line_of_sight(mut self, yes: bool) -> Self {
        self.require_line_of_sight = yes;
        self
    }
}

/// A registered candidate plus its live hold state.
#[derive(Debug)]
pub struct GrabCandidate {
    pub body: BodyId,
    pub hold_type: HoldType,
    pub tracking: GrabTracking,
    pub anchors: Vec<AnchorPoint>,
    /// Cleared to make a candidate temporarily ungrabbable without
    /// unregistering it.
    pub grab_enabled: bool,
    pub force_grabbable: bool,
    pub require_line_of_sight: bool,
    pub break_distance: Option<f32>,
    pub break_force: Option<f32>,
    pub requires_held: Option<CandidateId>,
    pub drop_on_required_released: bool,
    pub require_overlap_clearance: bool,
    pub released_velocity_factor: f32,
    pub released_angular_factor: f32,
    pub released_angular_conversion_factor: f32,

    /// Holders in insertion order; the first is the primary.
    holders: Vec<GrabberId>,
    pub is_force_grabbed: bool,
    /// Set while a socket holds this candidate.
    pub socketed_by: Option<GrabberId>,
    /// Socket currently waiting to catch this candidate on release.
    pub socket_hoverer: Option<GrabberId>,
    pub saved: Option<SavedBodyState>,
    /// Temporary drive override, counted down by the system while held.
    pub joint_override: Option<JointOverride>,
    pub tracker: VelocityTracker,
    pub seconds_since_released: f32,
}

impl GrabCandidate {
    pub fn new(desc: CandidateDesc) -> Self {
        Self {
            body: desc.body,
            hold_type: desc.hold_type,
            tracking: desc.tracking,
            anchors: desc.anchors,
            grab_enabled: true,
            force_grabbable: desc.force_grabbable,
            require_line_of_sight: desc.require_line_of_sight,
            break_distance: desc.break_distance,
            break_force: desc.break_force,
            requires_held: desc.requires_held,
            drop_on_required_released: desc.drop_on_required_released,
            require_overlap_clearance: desc.require_overlap_clearance,
            released_velocity_factor: desc.released_velocity_factor,
            released_angular_factor: desc.released_angular_factor,
            released_angular_conversion_factor: desc.released_angular_conversion_factor,
            holders: Vec::new(),
            is_force_grabbed: false,
            socketed_by: None,
            socket_hoverer: None,
            saved: None,
            joint_override: None,
            tracker: VelocityTracker::new(),
            seconds_since_released: f32::MAX,
        }
    }

    pub fn holders(&self) -> &[GrabberId] {
        &self.holders
    }

    pub fn holder_count(&self) -> usize {
        self.holders.len()
    }

    pub fn is_held(&self) -> bool {
        !self.holders.is_empty()
    }

    pub fn is_held_by(&self, grabber: GrabberId) -> bool {
        self.holders.contains(&grabber)
    }

    /// First holder by insertion order.
    pub fn primary_holder(&self) -> Option<GrabberId> {
        self.holders.first().copied()
    }

    /// Appends a holder. Idempotent for a grabber already holding.
    pub fn add_holder(&mut self, grabber: GrabberId) {
        if !self.holders.contains(&grabber) {
            self.holders.push(grabber);
        }
    }

    /// Removes a holder. When the primary leaves, the next holder by
    /// insertion order is promoted implicitly.
    pub fn remove_holder(&mut self, grabber: GrabberId) -> bool {
        let before = self.holders.len();
        self.holders.retain(|&g| g != grabber);
        self.holders.len() != before
    }

    /// Whether another hand may still join this hold.
    pub fn has_hand_capacity(&self) -> bool {
        match self.hold_type.capacity() {
            Some(cap) => self.holders.len() < cap,
            None => true,
        }
    }
}
