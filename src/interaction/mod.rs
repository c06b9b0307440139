//! Grab arbitration between hands, sockets, and force pullers.
//!
//! The [`InteractionSystem`] owns the spatial world, all registered
//! grabbers and candidates, the live joint attachments, and any resumable
//! routines. Everything advances from [`InteractionSystem::fixed_tick`];
//! there are no callbacks into the embedder other than the synchronous
//! event subscribers.

pub mod candidate;
pub mod events;
pub mod force_grab;
pub mod grabber;
pub mod input;
pub mod joint;
pub mod proximity;
pub mod throw;
mod tick_pipeline;

use log::{debug, warn};
use nalgebra::{UnitQuaternion, Vector3};
use std::collections::{HashMap, HashSet};

use crate::config::InteractionConfig;
use crate::world::{BodyId, SpatialWorld};

pub use candidate::{
    AnchorPoint, CandidateDesc, GrabCandidate, GrabTracking, HoldType, SavedBodyState,
};
pub use events::{BeforeGrabArgs, EventDispatch, InteractionEvent};
pub use grabber::{GrabTrigger, Grabber, GrabberDesc, GrabberKind};
pub use input::{HandInput, HandSide, InputSnapshot};
pub use joint::{JointAttachment, JointOutcome, JointOverride};
pub use proximity::{ProximityIndex, SortMode};
pub use throw::{ReleaseVelocities, VelocityTracker};

use force_grab::{
    AutoGrabRoutine, ForceGrabRoutine, ForceStep, OverlapClearRoutine, Routine,
    SocketRetryRoutine,
};
use grabber::select_anchor;
use throw::compute_release_velocities;

/// Stable identifier for a registered candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CandidateId(pub u64);

/// Stable identifier for a registered grabber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GrabberId(pub u64);

/// The grab arbitration core, advanced once per fixed tick.
pub struct InteractionSystem {
    pub world: SpatialWorld,
    pub config: InteractionConfig,
    pub events: EventDispatch,

    candidates: HashMap<CandidateId, GrabCandidate>,
    body_to_candidate: HashMap<BodyId, CandidateId>,
    grabbers: HashMap<GrabberId, Grabber>,
    /// Registration order; state machines run in this order every tick.
    grabber_order: Vec<GrabberId>,
    attachments: Vec<JointAttachment>,
    routines: Vec<Routine>,
    prev_input: InputSnapshot,
    next_candidate_id: u64,
    next_grabber_id: u64,
    tick: u64,
}

impl InteractionSystem {
    pub fn new(config: InteractionConfig) -> Self {
        Self {
            world: SpatialWorld::new(),
            config,
            events: EventDispatch::default(),
            candidates: HashMap::new(),
            body_to_candidate: HashMap::new(),
            grabbers: HashMap::new(),
            grabber_order: Vec::new(),
            attachments: Vec::new(),
            routines: Vec::new(),
            prev_input: InputSnapshot::default(),
            next_candidate_id: 1,
            next_grabber_id: 1,
            tick: 0,
        }
    }

    // ---- registration -----------------------------------------------------

    pub fn register_candidate(&mut self, desc: CandidateDesc) -> CandidateId {
        let id = CandidateId(self.next_candidate_id);
        self.next_candidate_id += 1;
        self.body_to_candidate.insert(desc.body, id);
        self.candidates.insert(id, GrabCandidate::new(desc));
        debug!("[interaction] candidate {:?} registered", id);
        id
    }

    pub fn register_grabber(&mut self, desc: GrabberDesc) -> GrabberId {
        let id = GrabberId(self.next_grabber_id);
        self.next_grabber_id += 1;

        let proximity = &self.config.proximity;
        let (radius, max_distance) = match desc.kind {
            GrabberKind::Force { .. } => (self.config.force.range, self.config.force.range),
            _ => (proximity.hand_radius, proximity.max_distance),
        };
        let radius = if desc.bag_radius > 0.0 { desc.bag_radius } else { radius };
        let max_distance = if desc.bag_max_distance > 0.0 {
            desc.bag_max_distance
        } else {
            max_distance
        };
        let mut bag = ProximityIndex::new(radius, max_distance);
        bag.held_penalty = proximity.held_penalty;

        self.grabbers.insert(id, Grabber::new(desc, vec![bag]));
        self.grabber_order.push(id);
        debug!("[interaction] grabber {:?} registered", id);
        id
    }

    /// Appends a secondary proximity index, scanned after earlier ones.
    pub fn add_bag(&mut self, grabber: GrabberId, radius: f32, max_distance: f32) {
        if let Some(g) = self.grabbers.get_mut(&grabber) {
            let mut bag = ProximityIndex::new(radius, max_distance);
            bag.held_penalty = self.config.proximity.held_penalty;
            g.bags.push(bag);
        }
    }

    /// Unregisters a candidate. All holders force-release first, routines
    /// referencing it are dropped, and its body leaves the world.
    pub fn unregister_candidate(&mut self, id: CandidateId) {
        let Some(candidate) = self.candidates.get(&id) else {
            warn!("[interaction] unregister of unknown candidate {:?}", id);
            return;
        };
        let body = candidate.body;
        let holders: Vec<GrabberId> = candidate.holders().to_vec();
        for holder in holders {
            self.release_candidate(holder, id, false);
        }

        self.routines.retain(|r| match r {
            Routine::ForceGrab(f) => f.candidate != id,
            Routine::AutoGrab(a) => a.candidate != id,
            Routine::SocketRetry(s) => s.candidate != id,
            Routine::OverlapClear(o) => o.candidate != id,
        });
        for grabber in self.grabbers.values_mut() {
            if grabber.hover == Some(id) {
                grabber.hover = None;
            }
            for bag in &mut grabber.bags {
                bag.evict(id);
            }
        }

        self.candidates.remove(&id);
        self.body_to_candidate.remove(&body);
        self.world.remove_body(body);
        self.events.emit(InteractionEvent::CandidateRemoved { candidate: id });
        debug!("[interaction] candidate {:?} removed", id);
    }

    /// Unregisters a grabber, releasing anything it holds. Its body stays
    /// in the world; the embedder owns grabber bodies.
    pub fn unregister_grabber(&mut self, id: GrabberId) {
        let Some(held) = self.grabbers.get(&id).map(|g| g.held) else {
            return;
        };
        if let Some(candidate) = held {
            self.release_candidate(id, candidate, false);
        }
        if let Some(hover) = self.grabbers.get(&id).and_then(|g| g.hover) {
            self.unhover(id, hover);
        }
        self.routines.retain(|r| match r {
            Routine::ForceGrab(f) => f.grabber != id && f.hand != id,
            Routine::AutoGrab(a) => a.hand != id,
            Routine::SocketRetry(s) => s.socket != id,
            Routine::OverlapClear(o) => o.hand != id,
        });
        for candidate in self.candidates.values_mut() {
            if candidate.socket_hoverer == Some(id) {
                candidate.socket_hoverer = None;
            }
        }
        self.grabbers.remove(&id);
        self.grabber_order.retain(|&g| g != id);
    }

    // ---- accessors --------------------------------------------------------

    pub fn candidate(&self, id: CandidateId) -> Option<&GrabCandidate> {
        self.candidates.get(&id)
    }

    pub fn candidate_mut(&mut self, id: CandidateId) -> Option<&mut GrabCandidate> {
        self.candidates.get_mut(&id)
    }

    pub fn grabber(&self, id: GrabberId) -> Option<&Grabber> {
        self.grabbers.get(&id)
    }

    pub fn grabber_mut(&mut self, id: GrabberId) -> Option<&mut Grabber> {
        self.grabbers.get_mut(&id)
    }

    pub fn attachment(&self, grabber: GrabberId, candidate: CandidateId) -> Option<&JointAttachment> {
        self.attachments
            .iter()
            .find(|a| a.grabber == grabber && a.candidate == candidate)
    }

    pub fn attachment_count(&self, candidate: CandidateId) -> usize {
        self.attachments.iter().filter(|a| a.candidate == candidate).count()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Temporarily weakens or strengthens a held candidate's joint drive.
    /// The override expires after `time` seconds or at release.
    pub fn override_joint(
        &mut self,
        candidate: CandidateId,
        time: f32,
        max_force: f32,
        slerp_max_force: f32,
        velocity_power: f32,
    ) {
        if let Some(c) = self.candidates.get_mut(&candidate) {
            c.joint_override = Some(JointOverride {
                time_left: time,
                max_force,
                slerp_max_force,
                velocity_power,
            });
        }
    }

    /// World-space grip point and rotation of a grabber.
    pub fn grabber_anchor(&self, id: GrabberId) -> Option<(Vector3<f32>, UnitQuaternion<f32>)> {
        let grabber = self.grabbers.get(&id)?;
        let pos = self.world.position(grabber.body)?;
        let rot = self.world.rotation(grabber.body)?;
        Some((pos + rot * grabber.anchor_local, rot))
    }

    // ---- tick -------------------------------------------------------------

    /// Advances the whole system by one fixed tick and steps the world.
    pub fn fixed_tick(&mut self, input: &InputSnapshot, dt: f32) {
        tick_pipeline::run_tick_phases(self, input, dt);
    }

    pub(super) fn update_proximity(&mut self) {
        // Candidates whose primary holder is a hand; socket hover rules
        // need this without re-borrowing the grabber map mid-update.
        let hand_primary: HashSet<CandidateId> = self
            .candidates
            .iter()
            .filter(|(_, c)| {
                c.primary_holder()
                    .and_then(|g| self.grabbers.get(&g))
                    .is_some_and(|g| g.is_hand())
            })
            .map(|(&id, _)| id)
            .collect();

        // Socket poses for hand/socket interplay, gathered up front.
        let sockets: Vec<(GrabberId, Vector3<f32>)> = self
            .grabber_order
            .iter()
            .filter_map(|&id| {
                let g = self.grabbers.get(&id)?;
                if !g.is_socket() {
                    return None;
                }
                let pos = self.world.position(g.body)?;
                let rot = self.world.rotation(g.body)?;
                Some((id, pos + rot * g.anchor_local))
            })
            .collect();

        let order = self.grabber_order.clone();
        for id in order {
            let Some((anchor, _)) = self.grabber_anchor(id) else {
                continue;
            };
            let Some(grabber) = self.grabbers.get(&id) else {
                continue;
            };
            let kind = grabber.kind;
            let body = grabber.body;
            let held = grabber.held;

            // Overlap sampling per bag, then membership/ranking update.
            let overlap_sets: Vec<HashSet<CandidateId>> = grabber
                .bags
                .iter()
                .map(|bag| {
                    self.world
                        .overlaps_sphere(body, anchor, bag.radius)
                        .into_iter()
                        .filter_map(|b| self.body_to_candidate.get(&b).copied())
                        .collect()
                })
                .collect();

            let candidates = &self.candidates;
            let world = &self.world;
            let hand_primary = &hand_primary;
            let Some(grabber) = self.grabbers.get_mut(&id) else {
                continue;
            };
            for (bag, overlapping) in grabber.bags.iter_mut().zip(overlap_sets.iter()) {
                let mode = bag.sort_mode;
                bag.update(
                    overlapping,
                    candidates,
                    |cid| {
                        let c = candidates.get(&cid)?;
                        match mode {
                            SortMode::Distance => {
                                Some((world.position(c.body)? - anchor).norm())
                            }
                            SortMode::SquaredDistance => {
                                Some((world.position(c.body)? - anchor).norm_squared())
                            }
                            SortMode::SurfaceDistance => {
                                world.surface_distance(c.body, anchor)
                            }
                        }
                    },
                    |cid, c| bag_valid(kind, held, cid, c, candidates, hand_primary),
                );
            }

            // Hands track the nearest socket for take-out grabs.
            if grabber.is_hand() {
                let search = self.config.proximity.socket_search_radius;
                grabber.hovered_socket = sockets
                    .iter()
                    .filter(|(_, pos)| (pos - anchor).norm() <= search)
                    .min_by(|(_, a), (_, b)| {
                        let da = (a - anchor).norm();
                        let db = (b - anchor).norm();
                        da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .map(|&(sid, _)| sid);
            }
        }
    }

    pub(super) fn track_velocities(&mut self, dt: f32) {
        let world = &self.world;
        for grabber in self.grabbers.values_mut() {
            if !grabber.is_socket() {
                grabber.tracker.track(world, grabber.body, dt);
            }
        }
        for candidate in self.candidates.values_mut() {
            candidate.tracker.track(world, candidate.body, dt);
            if candidate.seconds_since_released < f32::MAX {
                candidate.seconds_since_released += dt;
            }
        }
    }

    pub(super) fn update_joints(&mut self, dt: f32) {
        // Expire temporary drive overrides.
        for candidate in self.candidates.values_mut() {
            if let Some(o) = &mut candidate.joint_override {
                o.time_left -= dt;
                if o.time_left <= 0.0 {
                    candidate.joint_override = None;
                }
            }
        }

        let mut attachments = std::mem::take(&mut self.attachments);
        let mut broken: Vec<(GrabberId, CandidateId, JointOutcome)> = Vec::new();

        for att in &mut attachments {
            let Some((anchor, rotation)) = self.grabber_anchor(att.grabber) else {
                continue;
            };
            let Some(candidate) = self.candidates.get(&att.candidate) else {
                continue;
            };
            let outcome = joint::update_attachment(
                &mut self.world,
                att,
                anchor,
                rotation,
                candidate,
                &self.config.joint,
                dt,
            );
            if outcome != JointOutcome::Held {
                broken.push((att.grabber, att.candidate, outcome));
            }
        }

        self.attachments = attachments;
        for (grabber, candidate, outcome) in broken {
            debug!(
                "[interaction] joint {:?} -> {:?} broke: {:?}",
                grabber, candidate, outcome
            );
            self.release_candidate(grabber, candidate, false);
        }
    }

    pub(super) fn run_grabbers(&mut self, input: &InputSnapshot, dt: f32) {
        let order = self.grabber_order.clone();
        for id in order {
            let Some(kind) = self.grabbers.get(&id).map(|g| g.kind) else {
                continue;
            };
            match kind {
                GrabberKind::Hand { side } => {
                    self.hand_tick(id, input.hand(side), self.prev_input.hand(side));
                }
                GrabberKind::Socket => self.socket_tick(id),
                GrabberKind::Force { hand } => {
                    let side = self
                        .grabbers
                        .get(&hand)
                        .and_then(|g| g.hand_side())
                        .unwrap_or(HandSide::Left);
                    self.force_tick(id, hand, input.hand(side), self.prev_input.hand(side), dt);
                }
            }
        }
    }

    // ---- hand state machine ----------------------------------------------

    fn hand_tick(&mut self, id: GrabberId, now: HandInput, prev: HandInput) {
        // Toggle latch flips on grip press edges.
        if let Some(grabber) = self.grabbers.get_mut(&id) {
            if grabber.grab_trigger == GrabTrigger::Toggle
                && now.grab_active
                && !prev.grab_active
            {
                grabber.toggle_latched = !grabber.is_grabbing();
            }
        }

        // Trigger edges on the held candidate.
        if let Some(held) = self.grabbers.get(&id).and_then(|g| g.held) {
            if now.trigger_active && !prev.trigger_active {
                self.events.emit(InteractionEvent::Activated { grabber: id, candidate: held });
            } else if !now.trigger_active && prev.trigger_active {
                self.events.emit(InteractionEvent::Deactivated { grabber: id, candidate: held });
            }
        }

        // Socket take-out: grab the candidate out of a hovered socket.
        if self.grab_pressed(id, now, prev) && !self.is_grabbing(id) {
            let take = self.grabbers.get(&id).and_then(|g| g.hovered_socket).and_then(|sid| {
                let socket = self.grabbers.get(&sid)?;
                if socket.socket_can_remove {
                    socket.held.map(|c| (sid, c))
                } else {
                    None
                }
            });
            if let Some((_, candidate)) = take {
                self.try_grab(id, candidate, true);
            }
        }

        // Release check.
        if let Some(held) = self.grabbers.get(&id).and_then(|g| g.held) {
            if !self.hold_input_active(id, now) {
                self.release_candidate(id, held, true);
            }
        }

        // Unhover check.
        if let Some(hover) = self.grabbers.get(&id).and_then(|g| g.hover) {
            let closest = self.closest_hoverable(id);
            if !self.can_hover(id, hover) || closest != Some(hover) {
                self.unhover(id, hover);
            }
        }

        // Grab check: first fit across bags in order. Attempts happen on
        // the press, not while the grip stays closed, so two closed hands
        // never trade a swappable candidate back and forth.
        if self.grab_pressed(id, now, prev) && !self.is_grabbing(id) {
            let scan: Vec<CandidateId> = self
                .grabbers
                .get(&id)
                .map(|g| g.bags.iter().flat_map(|b| b.valid().iter().copied()).collect())
                .unwrap_or_default();
            for candidate in scan {
                if self.try_grab(id, candidate, false) {
                    break;
                }
            }
        }

        // Hover check.
        if self.grabbers.get(&id).is_some_and(|g| g.hover.is_none()) {
            if let Some(closest) = self.closest_hoverable(id) {
                self.hover(id, closest);
            }
        }
    }

    fn grab_pressed(&self, id: GrabberId, now: HandInput, prev: HandInput) -> bool {
        match self.grabbers.get(&id).map(|g| g.grab_trigger) {
            Some(GrabTrigger::Active) => now.grab_active && !prev.grab_active,
            Some(GrabTrigger::Toggle) => {
                self.grabbers.get(&id).is_some_and(|g| g.toggle_latched)
            }
            None => false,
        }
    }

    fn hold_input_active(&self, id: GrabberId, now: HandInput) -> bool {
        match self.grabbers.get(&id).map(|g| g.grab_trigger) {
            Some(GrabTrigger::Active) => now.hold_active,
            Some(GrabTrigger::Toggle) => {
                self.grabbers.get(&id).is_some_and(|g| g.toggle_latched)
            }
            None => false,
        }
    }

    fn is_grabbing(&self, id: GrabberId) -> bool {
        self.grabbers.get(&id).is_some_and(|g| g.is_grabbing())
    }

    /// First valid candidate across bags that passes the hover rules.
    fn closest_hoverable(&self, id: GrabberId) -> Option<CandidateId> {
        let grabber = self.grabbers.get(&id)?;
        grabber
            .bags
            .iter()
            .flat_map(|bag| bag.valid().iter().copied())
            .find(|&c| self.can_hover(id, c))
    }

    // ---- socket state machine --------------------------------------------

    fn socket_tick(&mut self, id: GrabberId) {
        // Sockets never self-release; their IsHoldActive is holding itself.

        // Unhover check.
        if let Some(hover) = self.grabbers.get(&id).and_then(|g| g.hover) {
            if !self.socket_can_hover(id, hover) {
                self.unhover(id, hover);
            }
        }

        // Grab check. Sockets that catch held candidates only grab through
        // the release retry path.
        let grabs_held_only = self
            .grabbers
            .get(&id)
            .is_some_and(|g| g.socket_grabs_held_only);
        if !grabs_held_only && !self.is_grabbing(id) {
            let closest = self
                .grabbers
                .get(&id)
                .and_then(|g| g.bags.iter().find_map(|b| b.valid().iter().copied().find(|&c| self.socket_can_grab(id, c))));
            if let Some(candidate) = closest {
                self.try_grab(id, candidate, false);
            }
        }

        // Hover check.
        if self.grabbers.get(&id).is_some_and(|g| g.hover.is_none() && !g.is_grabbing()) {
            let closest = self.grabbers.get(&id).and_then(|g| {
                g.bags
                    .iter()
                    .flat_map(|bag| bag.valid().iter().copied())
                    .find(|&c| self.socket_can_hover(id, c))
            });
            if let Some(candidate) = closest {
                self.hover(id, candidate);
                if let Some(c) = self.candidates.get_mut(&candidate) {
                    c.socket_hoverer = Some(id);
                }
            }
        }
    }

    fn socket_can_hover(&self, id: GrabberId, candidate: CandidateId) -> bool {
        let Some(grabber) = self.grabbers.get(&id) else { return false };
        let Some(c) = self.candidates.get(&candidate) else { return false };
        if !grabber.allow_hovering || grabber.is_grabbing() {
            return false;
        }
        if !c.grab_enabled || c.socketed_by.is_some() {
            return false;
        }
        if c.socket_hoverer.is_some_and(|s| s != id) {
            return false;
        }
        if !grabber.tracks_valid(candidate) {
            return false;
        }
        if grabber.socket_grabs_held_only {
            // Must be in a hand right now; the socket catches it at release.
            c.primary_holder()
                .and_then(|g| self.grabbers.get(&g))
                .is_some_and(|g| g.is_hand())
        } else {
            !c.is_held()
        }
    }

    fn socket_can_grab(&self, id: GrabberId, candidate: CandidateId) -> bool {
        let Some(grabber) = self.grabbers.get(&id) else { return false };
        let Some(c) = self.candidates.get(&candidate) else { return false };
        grabber.allow_grabbing
            && !grabber.is_grabbing()
            && c.grab_enabled
            && !c.is_held()
            && c.socketed_by.is_none()
    }

    // ---- force grabber state machine -------------------------------------

    fn force_tick(
        &mut self,
        id: GrabberId,
        hand: GrabberId,
        now: HandInput,
        prev: HandInput,
        dt: f32,
    ) {
        let pressed = now.force_grab_active && !prev.force_grab_active;

        // Flick detection: the button opens a window, a wrist snap inside
        // it starts the pull.
        let mut start = false;
        if self.config.force.requires_flick {
            if let Some(grabber) = self.grabbers.get_mut(&id) {
                if pressed {
                    grabber.flick_window_left = self.config.force.flick_window;
                    grabber.flick_armed = false;
                }
                if grabber.flick_window_left > 0.0 {
                    grabber.flick_window_left -= dt;
                    let speed = grabber
                        .tracker
                        .angular
                        .recent(0)
                        .map(|w| w.norm())
                        .unwrap_or(0.0);
                    if speed < self.config.force.flick_threshold {
                        grabber.flick_armed = true;
                    } else if grabber.flick_armed {
                        start = true;
                        grabber.flick_window_left = 0.0;
                    }
                }
            }
        } else {
            start = pressed;
        }

        // The routine owns release while a pull is active.
        if let Some(held) = self.grabbers.get(&id).and_then(|g| g.held) {
            if !self.grabbers.get(&id).is_some_and(|g| g.force_holding) {
                self.release_candidate(id, held, false);
            }
        }

        // Unhover check, with the aim lock: while the button is held and
        // the target is still free, the hover survives losing "closest".
        if let Some(hover) = self.grabbers.get(&id).and_then(|g| g.hover) {
            let locked = now.force_grab_active
                && !self.is_grabbing(hand)
                && self
                    .candidates
                    .get(&hover)
                    .is_some_and(|c| !c.is_held());
            let still_valid = self.force_can_hover(id, hand, hover);
            let closest = self.closest_force_hover(id, hand);
            if !still_valid || (!locked && closest != Some(hover)) {
                self.unhover(id, hover);
            }
        }

        // Grab check.
        if start && !self.is_grabbing(id) {
            if let Some(target) = self.grabbers.get(&id).and_then(|g| g.hover) {
                if self.force_can_grab(id, hand, target) {
                    self.start_force_grab(id, hand, target);
                }
            }
        }

        // Hover check.
        if self.grabbers.get(&id).is_some_and(|g| g.hover.is_none() && !g.is_grabbing()) {
            if let Some(closest) = self.closest_force_hover(id, hand) {
                self.hover(id, closest);
            }
        }
    }

    fn closest_force_hover(&self, id: GrabberId, hand: GrabberId) -> Option<CandidateId> {
        let grabber = self.grabbers.get(&id)?;
        grabber
            .bags
            .iter()
            .flat_map(|bag| bag.valid().iter().copied())
            .find(|&c| self.force_can_hover(id, hand, c))
    }

    fn force_can_hover(&self, id: GrabberId, hand: GrabberId, candidate: CandidateId) -> bool {
        let Some(grabber) = self.grabbers.get(&id) else { return false };
        let Some(c) = self.candidates.get(&candidate) else { return false };
        if !grabber.allow_hovering || !c.grab_enabled || !c.force_grabbable {
            return false;
        }
        if c.is_held() || c.socketed_by.is_some() {
            return false;
        }
        // Close-range candidates belong to the hand, not the pull.
        if let Some(hand_grabber) = self.grabbers.get(&hand) {
            if hand_grabber.is_grabbing() || hand_grabber.tracks_valid(candidate) {
                return false;
            }
        }
        if !grabber.tracks_valid(candidate) {
            return false;
        }
        self.line_of_sight_ok(id, candidate)
    }

    fn force_can_grab(&self, id: GrabberId, hand: GrabberId, candidate: CandidateId) -> bool {
        self.force_can_hover(id, hand, candidate)
            && self.grabbers.get(&id).is_some_and(|g| g.allow_grabbing && !g.is_grabbing())
    }

    fn start_force_grab(&mut self, id: GrabberId, hand: GrabberId, candidate: CandidateId) {
        if !self.grab_candidate(id, candidate) {
            return;
        }

        let grip_rotation = self
            .candidates
            .get(&candidate)
            .and_then(|c| {
                let pos = self.world.position(c.body)?;
                let rot = self.world.rotation(c.body)?;
                let (hand_anchor, hand_rot) = self.grabber_anchor(hand)?;
                let side = self.grabbers.get(&hand).and_then(|g| g.hand_side());
                select_anchor(&c.anchors, pos, rot, hand_anchor, hand_rot, side)
                    .map(|a| a.local_rotation)
            })
            .unwrap_or_else(UnitQuaternion::identity);

        if let Some(c) = self.candidates.get_mut(&candidate) {
            c.is_force_grabbed = true;
            let body = c.body;
            self.world.set_gravity_scale(body, 0.0);
            self.world.set_linear_damping(body, 0.0);
        }
        if let Some(g) = self.grabbers.get_mut(&id) {
            g.force_holding = true;
        }

        self.routines.push(Routine::ForceGrab(ForceGrabRoutine::new(
            id,
            hand,
            candidate,
            self.config.force.force_time,
            grip_rotation,
        )));
        debug!("[interaction] force pull {:?} -> {:?} started", candidate, hand);
    }

    // ---- grab/release pipelines -------------------------------------------

    /// Validity of a grab attempt by a hand. Forced grabs skip this.
    fn can_grab(&self, id: GrabberId, candidate: CandidateId) -> bool {
        let Some(grabber) = self.grabbers.get(&id) else { return false };
        let Some(c) = self.candidates.get(&candidate) else { return false };

        if !grabber.allow_grabbing || !c.grab_enabled {
            return false;
        }
        if grabber.held.is_some() {
            return false;
        }
        // Dependent candidates need their host held by a hand.
        if let Some(required) = c.requires_held {
            let ok = self
                .candidates
                .get(&required)
                .and_then(|r| r.primary_holder())
                .and_then(|g| self.grabbers.get(&g))
                .is_some_and(|g| g.is_hand());
            if !ok {
                return false;
            }
        }
        if let Some(primary) = c.primary_holder() {
            if primary == id {
                return false;
            }
            let Some(primary_grabber) = self.grabbers.get(&primary) else {
                return false;
            };
            // Socketed candidates come out through the socket path only.
            if primary_grabber.is_socket() {
                return false;
            }
            // A force-grabbed candidate always yields, as does a holder
            // that allows swap. Otherwise capacity rules apply.
            if !primary_grabber.allow_swap && !c.is_force_grabbed {
                match c.hold_type {
                    HoldType::OneHand => return false,
                    HoldType::TwoHanded if c.holder_count() >= 2 => return false,
                    _ => {}
                }
            }
        }
        self.line_of_sight_ok(id, candidate)
    }

    fn can_hover(&self, id: GrabberId, candidate: CandidateId) -> bool {
        let Some(grabber) = self.grabbers.get(&id) else { return false };
        let Some(c) = self.candidates.get(&candidate) else { return false };
        grabber.allow_hovering
            && !grabber.is_grabbing()
            && c.grab_enabled
            && !c.is_held()
            && grabber.tracks_valid(candidate)
            && self.line_of_sight_ok(id, candidate)
    }

    fn line_of_sight_ok(&self, id: GrabberId, candidate: CandidateId) -> bool {
        let Some(grabber) = self.grabbers.get(&id) else { return false };
        let Some(c) = self.candidates.get(&candidate) else { return false };
        if !c.require_line_of_sight {
            return true;
        }
        let (Some(pos), Some(rot)) = (
            self.world.position(grabber.body),
            self.world.rotation(grabber.body),
        ) else {
            return false;
        };
        let Some(target) = self.world.position(c.body) else {
            return false;
        };
        let origin = pos + rot * grabber.sight_local;
        self.world
            .has_line_of_sight(origin, target, Some(grabber.body), c.body)
    }

    /// Swap precedence, evaluated before a new grab attaches:
    /// force pulls always yield, then swap-permissive holders, then
    /// hand-to-hand swap on `AllowSwap` candidates.
    fn check_force_release(&mut self, new_grabber: GrabberId, candidate: CandidateId) {
        let Some(c) = self.candidates.get(&candidate) else { return };
        let Some(primary) = c.primary_holder() else { return };
        if primary == new_grabber {
            return;
        }
        let primary_swaps = self
            .grabbers
            .get(&primary)
            .is_some_and(|g| g.allow_swap);
        let hand_to_hand = c.hold_type == HoldType::AllowSwap
            && self.grabbers.get(&primary).is_some_and(|g| g.is_hand())
            && self.grabbers.get(&new_grabber).is_some_and(|g| g.is_hand());

        if c.is_force_grabbed || primary_swaps || hand_to_hand {
            self.release_candidate(primary, candidate, false);
        }
    }

    /// Attempts a grab through the full pipeline. `forced` skips validity,
    /// as with socket take-outs and scripted grabs.
    pub fn try_grab(&mut self, id: GrabberId, candidate: CandidateId, forced: bool) -> bool {
        if !forced && !self.can_grab(id, candidate) {
            return false;
        }
        if self.candidates.get(&candidate).is_some_and(|c| c.is_held_by(id)) {
            return false;
        }
        self.check_force_release(id, candidate);
        self.grab_candidate(id, candidate)
    }

    fn grab_candidate(&mut self, id: GrabberId, candidate: CandidateId) -> bool {
        let Some(c) = self.candidates.get_mut(&candidate) else {
            return false;
        };
        let body = c.body;

        // Save body state at first holder so the last release restores it.
        if c.saved.is_none() {
            let (Some(gravity_scale), Some(linear_damping)) = (
                self.world.gravity_scale(body),
                self.world.linear_damping(body),
            ) else {
                warn!("[interaction] grab of {:?} with missing body", candidate);
                return false;
            };
            c.saved = Some(SavedBodyState {
                gravity_scale,
                linear_damping,
                kinematic: self.world.is_kinematic(body),
            });
        }
        c.add_holder(id);

        // Subscribers may veto; roll back as if nothing happened.
        if self.events.check_before_grab(id, candidate) {
            if let Some(c) = self.candidates.get_mut(&candidate) {
                c.remove_holder(id);
                if !c.is_held() {
                    c.saved = None;
                }
            }
            return false;
        }

        // Leaving hover for the thing we now hold.
        if self.grabbers.get(&id).is_some_and(|g| g.hover == Some(candidate)) {
            self.unhover(id, candidate);
        }

        let kind = match self.grabbers.get_mut(&id) {
            Some(g) => {
                g.held = Some(candidate);
                if g.grab_trigger == GrabTrigger::Toggle {
                    g.toggle_latched = true;
                }
                g.kind
            }
            None => return false,
        };

        match kind {
            GrabberKind::Hand { side } => self.attach_hand(id, candidate, side),
            GrabberKind::Socket => self.attach_socket(id, candidate),
            GrabberKind::Force { .. } => {}
        }

        // A pending clearance wait is void once the hand holds it again.
        let hand_body = self.grabbers.get(&id).map(|g| g.body);
        self.routines.retain(|r| {
            !matches!(r, Routine::OverlapClear(o) if o.hand == id && o.candidate == candidate)
        });
        if let Some(hand_body) = hand_body {
            self.world.set_pair_ignored(hand_body, body, false);
        }

        self.events.emit(InteractionEvent::Grabbed { grabber: id, candidate });
        debug!("[interaction] {:?} grabbed {:?}", id, candidate);
        true
    }

    fn attach_hand(&mut self, id: GrabberId, candidate: CandidateId, side: HandSide) {
        let Some((hand_anchor, hand_rot)) = self.grabber_anchor(id) else {
            return;
        };
        let Some(c) = self.candidates.get(&candidate) else { return };
        if c.tracking == GrabTracking::Loose {
            return;
        }
        let body = c.body;
        let (Some(pos), Some(rot)) = (self.world.position(body), self.world.rotation(body)) else {
            return;
        };

        let selected = select_anchor(&c.anchors, pos, rot, hand_anchor, hand_rot, Some(side));
        let authored = !c.anchors.is_empty() && selected.is_some();
        let anchor = selected.unwrap_or_else(|| AnchorPoint::at(Vector3::zeros()));

        // Authored anchors snap the candidate into the grip pose; a bare
        // body, or one whose anchors all failed the side or angle cut,
        // keeps whatever orientation it was grabbed at.
        let target_rotation = if authored {
            anchor.local_rotation.inverse()
        } else {
            hand_rot.inverse() * rot
        };

        let rigid = c.tracking == GrabTracking::Rigid;
        self.world.set_kinematic(body, false);
        self.attachments.push(JointAttachment::new(
            id,
            candidate,
            anchor.local_position,
            target_rotation,
            rigid,
        ));
    }

    fn attach_socket(&mut self, id: GrabberId, candidate: CandidateId) {
        let Some((socket_anchor, socket_rot)) = self.grabber_anchor(id) else {
            return;
        };
        let Some(c) = self.candidates.get_mut(&candidate) else { return };
        let body = c.body;
        let anchor = c
            .anchors
            .first()
            .copied()
            .unwrap_or_else(|| AnchorPoint::at(Vector3::zeros()));
        c.socketed_by = Some(id);
        c.socket_hoverer = None;

        // Kinematic snap: anchor coincides with the socket anchor.
        let rotation = socket_rot * anchor.local_rotation.inverse();
        let position = socket_anchor - rotation * anchor.local_position;
        self.world.set_kinematic(body, true);
        self.world.set_linvel(body, Vector3::zeros());
        self.world.set_angvel(body, Vector3::zeros());
        self.world.teleport(body, position, rotation);

        if self.grabbers.get(&id).is_some_and(|g| g.hover == Some(candidate)) {
            self.unhover(id, candidate);
        }
    }

    /// Releases a hold. Joint cleanup always precedes holder removal, so a
    /// candidate is never reported unheld while still jointed.
    pub fn release_candidate(&mut self, id: GrabberId, candidate: CandidateId, throw: bool) {
        let grab_anchor_local = self
            .attachments
            .iter()
            .find(|a| a.grabber == id && a.candidate == candidate)
            .map(|a| a.anchor_local);
        self.attachments
            .retain(|a| !(a.grabber == id && a.candidate == candidate));

        let Some(c) = self.candidates.get_mut(&candidate) else { return };
        if !c.remove_holder(id) {
            return;
        }
        let body = c.body;
        if c.socketed_by == Some(id) {
            c.socketed_by = None;
        }
        let now_free = !c.is_held();
        let clearance = c.require_overlap_clearance;
        if now_free {
            c.is_force_grabbed = false;
            c.joint_override = None;
            c.seconds_since_released = 0.0;
            if let Some(saved) = c.saved.take() {
                self.world.set_kinematic(body, saved.kinematic);
                self.world.set_gravity_scale(body, saved.gravity_scale);
                self.world.set_linear_damping(body, saved.linear_damping);
            }
        }

        let (kind, hand_body) = match self.grabbers.get_mut(&id) {
            Some(g) => {
                g.held = None;
                g.toggle_latched = false;
                g.force_holding = false;
                (g.kind, g.body)
            }
            None => (GrabberKind::Socket, body),
        };

        if let GrabberKind::Hand { .. } = kind {
            if throw {
                self.apply_throw(id, candidate, grab_anchor_local);
            }
            if clearance && self.world.contains(body) {
                self.world.set_pair_ignored(hand_body, body, true);
                self.routines.push(Routine::OverlapClear(OverlapClearRoutine {
                    hand: id,
                    candidate,
                }));
            }
        }

        self.events.emit(InteractionEvent::Released { grabber: id, candidate });
        debug!("[interaction] {:?} released {:?}", id, candidate);

        // Dependents configured to drop with their host.
        let dependents: Vec<(GrabberId, CandidateId)> = self
            .candidates
            .iter()
            .filter(|(_, dep)| {
                dep.requires_held == Some(candidate) && dep.drop_on_required_released
            })
            .flat_map(|(&dep_id, dep)| dep.holders().iter().map(move |&h| (h, dep_id)))
            .collect();
        for (holder, dep) in dependents {
            self.release_candidate(holder, dep, false);
        }

        // A socket waiting on this candidate catches it next tick.
        if let Some(socket) = self.candidates.get(&candidate).and_then(|c| c.socket_hoverer) {
            if self.candidates.get(&candidate).is_some_and(|c| !c.is_held()) {
                self.routines.push(Routine::SocketRetry(SocketRetryRoutine {
                    socket,
                    candidate,
                    ticks_left: 1,
                }));
            }
        }
    }

    fn apply_throw(
        &mut self,
        id: GrabberId,
        candidate: CandidateId,
        grab_anchor_local: Option<Vector3<f32>>,
    ) {
        let Some((hand_anchor, hand_rot)) = self.grabber_anchor(id) else { return };
        let Some(grabber) = self.grabbers.get(&id) else { return };
        let Some(c) = self.candidates.get(&candidate) else { return };
        let body = c.body;

        let grab_point = grab_anchor_local
            .and_then(|local| joint::anchor_world(&self.world, body, local))
            .or_else(|| self.world.position(body));
        let Some(grab_point) = grab_point else { return };

        // The angular sweep is measured about the configured throw center
        // of mass, not the grip anchor.
        let throw_center = match self.world.position(grabber.body) {
            Some(hand_pos) => hand_pos + hand_rot * grabber.throw_center_local,
            None => hand_anchor,
        };

        let out = compute_release_velocities(
            &grabber.tracker,
            &c.tracker,
            grab_point,
            throw_center,
            c.released_angular_conversion_factor,
            &self.config.throw,
        );
        self.world.set_linvel(body, out.linear * c.released_velocity_factor);
        self.world.set_angvel(body, out.angular * c.released_angular_factor);
    }

    fn hover(&mut self, id: GrabberId, candidate: CandidateId) {
        if let Some(g) = self.grabbers.get_mut(&id) {
            g.hover = Some(candidate);
        }
        self.events.emit(InteractionEvent::HoverEnter { grabber: id, candidate });
    }

    fn unhover(&mut self, id: GrabberId, candidate: CandidateId) {
        if let Some(g) = self.grabbers.get_mut(&id) {
            if g.hover != Some(candidate) {
                return;
            }
            g.hover = None;
        } else {
            return;
        }
        if let Some(c) = self.candidates.get_mut(&candidate) {
            if c.socket_hoverer == Some(id) {
                c.socket_hoverer = None;
            }
        }
        self.events.emit(InteractionEvent::HoverExit { grabber: id, candidate });
    }

    // ---- routines ---------------------------------------------------------

    pub(super) fn advance_routines(&mut self, input: &InputSnapshot, dt: f32) {
        let active = std::mem::take(&mut self.routines);
        let mut keep = Vec::with_capacity(active.len());
        for mut routine in active {
            if self.advance_routine(&mut routine, input, dt) {
                keep.push(routine);
            }
        }
        // Routines spawned while advancing land in self.routines.
        keep.append(&mut self.routines);
        self.routines = keep;
    }

    /// Returns true while the routine should keep running.
    fn advance_routine(&mut self, routine: &mut Routine, input: &InputSnapshot, dt: f32) -> bool {
        match routine {
            Routine::ForceGrab(f) => self.advance_force_grab(f, dt),
            Routine::AutoGrab(a) => self.advance_auto_grab(a, input, dt),
            Routine::SocketRetry(s) => {
                if s.ticks_left > 0 {
                    s.ticks_left -= 1;
                    return true;
                }
                // The socket unhovers the moment the hand lets go, so the
                // retry checks bag tracking rather than hover.
                let valid = self.socket_can_grab(s.socket, s.candidate)
                    && self
                        .grabbers
                        .get(&s.socket)
                        .is_some_and(|g| g.tracks_valid(s.candidate));
                if valid {
                    self.try_grab(s.socket, s.candidate, false);
                }
                false
            }
            Routine::OverlapClear(o) => self.advance_overlap_clear(o),
        }
    }

    fn advance_force_grab(&mut self, f: &mut ForceGrabRoutine, dt: f32) -> bool {
        let id = f.grabber;
        let candidate = f.candidate;

        // Validity re-check before doing anything with stale ids.
        let still_holding = self
            .grabbers
            .get(&id)
            .is_some_and(|g| g.held == Some(candidate) && g.force_holding);
        let Some(body) = self.candidates.get(&candidate).map(|c| c.body) else {
            return false;
        };
        if !still_holding {
            return false;
        }
        let Some((hand_anchor, hand_rot)) = self.grabber_anchor(f.hand) else {
            self.release_candidate(id, candidate, false);
            return false;
        };

        let exclude: Vec<BodyId> = [
            self.grabbers.get(&f.hand).map(|g| g.body),
            self.grabbers.get(&id).map(|g| g.body),
        ]
        .into_iter()
        .flatten()
        .collect();

        let step = f.advance(
            &mut self.world,
            hand_anchor,
            hand_rot,
            body,
            &exclude,
            &self.config.force,
            dt,
        );
        match step {
            ForceStep::Flying => true,
            ForceStep::Arrived => {
                self.routines.push(Routine::AutoGrab(AutoGrabRoutine::new(f.hand, candidate)));
                debug!("[interaction] force pull {:?} arrived", candidate);
                false
            }
            ForceStep::Aborted => {
                debug!("[interaction] force pull {:?} aborted", candidate);
                self.release_candidate(id, candidate, false);
                false
            }
        }
    }

    fn advance_auto_grab(&mut self, a: &mut AutoGrabRoutine, input: &InputSnapshot, dt: f32) -> bool {
        a.elapsed += dt;
        let Some(c) = self.candidates.get(&a.candidate) else {
            return false;
        };
        // Hand already has it; nothing left to do.
        if c.primary_holder()
            .and_then(|g| self.grabbers.get(&g))
            .is_some_and(|g| g.is_hand())
        {
            return false;
        }
        let body = c.body;

        if a.elapsed > self.config.force.auto_grab_time {
            self.finish_force_hold(a.candidate);
            return false;
        }

        if let Some((anchor, _)) = self.grabber_anchor(a.hand) {
            AutoGrabRoutine::damp_speed(&mut self.world, body, anchor, &self.config.force, dt);
        }

        // Grab once it drifts into the hand's reach with the grip down.
        let side = self.grabbers.get(&a.hand).and_then(|g| g.hand_side());
        let gripping = side.is_some_and(|s| {
            let hand_input = input.hand(s);
            self.hold_input_active(a.hand, hand_input) || hand_input.grab_active
        });
        let in_reach = self
            .grabbers
            .get(&a.hand)
            .is_some_and(|g| g.tracks_valid(a.candidate));
        if gripping && in_reach && self.try_grab(a.hand, a.candidate, false) {
            if let Some(g) = self.grabbers.get_mut(&a.hand) {
                if g.grab_trigger == GrabTrigger::Toggle {
                    g.toggle_latched = true;
                }
            }
            return false;
        }
        true
    }

    /// Ends an expired force hold: the force grabber lets go and the body
    /// gets its gravity back through the regular release path.
    fn finish_force_hold(&mut self, candidate: CandidateId) {
        let force_holder = self
            .candidates
            .get(&candidate)
            .map(|c| c.holders().to_vec())
            .unwrap_or_default()
            .into_iter()
            .find(|g| self.grabbers.get(g).is_some_and(|g| g.is_force()));
        if let Some(holder) = force_holder {
            self.release_candidate(holder, candidate, false);
        }
    }

    fn advance_overlap_clear(&mut self, o: &mut OverlapClearRoutine) -> bool {
        let hand = self.grabbers.get(&o.hand);
        let candidate = self.candidates.get(&o.candidate);
        let (Some(hand), Some(candidate)) = (hand, candidate) else {
            return false;
        };
        let hand_body = hand.body;
        let body = candidate.body;
        let since_released = candidate.seconds_since_released;
        let clear_radius = hand.bags.first().map(|b| b.radius).unwrap_or(0.15) + 0.05;

        let cleared = match (self.grabber_anchor(o.hand), self.world.position(body)) {
            (Some((anchor, _)), Some(pos)) => (pos - anchor).norm() > clear_radius,
            _ => true,
        };
        if cleared || since_released > self.config.release.overlap_timeout {
            self.world.set_pair_ignored(hand_body, body, false);
            return false;
        }
        true
    }

    pub(super) fn finish_tick(&mut self, input: &InputSnapshot) {
        self.prev_input = *input;
        self.tick += 1;
    }
}

/// Per-kind validity applied while ranking a bag.
///
/// Hands keep held candidates tracked but penalized; sockets and force
/// grabbers filter on their own rules later, so the bag only applies the
/// rules that affect ranking stability.
fn bag_valid(
    kind: GrabberKind,
    held: Option<CandidateId>,
    id: CandidateId,
    c: &GrabCandidate,
    candidates: &HashMap<CandidateId, GrabCandidate>,
    hand_primary: &HashSet<CandidateId>,
) -> bool {
    if !c.grab_enabled {
        return false;
    }
    if held == Some(id) {
        return false;
    }
    if let Some(required) = c.requires_held {
        if !hand_primary.contains(&required) {
            return false;
        }
        if !candidates.contains_key(&required) {
            return false;
        }
    }
    match kind {
        GrabberKind::Hand { .. } => true,
        GrabberKind::Socket => c.socketed_by.is_none(),
        GrabberKind::Force { .. } => c.force_grabbable,
    }
}
