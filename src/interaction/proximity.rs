//! Proximity index: the set of candidates a grabber could act on,
//! refreshed once per fixed tick from overlap begin/end transitions.

use std::collections::{HashMap, HashSet};

use super::candidate::GrabCandidate;
use super::CandidateId;

/// Metric used to rank tracked candidates. The owner computes the metric
/// when it feeds the index, so surface distance can reach into the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortMode {
    /// Distance between bag center and candidate body origin.
    #[default]
    Distance,
    /// Squared center distance. Same ordering, cheaper to compute.
    SquaredDistance,
    /// Distance from bag center to the nearest point on the candidate's
    /// collider, zero when the center is inside it.
    SurfaceDistance,
}

/// Membership and ranking of candidates near one grabber.
///
/// Candidates enter on overlap begin and leave on overlap end, eviction by
/// distance, invalidation, or destruction. Removal is two-phase: members
/// are marked during the scan and dropped afterwards, so the scan never
/// mutates what it iterates. Ranking is a stable ascending sort by
/// distance, so insertion order breaks ties deterministically.
#[derive(Debug)]
pub struct ProximityIndex {
    /// Overlap sphere radius used by the owner when sampling.
    pub radius: f32,
    /// Members farther than this from the index center are evicted even
    /// while still overlapping.
    pub max_distance: f32,
    /// Add `held_penalty` to the distance of held members so free
    /// candidates rank first.
    pub penalize_held: bool,
    pub held_penalty: f32,
    pub sort_mode: SortMode,

    /// Members in insertion order.
    tracked: Vec<CandidateId>,
    tracked_set: HashSet<CandidateId>,
    distances: HashMap<CandidateId, f32>,
    /// Valid members, sorted closest first. Rebuilt every update.
    valid: Vec<CandidateId>,
    marked: Vec<CandidateId>,
}

impl ProximityIndex {
    pub fn new(radius: f32, max_distance: f32) -> Self {
        Self {
            radius,
            max_distance,
            penalize_held: true,
            held_penalty: 1000.0,
            sort_mode: SortMode::default(),
            tracked: Vec::new(),
            tracked_set: HashSet::new(),
            distances: HashMap::new(),
            valid: Vec::new(),
            marked: Vec::new(),
        }
    }

    pub fn is_tracked(&self, id: CandidateId) -> bool {
        self.tracked_set.contains(&id)
    }

    pub fn tracked(&self) -> &[CandidateId] {
        &self.tracked
    }

    /// Valid members, closest first.
    pub fn valid(&self) -> &[CandidateId] {
        &self.valid
    }

    /// Closest valid member, if any.
    pub fn closest(&self) -> Option<CandidateId> {
        self.valid.first().copied()
    }

    /// Ranking distance, if the candidate was valid at the last update.
    pub fn distance(&self, id: CandidateId) -> Option<f32> {
        self.distances.get(&id).copied()
    }

    /// Drops a member immediately, outside the regular update cycle.
    pub fn evict(&mut self, id: CandidateId) {
        if self.tracked_set.remove(&id) {
            self.tracked.retain(|&c| c != id);
            self.valid.retain(|&c| c != id);
            self.distances.remove(&id);
        }
    }

    pub fn clear(&mut self) {
        self.tracked.clear();
        self.tracked_set.clear();
        self.distances.clear();
        self.valid.clear();
    }

    /// Refreshes membership and ranking for this tick.
    ///
    /// `overlapping` is the candidate set currently intersecting the
    /// grabber's overlap sphere; `distance_to` reports each candidate's
    /// distance under this index's [`SortMode`]; `is_valid` applies the
    /// owner's grab rules.
    pub fn update(
        &mut self,
        overlapping: &HashSet<CandidateId>,
        candidates: &HashMap<CandidateId, GrabCandidate>,
        distance_to: impl Fn(CandidateId) -> Option<f32>,
        is_valid: impl Fn(CandidateId, &GrabCandidate) -> bool,
    ) {
        // Eviction threshold lives in the same space as the ranking metric.
        let limit = match self.sort_mode {
            SortMode::SquaredDistance => self.max_distance * self.max_distance,
            SortMode::Distance | SortMode::SurfaceDistance => self.max_distance,
        };
        // Overlap-begin: new members append in arrival order.
        for &id in overlapping {
            if candidates.contains_key(&id) && self.tracked_set.insert(id) {
                self.tracked.push(id);
            }
        }

        // Mark phase.
        self.marked.clear();
        self.distances.clear();
        for &id in &self.tracked {
            let gone = !candidates.contains_key(&id) || !overlapping.contains(&id);
            if gone {
                self.marked.push(id);
                continue;
            }
            match distance_to(id) {
                Some(distance) => {
                    if distance > limit {
                        self.marked.push(id);
                    } else {
                        self.distances.insert(id, distance);
                    }
                }
                None => self.marked.push(id),
            }
        }

        // Remove phase.
        for id in std::mem::take(&mut self.marked) {
            self.tracked_set.remove(&id);
            self.tracked.retain(|&c| c != id);
            self.distances.remove(&id);
        }

        // Validity filter, then rank.
        self.valid.clear();
        for &id in &self.tracked {
            let Some(candidate) = candidates.get(&id) else {
                continue;
            };
            if is_valid(id, candidate) {
                self.valid.push(id);
                if self.penalize_held && candidate.is_held() {
                    if let Some(d) = self.distances.get_mut(&id) {
                        *d += self.held_penalty;
                    }
                }
            }
        }

        let distances = &self.distances;
        self.valid.sort_by(|a, b| {
            let da = distances.get(a).copied().unwrap_or(f32::MAX);
            let db = distances.get(b).copied().unwrap_or(f32::MAX);
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        });
    }
}
