use nalgebra::{Point3, UnitQuaternion, Vector3};
use rapier3d::prelude::*;
use std::collections::{HashMap, HashSet};

const EPSILON: f32 = 1e-4;

/// Stable identifier for a body registered with the spatial world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyId(pub u64);

/// Collider shape for a registered body.
#[derive(Debug, Clone, Copy)]
pub enum BodyShape {
    Cuboid { half_extents: [f32; 3] },
    Ball { radius: f32 },
    Capsule { half_height: f32, radius: f32 },
}

fn build_collider(shape: BodyShape, solid: bool, density: f32) -> Collider {
    let shared_shape = match shape {
        BodyShape::Cuboid { half_extents: [hx, hy, hz] } => SharedShape::cuboid(hx, hy, hz),
        BodyShape::Ball { radius } => SharedShape::ball(radius),
        BodyShape::Capsule { half_height, radius } => SharedShape::capsule_y(half_height, radius),
    };
    ColliderBuilder::new(shared_shape)
        .sensor(!solid)
        .density(density)
        .build()
}

/// Wrapper around the Rapier3D pipeline that the interaction system drives.
///
/// Bodies are addressed by `BodyId` so grabbers and candidates never hold raw
/// Rapier handles. Pose and velocity writes happen between query phases and
/// `step`, so the query pipeline is refreshed explicitly at the start of each
/// tick via [`SpatialWorld::refresh_queries`].
pub struct SpatialWorld {
    pub gravity: Vector<Real>,
    pub rigid_body_set: RigidBodySet,
    pub collider_set: ColliderSet,
    pub integration_parameters: IntegrationParameters,
    pub physics_pipeline: PhysicsPipeline,
    pub island_manager: IslandManager,
    pub broad_phase: DefaultBroadPhase,
    pub narrow_phase: NarrowPhase,
    pub impulse_joint_set: ImpulseJointSet,
    pub multibody_joint_set: MultibodyJointSet,
    pub ccd_solver: CCDSolver,
    pub query_pipeline: QueryPipeline,

    id_to_body: HashMap<BodyId, RigidBodyHandle>,
    body_to_id: HashMap<RigidBodyHandle, BodyId>,
    collider_to_id: HashMap<ColliderHandle, BodyId>,
    next_id: u64,
    /// Pairs whose contacts are ignored by the contact queries, normalized
    /// to (min, max). Used to let a just-released body clear a hand.
    ignored_pairs: HashSet<(BodyId, BodyId)>,
}

impl SpatialWorld {
    pub fn new() -> Self {
        Self {
            gravity: vector![0.0, -9.81, 0.0],
            rigid_body_set: RigidBodySet::new(),
            collider_set: ColliderSet::new(),
            integration_parameters: IntegrationParameters::default(),
            physics_pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            impulse_joint_set: ImpulseJointSet::new(),
            multibody_joint_set: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            id_to_body: HashMap::new(),
            body_to_id: HashMap::new(),
            collider_to_id: HashMap::new(),
            next_id: 1,
            ignored_pairs: HashSet::new(),
        }
    }

    /// Steps the simulation forward by dt seconds.
    pub fn step(&mut self, dt: f32) {
        self.integration_parameters.dt = dt;
        self.physics_pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_body_set,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            &mut self.ccd_solver,
            Some(&mut self.query_pipeline),
            &(),
            &(),
        );
    }

    /// Rebuilds query acceleration structures against current collider poses.
    /// Must be called before spatial queries that precede the first `step`,
    /// or after bodies were added or teleported outside of `step`.
    pub fn refresh_queries(&mut self) {
        self.query_pipeline.update(&self.collider_set);
    }

    /// Registers a body.
    /// - Kinematic bodies follow poses written through [`Self::set_kinematic_pose`].
    /// - Non-solid bodies are sensors: they participate in overlap queries but
    ///   never generate contact forces (grabber palms and lasers use this).
    pub fn add_body(
        &mut self,
        position: Vector3<f32>,
        rotation: UnitQuaternion<f32>,
        shape: BodyShape,
        kinematic: bool,
        solid: bool,
    ) -> BodyId {
        let id = BodyId(self.next_id);
        self.next_id += 1;

        let body = if kinematic {
            RigidBodyBuilder::kinematic_position_based()
        } else {
            RigidBodyBuilder::dynamic()
        }
        .translation(vector![position.x, position.y, position.z])
        .rotation(rotation.scaled_axis())
        .build();

        let handle = self.rigid_body_set.insert(body);
        let collider = build_collider(shape, solid, 1.0);
        let collider_handle = self
            .collider_set
            .insert_with_parent(collider, handle, &mut self.rigid_body_set);

        self.id_to_body.insert(id, handle);
        self.body_to_id.insert(handle, id);
        self.collider_to_id.insert(collider_handle, id);

        id
    }

    /// Removes a body and all bookkeeping that references it.
    pub fn remove_body(&mut self, id: BodyId) -> bool {
        if let Some(handle) = self.id_to_body.remove(&id) {
            self.body_to_id.remove(&handle);
            if let Some(body) = self.rigid_body_set.get(handle) {
                for &ch in body.colliders() {
                    self.collider_to_id.remove(&ch);
                }
            }
            self.rigid_body_set.remove(
                handle,
                &mut self.island_manager,
                &mut self.collider_set,
                &mut self.impulse_joint_set,
                &mut self.multibody_joint_set,
                true,
            );
            self.ignored_pairs.retain(|&(a, b)| a != id && b != id);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, id: BodyId) -> bool {
        self.id_to_body.contains_key(&id)
    }

    fn body(&self, id: BodyId) -> Option<&RigidBody> {
        self.id_to_body.get(&id).and_then(|h| self.rigid_body_set.get(*h))
    }

    fn body_mut(&mut self, id: BodyId) -> Option<&mut RigidBody> {
        let handle = *self.id_to_body.get(&id)?;
        self.rigid_body_set.get_mut(handle)
    }

    pub fn position(&self, id: BodyId) -> Option<Vector3<f32>> {
        self.body(id).map(|b| {
            let t = b.translation();
            Vector3::new(t.x, t.y, t.z)
        })
    }

    pub fn rotation(&self, id: BodyId) -> Option<UnitQuaternion<f32>> {
        self.body(id).map(|b| *b.rotation())
    }

    pub fn linvel(&self, id: BodyId) -> Option<Vector3<f32>> {
        self.body(id).map(|b| {
            let v = b.linvel();
            Vector3::new(v.x, v.y, v.z)
        })
    }

    pub fn angvel(&self, id: BodyId) -> Option<Vector3<f32>> {
        self.body(id).map(|b| {
            let w = b.angvel();
            Vector3::new(w.x, w.y, w.z)
        })
    }

    pub fn mass(&self, id: BodyId) -> Option<f32> {
        self.body(id).map(|b| b.mass())
    }

    pub fn set_linvel(&mut self, id: BodyId, v: Vector3<f32>) {
        if let Some(body) = self.body_mut(id) {
            body.set_linvel(vector![v.x, v.y, v.z], true);
        }
    }

    pub fn set_angvel(&mut self, id: BodyId, w: Vector3<f32>) {
        if let Some(body) = self.body_mut(id) {
            body.set_angvel(vector![w.x, w.y, w.z], true);
        }
    }

    pub fn gravity_scale(&self, id: BodyId) -> Option<f32> {
        self.body(id).map(|b| b.gravity_scale())
    }

    pub fn set_gravity_scale(&mut self, id: BodyId, scale: f32) {
        if let Some(body) = self.body_mut(id) {
            body.set_gravity_scale(scale, true);
        }
    }

    pub fn linear_damping(&self, id: BodyId) -> Option<f32> {
        self.body(id).map(|b| b.linear_damping())
    }

    pub fn set_linear_damping(&mut self, id: BodyId, damping: f32) {
        if let Some(body) = self.body_mut(id) {
            body.set_linear_damping(damping);
        }
    }

    pub fn is_kinematic(&self, id: BodyId) -> bool {
        self.body(id).map(|b| b.is_kinematic()).unwrap_or(false)
    }

    /// Switches a body between kinematic and dynamic. Sockets park their
    /// held body kinematically and restore dynamics on release.
    pub fn set_kinematic(&mut self, id: BodyId, kinematic: bool) {
        if let Some(body) = self.body_mut(id) {
            if kinematic {
                body.set_body_type(RigidBodyType::KinematicPositionBased, true);
            } else {
                body.set_body_type(RigidBodyType::Dynamic, true);
            }
        }
    }

    /// Schedules the next pose of a kinematic body.
    pub fn set_kinematic_pose(
        &mut self,
        id: BodyId,
        position: Vector3<f32>,
        rotation: UnitQuaternion<f32>,
    ) {
        if let Some(body) = self.body_mut(id) {
            if body.is_kinematic() {
                body.set_next_kinematic_translation(vector![position.x, position.y, position.z]);
                body.set_next_kinematic_rotation(rotation);
            }
        }
    }

    /// Hard-sets a body pose, bypassing interpolation. Used when a socket
    /// snaps a candidate to its anchor.
    pub fn teleport(&mut self, id: BodyId, position: Vector3<f32>, rotation: UnitQuaternion<f32>) {
        if let Some(body) = self.body_mut(id) {
            body.set_translation(vector![position.x, position.y, position.z], true);
            body.set_rotation(rotation, true);
        }
    }

    /// World-space velocity of the point `at` as carried by body `id`.
    pub fn velocity_at_point(&self, id: BodyId, at: Vector3<f32>) -> Option<Vector3<f32>> {
        self.body(id).map(|b| {
            let v = b.velocity_at_point(&point![at.x, at.y, at.z]);
            Vector3::new(v.x, v.y, v.z)
        })
    }

    /// Contacts between this pair are ignored by [`Self::contacts_any`]
    /// while set. Overlap queries are unaffected: a released body stays
    /// grabbable even while its collisions with the hand are suppressed.
    pub fn set_pair_ignored(&mut self, a: BodyId, b: BodyId, ignored: bool) {
        let pair = if a < b { (a, b) } else { (b, a) };
        if ignored {
            self.ignored_pairs.insert(pair);
        } else {
            self.ignored_pairs.remove(&pair);
        }
    }

    fn pair_ignored(&self, a: BodyId, b: BodyId) -> bool {
        let pair = if a < b { (a, b) } else { (b, a) };
        self.ignored_pairs.contains(&pair)
    }

    /// All bodies whose colliders intersect a sphere at `center`, excluding
    /// `owner` itself.
    pub fn overlaps_sphere(
        &self,
        owner: BodyId,
        center: Vector3<f32>,
        radius: f32,
    ) -> HashSet<BodyId> {
        let mut hits = HashSet::new();
        let shape = Ball::new(radius);
        let pos = Isometry::translation(center.x, center.y, center.z);
        let filter = match self.id_to_body.get(&owner) {
            Some(&handle) => QueryFilter::default().exclude_rigid_body(handle),
            None => QueryFilter::default(),
        };

        self.query_pipeline.intersections_with_shape(
            &self.rigid_body_set,
            &self.collider_set,
            &pos,
            &shape,
            filter,
            |collider_handle| {
                if let Some(&other) = self.collider_to_id.get(&collider_handle) {
                    if other != owner {
                        hits.insert(other);
                    }
                }
                true
            },
        );

        hits
    }

    /// Distance from `point` to the nearest surface point of `id`'s
    /// colliders, zero when `point` is inside one of them.
    pub fn surface_distance(&self, id: BodyId, point: Vector3<f32>) -> Option<f32> {
        use rapier3d::parry::query::PointQuery;

        let &handle = self.id_to_body.get(&id)?;
        let body = self.rigid_body_set.get(handle)?;

        let target = Point3::from(point);
        let mut best: Option<f32> = None;
        for &ch in body.colliders() {
            let Some(collider) = self.collider_set.get(ch) else {
                continue;
            };
            let projection = collider.shape().project_point(collider.position(), &target, true);
            let distance = if projection.is_inside {
                0.0
            } else {
                (projection.point - target).norm()
            };
            best = Some(best.map_or(distance, |b| b.min(distance)));
        }
        best
    }

    /// Whether body `id` currently intersects any solid collider, excluding
    /// the listed bodies and ignored pairs. Drives the in-flight collision
    /// check of the force pull.
    pub fn contacts_any(&self, id: BodyId, exclude: &[BodyId]) -> bool {
        let Some(&handle) = self.id_to_body.get(&id) else {
            return false;
        };
        let Some(body) = self.rigid_body_set.get(handle) else {
            return false;
        };

        let mut hit = false;
        let collider_handles: Vec<_> = body.colliders().to_vec();
        for ch in collider_handles {
            let Some(collider) = self.collider_set.get(ch) else {
                continue;
            };
            let filter = QueryFilter::default()
                .exclude_rigid_body(handle)
                .exclude_sensors();

            self.query_pipeline.intersections_with_shape(
                &self.rigid_body_set,
                &self.collider_set,
                collider.position(),
                collider.shape(),
                filter,
                |other_handle| {
                    if let Some(&other) = self.collider_to_id.get(&other_handle) {
                        if other != id
                            && !exclude.contains(&other)
                            && !self.pair_ignored(id, other)
                        {
                            hit = true;
                            return false;
                        }
                    }
                    true
                },
            );
            if hit {
                break;
            }
        }
        hit
    }

    /// Whether an unobstructed ray exists from `from` to the body `target`.
    /// The ray stops at the first solid hit; hitting the target itself
    /// counts as visible.
    pub fn has_line_of_sight(
        &self,
        from: Vector3<f32>,
        to: Vector3<f32>,
        exclude: Option<BodyId>,
        target: BodyId,
    ) -> bool {
        let direction = to - from;
        let max_dist = direction.norm();
        if max_dist < EPSILON {
            return true;
        }
        let ray = Ray::new(point![from.x, from.y, from.z], direction / max_dist);

        let mut filter = QueryFilter::default().exclude_sensors();
        if let Some(body_id) = exclude.and_then(|e| self.id_to_body.get(&e)) {
            filter = filter.exclude_rigid_body(*body_id);
        }

        if let Some((hit_collider, _)) = self.query_pipeline.cast_ray(
            &self.rigid_body_set,
            &self.collider_set,
            &ray,
            max_dist,
            true,
            filter,
        ) {
            self.collider_to_id.get(&hit_collider) == Some(&target)
        } else {
            true
        }
    }
}

impl Default for SpatialWorld {
    fn default() -> Self {
        Self::new()
    }
}
