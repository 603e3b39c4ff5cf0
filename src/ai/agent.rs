//! Agent context: the data surface behaviors and conditions work against.
//!
//! The host writes senses in (`position`, `target`, `now`, `room`,
//! `neighbors`) before every tick and reads `velocity` and drained hits back
//! out afterwards.

use std::sync::Arc;

use bevy::math::Vec2;
use serde::Deserialize;

use super::behaviors::AgentBehaviors;
use super::conditions::Perception;
use super::planner::{GridPlanner, Path, PlannerConfig, RoomGeometry};
use super::{Rect, direction_to};

/// Distance at which the current waypoint counts as reached.
pub const WAYPOINT_EPSILON: f32 = 5.0;
/// How long a melee swing keeps the attack lock set.
pub const ATTACK_LOCK_MS: f64 = 150.0;

const OVERLAP_SEPARATION_SCALE: f32 = 0.25;
const ATTACK_SEPARATION_SCALE: f32 = 0.5;

/// Per-agent tuning.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct AgentStats {
    pub speed: f32,
    pub max_health: f32,
    pub damage: f32,
    pub detection_range: f32,
    pub attack_range: f32,
    pub attack_cooldown_ms: f64,
    pub ideal_distance: Option<f32>,
    pub path_update_interval_ms: f64,
    /// Added to every side of the body box for the melee contact test.
    /// Negative values shrink it.
    pub contact_padding: f32,
    pub separation_radius: f32,
    pub separation_strength: f32,
    pub body_width: f32,
    pub body_height: f32,
}

impl Default for AgentStats {
    fn default() -> Self {
        Self {
            speed: 120.0,
            max_health: 80.0,
            damage: 15.0,
            detection_range: 250.0,
            attack_range: 40.0,
            attack_cooldown_ms: 600.0,
            ideal_distance: None,
            path_update_interval_ms: 500.0,
            contact_padding: -6.0,
            separation_radius: 70.0,
            separation_strength: 140.0,
            body_width: 28.0,
            body_height: 28.0,
        }
    }
}

/// Damage an agent wants applied to its target this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub damage: f32,
    pub ranged: bool,
}

/// What the agent currently knows about its target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetInfo {
    pub position: Vec2,
    pub bounds: Rect,
}

impl TargetInfo {
    pub fn new(position: Vec2, size: Vec2) -> Self {
        Self {
            position,
            bounds: Rect::centered(position, size),
        }
    }
}

/// Kinematic and combat state of one agent, in room coordinates.
pub struct AgentBody {
    pub position: Vec2,
    pub velocity: Vec2,
    pub stats: AgentStats,
    pub health: f32,
    pub target: Option<TargetInfo>,
    pub room: Arc<RoomGeometry>,
    /// Positions of other live agents in the same room.
    pub neighbors: Vec<Vec2>,
    /// Host clock in milliseconds.
    pub now: f64,
    path: Path,
    path_index: usize,
    attacking_until: f64,
    hits: Vec<Hit>,
}

impl AgentBody {
    pub fn new(stats: AgentStats, position: Vec2, room: Arc<RoomGeometry>) -> Self {
        Self {
            position,
            velocity: Vec2::ZERO,
            health: stats.max_health,
            stats,
            target: None,
            room,
            neighbors: Vec::new(),
            now: 0.0,
            path: Vec::new(),
            path_index: 0,
            attacking_until: f64::NEG_INFINITY,
            hits: Vec::new(),
        }
    }

    pub fn bounds(&self) -> Rect {
        Rect::centered(
            self.position,
            Vec2::new(self.stats.body_width, self.stats.body_height),
        )
    }

    pub fn distance_to_target(&self) -> f32 {
        self.target
            .map_or(f32::INFINITY, |t| self.position.distance(t.position))
    }

    /// Unit vector towards the target, zero without one.
    pub fn direction_to_target(&self) -> Vec2 {
        self.target
            .map_or(Vec2::ZERO, |t| direction_to(self.position, t.position))
    }

    pub fn target_position(&self) -> Option<Vec2> {
        self.target.map(|t| t.position)
    }

    /// Melee contact test: the body box grown by `contact_padding` (never
    /// smaller than 2×2) against the target's box.
    pub fn is_target_overlapping(&self) -> bool {
        let Some(target) = self.target else {
            return false;
        };
        let pad = self.stats.contact_padding;
        let body = self.bounds();
        let contact = Rect::new(
            body.x - pad,
            body.y - pad,
            (body.width + pad * 2.0).max(2.0),
            (body.height + pad * 2.0).max(2.0),
        );
        contact.overlaps(&target.bounds)
    }

    pub fn path(&self) -> &[Vec2] {
        &self.path
    }

    pub fn path_index(&self) -> usize {
        self.path_index
    }

    pub fn has_path(&self) -> bool {
        !self.path.is_empty()
    }

    /// Replace the current path and restart the cursor.
    pub fn set_path(&mut self, path: Path) {
        self.path = path;
        self.path_index = 0;
    }

    /// Zero velocity and drop the current path.
    pub fn stop(&mut self) {
        self.velocity = Vec2::ZERO;
        self.path.clear();
        self.path_index = 0;
    }

    /// Steer toward the current waypoint, advancing the cursor on arrival.
    pub fn follow_path(&mut self) {
        let Some(&waypoint) = self.path.get(self.path_index) else {
            self.velocity = Vec2::ZERO;
            return;
        };

        if self.position.distance(waypoint) < WAYPOINT_EPSILON {
            self.path_index += 1;
            if self.path_index >= self.path.len() {
                self.stop();
            }
            return;
        }

        self.velocity = direction_to(self.position, waypoint) * self.stats.speed;
    }

    /// Push away from neighbours that are too close. Softer while touching
    /// the target or mid-attack; the result never exceeds `speed`.
    pub fn apply_separation(&mut self, attacking: bool) {
        let radius = self.stats.separation_radius;
        let strength = self.stats.separation_strength;
        if radius <= 0.0 || strength <= 0.0 {
            return;
        }

        let mut push = Vec2::ZERO;
        for other in &self.neighbors {
            let offset = self.position - *other;
            let dist = offset.length();
            if dist == 0.0 || dist > radius {
                continue;
            }
            let force = (radius - dist) / radius * strength;
            push += offset / dist * force;
        }
        if push == Vec2::ZERO {
            return;
        }

        let mut scale = 1.0;
        if self
            .target
            .is_some_and(|t| self.bounds().overlaps(&t.bounds))
        {
            scale = OVERLAP_SEPARATION_SCALE;
        }
        if attacking {
            scale *= ATTACK_SEPARATION_SCALE;
        }

        self.velocity += push * scale;
        let max_speed = self.stats.speed;
        if max_speed > 0.0 && self.velocity.length() > max_speed {
            self.velocity = self.velocity.normalize() * max_speed;
        }
    }

    pub fn is_attacking(&self) -> bool {
        self.now < self.attacking_until
    }

    pub(crate) fn lock_attack(&mut self) {
        self.attacking_until = self.now + ATTACK_LOCK_MS;
    }

    pub(crate) fn push_hit(&mut self, hit: Hit) {
        self.hits.push(hit);
    }

    pub fn pending_hits(&self) -> &[Hit] {
        &self.hits
    }

    /// Hand every hit produced since the last drain to the host.
    pub fn drain_hits(&mut self) -> Vec<Hit> {
        std::mem::take(&mut self.hits)
    }

    /// Returns `true` when this blow was fatal.
    pub fn take_damage(&mut self, amount: f32) -> bool {
        if self.is_dead() {
            return false;
        }
        self.health -= amount;
        self.is_dead()
    }

    pub fn is_dead(&self) -> bool {
        self.health <= 0.0
    }

    pub(crate) fn clear(&mut self) {
        self.stop();
        self.hits.clear();
        self.attacking_until = f64::NEG_INFINITY;
    }
}

/// Body, planner and behaviors of one agent. This is the context every
/// state machine callback and condition receives.
pub struct Agent {
    pub body: AgentBody,
    pub planner: GridPlanner,
    pub behaviors: AgentBehaviors,
}

impl Agent {
    pub fn new(
        stats: AgentStats,
        position: Vec2,
        room: Arc<RoomGeometry>,
        planner: PlannerConfig,
    ) -> Self {
        Self {
            body: AgentBody::new(stats, position, room),
            planner: GridPlanner::new(planner),
            behaviors: AgentBehaviors::default(),
        }
    }

    pub fn run_chase(&mut self, delta: f64) {
        if let Some(chase) = self.behaviors.chase.as_mut() {
            chase.execute(&mut self.body, &mut self.planner, delta);
        }
    }

    pub fn run_keep_distance(&mut self, delta: f64) {
        if let Some(keep) = self.behaviors.keep_distance.as_mut() {
            keep.execute(&mut self.body, &mut self.planner, delta);
        }
    }

    pub fn run_melee(&mut self, delta: f64) {
        if let Some(melee) = self.behaviors.melee.as_mut() {
            melee.execute(&mut self.body, delta);
        }
    }

    pub fn run_ranged(&mut self, delta: f64) {
        if let Some(ranged) = self.behaviors.ranged.as_mut() {
            ranged.execute(&mut self.body, delta);
        }
    }

    pub fn run_retreat(&mut self, delta: f64) {
        if let Some(retreat) = self.behaviors.retreat.as_mut() {
            retreat.execute(&mut self.body, &mut self.planner, delta);
        }
    }
}

impl Perception for Agent {
    fn distance_to_target(&self) -> f32 {
        self.body.distance_to_target()
    }

    fn detection_range(&self) -> f32 {
        self.body.stats.detection_range
    }

    fn attack_range(&self) -> f32 {
        self.body.stats.attack_range
    }

    fn ideal_distance(&self) -> Option<f32> {
        self.body.stats.ideal_distance
    }

    fn health(&self) -> f32 {
        self.body.health
    }

    fn max_health(&self) -> f32 {
        self.body.stats.max_health
    }
}
