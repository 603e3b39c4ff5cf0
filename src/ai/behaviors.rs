//! Tactical behaviors. Each one is bound to a single agent and only keeps
//! its own timers; planner and body are lent to it on every call.

use micromegas_tracing::prelude::*;

use super::agent::{AgentBody, Hit};
use super::direction_to;
use super::planner::GridPlanner;

/// Half-width of the band around the ideal distance in which a ranged
/// agent holds still.
pub const KEEP_DISTANCE_TOLERANCE: f32 = 30.0;
/// Retreat while the target is closer than this multiple of the ideal
/// distance.
pub const RETREAT_TRIGGER_FACTOR: f32 = 1.5;
/// Retreat goal sits this multiple of the ideal distance away.
pub const RETREAT_REACH_FACTOR: f32 = 2.0;

/// The behaviors one agent was assembled with.
#[derive(Default)]
pub struct AgentBehaviors {
    pub chase: Option<ChaseBehavior>,
    pub keep_distance: Option<KeepDistanceBehavior>,
    pub melee: Option<MeleeAttackBehavior>,
    pub ranged: Option<RangedAttackBehavior>,
    pub retreat: Option<RetreatBehavior>,
}

/// Walk toward the target, re-planning at most once per interval unless the
/// agent has no path at all.
pub struct ChaseBehavior {
    interval_ms: f64,
    timer_ms: f64,
}

impl ChaseBehavior {
    pub fn new(interval_ms: f64) -> Self {
        Self {
            interval_ms,
            timer_ms: 0.0,
        }
    }

    pub fn execute(&mut self, body: &mut AgentBody, planner: &mut GridPlanner, delta: f64) {
        let Some(target) = body.target_position() else {
            return;
        };

        self.timer_ms += delta;
        if self.timer_ms >= self.interval_ms || !body.has_path() {
            let path = planner.find_path(&body.room, body.position, target);
            body.set_path(path);
            self.timer_ms = 0.0;
        }
    }
}

/// Hold the target at `ideal` distance: close in when too far, back off
/// along the target axis when too near, stop inside the tolerance band.
pub struct KeepDistanceBehavior {
    ideal: f32,
}

impl KeepDistanceBehavior {
    pub fn new(ideal: f32) -> Self {
        Self { ideal }
    }

    pub fn ideal_distance(&self) -> f32 {
        self.ideal
    }

    pub fn execute(&mut self, body: &mut AgentBody, planner: &mut GridPlanner, _delta: f64) {
        let Some(target) = body.target_position() else {
            return;
        };
        let dist = body.distance_to_target();

        let goal = if dist > self.ideal + KEEP_DISTANCE_TOLERANCE {
            target
        } else if dist < self.ideal - KEEP_DISTANCE_TOLERANCE {
            let dir = body.direction_to_target();
            body.position - dir * (self.ideal - dist + KEEP_DISTANCE_TOLERANCE)
        } else {
            body.stop();
            return;
        };

        let path = planner.find_path(&body.room, body.position, goal);
        body.set_path(path);
    }
}

/// Strike when the target is both in range and touching the contact box.
pub struct MeleeAttackBehavior {
    cooldown_ms: f64,
    damage: f32,
    last_attack: Option<f64>,
}

impl MeleeAttackBehavior {
    pub fn new(cooldown_ms: f64, damage: f32) -> Self {
        Self {
            cooldown_ms,
            damage,
            last_attack: None,
        }
    }

    pub fn is_ready(&self, now: f64) -> bool {
        self.last_attack
            .is_none_or(|last| now - last >= self.cooldown_ms)
    }

    /// Returns `true` when a hit was produced.
    pub fn execute(&mut self, body: &mut AgentBody, _delta: f64) -> bool {
        if body.target.is_none() || body.distance_to_target() > body.stats.attack_range {
            return false;
        }
        if !body.is_target_overlapping() || !self.is_ready(body.now) {
            return false;
        }

        self.last_attack = Some(body.now);
        body.lock_attack();
        body.push_hit(Hit {
            damage: self.damage,
            ranged: false,
        });
        true
    }
}

/// Hit the target from range. Damage lands immediately; there is no
/// projectile travel.
pub struct RangedAttackBehavior {
    cooldown_ms: f64,
    damage: f32,
    range: Option<f32>,
    last_attack: Option<f64>,
}

impl RangedAttackBehavior {
    pub fn new(cooldown_ms: f64, damage: f32) -> Self {
        Self {
            cooldown_ms,
            damage,
            range: None,
            last_attack: None,
        }
    }

    /// Fire within `range` instead of the agent's attack range.
    pub fn with_range(mut self, range: f32) -> Self {
        self.range = Some(range);
        self
    }

    pub fn is_ready(&self, now: f64) -> bool {
        self.last_attack
            .is_none_or(|last| now - last >= self.cooldown_ms)
    }

    pub fn execute(&mut self, body: &mut AgentBody, _delta: f64) -> bool {
        let range = self.range.unwrap_or(body.stats.attack_range);
        if body.target.is_none() || body.distance_to_target() > range {
            return false;
        }
        if !self.is_ready(body.now) {
            return false;
        }

        self.last_attack = Some(body.now);
        body.push_hit(Hit {
            damage: self.damage,
            ranged: true,
        });
        debug!("ranged hit for {} at {:.0}ms", self.damage, body.now);
        true
    }
}

/// Run directly away from the target while it is uncomfortably close.
pub struct RetreatBehavior {
    ideal: f32,
}

impl RetreatBehavior {
    pub fn new(ideal: f32) -> Self {
        Self { ideal }
    }

    pub fn execute(&mut self, body: &mut AgentBody, planner: &mut GridPlanner, _delta: f64) {
        let Some(target) = body.target_position() else {
            return;
        };
        if body.distance_to_target() >= self.ideal * RETREAT_TRIGGER_FACTOR {
            return;
        }

        let away = direction_to(target, body.position);
        let goal = body.position + away * self.ideal * RETREAT_REACH_FACTOR;
        let path = planner.find_path(&body.room, body.position, goal);
        body.set_path(path);
    }
}
