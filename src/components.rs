use bevy::prelude::*;

use crate::ai::controller::AgentController;

// ---------------------------------------------------------------------------
// Actors
// ---------------------------------------------------------------------------

#[derive(Component, Debug)]
pub struct Player;

#[derive(Component, Debug)]
pub struct Enemy;

/// The tactical brain driving an enemy. Destroy it before despawning.
#[derive(Component)]
pub struct EnemyBrain(pub AgentController);

#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct Health {
    pub current: f32,
    pub max: f32,
}

impl Health {
    pub fn new(max: f32) -> Self {
        Self { current: max, max }
    }

    pub fn is_dead(&self) -> bool {
        self.current <= 0.0
    }

    /// Subtract `amount`, clamped at zero. Returns true on the killing blow.
    pub fn damage(&mut self, amount: f32) -> bool {
        let was_alive = !self.is_dead();
        self.current = (self.current - amount).max(0.0);
        was_alive && self.is_dead()
    }
}

/// Collision box size in world units.
#[derive(Component, Debug, Clone, Copy)]
pub struct BodySize(pub Vec2);

/// World units per second.
#[derive(Component, Debug, Clone, Copy)]
pub struct MoveSpeed(pub f32);

// ---------------------------------------------------------------------------
// Room geometry
// ---------------------------------------------------------------------------

#[derive(Component, Debug)]
pub struct Wall;

#[derive(Component, Debug)]
pub struct Obstacle;

// ---------------------------------------------------------------------------
// Combat
// ---------------------------------------------------------------------------

/// Time until the player can swing again.
#[derive(Component, Debug, Deref, DerefMut)]
pub struct AttackCooldown(pub Timer);
