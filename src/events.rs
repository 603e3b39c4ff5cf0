//! Gameplay messages and events shared between plugins.

use bevy::prelude::*;

use crate::ai::controller::AgentKind;

/// Damage an enemy dealt to the player this frame.
#[derive(Message, Debug, Clone, Copy)]
pub struct PlayerHit {
    pub source: Entity,
    pub damage: f32,
    pub ranged: bool,
}

#[derive(Event, Debug, Clone, Copy)]
pub struct EnemyKilled {
    pub kind: AgentKind,
}
