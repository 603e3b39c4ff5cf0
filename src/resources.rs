use std::collections::HashMap;

use bevy::prelude::*;
use micromegas_tracing::prelude::warn;
use rand::Rng;
use rand::seq::SliceRandom;
use serde::Deserialize;

use crate::ai::agent::AgentStats;
use crate::ai::controller::{AgentKind, AgentRegistry};
use crate::ai::planner::PlannerConfig;

/// Position of the current room in the run's sequence.
#[derive(Resource, Debug)]
pub struct RoomIndex(pub usize);

// ---------------------------------------------------------------------------
// Difficulty
// ---------------------------------------------------------------------------

#[derive(Resource, Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    #[default]
    Normal,
    Hard,
}

impl std::str::FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "normal" => Ok(Difficulty::Normal),
            "hard" => Ok(Difficulty::Hard),
            other => Err(format!("unknown difficulty '{other}'")),
        }
    }
}

/// Multipliers applied on top of normal tuning when a difficulty has no
/// dedicated column for a kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DifficultyModifiers {
    pub health: f32,
    pub damage: f32,
    pub speed: f32,
    pub spawn_interval: f32,
}

impl DifficultyModifiers {
    pub fn new(difficulty: Difficulty, kind: AgentKind) -> Self {
        let boss = kind == AgentKind::Boss;
        let (health, damage, speed) = match (difficulty, boss) {
            (Difficulty::Easy, false) => (0.85, 0.85, 0.9),
            (Difficulty::Easy, true) => (0.9, 0.9, 0.95),
            (Difficulty::Normal, _) => (1.0, 1.0, 1.0),
            (Difficulty::Hard, false) => (1.2, 1.2, 1.1),
            (Difficulty::Hard, true) => (1.25, 1.25, 1.1),
        };
        Self {
            health,
            damage,
            speed,
            spawn_interval: spawn_interval_multiplier(difficulty),
        }
    }

    pub fn apply(&self, stats: AgentStats) -> AgentStats {
        AgentStats {
            speed: stats.speed * self.speed,
            max_health: stats.max_health * self.health,
            damage: stats.damage * self.damage,
            ..stats
        }
    }
}

pub fn spawn_interval_multiplier(difficulty: Difficulty) -> f32 {
    match difficulty {
        Difficulty::Easy => 1.2,
        Difficulty::Normal => 1.0,
        Difficulty::Hard => 0.85,
    }
}

// ---------------------------------------------------------------------------
// Enemy tuning
// ---------------------------------------------------------------------------

const TUNING_JSON: &str = include_str!("../assets/tuning/enemies.json");

/// Per-difficulty, per-kind agent stats.
#[derive(Resource, Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct EnemyTuning {
    table: HashMap<Difficulty, HashMap<AgentKind, AgentStats>>,
}

impl EnemyTuning {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// The embedded table, or built-in defaults if it fails to parse.
    pub fn load() -> Self {
        match Self::parse(TUNING_JSON) {
            Ok(tuning) => tuning,
            Err(e) => {
                warn!("enemy tuning table is invalid, using built-in defaults: {e}");
                Self::default()
            }
        }
    }

    /// A dedicated column wins; otherwise normal tuning is scaled by the
    /// difficulty modifiers.
    pub fn stats(&self, difficulty: Difficulty, kind: AgentKind) -> AgentStats {
        if let Some(stats) = self.table.get(&difficulty).and_then(|column| column.get(&kind)) {
            return *stats;
        }
        let normal = self
            .table
            .get(&Difficulty::Normal)
            .and_then(|column| column.get(&kind))
            .copied()
            .unwrap_or_else(|| kind.default_stats());
        DifficultyModifiers::new(difficulty, kind).apply(normal)
    }
}

/// Constructors for every enemy kind the host can spawn.
#[derive(Resource, Default, Deref, DerefMut)]
pub struct EnemyRegistry(pub AgentRegistry);

/// Planner tuning shared by every agent spawned this session.
#[derive(Resource, Debug, Clone, Copy, Default, Deref)]
pub struct PlannerSettings(pub PlannerConfig);

// ---------------------------------------------------------------------------
// Room sequencing
// ---------------------------------------------------------------------------

pub const FIRST_ROOM: &str = "starter";
pub const FINAL_ROOM: &str = "boss";
const COMBAT_ROOMS: [&str; 2] = ["easy", "medium"];

const BASE_SPAWN_INTERVAL_SECS: f32 = 1.5;
const SPAWN_INTERVAL_STEP_SECS: f32 = 0.15;
const MIN_SPAWN_INTERVAL_SECS: f32 = 0.6;

/// Template names in play order: starter first, boss last, combat rooms
/// shuffled in between.
#[derive(Resource, Debug, Clone, PartialEq)]
pub struct RoomSequence(pub Vec<String>);

impl RoomSequence {
    pub fn generate(rng: &mut impl Rng) -> Self {
        let mut middle = COMBAT_ROOMS.to_vec();
        middle.shuffle(rng);
        let mut rooms = vec![FIRST_ROOM.to_string()];
        rooms.extend(middle.into_iter().map(str::to_string));
        rooms.push(FINAL_ROOM.to_string());
        Self(rooms)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Resource, Debug, Clone, PartialEq)]
pub struct RoomConfig {
    pub template: String,
    /// Stable id used to key the planner's cached grid.
    pub room_id: u32,
    pub spawn_interval_secs: f32,
    pub is_final: bool,
}

/// Build the configuration for the room at `index`, or `None` past the end
/// of the run.
pub fn room_config(
    sequence: &RoomSequence,
    index: usize,
    difficulty: Difficulty,
) -> Option<RoomConfig> {
    let template = sequence.0.get(index)?;
    let tier = index as u32;
    let interval = (BASE_SPAWN_INTERVAL_SECS - tier as f32 * SPAWN_INTERVAL_STEP_SECS)
        .max(MIN_SPAWN_INTERVAL_SECS);
    Some(RoomConfig {
        template: template.clone(),
        room_id: tier + 1,
        spawn_interval_secs: interval * spawn_interval_multiplier(difficulty),
        is_final: index + 1 == sequence.len(),
    })
}

// ---------------------------------------------------------------------------
// Run stats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Victory,
    Defeat,
}

#[derive(Resource, Debug, Default)]
pub struct GameStats {
    pub kills_by_kind: HashMap<AgentKind, u32>,
    pub damage_taken: f32,
    pub rooms_cleared: u32,
    pub outcome: Option<RunOutcome>,
}

impl GameStats {
    pub fn total_kills(&self) -> u32 {
        self.kills_by_kind.values().sum()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
