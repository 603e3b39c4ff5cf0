//! Agent controllers: one planner, one state machine and a handful of
//! behaviors per hostile, wired by kind.

use std::collections::HashMap;
use std::sync::Arc;

use bevy::math::Vec2;
use micromegas_tracing::prelude::*;
use serde::Deserialize;

use super::agent::{Agent, AgentStats};
use super::behaviors::{
    ChaseBehavior, KeepDistanceBehavior, MeleeAttackBehavior, RangedAttackBehavior,
    RetreatBehavior,
};
use super::conditions::{
    and, health_above, health_below, in_range, near_ideal_distance, out_of_range, RangeKind,
};
use super::planner::{PlannerConfig, RoomGeometry};
use super::state_machine::{StateMachine, StateMachineBuilder, StateMachineError};

pub const IDLE: &str = "IDLE";
pub const CHASE: &str = "CHASE";
pub const ATTACK: &str = "ATTACK";
pub const POSITION: &str = "POSITION";
pub const RETREAT: &str = "RETREAT";

/// Ranged agents fall back below this health fraction.
const RETREAT_HEALTH: f32 = 0.3;
/// Band around the ideal distance in which a ranged agent opens fire.
const FIRING_BAND: (f32, f32) = (0.8, 1.2);
const DEFAULT_IDEAL_DISTANCE: f32 = 180.0;

const BOSS_BARRAGE_RANGE: f32 = 260.0;
const BOSS_BARRAGE_COOLDOWN_MS: f64 = 1200.0;
const BOSS_BARRAGE_DAMAGE_FACTOR: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Walker,
    Hybrid,
    Fast,
    Shooter,
    Boss,
}

impl AgentKind {
    pub const ALL: [AgentKind; 5] = [
        AgentKind::Walker,
        AgentKind::Hybrid,
        AgentKind::Fast,
        AgentKind::Shooter,
        AgentKind::Boss,
    ];

    pub fn label(self) -> &'static str {
        match self {
            AgentKind::Walker => "walker",
            AgentKind::Hybrid => "hybrid",
            AgentKind::Fast => "fast",
            AgentKind::Shooter => "shooter",
            AgentKind::Boss => "boss",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.label() == label)
    }

    /// Normal-difficulty tuning.
    pub fn default_stats(self) -> AgentStats {
        let base = AgentStats::default();
        match self {
            AgentKind::Walker => base,
            AgentKind::Hybrid => AgentStats {
                speed: 140.0,
                max_health: 110.0,
                damage: 18.0,
                detection_range: 300.0,
                attack_range: 55.0,
                body_width: 32.0,
                body_height: 32.0,
                ..base
            },
            AgentKind::Fast => AgentStats {
                speed: 200.0,
                max_health: 50.0,
                damage: 12.0,
                detection_range: 300.0,
                attack_cooldown_ms: 420.0,
                body_width: 24.0,
                body_height: 24.0,
                ..base
            },
            AgentKind::Shooter => AgentStats {
                speed: 90.0,
                max_health: 60.0,
                damage: 12.0,
                detection_range: 300.0,
                attack_range: 250.0,
                attack_cooldown_ms: 1800.0,
                ideal_distance: Some(DEFAULT_IDEAL_DISTANCE),
                ..base
            },
            AgentKind::Boss => AgentStats {
                speed: 130.0,
                max_health: 900.0,
                damage: 20.0,
                detection_range: 600.0,
                attack_range: 70.0,
                attack_cooldown_ms: 650.0,
                separation_radius: 0.0,
                body_width: 64.0,
                body_height: 64.0,
                ..base
            },
        }
    }
}

/// Owns exactly one agent and the state machine that drives it.
pub struct AgentController {
    kind: AgentKind,
    agent: Agent,
    machine: StateMachine<Agent>,
}

impl AgentController {
    fn assemble(kind: AgentKind, mut agent: Agent, mut machine: StateMachine<Agent>) -> Self {
        if let Err(err) = machine.start(&mut agent) {
            error!("{} controller failed to start: {}", kind.label(), err);
        }
        Self {
            kind,
            agent,
            machine,
        }
    }

    pub fn kind(&self) -> AgentKind {
        self.kind
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn agent_mut(&mut self) -> &mut Agent {
        &mut self.agent
    }

    pub fn machine(&self) -> &StateMachine<Agent> {
        &self.machine
    }

    pub fn state_name(&self) -> Option<&str> {
        self.machine.current_state_name()
    }

    /// Restart a destroyed or never-started machine.
    pub fn start(&mut self) -> Result<(), StateMachineError> {
        self.machine.start(&mut self.agent)
    }

    /// Advance one frame: state update and transitions, then path following
    /// and separation. The host reads `agent().body.velocity` afterwards.
    #[span_fn]
    pub fn tick(&mut self, now: f64, delta: f64) {
        let body = &mut self.agent.body;
        body.now = now;
        if body.is_dead() || !self.machine.is_started() {
            body.velocity = Vec2::ZERO;
            return;
        }

        self.machine.update(&mut self.agent, now, delta);
        self.agent.body.follow_path();
        let attacking = self.machine.is_in_state(ATTACK);
        self.agent.body.apply_separation(attacking);
    }

    /// Exit the current state, drop the state table and any pending path or
    /// hits. The controller never moves again unless restarted.
    pub fn destroy(&mut self) {
        self.machine.destroy(&mut self.agent);
        self.agent.body.clear();
    }

    pub fn is_destroyed(&self) -> bool {
        !self.machine.is_started()
    }
}

// ---------------------------------------------------------------------------
// State machine topologies
// ---------------------------------------------------------------------------

fn melee_machine(barrage: bool) -> StateMachine<Agent> {
    StateMachineBuilder::new()
        .state(IDLE)
        .on_enter(|agent: &mut Agent| agent.body.stop())
        .transition(in_range(RangeKind::Detection), CHASE)
        .state(CHASE)
        .on_update(move |agent: &mut Agent, _time, delta| {
            agent.run_chase(delta);
            if barrage {
                agent.run_ranged(delta);
            }
        })
        .transition(out_of_range(RangeKind::Detection), IDLE)
        .transition(in_range(RangeKind::Attack), ATTACK)
        .state(ATTACK)
        .on_enter(|agent: &mut Agent| agent.body.stop())
        .on_update(|agent: &mut Agent, _time, delta| {
            agent.run_melee(delta);
            // Keep closing in until the contact boxes touch.
            if agent.body.is_target_overlapping() {
                agent.body.stop();
            } else {
                agent.run_chase(delta);
            }
        })
        .transition(out_of_range(RangeKind::Detection), IDLE)
        .transition(
            and([
                in_range(RangeKind::Detection),
                out_of_range(RangeKind::Attack),
            ]),
            CHASE,
        )
        .initial(IDLE)
        .build()
}

fn ranged_machine() -> StateMachine<Agent> {
    StateMachineBuilder::new()
        .state(IDLE)
        .on_enter(|agent: &mut Agent| agent.body.stop())
        .transition(in_range(RangeKind::Detection), POSITION)
        .state(POSITION)
        .on_update(|agent: &mut Agent, _time, delta| agent.run_keep_distance(delta))
        .transition(out_of_range(RangeKind::Detection), IDLE)
        .transition(health_below(RETREAT_HEALTH), RETREAT)
        .transition(
            and([
                in_range(RangeKind::Attack),
                near_ideal_distance(FIRING_BAND.0, FIRING_BAND.1),
            ]),
            ATTACK,
        )
        .state(ATTACK)
        .on_update(|agent: &mut Agent, _time, delta| {
            agent.run_keep_distance(delta);
            agent.run_ranged(delta);
        })
        .transition(out_of_range(RangeKind::Detection), IDLE)
        .transition(health_below(RETREAT_HEALTH), RETREAT)
        .transition(out_of_range(RangeKind::Attack), POSITION)
        .state(RETREAT)
        .on_update(|agent: &mut Agent, _time, delta| agent.run_retreat(delta))
        .transition(out_of_range(RangeKind::Detection), IDLE)
        .transition(
            and([
                in_range(RangeKind::Detection),
                health_above(RETREAT_HEALTH),
            ]),
            POSITION,
        )
        .initial(IDLE)
        .build()
}

// ---------------------------------------------------------------------------
// Constructors
// ---------------------------------------------------------------------------

pub type AgentConstructor =
    fn(AgentKind, AgentStats, Vec2, Arc<RoomGeometry>, PlannerConfig) -> AgentController;

/// Walker, Hybrid and Fast: chase then strike on contact.
pub fn melee_controller(
    kind: AgentKind,
    stats: AgentStats,
    position: Vec2,
    room: Arc<RoomGeometry>,
    planner: PlannerConfig,
) -> AgentController {
    let mut agent = Agent::new(stats, position, room, planner);
    agent.behaviors.chase = Some(ChaseBehavior::new(stats.path_update_interval_ms));
    agent.behaviors.melee = Some(MeleeAttackBehavior::new(
        stats.attack_cooldown_ms,
        stats.damage,
    ));
    AgentController::assemble(kind, agent, melee_machine(false))
}

/// Shooter: hold the ideal distance, fire, retreat when hurt.
pub fn ranged_controller(
    kind: AgentKind,
    stats: AgentStats,
    position: Vec2,
    room: Arc<RoomGeometry>,
    planner: PlannerConfig,
) -> AgentController {
    let ideal = stats.ideal_distance.unwrap_or(DEFAULT_IDEAL_DISTANCE);
    let mut stats = stats;
    stats.ideal_distance = Some(ideal);

    let mut agent = Agent::new(stats, position, room, planner);
    agent.behaviors.keep_distance = Some(KeepDistanceBehavior::new(ideal));
    agent.behaviors.ranged = Some(RangedAttackBehavior::new(
        stats.attack_cooldown_ms,
        stats.damage,
    ));
    agent.behaviors.retreat = Some(RetreatBehavior::new(ideal));
    AgentController::assemble(kind, agent, ranged_machine())
}

/// Boss: melee topology with a ranged barrage while closing in.
pub fn boss_controller(
    kind: AgentKind,
    stats: AgentStats,
    position: Vec2,
    room: Arc<RoomGeometry>,
    planner: PlannerConfig,
) -> AgentController {
    let mut agent = Agent::new(stats, position, room, planner);
    agent.behaviors.chase = Some(ChaseBehavior::new(stats.path_update_interval_ms));
    agent.behaviors.melee = Some(MeleeAttackBehavior::new(
        stats.attack_cooldown_ms,
        stats.damage,
    ));
    agent.behaviors.ranged = Some(
        RangedAttackBehavior::new(
            BOSS_BARRAGE_COOLDOWN_MS,
            stats.damage * BOSS_BARRAGE_DAMAGE_FACTOR,
        )
        .with_range(BOSS_BARRAGE_RANGE),
    );
    AgentController::assemble(kind, agent, melee_machine(true))
}

/// Maps each agent kind to the function that builds its controller.
pub struct AgentRegistry {
    constructors: HashMap<AgentKind, AgentConstructor>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl AgentRegistry {
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Every built-in kind.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register(AgentKind::Walker, melee_controller);
        registry.register(AgentKind::Hybrid, melee_controller);
        registry.register(AgentKind::Fast, melee_controller);
        registry.register(AgentKind::Shooter, ranged_controller);
        registry.register(AgentKind::Boss, boss_controller);
        registry
    }

    pub fn register(&mut self, kind: AgentKind, constructor: AgentConstructor) {
        self.constructors.insert(kind, constructor);
    }

    pub fn contains(&self, kind: AgentKind) -> bool {
        self.constructors.contains_key(&kind)
    }

    pub fn spawn(
        &self,
        kind: AgentKind,
        stats: AgentStats,
        position: Vec2,
        room: Arc<RoomGeometry>,
        planner: PlannerConfig,
    ) -> Option<AgentController> {
        let Some(constructor) = self.constructors.get(&kind) else {
            warn!("no constructor registered for agent kind {}", kind.label());
            return None;
        };
        Some(constructor(kind, stats, position, room, planner))
    }
}
