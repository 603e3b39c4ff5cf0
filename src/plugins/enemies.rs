//! Enemy spawning, the per-frame AI tick, hit delivery and death handling.

use std::collections::VecDeque;
use std::sync::Arc;

use avian2d::prelude::*;
use bevy::prelude::*;
use micromegas_tracing::prelude::{imetric, info, span_scope};

use crate::ai::agent::{AgentStats, TargetInfo};
use crate::ai::controller::{AgentKind, AgentRegistry};
use crate::ai::planner::PlannerConfig;
use crate::app_state::{AppState, PlayingState};
use crate::components::*;
use crate::events::{EnemyKilled, PlayerHit};
use crate::plugins::rooms::{load_room, EnemySpawn, RoomEntity, RoomLayout};
use crate::plugins::telemetry::GameSet;
use crate::resources::{
    Difficulty, EnemyRegistry, EnemyTuning, GameStats, PlannerSettings, RoomConfig,
};

pub struct EnemyPlugin;

impl Plugin for EnemyPlugin {
    fn build(&self, app: &mut App) {
        app.add_message::<PlayerHit>();
        app.add_observer(record_kill);

        app.add_systems(
            OnEnter(PlayingState::RoomIntro),
            init_spawn_wave.after(load_room),
        );
        app.add_systems(
            Update,
            (release_spawn_wave, enemy_ai.after(release_spawn_wave))
                .in_set(GameSet::Enemies)
                .run_if(in_state(PlayingState::Playing)),
        );
        app.add_systems(
            Update,
            despawn_dead_enemies
                .in_set(GameSet::Cleanup)
                .run_if(in_state(PlayingState::Playing)),
        );
        app.add_systems(OnEnter(PlayingState::RoomTransition), remove_spawn_wave);
        app.add_systems(OnExit(AppState::InGame), remove_spawn_wave);
    }
}

const ENEMY_Z: f32 = 10.0;

/// Enemies waiting to enter the current room, released one per tick of a
/// repeating timer.
#[derive(Resource, Debug)]
pub struct SpawnWave {
    pending: VecDeque<EnemySpawn>,
    timer: Timer,
}

impl SpawnWave {
    pub fn new(spawns: impl IntoIterator<Item = EnemySpawn>, interval_secs: f32) -> Self {
        Self {
            pending: spawns.into_iter().collect(),
            timer: Timer::from_seconds(interval_secs, TimerMode::Repeating),
        }
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.pending.is_empty()
    }

    /// Advance the timer; yields the next spawn when it fires.
    pub fn tick(&mut self, delta: std::time::Duration) -> Option<EnemySpawn> {
        self.timer.tick(delta);
        if !self.timer.just_finished() {
            return None;
        }
        self.pending.pop_front()
    }
}

fn kind_color(kind: AgentKind) -> Color {
    match kind {
        AgentKind::Walker => Color::srgb(0.8, 0.25, 0.2),
        AgentKind::Hybrid => Color::srgb(0.7, 0.35, 0.6),
        AgentKind::Fast => Color::srgb(0.95, 0.6, 0.15),
        AgentKind::Shooter => Color::srgb(0.3, 0.55, 0.9),
        AgentKind::Boss => Color::srgb(0.55, 0.05, 0.1),
    }
}

/// Queue the configured room's enemies.
fn init_spawn_wave(
    mut commands: Commands,
    layout: Option<Res<RoomLayout>>,
    config: Option<Res<RoomConfig>>,
) {
    let (Some(layout), Some(config)) = (layout, config) else {
        return;
    };
    commands.insert_resource(SpawnWave::new(
        layout.template.spawns.iter().copied(),
        config.spawn_interval_secs,
    ));
}

fn remove_spawn_wave(mut commands: Commands) {
    commands.remove_resource::<SpawnWave>();
}

/// Spawn an enemy entity with its controller. Returns `None` when no
/// constructor is registered for the kind.
pub fn spawn_enemy(
    commands: &mut Commands,
    registry: &AgentRegistry,
    layout: &RoomLayout,
    spawn: EnemySpawn,
    stats: AgentStats,
    planner: PlannerConfig,
) -> Option<Entity> {
    let controller = registry.spawn(
        spawn.kind,
        stats,
        spawn.position,
        layout.geometry.clone(),
        planner,
    )?;
    let world = layout.to_world(spawn.position);
    let size = Vec2::new(stats.body_width, stats.body_height);

    let entity = commands
        .spawn((
            Enemy,
            EnemyBrain(controller),
            BodySize(size),
            RoomEntity,
            Name::new(spawn.kind.label()),
            RigidBody::Dynamic,
            LockedAxes::ROTATION_LOCKED,
            Collider::rectangle(size.x, size.y),
            LinearVelocity::default(),
            Sprite::from_color(kind_color(spawn.kind), size),
            Transform::from_xyz(world.x, world.y, ENEMY_Z),
        ))
        .id();
    Some(entity)
}

#[allow(clippy::too_many_arguments)]
fn release_spawn_wave(
    mut commands: Commands,
    time: Res<Time>,
    wave: Option<ResMut<SpawnWave>>,
    layout: Option<Res<RoomLayout>>,
    registry: Res<EnemyRegistry>,
    tuning: Res<EnemyTuning>,
    difficulty: Res<Difficulty>,
    planner: Res<PlannerSettings>,
) {
    let (Some(mut wave), Some(layout)) = (wave, layout) else {
        return;
    };
    let Some(spawn) = wave.tick(time.delta()) else {
        return;
    };
    let stats = tuning.stats(*difficulty, spawn.kind);
    if spawn_enemy(&mut commands, &registry.0, &layout, spawn, stats, planner.0).is_some() {
        info!(
            "enemy released: {} ({} pending)",
            spawn.kind.label(),
            wave.remaining()
        );
    }
}

/// Refresh each agent's senses, tick its controller, then hand its velocity
/// to physics and its hits to combat.
fn enemy_ai(
    time: Res<Time>,
    layout: Option<Res<RoomLayout>>,
    player: Query<(&Transform, &BodySize), With<Player>>,
    mut enemies: Query<
        (Entity, &Transform, &mut EnemyBrain, &mut LinearVelocity),
        (With<Enemy>, Without<Player>),
    >,
    mut hits: MessageWriter<PlayerHit>,
) {
    span_scope!("enemy_ai");
    let Some(layout) = layout else { return };

    let now = time.elapsed_secs_f64() * 1000.0;
    let delta = time.delta_secs_f64() * 1000.0;

    let target = player.single().ok().map(|(transform, size)| {
        TargetInfo::new(layout.to_room(transform.translation.truncate()), size.0)
    });
    let positions: Vec<(Entity, Vec2)> = enemies
        .iter()
        .map(|(entity, transform, ..)| (entity, layout.to_room(transform.translation.truncate())))
        .collect();

    for (entity, transform, mut brain, mut velocity) in &mut enemies {
        let kind = brain.0.kind();
        let _span = bevy::log::info_span!("agent_tick", name = kind.label()).entered();

        let body = &mut brain.0.agent_mut().body;
        body.position = layout.to_room(transform.translation.truncate());
        body.target = target;
        if !Arc::ptr_eq(&body.room, &layout.geometry) {
            body.room = layout.geometry.clone();
        }
        body.neighbors.clear();
        body.neighbors.extend(
            positions
                .iter()
                .filter(|(other, _)| *other != entity)
                .map(|(_, position)| *position),
        );

        brain.0.tick(now, delta);

        let body = &mut brain.0.agent_mut().body;
        // Room space is y-down.
        velocity.0 = Vec2::new(body.velocity.x, -body.velocity.y);
        for hit in body.drain_hits() {
            hits.write(PlayerHit {
                source: entity,
                damage: hit.damage,
                ranged: hit.ranged,
            });
        }
    }
}

/// Destroy the brain of every dead enemy, then despawn it.
fn despawn_dead_enemies(
    mut commands: Commands,
    mut enemies: Query<(Entity, &mut EnemyBrain), With<Enemy>>,
) {
    for (entity, mut brain) in &mut enemies {
        if !brain.0.agent().body.is_dead() {
            continue;
        }
        let kind = brain.0.kind();
        brain.0.destroy();
        commands.entity(entity).despawn();
        commands.trigger(EnemyKilled { kind });
    }
}

fn record_kill(trigger: On<EnemyKilled>, stats: Option<ResMut<GameStats>>) {
    let Some(mut stats) = stats else { return };
    let kind = trigger.event().kind;
    *stats.kills_by_kind.entry(kind).or_insert(0) += 1;
    info!("enemy_killed: kind={} total={}", kind.label(), stats.total_kills());
    imetric!("kills", "count", stats.total_kills() as u64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::rooms::RoomTemplate;
    use bevy::asset::AssetPlugin;
    use bevy::scene::ScenePlugin;
    use bevy::state::app::StatesPlugin;
    use bevy::time::TimeUpdateStrategy;
    use std::time::Duration;

    fn spawn_at(kind: AgentKind, x: f32, y: f32) -> EnemySpawn {
        EnemySpawn {
            kind,
            position: Vec2::new(x, y),
        }
    }

    fn test_layout() -> RoomLayout {
        let template = RoomTemplate::parse(
            "room test\nsize 640 480\nplayer 40 240\nspawn walker 500 240\nspawn shooter 500 100",
        )
        .unwrap();
        RoomLayout::new(template, 1)
    }

    fn setup_app() -> App {
        let mut app = App::new();
        app.add_plugins(MinimalPlugins);
        app.add_plugins(TransformPlugin);
        app.add_plugins(AssetPlugin::default());
        app.add_plugins(ScenePlugin);
        app.add_plugins(StatesPlugin);
        app.add_plugins(PhysicsPlugins::default());
        app.insert_resource(Gravity(Vec2::ZERO));
        app.insert_resource(TimeUpdateStrategy::ManualDuration(Duration::from_millis(50)));
        app.init_state::<AppState>();
        app.add_sub_state::<PlayingState>();
        app.add_message::<PlayerHit>();
        app.add_observer(record_kill);
        app.init_resource::<GameStats>();
        app.init_resource::<EnemyRegistry>();
        app.init_resource::<PlannerSettings>();
        app.insert_resource(EnemyTuning::load());
        app.insert_resource(Difficulty::Normal);
        app.insert_resource(test_layout());
        app.add_systems(
            Update,
            (release_spawn_wave, enemy_ai.after(release_spawn_wave), despawn_dead_enemies)
                .run_if(in_state(PlayingState::Playing)),
        );

        app.finish();
        app.cleanup();

        app.world_mut()
            .resource_mut::<NextState<PlayingState>>()
            .set(PlayingState::Playing);
        for _ in 0..3 {
            app.update();
        }
        app
    }

    fn enemy_count(app: &mut App) -> usize {
        app.world_mut()
            .query_filtered::<(), With<Enemy>>()
            .iter(app.world())
            .count()
    }

    #[test]
    fn wave_releases_one_spawn_per_interval() {
        let mut wave = SpawnWave::new(
            [spawn_at(AgentKind::Walker, 1.0, 1.0), spawn_at(AgentKind::Fast, 2.0, 2.0)],
            1.0,
        );
        assert_eq!(wave.remaining(), 2);
        assert!(wave.tick(Duration::from_millis(600)).is_none());
        assert_eq!(
            wave.tick(Duration::from_millis(600)).map(|s| s.kind),
            Some(AgentKind::Walker)
        );
        assert_eq!(
            wave.tick(Duration::from_millis(1000)).map(|s| s.kind),
            Some(AgentKind::Fast)
        );
        assert!(wave.is_exhausted());
        assert!(wave.tick(Duration::from_millis(1000)).is_none());
    }

    #[test]
    fn spawned_enemy_has_brain_and_physics() {
        let mut app = setup_app();
        let layout = test_layout();
        let spawn = spawn_at(AgentKind::Shooter, 500.0, 100.0);
        let stats = AgentKind::Shooter.default_stats();
        let entity = {
            let registry = AgentRegistry::standard();
            let mut commands = app.world_mut().commands();
            spawn_enemy(
                &mut commands,
                &registry,
                &layout,
                spawn,
                stats,
                PlannerConfig::default(),
            )
            .unwrap()
        };
        app.world_mut().flush();

        let world = app.world();
        let brain = world.entity(entity).get::<EnemyBrain>().unwrap();
        assert_eq!(brain.0.kind(), AgentKind::Shooter);
        assert!(brain.0.machine().is_started());
        assert!(world.entity(entity).get::<RigidBody>().is_some());
        let transform = world.entity(entity).get::<Transform>().unwrap();
        assert_eq!(transform.translation.truncate(), Vec2::new(180.0, 140.0));
    }

    #[test]
    fn wave_spawns_enemies_over_time() {
        let mut app = setup_app();
        app.insert_resource(SpawnWave::new(test_layout().template.spawns, 0.1));
        for _ in 0..10 {
            app.update();
        }
        assert_eq!(enemy_count(&mut app), 2);
    }

    #[test]
    fn dead_enemy_is_despawned_and_counted() {
        let mut app = setup_app();
        app.insert_resource(SpawnWave::new(
            [spawn_at(AgentKind::Walker, 500.0, 240.0)],
            0.1,
        ));
        for _ in 0..5 {
            app.update();
        }
        assert_eq!(enemy_count(&mut app), 1);

        let mut query = app.world_mut().query::<&mut EnemyBrain>();
        for mut brain in query.iter_mut(app.world_mut()) {
            brain.0.agent_mut().body.take_damage(1000.0);
        }
        app.update();

        assert_eq!(enemy_count(&mut app), 0);
        let stats = app.world().resource::<GameStats>();
        assert_eq!(stats.kills_by_kind.get(&AgentKind::Walker), Some(&1));
    }

    #[test]
    fn melee_contact_sends_player_hit() {
        let mut app = setup_app();
        let layout = test_layout();
        // Player overlapping the walker's spawn point.
        let player_world = layout.to_world(Vec2::new(500.0, 240.0));
        app.world_mut().spawn((
            Player,
            BodySize(Vec2::splat(28.0)),
            Transform::from_xyz(player_world.x, player_world.y, 10.0),
        ));
        app.insert_resource(SpawnWave::new(
            [spawn_at(AgentKind::Walker, 500.0, 240.0)],
            0.1,
        ));

        let mut total = 0.0;
        for _ in 0..15 {
            app.update();
            let messages = app.world().resource::<Messages<PlayerHit>>();
            let mut cursor = messages.get_cursor();
            total += cursor.read(messages).map(|hit| hit.damage).sum::<f32>();
        }
        assert!(total > 0.0, "walker standing on the player never attacked");
    }
}
