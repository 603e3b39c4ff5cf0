//! Combat: enemy hits landing on the player, the player's melee swing, and
//! the end of the run when the player falls.

use bevy::prelude::*;
use micromegas_tracing::prelude::{fmetric, imetric, info};

use crate::app_state::{AppState, PlayingState};
use crate::components::*;
use crate::events::PlayerHit;
use crate::plugins::telemetry::GameSet;
use crate::resources::{GameStats, RunOutcome};

pub struct CombatPlugin;

impl Plugin for CombatPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(
            Update,
            (apply_player_hits, player_attack)
                .in_set(GameSet::Combat)
                .run_if(in_state(PlayingState::Playing)),
        );
    }
}

pub const MELEE_DAMAGE: f32 = 25.0;
pub const MELEE_RANGE: f32 = 60.0;
pub const MELEE_COOLDOWN_SECS: f32 = 0.35;

/// Apply every enemy hit from this frame to the player.
fn apply_player_hits(
    mut hits: MessageReader<PlayerHit>,
    mut player: Query<&mut Health, With<Player>>,
    mut stats: ResMut<GameStats>,
    mut next_app: ResMut<NextState<AppState>>,
) {
    let Ok(mut health) = player.single_mut() else {
        hits.clear();
        return;
    };
    for hit in hits.read() {
        if health.is_dead() {
            break;
        }
        stats.damage_taken += hit.damage;
        let fatal = health.damage(hit.damage);
        fmetric!("player_health", "hp", health.current as f64);
        if fatal {
            info!(
                "player down: ranged={} damage_taken={}",
                hit.ranged, stats.damage_taken
            );
            stats.outcome = Some(RunOutcome::Defeat);
            next_app.set(AppState::GameOver);
        }
    }
}

/// Space swings at every enemy whose body is within reach.
fn player_attack(
    keyboard: Res<ButtonInput<KeyCode>>,
    time: Res<Time>,
    mut player: Query<(&Transform, &mut AttackCooldown), With<Player>>,
    mut enemies: Query<(&Transform, &BodySize, &mut EnemyBrain), (With<Enemy>, Without<Player>)>,
) {
    let Ok((player_transform, mut cooldown)) = player.single_mut() else {
        return;
    };
    cooldown.tick(time.delta());
    if !cooldown.is_finished() || !keyboard.just_pressed(KeyCode::Space) {
        return;
    }
    cooldown.reset();

    let origin = player_transform.translation.truncate();
    let mut landed = 0u64;
    for (transform, size, mut brain) in &mut enemies {
        if !in_reach(origin, transform.translation.truncate(), size.0) {
            continue;
        }
        brain.0.agent_mut().body.take_damage(MELEE_DAMAGE);
        landed += 1;
    }
    imetric!("melee_hits", "count", landed);
}

/// Reach is measured to the nearest edge of the target's body.
pub fn in_reach(origin: Vec2, target: Vec2, target_size: Vec2) -> bool {
    let half = target_size / 2.0;
    let nearest = origin.clamp(target - half, target + half);
    origin.distance(nearest) <= MELEE_RANGE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::controller::{AgentKind, AgentRegistry};
    use crate::ai::planner::{PlannerConfig, RoomGeometry};
    use bevy::state::app::StatesPlugin;
    use bevy::time::TimeUpdateStrategy;
    use std::sync::Arc;
    use std::time::Duration;

    fn setup_app() -> App {
        let mut app = App::new();
        app.add_plugins(MinimalPlugins);
        app.add_plugins(StatesPlugin);
        app.insert_resource(TimeUpdateStrategy::ManualDuration(Duration::from_millis(16)));
        app.init_state::<AppState>();
        app.add_sub_state::<PlayingState>();
        app.add_message::<PlayerHit>();
        app.init_resource::<GameStats>();
        app.init_resource::<ButtonInput<KeyCode>>();
        app.add_systems(
            Update,
            (apply_player_hits, player_attack).run_if(in_state(PlayingState::Playing)),
        );

        app.update();
        app.world_mut()
            .resource_mut::<NextState<PlayingState>>()
            .set(PlayingState::Playing);
        for _ in 0..3 {
            app.update();
        }
        app
    }

    fn spawn_walker(app: &mut App, at: Vec2) -> Entity {
        let room = Arc::new(RoomGeometry::open(1, 1280.0, 720.0));
        let controller = AgentRegistry::standard()
            .spawn(
                AgentKind::Walker,
                AgentKind::Walker.default_stats(),
                Vec2::ZERO,
                room,
                PlannerConfig::default(),
            )
            .unwrap();
        app.world_mut()
            .spawn((
                Enemy,
                EnemyBrain(controller),
                BodySize(Vec2::splat(28.0)),
                Transform::from_translation(at.extend(0.0)),
            ))
            .id()
    }

    fn spawn_player(app: &mut App, health: f32) -> Entity {
        let mut cooldown = Timer::from_seconds(MELEE_COOLDOWN_SECS, TimerMode::Once);
        cooldown.tick(cooldown.duration());
        app.world_mut()
            .spawn((
                Player,
                Health::new(health),
                AttackCooldown(cooldown),
                Transform::default(),
            ))
            .id()
    }

    fn send_hit(app: &mut App, damage: f32) {
        app.world_mut().write_message(PlayerHit {
            source: Entity::PLACEHOLDER,
            damage,
            ranged: false,
        });
    }

    #[test]
    fn hits_reduce_player_health() {
        let mut app = setup_app();
        let player = spawn_player(&mut app, 100.0);
        send_hit(&mut app, 15.0);
        send_hit(&mut app, 10.0);
        app.update();

        let health = app.world().entity(player).get::<Health>().unwrap();
        assert_eq!(health.current, 75.0);
        assert_eq!(app.world().resource::<GameStats>().damage_taken, 25.0);
    }

    #[test]
    fn fatal_hit_ends_the_run() {
        let mut app = setup_app();
        spawn_player(&mut app, 10.0);
        send_hit(&mut app, 12.0);
        for _ in 0..3 {
            app.update();
        }

        let state = app.world().resource::<State<AppState>>();
        assert_eq!(*state.get(), AppState::GameOver);
        assert_eq!(
            app.world().resource::<GameStats>().outcome,
            Some(RunOutcome::Defeat)
        );
    }

    #[test]
    fn swing_damages_enemies_in_reach_only() {
        let mut app = setup_app();
        spawn_player(&mut app, 100.0);
        let near = spawn_walker(&mut app, Vec2::new(40.0, 0.0));
        let far = spawn_walker(&mut app, Vec2::new(300.0, 0.0));

        app.world_mut()
            .resource_mut::<ButtonInput<KeyCode>>()
            .press(KeyCode::Space);
        app.update();

        let health = |app: &App, entity: Entity| {
            app.world()
                .entity(entity)
                .get::<EnemyBrain>()
                .unwrap()
                .0
                .agent()
                .body
                .health
        };
        let max = AgentKind::Walker.default_stats().max_health;
        assert_eq!(health(&app, near), max - MELEE_DAMAGE);
        assert_eq!(health(&app, far), max);
    }

    #[test]
    fn swing_respects_cooldown() {
        let mut app = setup_app();
        spawn_player(&mut app, 100.0);
        let near = spawn_walker(&mut app, Vec2::new(20.0, 0.0));

        let mut keyboard = app.world_mut().resource_mut::<ButtonInput<KeyCode>>();
        keyboard.press(KeyCode::Space);
        app.update();
        // Re-press immediately: still cooling down.
        let mut keyboard = app.world_mut().resource_mut::<ButtonInput<KeyCode>>();
        keyboard.release(KeyCode::Space);
        keyboard.clear();
        keyboard.press(KeyCode::Space);
        app.update();

        let brain = app.world().entity(near).get::<EnemyBrain>().unwrap();
        let max = AgentKind::Walker.default_stats().max_health;
        assert_eq!(brain.0.agent().body.health, max - MELEE_DAMAGE);
    }

    #[test]
    fn reach_is_measured_to_body_edge() {
        let size = Vec2::splat(40.0);
        assert!(in_reach(Vec2::ZERO, Vec2::new(80.0, 0.0), size));
        assert!(!in_reach(Vec2::ZERO, Vec2::new(81.0, 0.0), size));
        assert!(in_reach(Vec2::ZERO, Vec2::ZERO, size));
    }
}
