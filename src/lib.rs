pub mod ai;
pub mod app_state;
pub mod components;
pub mod events;
pub mod plugins;
pub mod resources;
pub mod tracing_bridge;

use avian2d::prelude::*;
use bevy::prelude::*;
use micromegas_tracing::prelude::{info, span_fn, span_scope};

use app_state::{AppState, PlayingState};
use plugins::camera::CameraPlugin;
use plugins::combat::CombatPlugin;
use plugins::enemies::EnemyPlugin;
use plugins::player::PlayerPlugin;
use plugins::rooms::RoomPlugin;
use plugins::telemetry::TelemetryPlugin;
use resources::{
    Difficulty, EnemyRegistry, EnemyTuning, GameStats, PlannerSettings, RoomIndex, RoomSequence,
    RunOutcome,
};

pub struct BreachlinePlugin;

impl Plugin for BreachlinePlugin {
    fn build(&self, app: &mut App) {
        // State machine (StatesPlugin comes from DefaultPlugins)
        app.init_state::<AppState>();
        app.add_sub_state::<PlayingState>();

        // Top-down physics
        app.add_plugins(PhysicsPlugins::default());
        app.insert_resource(Gravity(Vec2::ZERO));

        // Static configuration, kept across runs
        app.init_resource::<Difficulty>();
        app.init_resource::<PlannerSettings>();
        app.init_resource::<EnemyRegistry>();
        app.insert_resource(EnemyTuning::load());

        // Game plugins
        app.add_plugins(TelemetryPlugin);
        app.add_plugins(CameraPlugin);
        app.add_plugins(RoomPlugin);
        app.add_plugins(PlayerPlugin);
        app.add_plugins(EnemyPlugin);
        app.add_plugins(CombatPlugin);

        // Per-run resources: inserted fresh on each run start, persist
        // through GameOver for the summary, cleaned up on exit.
        app.add_systems(OnEnter(AppState::InGame), init_game_session);
        app.add_systems(OnEnter(AppState::GameOver), report_run);
        app.add_systems(Update, restart_run.run_if(in_state(AppState::GameOver)));
        app.add_systems(OnExit(AppState::GameOver), cleanup_game_session);
    }
}

/// Insert per-run resources with fresh defaults and a newly shuffled room
/// sequence.
#[span_fn]
fn init_game_session(mut commands: Commands) {
    let sequence = RoomSequence::generate(&mut rand::thread_rng());
    info!("run starting: rooms {:?}", sequence.0);
    commands.insert_resource(sequence);
    commands.insert_resource(RoomIndex(0));
    commands.insert_resource(GameStats::default());
}

#[span_fn]
fn report_run(stats: Option<Res<GameStats>>) {
    let Some(stats) = stats else { return };
    let outcome = match stats.outcome {
        Some(RunOutcome::Victory) => "victory",
        Some(RunOutcome::Defeat) => "defeat",
        None => "abandoned",
    };
    info!(
        "run over: {} rooms_cleared={} kills={} damage_taken={}",
        outcome,
        stats.rooms_cleared,
        stats.total_kills(),
        stats.damage_taken
    );
}

/// Enter starts a new run from the game-over screen.
fn restart_run(
    keyboard: Option<Res<ButtonInput<KeyCode>>>,
    mut next_state: ResMut<NextState<AppState>>,
) {
    if keyboard.is_some_and(|k| k.just_pressed(KeyCode::Enter)) {
        next_state.set(AppState::InGame);
    }
}

/// Remove per-run resources when leaving GameOver.
#[span_fn]
fn cleanup_game_session(mut commands: Commands) {
    commands.remove_resource::<RoomSequence>();
    commands.remove_resource::<RoomIndex>();
    commands.remove_resource::<GameStats>();
}
