//! Integration tests for the full run: room intro, clearing, transitions,
//! victory and restart, driven through `BreachlinePlugin` headless.

use std::time::Duration;

use bevy::asset::AssetPlugin;
use bevy::prelude::*;
use bevy::scene::ScenePlugin;
use bevy::state::app::StatesPlugin;
use bevy::time::TimeUpdateStrategy;
use breachline::app_state::{AppState, PlayingState};
use breachline::components::{Enemy, EnemyBrain, Player};
use breachline::plugins::enemies::SpawnWave;
use breachline::plugins::rooms::{RoomEntity, RoomLayout};
use breachline::resources::{GameStats, RoomIndex, RoomSequence, RunOutcome};

fn setup_app() -> App {
    let mut app = App::new();
    app.add_plugins(MinimalPlugins);
    app.add_plugins(TransformPlugin);
    app.add_plugins(AssetPlugin::default());
    app.add_plugins(ScenePlugin);
    // No InputPlugin: it clears just-pressed keys before Update runs.
    app.init_resource::<ButtonInput<KeyCode>>();
    app.add_plugins(StatesPlugin);
    app.insert_resource(TimeUpdateStrategy::ManualDuration(Duration::from_millis(100)));
    app.add_plugins(breachline::BreachlinePlugin);
    app.finish();
    app.cleanup();
    app
}

fn playing_state(app: &App) -> Option<PlayingState> {
    app.world()
        .get_resource::<State<PlayingState>>()
        .map(|s| *s.get())
}

fn wait_for_playing(app: &mut App, target: PlayingState, max_updates: usize) {
    for _ in 0..max_updates {
        app.update();
        if playing_state(app) == Some(target) {
            return;
        }
    }
    panic!(
        "PlayingState never reached {:?} after {max_updates} updates (now {:?})",
        target,
        playing_state(app)
    );
}

fn wait_for_app(app: &mut App, target: AppState, max_updates: usize) {
    for _ in 0..max_updates {
        app.update();
        if *app.world().resource::<State<AppState>>().get() == target {
            return;
        }
    }
    panic!("AppState never reached {:?} after {max_updates} updates", target);
}

/// Drop the remaining wave and kill everything already in the room.
fn clear_current_room(app: &mut App) {
    app.world_mut().remove_resource::<SpawnWave>();
    let mut brains = app.world_mut().query::<&mut EnemyBrain>();
    for mut brain in brains.iter_mut(app.world_mut()) {
        brain.0.agent_mut().body.take_damage(f32::MAX);
    }
}

fn count<F: bevy::ecs::query::QueryFilter>(app: &mut App) -> usize {
    app.world_mut()
        .query_filtered::<(), F>()
        .iter(app.world())
        .count()
}

#[test]
fn run_starts_in_the_starter_room() {
    let mut app = setup_app();
    app.update();
    app.update();

    assert_eq!(playing_state(&app), Some(PlayingState::RoomIntro));
    let sequence = app.world().resource::<RoomSequence>();
    assert_eq!(sequence.0.first().map(String::as_str), Some("starter"));
    assert_eq!(sequence.0.last().map(String::as_str), Some("boss"));

    let layout = app.world().resource::<RoomLayout>();
    assert_eq!(layout.template.name, "starter");
    assert_eq!(layout.geometry.room_id, 1);
    assert_eq!(count::<With<Player>>(&mut app), 1);
    assert!(count::<With<RoomEntity>>(&mut app) > 0);
}

#[test]
fn empty_room_clears_and_advances() {
    let mut app = setup_app();
    wait_for_playing(&mut app, PlayingState::Playing, 30);
    wait_for_playing(&mut app, PlayingState::RoomCleared, 5);
    assert_eq!(app.world().resource::<GameStats>().rooms_cleared, 1);

    wait_for_playing(&mut app, PlayingState::RoomIntro, 30);
    assert_eq!(app.world().resource::<RoomIndex>().0, 1);
    let layout = app.world().resource::<RoomLayout>();
    assert_eq!(layout.geometry.room_id, 2);
    assert_ne!(layout.template.name, "starter");
}

fn wait_for_first_enemy(app: &mut App, max_updates: usize) {
    for _ in 0..max_updates {
        app.update();
        if count::<With<Enemy>>(app) > 0 {
            return;
        }
    }
    panic!("no enemy released after {max_updates} updates");
}

#[test]
fn enemies_spawn_from_the_wave() {
    let mut app = setup_app();
    wait_for_playing(&mut app, PlayingState::Playing, 30);
    wait_for_playing(&mut app, PlayingState::Playing, 60); // second room
    assert_eq!(app.world().resource::<RoomIndex>().0, 1);

    let expected = app.world().resource::<RoomLayout>().template.spawns.len();
    assert!(expected > 0);
    wait_for_first_enemy(&mut app, 20);

    let alive = count::<With<Enemy>>(&mut app);
    let pending = app.world().resource::<SpawnWave>().remaining();
    assert_eq!(alive + pending, expected);
    assert_eq!(playing_state(&app), Some(PlayingState::Playing));
}

#[test]
fn clearing_every_room_wins_the_run() {
    let mut app = setup_app();
    app.update();
    let rooms = app.world().resource::<RoomSequence>().len();

    for room in 0..rooms {
        wait_for_playing(&mut app, PlayingState::Playing, 60);
        assert_eq!(app.world().resource::<RoomIndex>().0, room);
        let has_spawns = !app
            .world()
            .resource::<RoomLayout>()
            .template
            .spawns
            .is_empty();
        if has_spawns {
            // Let one enemy in so its death is recorded.
            wait_for_first_enemy(&mut app, 20);
            clear_current_room(&mut app);
        }
        if room + 1 < rooms {
            wait_for_playing(&mut app, PlayingState::RoomCleared, 5);
        }
    }

    wait_for_app(&mut app, AppState::GameOver, 5);
    let stats = app.world().resource::<GameStats>();
    assert_eq!(stats.outcome, Some(RunOutcome::Victory));
    assert_eq!(stats.rooms_cleared as usize, rooms);
    assert!(stats.total_kills() as usize >= rooms - 1);
    assert_eq!(count::<With<RoomEntity>>(&mut app), 0);
    assert_eq!(count::<With<Player>>(&mut app), 0);
}

#[test]
fn restart_from_game_over_starts_fresh() {
    let mut app = setup_app();
    app.update();
    app.world_mut()
        .resource_mut::<NextState<AppState>>()
        .set(AppState::GameOver);
    wait_for_app(&mut app, AppState::GameOver, 5);

    app.world_mut()
        .resource_mut::<ButtonInput<KeyCode>>()
        .press(KeyCode::Enter);
    wait_for_app(&mut app, AppState::InGame, 5);
    app.update();

    assert_eq!(app.world().resource::<RoomIndex>().0, 0);
    assert_eq!(app.world().resource::<GameStats>().rooms_cleared, 0);
    assert_eq!(playing_state(&app), Some(PlayingState::RoomIntro));
    assert_eq!(count::<With<Player>>(&mut app), 1);
}
