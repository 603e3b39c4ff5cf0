//! Player spawning and input handling.

use avian2d::prelude::*;
use bevy::prelude::*;
use micromegas_tracing::prelude::*;

use crate::app_state::{AppState, PlayingState};
use crate::components::*;
use crate::plugins::rooms::{load_room, RoomLayout};
use crate::plugins::telemetry::GameSet;

pub struct PlayerPlugin;

impl Plugin for PlayerPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(OnEnter(AppState::InGame), spawn_player);
        app.add_systems(
            OnEnter(PlayingState::RoomIntro),
            place_player.after(load_room),
        );
        app.add_systems(
            Update,
            player_movement
                .in_set(GameSet::Player)
                .run_if(in_state(PlayingState::Playing)),
        );
        app.add_systems(OnExit(PlayingState::Playing), stop_player);
        app.add_systems(OnExit(AppState::InGame), despawn_player);
    }
}

pub const PLAYER_MAX_HEALTH: f32 = 100.0;
pub const PLAYER_SPEED: f32 = 200.0;
pub const PLAYER_SIZE: f32 = 28.0;
const PLAYER_Z: f32 = 20.0;
const PLAYER_COLOR: Color = Color::srgb(0.9, 0.9, 0.75);

/// Spawn the player once per run. Health carries over between rooms.
#[span_fn]
pub fn spawn_player(mut commands: Commands) {
    let size = Vec2::splat(PLAYER_SIZE);
    commands.spawn((
        Player,
        Health::new(PLAYER_MAX_HEALTH),
        MoveSpeed(PLAYER_SPEED),
        BodySize(size),
        AttackCooldown(finished_timer(crate::plugins::combat::MELEE_COOLDOWN_SECS)),
        Name::new("player"),
        RigidBody::Dynamic,
        LockedAxes::ROTATION_LOCKED,
        Collider::rectangle(size.x, size.y),
        LinearVelocity::default(),
        Sprite::from_color(PLAYER_COLOR, size),
        Transform::from_xyz(0.0, 0.0, PLAYER_Z),
    ));
}

fn finished_timer(secs: f32) -> Timer {
    let mut timer = Timer::from_seconds(secs, TimerMode::Once);
    let duration = timer.duration();
    timer.tick(duration);
    timer
}

/// Move the player to the current room's entrance.
#[span_fn]
fn place_player(
    layout: Option<Res<RoomLayout>>,
    mut query: Query<(&mut Transform, &mut LinearVelocity), With<Player>>,
) {
    let Some(layout) = layout else { return };
    let spawn = layout.to_world(layout.template.player_spawn);
    for (mut transform, mut velocity) in &mut query {
        transform.translation = spawn.extend(PLAYER_Z);
        velocity.0 = Vec2::ZERO;
    }
}

/// Unit direction from WASD / arrow keys, zero when idle.
pub fn input_direction(keyboard: &ButtonInput<KeyCode>) -> Vec2 {
    let mut dir = Vec2::ZERO;
    if keyboard.any_pressed([KeyCode::KeyW, KeyCode::ArrowUp]) {
        dir.y += 1.0;
    }
    if keyboard.any_pressed([KeyCode::KeyS, KeyCode::ArrowDown]) {
        dir.y -= 1.0;
    }
    if keyboard.any_pressed([KeyCode::KeyA, KeyCode::ArrowLeft]) {
        dir.x -= 1.0;
    }
    if keyboard.any_pressed([KeyCode::KeyD, KeyCode::ArrowRight]) {
        dir.x += 1.0;
    }
    dir.normalize_or_zero()
}

#[span_fn]
fn player_movement(
    keyboard: Res<ButtonInput<KeyCode>>,
    mut query: Query<(&MoveSpeed, &mut LinearVelocity), With<Player>>,
) {
    let dir = input_direction(&keyboard);
    for (speed, mut velocity) in &mut query {
        velocity.0 = dir * speed.0;
    }
}

fn stop_player(mut query: Query<&mut LinearVelocity, With<Player>>) {
    for mut velocity in &mut query {
        velocity.0 = Vec2::ZERO;
    }
}

fn despawn_player(mut commands: Commands, query: Query<Entity, With<Player>>) {
    for entity in &query {
        commands.entity(entity).despawn();
    }
}
