//! Room loading, static collision geometry and room-to-room progression.
//!
//! Rooms are authored in a y-down coordinate space with the origin at the
//! top-left corner, which is also the space the AI plans in. Bevy world space
//! is y-up and centred on the room; conversion happens only at this boundary.

use std::sync::Arc;

use avian2d::prelude::*;
use bevy::prelude::*;
use micromegas_tracing::prelude::{error, imetric, info, span_scope};

use crate::ai::Rect;
use crate::ai::controller::AgentKind;
use crate::ai::planner::RoomGeometry;
use crate::app_state::{AppState, PlayingState};
use crate::components::{Enemy, EnemyBrain, Obstacle, Wall};
use crate::plugins::enemies::SpawnWave;
use crate::resources::{
    room_config, Difficulty, GameStats, RoomConfig, RoomIndex, RoomSequence, RunOutcome,
};

pub struct RoomPlugin;

impl Plugin for RoomPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(
            OnEnter(PlayingState::RoomIntro),
            (
                update_room_config,
                load_room.after(update_room_config),
                start_room_intro_timer,
            ),
        );
        app.add_systems(
            Update,
            room_intro_delay.run_if(in_state(PlayingState::RoomIntro)),
        );
        app.add_systems(
            Update,
            check_room_cleared.run_if(in_state(PlayingState::Playing)),
        );

        app.add_systems(OnEnter(PlayingState::RoomCleared), on_room_cleared);
        app.add_systems(
            Update,
            room_cleared_delay.run_if(in_state(PlayingState::RoomCleared)),
        );

        app.add_systems(
            OnEnter(PlayingState::RoomTransition),
            (despawn_room_entities, advance_room.after(despawn_room_entities)),
        );

        // GameOver skips RoomTransition, so the room is torn down here too.
        app.add_systems(OnExit(AppState::InGame), cleanup_on_exit_game);
    }
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const ROOM_WIDTH: f32 = 1280.0;
pub const ROOM_HEIGHT: f32 = 720.0;
const ARENA_WALL: f32 = 20.0;

const INTRO_SECS: f32 = 1.0;
const CLEARED_SECS: f32 = 1.5;

const WALL_COLOR: Color = Color::srgb(0.22, 0.24, 0.3);
const OBSTACLE_COLOR: Color = Color::srgb(0.35, 0.3, 0.26);

const TEMPLATE_SOURCES: [(&str, &str); 4] = [
    ("starter", include_str!("../../assets/rooms/starter.room")),
    ("easy", include_str!("../../assets/rooms/easy.room")),
    ("medium", include_str!("../../assets/rooms/medium.room")),
    ("boss", include_str!("../../assets/rooms/boss.room")),
];

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnemySpawn {
    pub kind: AgentKind,
    pub position: Vec2,
}

/// A parsed room, in room coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomTemplate {
    pub name: String,
    pub width: f32,
    pub height: f32,
    pub player_spawn: Vec2,
    pub walls: Vec<Rect>,
    pub obstacles: Vec<Rect>,
    pub spawns: Vec<EnemySpawn>,
}

impl RoomTemplate {
    /// Parse the line-based room format:
    ///
    /// ```text
    /// room <name>
    /// size <width> <height>
    /// player <x> <y>
    /// wall <x> <y> <width> <height>
    /// obstacle <x> <y> <width> <height>
    /// spawn <kind> <x> <y>
    /// ```
    ///
    /// Blank lines and lines starting with `#` are ignored.
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut name = None;
        let mut size = None;
        let mut player_spawn = None;
        let mut walls = Vec::new();
        let mut obstacles = Vec::new();
        let mut spawns = Vec::new();

        for (index, raw) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let Some(directive) = parts.next() else {
                continue;
            };
            let args: Vec<&str> = parts.collect();

            match directive {
                "room" => {
                    if name.is_some() {
                        return Err(format!("line {line_no}: multiple room names"));
                    }
                    let [room_name] = args.as_slice() else {
                        return Err(format!("line {line_no}: expected a single room name"));
                    };
                    name = Some(room_name.to_string());
                }
                "size" => {
                    let [width, height] = numbers(&args, line_no)?;
                    if width <= 0.0 || height <= 0.0 {
                        return Err(format!("line {line_no}: room size must be positive"));
                    }
                    size = Some(Vec2::new(width, height));
                }
                "player" => {
                    if player_spawn.is_some() {
                        return Err(format!("line {line_no}: multiple player spawns"));
                    }
                    let [x, y] = numbers(&args, line_no)?;
                    player_spawn = Some(Vec2::new(x, y));
                }
                "wall" | "obstacle" => {
                    let [x, y, width, height] = numbers(&args, line_no)?;
                    let rect = Rect::new(x, y, width, height);
                    if directive == "wall" {
                        walls.push(rect);
                    } else {
                        obstacles.push(rect);
                    }
                }
                "spawn" => {
                    let Some((label, coords)) = args.split_first() else {
                        return Err(format!("line {line_no}: spawn needs a kind"));
                    };
                    let kind = AgentKind::from_label(label)
                        .ok_or_else(|| format!("line {line_no}: unknown agent kind '{label}'"))?;
                    let [x, y] = numbers(coords, line_no)?;
                    spawns.push(EnemySpawn {
                        kind,
                        position: Vec2::new(x, y),
                    });
                }
                other => return Err(format!("line {line_no}: unknown directive '{other}'")),
            }
        }

        let name = name.ok_or("No room name")?;
        let size = size.ok_or("No room size")?;
        let player_spawn = player_spawn.ok_or("No player spawn")?;

        let inside = |p: Vec2| p.x >= 0.0 && p.y >= 0.0 && p.x <= size.x && p.y <= size.y;
        if !inside(player_spawn) {
            return Err(format!("Player spawn {player_spawn} is outside the room"));
        }
        if let Some(spawn) = spawns.iter().find(|s| !inside(s.position)) {
            return Err(format!(
                "{} spawn {} is outside the room",
                spawn.kind.label(),
                spawn.position
            ));
        }

        Ok(Self {
            name,
            width: size.x,
            height: size.y,
            player_spawn,
            walls,
            obstacles,
            spawns,
        })
    }

    /// A closed, empty arena. Used when a template cannot be loaded.
    pub fn arena(name: &str, width: f32, height: f32) -> Self {
        Self {
            name: name.to_string(),
            width,
            height,
            player_spawn: Vec2::new(width / 2.0, height / 2.0),
            walls: vec![
                Rect::new(0.0, 0.0, width, ARENA_WALL),
                Rect::new(0.0, height - ARENA_WALL, width, ARENA_WALL),
                Rect::new(0.0, 0.0, ARENA_WALL, height),
                Rect::new(width - ARENA_WALL, 0.0, ARENA_WALL, height),
            ],
            obstacles: Vec::new(),
            spawns: Vec::new(),
        }
    }

    /// Planner view of the room: walls and obstacles are both blocking.
    pub fn geometry(&self, room_id: u32) -> RoomGeometry {
        RoomGeometry {
            room_id,
            width: self.width,
            height: self.height,
            obstacles: self.walls.iter().chain(&self.obstacles).copied().collect(),
        }
    }
}

fn numbers<const N: usize>(args: &[&str], line_no: usize) -> Result<[f32; N], String> {
    if args.len() != N {
        return Err(format!(
            "line {line_no}: expected {N} numbers, found {}",
            args.len()
        ));
    }
    let mut out = [0.0; N];
    for (slot, arg) in out.iter_mut().zip(args) {
        *slot = arg
            .parse()
            .map_err(|_| format!("line {line_no}: invalid number '{arg}'"))?;
    }
    Ok(out)
}

pub fn template_names() -> impl Iterator<Item = &'static str> {
    TEMPLATE_SOURCES.iter().map(|(name, _)| *name)
}

pub fn load_template(name: &str) -> Result<RoomTemplate, String> {
    let (_, source) = TEMPLATE_SOURCES
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .ok_or_else(|| format!("Unknown room template '{name}'"))?;
    RoomTemplate::parse(source)
}

// ---------------------------------------------------------------------------
// Coordinates
// ---------------------------------------------------------------------------

/// Room space (y-down, top-left origin) to world space (y-up, centred).
pub fn room_to_world(point: Vec2, width: f32, height: f32) -> Vec2 {
    Vec2::new(point.x - width / 2.0, height / 2.0 - point.y)
}

pub fn world_to_room(point: Vec2, width: f32, height: f32) -> Vec2 {
    Vec2::new(point.x + width / 2.0, height / 2.0 - point.y)
}

// ---------------------------------------------------------------------------
// Resources and components
// ---------------------------------------------------------------------------

/// The room currently in play.
#[derive(Resource, Debug, Clone)]
pub struct RoomLayout {
    pub template: RoomTemplate,
    pub geometry: Arc<RoomGeometry>,
}

impl RoomLayout {
    pub fn new(template: RoomTemplate, room_id: u32) -> Self {
        let geometry = Arc::new(template.geometry(room_id));
        Self { template, geometry }
    }

    pub fn size(&self) -> Vec2 {
        Vec2::new(self.template.width, self.template.height)
    }

    pub fn to_world(&self, point: Vec2) -> Vec2 {
        room_to_world(point, self.template.width, self.template.height)
    }

    pub fn to_room(&self, point: Vec2) -> Vec2 {
        world_to_room(point, self.template.width, self.template.height)
    }
}

/// Marker for everything that belongs to the current room.
#[derive(Component, Debug)]
pub struct RoomEntity;

#[derive(Resource, Deref, DerefMut)]
pub struct RoomIntroTimer(pub Timer);

#[derive(Resource, Deref, DerefMut)]
pub struct RoomClearedTimer(pub Timer);

// ---------------------------------------------------------------------------
// Systems
// ---------------------------------------------------------------------------

fn update_room_config(
    mut commands: Commands,
    sequence: Res<RoomSequence>,
    index: Res<RoomIndex>,
    difficulty: Res<Difficulty>,
    mut next_app: ResMut<NextState<AppState>>,
) {
    match room_config(&sequence, index.0, *difficulty) {
        Some(config) => commands.insert_resource(config),
        None => {
            error!("room index {} is past the end of the run", index.0);
            next_app.set(AppState::GameOver);
        }
    }
}

/// Build the layout for the configured room and spawn its static geometry.
pub fn load_room(mut commands: Commands, config: Option<Res<RoomConfig>>) {
    span_scope!("room_load");
    let Some(config) = config else { return };

    let template = load_template(&config.template).unwrap_or_else(|e| {
        error!("failed to load room {}: {}", config.template, e);
        RoomTemplate::arena(&config.template, ROOM_WIDTH, ROOM_HEIGHT)
    });
    let layout = RoomLayout::new(template, config.room_id);

    for wall in &layout.template.walls {
        spawn_block(&mut commands, &layout, wall, WALL_COLOR, Wall);
    }
    for obstacle in &layout.template.obstacles {
        spawn_block(&mut commands, &layout, obstacle, OBSTACLE_COLOR, Obstacle);
    }

    info!(
        "room loaded: {} (id {}, {} spawns)",
        layout.template.name,
        config.room_id,
        layout.template.spawns.len()
    );
    commands.insert_resource(layout);
}

fn spawn_block(
    commands: &mut Commands,
    layout: &RoomLayout,
    rect: &Rect,
    color: Color,
    marker: impl Component,
) {
    let center = layout.to_world(rect.center());
    let size = Vec2::new(rect.width, rect.height);
    commands.spawn((
        marker,
        RoomEntity,
        RigidBody::Static,
        Collider::rectangle(size.x, size.y),
        Sprite::from_color(color, size),
        Transform::from_xyz(center.x, center.y, 0.0),
    ));
}

fn start_room_intro_timer(mut commands: Commands) {
    commands.insert_resource(RoomIntroTimer(Timer::from_seconds(
        INTRO_SECS,
        TimerMode::Once,
    )));
}

fn room_intro_delay(
    time: Res<Time>,
    timer: Option<ResMut<RoomIntroTimer>>,
    mut next_state: ResMut<NextState<PlayingState>>,
) {
    let Some(mut timer) = timer else { return };
    timer.tick(time.delta());
    if timer.just_finished() {
        next_state.set(PlayingState::Playing);
    }
}

/// The room is cleared once its wave is exhausted and no enemy remains.
fn check_room_cleared(
    wave: Option<Res<SpawnWave>>,
    enemies: Query<(), With<Enemy>>,
    mut next_state: ResMut<NextState<PlayingState>>,
) {
    if wave.is_some_and(|wave| !wave.is_exhausted()) {
        return;
    }
    if !enemies.is_empty() {
        return;
    }
    next_state.set(PlayingState::RoomCleared);
}

fn on_room_cleared(
    mut commands: Commands,
    config: Option<Res<RoomConfig>>,
    mut stats: ResMut<GameStats>,
    mut next_app: ResMut<NextState<AppState>>,
) {
    stats.rooms_cleared += 1;
    imetric!("rooms_cleared", "count", stats.rooms_cleared as u64);

    let (name, is_final) = config
        .as_ref()
        .map(|c| (c.template.as_str(), c.is_final))
        .unwrap_or(("?", false));
    info!("room cleared: {} ({} so far)", name, stats.rooms_cleared);

    if is_final {
        stats.outcome = Some(RunOutcome::Victory);
        next_app.set(AppState::GameOver);
        return;
    }
    commands.insert_resource(RoomClearedTimer(Timer::from_seconds(
        CLEARED_SECS,
        TimerMode::Once,
    )));
}

fn room_cleared_delay(
    time: Res<Time>,
    timer: Option<ResMut<RoomClearedTimer>>,
    mut next_state: ResMut<NextState<PlayingState>>,
) {
    let Some(mut timer) = timer else { return };
    timer.tick(time.delta());
    if timer.just_finished() {
        next_state.set(PlayingState::RoomTransition);
    }
}

fn clear_room(
    commands: &mut Commands,
    query: &mut Query<(Entity, Option<&mut EnemyBrain>), With<RoomEntity>>,
) {
    for (entity, brain) in query.iter_mut() {
        if let Some(mut brain) = brain {
            brain.0.destroy();
        }
        commands.entity(entity).despawn();
    }
    commands.remove_resource::<RoomLayout>();
    commands.remove_resource::<RoomConfig>();
    commands.remove_resource::<RoomIntroTimer>();
    commands.remove_resource::<RoomClearedTimer>();
}

fn despawn_room_entities(
    mut commands: Commands,
    mut query: Query<(Entity, Option<&mut EnemyBrain>), With<RoomEntity>>,
) {
    clear_room(&mut commands, &mut query);
}

fn cleanup_on_exit_game(
    mut commands: Commands,
    mut query: Query<(Entity, Option<&mut EnemyBrain>), With<RoomEntity>>,
) {
    clear_room(&mut commands, &mut query);
}

/// Move to the next room in the sequence and replay its intro.
fn advance_room(mut index: ResMut<RoomIndex>, mut next_state: ResMut<NextState<PlayingState>>) {
    index.0 += 1;
    next_state.set(PlayingState::RoomIntro);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
