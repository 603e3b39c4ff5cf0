//! Frame-level telemetry: wraps the game loop with Micromegas instrumentation.

use bevy::prelude::*;
use micromegas_tracing::prelude::{fmetric, imetric, span_scope};

use crate::components::Enemy;

pub struct TelemetryPlugin;

impl Plugin for TelemetryPlugin {
    fn build(&self, app: &mut App) {
        app.configure_sets(
            Update,
            (
                GameSet::Player,
                GameSet::Enemies,
                GameSet::Combat,
                GameSet::Cleanup,
                GameSet::Presentation,
            )
                .chain(),
        );
        app.add_systems(Last, frame_telemetry);
    }
}

/// Per-frame ordering of gameplay systems.
#[derive(SystemSet, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameSet {
    Player,
    Enemies,
    Combat,
    Cleanup,
    Presentation,
}

fn frame_telemetry(time: Res<Time>, enemies: Query<(), With<Enemy>>) {
    span_scope!("frame");
    let dt_ms = time.delta_secs_f64() * 1000.0;
    fmetric!("frame_time_ms", "ms", dt_ms);
    imetric!("enemies_alive", "count", enemies.iter().count() as u64);
}
