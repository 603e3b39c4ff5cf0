use bevy::prelude::*;
use micromegas_tracing::prelude::*;

use super::rooms::RoomLayout;
use super::telemetry::GameSet;

pub struct CameraPlugin;

impl Plugin for CameraPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Startup, spawn_camera);
        app.add_systems(Update, fit_camera_to_room.in_set(GameSet::Presentation));
    }
}

const PADDING: f32 = 32.0;

fn spawn_camera(mut commands: Commands) {
    commands.spawn(Camera2d);
}

/// Orthographic scale that fits `content` plus padding inside `viewport`.
pub fn fit_scale(content: Vec2, viewport: Vec2) -> f32 {
    if viewport.x <= 0.0 || viewport.y <= 0.0 {
        return 1.0;
    }
    let padded = content + Vec2::splat(PADDING * 2.0);
    (padded.x / viewport.x).max(padded.y / viewport.y)
}

/// Scale the camera so the whole room is visible.
#[span_fn]
fn fit_camera_to_room(
    layout: Option<Res<RoomLayout>>,
    windows: Query<&Window>,
    mut cameras: Query<&mut Projection, With<Camera2d>>,
) {
    let Some(layout) = layout else { return };
    let Ok(window) = windows.single() else {
        return;
    };
    let Ok(mut projection) = cameras.single_mut() else {
        return;
    };

    let scale = fit_scale(layout.size(), Vec2::new(window.width(), window.height()));
    if let Projection::Orthographic(ref mut ortho) = *projection {
        ortho.scale = scale;
    }
}
