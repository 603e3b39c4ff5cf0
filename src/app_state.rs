use bevy::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, States)]
pub enum AppState {
    #[default]
    InGame,
    GameOver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, SubStates)]
#[source(AppState = AppState::InGame)]
pub enum PlayingState {
    #[default]
    RoomIntro,
    Playing,
    RoomCleared,
    RoomTransition,
}
