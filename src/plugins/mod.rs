pub mod camera;
pub mod combat;
pub mod enemies;
pub mod player;
pub mod rooms;
pub mod telemetry;
