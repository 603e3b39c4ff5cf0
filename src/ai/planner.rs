//! Grid planner: rasterises room obstacles into a walkability grid and runs
//! 8-directional A* over it.
//!
//! The grid is rebuilt lazily and only when its key (room size, cell size,
//! obstacle count, room id) changes. Searches are bounded by an iteration
//! budget; when the goal is not reached the planner returns the path to the
//! closest node it expanded instead of failing.

use std::f32::consts::SQRT_2;

use bevy::math::Vec2;
use micromegas_tracing::prelude::*;
use pathfinding::matrix::Matrix;
use serde::Deserialize;

use super::Rect;

/// Ordered world-space waypoints. Empty means "no route" or "already there".
pub type Path = Vec<Vec2>;

/// First waypoint is dropped when it sits within this fraction of a cell of
/// the start position.
const START_TRIM_FRACTION: f32 = 0.35;
/// The exact end point replaces the last cell centre when closer than this
/// fraction of a cell; otherwise it is appended.
const END_MERGE_FRACTION: f32 = 0.25;

/// (dx, dy, cost). Orthogonal steps first; the order is part of the
/// tie-break behaviour.
const NEIGHBOR_STEPS: [(i32, i32, f32); 8] = [
    (1, 0, 1.0),
    (-1, 0, 1.0),
    (0, 1, 1.0),
    (0, -1, 1.0),
    (1, 1, SQRT_2),
    (1, -1, SQRT_2),
    (-1, 1, SQRT_2),
    (-1, -1, SQRT_2),
];

/// Static geometry of one room instance, supplied by the level layer.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomGeometry {
    pub room_id: u32,
    pub width: f32,
    pub height: f32,
    pub obstacles: Vec<Rect>,
}

impl RoomGeometry {
    /// A room with no obstacles at all.
    pub fn open(room_id: u32, width: f32, height: f32) -> Self {
        Self {
            room_id,
            width,
            height,
            obstacles: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Side of one grid cell in world units.
    pub cell_size: f32,
    /// Padding added around every obstacle before rasterising.
    pub clearance: f32,
    /// Lower bound of the A* iteration budget; the effective budget is
    /// `max(max_iterations, 4 * cell_count)`.
    pub max_iterations: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            cell_size: 32.0,
            clearance: 6.0,
            max_iterations: 8000,
        }
    }
}

/// Grid coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cell {
    pub col: i32,
    pub row: i32,
}

/// Counters for diagnostics. They never influence planning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlannerStats {
    pub searches: u32,
    pub grid_rebuilds: u32,
    pub partial_paths: u32,
    pub unreachable: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct GridKey {
    width: f32,
    height: f32,
    cell_size: f32,
    obstacle_count: usize,
    room_id: u32,
}

impl GridKey {
    fn of(room: &RoomGeometry, config: &PlannerConfig) -> Self {
        Self {
            width: room.width,
            height: room.height,
            cell_size: config.cell_size,
            obstacle_count: room.obstacles.len(),
            room_id: room.room_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Walkability grid
// ---------------------------------------------------------------------------

struct WalkGrid {
    cols: usize,
    rows: usize,
    /// Indexed by (row, col).
    blocked: Matrix<bool>,
    width: f32,
    height: f32,
    cell_size: f32,
}

impl WalkGrid {
    fn build(room: &RoomGeometry, config: &PlannerConfig) -> Self {
        let cell_size = config.cell_size.max(1.0);
        let cols = ((room.width / cell_size).ceil() as usize).max(1);
        let rows = ((room.height / cell_size).ceil() as usize).max(1);
        let mut blocked = Matrix::new(rows, cols, false);

        for obstacle in &room.obstacles {
            let rect = obstacle.padded(config.clearance);
            let start_col = clamp_index((rect.x / cell_size).floor(), cols);
            let end_col = clamp_index(((rect.x + rect.width) / cell_size).floor(), cols);
            let start_row = clamp_index((rect.y / cell_size).floor(), rows);
            let end_row = clamp_index(((rect.y + rect.height) / cell_size).floor(), rows);

            for row in start_row..=end_row {
                for col in start_col..=end_col {
                    let cell_rect = Rect::new(
                        col as f32 * cell_size,
                        row as f32 * cell_size,
                        cell_size,
                        cell_size,
                    );
                    if cell_rect.overlaps(&rect) {
                        blocked[(row, col)] = true;
                    }
                }
            }
        }

        Self {
            cols,
            rows,
            blocked,
            width: room.width,
            height: room.height,
            cell_size,
        }
    }

    fn is_walkable(&self, col: i32, row: i32) -> bool {
        if col < 0 || row < 0 || col as usize >= self.cols || row as usize >= self.rows {
            return false;
        }
        !self.blocked[(row as usize, col as usize)]
    }

    fn index(&self, cell: Cell) -> usize {
        cell.row as usize * self.cols + cell.col as usize
    }

    fn cell_at(&self, index: usize) -> Cell {
        Cell {
            col: (index % self.cols) as i32,
            row: (index / self.cols) as i32,
        }
    }

    fn world_to_cell(&self, point: Vec2) -> Cell {
        let x = point.x.max(0.0).min((self.width - 1.0).max(0.0));
        let y = point.y.max(0.0).min((self.height - 1.0).max(0.0));
        Cell {
            col: clamp_index((x / self.cell_size).floor(), self.cols) as i32,
            row: clamp_index((y / self.cell_size).floor(), self.rows) as i32,
        }
    }

    fn cell_to_world(&self, cell: Cell) -> Vec2 {
        let half = self.cell_size * 0.5;
        Vec2::new(
            (cell.col as f32 * self.cell_size + half).clamp(0.0, self.width.max(0.0)),
            (cell.row as f32 * self.cell_size + half).clamp(0.0, self.height.max(0.0)),
        )
    }

    /// Expanding Chebyshev-ring search for the closest walkable cell.
    fn nearest_walkable(&self, cell: Cell) -> Option<Cell> {
        if self.is_walkable(cell.col, cell.row) {
            return Some(cell);
        }
        let max_radius = self.cols.max(self.rows) as i32;
        for radius in 1..max_radius {
            for dx in -radius..=radius {
                let col = cell.col + dx;
                if self.is_walkable(col, cell.row + radius) {
                    return Some(Cell { col, row: cell.row + radius });
                }
                if self.is_walkable(col, cell.row - radius) {
                    return Some(Cell { col, row: cell.row - radius });
                }
            }
            for dy in (-radius + 1)..radius {
                let row = cell.row + dy;
                if self.is_walkable(cell.col + radius, row) {
                    return Some(Cell { col: cell.col + radius, row });
                }
                if self.is_walkable(cell.col - radius, row) {
                    return Some(Cell { col: cell.col - radius, row });
                }
            }
        }
        None
    }

    /// Walkable neighbours. A diagonal is only allowed when both orthogonal
    /// cells it passes between are walkable.
    fn neighbors(&self, cell: Cell) -> impl Iterator<Item = (Cell, f32)> + '_ {
        NEIGHBOR_STEPS.iter().filter_map(move |&(dx, dy, cost)| {
            let col = cell.col + dx;
            let row = cell.row + dy;
            if !self.is_walkable(col, row) {
                return None;
            }
            if dx != 0
                && dy != 0
                && (!self.is_walkable(cell.col + dx, cell.row)
                    || !self.is_walkable(cell.col, cell.row + dy))
            {
                return None;
            }
            Some((Cell { col, row }, cost))
        })
    }
}

fn clamp_index(value: f32, len: usize) -> usize {
    if value <= 0.0 {
        0
    } else {
        (value as usize).min(len - 1)
    }
}

/// Octile distance in grid units.
pub fn octile(a: Cell, b: Cell) -> f32 {
    let dx = (a.col - b.col).unsigned_abs() as f32;
    let dy = (a.row - b.row).unsigned_abs() as f32;
    let min = dx.min(dy);
    let max = dx.max(dy);
    SQRT_2 * min + (max - min)
}

struct SearchOutcome {
    reached: bool,
    target: usize,
    came_from: Vec<Option<usize>>,
}

/// A* with a linearly scanned open list. On equal f-scores the earliest
/// inserted node wins.
fn search(grid: &WalkGrid, start: Cell, goal: Cell, max_iterations: usize) -> SearchOutcome {
    let total = grid.cols * grid.rows;
    let mut g_score = vec![f32::INFINITY; total];
    let mut f_score = vec![f32::INFINITY; total];
    let mut came_from: Vec<Option<usize>> = vec![None; total];
    let mut in_open = vec![false; total];
    let mut closed = vec![false; total];
    let mut open: Vec<usize> = Vec::new();

    let start_idx = grid.index(start);
    let goal_idx = grid.index(goal);

    g_score[start_idx] = 0.0;
    f_score[start_idx] = octile(start, goal);
    open.push(start_idx);
    in_open[start_idx] = true;

    let mut closest_idx = start_idx;
    let mut closest_h = octile(start, goal);
    let budget = max_iterations.max(total * 4);
    let mut iterations = 0;

    while !open.is_empty() && iterations < budget {
        iterations += 1;

        let mut best = 0;
        for i in 1..open.len() {
            if f_score[open[i]] < f_score[open[best]] {
                best = i;
            }
        }
        let current = open.remove(best);
        in_open[current] = false;

        if current == goal_idx {
            return SearchOutcome {
                reached: true,
                target: goal_idx,
                came_from,
            };
        }

        closed[current] = true;
        let cell = grid.cell_at(current);
        let h = octile(cell, goal);
        if h < closest_h {
            closest_h = h;
            closest_idx = current;
        }

        for (next, cost) in grid.neighbors(cell) {
            let next_idx = grid.index(next);
            if closed[next_idx] {
                continue;
            }
            let tentative = g_score[current] + cost;
            if tentative >= g_score[next_idx] {
                continue;
            }
            came_from[next_idx] = Some(current);
            g_score[next_idx] = tentative;
            f_score[next_idx] = tentative + octile(next, goal);
            if !in_open[next_idx] {
                open.push(next_idx);
                in_open[next_idx] = true;
            }
        }
    }

    SearchOutcome {
        reached: false,
        target: closest_idx,
        came_from,
    }
}

// ---------------------------------------------------------------------------
// Planner
// ---------------------------------------------------------------------------

/// One planner per agent. It owns its grid outright, so agents never share
/// cache state.
pub struct GridPlanner {
    config: PlannerConfig,
    grid: Option<WalkGrid>,
    key: Option<GridKey>,
    stats: PlannerStats,
}

impl Default for GridPlanner {
    fn default() -> Self {
        Self::new(PlannerConfig::default())
    }
}

impl GridPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self {
            config,
            grid: None,
            key: None,
            stats: PlannerStats::default(),
        }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn stats(&self) -> PlannerStats {
        self.stats
    }

    /// Plan from `start` to `end` through `room`.
    ///
    /// Returns a single-point path `[end]` when both land in the same cell,
    /// an empty path when either endpoint has no walkable cell nearby, and a
    /// best-effort partial path when the goal cannot be reached.
    #[span_fn]
    pub fn find_path(&mut self, room: &RoomGeometry, start: Vec2, end: Vec2) -> Path {
        if !start.is_finite() || !end.is_finite() {
            return Vec::new();
        }

        self.ensure_grid(room);
        self.stats.searches += 1;
        let Some(grid) = self.grid.as_ref() else {
            return Vec::new();
        };

        let start_node = grid.nearest_walkable(grid.world_to_cell(start));
        let end_node = grid.nearest_walkable(grid.world_to_cell(end));
        let (Some(start_node), Some(end_node)) = (start_node, end_node) else {
            self.stats.unreachable += 1;
            return Vec::new();
        };

        if start_node == end_node {
            return vec![end];
        }

        let outcome = search(grid, start_node, end_node, self.config.max_iterations);
        let start_idx = grid.index(start_node);
        if outcome.target == start_idx {
            self.stats.unreachable += 1;
            return Vec::new();
        }
        if !outcome.reached {
            self.stats.partial_paths += 1;
        }

        let end_pos = outcome.reached.then_some(end);
        reconstruct(grid, &outcome, start_idx, start, end_pos)
    }

    /// Whether `point` falls in a walkable cell of `room`'s grid.
    pub fn is_walkable_at(&mut self, room: &RoomGeometry, point: Vec2) -> bool {
        self.ensure_grid(room);
        self.grid.as_ref().is_some_and(|grid| {
            let cell = grid.world_to_cell(point);
            grid.is_walkable(cell.col, cell.row)
        })
    }

    /// Grid cell containing `point` (clamped into the room).
    pub fn cell_of(&mut self, room: &RoomGeometry, point: Vec2) -> Cell {
        self.ensure_grid(room);
        self.grid
            .as_ref()
            .map(|grid| grid.world_to_cell(point))
            .unwrap_or(Cell { col: 0, row: 0 })
    }

    /// Copy of the walkability table, `true` meaning walkable, indexed by
    /// (row, col).
    pub fn walkable_matrix(&mut self, room: &RoomGeometry) -> Matrix<bool> {
        self.ensure_grid(room);
        match self.grid.as_ref() {
            Some(grid) => grid.blocked.clone().map(|blocked| !blocked),
            None => Matrix::new(1, 1, true),
        }
    }

    fn ensure_grid(&mut self, room: &RoomGeometry) {
        let key = GridKey::of(room, &self.config);
        if self.grid.is_some() && self.key == Some(key) {
            return;
        }
        let grid = WalkGrid::build(room, &self.config);
        debug!(
            "planner grid rebuilt: room={} cells={}x{} obstacles={}",
            room.room_id,
            grid.cols,
            grid.rows,
            room.obstacles.len()
        );
        self.grid = Some(grid);
        self.key = Some(key);
        self.stats.grid_rebuilds += 1;
    }
}

fn reconstruct(
    grid: &WalkGrid,
    outcome: &SearchOutcome,
    start_idx: usize,
    start: Vec2,
    end: Option<Vec2>,
) -> Path {
    let mut indices = Vec::new();
    let mut current = Some(outcome.target);
    while let Some(idx) = current {
        if idx == start_idx {
            break;
        }
        indices.push(idx);
        current = outcome.came_from[idx];
    }
    indices.reverse();

    let mut points: Path = indices
        .into_iter()
        .map(|idx| grid.cell_to_world(grid.cell_at(idx)))
        .collect();

    if let Some(end) = end {
        let merge_last = points
            .last()
            .is_some_and(|last| last.distance(end) < grid.cell_size * END_MERGE_FRACTION);
        match points.last_mut() {
            Some(last) if merge_last => *last = end,
            _ => points.push(end),
        }
    }

    if points.len() > 1 && points[0].distance(start) < grid.cell_size * START_TRIM_FRACTION {
        points.remove(0);
    }

    points
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pathfinding::prelude::bfs_reach;

    fn open_room() -> RoomGeometry {
        RoomGeometry::open(1, 1280.0, 720.0)
    }

    /// Solid square ring with no gap, centred on (600, 360).
    fn ringed_room() -> RoomGeometry {
        RoomGeometry {
            room_id: 2,
            width: 1280.0,
            height: 720.0,
            obstacles: vec![
                Rect::new(500.0, 260.0, 200.0, 20.0),
                Rect::new(500.0, 440.0, 200.0, 20.0),
                Rect::new(500.0, 260.0, 20.0, 200.0),
                Rect::new(680.0, 260.0, 20.0, 200.0),
            ],
        }
    }

    fn cluttered_room() -> RoomGeometry {
        RoomGeometry {
            room_id: 3,
            width: 1280.0,
            height: 720.0,
            obstacles: vec![
                Rect::new(0.0, 0.0, 1280.0, 20.0),
                Rect::new(0.0, 700.0, 1280.0, 20.0),
                Rect::new(300.0, 150.0, 80.0, 80.0),
                Rect::new(600.0, 500.0, 80.0, 80.0),
                Rect::new(900.0, 300.0, 80.0, 80.0),
                Rect::new(400.0, 100.0, 40.0, 450.0),
            ],
        }
    }

    fn exact_config() -> PlannerConfig {
        PlannerConfig {
            clearance: 0.0,
            ..PlannerConfig::default()
        }
    }

    #[test]
    fn open_room_path_reaches_exact_target() {
        let mut planner = GridPlanner::default();
        let path = planner.find_path(&open_room(), Vec2::new(10.0, 10.0), Vec2::new(200.0, 200.0));
        assert!(!path.is_empty());
        assert_eq!(*path.last().unwrap(), Vec2::new(200.0, 200.0));
    }

    #[test]
    fn same_cell_returns_single_end_point() {
        let mut planner = GridPlanner::default();
        let end = Vec2::new(20.0, 20.0);
        let path = planner.find_path(&open_room(), Vec2::new(5.0, 5.0), end);
        assert_eq!(path, vec![end]);
    }

    #[test]
    fn repeated_searches_are_deterministic() {
        let room = cluttered_room();
        let start = Vec2::new(100.0, 400.0);
        let end = Vec2::new(1100.0, 200.0);

        let mut planner = GridPlanner::default();
        let first = planner.find_path(&room, start, end);
        let second = planner.find_path(&room, start, end);
        let fresh = GridPlanner::default().find_path(&room, start, end);

        assert!(!first.is_empty());
        assert_eq!(first, second);
        assert_eq!(first, fresh);
    }

    #[test]
    fn grid_rebuilds_only_when_key_changes() {
        let mut planner = GridPlanner::default();
        let mut room = open_room();
        let a = Vec2::new(10.0, 10.0);
        let b = Vec2::new(400.0, 300.0);

        planner.find_path(&room, a, b);
        planner.find_path(&room, b, a);
        assert_eq!(planner.stats().grid_rebuilds, 1);

        room.room_id = 7;
        planner.find_path(&room, a, b);
        assert_eq!(planner.stats().grid_rebuilds, 2);

        room.obstacles.push(Rect::new(100.0, 100.0, 50.0, 50.0));
        planner.find_path(&room, a, b);
        assert_eq!(planner.stats().grid_rebuilds, 3);
        assert_eq!(planner.stats().searches, 4);
    }

    #[test]
    fn obstacles_are_avoided() {
        let room = cluttered_room();
        let mut planner = GridPlanner::default();
        let path = planner.find_path(&room, Vec2::new(100.0, 300.0), Vec2::new(700.0, 300.0));
        assert!(!path.is_empty());
        for point in &path[..path.len() - 1] {
            assert!(planner.is_walkable_at(&room, *point), "waypoint {point:?} is blocked");
        }
    }

    #[test]
    fn enclosed_target_yields_partial_path_on_walkable_cells() {
        let room = ringed_room();
        let mut planner = GridPlanner::default();
        let start = Vec2::new(100.0, 100.0);
        let end = Vec2::new(600.0, 360.0);

        // Independent oracle: the goal cell is not reachable on this grid.
        let walkable = planner.walkable_matrix(&room);
        let start_cell = planner.cell_of(&room, start);
        let goal_cell = planner.cell_of(&room, end);
        let reach: Vec<(usize, usize)> = bfs_reach(
            (start_cell.row as usize, start_cell.col as usize),
            |&(r, c)| {
                walkable
                    .neighbours((r, c), false)
                    .filter(|&n| walkable[n])
                    .collect::<Vec<_>>()
            },
        )
        .collect();
        assert!(!reach.contains(&(goal_cell.row as usize, goal_cell.col as usize)));

        let path = planner.find_path(&room, start, end);
        assert!(!path.contains(&end));
        for point in &path {
            assert!(planner.is_walkable_at(&room, *point), "waypoint {point:?} is blocked");
        }
        assert_eq!(planner.stats().partial_paths, 1);
    }

    #[test]
    fn diagonal_never_cuts_between_blocked_shoulders() {
        // Two blocks touching only at a corner: cells (3,3) and (4,4).
        let room = RoomGeometry {
            room_id: 4,
            width: 320.0,
            height: 320.0,
            obstacles: vec![
                Rect::new(96.0, 96.0, 32.0, 32.0),
                Rect::new(128.0, 128.0, 32.0, 32.0),
            ],
        };
        let mut planner = GridPlanner::new(exact_config());
        let start = Vec2::new(112.0, 144.0);
        let end = Vec2::new(144.0, 112.0);
        let path = planner.find_path(&room, start, end);

        assert!(path.len() >= 2, "expected a detour, got {path:?}");
        assert_eq!(*path.last().unwrap(), end);

        let mut previous = planner.cell_of(&room, start);
        for point in &path {
            let cell = planner.cell_of(&room, *point);
            let dx = cell.col - previous.col;
            let dy = cell.row - previous.row;
            if dx != 0 && dy != 0 {
                let shoulder_a = Vec2::new(
                    (previous.col + dx) as f32 * 32.0 + 16.0,
                    previous.row as f32 * 32.0 + 16.0,
                );
                let shoulder_b = Vec2::new(
                    previous.col as f32 * 32.0 + 16.0,
                    (previous.row + dy) as f32 * 32.0 + 16.0,
                );
                assert!(planner.is_walkable_at(&room, shoulder_a));
                assert!(planner.is_walkable_at(&room, shoulder_b));
            }
            previous = cell;
        }
    }

    #[test]
    fn blocked_start_snaps_to_nearest_walkable_cell() {
        let room = RoomGeometry {
            room_id: 5,
            width: 640.0,
            height: 640.0,
            obstacles: vec![Rect::new(200.0, 200.0, 100.0, 100.0)],
        };
        let mut planner = GridPlanner::default();
        let inside = Vec2::new(250.0, 250.0);
        assert!(!planner.is_walkable_at(&room, inside));

        let path = planner.find_path(&room, inside, Vec2::new(500.0, 500.0));
        assert!(!path.is_empty());
        assert!(planner.is_walkable_at(&room, path[0]));
        assert_eq!(*path.last().unwrap(), Vec2::new(500.0, 500.0));
    }

    #[test]
    fn end_point_close_to_cell_centre_replaces_it() {
        let mut planner = GridPlanner::default();
        // Cell (6,6) has its centre at (208, 208).
        let end = Vec2::new(206.0, 206.0);
        let path = planner.find_path(&open_room(), Vec2::new(16.0, 16.0), end);
        assert_eq!(*path.last().unwrap(), end);
        assert!(!path.contains(&Vec2::new(208.0, 208.0)));
    }

    #[test]
    fn fully_blocked_room_is_unreachable() {
        let room = RoomGeometry {
            room_id: 6,
            width: 128.0,
            height: 128.0,
            obstacles: vec![Rect::new(0.0, 0.0, 128.0, 128.0)],
        };
        let mut planner = GridPlanner::default();
        let path = planner.find_path(&room, Vec2::new(10.0, 10.0), Vec2::new(100.0, 100.0));
        assert!(path.is_empty());
        assert_eq!(planner.stats().unreachable, 1);
    }

    #[test]
    fn non_finite_points_give_empty_path() {
        let mut planner = GridPlanner::default();
        let path = planner.find_path(&open_room(), Vec2::new(f32::NAN, 0.0), Vec2::ONE);
        assert!(path.is_empty());
    }

    #[test]
    fn octile_heuristic_mixes_diagonal_and_straight() {
        let a = Cell { col: 0, row: 0 };
        let b = Cell { col: 3, row: 1 };
        assert!((octile(a, b) - (SQRT_2 + 2.0)).abs() < 1e-5);
    }
}
