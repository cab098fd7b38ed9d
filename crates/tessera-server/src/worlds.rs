//! Built-in world catalog, tile grids and background animation state.
//!
//! Grid *rendering* is a client concern; the server only owns the logical
//! tile grid and the animation state machines that mutate it. Actual maze
//! generation is external: the regenerating world takes its grid from a
//! pluggable [`GridSource`].

use rand::Rng;

use tessera_proto::command::{Grid, TileUpdate};

pub const WORLD_WIDTH: usize = 30;
pub const WORLD_HEIGHT: usize = 20;
pub const LOBBY_WIDTH: usize = 16;
pub const LOBBY_HEIGHT: usize = 12;

pub const GROUND_TILE: &str = "tile";
pub const ROCK_TILE: &str = "rock";
pub const WATER_TILE: &str = "Dwatertile";
pub const COIN_TILE: &str = "coin";

/// Produces a fresh logical grid for a world; the regenerating world calls
/// this again whenever its membership returns to the single remaining member.
pub type GridSource = fn(usize, usize) -> Grid;

/// Ground tiles inside a rock border.
pub fn base_grid(width: usize, height: usize) -> Grid {
    (0..height)
        .map(|row| {
            (0..width)
                .map(|col| {
                    if row == 0 || col == 0 || row == height - 1 || col == width - 1 {
                        ROCK_TILE.to_string()
                    } else {
                        GROUND_TILE.to_string()
                    }
                })
                .collect()
        })
        .collect()
}

/// Base grid with rocks scattered over roughly a fifth of the floor. Stands
/// in for an external maze generator while keeping the same regeneration
/// contract.
pub fn scattered_grid(width: usize, height: usize) -> Grid {
    let mut grid = base_grid(width, height);
    let mut rng = rand::thread_rng();
    for row in grid.iter_mut().take(height - 1).skip(1) {
        for cell in row.iter_mut().take(width - 1).skip(1) {
            if rng.gen_ratio(1, 5) {
                *cell = ROCK_TILE.to_string();
            }
        }
    }
    grid
}

/// Place a single coin on a random ground tile.
pub fn place_coin(grid: &mut Grid) {
    let mut rng = rand::thread_rng();
    let height = grid.len();
    let width = grid.first().map(Vec::len).unwrap_or(0);
    if width == 0 || height == 0 {
        return;
    }
    loop {
        let y = rng.gen_range(0..height);
        let x = rng.gen_range(0..width);
        if grid[y][x] == GROUND_TILE {
            grid[y][x] = COIN_TILE.to_string();
            return;
        }
    }
}

fn coin_grid(width: usize, height: usize) -> Grid {
    let mut grid = base_grid(width, height);
    place_coin(&mut grid);
    grid
}

fn water_row_grid(width: usize, height: usize) -> Grid {
    let mut grid = base_grid(width, height);
    let row = height / 2;
    for cell in grid[row].iter_mut().take(width - 1).skip(1) {
        *cell = WATER_TILE.to_string();
    }
    grid
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

pub struct WorldEntry {
    pub name: String,
    /// Regenerate the grid when membership drops back to one member
    pub regenerates: bool,
    pub grid_source: GridSource,
}

/// The static worlds created once at server start, in catalog order.
/// Occupancy and bot-count vectors on the wire follow this order.
pub struct WorldCatalog {
    entries: Vec<WorldEntry>,
    pub lobby: Grid,
}

impl WorldCatalog {
    pub fn builtin() -> Self {
        let entries = vec![
            WorldEntry {
                name: "LavaWorld".into(),
                regenerates: false,
                grid_source: coin_grid,
            },
            WorldEntry {
                name: "DesertWorld".into(),
                regenerates: false,
                grid_source: coin_grid,
            },
            WorldEntry {
                name: "OceanWorld".into(),
                regenerates: false,
                grid_source: coin_grid,
            },
            WorldEntry {
                name: "CaveWorld".into(),
                regenerates: false,
                grid_source: coin_grid,
            },
            WorldEntry {
                name: "PsychedelicWorld".into(),
                regenerates: true,
                grid_source: scattered_grid,
            },
            WorldEntry {
                name: "GrassWorld".into(),
                regenerates: false,
                grid_source: water_row_grid,
            },
            WorldEntry {
                name: "IceWorld".into(),
                regenerates: false,
                grid_source: base_grid,
            },
        ];
        Self {
            entries,
            lobby: base_grid(LOBBY_WIDTH, LOBBY_HEIGHT),
        }
    }

    pub fn entries(&self) -> &[WorldEntry] {
        &self.entries
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    pub fn entry(&self, name: &str) -> Option<&WorldEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn build_grid(&self, name: &str) -> Option<Grid> {
        self.entry(name)
            .map(|e| (e.grid_source)(WORLD_WIDTH, WORLD_HEIGHT))
    }
}

// ---------------------------------------------------------------------------
// Background animation state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Horizontal,
    Vertical,
}

/// A walker pacing a fixed track, one cell per tick, reversing at the
/// bounds. Mutation happens on the coordinator task; the tick only arrives
/// through the scheduler.
#[derive(Debug, Clone)]
pub struct PatrolState {
    pub axis: Axis,
    pub x: usize,
    pub y: usize,
    /// Track bounds along the axis, inclusive
    pub min: usize,
    pub max: usize,
    pub dir: i64,
    pub walker_tile_forward: String,
    pub walker_tile_reverse: String,
}

impl PatrolState {
    fn walker_tile(&self) -> &str {
        if self.dir > 0 {
            &self.walker_tile_forward
        } else {
            &self.walker_tile_reverse
        }
    }

    /// Advance one cell, restoring ground behind the walker. Returns the
    /// tile deltas to broadcast.
    pub fn step(&mut self, grid: &mut Grid) -> Vec<TileUpdate> {
        let mut updates = Vec::with_capacity(2);

        if let Some(cell) = cell_mut(grid, self.x, self.y) {
            *cell = GROUND_TILE.to_string();
            updates.push(TileUpdate {
                x: self.x,
                y: self.y,
                tile: GROUND_TILE.to_string(),
            });
        }

        let along = match self.axis {
            Axis::Horizontal => self.x as i64,
            Axis::Vertical => self.y as i64,
        };
        let mut next = along + self.dir;
        if next < self.min as i64 || next > self.max as i64 {
            self.dir = -self.dir;
            next = along + self.dir;
        }
        match self.axis {
            Axis::Horizontal => self.x = next as usize,
            Axis::Vertical => self.y = next as usize,
        }

        let tile = self.walker_tile().to_string();
        if let Some(cell) = cell_mut(grid, self.x, self.y) {
            *cell = tile.clone();
            updates.push(TileUpdate {
                x: self.x,
                y: self.y,
                tile,
            });
        }
        updates
    }
}

/// The patrol tracks for a world, if it has any.
pub fn patrols_for(name: &str) -> Vec<PatrolState> {
    if name != "IceWorld" {
        return Vec::new();
    }
    vec![
        PatrolState {
            axis: Axis::Horizontal,
            x: 5,
            y: 14,
            min: 1,
            max: 12,
            dir: 1,
            walker_tile_forward: "bearrightwalking".into(),
            walker_tile_reverse: "bearleftwalking".into(),
        },
        PatrolState {
            axis: Axis::Horizontal,
            x: 7,
            y: 4,
            min: 4,
            max: 19,
            dir: -1,
            walker_tile_forward: "bearrightwalking".into(),
            walker_tile_reverse: "bearleftwalking".into(),
        },
        PatrolState {
            axis: Axis::Vertical,
            x: 24,
            y: 2,
            min: 1,
            max: 11,
            dir: 1,
            walker_tile_forward: "beardownwalking".into(),
            walker_tile_reverse: "bearupwalking".into(),
        },
        PatrolState {
            axis: Axis::Vertical,
            x: 21,
            y: 15,
            min: 6,
            max: 17,
            dir: -1,
            walker_tile_forward: "beardownwalking".into(),
            walker_tile_reverse: "bearupwalking".into(),
        },
    ]
}

/// A three-tile boat drifting along a water row.
#[derive(Debug, Clone)]
pub struct BridgeState {
    pub row: usize,
    /// Column of the middle tile
    pub center: usize,
    pub min: usize,
    pub max: usize,
    pub dir: i64,
}

impl BridgeState {
    pub fn step(&mut self, grid: &mut Grid) -> Vec<TileUpdate> {
        let mut updates = Vec::with_capacity(6);

        for offset in -1..=1 {
            let col = (self.center as i64 + offset) as usize;
            if let Some(cell) = cell_mut(grid, col, self.row) {
                *cell = WATER_TILE.to_string();
                updates.push(TileUpdate {
                    x: col,
                    y: self.row,
                    tile: WATER_TILE.to_string(),
                });
            }
        }

        let mut next = self.center as i64 + self.dir;
        if next - 1 < self.min as i64 || next + 1 > self.max as i64 {
            self.dir = -self.dir;
            next = self.center as i64 + self.dir;
        }
        self.center = next as usize;

        let tiles = ["boatback", "boatmiddle", "boatfront"];
        for (i, offset) in (-1..=1).enumerate() {
            let col = (self.center as i64 + offset) as usize;
            let tile = tiles[i].to_string();
            if let Some(cell) = cell_mut(grid, col, self.row) {
                *cell = tile.clone();
                updates.push(TileUpdate {
                    x: col,
                    y: self.row,
                    tile,
                });
            }
        }
        updates
    }
}

pub fn bridge_for(name: &str) -> Option<BridgeState> {
    if name != "GrassWorld" {
        return None;
    }
    Some(BridgeState {
        row: WORLD_HEIGHT / 2,
        center: 22,
        min: 5,
        max: 24,
        dir: 1,
    })
}

fn cell_mut(grid: &mut Grid, x: usize, y: usize) -> Option<&mut String> {
    grid.get_mut(y)?.get_mut(x)
}
