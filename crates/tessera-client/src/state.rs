//! Client-side knowledge: what the server has told us so far.
//!
//! The rendering layer (out of scope here) reads from this; the session
//! writes to it as bootstrap and incremental updates arrive.

use std::collections::HashMap;

use tessera_proto::command::{Coordinates, Grid, OccupancyAction};

#[derive(Default)]
pub struct ClientState {
    /// Our identity string, assigned by the server after verification
    pub my_identity: Option<String>,

    /// World catalog, in server order
    pub worlds: Vec<String>,
    /// Worlds currently private (password-guarded)
    pub private_worlds: Vec<String>,
    /// Interactive occupancy per world, aligned with `worlds`
    pub occupancy: Vec<usize>,
    /// Bot counts per world, aligned with `worlds`
    pub bot_counts: Vec<usize>,
    pub lobby_layout: Grid,

    /// The world we are in, if any, and its logical grid
    pub current_world: Option<String>,
    pub world_grid: Option<Grid>,
    /// Positions of everyone in the current world
    pub positions: HashMap<String, Coordinates>,
}

impl ClientState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an occupancy delta broadcast from the server.
    pub fn apply_occupancy(&mut self, world: &str, action: OccupancyAction) {
        let Some(index) = self.worlds.iter().position(|name| name == world) else {
            return;
        };
        match action {
            OccupancyAction::JoinedClient => bump(&mut self.occupancy, index, 1),
            OccupancyAction::LeftClient => bump(&mut self.occupancy, index, -1),
            OccupancyAction::JoinedBot => bump(&mut self.bot_counts, index, 1),
            OccupancyAction::LeftBot => bump(&mut self.bot_counts, index, -1),
        }
    }

    /// Entering (or leaving, with an empty name) a world resets the local
    /// position map.
    pub fn enter_world(&mut self, world: &str, grid: Option<Grid>) {
        self.positions.clear();
        if world.is_empty() {
            self.current_world = None;
            self.world_grid = None;
        } else {
            self.current_world = Some(world.to_string());
            self.world_grid = grid;
        }
    }

    /// Last-write-wins position update.
    pub fn update_position(&mut self, identity: &str, position: Coordinates) {
        self.positions.insert(identity.to_string(), position);
    }

    pub fn remove_actor(&mut self, identity: &str) {
        self.positions.remove(identity);
    }

    /// Patch the current world grid with a tile delta.
    pub fn apply_tiles(&mut self, updates: &[tessera_proto::command::TileUpdate]) {
        let Some(grid) = self.world_grid.as_mut() else {
            return;
        };
        for update in updates {
            if let Some(cell) = grid.get_mut(update.y).and_then(|row| row.get_mut(update.x)) {
                *cell = update.tile.clone();
            }
        }
    }
}

fn bump(counts: &mut [usize], index: usize, delta: isize) {
    if let Some(count) = counts.get_mut(index) {
        *count = count.saturating_add_signed(delta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> ClientState {
        let mut state = ClientState::new();
        state.worlds = vec!["LavaWorld".into(), "CaveWorld".into()];
        state.occupancy = vec![0, 2];
        state.bot_counts = vec![0, 0];
        state
    }

    #[test]
    fn test_apply_occupancy() {
        let mut state = seeded();
        state.apply_occupancy("CaveWorld", OccupancyAction::JoinedClient);
        assert_eq!(state.occupancy, vec![0, 3]);
        state.apply_occupancy("CaveWorld", OccupancyAction::LeftClient);
        state.apply_occupancy("CaveWorld", OccupancyAction::LeftClient);
        state.apply_occupancy("CaveWorld", OccupancyAction::LeftClient);
        // never underflows
        assert_eq!(state.occupancy, vec![0, 0]);
        state.apply_occupancy("LavaWorld", OccupancyAction::JoinedBot);
        assert_eq!(state.bot_counts, vec![1, 0]);
    }

    #[test]
    fn test_unknown_world_ignored() {
        let mut state = seeded();
        state.apply_occupancy("Atlantis", OccupancyAction::JoinedClient);
        assert_eq!(state.occupancy, vec![0, 2]);
    }

    #[test]
    fn test_enter_and_leave_world() {
        let mut state = seeded();
        state.update_position(
            "hash:alice",
            Coordinates {
                x: 1,
                y: 1,
                skin: "knight".into(),
            },
        );
        state.enter_world("CaveWorld", Some(vec![vec!["tile".into()]]));
        assert!(state.positions.is_empty());
        assert_eq!(state.current_world.as_deref(), Some("CaveWorld"));

        state.enter_world("", None);
        assert!(state.current_world.is_none());
        assert!(state.world_grid.is_none());
    }

    #[test]
    fn test_apply_tiles() {
        let mut state = seeded();
        state.enter_world(
            "CaveWorld",
            Some(vec![vec!["tile".into(), "tile".into()]]),
        );
        state.apply_tiles(&[tessera_proto::command::TileUpdate {
            x: 1,
            y: 0,
            tile: "coin".into(),
        }]);
        assert_eq!(state.world_grid.as_ref().unwrap()[0][1], "coin");
    }
}
