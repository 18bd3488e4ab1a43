//! Battle map synchronizer: token positions on a shared grid.
//!
//! The map is the sole writer of [`BattleMapState`]. Concurrent moves of the
//! same token resolve to last-writer-wins: the write that reaches the store
//! last simply overwrites the cell, which matches what players expect from a
//! physical table.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::error::{EngineError, EngineResult};
use crate::hub::{Hub, ServerEvent};
use crate::model::{Actor, BattleMapState, GridPos};
use crate::store::{CampaignStore, StoreError};

pub struct BattleMap {
    store: Arc<dyn CampaignStore>,
    hub: Arc<Hub>,
    // Serializes read-modify-write cycles against the store.
    lock: Mutex<()>,
}

impl BattleMap {
    pub fn new(store: Arc<dyn CampaignStore>, hub: Arc<Hub>) -> Self {
        Self { store, hub, lock: Mutex::new(()) }
    }

    pub fn snapshot(&self) -> EngineResult<BattleMapState> {
        Ok(self.store.battle_map()?)
    }

    /// Move a token to a grid cell. Non-DM callers may only move tokens of
    /// characters they own; enemy tokens are DM-only. A failed move leaves
    /// the stored position untouched.
    pub fn move_token(&self, actor: &Actor, token_id: &str, x: i64, y: i64) -> EngineResult<GridPos> {
        let _guard = self.lock.lock();
        let mut state = self.store.battle_map()?;
        let pos = validate_cell(&state, x, y)?;
        self.authorize_move(actor, token_id)?;

        // Last writer wins: no merge with concurrent moves of the same token.
        state.tokens.insert(token_id.to_string(), pos);
        self.store.put_battle_map(state)?;
        self.sync_character_token(token_id, pos)?;

        info!(token_id, x = pos.x, y = pos.y, moved_by = %actor.username, "token moved");
        self.hub.publish(&ServerEvent::TokenMoved {
            token_id: token_id.to_string(),
            x: pos.x,
            y: pos.y,
            moved_by: actor.username.clone(),
        });
        Ok(pos)
    }

    /// Flip grid line display. Any connected client may do this.
    pub fn toggle_grid(&self, actor: &Actor) -> EngineResult<BattleMapState> {
        let _guard = self.lock.lock();
        let mut state = self.store.battle_map()?;
        state.show_grid = !state.show_grid;
        self.store.put_battle_map(state.clone())?;
        info!(show_grid = state.show_grid, by = %actor.username, "grid toggled");
        self.hub.publish(&ServerEvent::BattlemapState { state: state.clone() });
        Ok(state)
    }

    /// Change the cell pixel size used by client renderers.
    pub fn set_grid_size(&self, actor: &Actor, size: u32) -> EngineResult<BattleMapState> {
        if !(8..=200).contains(&size) {
            return Err(EngineError::Validation(format!(
                "grid size {size} out of range (8..=200)"
            )));
        }
        let _guard = self.lock.lock();
        let mut state = self.store.battle_map()?;
        state.grid_size = size;
        self.store.put_battle_map(state.clone())?;
        info!(size, by = %actor.username, "grid size changed");
        self.hub.publish(&ServerEvent::BattlemapState { state: state.clone() });
        Ok(state)
    }

    /// Place tokens for combatants entering combat, at the next free cells.
    /// Existing tokens keep their positions; tokens of combatants that left a
    /// previous combat are never pruned here, the map stays DM-curated.
    pub fn ensure_tokens(&self, token_ids: &[String]) -> EngineResult<()> {
        let _guard = self.lock.lock();
        let mut state = self.store.battle_map()?;
        let mut placed = false;
        for id in token_ids {
            if !state.tokens.contains_key(id) {
                let pos = next_free_cell(&state);
                state.tokens.insert(id.clone(), pos);
                self.sync_character_token(id, pos)?;
                placed = true;
            }
        }
        if placed {
            self.store.put_battle_map(state.clone())?;
            self.hub.publish(&ServerEvent::BattlemapState { state });
        }
        Ok(())
    }

    fn authorize_move(&self, actor: &Actor, token_id: &str) -> EngineResult<()> {
        if actor.is_dm() {
            return Ok(());
        }
        let character_id: i64 = token_id
            .parse()
            .map_err(|_| EngineError::Authorization("only the DM may move enemy tokens".into()))?;
        match self.store.character(character_id) {
            Ok(c) if c.owner == Some(actor.user_id) => Ok(()),
            Ok(_) => Err(EngineError::Authorization(format!(
                "{} does not control character {character_id}",
                actor.username
            ))),
            Err(StoreError::NotFound { .. }) => {
                Err(EngineError::Validation(format!("unknown token {token_id}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    // Mirror the stored position onto the character sheet for character
    // tokens so sheet and map never disagree.
    fn sync_character_token(&self, token_id: &str, pos: GridPos) -> EngineResult<()> {
        if let Ok(character_id) = token_id.parse::<i64>() {
            match self
                .store
                .update_character_with(character_id, &mut |c| c.token = Some(pos))
            {
                Ok(_) => {}
                Err(StoreError::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn validate_cell(state: &BattleMapState, x: i64, y: i64) -> EngineResult<GridPos> {
    if x < 0 || y < 0 || x > i64::from(u32::MAX) || y > i64::from(u32::MAX) {
        return Err(EngineError::Validation(format!("coordinates ({x}, {y}) out of range")));
    }
    if let Some((w, h)) = state.bounds {
        if x >= i64::from(w) || y >= i64::from(h) {
            return Err(EngineError::Validation(format!(
                "({x}, {y}) outside {w}x{h} grid"
            )));
        }
    }
    Ok(GridPos { x: x as u32, y: y as u32 })
}

// Row-major scan for the first unoccupied cell. Falls back to a 30x30 search
// window on unbounded maps.
fn next_free_cell(state: &BattleMapState) -> GridPos {
    let (w, h) = state.bounds.unwrap_or((30, 30));
    for y in 0..h {
        for x in 0..w {
            let pos = GridPos { x, y };
            if !state.tokens.values().any(|p| *p == pos) {
                return pos;
            }
        }
    }
    GridPos { x: 0, y: 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Character, Role};
    use crate::store::MemoryStore;
    use uuid::Uuid;

    fn setup(bounds: Option<(u32, u32)>) -> (Arc<MemoryStore>, Arc<Hub>, BattleMap) {
        let store = Arc::new(MemoryStore::new(bounds));
        let hub = Arc::new(Hub::new());
        let map = BattleMap::new(store.clone(), hub.clone());
        (store, hub, map)
    }

    fn dm() -> Actor {
        Actor { user_id: Uuid::new_v4(), username: "dm".into(), role: Role::Dm }
    }

    fn player(user_id: Uuid) -> Actor {
        Actor { user_id, username: "player".into(), role: Role::Player }
    }

    fn add_character(store: &MemoryStore, owner: Option<Uuid>) -> i64 {
        store
            .upsert_character(Character {
                id: 0,
                name: "Captain Blackwood".into(),
                class_name: "Ranger".into(),
                level: 5,
                hp_current: 45,
                hp_max: 45,
                ac: 16,
                speed: 30,
                initiative_mod: 2,
                owner,
                status_effects: Vec::new(),
                in_combat: false,
                token: None,
            })
            .unwrap()
            .id
    }

    #[test]
    fn out_of_bounds_move_keeps_previous_position() {
        let (store, _hub, map) = setup(Some((30, 30)));
        let actor = dm();
        map.move_token(&actor, "5", 3, 4).unwrap();
        let err = map.move_token(&actor, "5", 100_000, 4).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        let state = store.battle_map().unwrap();
        assert_eq!(state.tokens["5"], GridPos { x: 3, y: 4 });
    }

    #[test]
    fn negative_coordinates_rejected() {
        let (_store, _hub, map) = setup(None);
        let err = map.move_token(&dm(), "5", -1, 0).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn unbounded_map_accepts_large_coordinates() {
        let (store, _hub, map) = setup(None);
        map.move_token(&dm(), "5", 1_000_000, 2).unwrap();
        assert_eq!(
            store.battle_map().unwrap().tokens["5"],
            GridPos { x: 1_000_000, y: 2 }
        );
    }

    #[test]
    fn player_cannot_move_unowned_token() {
        let (store, _hub, map) = setup(Some((30, 30)));
        let owner = Uuid::new_v4();
        let character_id = add_character(&store, Some(owner));
        let token = character_id.to_string();
        map.move_token(&dm(), &token, 3, 4).unwrap();

        let stranger = player(Uuid::new_v4());
        let err = map.move_token(&stranger, &token, 5, 5).unwrap_err();
        assert!(matches!(err, EngineError::Authorization(_)));
        assert_eq!(
            store.battle_map().unwrap().tokens[&token],
            GridPos { x: 3, y: 4 }
        );

        // the owner may move it
        map.move_token(&player(owner), &token, 5, 5).unwrap();
        assert_eq!(
            store.battle_map().unwrap().tokens[&token],
            GridPos { x: 5, y: 5 }
        );
    }

    #[test]
    fn enemy_tokens_are_dm_only() {
        let (_store, _hub, map) = setup(Some((30, 30)));
        let err = map
            .move_token(&player(Uuid::new_v4()), "enemy-1", 1, 1)
            .unwrap_err();
        assert!(matches!(err, EngineError::Authorization(_)));
        map.move_token(&dm(), "enemy-1", 1, 1).unwrap();
    }

    #[test]
    fn last_writer_wins_per_token() {
        let (store, _hub, map) = setup(Some((30, 30)));
        let actor = dm();
        map.move_token(&actor, "enemy-1", 1, 1).unwrap();
        map.move_token(&actor, "enemy-1", 2, 2).unwrap();
        assert_eq!(
            store.battle_map().unwrap().tokens["enemy-1"],
            GridPos { x: 2, y: 2 }
        );
    }

    #[test]
    fn move_mirrors_position_onto_character_sheet() {
        let (store, _hub, map) = setup(Some((30, 30)));
        let id = add_character(&store, None);
        map.move_token(&dm(), &id.to_string(), 7, 9).unwrap();
        assert_eq!(
            store.character(id).unwrap().token,
            Some(GridPos { x: 7, y: 9 })
        );

        // the mirror writes only the token field; an hp edit landing between
        // the map's read and write must survive the move
        store
            .update_character_with(id, &mut |c| c.hp_current = 12)
            .unwrap();
        map.move_token(&dm(), &id.to_string(), 8, 8).unwrap();
        let c = store.character(id).unwrap();
        assert_eq!(c.hp_current, 12);
        assert_eq!(c.token, Some(GridPos { x: 8, y: 8 }));
    }

    #[test]
    fn ensure_tokens_places_only_missing_ones() {
        let (store, hub, map) = setup(Some((30, 30)));
        let mut rx = hub.register(Uuid::new_v4(), "dm");
        map.move_token(&dm(), "enemy-1", 4, 4).unwrap();
        let _ = rx.try_recv(); // consume the token_moved event

        map.ensure_tokens(&["enemy-1".into(), "enemy-2".into()])
            .unwrap();
        let state = store.battle_map().unwrap();
        assert_eq!(state.tokens["enemy-1"], GridPos { x: 4, y: 4 });
        assert_eq!(state.tokens["enemy-2"], GridPos { x: 0, y: 0 });
        assert!(matches!(rx.try_recv(), Ok(ServerEvent::BattlemapState { .. })));

        // second call changes nothing and broadcasts nothing
        map.ensure_tokens(&["enemy-1".into(), "enemy-2".into()])
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn toggle_and_resize_broadcast_snapshots() {
        let (store, hub, map) = setup(None);
        let mut rx = hub.register(Uuid::new_v4(), "player");
        let actor = dm();

        let state = map.toggle_grid(&actor).unwrap();
        assert!(!state.show_grid);
        assert!(matches!(rx.try_recv(), Ok(ServerEvent::BattlemapState { .. })));

        map.set_grid_size(&actor, 64).unwrap();
        assert_eq!(store.battle_map().unwrap().grid_size, 64);
        assert!(matches!(
            map.set_grid_size(&actor, 4).unwrap_err(),
            EngineError::Validation(_)
        ));
    }
}
