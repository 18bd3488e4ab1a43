//! Combat engine: authoritative turn order, round counter and roster.
//!
//! The engine is the sole writer of [`CombatState`]. Every mutation is a
//! read-modify-write against the store under one mutex, so two
//! near-simultaneous `next_turn` calls advance the turn by two steps total,
//! never one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::battlemap::BattleMap;
use crate::error::{EngineError, EngineResult};
use crate::hub::{Hub, ServerEvent};
use crate::model::{Actor, Combatant, CombatState};
use crate::store::{CampaignStore, StoreError};

/// Caller-supplied combatant descriptor for `start_combat`. Characters are
/// referenced by id with an initiative roll; enemies are stood up inline.
/// Initiative is taken as rolled: a d20 with a negative modifier can total
/// zero or less, so it has no lower bound (unlike hp and ac).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CombatantSpec {
    Character { id: i64, initiative: i32 },
    Enemy { name: String, hp_max: i64, ac: i32, initiative: i32 },
}

pub struct CombatEngine {
    store: Arc<dyn CampaignStore>,
    hub: Arc<Hub>,
    map: Arc<BattleMap>,
    // Serializes read-modify-write cycles against the store.
    lock: Mutex<()>,
    enemy_seq: AtomicU64,
}

impl CombatEngine {
    pub fn new(store: Arc<dyn CampaignStore>, hub: Arc<Hub>, map: Arc<BattleMap>) -> Self {
        Self { store, hub, map, lock: Mutex::new(()), enemy_seq: AtomicU64::new(1) }
    }

    pub fn snapshot(&self) -> EngineResult<CombatState> {
        Ok(self.store.combat()?)
    }

    /// Start a combat from a caller-ordered list of descriptors. Combatants
    /// are sorted descending by initiative with a stable sort, so equal
    /// initiatives keep their submission order for the whole combat.
    pub fn start_combat(&self, actor: &Actor, specs: Vec<CombatantSpec>) -> EngineResult<CombatState> {
        require_dm(actor, "start combat")?;
        if specs.is_empty() {
            return Err(EngineError::Validation("combatant list is empty".into()));
        }

        let _guard = self.lock.lock();
        let mut combatants = Vec::with_capacity(specs.len());
        for spec in specs {
            combatants.push(self.resolve_spec(spec)?);
        }
        combatants.sort_by(|a, b| b.initiative().cmp(&a.initiative()));

        let mut state = self.store.combat()?;
        if state.active {
            // restarting replaces the roster; clear flags of the old one
            self.clear_in_combat(&state)?;
        }
        state.active = true;
        state.combatants = combatants;
        state.current_turn = 0;
        state.round_number = 1;

        for id in state.combatants.iter().filter_map(Combatant::character_id) {
            self.store.update_character_with(id, &mut |c| c.in_combat = true)?;
        }
        self.store.put_combat(state.clone())?;

        let token_ids: Vec<String> = state.combatants.iter().map(Combatant::token_id).collect();
        self.map.ensure_tokens(&token_ids)?;

        info!(combatants = state.combatants.len(), by = %actor.username, "combat started");
        self.hub.publish(&ServerEvent::CombatStarted {
            combatants: state.combatants.clone(),
            round: state.round_number,
            current_turn: state.current_turn,
        });
        Ok(state)
    }

    /// End the active combat. A no-op when already idle: returns Ok without
    /// touching the store or broadcasting a second `combat_ended`.
    pub fn end_combat(&self, actor: &Actor) -> EngineResult<()> {
        require_dm(actor, "end combat")?;
        let _guard = self.lock.lock();
        let mut state = self.store.combat()?;
        if !state.active {
            return Ok(());
        }

        self.clear_in_combat(&state)?;

        state.active = false;
        state.combatants.clear();
        state.current_turn = 0;
        state.round_number = 1;
        self.store.put_combat(state)?;

        info!(by = %actor.username, "combat ended");
        self.hub.publish(&ServerEvent::CombatEnded);
        Ok(())
    }

    /// Advance the turn pointer, incrementing the round on wrap-around.
    pub fn next_turn(&self, actor: &Actor) -> EngineResult<CombatState> {
        require_dm(actor, "advance the turn")?;
        let _guard = self.lock.lock();
        let mut state = self.store.combat()?;
        if !state.active || state.combatants.is_empty() {
            return Err(EngineError::InvalidState("no active combat".into()));
        }

        state.current_turn = (state.current_turn + 1) % state.combatants.len();
        if state.current_turn == 0 {
            state.round_number += 1;
        }
        self.store.put_combat(state.clone())?;

        info!(
            round = state.round_number,
            turn = state.current_turn,
            up = state.combatants[state.current_turn].name(),
            "turn advanced"
        );
        self.hub.publish(&ServerEvent::CombatTurnChanged {
            round: state.round_number,
            current_turn: state.current_turn,
            combatants: state.combatants.clone(),
        });
        Ok(state)
    }

    /// Set a character's HP, clamped into `[0, hp_max]`. This is the single
    /// path for both in-combat damage and out-of-combat sheet edits: the
    /// character record is always persisted, and the denormalized roster copy
    /// (hp and hp_max both) is refreshed when the character is an active
    /// combatant, so the two views never disagree.
    pub fn update_hp(&self, actor: &Actor, character_id: i64, hp: i64) -> EngineResult<i64> {
        let _guard = self.lock.lock();
        let owner = match self.store.character(character_id) {
            Ok(c) => c.owner,
            Err(StoreError::NotFound { .. }) => {
                return Err(EngineError::Validation(format!(
                    "unknown character {character_id}"
                )))
            }
            Err(e) => return Err(e.into()),
        };
        if !actor.is_dm() && owner != Some(actor.user_id) {
            return Err(EngineError::Authorization(format!(
                "{} does not control character {character_id}",
                actor.username
            )));
        }

        let mut clamped = 0;
        let sheet = self.store.update_character_with(character_id, &mut |c| {
            clamped = c.clamp_hp(hp);
            c.hp_current = clamped;
        })?;

        let mut state = self.store.combat()?;
        if state.active {
            let mut touched = false;
            for combatant in &mut state.combatants {
                if let Combatant::Character { id, hp_current, hp_max, .. } = combatant {
                    if *id == character_id {
                        *hp_current = clamped;
                        *hp_max = sheet.hp_max;
                        touched = true;
                    }
                }
            }
            if touched {
                self.store.put_combat(state)?;
            }
        }

        info!(character_id, hp = clamped, by = %actor.username, "hp updated");
        self.hub.publish(&ServerEvent::HpUpdated {
            character_id,
            hp: clamped,
            updated_by: actor.username.clone(),
        });
        Ok(clamped)
    }

    fn clear_in_combat(&self, state: &CombatState) -> EngineResult<()> {
        for id in state.combatants.iter().filter_map(Combatant::character_id) {
            // roster ids were valid at start; a sheet deleted mid-combat is fine
            match self.store.update_character_with(id, &mut |c| c.in_combat = false) {
                Ok(_) => {}
                Err(StoreError::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn resolve_spec(&self, spec: CombatantSpec) -> EngineResult<Combatant> {
        match spec {
            CombatantSpec::Character { id, initiative } => {
                let c = match self.store.character(id) {
                    Ok(c) => c,
                    Err(StoreError::NotFound { .. }) => {
                        return Err(EngineError::Validation(format!("unknown character {id}")))
                    }
                    Err(e) => return Err(e.into()),
                };
                Ok(Combatant::Character {
                    id: c.id,
                    name: c.name,
                    initiative,
                    hp_current: c.hp_current,
                    hp_max: c.hp_max,
                    ac: c.ac,
                })
            }
            CombatantSpec::Enemy { name, hp_max, ac, initiative } => {
                let name = name.trim().to_string();
                if name.is_empty() {
                    return Err(EngineError::Validation("enemy name is empty".into()));
                }
                if hp_max < 1 || ac < 1 {
                    return Err(EngineError::Validation(format!(
                        "enemy {name}: hp and ac must be positive"
                    )));
                }
                let id = format!("enemy-{}", self.enemy_seq.fetch_add(1, Ordering::Relaxed));
                Ok(Combatant::Enemy { id, name, initiative, hp_current: hp_max, hp_max, ac })
            }
        }
    }
}

fn require_dm(actor: &Actor, what: &str) -> EngineResult<()> {
    if actor.is_dm() {
        Ok(())
    } else {
        Err(EngineError::Authorization(format!("only the DM may {what}")))
    }
}
