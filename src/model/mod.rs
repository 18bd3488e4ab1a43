//! Campaign data model: characters, combat roster, battle map and chat.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Seconds a turn is allowed to take. Persisted alongside the combat state
/// and pushed to clients, but no engine operation enforces it.
pub const DEFAULT_TURN_TIMER_SECS: u32 = 30;

/// Default pixel size of one battle-map cell.
pub const DEFAULT_GRID_SIZE: u32 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Dm,
    Player,
}

/// Authenticated caller identity attached to every mutation.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: Uuid,
    pub username: String,
    pub role: Role,
}

impl Actor {
    pub fn is_dm(&self) -> bool {
        self.role == Role::Dm
    }
}

/// Integer grid cell on the battle map. Coordinates are non-negative by
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridPos {
    pub x: u32,
    pub y: u32,
}

/// A tracked character sheet. `hp_current` always stays within
/// `[0, hp_max]`; writes outside that range are clamped, not rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Character {
    pub id: i64,
    pub name: String,
    pub class_name: String,
    pub level: u32,
    pub hp_current: i64,
    pub hp_max: i64,
    pub ac: i32,
    pub speed: u32,
    pub initiative_mod: i32,
    /// Owning user; `None` for DM-controlled sheets.
    pub owner: Option<Uuid>,
    pub status_effects: Vec<String>,
    pub in_combat: bool,
    pub token: Option<GridPos>,
}

impl Character {
    /// Clamp an incoming HP value into the character's valid range.
    pub fn clamp_hp(&self, hp: i64) -> i64 {
        hp.clamp(0, self.hp_max)
    }
}

/// One participant of an active combat: either a denormalized copy of a
/// tracked character or an ad-hoc enemy that exists only for this combat.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Combatant {
    Character {
        id: i64,
        name: String,
        initiative: i32,
        hp_current: i64,
        hp_max: i64,
        ac: i32,
    },
    Enemy {
        id: String,
        name: String,
        initiative: i32,
        hp_current: i64,
        hp_max: i64,
        ac: i32,
    },
}

impl Combatant {
    pub fn initiative(&self) -> i32 {
        match self {
            Combatant::Character { initiative, .. } | Combatant::Enemy { initiative, .. } => {
                *initiative
            }
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Combatant::Character { name, .. } | Combatant::Enemy { name, .. } => name,
        }
    }

    /// Battle-map token key: the character id for tracked characters, the
    /// synthetic id for enemies.
    pub fn token_id(&self) -> String {
        match self {
            Combatant::Character { id, .. } => id.to_string(),
            Combatant::Enemy { id, .. } => id.clone(),
        }
    }

    pub fn character_id(&self) -> Option<i64> {
        match self {
            Combatant::Character { id, .. } => Some(*id),
            Combatant::Enemy { .. } => None,
        }
    }
}

/// Authoritative combat state. Idle when `active` is false; while active,
/// `current_turn` indexes into `combatants` and `round_number >= 1`. The
/// roster order is fixed for the whole combat once sorted at start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombatState {
    pub active: bool,
    pub combatants: Vec<Combatant>,
    pub current_turn: usize,
    pub round_number: u32,
    pub turn_timer_secs: u32,
}

impl Default for CombatState {
    fn default() -> Self {
        Self {
            active: false,
            combatants: Vec::new(),
            current_turn: 0,
            round_number: 1,
            turn_timer_secs: DEFAULT_TURN_TIMER_SECS,
        }
    }
}

/// Shared battle-map display state plus token positions. Survives across
/// combats; tokens are not pruned automatically when a combat ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleMapState {
    pub grid_size: u32,
    pub show_grid: bool,
    /// Grid bounds in cells, `None` for an unbounded map.
    pub bounds: Option<(u32, u32)>,
    pub tokens: HashMap<String, GridPos>,
}

impl BattleMapState {
    pub fn new(bounds: Option<(u32, u32)>) -> Self {
        Self {
            grid_size: DEFAULT_GRID_SIZE,
            show_grid: true,
            bounds,
            tokens: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Chat,
    Roll,
    System,
}

/// A chat line, dice roll or system notice. Timestamps are unix seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub username: String,
    pub message: String,
    pub kind: MessageKind,
    pub timestamp: i64,
}

/// Free-form campaign record (location, session notes, treasure log...),
/// keyed by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignValue {
    pub value: serde_json::Value,
    pub updated_by: String,
    pub updated_at: i64,
}
