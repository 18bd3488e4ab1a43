//! REST surface: login, character sheets and read-only state snapshots.
//!
//! Mutations of combat and battle-map state go through the WebSocket command
//! path; these routes exist for login, CRUD of campaign records and for the
//! full-state re-fetch clients do on reconnect.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::{self, Accounts};
use crate::battlemap::BattleMap;
use crate::chat::Chat;
use crate::combat::CombatEngine;
use crate::error::EngineError;
use crate::hub::{Hub, ServerEvent};
use crate::model::{
    Actor, BattleMapState, CampaignValue, Character, ChatMessage, CombatState, Role,
};
use crate::store::{CampaignStore, StoreError};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CampaignStore>,
    pub hub: Arc<Hub>,
    pub combat: Arc<CombatEngine>,
    pub map: Arc<BattleMap>,
    pub chat: Arc<Chat>,
    pub accounts: Arc<Accounts>,
}

type ApiError = (StatusCode, String);

fn engine_error(err: EngineError) -> ApiError {
    (err.status(), err.to_string())
}

fn store_error(err: StoreError) -> ApiError {
    match err {
        StoreError::NotFound { .. } => (StatusCode::NOT_FOUND, err.to_string()),
        StoreError::Backend(_) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

/// Resolve the caller from a `Bearer` token.
fn authenticate(headers: &HeaderMap) -> Result<Actor, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or((StatusCode::UNAUTHORIZED, "missing bearer token".to_string()))?;
    auth::verify_token(token).map_err(|_| (StatusCode::UNAUTHORIZED, "invalid token".to_string()))
}

pub async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user_id: Uuid,
    pub username: String,
    pub role: Role,
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Some(account) = state.accounts.verify(&req.username, &req.password) else {
        return Err((StatusCode::UNAUTHORIZED, "invalid credentials".to_string()));
    };
    let actor = account.actor();
    let token = auth::issue_token(&actor)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(LoginResponse {
        token,
        user_id: actor.user_id,
        username: actor.username,
        role: actor.role,
    }))
}

pub async fn list_characters(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Character>>, ApiError> {
    authenticate(&headers)?;
    state.store.characters().map(Json).map_err(store_error)
}

#[derive(Debug, Deserialize)]
pub struct CreateCharacter {
    pub name: String,
    pub class_name: String,
    #[serde(default = "default_level")]
    pub level: u32,
    pub hp_max: i64,
    pub ac: i32,
    #[serde(default = "default_speed")]
    pub speed: u32,
    #[serde(default)]
    pub initiative_mod: i32,
}

fn default_level() -> u32 {
    1
}

fn default_speed() -> u32 {
    30
}

pub async fn create_character(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateCharacter>,
) -> Result<Json<Character>, ApiError> {
    let actor = authenticate(&headers)?;
    if req.name.trim().is_empty() || req.hp_max < 1 || req.ac < 1 {
        return Err((
            StatusCode::BAD_REQUEST,
            "name, hp_max >= 1 and ac >= 1 are required".to_string(),
        ));
    }
    // DM-created sheets are campaign NPCs and stay unowned.
    let owner = if actor.is_dm() { None } else { Some(actor.user_id) };
    let character = state
        .store
        .upsert_character(Character {
            id: 0,
            name: req.name.trim().to_string(),
            class_name: req.class_name.trim().to_string(),
            level: req.level.max(1),
            hp_current: req.hp_max,
            hp_max: req.hp_max,
            ac: req.ac,
            speed: req.speed,
            initiative_mod: req.initiative_mod,
            owner,
            status_effects: Vec::new(),
            in_combat: false,
            token: None,
        })
        .map_err(store_error)?;
    state.hub.publish(&ServerEvent::CharacterUpdated {
        character_id: character.id,
        updated_by: actor.username.clone(),
    });
    Ok(Json(character))
}

/// Partial character update; absent fields keep their stored values. HP
/// writes are clamped into the valid range, never rejected.
#[derive(Debug, Deserialize)]
pub struct UpdateCharacter {
    pub name: Option<String>,
    pub class_name: Option<String>,
    pub level: Option<u32>,
    pub hp_current: Option<i64>,
    pub hp_max: Option<i64>,
    pub ac: Option<i32>,
    pub speed: Option<u32>,
    pub initiative_mod: Option<i32>,
    pub status_effects: Option<Vec<String>>,
}

pub async fn update_character(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(req): Json<UpdateCharacter>,
) -> Result<Json<Character>, ApiError> {
    let actor = authenticate(&headers)?;
    let current = state.store.character(id).map_err(store_error)?;
    if !actor.is_dm() && current.owner != Some(actor.user_id) {
        return Err((StatusCode::FORBIDDEN, "permission denied".to_string()));
    }

    let name = match req.name {
        Some(name) => {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err((StatusCode::BAD_REQUEST, "name must not be empty".to_string()));
            }
            Some(name)
        }
        None => None,
    };
    if matches!(req.hp_max, Some(hp_max) if hp_max < 1) {
        return Err((StatusCode::BAD_REQUEST, "hp_max must be >= 1".to_string()));
    }
    if matches!(req.ac, Some(ac) if ac < 1) {
        return Err((StatusCode::BAD_REQUEST, "ac must be >= 1".to_string()));
    }

    let hp_max_changed = req.hp_max.is_some_and(|hp_max| hp_max != current.hp_max);
    let updated = state
        .store
        .update_character_with(id, &mut |c| {
            if let Some(name) = &name {
                c.name = name.clone();
            }
            if let Some(class_name) = &req.class_name {
                c.class_name = class_name.clone();
            }
            if let Some(level) = req.level {
                c.level = level.max(1);
            }
            if let Some(hp_max) = req.hp_max {
                c.hp_max = hp_max;
            }
            if let Some(ac) = req.ac {
                c.ac = ac;
            }
            if let Some(speed) = req.speed {
                c.speed = speed;
            }
            if let Some(initiative_mod) = req.initiative_mod {
                c.initiative_mod = initiative_mod;
            }
            if let Some(status_effects) = &req.status_effects {
                c.status_effects = status_effects.clone();
            }
        })
        .map_err(store_error)?;

    // Any HP-affecting edit funnels through the engine's clamp-and-broadcast
    // contract so the combat roster copy never disagrees with the sheet: an
    // explicit hp write directly, a changed hp_max by re-asserting the stored
    // hp against the new ceiling.
    if let Some(hp) = req.hp_current {
        state.combat.update_hp(&actor, id, hp).map_err(engine_error)?;
    } else if hp_max_changed {
        state
            .combat
            .update_hp(&actor, id, updated.hp_current)
            .map_err(engine_error)?;
    }
    state.hub.publish(&ServerEvent::CharacterUpdated {
        character_id: id,
        updated_by: actor.username.clone(),
    });
    state.store.character(id).map(Json).map_err(store_error)
}

pub async fn delete_character(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let actor = authenticate(&headers)?;
    if !actor.is_dm() {
        return Err((StatusCode::FORBIDDEN, "DM privileges required".to_string()));
    }
    state.store.delete_character(id).map_err(store_error)?;
    state.hub.publish(&ServerEvent::CharacterUpdated {
        character_id: id,
        updated_by: actor.username,
    });
    Ok(Json(serde_json::json!({ "success": true })))
}

pub async fn get_combat(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<CombatState>, ApiError> {
    authenticate(&headers)?;
    state.combat.snapshot().map(Json).map_err(engine_error)
}

pub async fn get_battle_map(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<BattleMapState>, ApiError> {
    authenticate(&headers)?;
    state.map.snapshot().map(Json).map_err(engine_error)
}

pub async fn get_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    authenticate(&headers)?;
    state.store.recent_messages(100).map(Json).map_err(store_error)
}

pub async fn get_campaign(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<HashMap<String, CampaignValue>>, ApiError> {
    authenticate(&headers)?;
    let values = state.store.campaign_values().map_err(store_error)?;
    Ok(Json(values.into_iter().collect()))
}

#[derive(Debug, Deserialize)]
pub struct PutCampaignValue {
    pub value: Value,
}

pub async fn put_campaign_value(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    Json(req): Json<PutCampaignValue>,
) -> Result<Json<CampaignValue>, ApiError> {
    let actor = authenticate(&headers)?;
    let record = CampaignValue {
        value: req.value.clone(),
        updated_by: actor.username.clone(),
        updated_at: OffsetDateTime::now_utc().unix_timestamp(),
    };
    state
        .store
        .put_campaign_value(&key, record.clone())
        .map_err(store_error)?;
    state.hub.publish(&ServerEvent::CampaignUpdated {
        key,
        value: req.value,
        updated_by: actor.username,
    });
    Ok(Json(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::CombatantSpec;
    use crate::model::Combatant;
    use crate::store::MemoryStore;

    fn app_state() -> AppState {
        let store = Arc::new(MemoryStore::new(Some((30, 30))));
        let hub = Arc::new(Hub::new());
        let map = Arc::new(BattleMap::new(store.clone(), hub.clone()));
        let combat = Arc::new(CombatEngine::new(store.clone(), hub.clone(), map.clone()));
        let chat = Arc::new(Chat::new(store.clone(), hub.clone()));
        let accounts = Arc::new(Accounts::new(&[("dm", "password", Role::Dm)]));
        AppState { store, hub, combat, map, chat, accounts }
    }

    fn dm() -> Actor {
        Actor { user_id: Uuid::new_v4(), username: "dm".into(), role: Role::Dm }
    }

    fn bearer(actor: &Actor) -> HeaderMap {
        auth::init_key();
        let token = auth::issue_token(actor).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            format!("Bearer {token}").parse().unwrap(),
        );
        headers
    }

    fn add_character(state: &AppState, name: &str, hp_max: i64) -> i64 {
        state
            .store
            .upsert_character(Character {
                id: 0,
                name: name.into(),
                class_name: "Ranger".into(),
                level: 5,
                hp_current: hp_max,
                hp_max,
                ac: 16,
                speed: 30,
                initiative_mod: 2,
                owner: None,
                status_effects: Vec::new(),
                in_combat: false,
                token: None,
            })
            .unwrap()
            .id
    }

    fn patch() -> UpdateCharacter {
        UpdateCharacter {
            name: None,
            class_name: None,
            level: None,
            hp_current: None,
            hp_max: None,
            ac: None,
            speed: None,
            initiative_mod: None,
            status_effects: None,
        }
    }

    #[tokio::test]
    async fn lowering_hp_max_mid_combat_keeps_sheet_and_roster_in_step() {
        let state = app_state();
        let actor = dm();
        let id = add_character(&state, "Captain Blackwood", 45);
        state
            .combat
            .start_combat(&actor, vec![CombatantSpec::Character { id, initiative: 12 }])
            .unwrap();
        let mut rx = state.hub.register(Uuid::new_v4(), "observer");

        // no explicit hp_current in the request; the clamp to the new ceiling
        // must still reach the roster and the wire
        let mut req = patch();
        req.hp_max = Some(30);
        let Json(sheet) =
            update_character(State(state.clone()), Path(id), bearer(&actor), Json(req))
                .await
                .unwrap();
        assert_eq!(sheet.hp_max, 30);
        assert_eq!(sheet.hp_current, 30);

        let combat = state.store.combat().unwrap();
        match &combat.combatants[0] {
            Combatant::Character { hp_current, hp_max, .. } => {
                assert_eq!(*hp_current, 30);
                assert_eq!(*hp_max, 30);
            }
            other => panic!("unexpected combatant {other:?}"),
        }

        let mut saw_hp_update = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, ServerEvent::HpUpdated { hp: 30, .. }) {
                saw_hp_update = true;
            }
        }
        assert!(saw_hp_update);
    }

    #[tokio::test]
    async fn explicit_hp_write_still_clamps_through_the_engine() {
        let state = app_state();
        let actor = dm();
        let id = add_character(&state, "First Mate Rodriguez", 58);
        state
            .combat
            .start_combat(&actor, vec![CombatantSpec::Character { id, initiative: 9 }])
            .unwrap();

        let mut req = patch();
        req.hp_current = Some(9_999);
        let Json(sheet) =
            update_character(State(state.clone()), Path(id), bearer(&actor), Json(req))
                .await
                .unwrap();
        assert_eq!(sheet.hp_current, 58);

        let combat = state.store.combat().unwrap();
        match &combat.combatants[0] {
            Combatant::Character { hp_current, .. } => assert_eq!(*hp_current, 58),
            other => panic!("unexpected combatant {other:?}"),
        }
    }
}
