//! In-memory store backing a single campaign.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{CampaignStore, StoreError, StoreResult};
use crate::model::{BattleMapState, CampaignValue, Character, ChatMessage, CombatState};

/// Chat history kept for late joiners.
const MESSAGE_HISTORY: usize = 100;

pub struct MemoryStore {
    characters: DashMap<i64, Character>,
    next_character_id: AtomicI64,
    combat: Mutex<CombatState>,
    map: Mutex<BattleMapState>,
    messages: Mutex<VecDeque<ChatMessage>>,
    campaign: DashMap<String, CampaignValue>,
}

impl MemoryStore {
    pub fn new(bounds: Option<(u32, u32)>) -> Self {
        Self {
            characters: DashMap::new(),
            next_character_id: AtomicI64::new(1),
            combat: Mutex::new(CombatState::default()),
            map: Mutex::new(BattleMapState::new(bounds)),
            messages: Mutex::new(VecDeque::new()),
            campaign: DashMap::new(),
        }
    }

    /// Seed the default Shadowmar party so a fresh server is playable.
    pub fn seed_defaults(&self, owner: Uuid) -> StoreResult<()> {
        let defaults = [
            ("Captain Blackwood", "Ranger", 5, 45, 45, 16, 2),
            ("First Mate Rodriguez", "Fighter", 5, 52, 58, 18, 1),
            ("Doctor Sarah Cross", "Cleric", 4, 35, 38, 15, 0),
        ];
        for (name, class_name, level, hp_current, hp_max, ac, init) in defaults {
            self.upsert_character(Character {
                id: 0,
                name: name.into(),
                class_name: class_name.into(),
                level,
                hp_current,
                hp_max,
                ac,
                speed: 30,
                initiative_mod: init,
                owner: Some(owner),
                status_effects: Vec::new(),
                in_combat: false,
                token: None,
            })?;
        }
        Ok(())
    }
}

impl CampaignStore for MemoryStore {
    fn character(&self, id: i64) -> StoreResult<Character> {
        self.characters
            .get(&id)
            .map(|c| c.clone())
            .ok_or(StoreError::NotFound { entity: "character", id: id.to_string() })
    }

    fn characters(&self) -> StoreResult<Vec<Character>> {
        let mut all: Vec<Character> = self.characters.iter().map(|c| c.clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    fn upsert_character(&self, mut character: Character) -> StoreResult<Character> {
        if character.id == 0 {
            character.id = self.next_character_id.fetch_add(1, Ordering::Relaxed);
        } else {
            // keep the allocator ahead of explicitly-chosen ids
            self.next_character_id
                .fetch_max(character.id + 1, Ordering::Relaxed);
        }
        self.characters.insert(character.id, character.clone());
        Ok(character)
    }

    fn update_character_with(
        &self,
        id: i64,
        mutate: &mut dyn FnMut(&mut Character),
    ) -> StoreResult<Character> {
        // the shard write lock is held across the closure
        let mut entry = self
            .characters
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "character", id: id.to_string() })?;
        mutate(entry.value_mut());
        Ok(entry.clone())
    }

    fn delete_character(&self, id: i64) -> StoreResult<()> {
        self.characters
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound { entity: "character", id: id.to_string() })
    }

    fn combat(&self) -> StoreResult<CombatState> {
        Ok(self.combat.lock().clone())
    }

    fn put_combat(&self, state: CombatState) -> StoreResult<()> {
        *self.combat.lock() = state;
        Ok(())
    }

    fn battle_map(&self) -> StoreResult<BattleMapState> {
        Ok(self.map.lock().clone())
    }

    fn put_battle_map(&self, state: BattleMapState) -> StoreResult<()> {
        *self.map.lock() = state;
        Ok(())
    }

    fn push_message(&self, message: ChatMessage) -> StoreResult<()> {
        let mut messages = self.messages.lock();
        messages.push_back(message);
        while messages.len() > MESSAGE_HISTORY {
            messages.pop_front();
        }
        Ok(())
    }

    fn recent_messages(&self, limit: usize) -> StoreResult<Vec<ChatMessage>> {
        let messages = self.messages.lock();
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.iter().skip(skip).cloned().collect())
    }

    fn campaign_values(&self) -> StoreResult<Vec<(String, CampaignValue)>> {
        Ok(self
            .campaign
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect())
    }

    fn put_campaign_value(&self, key: &str, value: CampaignValue) -> StoreResult<()> {
        self.campaign.insert(key.to_string(), value);
        Ok(())
    }
}
