//! Record store contract: get/list/upsert/delete keyed by entity id.
//!
//! The engines treat persistence as an external collaborator and only ever
//! talk to this trait; failures surface as a generic [`StoreError`].

mod memory;

pub use memory::MemoryStore;

use crate::model::{BattleMapState, CampaignValue, Character, ChatMessage, CombatState};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    /// Opaque backend failure; the in-memory store never emits it.
    #[allow(dead_code)]
    #[error("storage backend: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub trait CampaignStore: Send + Sync {
    fn character(&self, id: i64) -> StoreResult<Character>;
    fn characters(&self) -> StoreResult<Vec<Character>>;
    /// Insert or replace. An id of 0 asks the store to allocate one; the
    /// stored record is returned either way.
    fn upsert_character(&self, character: Character) -> StoreResult<Character>;
    /// Apply `mutate` to the stored record in place and return the result.
    /// The update is atomic: no reader or other writer observes the record
    /// between the read and the write, so concurrent mutations of different
    /// fields never revert each other. `mutate` must not call back into the
    /// store.
    fn update_character_with(
        &self,
        id: i64,
        mutate: &mut dyn FnMut(&mut Character),
    ) -> StoreResult<Character>;
    fn delete_character(&self, id: i64) -> StoreResult<()>;

    fn combat(&self) -> StoreResult<CombatState>;
    fn put_combat(&self, state: CombatState) -> StoreResult<()>;

    fn battle_map(&self) -> StoreResult<BattleMapState>;
    fn put_battle_map(&self, state: BattleMapState) -> StoreResult<()>;

    fn push_message(&self, message: ChatMessage) -> StoreResult<()>;
    fn recent_messages(&self, limit: usize) -> StoreResult<Vec<ChatMessage>>;

    fn campaign_values(&self) -> StoreResult<Vec<(String, CampaignValue)>>;
    fn put_campaign_value(&self, key: &str, value: CampaignValue) -> StoreResult<()>;
}
