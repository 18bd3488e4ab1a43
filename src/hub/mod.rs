//! Connected-client registry and broadcast channel.
//!
//! Every WebSocket connection registers an unbounded sender here; engines
//! publish typed [`ServerEvent`]s to all clients or to a single recipient.
//! Delivery is best-effort at-most-once: a send to a gone client is ignored,
//! and clients that miss an event recover by re-fetching full state.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::model::{BattleMapState, ChatMessage, Character, CombatState, Role};

/// Events pushed from the server to connected clients. Events published in
/// sequence by one source arrive in that sequence at a given subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Welcome {
        user_id: Uuid,
        username: String,
        role: Role,
        combat: CombatState,
        battle_map: BattleMapState,
        characters: Vec<Character>,
        messages: Vec<ChatMessage>,
    },
    CombatStarted {
        combatants: Vec<crate::model::Combatant>,
        round: u32,
        current_turn: usize,
    },
    CombatEnded,
    CombatTurnChanged {
        round: u32,
        current_turn: usize,
        combatants: Vec<crate::model::Combatant>,
    },
    HpUpdated {
        character_id: i64,
        hp: i64,
        updated_by: String,
    },
    TokenMoved {
        token_id: String,
        x: u32,
        y: u32,
        moved_by: String,
    },
    BattlemapState {
        state: BattleMapState,
    },
    CharacterUpdated {
        character_id: i64,
        updated_by: String,
    },
    CampaignUpdated {
        key: String,
        value: serde_json::Value,
        updated_by: String,
    },
    NewMessage {
        message: ChatMessage,
    },
    Status {
        msg: String,
    },
    Error {
        message: String,
    },
    Pong,
}

struct Client {
    username: String,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

/// Publish/subscribe hub over per-client channels.
#[derive(Default)]
pub struct Hub {
    clients: DashMap<Uuid, Client>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and get its event stream. A client id is the
    /// connection id, not the user id: one user may have several tabs open.
    pub fn register(&self, client_id: Uuid, username: &str) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.clients.insert(
            client_id,
            Client { username: username.to_string(), tx },
        );
        rx
    }

    pub fn unregister(&self, client_id: Uuid) {
        self.clients.remove(&client_id);
    }

    pub fn connected(&self) -> usize {
        self.clients.len()
    }

    /// Push an event to every connected client. A send to a connection whose
    /// reader has gone away is dropped; the client re-syncs on reconnect.
    pub fn publish(&self, event: &ServerEvent) {
        for client in self.clients.iter() {
            if client.tx.send(event.clone()).is_err() {
                debug!(username = %client.username, "dropping event for closed connection");
            }
        }
    }

    /// Push an event to a single connection.
    pub fn publish_to(&self, client_id: Uuid, event: &ServerEvent) {
        if let Some(client) = self.clients.get(&client_id) {
            if client.tx.send(event.clone()).is_err() {
                debug!(username = %client.username, "dropping event for closed connection");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publishes_to_all_registered_clients() {
        let hub = Hub::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut rx_a = hub.register(a, "dm");
        let mut rx_b = hub.register(b, "player");

        hub.publish(&ServerEvent::CombatEnded);
        assert!(matches!(rx_a.try_recv(), Ok(ServerEvent::CombatEnded)));
        assert!(matches!(rx_b.try_recv(), Ok(ServerEvent::CombatEnded)));

        hub.publish_to(a, &ServerEvent::Pong);
        assert!(matches!(rx_a.try_recv(), Ok(ServerEvent::Pong)));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn unregister_drops_delivery() {
        let hub = Hub::new();
        let id = Uuid::new_v4();
        let mut rx = hub.register(id, "player");
        hub.unregister(id);
        hub.publish(&ServerEvent::Pong);
        assert!(rx.try_recv().is_err());
        assert_eq!(hub.connected(), 0);
    }

    #[test]
    fn closed_receiver_does_not_block_other_clients() {
        let hub = Hub::new();
        let gone = hub.register(Uuid::new_v4(), "afk");
        drop(gone);
        let mut rx = hub.register(Uuid::new_v4(), "player");
        hub.publish(&ServerEvent::Pong);
        assert!(matches!(rx.try_recv(), Ok(ServerEvent::Pong)));
    }

    #[test]
    fn events_serialize_with_type_tags() {
        let json = serde_json::to_value(ServerEvent::HpUpdated {
            character_id: 3,
            hp: 12,
            updated_by: "dm".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "hp_updated");
        assert_eq!(json["character_id"], 3);
        assert_eq!(json["hp"], 12);
    }
}
