//! Client-to-server WebSocket commands.

use serde::{Deserialize, Serialize};

use crate::combat::CombatantSpec;
use crate::model::MessageKind;

fn default_message_kind() -> MessageKind {
    MessageKind::Chat
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    Ping,
    Chat {
        message: String,
        #[serde(default = "default_message_kind")]
        kind: MessageKind,
    },
    RollDice {
        dice: String,
        #[serde(default)]
        modifier: i32,
        #[serde(default)]
        reason: String,
    },
    StartCombat {
        combatants: Vec<CombatantSpec>,
    },
    EndCombat,
    NextTurn,
    UpdateHp {
        character_id: i64,
        hp: i64,
    },
    MoveToken {
        token_id: String,
        x: i64,
        y: i64,
    },
    ToggleGrid,
    SetGridSize {
        size: u32,
    },
    /// Re-fetch full authoritative state, e.g. after a reconnect or a tab
    /// becoming visible again.
    RequestState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_deserialize_from_tagged_json() {
        let cmd: ClientCommand =
            serde_json::from_str(r#"{"type":"move_token","token_id":"5","x":3,"y":4}"#).unwrap();
        assert!(matches!(
            cmd,
            ClientCommand::MoveToken { ref token_id, x: 3, y: 4 } if token_id == "5"
        ));

        let cmd: ClientCommand = serde_json::from_str(r#"{"type":"chat","message":"hi"}"#).unwrap();
        assert!(matches!(cmd, ClientCommand::Chat { kind: MessageKind::Chat, .. }));

        let cmd: ClientCommand = serde_json::from_str(
            r#"{"type":"start_combat","combatants":[
                {"kind":"character","id":1,"initiative":15},
                {"kind":"enemy","name":"Goblin","hp_max":7,"ac":13,"initiative":12}
            ]}"#,
        )
        .unwrap();
        match cmd {
            ClientCommand::StartCombat { combatants } => assert_eq!(combatants.len(), 2),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn non_integer_hp_is_rejected_at_parse() {
        let parsed =
            serde_json::from_str::<ClientCommand>(r#"{"type":"update_hp","character_id":1,"hp":3.5}"#);
        assert!(parsed.is_err());
    }
}
