//! Campaign chat and dice rolls, broadcast to the whole table.

use std::sync::Arc;

use rand::Rng;
use time::OffsetDateTime;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::hub::{Hub, ServerEvent};
use crate::model::{Actor, ChatMessage, MessageKind};
use crate::store::CampaignStore;

pub struct Chat {
    store: Arc<dyn CampaignStore>,
    hub: Arc<Hub>,
}

impl Chat {
    pub fn new(store: Arc<dyn CampaignStore>, hub: Arc<Hub>) -> Self {
        Self { store, hub }
    }

    /// Persist and broadcast a chat line. Empty messages are dropped
    /// silently.
    pub fn send_message(&self, actor: &Actor, text: &str, kind: MessageKind) -> EngineResult<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        let message = ChatMessage {
            username: actor.username.clone(),
            message: text.to_string(),
            kind,
            timestamp: OffsetDateTime::now_utc().unix_timestamp(),
        };
        self.store.push_message(message.clone())?;
        self.hub.publish(&ServerEvent::NewMessage { message });
        Ok(())
    }

    /// Roll dice in `NdM` notation and announce the result as a system
    /// message, e.g. `player rolled 2d6 +1 for attack: [3, 5] = 9`.
    pub fn roll_dice(
        &self,
        actor: &Actor,
        dice: &str,
        modifier: i32,
        reason: &str,
    ) -> EngineResult<i64> {
        let (count, sides) = parse_dice(dice)?;
        let mut rng = rand::thread_rng();
        let rolls: Vec<i64> = (0..count).map(|_| rng.gen_range(1..=sides)).collect();
        let total: i64 = rolls.iter().sum::<i64>() + i64::from(modifier);
        debug!(dice, modifier, total, by = %actor.username, "dice rolled");

        let mut text = format!("{} rolled {}", actor.username, dice.trim());
        if modifier != 0 {
            text.push_str(&format!(" {}{}", if modifier > 0 { "+" } else { "" }, modifier));
        }
        let reason = reason.trim();
        if !reason.is_empty() {
            text.push_str(&format!(" for {reason}"));
        }
        text.push_str(&format!(": {rolls:?} = {total}"));

        let message = ChatMessage {
            username: "System".into(),
            message: text,
            kind: MessageKind::Roll,
            timestamp: OffsetDateTime::now_utc().unix_timestamp(),
        };
        self.store.push_message(message.clone())?;
        self.hub.publish(&ServerEvent::NewMessage { message });
        Ok(total)
    }
}

/// Parse `NdM` or `dM` notation into (count, sides).
fn parse_dice(dice: &str) -> EngineResult<(u32, i64)> {
    let dice = dice.trim();
    let (count_part, sides_part) = dice
        .split_once(['d', 'D'])
        .ok_or_else(|| EngineError::Validation(format!("bad dice notation '{dice}'")))?;
    let count: u32 = if count_part.is_empty() {
        1
    } else {
        count_part
            .parse()
            .map_err(|_| EngineError::Validation(format!("bad dice count in '{dice}'")))?
    };
    let sides: i64 = sides_part
        .parse()
        .map_err(|_| EngineError::Validation(format!("bad die size in '{dice}'")))?;
    if !(1..=100).contains(&count) || !(2..=1000).contains(&sides) {
        return Err(EngineError::Validation(format!("dice '{dice}' out of range")));
    }
    Ok((count, sides))
}
