pub mod engine;

pub use engine::{CombatEngine, CombatantSpec};
