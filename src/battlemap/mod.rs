pub mod map;

pub use map::BattleMap;
