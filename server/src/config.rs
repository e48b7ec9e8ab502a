//! Game balance configuration
//!
//! Every field has a default so a config file only needs to name the values it
//! overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::StoreError;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Distance at which a factory is discovered by a player
    pub visibility_range_m: f64,
    /// Distance at which a player can act on a factory
    pub action_range_m: f64,
    /// Distance at which a player can trade with a shop
    pub shop_range_m: f64,

    pub production_interval_ms: u64,
    pub production_per_level: u32,
    pub max_level: u32,
    pub level_up_base_cost: i64,
    pub base_defence: u32,
    pub defence_per_level: u32,
    /// Defence restored on every production tick
    pub defence_regen: u32,
    pub stock_in_per_level: u32,
    pub stock_out_per_level: u32,
    /// Maximum materials and maximum products a player may carry
    pub carry_capacity: u32,

    pub ping_duration_ms: u64,
    pub attack_cooldown_ms: u64,

    pub shop_lifetime_ms: u64,
    pub material_price: u32,
    pub product_price: u32,
    /// Relative price spread applied when a shop rolls its prices
    pub price_jitter: f64,
    /// Share of every shop transaction paid to the shop owner
    pub shop_commission: f64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            visibility_range_m: 300.0,
            action_range_m: 40.0,
            shop_range_m: 30.0,
            production_interval_ms: 10_000,
            production_per_level: 5,
            max_level: 10,
            level_up_base_cost: 100,
            base_defence: 10,
            defence_per_level: 10,
            defence_regen: 2,
            stock_in_per_level: 50,
            stock_out_per_level: 100,
            carry_capacity: 100,
            ping_duration_ms: 60_000,
            attack_cooldown_ms: 5_000,
            shop_lifetime_ms: 300_000,
            material_price: 10,
            product_price: 20,
            price_jitter: 0.25,
            shop_commission: 0.1,
        }
    }
}

impl GameConfig {
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Full defence of a factory at the given level
    pub fn max_defence(&self, level: u32) -> u32 {
        self.base_defence + self.defence_per_level * level.saturating_sub(1)
    }

    pub fn level_up_cost(&self, level: u32) -> i64 {
        self.level_up_base_cost * level as i64
    }

    pub fn commission(&self, amount: i64) -> i64 {
        (amount as f64 * self.shop_commission).floor() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: GameConfig =
            serde_json::from_str(r#"{ "action_range_m": 25.0, "max_level": 3 }"#).unwrap();
        assert_eq!(config.action_range_m, 25.0);
        assert_eq!(config.max_level, 3);
        assert_eq!(config.visibility_range_m, 300.0);
        assert_eq!(config.carry_capacity, 100);
    }

    #[test]
    fn test_max_defence_scales_with_level() {
        let config = GameConfig::default();
        assert_eq!(config.max_defence(1), 10);
        assert_eq!(config.max_defence(3), 30);
        assert_eq!(config.max_defence(0), 10);
    }

    #[test]
    fn test_level_up_cost() {
        let config = GameConfig::default();
        assert_eq!(config.level_up_cost(1), 100);
        assert_eq!(config.level_up_cost(4), 400);
    }

    #[test]
    fn test_commission_rounds_down() {
        let config = GameConfig::default();
        assert_eq!(config.commission(100), 10);
        assert_eq!(config.commission(19), 1);
        assert_eq!(config.commission(9), 0);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = GameConfig::load(Path::new("/nonexistent/factory-wars.json"));
        assert!(matches!(result, Err(StoreError::Io(_))));
    }
}
