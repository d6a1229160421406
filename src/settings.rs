//! Operator Settings
//! Mission: Typed views over the per-user `trading` and `dexes` categories

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

pub const TRADING: &str = "trading";
pub const DEXES: &str = "dexes";

/// Trading parameters. Percentages are expressed in percent units (0.25 = 0.25%).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TradingSettings {
    pub min_profit_threshold: f64,
    pub max_slippage: f64,
    pub min_trade_size: f64,
    pub max_trade_size: f64,
    /// Preferred notional per trade in USD, clamped into the size bounds
    pub trade_size: f64,
    /// Operator risk tolerance, 1 (cautious) to 10 (aggressive)
    pub risk_level: u8,
    pub auto_execute: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_risk_score: Option<u8>,
}

impl Default for TradingSettings {
    fn default() -> Self {
        Self {
            min_profit_threshold: 0.25,
            max_slippage: 0.5,
            min_trade_size: 10.0,
            max_trade_size: 1000.0,
            trade_size: 100.0,
            risk_level: 5,
            auto_execute: false,
            max_risk_score: None,
        }
    }
}

impl TradingSettings {
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let settings: TradingSettings = serde_json::from_value(value.clone())
            .map_err(|e| format!("Invalid trading settings: {}", e))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.min_profit_threshold >= 0.0 && self.min_profit_threshold.is_finite()) {
            return Err("min_profit_threshold must be a non-negative number".into());
        }
        if !(self.max_slippage > 0.0 && self.max_slippage <= 50.0) {
            return Err("max_slippage must be between 0 and 50 percent".into());
        }
        if !(self.min_trade_size > 0.0) {
            return Err("min_trade_size must be positive".into());
        }
        if self.max_trade_size < self.min_trade_size {
            return Err("max_trade_size must be at least min_trade_size".into());
        }
        if !(1..=10).contains(&self.risk_level) {
            return Err("risk_level must be between 1 and 10".into());
        }
        if let Some(max) = self.max_risk_score {
            if !(1..=10).contains(&max) {
                return Err("max_risk_score must be between 1 and 10".into());
            }
        }
        Ok(())
    }

    /// Notional used for sizing legs and estimating profit
    pub fn notional_usd(&self) -> f64 {
        self.trade_size
            .clamp(self.min_trade_size, self.max_trade_size.max(self.min_trade_size))
    }

    pub fn slippage_bps(&self) -> u16 {
        (self.max_slippage * 100.0).round().clamp(1.0, 10_000.0) as u16
    }
}

/// Venue on/off switches keyed by venue name
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct DexSettings(pub BTreeMap<String, bool>);

impl DexSettings {
    pub fn all_enabled(venues: &[String]) -> Self {
        Self(venues.iter().map(|v| (v.clone(), true)).collect())
    }

    pub fn from_value(value: &Value, known_venues: &[String]) -> Result<Self, String> {
        let map: BTreeMap<String, bool> = serde_json::from_value(value.clone())
            .map_err(|_| "dexes settings must map venue names to booleans".to_string())?;
        if let Some(unknown) = map.keys().find(|k| !known_venues.contains(k)) {
            return Err(format!("Unknown venue: {}", unknown));
        }
        Ok(Self(map))
    }

    /// Venues allowed to quote. Venues missing from the map stay enabled.
    pub fn enabled_venues(&self, known_venues: &[String]) -> HashSet<String> {
        known_venues
            .iter()
            .filter(|v| self.0.get(*v).copied().unwrap_or(true))
            .cloned()
            .collect()
    }
}

/// Categories seeded for every new account
pub fn default_categories(known_venues: &[String]) -> Vec<(&'static str, Value)> {
    vec![
        (
            TRADING,
            serde_json::to_value(TradingSettings::default()).unwrap_or(Value::Null),
        ),
        (
            DEXES,
            serde_json::to_value(DexSettings::all_enabled(known_venues)).unwrap_or(Value::Null),
        ),
    ]
}

/// Validate an update for a known category. Other categories are free-form objects.
pub fn validate_category(category: &str, value: &Value, known_venues: &[String]) -> Result<(), String> {
    if !value.is_object() {
        return Err("settings must be a JSON object".into());
    }
    match category {
        TRADING => TradingSettings::from_value(value).map(|_| ()),
        DEXES => DexSettings::from_value(value, known_venues).map(|_| ()),
        _ => Ok(()),
    }
}
