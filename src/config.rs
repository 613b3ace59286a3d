use crate::error::ConfigError;
use config::{Config, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_SYMBOL: &str = "ADAUSDT";
pub const BINANCE_API_BASE: &str = "https://api.binance.com";
const ENV_PREFIX: &str = "CYCLEBOT";
const DEFAULT_CONFIG_NAME: &str = "cyclebot";

/// Inputs of one cycle: how much to spend and where the two targets sit.
///
/// Percentages are fractions, so `0.02` means +2%.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrategyConfig {
    pub capital: Decimal,
    pub sell_target_pct: Decimal,
    pub rebuy_drop_pct: Decimal,
    pub symbol: String,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            capital: dec!(50),
            sell_target_pct: dec!(0.02),
            rebuy_drop_pct: dec!(0.03),
            symbol: DEFAULT_SYMBOL.to_string(),
        }
    }
}

impl StrategyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capital <= Decimal::ZERO {
            return Err(ConfigError::NonPositiveCapital(self.capital));
        }
        check_fraction("sell_target_pct", self.sell_target_pct)?;
        check_fraction("rebuy_drop_pct", self.rebuy_drop_pct)?;
        if self.symbol.trim().is_empty() {
            return Err(ConfigError::EmptySymbol);
        }
        Ok(())
    }
}

fn check_fraction(name: &'static str, value: Decimal) -> Result<(), ConfigError> {
    if value <= Decimal::ZERO || value >= Decimal::ONE {
        return Err(ConfigError::PercentOutOfRange { name, value });
    }
    Ok(())
}

/// Price feed settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedSettings {
    pub base_url: String,
    pub timeout_secs: u64,
    pub requests_per_minute: u32,
    /// 0 disables the read cache
    pub cache_ttl_secs: u64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            base_url: BINANCE_API_BASE.to_string(),
            timeout_secs: 10,
            requests_per_minute: 600,
            cache_ttl_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollingSettings {
    pub interval_secs: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self { interval_secs: 10 }
    }
}

impl PollingSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Everything the binary needs, layered as
/// defaults -> config file -> `CYCLEBOT__*` environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    pub strategy: StrategyConfig,
    pub feed: FeedSettings,
    pub polling: PollingSettings,
}

impl Settings {
    /// Load settings from an explicit file, or from `cyclebot.toml` in the
    /// working directory when it exists.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };

        let settings: Settings = Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(file)
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.strategy.validate()?;
        if self.polling.interval_secs == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        // A quote still cached at the next tick would be logged twice
        if self.feed.cache_ttl_secs >= self.polling.interval_secs {
            return Err(ConfigError::CacheOutlivesInterval {
                ttl_secs: self.feed.cache_ttl_secs,
                interval_secs: self.polling.interval_secs,
            });
        }
        Ok(())
    }
}
