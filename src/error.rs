use rust_decimal::Decimal;
use thiserror::Error;

/// Failure reading a price from a [`PriceSource`](crate::execution::PriceSource).
///
/// `Unavailable` is the normal, expected outcome of a flaky feed: the polling
/// loop skips the tick and carries on. `Fatal` ends the run.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    #[error("price unavailable: {0}")]
    Unavailable(String),

    #[error("price source failed: {0}")]
    Fatal(String),
}

impl FeedError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FeedError::Unavailable(_))
    }
}

/// Rejected configuration, or an entry price the targets cannot be built from.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("capital must be positive, got {0}")]
    NonPositiveCapital(Decimal),

    #[error("{name} must be in (0, 1), got {value}")]
    PercentOutOfRange { name: &'static str, value: Decimal },

    #[error("symbol must not be empty")]
    EmptySymbol,

    #[error("poll interval must be at least one second")]
    ZeroInterval,

    #[error("cache ttl ({ttl_secs}s) must be shorter than the poll interval ({interval_secs}s)")]
    CacheOutlivesInterval { ttl_secs: u64, interval_secs: u64 },

    #[error("entry price must be positive, got {0}")]
    NonPositiveEntry(Decimal),

    #[error("capital {capital} buys less than 0.1 units at {entry}")]
    ZeroQuantity { capital: Decimal, entry: Decimal },

    #[error("entry price {entry} is too small: targets collapse to sell={sell_target} rebuy={rebuy_target} at 4 decimal places")]
    DegenerateTargets {
        entry: Decimal,
        sell_target: Decimal,
        rebuy_target: Decimal,
    },

    #[error("failed to load settings: {0}")]
    Load(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Load(e.to_string())
    }
}

/// Rejected cycle command.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CycleError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("a cycle is already active")]
    AlreadyActive,

    #[error("could not read entry price: {0}")]
    Feed(#[from] FeedError),
}

pub type CycleResult<T> = std::result::Result<T, CycleError>;
