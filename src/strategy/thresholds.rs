use crate::error::ConfigError;
use rust_decimal::{Decimal, RoundingStrategy};

/// Decimal places of the sell and rebuy trigger prices
pub const TARGET_DP: u32 = 4;
/// Decimal places of the simulated position size
pub const QUANTITY_DP: u32 = 1;

/// Half-up. Changing this moves the trigger prices, and with them every
/// simulated outcome.
pub const ROUNDING: RoundingStrategy = RoundingStrategy::MidpointAwayFromZero;

/// Trigger prices of one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Targets {
    pub sell_target: Decimal,
    pub rebuy_target: Decimal,
}

/// Compute the sell and rebuy trigger prices for an entry price.
///
/// `sell_target = round4(entry * (1 + sell_pct))` and
/// `rebuy_target = round4(sell_target * (1 - rebuy_pct))`. The rebuy target is
/// derived from the rounded sell target, not from the raw product.
///
/// Entry prices so small that 4-place rounding collapses the targets onto each
/// other (or onto the entry) are rejected, so `rebuy_target < sell_target` and
/// `entry < sell_target` always hold for a returned value.
pub fn compute_targets(
    entry_price: Decimal,
    sell_target_pct: Decimal,
    rebuy_drop_pct: Decimal,
) -> Result<Targets, ConfigError> {
    if entry_price <= Decimal::ZERO {
        return Err(ConfigError::NonPositiveEntry(entry_price));
    }
    if sell_target_pct <= Decimal::ZERO {
        return Err(ConfigError::PercentOutOfRange {
            name: "sell_target_pct",
            value: sell_target_pct,
        });
    }
    if rebuy_drop_pct <= Decimal::ZERO || rebuy_drop_pct >= Decimal::ONE {
        return Err(ConfigError::PercentOutOfRange {
            name: "rebuy_drop_pct",
            value: rebuy_drop_pct,
        });
    }

    let sell_target = round_target(entry_price * (Decimal::ONE + sell_target_pct));
    let rebuy_target = round_target(sell_target * (Decimal::ONE - rebuy_drop_pct));

    if sell_target <= entry_price || rebuy_target >= sell_target {
        return Err(ConfigError::DegenerateTargets {
            entry: entry_price,
            sell_target,
            rebuy_target,
        });
    }

    Ok(Targets {
        sell_target,
        rebuy_target,
    })
}

fn round_target(price: Decimal) -> Decimal {
    price.round_dp_with_strategy(TARGET_DP, ROUNDING)
}

/// Units bought with `capital` at `entry_price`, rounded to one decimal place.
///
/// A position that rounds down to nothing is rejected.
pub fn compute_quantity(capital: Decimal, entry_price: Decimal) -> Result<Decimal, ConfigError> {
    if capital <= Decimal::ZERO {
        return Err(ConfigError::NonPositiveCapital(capital));
    }
    if entry_price <= Decimal::ZERO {
        return Err(ConfigError::NonPositiveEntry(entry_price));
    }
    let quantity = (capital / entry_price).round_dp_with_strategy(QUANTITY_DP, ROUNDING);
    if quantity.is_zero() {
        return Err(ConfigError::ZeroQuantity {
            capital,
            entry: entry_price,
        });
    }
    Ok(quantity)
}
