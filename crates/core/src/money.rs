//! Money and currency-exchange value objects.
//!
//! Amounts are carried in **minor units** (cents) as `i64`; exchange rates
//! are carried in **basis points** (1/10_000) so conversion stays in integer
//! arithmetic end to end.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// Supported currencies.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Eur,
    Gbp,
}

impl Currency {
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
        }
    }
}

impl core::fmt::Display for Currency {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.code())
    }
}

/// An amount of money in a single currency.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyValue {
    /// Amount in the currency's smallest unit (cents/pence).
    amount: i64,
    currency: Currency,
}

impl MoneyValue {
    pub fn of(amount: i64, currency: Currency) -> Self {
        Self { amount, currency }
    }

    pub fn zero(currency: Currency) -> Self {
        Self::of(0, currency)
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    /// Add another amount of the same currency.
    pub fn add(&self, other: &MoneyValue) -> DomainResult<MoneyValue> {
        if self.currency != other.currency {
            return Err(DomainError::validation(format!(
                "currency mismatch: {} + {}",
                self.currency, other.currency
            )));
        }
        let amount = self
            .amount
            .checked_add(other.amount)
            .ok_or_else(|| DomainError::invariant("money amount overflow"))?;
        Ok(MoneyValue::of(amount, self.currency))
    }
}

impl ValueObject for MoneyValue {}

impl core::fmt::Display for MoneyValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

/// Exchange rate from one currency into another, in basis points.
///
/// `factor_bps = 8_500` converts 100 source cents into 85 target cents.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionRate {
    pub source_currency: Currency,
    pub target_currency: Currency,
    pub factor_bps: u32,
}

impl ConversionRate {
    pub fn new(source_currency: Currency, target_currency: Currency, factor_bps: u32) -> Self {
        Self {
            source_currency,
            target_currency,
            factor_bps,
        }
    }

    /// Convert a source-currency amount into the target currency.
    ///
    /// Truncates toward zero, matching integer division on minor units.
    pub fn convert(&self, value: &MoneyValue) -> DomainResult<MoneyValue> {
        if value.currency() != self.source_currency {
            return Err(DomainError::validation(format!(
                "rate {}->{} cannot convert {}",
                self.source_currency,
                self.target_currency,
                value.currency()
            )));
        }
        let converted = (value.amount() as i128 * self.factor_bps as i128) / 10_000;
        let amount = i64::try_from(converted)
            .map_err(|_| DomainError::invariant("converted amount overflow"))?;
        Ok(MoneyValue::of(amount, self.target_currency))
    }
}

impl ValueObject for ConversionRate {}

/// Find the rate converting `source` into `target` in a rate table.
pub fn find_rate(
    rates: &[ConversionRate],
    source: Currency,
    target: Currency,
) -> DomainResult<&ConversionRate> {
    rates
        .iter()
        .find(|r| r.source_currency == source && r.target_currency == target)
        .ok_or_else(|| {
            DomainError::validation(format!("no conversion rate from {source} to {target}"))
        })
}
