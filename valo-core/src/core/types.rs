//! Core domain types.
//!
//! Everything crossing a component boundary is a flat row type carrying only
//! the keys the engine needs. Decimals live at the boundaries; the pricing
//! fast path works in `i64`/`i128` fixed-point (see [`fixed_point`]).

use rust_decimal::Decimal;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Product identifier as assigned by the upstream reference-data system.
pub type ProductId = u64;

/// Account identifier; shard ownership is `account_id % shard_total`.
pub type AccountId = u64;

/// Nanoseconds since the unix epoch.
pub type TimestampNs = u64;

/// Current wall-clock time in nanoseconds since the unix epoch.
#[inline]
pub fn now_ns() -> TimestampNs {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// ISO-4217 style three-letter currency code, stored inline.
///
/// Copy semantics and a fixed 3-byte representation keep the FX cache keys
/// allocation-free.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Currency([u8; 3]);

impl Currency {
    /// The conventional pivot for triangulated conversion.
    pub const USD: Currency = Currency(*b"USD");

    pub fn as_str(&self) -> &str {
        // Invariant: constructed only from validated ASCII
        std::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(|b| b.is_ascii_alphabetic()) {
            return Err(format!("invalid currency code: {s:?}"));
        }
        let mut out = [0u8; 3];
        for (i, b) in bytes.iter().enumerate() {
            out[i] = b.to_ascii_uppercase();
        }
        Ok(Currency(out))
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Currency({})", self.as_str())
    }
}

impl Serialize for Currency {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Currency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// A currency pair `base‖quote`, e.g. `EURUSD`.
///
/// Only one direction is ever stored; the inverse rate is derived on read.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CurrencyPair {
    pub base: Currency,
    pub quote: Currency,
}

impl CurrencyPair {
    pub fn new(base: Currency, quote: Currency) -> Self {
        Self { base, quote }
    }

    /// The same pair with base and quote swapped.
    pub fn inverted(&self) -> Self {
        Self {
            base: self.quote,
            quote: self.base,
        }
    }
}

impl FromStr for CurrencyPair {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 6 || !s.is_ascii() {
            return Err(format!("invalid currency pair: {s:?}"));
        }
        Ok(Self {
            base: s[..3].parse()?,
            quote: s[3..].parse()?,
        })
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.base, self.quote)
    }
}

impl fmt::Debug for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CurrencyPair({}{})", self.base, self.quote)
    }
}

impl Serialize for CurrencyPair {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{}{}", self.base, self.quote))
    }
}

impl<'de> Deserialize<'de> for CurrencyPair {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// Asset class of a priced product; drives strategy dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetClass {
    Equity,
    Fx,
    Cash,
    FxForward,
    EquitySwap,
    Bond,
}

impl AssetClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equity => "EQUITY",
            Self::Fx => "FX",
            Self::Cash => "CASH",
            Self::FxForward => "FX_FORWARD",
            Self::EquitySwap => "EQUITY_SWAP",
            Self::Bond => "BOND",
        }
    }
}

impl FromStr for AssetClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EQUITY" => Ok(Self::Equity),
            "FX" => Ok(Self::Fx),
            "CASH" => Ok(Self::Cash),
            "FX_FORWARD" => Ok(Self::FxForward),
            "EQUITY_SWAP" => Ok(Self::EquitySwap),
            "BOND" => Ok(Self::Bond),
            other => Err(format!("unknown asset class: {other:?}")),
        }
    }
}

/// An immutable price observation for one product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceTick {
    pub product_id: ProductId,
    pub price: Decimal,
    pub currency: Currency,
    pub asset_class: AssetClass,
    /// Name of the contributing source, carried through to the cold store.
    #[serde(default)]
    pub source: String,
    /// 1 = highest quality. The price-hierarchy component upstream assigns
    /// this; the engine trusts it.
    pub source_priority: u8,
    #[serde(rename = "timestamp")]
    pub timestamp_ns: TimestampNs,
    #[serde(default)]
    pub stale: bool,
}

impl PriceTick {
    /// Age of this tick relative to `now`, saturating at zero.
    #[inline]
    pub fn age_ns(&self, now: TimestampNs) -> u64 {
        now.saturating_sub(self.timestamp_ns)
    }
}

/// An immutable FX-rate observation for one pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FxRate {
    pub pair: CurrencyPair,
    pub rate: Decimal,
    #[serde(rename = "timestamp")]
    pub timestamp_ns: TimestampNs,
}

/// A position delta from the `positions.updates` stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionDelta {
    pub account_id: AccountId,
    pub product_id: ProductId,
    /// Signed; short positions are negative. Zero means "remove".
    pub quantity: Decimal,
}

/// One position row inside an EOD snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EodPosition {
    pub product_id: ProductId,
    pub quantity: Decimal,
}

/// A whole-account snapshot from the `positions.eod` stream.
///
/// `business_date` is opaque to the engine; calendar logic lives upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EodSnapshot {
    pub account_id: AccountId,
    pub business_date: String,
    pub positions: Vec<EodPosition>,
}

/// A computed market value for one (account, product).
///
/// Derived, never stored - lives only in the conflation mailbox between
/// flushes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Valuation {
    pub account_id: AccountId,
    pub product_id: ProductId,
    pub market_value: Decimal,
    pub price_used: Decimal,
    pub fx_rate_used: Decimal,
    pub source: String,
    pub computed_at: TimestampNs,
}

/// Fixed-point helpers for the pricing fast path.
///
/// The strategy contract pins six decimal places: values are `i64` scaled by
/// 10^6, intermediates widen to `i128`. Conversions are checked; out-of-range
/// inputs push the caller back onto the Decimal path.
pub mod fixed_point {
    use crate::core::errors::FixedPointError;
    use rust_decimal::prelude::ToPrimitive;
    use rust_decimal::Decimal;

    /// Scale factor for 6 decimal places.
    pub const SCALE: i64 = 1_000_000;

    /// `SCALE * SCALE`, the divisor after a three-way product.
    pub const SCALE_SQ: i128 = (SCALE as i128) * (SCALE as i128);

    /// Convert a `Decimal` to fixed-point, rounding to 6 decimal places.
    #[inline]
    pub fn to_fixed(value: Decimal) -> Result<i64, FixedPointError> {
        let scaled = value
            .checked_mul(Decimal::from(SCALE))
            .ok_or(FixedPointError::OutOfRange { value })?;
        scaled
            .round()
            .to_i64()
            .ok_or(FixedPointError::OutOfRange { value })
    }

    /// Convert a fixed-point value back to a `Decimal` with scale 6.
    #[inline]
    pub fn from_fixed(value: i64) -> Decimal {
        Decimal::from_i128_with_scale(value as i128, 6)
    }

    /// Divide with round-half-up, the rounding the Decimal path applies at
    /// scale 6.
    #[inline]
    pub fn div_round(numerator: i128, divisor: i128) -> i128 {
        let half = divisor / 2;
        if numerator >= 0 {
            (numerator + half) / divisor
        } else {
            (numerator - half) / divisor
        }
    }

    /// `a * b * c / SCALE^2` with a single terminal rounding.
    ///
    /// Returns `None` on intermediate overflow; callers fall back to the
    /// Decimal path.
    #[inline]
    pub fn mul3(a: i64, b: i64, c: i64) -> Option<i64> {
        let ab = (a as i128).checked_mul(b as i128)?;
        let abc = ab.checked_mul(c as i128)?;
        i64::try_from(div_round(abc, SCALE_SQ)).ok()
    }
}
