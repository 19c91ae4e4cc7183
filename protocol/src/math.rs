//! # Fixed-Point Arithmetic
//!
//! All amounts, biases, slopes and weights are unsigned 256-bit integers
//! interpreted as fixed point with 18 decimals where a ratio is involved.
//! Division truncates towards zero. Overflow and underflow are errors, not
//! wrap-arounds and not panics: `U256`'s operator impls panic on overflow,
//! so the accounting path uses [`FixedMath`] exclusively.
//!
//! The one deliberate exception is [`FixedMath::floor_sub`]: a decaying
//! balance that would go negative is clamped to zero, because that is the
//! meaning of "the lock expired".

use primitive_types::U256;
use thiserror::Error;

/// Unsigned 256-bit amount. Token quantities, ve-balances, slopes, weights.
pub type Amount = U256;

/// Arithmetic failures on the accounting path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MathError {
    /// Result does not fit in 256 bits.
    #[error("arithmetic overflow")]
    Overflow,

    /// Subtraction would go below zero.
    #[error("arithmetic underflow")]
    Underflow,

    /// Divisor was zero.
    #[error("division by zero")]
    DivisionByZero,
}

/// Checked arithmetic with EVM-style semantics: truncating division and
/// fail-on-overflow.
pub trait FixedMath: Sized {
    /// `self + rhs`, failing on overflow.
    fn try_add(self, rhs: Self) -> Result<Self, MathError>;
    /// `self - rhs`, failing on underflow.
    fn try_sub(self, rhs: Self) -> Result<Self, MathError>;
    /// `self * rhs`, failing on overflow.
    fn try_mul(self, rhs: Self) -> Result<Self, MathError>;
    /// `self / rhs` truncated, failing on a zero divisor.
    fn try_div(self, rhs: Self) -> Result<Self, MathError>;
    /// `self * mul / div` with a full 256-bit intermediate product.
    fn mul_div(self, mul: Self, div: Self) -> Result<Self, MathError>;
    /// `max(self - rhs, 0)`.
    fn floor_sub(self, rhs: Self) -> Self;
}

impl FixedMath for Amount {
    fn try_add(self, rhs: Self) -> Result<Self, MathError> {
        self.checked_add(rhs).ok_or(MathError::Overflow)
    }

    fn try_sub(self, rhs: Self) -> Result<Self, MathError> {
        self.checked_sub(rhs).ok_or(MathError::Underflow)
    }

    fn try_mul(self, rhs: Self) -> Result<Self, MathError> {
        self.checked_mul(rhs).ok_or(MathError::Overflow)
    }

    fn try_div(self, rhs: Self) -> Result<Self, MathError> {
        if rhs.is_zero() {
            return Err(MathError::DivisionByZero);
        }
        Ok(self / rhs)
    }

    fn mul_div(self, mul: Self, div: Self) -> Result<Self, MathError> {
        self.try_mul(mul)?.try_div(div)
    }

    fn floor_sub(self, rhs: Self) -> Self {
        self.saturating_sub(rhs)
    }
}

/// Lifts a second count into amount space.
pub fn secs(t: u64) -> Amount {
    Amount::from(t)
}

/// Serde adapter writing an [`Amount`] as a decimal string.
///
/// `primitive-types` serializes to `0x`-prefixed hex, which is fine for
/// machines and miserable for operators editing TOML.
pub mod decimal {
    use super::Amount;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
        let s = String::deserialize(deserializer)?;
        Amount::from_dec_str(s.trim())
            .map_err(|e| de::Error::custom(format!("invalid decimal amount {:?}: {:?}", s, e)))
    }
}
