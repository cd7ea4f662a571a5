use crate::errors::DomainError;
use primitive_types::U256;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Decimals of the native currency (wei per ether).
pub const ETHER_DECIMALS: u8 = 18;

/// An integer amount in minor units together with its decimal precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Amount {
    pub raw: U256,
    pub decimals: u8,
}

impl Amount {
    pub fn new(raw: U256, decimals: u8) -> Self {
        Self { raw, decimals }
    }

    pub fn wei(raw: impl Into<U256>) -> Self {
        Self::new(raw.into(), ETHER_DECIMALS)
    }

    pub fn zero() -> Self {
        Self::wei(U256::zero())
    }

    /// Parses a JSON-RPC hex quantity such as `0x1bc16d674ec80000` as wei.
    pub fn from_hex_quantity(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| DomainError::InvalidQuantity(format!("{trimmed} is not 0x-prefixed")))?;
        if digits.is_empty() {
            return Err(DomainError::InvalidQuantity("empty quantity".to_string()));
        }
        let value = U256::from_str_radix(digits, 16)
            .map_err(|e| DomainError::InvalidQuantity(format!("{trimmed}: {e:?}")))?;
        Ok(Self::wei(value))
    }

    /// Converts to a decimal in major units, `None` if the raw value does not
    /// fit a `Decimal` mantissa.
    pub fn to_decimal(&self) -> Option<Decimal> {
        if self.raw.bits() > 96 {
            return None;
        }
        let raw = i128::try_from(self.raw.as_u128()).ok()?;
        Decimal::try_from_i128_with_scale(raw, u32::from(self.decimals))
            .ok()
            .map(|d| d.normalize())
    }
}

impl Default for Amount {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_decimal() {
            Some(d) => write!(f, "{d}"),
            None => write!(f, "{} (10^-{})", self.raw, self.decimals),
        }
    }
}
