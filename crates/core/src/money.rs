//! Exact monetary amounts: integer minor units + ISO-4217-style currency code.
//!
//! Balances are checked with exact arithmetic, so there is no floating point
//! anywhere in this module.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// Three-letter uppercase currency code (e.g. `USD`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency([u8; 3]);

impl Currency {
    pub const USD: Currency = Currency(*b"USD");
    pub const EUR: Currency = Currency(*b"EUR");

    pub fn as_str(&self) -> &str {
        // Constructed only from validated ASCII.
        core::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl FromStr for Currency {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(u8::is_ascii_uppercase) {
            return Err(DomainError::validation(format!(
                "currency code must be three uppercase letters, got {s:?}"
            )));
        }
        Ok(Self([bytes[0], bytes[1], bytes[2]]))
    }
}

impl TryFrom<String> for Currency {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.as_str().to_string()
    }
}

impl core::fmt::Display for Currency {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ValueObject for Currency {}

/// An amount of money in minor units (cents) of one currency.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    pub amount_minor: i64,
    pub currency: Currency,
}

impl Money {
    pub fn new(amount_minor: i64, currency: Currency) -> Self {
        Self {
            amount_minor,
            currency,
        }
    }

    pub fn zero(currency: Currency) -> Self {
        Self::new(0, currency)
    }

    pub fn is_positive(&self) -> bool {
        self.amount_minor > 0
    }

    /// Rejects zero and negative amounts; every money movement is positive.
    pub fn ensure_positive(&self) -> DomainResult<()> {
        if self.is_positive() {
            Ok(())
        } else {
            Err(DomainError::validation("amount must be positive"))
        }
    }

    pub fn ensure_same_currency(&self, other: Currency) -> DomainResult<()> {
        if self.currency == other {
            Ok(())
        } else {
            Err(DomainError::CurrencyMismatch {
                left: self.currency,
                right: other,
            })
        }
    }

    pub fn checked_add(self, other: Money) -> DomainResult<Money> {
        self.ensure_same_currency(other.currency)?;
        let amount = self
            .amount_minor
            .checked_add(other.amount_minor)
            .ok_or_else(|| DomainError::validation("amount overflow"))?;
        Ok(Money::new(amount, self.currency))
    }

    pub fn checked_sub(self, other: Money) -> DomainResult<Money> {
        self.ensure_same_currency(other.currency)?;
        let amount = self
            .amount_minor
            .checked_sub(other.amount_minor)
            .ok_or_else(|| DomainError::validation("amount overflow"))?;
        Ok(Money::new(amount, self.currency))
    }

    /// Sum minor-unit amounts of one currency.
    ///
    /// Accumulates in `i128` and fails only if the final total does not fit
    /// an `i64`, so totals across many accounts never wrap.
    pub fn total(currency: Currency, amounts: impl IntoIterator<Item = i64>) -> DomainResult<Money> {
        let sum: i128 = amounts.into_iter().map(i128::from).sum();
        let amount = i64::try_from(sum).map_err(|_| {
            DomainError::validation(format!("total of {sum} {currency} is out of range"))
        })?;
        Ok(Money::new(amount, currency))
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} {}", self.amount_minor, self.currency)
    }
}

impl ValueObject for Money {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_requires_three_uppercase_letters() {
        assert!("usd".parse::<Currency>().is_err());
        assert!("USDT".parse::<Currency>().is_err());
        assert_eq!("EUR".parse::<Currency>().unwrap(), Currency::EUR);
    }

    #[test]
    fn money_serializes_minor_units_and_code() {
        let m = Money::new(12_345, Currency::USD);
        let json = serde_json::to_value(m).unwrap();
        assert_eq!(json, serde_json::json!({ "amount_minor": 12345, "currency": "USD" }));

        let back: Money = serde_json::from_value(json).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn bad_currency_is_rejected_on_deserialize() {
        let res: Result<Money, _> =
            serde_json::from_value(serde_json::json!({ "amount_minor": 1, "currency": "us" }));
        assert!(res.is_err());
    }

    #[test]
    fn arithmetic_refuses_mixed_currencies() {
        let usd = Money::new(100, Currency::USD);
        let eur = Money::new(100, Currency::EUR);
        assert!(matches!(
            usd.checked_add(eur),
            Err(DomainError::CurrencyMismatch { .. })
        ));
        assert_eq!(usd.checked_sub(usd).unwrap(), Money::zero(Currency::USD));
    }

    #[test]
    fn totals_past_i64_are_refused_not_wrapped() {
        let big = 5_000_000_000_000_000_000;
        assert!(Money::total(Currency::USD, [big, big]).is_err());

        // Intermediate sums may leave the i64 range as long as the total fits.
        let total = Money::total(Currency::USD, [big, big, -big]).unwrap();
        assert_eq!(total.amount_minor, big);
        assert_eq!(Money::total(Currency::USD, []).unwrap(), Money::zero(Currency::USD));
    }

    #[test]
    fn non_positive_amounts_fail_validation() {
        assert!(Money::new(0, Currency::USD).ensure_positive().is_err());
        assert!(Money::new(-5, Currency::USD).ensure_positive().is_err());
        assert!(Money::new(1, Currency::USD).ensure_positive().is_ok());
    }
}
