//! NEAR primitives used across the SDK: account ids, token amounts and gas units.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::KeypomError;

/// An amount of yoctoNEAR (10^-24 NEAR).
pub type Balance = u128;

/// An amount of gas units.
pub type Gas = u64;

/// Number of yoctoNEAR in one NEAR.
pub const ONE_NEAR: Balance = 10u128.pow(NEAR_DECIMALS);

/// One yoctoNEAR, the deposit required by `ft_transfer_call` and `nft_transfer_call`.
pub const ONE_YOCTO: Balance = 1;

/// One teragas.
pub const TGAS: Gas = 1_000_000_000_000;

const NEAR_DECIMALS: u32 = 24;

/// A validated NEAR account id.
///
/// Follows the protocol rules: 2 to 64 characters, lowercase alphanumerics separated by single
/// `-`, `_` or `.` characters, never starting or ending with a separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(String);

impl AccountId {
    const MIN_LEN: usize = 2;
    const MAX_LEN: usize = 64;

    /// Returns the account id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), String> {
        if s.len() < Self::MIN_LEN || s.len() > Self::MAX_LEN {
            return Err(format!(
                "length must be between {} and {}, got {}",
                Self::MIN_LEN,
                Self::MAX_LEN,
                s.len()
            ));
        }

        let mut last_was_separator = true;
        for c in s.chars() {
            match c {
                'a'..='z' | '0'..='9' => last_was_separator = false,
                '-' | '_' | '.' => {
                    if last_was_separator {
                        return Err(format!("unexpected separator '{c}'"));
                    }
                    last_was_separator = true;
                }
                _ => return Err(format!("invalid character '{c}'")),
            }
        }
        if last_was_separator {
            return Err("must not end with a separator".to_string());
        }
        Ok(())
    }
}

impl FromStr for AccountId {
    type Err = KeypomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::validate(s).map_err(|reason| KeypomError::InvalidInput {
            attribute: "account_id".to_string(),
            reason: format!("{s}: {reason}"),
        })?;
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for AccountId {
    type Error = KeypomError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_str(&value)
    }
}

impl From<AccountId> for String {
    fn from(value: AccountId) -> Self {
        value.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AccountId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Parses a human readable NEAR amount (e.g. `"1.5"`) into yoctoNEAR.
///
/// # Errors
/// Returns `InvalidInput` for malformed amounts or amounts with more than 24 decimals.
pub fn parse_near_amount(amount: &str) -> Result<Balance, KeypomError> {
    parse_decimal_amount(amount, NEAR_DECIMALS)
}

/// Parses a decimal amount into the smallest unit of a token with `decimals` decimals.
///
/// The conversion is exact: digits beyond the token's precision are rejected instead of rounded.
///
/// # Errors
/// Returns `InvalidInput` for malformed amounts, excess precision or values above `u128::MAX`.
pub fn parse_decimal_amount(amount: &str, decimals: u32) -> Result<u128, KeypomError> {
    let invalid = |reason: &str| KeypomError::InvalidInput {
        attribute: "amount".to_string(),
        reason: format!("{amount}: {reason}"),
    };

    let amount = amount.trim().replace('_', "");
    let (whole, fraction) = amount.split_once('.').unwrap_or((amount.as_str(), ""));
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid("empty amount"));
    }
    if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        return Err(invalid("not a decimal number"));
    }
    let decimals_len = usize::try_from(decimals).map_err(|_| invalid("too many decimals"))?;
    let fraction = fraction.trim_end_matches('0');
    if fraction.len() > decimals_len {
        return Err(invalid("more decimals than the token supports"));
    }

    let mut digits = String::with_capacity(whole.len() + decimals_len);
    digits.push_str(whole);
    digits.push_str(fraction);
    digits.extend(std::iter::repeat('0').take(decimals_len - fraction.len()));
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(0);
    }
    digits.parse::<u128>().map_err(|_| invalid("amount is too large"))
}

/// Formats a yoctoNEAR amount as a NEAR decimal string without trailing zeros.
#[must_use]
pub fn format_near_amount(amount: Balance) -> String {
    let whole = amount / ONE_NEAR;
    let fraction = amount % ONE_NEAR;
    if fraction == 0 {
        return whole.to_string();
    }
    let fraction = format!("{fraction:024}");
    format!("{whole}.{}", fraction.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_id_validation() {
        assert!("keypom.near".parse::<AccountId>().is_ok());
        assert!("v2.keypom.testnet".parse::<AccountId>().is_ok());
        assert!("a_b-c.near".parse::<AccountId>().is_ok());

        assert!("a".parse::<AccountId>().is_err());
        assert!("Upper.near".parse::<AccountId>().is_err());
        assert!(".leading.near".parse::<AccountId>().is_err());
        assert!("trailing.".parse::<AccountId>().is_err());
        assert!("double..dot".parse::<AccountId>().is_err());
        assert!("x".repeat(65).parse::<AccountId>().is_err());
    }

    #[test]
    fn test_account_id_serde() {
        let id: AccountId = serde_json::from_str("\"alice.near\"").unwrap();
        assert_eq!(id.as_str(), "alice.near");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"alice.near\"");
        assert!(serde_json::from_str::<AccountId>("\"Alice\"").is_err());
    }

    #[test]
    fn test_parse_near_amount() {
        assert_eq!(parse_near_amount("1").unwrap(), ONE_NEAR);
        assert_eq!(parse_near_amount("0.034").unwrap(), 34 * 10u128.pow(21));
        assert_eq!(parse_near_amount("1.5").unwrap(), 15 * 10u128.pow(23));
        assert_eq!(parse_near_amount(".5").unwrap(), 5 * 10u128.pow(23));
        assert_eq!(parse_near_amount("0").unwrap(), 0);
        assert_eq!(parse_near_amount("0.000000000000000000000001").unwrap(), 1);

        assert!(parse_near_amount("").is_err());
        assert!(parse_near_amount("1.2.3").is_err());
        assert!(parse_near_amount("-1").is_err());
        assert!(parse_near_amount("0.0000000000000000000000001").is_err());
    }

    #[test]
    fn test_parse_decimal_amount_for_tokens() {
        assert_eq!(parse_decimal_amount("1", 6).unwrap(), 1_000_000);
        assert_eq!(parse_decimal_amount("2.25", 6).unwrap(), 2_250_000);
        assert_eq!(parse_decimal_amount("7", 0).unwrap(), 7);
        assert!(parse_decimal_amount("0.1", 0).is_err());
    }

    #[test]
    fn test_format_near_amount() {
        assert_eq!(format_near_amount(ONE_NEAR), "1");
        assert_eq!(format_near_amount(15 * 10u128.pow(23)), "1.5");
        assert_eq!(format_near_amount(1), "0.000000000000000000000001");
    }
}
