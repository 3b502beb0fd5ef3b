//! Ethereum address validation and unit conversion.
//!
//! Addresses are compared in a canonical lower-case form; the display form the
//! explorer returned is kept untouched on the records themselves. Value and fee
//! conversion works on 256-bit integers so token amounts never overflow before
//! they are rounded.

use alloy_primitives::{Address, U256};
use thiserror::Error;

/// Decimals of the native currency (wei → ETH).
pub const NATIVE_DECIMALS: u32 = 18;

/// Fractional digits kept on converted amounts and fees.
pub const AMOUNT_PLACES: u32 = 8;

#[derive(Error, Debug)]
pub enum AddressError {
    #[error("Empty address")]
    Empty,

    #[error("Invalid address format: {0}")]
    InvalidFormat(String),

    #[error("Address too short or long: {0}")]
    InvalidLength(String),
}

/// Validated 20-byte Ethereum address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValidatedAddress(Address);

impl ValidatedAddress {
    /// Parse an address string, accepting any casing and an optional 0x prefix
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(AddressError::Empty);
        }

        let hex = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if hex.len() != 40 {
            return Err(AddressError::InvalidLength(input.to_string()));
        }

        // Parse the lower-cased form so mixed-case input is not checked as EIP-55
        let address: Address = format!("0x{}", hex.to_ascii_lowercase())
            .parse()
            .map_err(|_| AddressError::InvalidFormat(input.to_string()))?;

        Ok(Self(address))
    }

    /// Canonical lower-case `0x` form used as identity key
    pub fn canonical(&self) -> String {
        self.to_checksum().to_ascii_lowercase()
    }

    /// EIP-55 checksummed representation
    pub fn to_checksum(&self) -> String {
        self.0.to_checksum(None)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl std::fmt::Display for ValidatedAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_checksum())
    }
}

/// Canonical identity of a possibly malformed address string.
///
/// Explorer data is trusted, so this does not validate; it only trims and
/// lower-cases. An empty result means "no address" (e.g. contract creation).
pub fn canonical(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

/// Case-insensitive address equality
pub fn same_address(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Parse an integer minor-unit string; anything malformed counts as zero.
pub fn parse_units(raw: &str) -> U256 {
    raw.trim().parse::<U256>().unwrap_or(U256::ZERO)
}

fn pow10(exp: u32) -> U256 {
    U256::from(10u64).pow(U256::from(exp))
}

/// Convert integer minor units to a decimal amount rounded half-up to
/// [`AMOUNT_PLACES`] fractional digits.
pub fn units_to_decimal(value: U256, decimals: u32) -> f64 {
    let scaled = if decimals <= AMOUNT_PLACES {
        value.saturating_mul(pow10(AMOUNT_PLACES - decimals))
    } else {
        let shift = decimals - AMOUNT_PLACES;
        // 10^78 no longer fits in 256 bits and every value rounds to zero
        if shift > 77 {
            return 0.0;
        }
        let divisor = pow10(shift);
        value.saturating_add(divisor / U256::from(2u64)) / divisor
    };

    let scale = pow10(AMOUNT_PLACES);
    let whole = scaled / scale;
    let frac = u64::try_from(scaled % scale).unwrap_or_default();

    format!("{}.{:08}", whole, frac).parse::<f64>().unwrap_or(0.0)
}

/// Convert a raw minor-unit string with the given decimals
pub fn to_decimal(raw: &str, decimals: u32) -> f64 {
    units_to_decimal(parse_units(raw), decimals)
}

/// Transaction fee `gas_price * gas_used`, always in native units
pub fn native_fee(gas_price: &str, gas_used: &str) -> f64 {
    let fee = parse_units(gas_price).saturating_mul(parse_units(gas_used));
    units_to_decimal(fee, NATIVE_DECIMALS)
}

/// Token decimals from an explorer field, falling back to 18 when absent or malformed
pub fn token_decimals(raw: Option<&str>) -> u32 {
    raw.and_then(|d| d.trim().parse::<u32>().ok())
        .unwrap_or(NATIVE_DECIMALS)
}

/// Leading characters of an address used in file and folder names
pub fn short_prefix(address: &str) -> String {
    let trimmed = address.trim();
    if trimmed.is_empty() {
        return "trace".to_string();
    }
    trimmed.chars().take(6).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_address() {
        let addr = ValidatedAddress::parse("0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045")
            .expect("Should parse valid address");
        assert!(!addr.is_zero());
        assert_eq!(addr.canonical(), "0xd8da6bf26964af9d7eed9e03e53415d37aa96045");
        assert_eq!(
            addr.to_checksum(),
            "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045"
        );
    }

    #[test]
    fn test_mixed_case_without_prefix() {
        let addr = ValidatedAddress::parse("D8DA6BF26964AF9D7EED9E03E53415D37AA96045")
            .expect("Should parse upper-case address without prefix");
        assert_eq!(addr.canonical(), "0xd8da6bf26964af9d7eed9e03e53415d37aa96045");
    }

    #[test]
    fn test_invalid_address() {
        assert!(matches!(ValidatedAddress::parse(""), Err(AddressError::Empty)));
        assert!(matches!(ValidatedAddress::parse("   "), Err(AddressError::Empty)));
        assert!(ValidatedAddress::parse("0x123").is_err());
        assert!(ValidatedAddress::parse("0xzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz").is_err());
    }

    #[test]
    fn test_same_address_ignores_case() {
        assert!(same_address("0xAbC", "0xabc"));
        assert!(same_address(" 0xabc", "0xABC "));
        assert!(!same_address("0xabc", "0xabd"));
        assert_eq!(canonical(" 0xAbC "), "0xabc");
    }

    #[test]
    fn test_native_conversion() {
        assert_eq!(to_decimal("1500000000000000000", NATIVE_DECIMALS), 1.5);
        assert_eq!(to_decimal("1", NATIVE_DECIMALS), 0.0);
        assert_eq!(to_decimal("0", NATIVE_DECIMALS), 0.0);
    }

    #[test]
    fn test_rounds_half_up_to_eight_places() {
        // 0.123456785 ETH
        assert_eq!(to_decimal("123456785000000000", NATIVE_DECIMALS), 0.12345679);
        // 0.123456784999 ETH
        assert_eq!(to_decimal("123456784999000000", NATIVE_DECIMALS), 0.12345678);
    }

    #[test]
    fn test_token_decimals() {
        assert_eq!(to_decimal("2500000", 6), 2.5);
        assert_eq!(to_decimal("7", 0), 7.0);
        assert_eq!(token_decimals(Some("6")), 6);
        assert_eq!(token_decimals(Some("")), 18);
        assert_eq!(token_decimals(Some("abc")), 18);
        assert_eq!(token_decimals(None), 18);
    }

    #[test]
    fn test_malformed_values_are_zero() {
        assert_eq!(to_decimal("", NATIVE_DECIMALS), 0.0);
        assert_eq!(to_decimal("not-a-number", NATIVE_DECIMALS), 0.0);
        assert_eq!(to_decimal("-5", NATIVE_DECIMALS), 0.0);
    }

    #[test]
    fn test_huge_token_value_does_not_overflow() {
        let max_supply = "115792089237316195423570985008687907853269984665640564039457584007913129639935";
        assert!(to_decimal(max_supply, 18) > 1e58);
    }

    #[test]
    fn test_native_fee() {
        // 20 gwei * 21000 gas = 0.00042 ETH
        assert_eq!(native_fee("20000000000", "21000"), 0.00042);
        assert_eq!(native_fee("bad", "21000"), 0.0);
    }

    #[test]
    fn test_short_prefix() {
        assert_eq!(short_prefix("0xd8dA6BF26964"), "0xd8dA");
        assert_eq!(short_prefix(""), "trace");
    }
}
