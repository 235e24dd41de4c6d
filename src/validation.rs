//! Field rules shared by request bodies.
//!
//! Regexes are compiled once and referenced from `#[validate(regex = ...)]` attributes; the
//! functions are used through `#[validate(custom = ...)]`.

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use validator::ValidationError;

pub static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[0-9 ]{10,15}$").expect("valid phone regex"));

/// Trade register number, e.g. `J40/1234/2020`.
pub static REG_COM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i)[JFC]\d{1,2}/\d{1,6}/\d{4}$").expect("valid reg com regex"));

pub static VIN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i)[A-HJ-NPR-Z0-9]{17}$").expect("valid vin regex"));

const CUI_CONTROL_KEY: [u32; 9] = [7, 5, 3, 2, 1, 7, 5, 3, 2];

/// Romanian fiscal code: optional `RO` prefix, 2 to 10 digits, last digit is the control digit.
pub fn validate_cui(cui: &str) -> Result<(), ValidationError> {
    let trimmed = cui.trim();
    let digits = trimmed
        .strip_prefix("RO")
        .or_else(|| trimmed.strip_prefix("ro"))
        .unwrap_or(trimmed)
        .trim();

    if !(2..=10).contains(&digits.len()) || !digits.bytes().all(|it| it.is_ascii_digit()) {
        return Err(ValidationError::new("cui_format"));
    }

    let values: Vec<u32> = digits.bytes().map(|it| u32::from(it - b'0')).collect();
    let (control, body) = match values.split_last() {
        Some(it) => it,
        None => return Err(ValidationError::new("cui_format")),
    };

    // the body is right-aligned against the key
    let offset = CUI_CONTROL_KEY.len() - body.len();
    let sum: u32 = body
        .iter()
        .zip(&CUI_CONTROL_KEY[offset..])
        .map(|(digit, key)| digit * key)
        .sum();

    let expected = match sum * 10 % 11 {
        10 => 0,
        it => it,
    };

    if expected == *control {
        Ok(())
    } else {
        Err(ValidationError::new("cui_checksum"))
    }
}

pub fn validate_non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(ValidationError::new("non_negative"));
    }

    Ok(())
}

pub fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("not_blank"));
    }

    Ok(())
}

/// Oldest model year accepted for a vehicle.
pub const MIN_VEHICLE_YEAR: i32 = 1950;

pub fn validate_vehicle_year(year: i32) -> Result<(), ValidationError> {
    let max = time::OffsetDateTime::now_utc().year() + 1;
    if (MIN_VEHICLE_YEAR..=max).contains(&year) {
        Ok(())
    } else {
        Err(ValidationError::new("vehicle_year"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cui() {
        for valid in ["18547290", "RO18547290", "ro 14399840", "6859662", "33034700"] {
            assert!(validate_cui(valid).is_ok(), "{valid} should be valid");
        }

        assert_eq!(
            validate_cui("1234567").unwrap_err().code,
            "cui_checksum"
        );
        for malformed in ["", "1", "RO", "12345678901", "18A47290"] {
            assert_eq!(
                validate_cui(malformed).unwrap_err().code,
                "cui_format",
                "{malformed} should be malformed"
            );
        }
    }

    #[test]
    fn test_reg_com() {
        assert!(REG_COM_RE.is_match("J40/1234/2020"));
        assert!(REG_COM_RE.is_match("j12/5/1999"));
        assert!(REG_COM_RE.is_match("F3/123456/2011"));
        assert!(!REG_COM_RE.is_match("J401/1234/2020"));
        assert!(!REG_COM_RE.is_match("X40/1234/2020"));
        assert!(!REG_COM_RE.is_match("J40/1234/20"));
    }

    #[test]
    fn test_phone() {
        assert!(PHONE_RE.is_match("+40722123456"));
        assert!(PHONE_RE.is_match("0722 123 456"));
        assert!(!PHONE_RE.is_match("0722"));
        assert!(!PHONE_RE.is_match("0722-123-456"));
    }

    #[test]
    fn test_vin() {
        assert!(VIN_RE.is_match("WVWZZZ1JZXW000001"));
        assert!(!VIN_RE.is_match("WVWZZZ1JZXW00000"));
        // I, O and Q never appear in a VIN
        assert!(!VIN_RE.is_match("WVWZZZ1JZXW00000O"));
    }

    #[test]
    fn test_non_negative() {
        assert!(validate_non_negative(&Decimal::ZERO).is_ok());
        assert!(validate_non_negative(&Decimal::new(1999, 2)).is_ok());
        assert!(validate_non_negative(&Decimal::new(-1, 2)).is_err());
    }

    #[test]
    fn test_vehicle_year() {
        assert!(validate_vehicle_year(2015).is_ok());
        assert!(validate_vehicle_year(1949).is_err());
        assert!(validate_vehicle_year(3000).is_err());
    }
}
