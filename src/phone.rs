//! Phone Number Normalization
//!
//! Canonicalizes user-supplied phone numbers into the single wire format
//! `2547XXXXXXXX` used as the account identity key and by the mobile-money
//! gateway.

use crate::ledger::error::LedgerError;

/// Normalize a raw phone number to `2547XXXXXXXX`.
///
/// Accepted inputs: `07XXXXXXXX` (local, 10 digits), `7XXXXXXXX` (9 digits),
/// `2547XXXXXXXX` (12 digits), each optionally prefixed with `+` and
/// containing spaces. Anything else is rejected.
pub fn normalize_phone(raw: &str) -> Result<String, LedgerError> {
    let mut phone: String = raw.trim().chars().filter(|c| !c.is_whitespace()).collect();

    if let Some(stripped) = phone.strip_prefix('+') {
        phone = stripped.to_string();
    }

    if !phone.chars().all(|c| c.is_ascii_digit()) {
        return Err(LedgerError::InvalidInput(format!(
            "invalid phone number: {raw}"
        )));
    }

    if phone.starts_with('0') && phone.len() == 10 {
        return Ok(format!("254{}", &phone[1..]));
    }

    if phone.starts_with('7') && phone.len() == 9 {
        return Ok(format!("254{phone}"));
    }

    if phone.starts_with("254") && phone.len() == 12 {
        return Ok(phone);
    }

    Err(LedgerError::InvalidInput(format!(
        "invalid phone number: {raw}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_formats_normalize() {
        assert_eq!(normalize_phone("0712345678").unwrap(), "254712345678");
        assert_eq!(normalize_phone("712345678").unwrap(), "254712345678");
        assert_eq!(normalize_phone("254712345678").unwrap(), "254712345678");
    }

    #[test]
    fn test_plus_prefix_and_spaces() {
        assert_eq!(normalize_phone("+254712345678").unwrap(), "254712345678");
        assert_eq!(normalize_phone(" 0712 345 678 ").unwrap(), "254712345678");
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        assert!(normalize_phone("").is_err());
        assert!(normalize_phone("12345").is_err());
        assert!(normalize_phone("07123456789").is_err()); // too long
        assert!(normalize_phone("0712-345-678").is_err()); // non-digit
        assert!(normalize_phone("441234567890").is_err()); // wrong prefix
    }

    #[test]
    fn test_error_kind_is_invalid_input() {
        let err = normalize_phone("nope").unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }
}
