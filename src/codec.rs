// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Pure codec helpers with no side effects: hex/base64 encoding and PIN
//! validation. Everything here is used by the credential store, discovery
//! response parser, wake packet builder, and registration.

use anyhow::{Context, Result, bail};
use base64::Engine;

/// Decodes a hex string. Fails if the length is odd or any character is not
/// an ASCII hex digit.
pub fn hex_decode(s: &str) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        bail!("hex string has odd length: {}", s.len());
    }
    hex::decode(s).with_context(|| format!("invalid hex string: {s:?}"))
}

/// Lower-hex encoding of `bytes`.
pub fn hex_encode(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Base64 encoding (standard alphabet, with padding), no line breaks.
pub fn b64_encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Base64 decoding (standard alphabet). Fails on malformed padding or
/// alphabet.
pub fn b64_decode(s: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .with_context(|| format!("invalid base64 string: {s:?}"))
}

/// True iff `s` is exactly 8 ASCII decimal digits.
pub fn is_eight_digit_pin(s: &str) -> bool {
    s.len() == 8 && s.bytes().all(|b| b.is_ascii_digit())
}

/// Parses an 8-digit PIN to a `u32`. The caller must have already validated
/// with [`is_eight_digit_pin`]; 8 decimal digits always fit in 32 bits
/// (max value 99_999_999 < u32::MAX).
pub fn pin_to_u32(s: &str) -> Result<u32> {
    if !is_eight_digit_pin(s) {
        bail!("PIN must be exactly 8 ASCII decimal digits, got {s:?}");
    }
    s.parse::<u32>()
        .with_context(|| format!("PIN {s:?} did not parse as u32"))
}

/// Big-endian u64 interpretation of an 8-character hex string
/// (`hex8`, left-padded with zero bytes to 8 bytes before the conversion).
/// Returns the decimal string form used verbatim in the wake datagram's
/// `user-credential` header.
pub fn hex8_to_wake_credential_dec(hex8: &str) -> Result<String> {
    if hex8.len() != 8 {
        bail!("hex8 must be exactly 8 characters, got {}", hex8.len());
    }
    let decoded = hex_decode(hex8)?;
    let mut padded = [0u8; 8];
    padded[4..8].copy_from_slice(&decoded);
    Ok(u64::from_be_bytes(padded).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let s = "8830739c";
        let bytes = hex_decode(s).expect("valid hex");
        assert_eq!(hex_encode(&bytes), s);
    }

    #[test]
    fn hex_decode_rejects_odd_length() {
        assert!(hex_decode("abc").is_err());
    }

    #[test]
    fn hex_decode_rejects_non_hex() {
        assert!(hex_decode("zz00").is_err());
    }

    #[test]
    fn b64_round_trip() {
        let bytes = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let s = b64_encode(&bytes);
        assert_eq!(b64_decode(&s).expect("valid base64"), bytes);
    }

    #[test]
    fn pin_validation() {
        assert!(is_eight_digit_pin("12345678"));
        assert!(!is_eight_digit_pin("1234567"));
        assert!(!is_eight_digit_pin("123456789"));
        assert!(!is_eight_digit_pin("1234abcd"));
    }

    #[test]
    fn pin_parses_within_u32() {
        assert_eq!(pin_to_u32("12345678").expect("valid pin"), 12_345_678);
        assert!(pin_to_u32("1234abcd").is_err());
    }

    #[test]
    fn wake_credential_matches_spec_fixture() {
        // §8 scenario 1: hex8 = "8830739c" -> 2284864924 == 0x8830739C
        assert_eq!(
            hex8_to_wake_credential_dec("8830739c").expect("valid hex8"),
            "2284864924"
        );
    }
}
