// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Repair and migration pass for legacy on-disk key-field shapes (§4.2.1).
//! Legacy shapes are modeled as a tagged enumeration with one conversion per
//! variant, never by heuristically sniffing an opaque 8-character field.

use anyhow::{Context, Result, bail};

use crate::codec::{hex_decode, hex_encode};

/// The shape a `registkey` field was found in on disk, before migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFieldShape {
    /// Already the canonical 8-lowercase-hex-character short form.
    OpaqueHex8,
    /// A raw 4-byte binary key; hex-encode to 8 characters.
    Raw4Bytes,
    /// A 16- or 32-character all-ASCII-hex field whose decoded bytes are
    /// themselves ASCII hex-digit characters (i.e. the true key was hex
    /// encoded twice).
    DoubleHex,
}

/// Classifies a raw on-disk key-field blob by its length alone. Does not
/// inspect content for the 8-byte case: an opaque 8-hex key is never
/// reinterpreted as anything other than itself (§4.2.1).
pub fn classify_key_field(raw: &[u8]) -> Result<KeyFieldShape> {
    Ok(match raw.len() {
        4 => KeyFieldShape::Raw4Bytes,
        8 => KeyFieldShape::OpaqueHex8,
        16 | 32 => KeyFieldShape::DoubleHex,
        other => bail!("unsupported registkey field length: {other} bytes"),
    })
}

/// Repairs a raw on-disk key-field blob into the canonical `hex8` short
/// form. Returns `(hex8, was_repaired)`.
pub fn repair_key_field(raw: &[u8]) -> Result<(String, bool)> {
    match classify_key_field(raw)? {
        KeyFieldShape::Raw4Bytes => Ok((hex_encode(raw), true)),
        KeyFieldShape::OpaqueHex8 => {
            let s = std::str::from_utf8(raw).context("opaque hex8 field is not ASCII")?;
            validate_hex8(s)?;
            Ok((s.to_ascii_lowercase(), false))
        },
        KeyFieldShape::DoubleHex => repair_double_hex(raw),
    }
}

fn repair_double_hex(raw: &[u8]) -> Result<(String, bool)> {
    let s = std::str::from_utf8(raw).context("double-hex field is not ASCII")?;
    let decoded = hex_decode(s).context("double-hex field is not valid hex")?;
    if !decoded.iter().all(|&b| b.is_ascii_hexdigit()) {
        bail!(
            "registkey field of length {} did not decode to ASCII hex digits; not a \
             double-hex key",
            raw.len()
        );
    }
    let hex8: String = decoded[..8].iter().map(|&b| (b as char).to_ascii_lowercase()).collect();
    validate_hex8(&hex8)?;
    Ok((hex8, true))
}

fn validate_hex8(s: &str) -> Result<()> {
    if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        bail!("not a well-formed hex8 string: {s:?}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_hex8_passes_through_untouched() {
        let (hex8, repaired) = repair_key_field(b"8830739c").expect("valid opaque key");
        assert_eq!(hex8, "8830739c");
        assert!(!repaired);
    }

    #[test]
    fn raw_4_bytes_is_hex_encoded() {
        let (hex8, repaired) =
            repair_key_field(&[0x88, 0x30, 0x73, 0x9c]).expect("valid raw key");
        assert_eq!(hex8, "8830739c");
        assert!(repaired);
    }

    #[test]
    fn sixteen_char_double_hex_is_migrated() {
        // "8830739c" double-hex-encoded: each ASCII char hex-encoded in turn.
        let double = "3838333037333963";
        assert_eq!(double.len(), 16);
        let (hex8, repaired) = repair_key_field(double.as_bytes()).expect("valid double-hex");
        assert_eq!(hex8, "8830739c");
        assert!(repaired);
    }

    #[test]
    fn thirty_two_char_double_hex_is_migrated() {
        let original = "8830739caabbccdd";
        let double: String = original.bytes().map(|b| hex_encode(&[b])).collect();
        assert_eq!(double.len(), 32);
        let (hex8, repaired) = repair_key_field(double.as_bytes()).expect("valid double-hex");
        assert_eq!(hex8, original[..8].to_string());
        assert!(repaired);
    }

    #[test]
    fn non_hex_ascii_double_hex_candidate_is_rejected() {
        // 16 chars of valid hex, but decoding yields bytes outside the ASCII
        // hex-digit range (e.g. decodes to 0x00 bytes), so this is neither
        // an opaque key nor a real double-hex key.
        assert!(repair_key_field(b"0000000000000000").is_err());
    }

    #[test]
    fn unsupported_length_is_rejected() {
        assert!(repair_key_field(b"abc").is_err());
    }
}
