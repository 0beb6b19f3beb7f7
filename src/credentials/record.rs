// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! `ConsoleRecord`: one per paired console (§3). Created by registration,
//! mutated only by registration and the repair/migration pass at startup;
//! every other subsystem is a read-only consumer.

use anyhow::{Context, Result, bail};

use crate::codec::{b64_encode, hex8_to_wake_credential_dec, hex_decode};

/// A fully resolved, persistable credential record for one console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleRecord {
    pub address: String,
    pub display_name: String,
    pub registkey_hex8: String,
    pub regist_key_16: [u8; 16],
    pub morning_16: [u8; 16],
    pub psn_account_le8: [u8; 8],
    pub valid: bool,
}

impl ConsoleRecord {
    /// Builds a record from the fields captured at registration time,
    /// deriving `regist_key_16`'s low 4 bytes from `registkey_hex8` and
    /// computing the `valid` invariant (§3).
    pub fn new(
        address: impl Into<String>,
        display_name: impl Into<String>,
        registkey_hex8: impl Into<String>,
        morning_16: [u8; 16],
        psn_account_le8: [u8; 8],
    ) -> Result<Self> {
        let registkey_hex8 = registkey_hex8.into();
        let regist_key_16 = regist_key_16_from_hex8(&registkey_hex8)?;
        let valid = is_structurally_valid(&registkey_hex8, &morning_16, &psn_account_le8);
        Ok(Self {
            address: address.into(),
            display_name: display_name.into(),
            registkey_hex8,
            regist_key_16,
            morning_16,
            psn_account_le8,
            valid,
        })
    }

    /// `wake_credential_dec`: the decimal string used verbatim in the wake
    /// datagram's `user-credential` header (§3, §4.4).
    pub fn wake_credential_dec(&self) -> Result<String> {
        hex8_to_wake_credential_dec(&self.registkey_hex8)
    }

    /// `psn_account_b64`: base64 form of `psn_account_le8`, cached for
    /// header emission at session-init time (§3, §6).
    pub fn psn_account_b64(&self) -> String {
        b64_encode(&self.psn_account_le8)
    }

    /// Re-evaluates the `valid` invariant from the current field values.
    pub fn recompute_valid(&mut self) {
        self.valid =
            is_structurally_valid(&self.registkey_hex8, &self.morning_16, &self.psn_account_le8);
    }
}

/// True iff `hex8` is well-formed, `morning_16` is not all zero, and
/// `psn_account_le8` is not all zero (§3 invariant on `valid`).
pub fn is_structurally_valid(hex8: &str, morning_16: &[u8; 16], psn_account_le8: &[u8; 8]) -> bool {
    is_well_formed_hex8(hex8) && morning_16.iter().any(|&b| b != 0)
        && psn_account_le8.iter().any(|&b| b != 0)
}

/// `registkey_hex8` characters are from `[0-9a-f]` and length is exactly 8.
pub fn is_well_formed_hex8(hex8: &str) -> bool {
    hex8.len() == 8 && hex8.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// `regist_key_16[0..4]` is the binary decode of `registkey_hex8`, with the
/// remaining 12 bytes zero unless the console provided more (§3).
pub fn regist_key_16_from_hex8(hex8: &str) -> Result<[u8; 16]> {
    if !is_well_formed_hex8(hex8) {
        bail!("registkey_hex8 is not well-formed: {hex8:?}");
    }
    let low4 = hex_decode(hex8).context("decoding registkey_hex8")?;
    let mut out = [0u8; 16];
    out[0..4].copy_from_slice(&low4);
    Ok(out)
}

/// `get_session_credentials`'s preferred-path reconstruction: `regist_key_16`
/// if any byte beyond the first 4 is non-zero, else `hex_decode(hex8) ||
/// zeros(12)` (§4.2).
pub fn effective_regist_key_16(record: &ConsoleRecord) -> Result<[u8; 16]> {
    if record.regist_key_16[4..].iter().any(|&b| b != 0) {
        Ok(record.regist_key_16)
    } else {
        regist_key_16_from_hex8(&record.registkey_hex8)
    }
}

/// Short fingerprint (first and last bytes) used to log post-write
/// validation without leaking whole key material (§4.2 `upsert_complete`).
pub fn key_fingerprint(bytes: &[u8; 16]) -> String {
    format!("{:02x}..{:02x}", bytes[0], bytes[15])
}

/// The single accessor contract used by wake, session init, and anything
/// else that must not disagree with itself (§4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnifiedCredentials {
    pub hex8: String,
    pub wake_credential_dec: String,
    pub display_name: String,
    pub valid: bool,
}

impl ConsoleRecord {
    pub fn unified(&self) -> Result<UnifiedCredentials> {
        Ok(UnifiedCredentials {
            hex8: self.registkey_hex8.clone(),
            wake_credential_dec: self.wake_credential_dec()?,
            display_name: self.display_name.clone(),
            valid: self.valid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_is_valid_when_all_fields_sound() {
        let r = ConsoleRecord::new(
            "192.168.1.10",
            "living room ps5",
            "8830739c",
            [1u8; 16],
            [2u8; 8],
        )
        .expect("valid fields");
        assert!(r.valid);
        assert_eq!(&r.regist_key_16[0..4], &hex_decode("8830739c").unwrap()[..]);
        assert_eq!(r.wake_credential_dec().unwrap(), "2284864924");
    }

    #[test]
    fn zero_morning_key_is_invalid() {
        let r = ConsoleRecord::new("192.168.1.10", "x", "8830739c", [0u8; 16], [2u8; 8])
            .expect("constructs even though invalid");
        assert!(!r.valid);
    }

    #[test]
    fn zero_psn_account_is_invalid() {
        let r = ConsoleRecord::new("192.168.1.10", "x", "8830739c", [1u8; 16], [0u8; 8])
            .expect("constructs even though invalid");
        assert!(!r.valid);
    }

    #[test]
    fn malformed_hex8_is_rejected_at_construction() {
        assert!(ConsoleRecord::new("192.168.1.10", "x", "zzzzzzzz", [1u8; 16], [2u8; 8]).is_err());
    }

    #[test]
    fn effective_regist_key_prefers_full_16_bytes() {
        let mut r =
            ConsoleRecord::new("a", "b", "8830739c", [1u8; 16], [2u8; 8]).expect("valid");
        r.regist_key_16 = [0xAA; 16];
        assert_eq!(effective_regist_key_16(&r).unwrap(), [0xAA; 16]);
    }

    #[test]
    fn effective_regist_key_falls_back_to_hex8_when_low_only() {
        let r = ConsoleRecord::new("a", "b", "8830739c", [1u8; 16], [2u8; 8]).expect("valid");
        let expected = regist_key_16_from_hex8("8830739c").unwrap();
        assert_eq!(effective_regist_key_16(&r).unwrap(), expected);
    }
}
