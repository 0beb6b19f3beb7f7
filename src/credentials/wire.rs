// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! On-disk framing for one `<address>.reg` file. The format is private
//! (§6): a 4-byte magic, a version byte, three length-prefixed variable
//! fields (address, display name, and the raw `registkey` field in
//! whichever legacy or canonical shape it was written in), followed by a
//! fixed-layout, zerocopy-readable tail holding the two 16-byte keys and
//! the 8-byte PSN account id.

use anyhow::{Context, Result, bail};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::credentials::record::ConsoleRecord;

const MAGIC: [u8; 4] = *b"RPC1";
const VERSION: u8 = 1;

/// The fixed-size tail of a `.reg` file: the two 16-byte keys and the
/// 8-byte PSN account id. All-`u8` fields give this struct no implicit
/// padding, so it round-trips byte-for-byte.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct FixedTail {
    regist_key_16: [u8; 16],
    morning_16: [u8; 16],
    psn_account_le8: [u8; 8],
}

const FIXED_TAIL_LEN: usize = 40;
const _: () = assert!(std::mem::size_of::<FixedTail>() == FIXED_TAIL_LEN);

/// A decoded `.reg` file before the §4.2.1 repair pass has classified its
/// `key_field`.
pub struct RawRecord {
    pub address: String,
    pub display_name: String,
    pub key_field: Vec<u8>,
    pub regist_key_16: [u8; 16],
    pub morning_16: [u8; 16],
    pub psn_account_le8: [u8; 8],
}

fn push_length_prefixed(out: &mut Vec<u8>, field: &[u8]) -> Result<()> {
    if field.len() > u8::MAX as usize {
        bail!("field of {} bytes exceeds the 255-byte on-disk limit", field.len());
    }
    out.push(field.len() as u8);
    out.extend_from_slice(field);
    Ok(())
}

fn take_length_prefixed(buf: &[u8]) -> Result<(&[u8], &[u8])> {
    let (&len, rest) = buf.split_first().context("truncated length-prefixed field")?;
    let len = len as usize;
    if rest.len() < len {
        bail!("length-prefixed field declares {len} bytes but only {} remain", rest.len());
    }
    Ok((&rest[..len], &rest[len..]))
}

/// Encodes an already-migrated [`ConsoleRecord`] (its `registkey_hex8` is
/// written verbatim as the 8-byte opaque key field, so a freshly written
/// file never itself needs repair on the next load).
pub fn encode_record(record: &ConsoleRecord) -> Vec<u8> {
    encode_raw(&RawRecord {
        address: record.address.clone(),
        display_name: record.display_name.clone(),
        key_field: record.registkey_hex8.clone().into_bytes(),
        regist_key_16: record.regist_key_16,
        morning_16: record.morning_16,
        psn_account_le8: record.psn_account_le8,
    })
}

/// Encodes a [`RawRecord`] whose `key_field` may still be in a legacy shape
/// (used by tests and by any future repair-in-place rewrite).
pub fn encode_raw(raw: &RawRecord) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        4 + 1 + 1 + raw.address.len() + 1 + raw.display_name.len() + 1 + raw.key_field.len()
            + FIXED_TAIL_LEN,
    );
    out.extend_from_slice(&MAGIC);
    out.push(VERSION);
    push_length_prefixed(&mut out, raw.address.as_bytes()).expect("address fits in 255 bytes");
    push_length_prefixed(&mut out, raw.display_name.as_bytes())
        .expect("display_name fits in 255 bytes");
    push_length_prefixed(&mut out, &raw.key_field).expect("key_field fits in 255 bytes");

    let tail = FixedTail {
        regist_key_16: raw.regist_key_16,
        morning_16: raw.morning_16,
        psn_account_le8: raw.psn_account_le8,
    };
    out.extend_from_slice(tail.as_bytes());
    out
}

/// Decodes a `.reg` file's bytes into a [`RawRecord`], leaving `key_field`
/// unclassified for the caller's repair pass.
pub fn decode_record(bytes: &[u8]) -> Result<RawRecord> {
    if bytes.len() < 5 {
        bail!("credential file too short: {} bytes", bytes.len());
    }
    let (magic, rest) = bytes.split_at(4);
    if magic != MAGIC {
        bail!("bad magic in credential file: {magic:?}");
    }
    let (&version, rest) = rest.split_first().context("missing version byte")?;
    if version != VERSION {
        bail!("unsupported credential file version: {version}");
    }

    let (address, rest) = take_length_prefixed(rest)?;
    let (display_name, rest) = take_length_prefixed(rest)?;
    let (key_field, rest) = take_length_prefixed(rest)?;

    let tail = FixedTail::ref_from_bytes(rest)
        .map_err(|_| anyhow::anyhow!("malformed fixed tail: {} bytes remain", rest.len()))?;

    Ok(RawRecord {
        address: String::from_utf8(address.to_vec()).context("address is not valid UTF-8")?,
        display_name: String::from_utf8(display_name.to_vec())
            .context("display_name is not valid UTF-8")?,
        key_field: key_field.to_vec(),
        regist_key_16: tail.regist_key_16,
        morning_16: tail.morning_16,
        psn_account_le8: tail.psn_account_le8,
    })
}
