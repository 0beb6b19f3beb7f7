// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The 17-byte Takion message header: one packet-type byte followed by a
//! 16-byte chunk header (tag / GMAC / key_pos / chunk_type / chunk_flags /
//! payload_size).

use anyhow::{Result, bail};
use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, U16, U32, byteorder::BigEndian,
};

/// Total header size in bytes (1 packet-type byte + 16 chunk-header bytes).
pub const HEADER_LEN: usize = 17;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Control = 0x00,
    Data = 0x02,
}

impl PacketType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(Self::Control),
            0x02 => Some(Self::Data),
            _ => None,
        }
    }
}

/// Chunk types carried inside a Takion message, per §4.6.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkType {
    Data = 0x00,
    Init = 0x01,
    InitAck = 0x02,
    Cookie = 0x0A,
    CookieAck = 0x0B,
    FeedbackState = 0x8E,
    FeedbackHistory = 0x8F,
}

impl ChunkType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0x00 => Self::Data,
            0x01 => Self::Init,
            0x02 => Self::InitAck,
            0x0A => Self::Cookie,
            0x0B => Self::CookieAck,
            0x8E => Self::FeedbackState,
            0x8F => Self::FeedbackHistory,
            _ => return None,
        })
    }
}

/// Disconnect signal, carried in `chunk_flags` of a DATA chunk (§4.6.6).
pub const CHUNK_FLAG_DISCONNECT: u8 = 0x01;

/// Wire-exact, zero-copy view of the 16-byte chunk header (everything after
/// the packet-type byte). `U32`/`U16` from zerocopy have alignment 1, so this
/// struct has no implicit padding and matches the wire layout byte-for-byte.
#[repr(C)]
#[derive(Debug, Clone, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct ChunkHeader {
    pub tag: U32<BigEndian>,
    pub gmac: U32<BigEndian>,
    pub key_pos: U32<BigEndian>,
    pub chunk_type: u8,
    pub chunk_flags: u8,
    pub payload_size: U16<BigEndian>,
}

const CHUNK_HEADER_LEN: usize = 16;

/// A fully parsed Takion message header plus a borrowed payload slice.
#[derive(Debug)]
pub struct ParsedHeader<'a> {
    pub packet_type: PacketType,
    pub tag: u32,
    pub gmac: u32,
    pub key_pos: u32,
    pub chunk_type_raw: u8,
    pub chunk_flags: u8,
    pub payload: &'a [u8],
}

impl<'a> ParsedHeader<'a> {
    pub fn chunk_type(&self) -> Option<ChunkType> {
        ChunkType::from_u8(self.chunk_type_raw)
    }
}

/// Parses a received datagram into its header and payload, validating that
/// the declared `payload_size` does not exceed what was actually received.
pub fn parse_message(datagram: &[u8]) -> Result<ParsedHeader<'_>> {
    if datagram.len() < HEADER_LEN {
        bail!(
            "Takion datagram too short: {} bytes, need at least {HEADER_LEN}",
            datagram.len()
        );
    }
    let packet_type = PacketType::from_u8(datagram[0])
        .ok_or_else(|| anyhow::anyhow!("unknown packet_type byte: 0x{:02x}", datagram[0]))?;

    let (chunk_hdr, rest) = ChunkHeader::ref_from_prefix(&datagram[1..])
        .map_err(|_| anyhow::anyhow!("failed to read chunk header"))?;

    let payload_size = chunk_hdr.payload_size.get() as usize;
    if payload_size > rest.len() {
        bail!(
            "declared payload_size {payload_size} exceeds remaining datagram bytes {}",
            rest.len()
        );
    }

    Ok(ParsedHeader {
        packet_type,
        tag: chunk_hdr.tag.get(),
        gmac: chunk_hdr.gmac.get(),
        key_pos: chunk_hdr.key_pos.get(),
        chunk_type_raw: chunk_hdr.chunk_type,
        chunk_flags: chunk_hdr.chunk_flags,
        payload: &rest[..payload_size],
    })
}

/// Writes a complete Takion message (header + payload) into `out`, which is
/// cleared and reused.
pub fn write_message(
    out: &mut Vec<u8>,
    packet_type: PacketType,
    tag: u32,
    gmac: u32,
    key_pos: u32,
    chunk_type: u8,
    chunk_flags: u8,
    payload: &[u8],
) {
    out.clear();
    out.reserve(HEADER_LEN + payload.len());
    out.push(packet_type as u8);

    let hdr = ChunkHeader {
        tag: U32::new(tag),
        gmac: U32::new(gmac),
        key_pos: U32::new(key_pos),
        chunk_type,
        chunk_flags,
        payload_size: U16::new(payload.len() as u16),
    };
    out.extend_from_slice(hdr.as_bytes());
    out.extend_from_slice(payload);
}

const _: () = assert!(CHUNK_HEADER_LEN + 1 == HEADER_LEN);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_framing_matches_spec_fixture() {
        // §8 scenario 4: tag_local = 0xDEADBEEF, INIT chunk.
        let tag_local = 0xDEAD_BEEFu32;
        let mut payload = Vec::with_capacity(16);
        payload.extend_from_slice(&tag_local.to_be_bytes());
        payload.extend_from_slice(&102_400u32.to_be_bytes()); // a_rwnd
        payload.extend_from_slice(&1u16.to_be_bytes()); // out_streams
        payload.extend_from_slice(&1u16.to_be_bytes()); // in_streams
        payload.extend_from_slice(&tag_local.to_be_bytes()); // initial_seq

        let mut out = Vec::new();
        write_message(
            &mut out,
            PacketType::Control,
            0,
            0,
            0,
            ChunkType::Init as u8,
            0,
            &payload,
        );

        assert_eq!(out.len(), HEADER_LEN + 16);
        assert_eq!(
            &out[..33],
            &hex_literal::hex!(
                "00 00 00 00 00 00 00 00 00 00 00 00 01 00 00 10
                 DE AD BE EF 00 01 90 00 00 01 00 01 DE AD BE EF"
            )[..]
        );
    }

    #[test]
    fn round_trips_tag_key_pos_chunk_type_flags_and_payload() {
        let payload = b"hello takion";
        let mut out = Vec::new();
        write_message(&mut out, PacketType::Data, 7, 0, 42, ChunkType::Data as u8, 0x01, payload);

        let parsed = parse_message(&out).expect("parses");
        assert_eq!(parsed.packet_type, PacketType::Data);
        assert_eq!(parsed.tag, 7);
        assert_eq!(parsed.key_pos, 42);
        assert_eq!(parsed.chunk_type(), Some(ChunkType::Data));
        assert_eq!(parsed.chunk_flags, 0x01);
        assert_eq!(parsed.payload, payload);
    }

    #[test]
    fn rejects_oversized_payload_size_claim() {
        let mut out = Vec::new();
        write_message(&mut out, PacketType::Control, 0, 0, 0, ChunkType::Init as u8, 0, b"abc");
        // Lie about payload_size: bump it past what's actually present.
        out[15] = 0xFF;
        out[16] = 0xFF;
        assert!(parse_message(&out).is_err());
    }

    #[test]
    fn rejects_too_short_datagram() {
        assert!(parse_message(&[0u8; 10]).is_err());
    }
}
