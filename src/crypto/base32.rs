//! RFC 4648 Base32 decoding for authenticator secrets.
//!
//! Authenticator apps hand out secrets in the standard alphabet
//! `A-Z2-7`, usually upper case, sometimes grouped with spaces and
//! sometimes `=`-padded. All of those forms are accepted here.

use anyhow::{Result, anyhow};

/// Decode table: maps ASCII byte → 5-bit value (255 = invalid).
const DECODE_TABLE: [u8; 128] = {
    let mut table = [255u8; 128];
    let mut i = 0;
    while i < 26 {
        table[b'A' as usize + i] = i as u8;
        table[b'a' as usize + i] = i as u8;
        i += 1;
    }
    let mut d = 0;
    while d < 6 {
        table[b'2' as usize + d] = 26 + d as u8;
        d += 1;
    }
    table
};

pub fn decode(input: &str) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits: u32 = 0;

    for c in input.bytes() {
        if c == b'=' || c == b' ' || c == b'-' {
            continue;
        }
        let value = DECODE_TABLE
            .get(c as usize)
            .copied()
            .filter(|v| *v != 255)
            .ok_or_else(|| anyhow!("invalid base32 character {:?}", c as char))?;

        buffer = (buffer << 5) | u32::from(value);
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
            buffer &= (1 << bits) - 1;
        }
    }

    if out.is_empty() {
        return Err(anyhow!("empty base32 secret"));
    }
    Ok(out)
}
