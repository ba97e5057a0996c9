//! Time-based one-time codes (RFC 6238 over RFC 4226 HOTP, HMAC-SHA1).

use anyhow::{Result, anyhow};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::{Choice, ConstantTimeEq};

use super::base32;

type HmacSha1 = Hmac<Sha1>;

pub const STEP_SECS: u64 = 30;
pub const DIGITS: u32 = 6;
/// Neighbouring time steps accepted on either side of the current one.
pub const SKEW_STEPS: u64 = 1;

pub fn hotp(key: &[u8], counter: u64) -> Result<u32> {
    let mut mac = <HmacSha1 as Mac>::new_from_slice(key)
        .map_err(|e| anyhow!("Invalid key length: {:?}", e))?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    // Dynamic truncation
    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);
    Ok(binary % 10u32.pow(DIGITS))
}

fn format_code(value: u32) -> String {
    format!("{:0width$}", value, width = DIGITS as usize)
}

/// Code for a base32 secret at the given unix time.
#[cfg(test)]
pub fn code_at(secret: &str, unix_secs: u64) -> Result<String> {
    let key = base32::decode(secret)?;
    Ok(format_code(hotp(&key, unix_secs / STEP_SECS)?))
}

/// Check `code` against `secret` at `unix_secs`. Never errors: anything
/// malformed is simply not a valid code.
pub fn verify_at(secret: &str, code: &str, unix_secs: u64) -> bool {
    let code = code.trim();
    if code.len() != DIGITS as usize || !code.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let Ok(key) = base32::decode(secret) else {
        return false;
    };

    let step = unix_secs / STEP_SECS;
    let mut matched = Choice::from(0);
    for counter in step.saturating_sub(SKEW_STEPS)..=step.saturating_add(SKEW_STEPS) {
        if let Ok(expected) = hotp(&key, counter) {
            matched |= format_code(expected).as_bytes().ct_eq(code.as_bytes());
        }
    }
    matched.into()
}

pub fn verify(secret: &str, code: &str) -> bool {
    verify_at(secret, code, now_unix())
}

pub fn now_unix() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
