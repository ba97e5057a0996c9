//! Logical store paths.

use crate::error::{CardError, CardResult};

/// Reject keys that would escape their path segment.
fn segment<'a>(key: &'a str, what: &str) -> CardResult<&'a str> {
    let key = key.trim();
    if key.is_empty() {
        return Err(CardError::Validation(format!("Please enter {}", what)));
    }
    if key.contains('/') || key == "." || key == ".." {
        return Err(CardError::NotFound(format!("{} not found", capitalize(what))));
    }
    Ok(key)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn enrollment(enrollment_number: &str) -> CardResult<String> {
    Ok(format!(
        "/enrollments/{}",
        segment(enrollment_number, "enrollment number")?
    ))
}

pub fn recharge_index(recharge_number: &str) -> CardResult<String> {
    Ok(format!(
        "/recharge/{}",
        segment(recharge_number, "recharge number")?
    ))
}

pub fn card(card_id: &str) -> CardResult<String> {
    Ok(format!("/addedCards/{}", segment(card_id, "card")?))
}

pub fn totp_secret(card_id: &str) -> CardResult<String> {
    Ok(format!("/totpSecrets/{}/secret", segment(card_id, "card")?))
}

pub fn transaction(payment_id: &str) -> CardResult<String> {
    Ok(format!("/transactions/{}", segment(payment_id, "payment")?))
}
