pub mod base32;
pub mod totp;
pub mod webhook;

#[cfg(test)]
pub use webhook::sign_webhook;
pub use webhook::verify_webhook_signature;
