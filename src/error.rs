use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

pub type CardResult<T> = Result<T, CardError>;

#[derive(Debug, Error)]
pub enum CardError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("Cannot exceed ₹{cap}. You can only add ₹{remaining}")]
    BalanceExceeded {
        balance: i64,
        requested: i64,
        remaining: i64,
        cap: i64,
    },

    #[error("Cannot recharge a blocked card")]
    CardBlocked,

    #[error("Invalid OTP code")]
    InvalidOtp,

    #[error("Authenticator setup not found for this card")]
    NoSecretConfigured,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Card was modified concurrently, please retry")]
    Conflict,

    #[error("Direct recharge is disabled; pay through the payment gateway")]
    DirectRechargeDisabled,

    #[error("Storage error: {0}")]
    Store(#[from] anyhow::Error),
}

impl CardError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CardError::NotFound(_) => StatusCode::NOT_FOUND,
            CardError::Validation(_) => StatusCode::BAD_REQUEST,
            CardError::BalanceExceeded { .. } => StatusCode::BAD_REQUEST,
            CardError::CardBlocked => StatusCode::FORBIDDEN,
            CardError::InvalidOtp => StatusCode::UNAUTHORIZED,
            CardError::NoSecretConfigured => StatusCode::PRECONDITION_FAILED,
            CardError::InvalidSignature => StatusCode::BAD_REQUEST,
            CardError::Gateway(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CardError::Conflict => StatusCode::CONFLICT,
            CardError::DirectRechargeDisabled => StatusCode::FORBIDDEN,
            CardError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable tag for the `error` field of responses.
    pub fn kind(&self) -> &'static str {
        match self {
            CardError::NotFound(_) => "NotFound",
            CardError::Validation(_) => "ValidationError",
            CardError::BalanceExceeded { .. } => "BalanceExceeded",
            CardError::CardBlocked => "CardBlocked",
            CardError::InvalidOtp => "InvalidOtp",
            CardError::NoSecretConfigured => "NoSecretConfigured",
            CardError::InvalidSignature => "InvalidSignature",
            CardError::Gateway(_) => "GatewayError",
            CardError::Conflict => "Conflict",
            CardError::DirectRechargeDisabled => "DirectRechargeDisabled",
            CardError::Store(_) => "StoreError",
        }
    }

    /// Storage trouble or write contention: the same request may succeed
    /// if repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CardError::Store(_) | CardError::Conflict)
    }

    /// Message safe to show to the user. Storage internals stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            CardError::Store(_) => "Something went wrong. Please try again.".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    pub error: String,
}

impl IntoResponse for CardError {
    fn into_response(self) -> Response {
        if let CardError::Store(e) = &self {
            tracing::error!(error = %e, "storage failure");
        }
        let body = ErrorBody {
            message: self.user_message(),
            error: self.kind().to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}
