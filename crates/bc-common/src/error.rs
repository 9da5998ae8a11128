//! Error taxonomy for the Blast Campaign Execution Core.
//!
//! One closed enum covering every kind named by the control plane and by
//! `ChatTransport` error classification. Transport errors are classified into
//! this taxonomy once, at the `CampaignRunner` boundary, and never propagate
//! further (see `bc-runner`).

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("illegal transition: {0}")]
    IllegalTransition(String),

    #[error("transport transient error: {0}")]
    TransportTransient(String),

    #[error("transport permanent error: {0}")]
    TransportPermanent(String),

    #[error("recipient invalid: {0}")]
    RecipientInvalid(String),

    #[error("channel unhealthy: {0}")]
    ChannelUnhealthy(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable machine-readable kind, as returned in the control-plane error
    /// envelope `{kind, message}`.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "VALIDATION",
            CoreError::NotFound(_) => "NOT_FOUND",
            CoreError::IllegalTransition(_) => "ILLEGAL_TRANSITION",
            CoreError::TransportTransient(_) => "TRANSPORT_TRANSIENT",
            CoreError::TransportPermanent(_) => "TRANSPORT_PERMANENT",
            CoreError::RecipientInvalid(_) => "RECIPIENT_INVALID",
            CoreError::ChannelUnhealthy(_) => "CHANNEL_UNHEALTHY",
            CoreError::Internal(_) => "INTERNAL",
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(e: sqlx::Error) -> Self {
        CoreError::Internal(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Validation(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Error envelope returned by every failed control-plane call.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, utoipa::ToSchema)]
pub struct ErrorEnvelope {
    pub kind: String,
    pub message: String,
}

impl From<&CoreError> for ErrorEnvelope {
    fn from(e: &CoreError) -> Self {
        Self {
            kind: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_taxonomy() {
        assert_eq!(CoreError::Validation("x".into()).kind(), "VALIDATION");
        assert_eq!(CoreError::ChannelUnhealthy("x".into()).kind(), "CHANNEL_UNHEALTHY");
    }

    #[test]
    fn envelope_roundtrips_through_json() {
        let err = CoreError::NotFound("campaign-1".into());
        let envelope = ErrorEnvelope::from(&err);
        let json = serde_json::to_string(&envelope).unwrap();
        let back: ErrorEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, "NOT_FOUND");
    }
}
