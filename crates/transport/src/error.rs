//! Transport error taxonomy and retry classification.
//!
//! Every error the platform can surface is mapped onto one of the variants
//! below; [`TransportError::classify`] turns a variant into the policy the
//! dispatcher and supervisor act on. The raw platform message is preserved
//! where it matters for the ledger.

use std::time::Duration;

/// Maximum length of a raw platform message recorded on a ledger row.
pub const MAX_RECORDED_ERROR_LEN: usize = 500;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Platform told us to back off for the given number of seconds.
    #[error("flood wait: retry in {0}s")]
    FloodWait(u64),

    /// Platform flagged the account for spam-like behavior.
    #[error("peer flood: account flagged for spam")]
    PeerFlood,

    /// The recipient can no longer be written to (deactivated account,
    /// blocked us, or writing is forbidden).
    #[error("recipient unavailable: {0}")]
    RecipientGone(String),

    /// The session's authorization is gone; reconnecting will not help.
    #[error("authorization lost: {0}")]
    AuthLost(String),

    /// Connect-time: the credential was rejected outright.
    #[error("unauthorized")]
    Unauthorized,

    /// Connect-time: interactive authentication would be required.
    #[error("authentication required: {0}")]
    AuthRequired(AuthStage),

    #[error("network: {0}")]
    Network(String),

    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The referenced message no longer exists (already deleted).
    #[error("message not found")]
    NotFound,

    #[error("{0}")]
    Other(String),
}

/// Which step of the interactive login the platform asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStage {
    Phone,
    Code,
    SecondFactor,
}

impl std::fmt::Display for AuthStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Phone => "phone number",
            Self::Code => "confirmation code",
            Self::SecondFactor => "second factor",
        })
    }
}

/// Policy bucket for an observed transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Pause the session for the given wait, mark the send failed.
    RateLimit { seconds: u64 },
    /// Pause the session with the configured spam backoff.
    SpamWarning,
    /// Terminal for this recipient; never retried.
    Permanent,
    /// Session is unusable; surface to the operator, never auto-retried.
    AuthLost,
    /// Retry with exponential backoff up to the configured attempt cap.
    Transient,
    /// Retry once; terminal on the second occurrence.
    Unknown,
}

impl TransportError {
    pub fn classify(&self) -> ErrorClass {
        match self {
            Self::FloodWait(seconds) => ErrorClass::RateLimit { seconds: *seconds },
            Self::PeerFlood => ErrorClass::SpamWarning,
            Self::RecipientGone(_) | Self::NotFound => ErrorClass::Permanent,
            Self::AuthLost(_) | Self::Unauthorized | Self::AuthRequired(_) => ErrorClass::AuthLost,
            Self::Network(_) | Self::Timeout(_) => ErrorClass::Transient,
            Self::Other(_) => ErrorClass::Unknown,
        }
    }

    /// The message recorded on a ledger row, truncated to a sane length.
    pub fn recorded_message(&self) -> String {
        let raw = self.to_string();
        if raw.len() <= MAX_RECORDED_ERROR_LEN {
            return raw;
        }
        let mut cut = MAX_RECORDED_ERROR_LEN;
        while !raw.is_char_boundary(cut) {
            cut -= 1;
        }
        raw[..cut].to_owned()
    }
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

impl From<TransportError> for fc_domain::Error {
    fn from(err: TransportError) -> Self {
        fc_domain::Error::Transport(err.to_string())
    }
}
