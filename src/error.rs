// Error taxonomy shared by every component. Component boundaries turn
// these into outcome structs (see `acquirer::LoginOutcome`,
// `executor::ActionSummary`) so the menu layer never has to match on them.

use std::fmt;

/// Why the remote auth endpoint rejected a credential pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    TwoFactorRequired,
    Disabled,
    Locked,
    Rejected(String),
}

impl AuthFailure {
    /// Classify a raw error message returned by the auth endpoint.
    pub fn classify(raw: &str) -> Self {
        let lower = raw.to_lowercase();
        if lower.contains("2-factor") || lower.contains("two-factor") || lower.contains("2fa") {
            Self::TwoFactorRequired
        } else if lower.contains("disabled") || lower.contains("suspended") {
            Self::Disabled
        } else if lower.contains("locked") {
            Self::Locked
        } else {
            Self::Rejected(raw.to_string())
        }
    }
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TwoFactorRequired => {
                write!(f, "This account has 2FA enabled. Disable 2FA and try again")
            }
            Self::Disabled => write!(f, "This account has been disabled or suspended"),
            Self::Locked => write!(f, "This account is temporarily locked. Unlock it first"),
            Self::Rejected(msg) => write!(f, "{msg}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Bad session blob or credential shape.
    #[error("{0}")]
    Validation(String),

    #[error("Authentication failed: {0}")]
    Auth(AuthFailure),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Connection error (HTTP {0})")]
    Http(u16),

    #[error("Invalid response: {0}")]
    Parse(String),

    #[error("Failed to save store: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}
