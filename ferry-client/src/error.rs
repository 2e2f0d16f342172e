//! Cluster client errors

use serde::Deserialize;
use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The cluster could not be reached or the connection broke
    #[error("cluster unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    /// The cluster answered with a non-success status
    #[error("cluster API returned {status}{}: {message}", .reason.as_deref().map(|r| format!(" ({})", r)).unwrap_or_default())]
    Api {
        status: u16,
        /// Machine-readable reason from a `Status` body (e.g., "NotFound", "Forbidden")
        reason: Option<String>,
        message: String,
    },

    /// The response body did not match the expected resource shape
    #[error("unreadable cluster response: {0}")]
    Decode(String),

    /// The manifest does not identify a resource the client can address
    #[error("invalid resource: {0}")]
    InvalidResource(String),
}

/// `Status` object returned by the cluster on failed requests
#[derive(Debug, Deserialize)]
struct StatusBody {
    kind: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ClientError {
    /// Builds an API error from a failed response
    ///
    /// A `Status` body contributes its reason and message; any other body is
    /// kept verbatim as the message.
    pub fn from_status(status: u16, body: &str) -> Self {
        match serde_json::from_str::<StatusBody>(body) {
            Ok(parsed) if parsed.kind == "Status" => Self::Api {
                status,
                reason: parsed.reason.filter(|r| !r.is_empty()),
                message: parsed.message.unwrap_or_else(|| body.trim().to_string()),
            },
            _ => Self::Api {
                status,
                reason: None,
                message: body.trim().to_string(),
            },
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The addressed resource does not exist (yet)
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Whether repeating the same request later may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::Decode(_) | Self::InvalidResource(_) => false,
        }
    }
}
