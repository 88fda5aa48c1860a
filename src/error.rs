use std::time::Duration;
use thiserror::Error;

/// Failure taxonomy shared by every channel.
///
/// Errors are caught at the scenario/channel boundary by the runner and
/// turned into a failed result row; they never abort the whole run.
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Connection failure: {0}")]
    ConnectionFailure(String),

    #[error("Authentication failure: {0}")]
    AuthenticationFailure(String),

    #[error("Element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("Timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },

    #[error("API request failed: {status} - {body}")]
    ApiRequestFailed { status: u16, body: String },

    #[error("Validation failed: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),

    #[error("Command failed: {command}: {output}")]
    CommandFailed { command: String, output: String },

    #[error("Scenario error: {0}")]
    Scenario(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl HarnessError {
    pub fn timeout(what: impl Into<String>, after: Duration) -> Self {
        HarnessError::Timeout {
            what: what.into(),
            after,
        }
    }

    pub fn element(selector: impl Into<String>) -> Self {
        HarnessError::ElementNotFound {
            selector: selector.into(),
        }
    }

    /// Whether the error means the channel could not talk to the device at all.
    pub fn is_fatal_to_channel(&self) -> bool {
        matches!(
            self,
            HarnessError::ConnectionFailure(_) | HarnessError::AuthenticationFailure(_)
        )
    }
}

impl From<anyhow::Error> for HarnessError {
    fn from(err: anyhow::Error) -> Self {
        HarnessError::Scenario(format!("{:#}", err))
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;
