//! Error types for lifecycle validation

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("{0}")]
    MissingEnv(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Command `{command}` failed with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Expected exactly one app at location '{location}', found {matches}")]
    InstanceLookup { location: String, matches: usize },

    #[error("No current app instance (install it first)")]
    NoCurrentInstance,

    #[error("Key '{0}' not found in login file")]
    CredentialKeyMissing(String),

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("Node.js not found. Install Node.js and run: npm install playwright")]
    BrowserNotFound,

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Invalid lifecycle transition: {event} while {from}")]
    InvalidTransition { from: String, event: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;
