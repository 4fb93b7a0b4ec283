use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Vendor codes meaning the access token is invalid or has expired.
const TOKEN_EXPIRED_CODES: [&str; 2] = ["110", "111"];

/// All errors that can occur when using the Baidu Xiling client.
#[derive(Error, Debug)]
pub enum XilingError {
    /// `api_key` or `secret_key` was not provided.
    #[error("api_key and secret_key are required")]
    MissingCredentials,

    /// A caller-supplied argument cannot be used.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The file passed to `upload_file` does not exist.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// The vendor answered with something that is not the expected JSON.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The token endpoint answered without an `access_token`.
    #[error("failed to obtain access token: {0}")]
    TokenAcquisition(String),

    /// The vendor returned an error envelope (`error`/`error_description`
    /// or `error_code`/`error_msg`).
    #[error("vendor error {code}: {message}")]
    Vendor { code: String, message: String },

    /// A non-2xx HTTP response without a recognisable error envelope.
    #[error("API error {status_code}: {message}")]
    Api {
        status_code: u16,
        message: String,
        body: Option<serde_json::Value>,
    },

    /// A transport-level HTTP error from reqwest.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// An I/O error, typically from reading a local file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The token cache backend failed.
    #[error("token cache error: {0}")]
    Cache(String),

    /// The task reached a terminal failed status.
    #[error("task {task_id} failed: {detail}")]
    TaskFailed {
        task_id: String,
        detail: serde_json::Value,
    },

    /// The task was still running after the polling budget was spent.
    #[error("task {task_id} did not finish within {timeout:?}")]
    Timeout { task_id: String, timeout: Duration },
}

impl XilingError {
    /// `true` for vendor errors that a fresh access token can fix.
    pub fn is_token_expired(&self) -> bool {
        matches!(self, XilingError::Vendor { code, .. } if TOKEN_EXPIRED_CODES.contains(&code.as_str()))
    }
}

/// A convenience alias for `Result<T, XilingError>`.
pub type Result<T> = std::result::Result<T, XilingError>;
