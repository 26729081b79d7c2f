use std::time::Duration;

use http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DockerError {
    #[error("Failed to connect to {target}: {source}")]
    Connection {
        target: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Timed out after {after:?} while {operation}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    #[error("Failed to decode stream: {0}")]
    Decode(String),
    #[error("{}", truncated_message(.expected, .received))]
    StreamTruncated {
        expected: Option<usize>,
        received: usize,
    },
    #[error("Connection pool exhausted ({max_size} connections in use)")]
    PoolExhausted { max_size: usize },
    #[error("Connection pool is closed")]
    PoolClosed,
    #[error("{} connection(s) failed to close", .0.len())]
    Close(Vec<DockerError>),
    #[error("{}", api_message(.status, .explanation.as_deref()))]
    Api {
        status: StatusCode,
        explanation: Option<String>,
    },
    #[error("Invalid host: {0}")]
    InvalidHost(String),
    #[error("Invalid TLS configuration: {0}")]
    TlsParameter(String),
    #[error("Invalid API version: {0}")]
    InvalidVersion(String),
    #[error("Invalid repository name: {0}")]
    InvalidRepository(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Invalid configuration file: {0}")]
    InvalidConfigFile(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),
}

impl DockerError {
    pub(crate) fn connection(target: impl Into<String>, source: std::io::Error) -> Self {
        DockerError::Connection {
            target: target.into(),
            source,
        }
    }

    /// The HTTP status of an [`DockerError::Api`] error
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            DockerError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }

    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.status().is_some_and(|s| s.is_client_error())
    }

    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status().is_some_and(|s| s.is_server_error())
    }

    /// Whether the error came from the transport rather than the daemon
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            DockerError::Connection { .. }
                | DockerError::Timeout { .. }
                | DockerError::StreamTruncated { .. }
                | DockerError::PoolExhausted { .. }
                | DockerError::PoolClosed
        )
    }
}

#[allow(clippy::ref_option, clippy::trivially_copy_pass_by_ref)]
fn truncated_message(expected: &Option<usize>, received: &usize) -> String {
    match expected {
        Some(expected) => format!(
            "Stream truncated: expected {} bytes, received {}",
            expected, received
        ),
        None => format!("Stream truncated: connection closed after {} bytes", received),
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn api_message(status: &StatusCode, explanation: Option<&str>) -> String {
    let reason = status.canonical_reason().unwrap_or("Unknown");
    let mut message = if status.is_client_error() {
        format!("{} Client Error: {}", status.as_u16(), reason)
    } else if status.is_server_error() {
        format!("{} Server Error: {}", status.as_u16(), reason)
    } else {
        format!("{} {}", status.as_u16(), reason)
    };

    if let Some(explanation) = explanation {
        message.push_str(&format!(" (\"{}\")", explanation));
    }

    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_message() {
        let err = DockerError::Api {
            status: StatusCode::NOT_FOUND,
            explanation: Some("No such container: abc".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "404 Client Error: Not Found (\"No such container: abc\")"
        );
        assert!(err.is_not_found());
        assert!(err.is_client_error());
        assert!(!err.is_server_error());

        let err = DockerError::Api {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            explanation: None,
        };
        assert_eq!(err.to_string(), "500 Server Error: Internal Server Error");
        assert!(err.is_server_error());
    }

    #[test]
    fn test_transport_errors() {
        assert!(DockerError::PoolClosed.is_transport());
        assert!(
            DockerError::StreamTruncated {
                expected: Some(108),
                received: 48
            }
            .is_transport()
        );
        assert_eq!(
            DockerError::StreamTruncated {
                expected: Some(100),
                received: 40
            }
            .to_string(),
            "Stream truncated: expected 100 bytes, received 40"
        );
        assert!(!DockerError::Decode("bad".into()).is_transport());
    }
}
