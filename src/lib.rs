//! A Docker Engine API client
//!
//! Connections go over Unix sockets, Windows named pipes, SSH (`docker system
//! dial-stdio`) or TCP with optional TLS, and are kept in a bounded pool. Streaming
//! responses are decoded lazily into JSON documents or demultiplexed log frames.

pub use client::{Client, Request, Response};
pub use config::{ApiVersion, ClientConfig, Host, Scheme, SshMode, TlsConfig};
pub use error::DockerError;
pub use stream::{DecodeMode, JsonStream, LogStream, StreamingResponse, Unit};

pub use bollard::auth::DockerCredentials;
pub use bollard::container::LogOutput;

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod parser;
pub mod pool;
pub mod stream;
pub mod transport;

#[cfg(test)]
pub mod tests;
