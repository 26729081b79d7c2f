//! Connection strategies, one per base URL scheme

pub mod channel;
#[cfg(windows)]
pub mod npipe;
pub mod process;
pub mod ssh;
pub mod tcp;

pub use channel::Channel;
pub use process::ProcessChannel;
pub use ssh::{SshSession, SshSubprocess};
pub use tcp::TcpTarget;

use std::path::PathBuf;
use std::time::Duration;

use crate::config::{ClientConfig, Host, Scheme, SshMode};
use crate::error::DockerError;

/// How channels to the daemon are established
///
/// Picked once from the host's scheme when the client is built.
#[derive(Debug)]
pub enum Transport {
    Unix(PathBuf),
    NamedPipe(String),
    SshSubprocess(SshSubprocess),
    SshSession(SshSession),
    Tcp(TcpTarget),
}

impl Transport {
    pub fn new(host: &Host, config: &ClientConfig) -> Result<Self, DockerError> {
        let transport = match host.scheme() {
            Scheme::Unix => Transport::Unix(PathBuf::from(host.address())),
            Scheme::NamedPipe => Transport::NamedPipe(host.address().to_string()),
            Scheme::Ssh => match config.ssh_mode {
                SshMode::Subprocess => {
                    Transport::SshSubprocess(SshSubprocess::new(host, &config.ssh_command)?)
                }
                SshMode::SharedSession => {
                    Transport::SshSession(SshSession::new(host, &config.ssh_command)?)
                }
            },
            Scheme::Http | Scheme::Https => {
                Transport::Tcp(TcpTarget::new(host, config.tls.as_ref())?)
            }
        };

        log::debug!("Using {} transport for {}", transport.name(), host);
        Ok(transport)
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Transport::Unix(_) => "unix",
            Transport::NamedPipe(_) => "npipe",
            Transport::SshSubprocess(_) => "ssh",
            Transport::SshSession(_) => "ssh-session",
            Transport::Tcp(target) if target.is_tls() => "tls",
            Transport::Tcp(_) => "tcp",
        }
    }

    /// Open a new channel, giving up after `timeout`
    ///
    /// A channel that completes after the deadline is dropped, never handed out.
    #[tracing::instrument(skip(self), fields(transport = self.name()))]
    pub async fn connect(&self, timeout: Duration) -> Result<Channel, DockerError> {
        match tokio::time::timeout(timeout, self.open()).await {
            Ok(channel) => channel,
            Err(_) => Err(DockerError::Timeout {
                operation: "connecting to the daemon",
                after: timeout,
            }),
        }
    }

    async fn open(&self) -> Result<Channel, DockerError> {
        match self {
            Transport::Unix(path) => connect_unix(path).await,
            Transport::NamedPipe(path) => connect_npipe(path).await,
            Transport::SshSubprocess(ssh) => Ok(Channel::Process(ssh.connect()?)),
            Transport::SshSession(session) => Ok(Channel::Process(session.connect()?)),
            Transport::Tcp(target) => target.connect().await,
        }
    }

    /// Tear down one channel
    ///
    /// For shared SSH sessions this ends only the channel's multiplexing client.
    pub async fn close(&self, mut channel: Channel) -> Result<(), DockerError> {
        log::trace!("Closing {} channel", channel.kind());
        channel.close().await?;
        Ok(())
    }

    /// Release state shared by every channel, such as an SSH control master
    pub async fn shutdown(&self) -> Result<(), DockerError> {
        match self {
            Transport::SshSession(session) => session.shutdown().await,
            _ => Ok(()),
        }
    }
}

#[cfg(unix)]
async fn connect_unix(path: &std::path::Path) -> Result<Channel, DockerError> {
    let stream = tokio::net::UnixStream::connect(path)
        .await
        .map_err(|e| DockerError::connection(path.display().to_string(), e))?;
    Ok(Channel::Unix(stream))
}

#[cfg(not(unix))]
async fn connect_unix(path: &std::path::Path) -> Result<Channel, DockerError> {
    Err(DockerError::connection(
        path.display().to_string(),
        std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "Unix sockets are not supported on this platform",
        ),
    ))
}

#[cfg(windows)]
async fn connect_npipe(path: &str) -> Result<Channel, DockerError> {
    let pipe = npipe::connect(path)
        .await
        .map_err(|e| DockerError::connection(path, e))?;
    Ok(Channel::NamedPipe(pipe))
}

#[cfg(not(windows))]
async fn connect_npipe(path: &str) -> Result<Channel, DockerError> {
    Err(DockerError::connection(
        path,
        std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "named pipes are only supported on Windows",
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn transport(host: &str) -> Transport {
        let config = ClientConfig::new(host);
        Transport::new(&host.parse().unwrap(), &config).unwrap()
    }

    #[test]
    fn test_strategy_follows_scheme() {
        assert_eq!(transport("unix:///var/run/docker.sock").name(), "unix");
        assert_eq!(transport("npipe:////./pipe/docker_engine").name(), "npipe");
        assert_eq!(transport("ssh://user@box").name(), "ssh");
        assert_eq!(transport("tcp://127.0.0.1:2375").name(), "tcp");

        let config = ClientConfig::new("ssh://box").ssh_mode(SshMode::SharedSession);
        let session = Transport::new(&config.host.parse().unwrap(), &config).unwrap();
        assert_eq!(session.name(), "ssh-session");
    }

    #[tokio::test]
    async fn test_missing_socket_is_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let host = format!("unix://{}", dir.path().join("missing.sock").display());
        let err = transport(&host)
            .connect(Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, DockerError::Connection { .. }), "{:?}", err);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreachable_ssh_host() {
        // without an `ssh` binary spawning fails up front, otherwise the process dies
        let transport = transport("ssh://nonexistent.invalid:1");
        match transport.connect(Duration::from_secs(5)).await {
            Ok(channel) => transport.close(channel).await.unwrap(),
            Err(err) => assert!(matches!(err, DockerError::Connection { .. })),
        }
    }

    #[tokio::test]
    async fn test_connect_timeout_is_bounded() {
        // fill the accept backlog of a listener that never accepts
        let socket = tokio::net::TcpSocket::new_v4().unwrap();
        socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let listener = socket.listen(1).unwrap();
        let addr = listener.local_addr().unwrap();

        let mut held = Vec::new();
        for _ in 0..64 {
            match tokio::time::timeout(
                Duration::from_millis(200),
                tokio::net::TcpStream::connect(addr),
            )
            .await
            {
                Ok(Ok(stream)) => held.push(stream),
                _ => break,
            }
        }

        let transport = transport(&format!("tcp://{}", addr));
        let started = Instant::now();
        let result = transport.connect(Duration::from_millis(1)).await;
        let elapsed = started.elapsed();

        // once a connect hung, the backlog is full and the next one cannot complete
        if held.len() < 64 {
            assert!(
                matches!(result, Err(DockerError::Timeout { .. })),
                "{:?}",
                result
            );
        }
        assert!(elapsed < Duration::from_secs(1), "took {:?}", elapsed);
        drop(listener);
    }
}
