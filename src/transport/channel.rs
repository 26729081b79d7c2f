use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;

use super::process::ProcessChannel;

trait Io: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

/// A connected byte stream to the daemon, whatever the substrate
///
/// Every variant is read and written the same way, so the HTTP layer above never
/// needs to know whether it is talking to a socket, a pipe or an `ssh` process.
pub enum Channel {
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
    #[cfg(windows)]
    NamedPipe(tokio::net::windows::named_pipe::NamedPipeClient),
    Process(ProcessChannel),
    Tcp(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<tokio_native_tls::TlsStream<TcpStream>>),
}

impl Channel {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            #[cfg(unix)]
            Channel::Unix(_) => "unix",
            #[cfg(windows)]
            Channel::NamedPipe(_) => "npipe",
            Channel::Process(_) => "process",
            Channel::Tcp(_) => "tcp",
            #[cfg(feature = "tls")]
            Channel::Tls(_) => "tls",
        }
    }

    /// Tear the channel down
    ///
    /// Sockets and pipes shut down their write half. Process channels run the full
    /// termination sequence, see [`ProcessChannel::close`].
    pub async fn close(&mut self) -> io::Result<()> {
        if let Channel::Process(process) = self {
            return process.close().await;
        }

        match self.shutdown().await {
            Ok(()) => Ok(()),
            Err(e) if is_disconnect(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn io(&mut self) -> &mut dyn Io {
        match self {
            #[cfg(unix)]
            Channel::Unix(stream) => stream,
            #[cfg(windows)]
            Channel::NamedPipe(pipe) => pipe,
            Channel::Process(process) => process,
            Channel::Tcp(stream) => stream,
            #[cfg(feature = "tls")]
            Channel::Tls(stream) => stream,
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Channel").field(&self.kind()).finish()
    }
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::NotConnected | io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
    )
}

impl AsyncRead for Channel {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(self.get_mut().io()).poll_read(cx, buf)
    }
}

impl AsyncWrite for Channel {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(self.get_mut().io()).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(self.get_mut().io()).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(self.get_mut().io()).poll_shutdown(cx)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_unix_channel_round_trip() {
        let (left, mut right) = tokio::net::UnixStream::pair().unwrap();
        let mut channel = Channel::Unix(left);
        assert_eq!(channel.kind(), "unix");

        channel.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        right.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        channel.close().await.unwrap();
        let mut rest = Vec::new();
        right.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_close_after_peer_left() {
        let (left, right) = tokio::net::UnixStream::pair().unwrap();
        drop(right);
        let mut channel = Channel::Unix(left);
        assert!(channel.close().await.is_ok());
    }
}
