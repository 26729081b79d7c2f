use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::Manage;
use crate::error::DockerError;
use crate::transport::{Channel, Transport};

/// How long an idle connection gets to report ready before it counts as dead
const READY_TIMEOUT: Duration = Duration::from_secs(1);
/// How long a closing connection gets to finish its in-flight exchange
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// An HTTP/1.1 connection over a [`Channel`]
///
/// The connection itself is driven by a background task that hands the channel back
/// once the request sender is dropped, so it can be closed through its transport.
#[derive(Debug)]
pub struct HttpConnection {
    id: u64,
    sender: SendRequest<Full<Bytes>>,
    driver: JoinHandle<Option<Channel>>,
    token: CancellationToken,
}

impl HttpConnection {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn sender(&mut self) -> &mut SendRequest<Full<Bytes>> {
        &mut self.sender
    }

    /// Cancelled when the connection is aborted; in-flight reads fail once it fires
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Opens HTTP connections through a [`Transport`]
#[derive(Debug)]
pub struct HttpConnector {
    transport: Arc<Transport>,
    connect_timeout: Duration,
    next_id: AtomicU64,
    /// Parent of every connection token
    token: CancellationToken,
}

impl HttpConnector {
    #[must_use]
    pub fn new(transport: Arc<Transport>, connect_timeout: Duration) -> Self {
        Self {
            transport,
            connect_timeout,
            next_id: AtomicU64::new(0),
            token: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    async fn handshake(&self, id: u64) -> Result<HttpConnection, DockerError> {
        let channel = self.transport.connect(self.connect_timeout).await?;
        log::debug!("Opened {} connection #{}", channel.kind(), id);

        let (sender, connection) = http1::Builder::new()
            .handshake::<_, Full<Bytes>>(TokioIo::new(channel))
            .await?;

        let token = self.token.child_token();
        let cancelled = token.clone();
        let driver = tokio::spawn(async move {
            tokio::select! {
                result = connection.without_shutdown() => match result {
                    Ok(parts) => Some(parts.io.into_inner()),
                    Err(e) => {
                        log::debug!("Connection #{} ended: {}", id, e);
                        None
                    }
                },
                () = cancelled.cancelled() => {
                    log::debug!("Connection #{} aborted", id);
                    None
                }
            }
        });

        Ok(HttpConnection {
            id,
            sender,
            driver,
            token,
        })
    }
}

#[async_trait]
impl Manage for HttpConnector {
    type Connection = HttpConnection;

    #[tracing::instrument(skip(self))]
    async fn open(&self, key: &str) -> Result<HttpConnection, DockerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        // the handshake shares the connect deadline with the channel itself
        match tokio::time::timeout(self.connect_timeout, self.handshake(id)).await {
            Ok(connection) => connection,
            Err(_) => Err(DockerError::Timeout {
                operation: "connecting to the daemon",
                after: self.connect_timeout,
            }),
        }
    }

    async fn close(&self, connection: HttpConnection) -> Result<(), DockerError> {
        let HttpConnection {
            id,
            sender,
            mut driver,
            token,
        } = connection;
        drop(sender);

        let channel = tokio::select! {
            joined = &mut driver => joined,
            () = tokio::time::sleep(CLOSE_GRACE) => {
                token.cancel();
                driver.await
            }
        }
        .map_err(|e| DockerError::Io(std::io::Error::other(e)))?;

        match channel {
            Some(channel) => {
                log::trace!("Closing connection #{}", id);
                self.transport.close(channel).await
            }
            None => Ok(()),
        }
    }

    async fn is_alive(&self, connection: &mut HttpConnection) -> bool {
        if connection.sender.is_closed() || connection.driver.is_finished() {
            return false;
        }
        matches!(
            tokio::time::timeout(READY_TIMEOUT, connection.sender.ready()).await,
            Ok(Ok(()))
        )
    }

    fn abort_all(&self) {
        self.token.cancel();
    }
}

/// A checked-out HTTP connection
pub type Lease = super::Pooled<HttpConnector>;
