use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use hyper::body::{Body, Incoming};
use tokio::time::{Instant, Sleep};
use tokio_util::sync::CancellationToken;

use crate::error::DockerError;
use crate::pool::Lease;

/// Closes the connection behind a response from anywhere
///
/// Reads that are in progress, or that come later, fail with
/// [`DockerError::StreamTruncated`].
#[derive(Debug, Clone)]
pub struct Closer {
    token: CancellationToken,
}

impl Closer {
    pub fn close(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// The raw bytes of a response body, as they arrive
///
/// The connection goes back to the pool once the body has been read to the end, and
/// is closed if reading fails or the body is dropped early.
pub struct ResponseBody {
    incoming: Option<Incoming>,
    lease: Option<Lease>,
    token: CancellationToken,
    read_timeout: Option<Duration>,
    deadline: Option<Pin<Box<Sleep>>>,
    /// Collect everything and yield it once
    coalesce: Option<BytesMut>,
    expected: Option<usize>,
    received: usize,
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseBody")
            .field("expected", &self.expected)
            .field("received", &self.received)
            .field("done", &self.incoming.is_none())
            .finish_non_exhaustive()
    }
}

impl ResponseBody {
    pub(crate) fn new(incoming: Incoming, lease: Lease, read_timeout: Option<Duration>) -> Self {
        let expected = incoming
            .size_hint()
            .exact()
            .and_then(|len| usize::try_from(len).ok());
        let token = lease.token().clone();

        Self {
            incoming: Some(incoming),
            lease: Some(lease),
            token,
            read_timeout,
            deadline: None,
            coalesce: None,
            expected,
            received: 0,
        }
    }

    /// Yield the whole body as a single chunk once it has been read
    pub(crate) fn coalesced(mut self) -> Self {
        self.coalesce = Some(BytesMut::new());
        self
    }

    #[must_use]
    pub fn closer(&self) -> Closer {
        Closer {
            token: self.token.clone(),
        }
    }

    /// Content length announced by the daemon, if any
    #[must_use]
    pub fn expected_len(&self) -> Option<usize> {
        self.expected
    }

    fn truncated(&self) -> DockerError {
        DockerError::StreamTruncated {
            expected: self.expected,
            received: self.received,
        }
    }

    fn finish(&mut self, reusable: bool) {
        self.incoming = None;
        self.deadline = None;
        if let Some(lease) = self.lease.take() {
            if reusable {
                lease.release();
            } else {
                // closed in the background by the pool
                drop(lease);
            }
        }
    }

    fn fail(&mut self, err: DockerError) -> Poll<Option<Result<Bytes, DockerError>>> {
        self.coalesce = None;
        self.finish(false);
        Poll::Ready(Some(Err(err)))
    }

    fn map_error(&self, err: &hyper::Error) -> DockerError {
        if self.token.is_cancelled()
            || err.is_incomplete_message()
            || err.is_closed()
            || err.is_canceled()
            || closed_early(err)
        {
            return self.truncated();
        }
        DockerError::Decode(format!("invalid response body: {}", err))
    }
}

/// Body errors wrap the I/O error of a connection that ended mid-body
fn closed_early(err: &hyper::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return matches!(
                io.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            );
        }
        source = cause.source();
    }
    false
}

impl Stream for ResponseBody {
    type Item = Result<Bytes, DockerError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        loop {
            let Some(incoming) = this.incoming.as_mut() else {
                return Poll::Ready(None);
            };

            match Pin::new(incoming).poll_frame(cx) {
                Poll::Ready(Some(Ok(frame))) => {
                    let Ok(data) = frame.into_data() else {
                        // trailers carry nothing we use
                        continue;
                    };
                    if data.is_empty() {
                        continue;
                    }

                    this.received += data.len();
                    if let (Some(timeout), Some(deadline)) = (this.read_timeout, this.deadline.as_mut()) {
                        deadline.as_mut().reset(Instant::now() + timeout);
                    }

                    match this.coalesce.as_mut() {
                        Some(buffer) => buffer.extend_from_slice(&data),
                        None => return Poll::Ready(Some(Ok(data))),
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    let err = this.map_error(&e);
                    log::debug!("Response body failed after {} bytes: {}", this.received, e);
                    return this.fail(err);
                }
                Poll::Ready(None) => {
                    // an aborted connection ends the body early without an error
                    if this.token.is_cancelled() {
                        let err = this.truncated();
                        return this.fail(err);
                    }

                    this.finish(true);
                    return match this.coalesce.take() {
                        Some(buffer) if !buffer.is_empty() => Poll::Ready(Some(Ok(buffer.freeze()))),
                        _ => Poll::Ready(None),
                    };
                }
                Poll::Pending => {
                    let Some(timeout) = this.read_timeout else {
                        return Poll::Pending;
                    };
                    let deadline = this
                        .deadline
                        .get_or_insert_with(|| Box::pin(tokio::time::sleep(timeout)));
                    if deadline.as_mut().poll(cx).is_ready() {
                        return this.fail(DockerError::Timeout {
                            operation: "reading the response",
                            after: timeout,
                        });
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}
