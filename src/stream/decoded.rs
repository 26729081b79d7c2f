use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use tokio_util::codec::Decoder;

use crate::error::DockerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Reading,
    Draining,
    Done,
}

/// Runs a [`Decoder`] over a stream of byte chunks
///
/// Chunk boundaries are invisible to the decoder: incomplete units stay buffered until
/// the rest arrives. The first error ends the sequence.
#[derive(Debug)]
pub struct Decoded<S, D> {
    inner: S,
    decoder: D,
    buffer: BytesMut,
    state: State,
}

impl<S, D> Decoded<S, D> {
    pub fn new(inner: S, decoder: D) -> Self {
        Self {
            inner,
            decoder,
            buffer: BytesMut::new(),
            state: State::Reading,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Bytes received but not yet decoded
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }
}

impl<S, D> Stream for Decoded<S, D>
where
    S: Stream<Item = Result<Bytes, DockerError>> + Unpin,
    D: Decoder<Error = DockerError> + Unpin,
{
    type Item = Result<D::Item, DockerError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        loop {
            match this.state {
                State::Done => return Poll::Ready(None),
                State::Reading => {
                    match this.decoder.decode(&mut this.buffer) {
                        Ok(Some(item)) => return Poll::Ready(Some(Ok(item))),
                        Ok(None) => {}
                        Err(e) => {
                            this.state = State::Done;
                            return Poll::Ready(Some(Err(e)));
                        }
                    }

                    match futures_util::ready!(this.inner.poll_next_unpin(cx)) {
                        Some(Ok(chunk)) => this.buffer.extend_from_slice(&chunk),
                        Some(Err(e)) => {
                            this.state = State::Done;
                            return Poll::Ready(Some(Err(e)));
                        }
                        None => this.state = State::Draining,
                    }
                }
                State::Draining => {
                    return match this.decoder.decode_eof(&mut this.buffer) {
                        Ok(Some(item)) => Poll::Ready(Some(Ok(item))),
                        Ok(None) => {
                            this.state = State::Done;
                            Poll::Ready(None)
                        }
                        Err(e) => {
                            this.state = State::Done;
                            Poll::Ready(Some(Err(e)))
                        }
                    };
                }
            }
        }
    }
}
