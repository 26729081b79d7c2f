//! Lazy decoding of response bodies: raw chunks, JSON documents or log frames

pub mod body;
pub mod decoded;
pub mod frame;
pub mod json;

pub use body::{Closer, ResponseBody};
pub use decoded::Decoded;
pub use frame::FrameDecoder;
pub use json::JsonDecoder;

use std::pin::Pin;

use bollard::container::LogOutput;
use bytes::Bytes;
use futures_util::{Stream, StreamExt, TryStreamExt};
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::DockerError;

pub type JsonStream<T = Value> = Decoded<ResponseBody, JsonDecoder<T>>;
pub type LogStream = Decoded<ResponseBody, FrameDecoder>;

/// How a streaming body is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    /// Byte chunks as they arrive
    Raw,
    /// One JSON document per unit
    Json,
    /// Log frames, or console output when the container has a TTY
    Demux { tty: bool },
}

/// One decoded unit, see [`StreamingResponse::decode`]
#[derive(Debug)]
pub enum Unit {
    Raw(Bytes),
    Json(Value),
    Frame(LogOutput),
}

pub type Units = Pin<Box<dyn Stream<Item = Result<Unit, DockerError>> + Send>>;

/// A response whose body has not been read yet
///
/// Pick one way to read it: the `into_*` methods consume the response, so a body is
/// decoded exactly once. The connection returns to the pool when the body is read to
/// the end.
#[derive(Debug)]
pub struct StreamingResponse {
    status: StatusCode,
    headers: HeaderMap,
    chunked: bool,
    body: ResponseBody,
}

impl StreamingResponse {
    pub(crate) fn new(status: StatusCode, headers: HeaderMap, body: ResponseBody) -> Self {
        let chunked = headers
            .get_all(http::header::TRANSFER_ENCODING)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .any(|value| value.to_ascii_lowercase().contains("chunked"));

        Self {
            status,
            headers,
            chunked,
            body,
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Whether the body uses chunked transfer encoding
    #[must_use]
    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    /// A handle that aborts the body from another task
    #[must_use]
    pub fn closer(&self) -> Closer {
        self.body.closer()
    }

    /// Raw byte chunks
    ///
    /// A body without chunked encoding is one unit and is yielded once, whole.
    #[must_use]
    pub fn into_stream(self) -> ResponseBody {
        if self.chunked {
            self.body
        } else {
            self.body.coalesced()
        }
    }

    /// JSON documents, whatever the chunking
    #[must_use]
    pub fn into_json<T: DeserializeOwned>(self) -> JsonStream<T> {
        Decoded::new(self.body, JsonDecoder::new())
    }

    /// Container output, demultiplexed unless `tty` is set
    #[must_use]
    pub fn into_frames(self, tty: bool) -> LogStream {
        Decoded::new(self.body, FrameDecoder::new(tty))
    }

    /// Decode with a mode chosen at runtime
    #[must_use]
    pub fn decode(self, mode: DecodeMode) -> Units {
        match mode {
            DecodeMode::Raw => self.into_stream().map_ok(Unit::Raw).boxed(),
            DecodeMode::Json => self.into_json::<Value>().map_ok(Unit::Json).boxed(),
            DecodeMode::Demux { tty } => self.into_frames(tty).map_ok(Unit::Frame).boxed(),
        }
    }

    /// Read the whole body
    pub async fn bytes(self) -> Result<Bytes, DockerError> {
        let mut body = self.into_stream();
        let mut collected = Vec::new();
        while let Some(chunk) = body.next().await {
            collected.extend_from_slice(&chunk?);
        }
        Ok(Bytes::from(collected))
    }

    /// Read the whole body as container output, split into `(stdout, stderr)`
    ///
    /// With a TTY everything lands in stdout.
    pub async fn demux(self, tty: bool) -> Result<(Vec<u8>, Vec<u8>), DockerError> {
        collect_output(self.into_frames(tty)).await
    }
}

/// Split a stream of container output into `(stdout, stderr)`
pub async fn collect_output<S>(mut frames: S) -> Result<(Vec<u8>, Vec<u8>), DockerError>
where
    S: Stream<Item = Result<LogOutput, DockerError>> + Unpin,
{
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    while let Some(frame) = frames.next().await {
        match frame? {
            LogOutput::StdOut { message } | LogOutput::Console { message } => {
                stdout.extend_from_slice(&message);
            }
            LogOutput::StdErr { message } => stderr.extend_from_slice(&message),
            LogOutput::StdIn { .. } => {}
        }
    }

    Ok((stdout, stderr))
}
