use bollard::container::LogOutput;
use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

use crate::error::DockerError;

pub const HEADER_LEN: usize = 8;

pub const STDIN: u8 = 0;
pub const STDOUT: u8 = 1;
pub const STDERR: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Header,
    Payload { stream: u8, len: usize },
}

/// Decodes container output
///
/// Without a TTY the daemon multiplexes stdout and stderr into frames: one byte of
/// stream id, three reserved bytes, a big-endian `u32` length, then the payload.
/// With a TTY the output is raw console bytes and every chunk is passed through.
#[derive(Debug)]
pub struct FrameDecoder {
    tty: bool,
    state: State,
}

impl FrameDecoder {
    #[must_use]
    pub fn multiplexed() -> Self {
        Self {
            tty: false,
            state: State::Header,
        }
    }

    #[must_use]
    pub fn tty() -> Self {
        Self {
            tty: true,
            state: State::Header,
        }
    }

    #[must_use]
    pub fn new(tty: bool) -> Self {
        if tty { Self::tty() } else { Self::multiplexed() }
    }
}

fn output(stream: u8, message: bytes::Bytes) -> LogOutput {
    match stream {
        STDERR => LogOutput::StdErr { message },
        _ => LogOutput::StdOut { message },
    }
}

impl Decoder for FrameDecoder {
    type Item = LogOutput;
    type Error = DockerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<LogOutput>, DockerError> {
        if self.tty {
            if src.is_empty() {
                return Ok(None);
            }
            return Ok(Some(LogOutput::Console {
                message: src.split().freeze(),
            }));
        }

        loop {
            match self.state {
                State::Header => {
                    if src.len() < HEADER_LEN {
                        src.reserve(HEADER_LEN - src.len());
                        return Ok(None);
                    }

                    let stream = src[0];
                    if !matches!(stream, STDOUT | STDERR) {
                        return Err(DockerError::Decode(format!(
                            "invalid stream id {} in frame header",
                            stream
                        )));
                    }

                    let len = u32::from_be_bytes([src[4], src[5], src[6], src[7]]);
                    let len = usize::try_from(len).map_err(|_| {
                        DockerError::Decode(format!("frame of {} bytes is too large", len))
                    })?;
                    src.advance(HEADER_LEN);

                    if len == 0 {
                        continue;
                    }
                    self.state = State::Payload { stream, len };
                }
                State::Payload { stream, len } => {
                    // the buffer grows as chunks arrive, never to the announced length
                    if src.len() < len {
                        return Ok(None);
                    }

                    let message = src.split_to(len).freeze();
                    self.state = State::Header;
                    return Ok(Some(output(stream, message)));
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<LogOutput>, DockerError> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        match self.state {
            State::Header if src.is_empty() => Ok(None),
            State::Header => Err(DockerError::StreamTruncated {
                expected: Some(HEADER_LEN),
                received: src.len(),
            }),
            State::Payload { len, .. } => Err(DockerError::StreamTruncated {
                expected: Some(len),
                received: src.len(),
            }),
        }
    }
}

/// Build one frame, as the daemon would send it
#[must_use]
pub fn encode_frame(stream: u8, payload: &[u8]) -> Vec<u8> {
    let len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&[stream, 0, 0, 0]);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_then_payload() {
        let mut decoder = FrameDecoder::multiplexed();
        let frame = encode_frame(STDERR, b"oops\n");

        let mut buf = BytesMut::from(&frame[..5]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&frame[5..]);

        match decoder.decode(&mut buf).unwrap() {
            Some(LogOutput::StdErr { message }) => assert_eq!(&message[..], b"oops\n"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_skips_empty_frames() {
        let mut decoder = FrameDecoder::multiplexed();
        let mut bytes = encode_frame(STDOUT, b"");
        bytes.extend(encode_frame(STDOUT, b"x"));
        let mut buf = BytesMut::from(&bytes[..]);

        match decoder.decode(&mut buf).unwrap() {
            Some(LogOutput::StdOut { message }) => assert_eq!(&message[..], b"x"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_rejects_unknown_stream() {
        let mut decoder = FrameDecoder::multiplexed();
        let mut buf = BytesMut::from(&encode_frame(7, b"data")[..]);
        assert!(matches!(decoder.decode(&mut buf), Err(DockerError::Decode(_))));
    }

    #[test]
    fn test_rejects_stdin_frames() {
        let mut decoder = FrameDecoder::multiplexed();
        let mut buf = BytesMut::from(&encode_frame(STDIN, b"in")[..]);
        assert!(matches!(decoder.decode(&mut buf), Err(DockerError::Decode(_))));
    }

    #[test]
    fn test_huge_length_is_not_preallocated() {
        let mut decoder = FrameDecoder::multiplexed();
        let mut buf = BytesMut::from(&[STDOUT, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xF0, b'a'][..]);

        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert!(buf.capacity() < 64 * 1024, "capacity {}", buf.capacity());
        assert_eq!(&buf[..], b"a");
    }

    #[test]
    fn test_truncated_payload() {
        let mut decoder = FrameDecoder::multiplexed();
        let mut frame = encode_frame(STDOUT, &[b'a'; 100]);
        frame.truncate(HEADER_LEN + 40);
        let mut buf = BytesMut::from(&frame[..]);

        assert!(decoder.decode(&mut buf).unwrap().is_none());
        match decoder.decode_eof(&mut buf) {
            Err(DockerError::StreamTruncated { expected, received }) => {
                assert_eq!((expected, received), (Some(100), 40));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_truncated_header() {
        let mut decoder = FrameDecoder::multiplexed();
        let mut buf = BytesMut::from(&[1u8, 0, 0][..]);
        assert!(matches!(
            decoder.decode_eof(&mut buf),
            Err(DockerError::StreamTruncated {
                expected: Some(8),
                received: 3
            })
        ));
    }

    #[test]
    fn test_tty_passes_bytes_through() {
        let mut decoder = FrameDecoder::tty();
        let mut buf = BytesMut::from(&b"\x01\x00raw"[..]);
        match decoder.decode(&mut buf).unwrap() {
            Some(LogOutput::Console { message }) => assert_eq!(&message[..], b"\x01\x00raw"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(decoder.decode_eof(&mut buf).unwrap().is_none());
    }
}
