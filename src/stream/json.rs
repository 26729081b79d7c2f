use std::marker::PhantomData;

use bytes::{Buf, BytesMut};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::codec::Decoder;

use crate::error::DockerError;

/// Splits a byte stream into JSON documents
///
/// Documents may be concatenated or separated by whitespace, and may span any number
/// of chunks. A document is only yielded once it is complete.
#[derive(Debug)]
pub struct JsonDecoder<T = Value> {
    scan: Scan,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonDecoder<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            scan: Scan::default(),
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Finds where the first document in the buffer ends
///
/// Progress is kept between calls, so bytes of an incomplete document are looked at
/// once no matter how many chunks it is spread over.
#[derive(Debug, Default)]
struct Scan {
    offset: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl Scan {
    fn complete(&mut self, src: &[u8]) -> Option<usize> {
        // numbers and literals end at whitespace or where the next document starts
        let scalar = !matches!(src.first(), Some(b'{' | b'[' | b'"'));

        while let Some(&byte) = src.get(self.offset) {
            self.offset += 1;

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                    if self.depth == 0 {
                        return Some(self.offset);
                    }
                }
                continue;
            }

            if scalar && (byte.is_ascii_whitespace() || matches!(byte, b'{' | b'[' | b'"')) {
                return Some(self.offset - 1);
            }
            match byte {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        return Some(self.offset);
                    }
                }
                _ => {}
            }
        }

        None
    }
}

fn skip_whitespace(src: &mut BytesMut) {
    let leading = src.iter().take_while(|b| b.is_ascii_whitespace()).count();
    src.advance(leading);
}

impl<T: DeserializeOwned> JsonDecoder<T> {
    fn parse(&mut self, src: &mut BytesMut, len: usize) -> Result<T, DockerError> {
        self.scan = Scan::default();
        let document = src.split_to(len);
        serde_json::from_slice(&document).map_err(|e| DockerError::Decode(e.to_string()))
    }
}

impl<T: DeserializeOwned> Decoder for JsonDecoder<T> {
    type Item = T;
    type Error = DockerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<T>, DockerError> {
        if self.scan.offset == 0 {
            skip_whitespace(src);
        }
        if src.is_empty() {
            return Ok(None);
        }

        match self.scan.complete(src) {
            Some(len) => self.parse(src, len).map(Some),
            // the rest of the document has not arrived yet
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<T>, DockerError> {
        if let Some(document) = self.decode(src)? {
            return Ok(Some(document));
        }

        skip_whitespace(src);
        if src.is_empty() {
            return Ok(None);
        }

        // a number or literal may run up to the very end of the body
        let len = src.len();
        self.parse(src, len).map(Some).map_err(|_| {
            DockerError::Decode(format!(
                "body ended inside a JSON document ({} bytes left)",
                len
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_waits_for_complete_document() {
        let mut decoder = JsonDecoder::<Value>::new();
        let mut buf = BytesMut::from(&b"{\"status\": \"Pull"[..]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"ing\"}\n{\"a\"");
        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(json!({"status": "Pulling"}))
        );
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert_eq!(&buf[..], b"{\"a\"");
    }

    #[test]
    fn test_malformed_document() {
        let mut decoder = JsonDecoder::<Value>::new();
        let mut buf = BytesMut::from(&b"{\"a\": tru}"[..]);
        assert!(matches!(decoder.decode(&mut buf), Err(DockerError::Decode(_))));
    }

    #[test]
    fn test_partial_document_at_eof() {
        let mut decoder = JsonDecoder::<Value>::new();
        let mut buf = BytesMut::from(&b"{\"a\": 1}\n{\"b\""[..]);
        assert_eq!(decoder.decode_eof(&mut buf).unwrap(), Some(json!({"a": 1})));
        assert!(matches!(
            decoder.decode_eof(&mut buf),
            Err(DockerError::Decode(_))
        ));
    }

    #[test]
    fn test_resumes_scan_across_chunks() {
        let document = json!({"layers": vec!["sha256:abcdef"; 200], "note": "a \"}\" b"});
        let bytes = serde_json::to_vec(&document).unwrap();

        let mut decoder = JsonDecoder::<Value>::new();
        let mut buf = BytesMut::new();
        for (i, byte) in bytes.iter().enumerate() {
            buf.extend_from_slice(&[*byte]);
            let decoded = decoder.decode(&mut buf).unwrap();
            if i + 1 < bytes.len() {
                assert!(decoded.is_none());
                assert_eq!(decoder.scan.offset, i + 1);
            } else {
                assert_eq!(decoded, Some(document.clone()));
            }
        }
        assert!(buf.is_empty());
        assert_eq!(decoder.scan.offset, 0);
    }

    #[test]
    fn test_scalar_documents() {
        let mut decoder = JsonDecoder::<Value>::new();
        let mut buf = BytesMut::from(&b"12 true\"s\"[1]7"[..]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(json!(12)));
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(json!(true)));
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(json!("s")));
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(json!([1])));
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert_eq!(decoder.decode_eof(&mut buf).unwrap(), Some(json!(7)));
        assert_eq!(decoder.decode_eof(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_trailing_whitespace_at_eof() {
        let mut decoder = JsonDecoder::<Value>::new();
        let mut buf = BytesMut::from(&b"{}\r\n\r\n"[..]);
        assert_eq!(decoder.decode_eof(&mut buf).unwrap(), Some(json!({})));
        assert_eq!(decoder.decode_eof(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_typed_documents() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Progress {
            id: String,
        }

        let mut decoder = JsonDecoder::<Progress>::new();
        let mut buf = BytesMut::from(&b"{\"id\": \"abc\"}{\"other\": 1}"[..]);
        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(Progress { id: "abc".into() })
        );
        assert!(matches!(decoder.decode(&mut buf), Err(DockerError::Decode(_))));
    }
}
