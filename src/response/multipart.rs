//! `multipart/mixed` streaming
//!
//! Each file's rendered payload becomes one base64 part:
//!
//! ```text
//! --<boundary>\r\n
//! Content-Length: <base64 length>\r\n
//! Content-Transfer-Encoding: base64\r\n
//! Content-Type: <output format>\r\n
//! \r\n
//! <base64 body>\r\n
//! ```
//!
//! After the last part the stream yields one empty frame.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::{BufMut, Bytes, BytesMut};
use futures::{Stream, StreamExt};

const CRLF: &[u8] = b"\r\n";

/// Frames payloads under one random boundary
#[derive(Debug, Clone)]
pub struct MultipartEncoder {
    boundary: String,
    part_content_type: String,
}

impl MultipartEncoder {
    pub fn new(part_content_type: impl Into<String>) -> Self {
        Self {
            boundary: uuid::Uuid::new_v4().simple().to_string(),
            part_content_type: part_content_type.into(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value for the response `Content-Type` header
    pub fn content_type(&self) -> String {
        format!("multipart/mixed; boundary=\"{}\"", self.boundary)
    }

    pub fn encode_part(&self, payload: &[u8]) -> Bytes {
        let body = STANDARD.encode(payload);
        let headers = format!(
            "Content-Length: {}\r\nContent-Transfer-Encoding: base64\r\nContent-Type: {}\r\n",
            body.len(),
            self.part_content_type
        );

        let mut part = BytesMut::with_capacity(self.boundary.len() + headers.len() + body.len() + 8);
        part.put_slice(b"--");
        part.put_slice(self.boundary.as_bytes());
        part.put_slice(CRLF);
        part.put_slice(headers.as_bytes());
        part.put_slice(CRLF);
        part.put_slice(body.as_bytes());
        part.put_slice(CRLF);
        part.freeze()
    }

    /// Encode payloads as they arrive.
    ///
    /// `payloads` is polled one item at a time, so a lazily built source
    /// keeps only one file's result in memory. An error ends the stream.
    pub fn stream<S, E>(self, payloads: S) -> impl Stream<Item = Result<Bytes, E>>
    where
        S: Stream<Item = Result<Bytes, E>>,
    {
        async_stream::try_stream! {
            futures::pin_mut!(payloads);
            while let Some(payload) = payloads.next().await {
                let payload = payload?;
                yield self.encode_part(&payload);
            }
            yield Bytes::new();
        }
    }
}
