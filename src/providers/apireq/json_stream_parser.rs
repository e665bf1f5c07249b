//! Incremental framing of JSON objects streamed in an HTTP response body.
//!
//! Two framings are supported: newline-delimited JSON (Ollama) and the subset
//! of server-sent events used by OpenAI, where every event carries its JSON
//! object in one or more `data:` fields and the stream is closed by a
//! `data: [DONE]` sentinel. Chunk boundaries in the byte stream are arbitrary;
//! the parser buffers until a whole object is framed.

use bytes::{Bytes, BytesMut};
use futures_core::stream::Stream;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use std::pin::Pin;

use super::ReqwestError;

/// The body of a streaming response.
pub(crate) type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

const DEFAULT_MAX_BUFFER: usize = 1 << 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamFormat {
    /// Newline-delimited JSON, see https://github.com/ndjson/ndjson-spec
    Ndjson,
    /// Server-sent events restricted to `data` fields
    Sse,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error("only \"data\" fields are understood in event streams, received \"{0}\"")]
    UnsupportedSseField(String),

    #[error("the response overflowed the {0} byte streaming buffer")]
    ResponseExceededBuffer(usize),

    #[error("failed to deserialize streamed object \"{blob}\": {source}")]
    Deserialization {
        blob: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("the source stream failed: {0}")]
    StreamFailed(#[source] ReqwestError),
}

pub(crate) struct JsonStreamParser {
    stream: ByteStream,
    format: StreamFormat,
    buf: BytesMut,
    max_size: usize,
    // data fields of the SSE event being assembled
    event: Vec<u8>,
    exhausted: bool,
}

impl JsonStreamParser {
    pub(crate) fn new(stream: ByteStream, format: StreamFormat) -> JsonStreamParser {
        Self::with_max_size(stream, format, DEFAULT_MAX_BUFFER)
    }

    pub(crate) fn with_max_size(
        stream: ByteStream,
        format: StreamFormat,
        max_size: usize,
    ) -> JsonStreamParser {
        JsonStreamParser {
            stream,
            format,
            buf: BytesMut::with_capacity(1 << 10),
            max_size,
            event: Vec::new(),
            exhausted: false,
        }
    }

    /// Split the next complete line off the buffer, without its [\r]\n.
    fn take_line(&mut self) -> Option<Bytes> {
        let newline = self.buf.iter().position(|b| *b == b'\n')?;

        let mut line = self.buf.split_to(newline + 1);
        line.truncate(newline);

        if line.last() == Some(&b'\r') {
            line.truncate(newline - 1);
        }

        Some(line.freeze())
    }

    /// Consume buffered lines until an object is framed or the buffer runs dry.
    fn frame(&mut self) -> Result<Option<Vec<u8>>, Error> {
        while let Some(line) = self.take_line() {
            match self.format {
                StreamFormat::Ndjson => {
                    if !line.is_empty() {
                        return Ok(Some(line.to_vec()));
                    }
                }
                StreamFormat::Sse => {
                    if line.is_empty() {
                        // Blank line dispatches the event; comment-only events are empty
                        if self.event.is_empty() {
                            continue;
                        }

                        self.event.pop();

                        return Ok(Some(std::mem::take(&mut self.event)));
                    }

                    let (field, value) = match line.iter().position(|b| *b == b':') {
                        Some(colon) => (&line[..colon], &line[colon + 1..]),
                        None => (&line[..], &line[line.len()..]),
                    };

                    if field.is_empty() {
                        continue;
                    }

                    if field != b"data" {
                        return Err(Error::UnsupportedSseField(
                            String::from_utf8_lossy(field).into_owned(),
                        ));
                    }

                    let value = value.strip_prefix(b" ").unwrap_or(value);

                    if value == b"[DONE]" {
                        continue;
                    }

                    self.event.extend_from_slice(value);
                    self.event.push(b'\n');
                }
            }
        }

        Ok(None)
    }

    async fn refill(&mut self) -> Result<bool, Error> {
        match self.stream.next().await {
            Some(Ok(chunk)) => {
                if self.buf.len() + chunk.len() > self.max_size {
                    return Err(Error::ResponseExceededBuffer(self.max_size));
                }

                self.buf.extend_from_slice(&chunk);

                Ok(true)
            }
            Some(Err(err)) => Err(Error::StreamFailed(err.into())),
            None => Ok(false),
        }
    }

    /// The raw bytes of the next framed object.
    pub(crate) async fn next_payload(&mut self) -> Option<Result<Vec<u8>, Error>> {
        loop {
            match self.frame() {
                Ok(Some(payload)) => return Some(Ok(payload)),
                Ok(None) => {}
                Err(err) => return Some(Err(err)),
            }

            if self.exhausted {
                return None;
            }

            match self.refill().await {
                Ok(true) => continue,
                Ok(false) => {
                    self.exhausted = true;

                    // NDJSON bodies are allowed to omit the final newline
                    if self.format == StreamFormat::Ndjson {
                        let rest = self.buf.split();

                        if !rest.iter().all(|b| b.is_ascii_whitespace()) {
                            return Some(Ok(rest.to_vec()));
                        }
                    }

                    return None;
                }
                Err(err) => return Some(Err(err)),
            }
        }
    }

    pub(crate) async fn parse<T: DeserializeOwned>(&mut self) -> Option<Result<T, Error>> {
        let payload = match self.next_payload().await? {
            Ok(payload) => payload,
            Err(err) => return Some(Err(err)),
        };

        Some(
            serde_json::from_slice::<T>(&payload).map_err(|source| Error::Deserialization {
                blob: String::from_utf8_lossy(&payload).into_owned(),
                source,
            }),
        )
    }
}
