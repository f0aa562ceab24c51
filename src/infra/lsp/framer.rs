//! LSP Message Framing
//!
//! Messages travel as `Content-Length: N\r\n\r\n{json}` over the child's
//! stdio. [`FrameDecoder`] is a push decoder: bytes are fed in whatever
//! chunks the pipe delivers and complete messages are pulled out lazily.
//! [`FrameReader`] and [`FrameWriter`] wrap it for async streams.

use std::collections::VecDeque;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::protocol::Message;
use crate::error::{FramingError, LspError};

/// Maximum frame size (64 MiB) to prevent unbounded memory allocation.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Header block larger than this without a terminator is garbage.
const MAX_HEADER_BYTES: usize = 8 * 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

const READ_CHUNK_BYTES: usize = 8 * 1024;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Frame one message. The length is the UTF-8 byte length of the body.
pub fn encode(message: &Message) -> serde_json::Result<Vec<u8>> {
    Ok(frame_body(&serde_json::to_vec(message)?))
}

fn frame_body(body: &[u8]) -> Vec<u8> {
    let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    frame.extend_from_slice(body);
    frame
}

/// Incremental decoder, one per connection.
///
/// After the first error the decoder is poisoned: the error is yielded once
/// and nothing is decoded afterwards.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    failed: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and iterate over every message it completes
    pub fn feed(&mut self, chunk: &[u8]) -> Frames<'_> {
        if !self.failed {
            self.buf.extend_from_slice(chunk);
        }
        Frames { decoder: self }
    }

    /// Bytes held back waiting for the rest of a frame
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Called at end of stream; leftover bytes mean a truncated frame
    pub fn finish(&self) -> Result<(), FramingError> {
        if !self.failed && !self.buf.is_empty() {
            return Err(FramingError::Truncated(self.buf.len()));
        }
        Ok(())
    }

    fn next_frame(&mut self) -> Option<Result<Message, FramingError>> {
        if self.failed {
            return None;
        }
        match self.try_decode() {
            Ok(Some(message)) => Some(Ok(message)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                self.buf.clear();
                Some(Err(e))
            }
        }
    }

    fn try_decode(&mut self) -> Result<Option<Message>, FramingError> {
        let Some(header_len) = self
            .buf
            .windows(HEADER_TERMINATOR.len())
            .position(|w| w == HEADER_TERMINATOR)
        else {
            if self.buf.len() > MAX_HEADER_BYTES {
                return Err(FramingError::MalformedHeader(format!(
                    "no header terminator within {} bytes",
                    self.buf.len()
                )));
            }
            return Ok(None);
        };

        let content_length = parse_headers(&self.buf[..header_len])?;
        let body_start = header_len + HEADER_TERMINATOR.len();
        let frame_end = body_start + content_length;
        if self.buf.len() < frame_end {
            return Ok(None);
        }

        let frame: Vec<u8> = self.buf.drain(..frame_end).collect();
        let body = &frame[body_start..];
        tracing::trace!("LSP <- {}", String::from_utf8_lossy(body));

        let value: serde_json::Value =
            serde_json::from_slice(body).map_err(|e| FramingError::InvalidBody(e.to_string()))?;
        Message::from_value(value)
            .map(Some)
            .map_err(|e| FramingError::InvalidBody(e.to_string()))
    }
}

/// Parse the header block and return Content-Length.
///
/// Header names are case-insensitive; headers other than Content-Length
/// (Content-Type, ...) are ignored.
fn parse_headers(block: &[u8]) -> Result<usize, FramingError> {
    let text = std::str::from_utf8(block)
        .map_err(|_| FramingError::MalformedHeader("header is not UTF-8".to_string()))?;

    let mut content_length = None;
    for line in text.split("\r\n") {
        let Some((name, value)) = line.split_once(':') else {
            return Err(FramingError::MalformedHeader(line.to_string()));
        };
        if name.trim().eq_ignore_ascii_case("Content-Length") {
            let value = value.trim();
            let len: usize = value
                .parse()
                .map_err(|_| FramingError::InvalidContentLength(value.to_string()))?;
            content_length = Some(len);
        }
    }

    let len = content_length.ok_or(FramingError::MissingContentLength)?;
    if len > MAX_FRAME_BYTES {
        return Err(FramingError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_BYTES,
        });
    }
    Ok(len)
}

/// Lazy sequence of messages completed by the last [`FrameDecoder::feed`].
/// Frames not pulled stay buffered for the next feed.
pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
}

impl Iterator for Frames<'_> {
    type Item = Result<Message, FramingError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decoder.next_frame()
    }
}

/// Reads messages from an async byte stream through a [`FrameDecoder`]
pub struct FrameReader<R> {
    reader: R,
    decoder: FrameDecoder,
    ready: VecDeque<Message>,
    chunk: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            decoder: FrameDecoder::new(),
            ready: VecDeque::new(),
            chunk: vec![0u8; READ_CHUNK_BYTES],
        }
    }

    /// Next message, `Ok(None)` on clean end of stream.
    pub async fn next_message(&mut self) -> Result<Option<Message>, LspError> {
        loop {
            if let Some(message) = self.ready.pop_front() {
                return Ok(Some(message));
            }

            let n = self.reader.read(&mut self.chunk).await?;
            if n == 0 {
                self.decoder.finish()?;
                return Ok(None);
            }

            for frame in self.decoder.feed(&self.chunk[..n]) {
                self.ready.push_back(frame?);
            }
        }
    }
}

/// Writes framed messages; callers serialize access through one lock
pub struct FrameWriter<W = BoxedWriter> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_message(&mut self, message: &Message) -> Result<(), LspError> {
        let body = serde_json::to_vec(message)?;
        tracing::trace!("LSP -> {}", String::from_utf8_lossy(&body));
        self.writer.write_all(&frame_body(&body)).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn close(&mut self) -> Result<(), LspError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
