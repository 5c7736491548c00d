//! Decoder for the engine's multiplexed stdout/stderr log stream.
//!
//! Each frame is an 8-byte header (stream id, three reserved bytes, payload
//! length as big-endian u32) followed by the payload. Payloads are
//! concatenated in arrival order; headers never reach the output.

use bytes::{BufMut, Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use thiserror::Error;

use crate::engine::EngineError;

pub const HEADER_LEN: usize = 8;

pub const STREAM_STDIN: u8 = 0;
pub const STREAM_STDOUT: u8 = 1;
pub const STREAM_STDERR: u8 = 2;

#[derive(Debug, Error)]
pub enum DemuxError {
    #[error("corrupt log stream: {pending} trailing bytes do not form a complete frame")]
    CorruptLogStream { pending: usize },

    #[error("log stream read error: {0}")]
    Read(#[from] EngineError),
}

/// Incremental frame decoder.
///
/// Holds at most one partial header; payload bytes are copied straight to
/// the output as they arrive, so a large frame is never buffered whole.
#[derive(Debug, Default)]
pub struct LogDemuxer {
    header: [u8; HEADER_LEN],
    header_filled: usize,
    payload_remaining: usize,
    frames: usize,
    output: Vec<u8>,
}

impl LogDemuxer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mut chunk: &[u8]) {
        while !chunk.is_empty() {
            if self.payload_remaining > 0 {
                let take = self.payload_remaining.min(chunk.len());
                self.output.extend_from_slice(&chunk[..take]);
                self.payload_remaining -= take;
                chunk = &chunk[take..];
                continue;
            }

            let take = (HEADER_LEN - self.header_filled).min(chunk.len());
            self.header[self.header_filled..self.header_filled + take]
                .copy_from_slice(&chunk[..take]);
            self.header_filled += take;
            chunk = &chunk[take..];

            if self.header_filled == HEADER_LEN {
                let h = &self.header;
                self.payload_remaining = u32::from_be_bytes([h[4], h[5], h[6], h[7]]) as usize;
                self.header_filled = 0;
                self.frames += 1;
            }
        }
    }

    /// Bytes of an unfinished frame (header bytes read plus payload bytes
    /// still owed).
    pub fn pending(&self) -> usize {
        self.header_filled + self.payload_remaining
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// End of stream. Clean only when no frame is left half read.
    pub fn finish(self) -> Result<String, DemuxError> {
        if self.pending() > 0 {
            return Err(DemuxError::CorruptLogStream {
                pending: self.pending(),
            });
        }
        Ok(self.into_text())
    }

    /// Everything decoded so far, including the received part of an
    /// unfinished frame.
    pub fn into_text(self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

/// Drain a raw log stream into one ordered text.
pub async fn demux_stream<S>(stream: S) -> Result<String, DemuxError>
where
    S: Stream<Item = Result<Bytes, EngineError>>,
{
    let mut stream = std::pin::pin!(stream);
    let mut demuxer = LogDemuxer::new();
    while let Some(chunk) = stream.next().await {
        demuxer.push(&chunk?);
    }
    demuxer.finish()
}

/// Encode one frame in the wire format.
pub fn encode_frame(stream_id: u8, payload: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
    frame.put_u8(stream_id);
    frame.put_bytes(0, 3);
    frame.put_u32(payload.len() as u32);
    frame.put_slice(payload);
    frame.freeze()
}
