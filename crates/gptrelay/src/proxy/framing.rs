//! Wire framing of relay frames
//!
//! Two encodings are served:
//! - [`Framing::Sse`]: `data: <json>\n\n` records closed by `data: [DONE]\n\n`
//! - [`Framing::Ndjson`]: newline-separated JSON records with no end marker

use bytes::Bytes;
use serde::Serialize;
use tracing::warn;

use crate::dispatch::RelayFrame;

pub const SSE_DONE: &str = "data: [DONE]\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Sse,
    Ndjson,
}

impl Framing {
    pub fn content_type(&self) -> &'static str {
        match self {
            Framing::Sse => "text/event-stream;charset=utf-8",
            Framing::Ndjson => "application/octet-stream",
        }
    }
}

/// Stateful encoder for one response body
#[derive(Debug)]
pub struct FrameEncoder {
    framing: Framing,
    records_written: usize,
}

impl FrameEncoder {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            records_written: 0,
        }
    }

    /// Bytes for `frame`, or `None` if this framing writes nothing for it.
    ///
    /// The completed turn is not re-sent: streaming callers already hold the
    /// full text from the last partial.
    pub fn encode(&mut self, frame: &RelayFrame) -> Option<Bytes> {
        match frame {
            RelayFrame::Partial(record) | RelayFrame::Failed(record) => self.record(record),
            RelayFrame::Final(_) => None,
            RelayFrame::Done => match self.framing {
                Framing::Sse => Some(Bytes::from_static(SSE_DONE.as_bytes())),
                Framing::Ndjson => None,
            },
        }
    }

    fn record<T: Serialize>(&mut self, record: &T) -> Option<Bytes> {
        let json = match serde_json::to_string(record) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to encode outbound record: {e}");
                return None;
            }
        };

        let framed = match self.framing {
            Framing::Sse => sse_record(&json),
            Framing::Ndjson if self.records_written == 0 => json,
            Framing::Ndjson => format!("\n{json}"),
        };
        self.records_written += 1;
        Some(Bytes::from(framed))
    }
}

/// Frame one JSON payload as an SSE data record
pub fn sse_record(json: &str) -> String {
    format!("data: {json}\n\n")
}
