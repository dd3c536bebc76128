//! Frame decoder for the backend's SSE-like debug stream.
//!
//! Frames are separated by a blank line (`"\n\n"`). Within a frame only
//! `data:` lines carry information; the joined data text holds one JSON
//! object `{"stage": ..., "payload": ...}`, possibly wrapped in noise.
//!
//! The decoder buffers raw bytes so that a chunk boundary may fall anywhere,
//! including inside a multi-byte UTF-8 sequence.

use serde_json::Value;
use vizstream_protocol::DebugEvent;

const FRAME_SEPARATOR: &[u8] = b"\n\n";
const DATA_PREFIX: &str = "data:";

/// Stateful decoder for one stream. Not reusable across sessions.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already searched for a separator.
    scanned: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a raw chunk read from the transport.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Drains every complete frame currently buffered, skipping frames that
    /// fail to decode. The trailing partial frame stays buffered.
    pub fn frames(&mut self) -> Frames<'_> {
        Frames { decoder: self }
    }

    /// Decodes whatever is left once the stream has ended. A final frame is
    /// not required to be followed by a separator.
    pub fn finish(&mut self) -> Option<DebugEvent> {
        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        let text = String::from_utf8_lossy(&rest);
        if text.trim().is_empty() {
            return None;
        }
        parse_frame(&text)
    }

    /// Number of bytes waiting for a frame boundary.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    fn extract_frame(&mut self) -> Option<String> {
        // A separator may straddle the previous scan boundary.
        let start = self.scanned.saturating_sub(FRAME_SEPARATOR.len() - 1);
        let Some(offset) = self.buffer[start..]
            .windows(FRAME_SEPARATOR.len())
            .position(|window| window == FRAME_SEPARATOR)
        else {
            self.scanned = self.buffer.len();
            return None;
        };
        let pos = start + offset;
        self.scanned = 0;
        let mut frame: Vec<u8> = self.buffer.drain(..pos + FRAME_SEPARATOR.len()).collect();
        frame.truncate(pos);
        Some(String::from_utf8_lossy(&frame).into_owned())
    }
}

/// Iterator returned by [`FrameDecoder::frames`].
pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
}

impl Iterator for Frames<'_> {
    type Item = DebugEvent;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(frame) = self.decoder.extract_frame() {
            if let Some(event) = parse_frame(&frame) {
                return Some(event);
            }
        }
        None
    }
}

/// Parses one frame into a typed event. Returns `None` (after logging) when
/// the frame has no data, no JSON object, or a payload of the wrong shape.
pub fn parse_frame(frame: &str) -> Option<DebugEvent> {
    let Some(data) = extract_data(frame) else {
        tracing::trace!("skipping frame without data line");
        return None;
    };

    let Some(json) = extract_json_object(&data) else {
        tracing::warn!("skipping frame without a JSON object: {data}");
        return None;
    };

    let mut object = match serde_json::from_str::<Value>(json) {
        Ok(Value::Object(object)) => object,
        Ok(other) => {
            tracing::warn!("skipping frame whose data is not an object: {other}");
            return None;
        }
        Err(e) => {
            tracing::warn!("failed to parse frame: {e} - data: {json}");
            return None;
        }
    };

    let stage = match object.remove("stage") {
        Some(Value::String(stage)) => Some(stage),
        _ => None,
    };
    let payload = object.remove("payload").unwrap_or(Value::Null);

    match DebugEvent::from_frame(stage.as_deref(), payload) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!(
                "skipping `{}` frame with malformed payload: {e}",
                stage.as_deref().unwrap_or_default()
            );
            None
        }
    }
}

/// Joins the `data:` lines of a frame (prefix matched case-insensitively).
fn extract_data(frame: &str) -> Option<String> {
    let mut lines = frame
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter_map(|line| {
            let prefix = line.get(..DATA_PREFIX.len())?;
            prefix
                .eq_ignore_ascii_case(DATA_PREFIX)
                .then(|| &line[DATA_PREFIX.len()..])
        })
        .peekable();

    lines.peek()?;
    Some(lines.collect::<Vec<_>>().join("\n"))
}

/// Slice from the first `{` to the last `}`, inclusive.
pub(crate) fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}
