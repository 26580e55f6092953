//! Byte-level framing for the two streaming dialects: server-sent events
//! (blank-line separated event blocks) and newline-delimited JSON. Chunks
//! arrive on arbitrary byte boundaries, including mid-UTF-8, so both buffers
//! accumulate raw bytes and only decode complete frames.

/// Accumulates SSE bytes and yields one event block at a time.
pub struct SseBuffer {
    buf: Vec<u8>,
}

impl SseBuffer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete event block (everything up to a blank line), or `None`
    /// until one has fully arrived. Accepts LF and CRLF framing.
    pub fn next_event_block(&mut self) -> Option<String> {
        let lf = self
            .buf
            .windows(2)
            .position(|window| window == b"\n\n")
            .map(|pos| (pos, 2));
        let crlf = self
            .buf
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
            .map(|pos| (pos, 4));

        let (pos, sep_len) = match (lf, crlf) {
            (Some(a), Some(b)) => std::cmp::min_by_key(a, b, |(pos, _)| *pos),
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => return None,
        };

        let block: Vec<u8> = self.buf.drain(..pos + sep_len).collect();
        Some(String::from_utf8_lossy(&block[..pos]).into_owned())
    }
}

/// The `data:` payloads of one event block, `[DONE]` sentinel included —
/// callers decide what the sentinel means for their dialect.
pub fn data_lines(block: &str) -> impl Iterator<Item = &str> {
    block
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim_start)
}

/// Accumulates NDJSON bytes and yields one line at a time.
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|byte| *byte == b'\n')?;
        let line: Vec<u8> = self.buf.drain(..=pos).collect();
        let text = String::from_utf8_lossy(&line[..pos]).into_owned();
        Some(text.trim_end_matches('\r').to_string())
    }
}
