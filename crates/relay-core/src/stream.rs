//! Stream forwarder (C6): relays SSE bytes upstream→client unchanged except
//! for integer-token fields rewritten by the caller's price rate, and keeps
//! a bounded tail of the raw bytes for error logging. Token rewriting
//! round-trips through `serde_json` so the rewritten event stays valid JSON;
//! everything else (event framing, ordering, non-numeric fields) passes
//! through byte-for-byte.

use std::collections::VecDeque;

use bytes::Bytes;
use relay_protocol::sse::{SseEvent, SseParser};

/// Fields this proxy knows how to scale. Anthropic and OpenAI happen to use
/// disjoint names, so one rewrite pass handles both dialects.
const TOKEN_FIELDS: &[&str] = &[
    "prompt_tokens",
    "completion_tokens",
    "total_tokens",
    "input_tokens",
    "output_tokens",
    "cache_creation_input_tokens",
    "cache_read_input_tokens",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct UsageTotals {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_creation_tokens: i64,
    pub cache_read_tokens: i64,
}

impl UsageTotals {
    pub fn total(&self) -> i64 {
        self.input_tokens + self.output_tokens + self.cache_creation_tokens + self.cache_read_tokens
    }
}

/// Multiplies every token count field it finds in a JSON value by `rate`,
/// flooring to preserve the integer-field contract, and accumulates the
/// scaled totals it encountered so the caller can persist exactly what the
/// client saw.
pub struct RateWriter {
    rate: f64,
}

impl RateWriter {
    pub fn new(rate: f64) -> Self {
        Self { rate: if rate > 0.0 { rate } else { 1.0 } }
    }

    /// Rewrites `value` in place (recursing into objects/arrays) and returns
    /// the scaled totals found at this call, merged into `totals`.
    pub fn rewrite(&self, value: &mut serde_json::Value, totals: &mut UsageTotals) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, v) in map.iter_mut() {
                    if TOKEN_FIELDS.contains(&key.as_str()) {
                        if let Some(n) = v.as_i64() {
                            let scaled = (self.rate * n as f64).floor() as i64;
                            *v = serde_json::Value::from(scaled);
                            self.accumulate(key, scaled, totals);
                            continue;
                        }
                    }
                    self.rewrite(v, totals);
                }
            }
            serde_json::Value::Array(items) => {
                for item in items.iter_mut() {
                    self.rewrite(item, totals);
                }
            }
            _ => {}
        }
    }

    fn accumulate(&self, key: &str, scaled: i64, totals: &mut UsageTotals) {
        match key {
            "prompt_tokens" | "input_tokens" => totals.input_tokens = scaled,
            "completion_tokens" | "output_tokens" => totals.output_tokens = scaled,
            "cache_creation_input_tokens" => totals.cache_creation_tokens = scaled,
            "cache_read_input_tokens" => totals.cache_read_tokens = scaled,
            _ => {}
        }
    }
}

/// Rewrites one SSE event's `data` payload if it parses as JSON; non-JSON
/// payloads (including `[DONE]`) pass through untouched.
pub fn rewrite_event(event: &SseEvent, writer: &RateWriter, totals: &mut UsageTotals) -> SseEvent {
    let Ok(mut value) = serde_json::from_str::<serde_json::Value>(&event.data) else {
        return event.clone();
    };
    writer.rewrite(&mut value, totals);
    SseEvent {
        event: event.event.clone(),
        data: serde_json::to_string(&value).unwrap_or_else(|_| event.data.clone()),
    }
}

pub fn encode_event(event: &SseEvent) -> Bytes {
    let mut out = String::new();
    if let Some(name) = &event.event {
        out.push_str("event: ");
        out.push_str(name);
        out.push('\n');
    }
    for line in event.data.split('\n') {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    Bytes::from(out)
}

/// Ring buffer of the last `capacity` raw bytes a stream emitted, kept for
/// error-path logging on the rare request that fails mid-stream.
pub struct TailBuffer {
    capacity: usize,
    buf: VecDeque<u8>,
}

impl TailBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buf: VecDeque::with_capacity(capacity.min(1 << 16)),
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        if self.capacity == 0 {
            return;
        }
        for &byte in chunk {
            if self.buf.len() == self.capacity {
                self.buf.pop_front();
            }
            self.buf.push_back(byte);
        }
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.buf.iter().copied().collect()
    }
}

/// Drives an `SseParser` over incoming chunks, rewriting each event's
/// token fields and feeding the tail buffer, in one pass per chunk.
pub struct StreamForwarder {
    parser: SseParser,
    writer: RateWriter,
    tail: TailBuffer,
    totals: UsageTotals,
}

impl StreamForwarder {
    pub fn new(rate: f64, tail_capacity: usize) -> Self {
        Self {
            parser: SseParser::new(),
            writer: RateWriter::new(rate),
            tail: TailBuffer::new(tail_capacity),
            totals: UsageTotals::default(),
        }
    }

    /// Processes one upstream chunk, returning the bytes to forward to the
    /// client (already rewritten and re-encoded as SSE).
    pub fn push_chunk(&mut self, chunk: &Bytes) -> Bytes {
        self.tail.push(chunk);
        let events = self.parser.push_bytes(chunk);
        self.encode_all(&events)
    }

    pub fn finish(&mut self) -> Bytes {
        let events = self.parser.finish();
        self.encode_all(&events)
    }

    fn encode_all(&mut self, events: &[SseEvent]) -> Bytes {
        let mut out = Vec::new();
        for event in events {
            let rewritten = rewrite_event(event, &self.writer, &mut self.totals);
            out.extend_from_slice(&encode_event(&rewritten));
        }
        Bytes::from(out)
    }

    pub fn totals(&self) -> UsageTotals {
        self.totals
    }

    pub fn tail(&self) -> Vec<u8> {
        self.tail.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_openai_usage_fields_in_place() {
        let mut forwarder = StreamForwarder::new(2.0, 4096);
        let chunk = Bytes::from_static(
            b"data: {\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":1,\"total_tokens\":4}}\n\n",
        );
        let out = forwarder.push_chunk(&chunk);
        let text = String::from_utf8(out.to_vec()).unwrap();
        assert!(text.contains("\"prompt_tokens\":6"));
        assert!(text.contains("\"completion_tokens\":2"));
        assert_eq!(forwarder.totals().input_tokens, 6);
        assert_eq!(forwarder.totals().output_tokens, 2);
    }

    #[test]
    fn passthrough_rate_one_leaves_bytes_equivalent() {
        let mut forwarder = StreamForwarder::new(1.0, 4096);
        let chunk = Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n");
        let out = forwarder.push_chunk(&chunk);
        let value: serde_json::Value =
            serde_json::from_str(std::str::from_utf8(&out).unwrap().trim_start_matches("data: "))
                .unwrap();
        assert_eq!(value["choices"][0]["delta"]["content"], "Hi");
    }

    #[test]
    fn done_marker_passes_through_unparsed() {
        let mut forwarder = StreamForwarder::new(1.0, 16);
        let out = forwarder.push_chunk(&Bytes::from_static(b"data: [DONE]\n\n"));
        assert_eq!(out, Bytes::from_static(b"data: [DONE]\n\n"));
    }

    #[test]
    fn tail_buffer_keeps_only_the_last_bytes() {
        let mut tail = TailBuffer::new(4);
        tail.push(b"abcdef");
        assert_eq!(tail.snapshot(), b"cdef");
    }
}
