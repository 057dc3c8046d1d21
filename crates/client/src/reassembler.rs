//! Incremental reassembly of `data: <json>` lines from arbitrary byte chunks.
//!
//! The chat endpoint answers with a text body made of lines that are either
//! blank or of the form `data: {"response": "..."}`. Transport chunks do not
//! respect line, JSON or UTF-8 boundaries, so this module keeps two pieces of
//! state across calls: a streaming UTF-8 decoder and the trailing text that has
//! not been terminated by a newline yet.

use encoding_rs::{CoderResult, Decoder, UTF_8};
use serde_json::{Map, Value};

/// Prefix that marks a line as carrying an event payload.
pub const EVENT_MARKER: &str = "data: ";

/// One event decoded from a payload line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Text to append to the in-progress assistant message.
    Delta { text: String },
    /// The server finished the answer.
    Done,
    /// The server reported an application error in-band.
    Error { message: String },
}

impl StreamEvent {
    pub fn delta(text: impl Into<String>) -> Self {
        Self::Delta { text: text.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// `Done` and `Error` end the stream; nothing after them is processed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }
}

/// Turns raw body chunks into ordered [`StreamEvent`]s.
pub struct Reassembler {
    decoder: Decoder,
    buffer: String,
    finished: bool,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reassembler {
    pub fn new() -> Self {
        Self {
            decoder: UTF_8.new_decoder(),
            buffer: String::new(),
            finished: false,
        }
    }

    /// Feeds one chunk and returns the events of every line it completed.
    ///
    /// After a terminal event the remaining lines are discarded and every later
    /// call returns nothing.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }

        self.decode(chunk, false);
        self.drain_complete_lines()
    }

    /// Flushes the decoder and treats the unterminated remainder as a final line.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }

        self.decode(&[], true);
        self.finished = true;

        let residual = std::mem::take(&mut self.buffer);
        if !residual.is_empty() {
            tracing::trace!(residual_len = residual.len(), "flushing residual stream buffer");
        }

        let mut events = Vec::new();
        for event in parse_line(&residual) {
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
        events
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Text received but not yet terminated by a newline.
    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    fn decode(&mut self, mut input: &[u8], last: bool) {
        loop {
            let needed = self
                .decoder
                .max_utf8_buffer_length(input.len())
                .unwrap_or_else(|| input.len().saturating_mul(3).saturating_add(4));
            self.buffer.reserve(needed);

            let (result, read, _) = self.decoder.decode_to_string(input, &mut self.buffer, last);
            input = &input[read..];

            match result {
                CoderResult::InputEmpty => return,
                CoderResult::OutputFull => continue,
            }
        }
    }

    fn drain_complete_lines(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        let Some(last_newline) = self.buffer.rfind('\n') else {
            return events;
        };

        // Everything after the last newline may still grow, so it becomes the new buffer.
        let remainder = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, remainder);

        for line in complete.split_terminator('\n') {
            for event in parse_line(line) {
                let terminal = event.is_terminal();
                events.push(event);
                if terminal {
                    self.finished = true;
                    self.buffer.clear();
                    return events;
                }
            }
        }

        events
    }
}

/// Applies the line rule to one complete line.
///
/// Lines without the marker, blank payloads, malformed JSON and non-object
/// payloads all produce no events. A payload yields at most one delta followed
/// by at most one terminal event.
pub fn parse_line(line: &str) -> Vec<StreamEvent> {
    let Some(payload) = line.strip_prefix(EVENT_MARKER) else {
        return Vec::new();
    };

    let payload = payload.trim();
    if payload.is_empty() {
        return Vec::new();
    }

    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(fields)) => events_from_fields(&fields),
        Ok(other) => {
            tracing::debug!(payload = %other, "ignoring non-object stream payload");
            Vec::new()
        }
        Err(error) => {
            tracing::warn!(error = %error, line = %line, "skipping malformed stream payload");
            Vec::new()
        }
    }
}

fn events_from_fields(fields: &Map<String, Value>) -> Vec<StreamEvent> {
    let mut events = Vec::new();

    if let Some(text) = fields.get("response").and_then(Value::as_str)
        && !text.is_empty()
    {
        events.push(StreamEvent::delta(text));
    }

    if fields.get("done").is_some_and(is_truthy) {
        events.push(StreamEvent::Done);
        return events;
    }

    if let Some(error) = fields.get("error").filter(|value| is_truthy(value)) {
        let message = match error {
            Value::String(message) => message.clone(),
            other => other.to_string(),
        };
        events.push(StreamEvent::Error { message });
    }

    events
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn run_chunks<C: AsRef<[u8]>>(chunks: &[C]) -> Vec<StreamEvent> {
        let mut reassembler = Reassembler::new();
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(reassembler.push(chunk.as_ref()));
        }
        events.extend(reassembler.finish());
        events
    }

    const WELL_FORMED: &str = concat!(
        "data: {\"response\":\"Héllo \"}\n",
        "\n",
        "data: {\"response\":\"wörld 世界 🎉\"}\n",
        "\n",
        "data: {\"response\":\"!\"}\n",
        "data: {\"done\":true}\n",
    );

    fn expected_well_formed() -> Vec<StreamEvent> {
        vec![
            StreamEvent::delta("Héllo "),
            StreamEvent::delta("wörld 世界 🎉"),
            StreamEvent::delta("!"),
            StreamEvent::Done,
        ]
    }

    #[test]
    fn split_across_chunks_yields_single_delta() {
        let mut reassembler = Reassembler::new();
        assert!(reassembler.push(b"data: {\"respon").is_empty());
        let events = reassembler.push(b"se\":\"Hi\"}\n");
        assert_eq!(events, vec![StreamEvent::delta("Hi")]);
        assert_eq!(reassembler.buffered(), "");
    }

    #[test]
    fn multiple_events_in_one_chunk_stop_at_done() {
        let events = run_chunks(&[concat!(
            "data: {\"response\":\"A\"}\n",
            "data: {\"response\":\"B\"}\n",
            "data: {\"done\":true}\n",
            "data: {\"response\":\"late\"}\n",
        )
        .as_bytes()]);
        assert_eq!(
            events,
            vec![
                StreamEvent::delta("A"),
                StreamEvent::delta("B"),
                StreamEvent::Done
            ]
        );
    }

    #[test]
    fn error_stops_processing_of_the_same_chunk() {
        let mut reassembler = Reassembler::new();
        let events = reassembler
            .push(b"data: {\"error\":\"bad\"}\ndata: {\"response\":\"ignored\"}\n");
        assert_eq!(events, vec![StreamEvent::error("bad")]);
        assert!(reassembler.is_finished());
        assert!(reassembler.push(b"data: {\"response\":\"later\"}\n").is_empty());
        assert!(reassembler.finish().is_empty());
    }

    #[test]
    fn unterminated_residual_is_flushed_at_end() {
        let events = run_chunks(&[b"data: {\"done\":true}"]);
        assert_eq!(events, vec![StreamEvent::Done]);
    }

    #[test]
    fn residual_delta_is_flushed_at_end() {
        let events = run_chunks(&[b"data: {\"response\":\"A\"}\ndata: {\"response\":\"tail\"}"]);
        assert_eq!(
            events,
            vec![StreamEvent::delta("A"), StreamEvent::delta("tail")]
        );
    }

    #[test]
    fn every_two_way_split_matches_single_chunk() {
        let bytes = WELL_FORMED.as_bytes();
        assert_eq!(run_chunks(&[bytes]), expected_well_formed());

        for split in 0..=bytes.len() {
            let (head, tail) = bytes.split_at(split);
            assert_eq!(
                run_chunks(&[head, tail]),
                expected_well_formed(),
                "split at byte {split}"
            );
        }
    }

    #[test]
    fn byte_at_a_time_matches_single_chunk() {
        let chunks = WELL_FORMED
            .as_bytes()
            .chunks(1)
            .collect::<Vec<_>>();
        assert_eq!(run_chunks(chunks.as_slice()), expected_well_formed());
    }

    #[test]
    fn three_way_splits_through_multibyte_characters_match() {
        let bytes = WELL_FORMED.as_bytes();
        let emoji_start = WELL_FORMED.find('🎉').unwrap();

        for first in emoji_start.saturating_sub(3)..=emoji_start + 4 {
            for second in first..=bytes.len().min(first + 6) {
                let chunks = [&bytes[..first], &bytes[first..second], &bytes[second..]];
                assert_eq!(
                    run_chunks(&chunks),
                    expected_well_formed(),
                    "splits at {first}/{second}"
                );
            }
        }
    }

    #[test]
    fn empty_chunks_do_not_change_events() {
        let bytes = WELL_FORMED.as_bytes();
        let (head, tail) = bytes.split_at(17);
        let chunks: [&[u8]; 6] = [b"", head, b"", b"", tail, b""];
        assert_eq!(run_chunks(&chunks), expected_well_formed());
    }

    #[test]
    fn lines_without_marker_are_ignored() {
        assert!(parse_line("event: message").is_empty());
        assert!(parse_line(": keep-alive").is_empty());
        assert!(parse_line("data:{\"response\":\"no space\"}").is_empty());
        assert!(parse_line("{\"response\":\"bare\"}").is_empty());
    }

    #[test]
    fn blank_payloads_are_ignored() {
        assert!(parse_line("data: ").is_empty());
        assert!(parse_line("data:    \t").is_empty());
        assert!(parse_line("").is_empty());
    }

    #[test]
    #[traced_test]
    fn malformed_json_is_skipped_and_logged() {
        let events = run_chunks(&[concat!(
            "data: {\"response\":\"A\"\n",
            "data: {\"response\":\"B\"}\n",
            "data: {\"done\":true}\n",
        )
        .as_bytes()]);
        assert_eq!(events, vec![StreamEvent::delta("B"), StreamEvent::Done]);
        assert!(logs_contain("skipping malformed stream payload"));
    }

    #[test]
    fn carriage_returns_are_trimmed_from_payloads() {
        let events = run_chunks(&[b"data: {\"response\":\"A\"}\r\n\r\ndata: {\"done\":true}\r\n"]);
        assert_eq!(events, vec![StreamEvent::delta("A"), StreamEvent::Done]);
    }

    #[test]
    fn empty_and_non_string_responses_produce_no_delta() {
        assert!(parse_line("data: {\"response\":\"\"}").is_empty());
        assert!(parse_line("data: {\"response\":null}").is_empty());
        assert!(parse_line("data: [1,2,3]").is_empty());
        assert!(parse_line("data: \"text\"").is_empty());
    }

    #[test]
    fn falsy_done_and_error_are_ignored() {
        assert!(parse_line("data: {\"done\":false}").is_empty());
        assert!(parse_line("data: {\"done\":0}").is_empty());
        assert!(parse_line("data: {\"error\":\"\"}").is_empty());
        assert!(parse_line("data: {\"error\":null}").is_empty());
    }

    #[test]
    fn delta_and_done_in_one_payload_keep_order() {
        assert_eq!(
            parse_line("data: {\"response\":\"last\",\"done\":true}"),
            vec![StreamEvent::delta("last"), StreamEvent::Done]
        );
    }

    #[test]
    fn done_takes_precedence_over_error_in_one_payload() {
        assert_eq!(
            parse_line("data: {\"done\":true,\"error\":\"late\"}"),
            vec![StreamEvent::Done]
        );
    }

    #[test]
    fn non_string_error_is_stringified() {
        assert_eq!(
            parse_line("data: {\"error\":{\"code\":500}}"),
            vec![StreamEvent::error("{\"code\":500}")]
        );
    }

    #[test]
    fn leading_bom_is_consumed() {
        let chunks: [&[u8]; 2] = [b"\xEF\xBB", b"\xBFdata: {\"done\":true}\n"];
        let events = run_chunks(&chunks);
        assert_eq!(events, vec![StreamEvent::Done]);
    }

    #[test]
    fn truncated_multibyte_at_end_becomes_replacement() {
        let mut reassembler = Reassembler::new();
        let events = reassembler.push(b"data: {\"response\":\"ok\"}\nxx\xE4\xB8");
        assert_eq!(events, vec![StreamEvent::delta("ok")]);
        // The partial character stays inside the decoder until more bytes arrive.
        assert_eq!(reassembler.buffered(), "xx");
        assert!(reassembler.finish().is_empty());
    }
}
