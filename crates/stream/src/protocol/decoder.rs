//! Frame decoder for chunked response bodies.
//!
//! Input is accumulated as raw bytes in a `BytesMut` and only complete lines
//! are converted to text, so a read boundary that falls inside a multi-byte
//! character or between the two halves of a `\r\n\r\n` separator is invisible
//! to the output. Two framings are supported:
//!
//! - `EventStream`: frames end at a blank line; `data:` lines are concatenated
//!   into the frame payload, every other field or comment line is ignored.
//! - `LineDelimited`: every complete line is one frame.
//!
//! # Example
//!
//! ```
//! use repochat_stream::protocol::{FrameDecoder, Framing};
//!
//! let mut decoder = FrameDecoder::new(Framing::EventStream);
//! assert!(decoder.push(b"data: {\"a\"").is_empty());
//! assert_eq!(decoder.push(b":1}\n\n"), vec!["{\"a\":1}".to_string()]);
//! ```

use bytes::BytesMut;

use super::Framing;

const DATA_FIELD: &str = "data:";

pub struct FrameDecoder {
    framing: Framing,
    /// Bytes not yet terminated by a line feed.
    buffer: BytesMut,
    /// Prefix of `buffer` already known to contain no line feed.
    scanned: usize,
    /// Data lines of the event-stream frame under construction.
    data_lines: Vec<String>,
}

impl FrameDecoder {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            buffer: BytesMut::with_capacity(8 * 1024),
            scanned: 0,
            data_lines: Vec::new(),
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Number of bytes held back waiting for a line terminator.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Appends input and returns every frame completed by it, in order.
    pub fn push(&mut self, input: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(input);

        let mut frames = Vec::new();
        while let Some(line) = self.next_line() {
            match self.framing {
                Framing::EventStream => {
                    if let Some(frame) = self.accept_event_line(&line) {
                        frames.push(frame);
                    }
                }
                Framing::LineDelimited => {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        frames.push(trimmed.to_string());
                    }
                }
            }
        }

        frames
    }

    /// Drains the decoder after the source has ended.
    ///
    /// Returns the best-effort payload of whatever was left unterminated: the
    /// final unterminated line, plus any event-stream data lines still waiting
    /// for their blank line.
    pub fn finish(&mut self) -> Option<String> {
        let tail = self.buffer.split();
        self.scanned = 0;
        let tail = String::from_utf8_lossy(&tail);
        let tail = tail.trim_end_matches(['\r', '\n']);

        match self.framing {
            Framing::EventStream => {
                if !tail.is_empty() {
                    self.accept_event_line(tail);
                }
                self.take_event_frame()
            }
            Framing::LineDelimited => {
                let trimmed = tail.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
        }
    }

    fn next_line(&mut self) -> Option<String> {
        let offset = self.buffer[self.scanned..]
            .iter()
            .position(|byte| *byte == b'\n');

        let Some(offset) = offset else {
            self.scanned = self.buffer.len();
            return None;
        };

        let newline = self.scanned + offset;
        let mut line = self.buffer.split_to(newline + 1);
        self.scanned = 0;

        line.truncate(newline);
        if line.last() == Some(&b'\r') {
            line.truncate(newline - 1);
        }

        Some(String::from_utf8_lossy(&line).into_owned())
    }

    fn accept_event_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.take_event_frame();
        }

        if let Some(value) = line.strip_prefix(DATA_FIELD) {
            self.data_lines.push(value.trim().to_string());
        }

        None
    }

    fn take_event_frame(&mut self) -> Option<String> {
        let payload = self.data_lines.drain(..).collect::<String>();
        if payload.trim().is_empty() {
            None
        } else {
            Some(payload)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVENT_STREAM_SAMPLE: &str = concat!(
        ": keep-alive\r\n\r\n",
        "event: message\r\n",
        "data: {\"type\":\"token\",\"message_id\":\"m1\",\"delta\":\"caf\u{e9} \"}\r\n\r\n",
        "data: {\"type\":\"token\",\r\n",
        "data: \"message_id\":\"m1\",\"delta\":\"\u{65e5}\u{672c}\u{1f980}\"}\n\n",
        "id: 7\n\n",
        "data:    \n\n",
        "data: {\"type\":\"control\",\"message_id\":\"m1\",\"status\":\"completed\"}\n\n",
    );

    const LINE_DELIMITED_SAMPLE: &str = concat!(
        "{\"type\":\"token\",\"message_id\":\"m1\",\"delta\":\"\u{e9}t\u{e9}\"}\n",
        "\n",
        "   \r\n",
        "{\"type\":\"citation\",\"message_id\":\"m1\",\"citation\":{\"id\":\"c\"}}\r\n",
        "{\"type\":\"control\",\"message_id\":\"m1\",\"status\":\"completed\"}\n",
    );

    fn decode_in_pieces(framing: Framing, pieces: &[&[u8]]) -> Vec<String> {
        let mut decoder = FrameDecoder::new(framing);
        let mut frames = Vec::new();
        for piece in pieces {
            frames.extend(decoder.push(piece));
        }
        frames.extend(decoder.finish());
        frames
    }

    fn assert_split_invariant(framing: Framing, sample: &str) {
        let bytes = sample.as_bytes();
        let whole = decode_in_pieces(framing, &[bytes]);
        assert!(!whole.is_empty());

        for first in 0..=bytes.len() {
            let split = decode_in_pieces(framing, &[&bytes[..first], &bytes[first..]]);
            assert_eq!(split, whole, "two-way split at byte {first}");

            for second in first..=bytes.len() {
                let split = decode_in_pieces(
                    framing,
                    &[&bytes[..first], &bytes[first..second], &bytes[second..]],
                );
                assert_eq!(split, whole, "three-way split at bytes {first} and {second}");
            }
        }

        let singles = bytes.chunks(1).collect::<Vec<_>>();
        assert_eq!(decode_in_pieces(framing, &singles), whole, "byte-at-a-time");
    }

    #[test]
    fn event_stream_frames_concatenate_data_lines_and_skip_empty_frames() {
        let frames = decode_in_pieces(Framing::EventStream, &[EVENT_STREAM_SAMPLE.as_bytes()]);

        assert_eq!(
            frames,
            vec![
                "{\"type\":\"token\",\"message_id\":\"m1\",\"delta\":\"caf\u{e9} \"}".to_string(),
                "{\"type\":\"token\",\"message_id\":\"m1\",\"delta\":\"\u{65e5}\u{672c}\u{1f980}\"}"
                    .to_string(),
                "{\"type\":\"control\",\"message_id\":\"m1\",\"status\":\"completed\"}".to_string(),
            ]
        );
    }

    #[test]
    fn event_stream_output_does_not_depend_on_chunking() {
        assert_split_invariant(Framing::EventStream, EVENT_STREAM_SAMPLE);
    }

    #[test]
    fn line_delimited_output_does_not_depend_on_chunking() {
        assert_split_invariant(Framing::LineDelimited, LINE_DELIMITED_SAMPLE);
    }

    #[test]
    fn line_delimited_skips_blank_lines() {
        let frames = decode_in_pieces(Framing::LineDelimited, &[LINE_DELIMITED_SAMPLE.as_bytes()]);
        assert_eq!(frames.len(), 3);
        assert!(frames[0].contains("\u{e9}t\u{e9}"));
    }

    #[test]
    fn incomplete_frames_are_retained_until_terminated() {
        let mut decoder = FrameDecoder::new(Framing::EventStream);

        assert!(decoder.push(b"data: {\"x\":").is_empty());
        assert!(decoder.push(b"1}\n").is_empty());
        assert_eq!(decoder.buffered_len(), 0);
        assert!(decoder.push(b"\r").is_empty());
        assert_eq!(decoder.buffered_len(), 1);
        assert_eq!(decoder.push(b"\n"), vec!["{\"x\":1}".to_string()]);
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn finish_returns_unterminated_event_stream_payload() {
        let mut decoder = FrameDecoder::new(Framing::EventStream);
        assert!(decoder.push(b"data: {\"a\":\n").is_empty());
        assert!(decoder.push(b"data: 1}").is_empty());

        assert_eq!(decoder.finish(), Some("{\"a\":1}".to_string()));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn finish_returns_unterminated_line() {
        let mut decoder = FrameDecoder::new(Framing::LineDelimited);
        assert_eq!(decoder.push(b"{\"a\":1}\n{\"b\""), vec!["{\"a\":1}".to_string()]);
        assert_eq!(decoder.finish(), Some("{\"b\"".to_string()));
    }

    #[test]
    fn finish_ignores_trailing_whitespace() {
        let mut decoder = FrameDecoder::new(Framing::LineDelimited);
        assert!(decoder.push(b"  \r\n \t").is_empty());
        assert_eq!(decoder.finish(), None);

        let mut decoder = FrameDecoder::new(Framing::EventStream);
        assert!(decoder.push(b"\n\n : comment").is_empty());
        assert_eq!(decoder.finish(), None);
    }
}
