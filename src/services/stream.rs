use futures::StreamExt;

use crate::api::{ApiError, ByteStream};
use crate::models::ChatHistoryEntry;

/// Incremental UTF-8 decoder. A character split across chunks is held back
/// until its remaining bytes arrive.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    out.push_str(s);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid_up_to]));
                    match e.error_len() {
                        // Invalid sequence: replace it and keep going.
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid_up_to + bad);
                        }
                        // Incomplete tail: wait for more bytes.
                        None => {
                            self.pending.drain(..valid_up_to);
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    /// Flush whatever is left once the stream has ended.
    pub fn finish(self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.pending).into_owned())
        }
    }
}

/// How a stream consumption ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOutcome {
    pub text: String,
    /// `false` when the callback asked to stop before the stream ended.
    pub completed: bool,
}

/// Read `stream` to exhaustion, calling `on_text` with each decoded piece.
///
/// `on_text` returns `false` to stop early; the rest of the body is dropped.
pub async fn consume_stream<F>(mut stream: ByteStream, mut on_text: F) -> Result<StreamOutcome, ApiError>
where
    F: FnMut(&str) -> bool,
{
    let mut decoder = Utf8Decoder::new();
    let mut text = String::new();

    while let Some(chunk) = stream.next().await {
        let bytes = match chunk {
            Ok(b) => b,
            Err(ApiError::StreamRead(e)) => return Err(ApiError::StreamRead(e)),
            Err(e) => return Err(ApiError::StreamRead(e.to_string())),
        };

        let decoded = decoder.push(&bytes);
        if decoded.is_empty() {
            continue;
        }
        text.push_str(&decoded);
        if !on_text(&decoded) {
            return Ok(StreamOutcome {
                text,
                completed: false,
            });
        }
    }

    if let Some(rest) = decoder.finish() {
        text.push_str(&rest);
        on_text(&rest);
    }

    Ok(StreamOutcome {
        text,
        completed: true,
    })
}

/// Append streamed text to the AI output of the last history entry.
pub fn append_to_last_entry(history: &mut Vec<ChatHistoryEntry>, text: &str) {
    match history.last_mut() {
        Some(entry) => entry
            .ai_output
            .get_or_insert_with(String::new)
            .push_str(text),
        None => history.push(ChatHistoryEntry::ai(text)),
    }
}
