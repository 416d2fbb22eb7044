use crate::protocol::ChatEvent;

/// Reassembles an arbitrarily-chunked byte stream into newline-delimited
/// records. The server may split one JSON object across several network
/// chunks or batch several objects into one, so bytes are buffered until a
/// newline shows up. Buffering raw bytes (rather than decoding each chunk on
/// arrival) keeps a multi-byte UTF-8 character split across two chunks intact
/// until its line is complete.
#[derive(Debug, Default)]
pub struct LineReassembler {
    buffer: Vec<u8>,
}

impl LineReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns every complete line it unlocked, trimmed,
    /// empty lines skipped. Invalid UTF-8 becomes replacement characters.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(idx) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=idx).collect();
            let line = String::from_utf8_lossy(&raw[..idx]);
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }

    /// Yields whatever is left once the stream has ended. The server does not
    /// guarantee a trailing newline on the last record, so this is the only
    /// place an unterminated final line surfaces.
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&rest);
        let line = line.trim();
        if line.is_empty() {
            None
        } else {
            Some(line.to_string())
        }
    }
}

/// Decodes one mid-stream line. A malformed record is logged and dropped;
/// later records carry the conversation forward, so losing one line is not
/// worth killing the exchange over.
pub fn decode_line(line: &str) -> Option<ChatEvent> {
    match serde_json::from_str(line) {
        Ok(event) => Some(event),
        Err(err) => {
            tracing::warn!(%err, line, "dropping malformed stream record");
            None
        }
    }
}

/// Decodes the leftover buffer from [`LineReassembler::flush`]. Unlike the
/// mid-stream case there is no later line to compensate for lost data, so a
/// parse failure becomes a visible error event.
pub fn decode_final_line(line: &str) -> ChatEvent {
    match serde_json::from_str(line) {
        Ok(event) => event,
        Err(err) => {
            tracing::error!(%err, line, "failed to parse final stream record");
            ChatEvent::Error {
                error: "failed to parse final stream record".to_string(),
            }
        }
    }
}
