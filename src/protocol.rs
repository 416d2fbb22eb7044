use serde::{Deserialize, Serialize};

pub const STREAM_PATH: &str = "/api/chat_stream";

#[derive(Debug, Serialize)]
pub struct ChatRequest {
    pub query: String,
}

/// A citation into the retrieved content backing an answer. Wire field names
/// come from the backend; `origin` is the document id, `excerpt` a short
/// preview of the matched chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    #[serde(rename = "source")]
    pub origin: String,
    #[serde(rename = "content_preview")]
    pub excerpt: String,
}

/// One decoded record from the `/api/chat_stream` body. The server emits one
/// JSON object per line, discriminated by `type`:
///
/// ```json
/// {"type": "sources", "data": [{"source": "...", "content_preview": "..."}]}
/// {"type": "chunk",   "data": "token fragment"}
/// {"type": "done",    "data": "full answer, informational"}
/// {"type": "error",   "error": "message"}
/// ```
///
/// The stream driver also synthesizes `Error` for transport failures, so a
/// consumer matching on this enum sees every way an exchange can end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChatEvent {
    Sources { data: Vec<Source> },
    Chunk { data: String },
    Done { data: String },
    Error { error: String },
}
