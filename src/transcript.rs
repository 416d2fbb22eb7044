use crate::protocol::{ChatEvent, Source};
use uuid::Uuid;

/// Shown in place of whatever partial text had streamed in when an exchange
/// fails. Partial content is not trustworthy once the server reports an
/// error, so it is overwritten rather than appended to.
pub const STREAM_ERROR_TEXT: &str = "Error: could not get a streamed response.";

/// Stable handle for one transcript slot. Events resolve the assistant
/// message through this rather than a raw index, so a stale or misrouted
/// event cannot mutate the wrong message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(Uuid);

impl MessageId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub sender: Sender,
    pub text: String,
    pub sources: Vec<Source>,
    pub is_loading: bool,
}

/// The conversation shown to the user. Append-only: messages are never
/// reordered or removed, and the only mutable message is the single assistant
/// placeholder of the in-flight exchange. Once that placeholder reaches a
/// terminal state it is immutable too.
#[derive(Debug, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    in_flight: bool,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// True from submit until the first terminal event, stream completion, or
    /// transport failure of the current exchange. Gates resubmission.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Records the user's message and pushes the assistant placeholder the
    /// streamed events will fill in. Returns the placeholder's id.
    pub fn begin_exchange(&mut self, query: &str) -> MessageId {
        self.messages.push(Message {
            id: MessageId::new(),
            sender: Sender::User,
            text: query.to_string(),
            sources: Vec::new(),
            is_loading: false,
        });

        let assistant_id = MessageId::new();
        self.messages.push(Message {
            id: assistant_id,
            sender: Sender::Assistant,
            text: String::new(),
            sources: Vec::new(),
            is_loading: true,
        });
        self.in_flight = true;
        assistant_id
    }

    /// Applies one streamed event to the assistant message identified by
    /// `id`. Events arriving for an unknown id or for a message that already
    /// reached a terminal state are logged and ignored; a terminal event
    /// still clears the in-flight flag so the UI cannot get stuck loading.
    pub fn apply(&mut self, id: MessageId, event: ChatEvent) {
        let Some(idx) = self.assistant_position(id) else {
            tracing::error!(?id, "no assistant message for streamed event");
            if matches!(event, ChatEvent::Done { .. } | ChatEvent::Error { .. }) {
                self.in_flight = false;
            }
            return;
        };

        let message = &mut self.messages[idx];
        if !message.is_loading {
            tracing::debug!(?id, "ignoring event for finished message");
            return;
        }

        match event {
            ChatEvent::Sources { data } => {
                // Wholesale replacement: a later sources record supersedes an
                // earlier one.
                message.sources = data;
            }
            ChatEvent::Chunk { data } => {
                message.text.push_str(&data);
            }
            ChatEvent::Done { .. } => {
                // The accumulated chunks are the authoritative text; the done
                // payload is informational only.
                message.is_loading = false;
                self.in_flight = false;
            }
            ChatEvent::Error { error } => {
                tracing::error!(%error, "exchange failed");
                message.text = STREAM_ERROR_TEXT.to_string();
                message.is_loading = false;
                self.in_flight = false;
            }
        }
    }

    /// Called when the event stream ends. A server that closes the body
    /// without a terminal record still completes the exchange. Streams also
    /// close after delivering a terminal event, and by then a newer exchange
    /// may already be in flight, so the gate is only released when this id's
    /// message was still loading.
    pub fn finish_exchange(&mut self, id: MessageId) {
        let Some(idx) = self.assistant_position(id) else {
            tracing::error!(?id, "no assistant message for closed stream");
            self.in_flight = false;
            return;
        };

        let message = &mut self.messages[idx];
        if message.is_loading {
            message.is_loading = false;
            self.in_flight = false;
        }
    }

    fn assistant_position(&self, id: MessageId) -> Option<usize> {
        self.messages
            .iter()
            .position(|message| message.id == id && message.sender == Sender::Assistant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources(entries: &[(&str, &str)]) -> Vec<Source> {
        entries
            .iter()
            .map(|(origin, excerpt)| Source {
                origin: origin.to_string(),
                excerpt: excerpt.to_string(),
            })
            .collect()
    }

    fn assistant(transcript: &Transcript) -> &Message {
        transcript
            .messages()
            .iter()
            .rev()
            .find(|message| message.sender == Sender::Assistant)
            .expect("assistant message")
    }

    #[test]
    fn begin_exchange_pushes_user_message_and_loading_placeholder() {
        let mut transcript = Transcript::new();
        let id = transcript.begin_exchange("what is a raft log?");

        let messages = transcript.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sender, Sender::User);
        assert_eq!(messages[0].text, "what is a raft log?");
        assert!(!messages[0].is_loading);
        assert_eq!(messages[1].id, id);
        assert_eq!(messages[1].sender, Sender::Assistant);
        assert_eq!(messages[1].text, "");
        assert!(messages[1].is_loading);
        assert!(transcript.is_in_flight());
    }

    #[test]
    fn full_exchange_accumulates_chunks_and_sources() {
        let mut transcript = Transcript::new();
        let id = transcript.begin_exchange("hi");

        transcript.apply(
            id,
            ChatEvent::Sources {
                data: sources(&[("doc1", "hi")]),
            },
        );
        transcript.apply(
            id,
            ChatEvent::Chunk {
                data: "Hello".to_string(),
            },
        );
        transcript.apply(
            id,
            ChatEvent::Chunk {
                data: " world".to_string(),
            },
        );
        transcript.apply(
            id,
            ChatEvent::Done {
                data: String::new(),
            },
        );

        let message = assistant(&transcript);
        assert_eq!(message.text, "Hello world");
        assert_eq!(message.sources, sources(&[("doc1", "hi")]));
        assert!(!message.is_loading);
        assert!(!transcript.is_in_flight());
    }

    #[test]
    fn later_sources_event_replaces_earlier_one() {
        let mut transcript = Transcript::new();
        let id = transcript.begin_exchange("hi");

        transcript.apply(
            id,
            ChatEvent::Sources {
                data: sources(&[("old", "a"), ("older", "b")]),
            },
        );
        transcript.apply(
            id,
            ChatEvent::Sources {
                data: sources(&[("new", "c")]),
            },
        );

        assert_eq!(assistant(&transcript).sources, sources(&[("new", "c")]));
    }

    #[test]
    fn error_event_overwrites_partial_text() {
        let mut transcript = Transcript::new();
        let id = transcript.begin_exchange("hi");

        transcript.apply(
            id,
            ChatEvent::Chunk {
                data: "half an ans".to_string(),
            },
        );
        transcript.apply(
            id,
            ChatEvent::Error {
                error: "HTTP error: status 500 Internal Server Error".to_string(),
            },
        );

        let message = assistant(&transcript);
        assert_eq!(message.text, STREAM_ERROR_TEXT);
        assert!(message.sources.is_empty());
        assert!(!message.is_loading);
        assert!(!transcript.is_in_flight());
    }

    #[test]
    fn stream_end_without_terminal_event_completes_the_exchange() {
        let mut transcript = Transcript::new();
        let id = transcript.begin_exchange("hi");

        transcript.apply(
            id,
            ChatEvent::Chunk {
                data: "answer".to_string(),
            },
        );
        transcript.finish_exchange(id);

        let message = assistant(&transcript);
        assert_eq!(message.text, "answer");
        assert!(!message.is_loading);
        assert!(!transcript.is_in_flight());
    }

    #[test]
    fn events_after_terminal_state_are_ignored() {
        let mut transcript = Transcript::new();
        let id = transcript.begin_exchange("hi");

        transcript.apply(
            id,
            ChatEvent::Done {
                data: String::new(),
            },
        );
        transcript.apply(
            id,
            ChatEvent::Chunk {
                data: "late".to_string(),
            },
        );

        assert_eq!(assistant(&transcript).text, "");
    }

    #[test]
    fn event_for_unknown_id_does_not_corrupt_the_transcript() {
        let mut transcript = Transcript::new();
        let _id = transcript.begin_exchange("hi");
        let before = transcript.messages().to_vec();

        let bogus = MessageId::new();
        transcript.apply(
            bogus,
            ChatEvent::Chunk {
                data: "misrouted".to_string(),
            },
        );
        assert_eq!(transcript.messages(), &before[..]);
        assert!(transcript.is_in_flight());

        // A misrouted terminal event must still release the loading gate.
        transcript.apply(
            bogus,
            ChatEvent::Error {
                error: "boom".to_string(),
            },
        );
        assert_eq!(transcript.messages(), &before[..]);
        assert!(!transcript.is_in_flight());
    }

    #[test]
    fn replaying_the_same_events_yields_the_same_final_message() {
        let events = vec![
            ChatEvent::Sources {
                data: sources(&[("doc1", "hi")]),
            },
            ChatEvent::Chunk {
                data: "Hello".to_string(),
            },
            ChatEvent::Chunk {
                data: " world".to_string(),
            },
            ChatEvent::Done {
                data: "Hello world".to_string(),
            },
        ];

        let run = |events: &[ChatEvent]| {
            let mut transcript = Transcript::new();
            let id = transcript.begin_exchange("hi");
            for event in events {
                transcript.apply(id, event.clone());
            }
            let message = assistant(&transcript);
            (
                message.text.clone(),
                message.sources.clone(),
                message.is_loading,
            )
        };

        assert_eq!(run(&events), run(&events));
    }

    #[test]
    fn stale_stream_close_does_not_release_a_newer_exchange() {
        let mut transcript = Transcript::new();

        let first = transcript.begin_exchange("one");
        transcript.apply(
            first,
            ChatEvent::Done {
                data: String::new(),
            },
        );
        assert!(!transcript.is_in_flight());

        // The first exchange's stream closes only after its terminal event,
        // by which time the next exchange may already be running.
        let second = transcript.begin_exchange("two");
        transcript.finish_exchange(first);
        assert!(transcript.is_in_flight());

        transcript.finish_exchange(second);
        assert!(!transcript.is_in_flight());
    }

    #[test]
    fn in_flight_flag_tracks_each_exchange() {
        let mut transcript = Transcript::new();
        assert!(!transcript.is_in_flight());

        let first = transcript.begin_exchange("one");
        assert!(transcript.is_in_flight());
        transcript.apply(
            first,
            ChatEvent::Done {
                data: String::new(),
            },
        );
        assert!(!transcript.is_in_flight());

        let second = transcript.begin_exchange("two");
        assert!(transcript.is_in_flight());
        transcript.finish_exchange(second);
        assert!(!transcript.is_in_flight());

        assert_eq!(transcript.messages().len(), 4);
    }
}
