use crate::protocol::{ChatEvent, ChatRequest, STREAM_PATH};
use crate::stream::{decode_final_line, decode_line, LineReassembler};
use futures::{Stream, StreamExt};
use reqwest::Client as HttpClient;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

const EVENT_CHANNEL_CAPACITY: usize = 32;

#[derive(Clone)]
pub struct ChatClient {
    base_url: String,
    http: HttpClient,
}

impl ChatClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: normalize_base_url(base_url),
            http: HttpClient::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sends one query to the streaming endpoint and returns the decoded
    /// events as they arrive. The stream is finite and not restartable: it
    /// ends after the server closes the body, or after a single synthesized
    /// `Error` event if the transport fails. Dropping the returned stream
    /// aborts the request.
    pub fn stream_query(&self, query: String) -> EventStream {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let http = self.http.clone();
        let url = format!("{}{}", self.base_url, STREAM_PATH);

        let task = tokio::spawn(async move {
            if let Err(message) = run_exchange(http, url, query, &tx).await {
                tracing::error!(%message, "chat stream failed");
                let _ = tx.send(ChatEvent::Error { error: message }).await;
            }
        });

        EventStream {
            events: ReceiverStream::new(rx),
            task,
        }
    }
}

async fn run_exchange(
    http: HttpClient,
    url: String,
    query: String,
    tx: &mpsc::Sender<ChatEvent>,
) -> Result<(), String> {
    let response = http
        .post(&url)
        .json(&ChatRequest { query })
        .send()
        .await
        .map_err(|err| format!("request failed: {err}"))?;

    if !response.status().is_success() {
        return Err(format!("HTTP error: status {}", response.status()));
    }

    pump_body(response.bytes_stream(), tx).await;
    Ok(())
}

/// Drives the response body through the line reassembler and record decoder,
/// forwarding each event the moment it decodes. Stops early if the consumer
/// has gone away; a mid-body read failure is reported as one error event and
/// ends the exchange.
async fn pump_body<S, B, E>(mut body: S, tx: &mpsc::Sender<ChatEvent>)
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut reassembler = LineReassembler::new();

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                let _ = tx
                    .send(ChatEvent::Error {
                        error: format!("stream read failed: {err}"),
                    })
                    .await;
                return;
            }
        };

        for line in reassembler.push(chunk.as_ref()) {
            if let Some(event) = decode_line(&line) {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        }
    }

    if let Some(line) = reassembler.flush() {
        let _ = tx.send(decode_final_line(&line)).await;
    }
}

/// The event sequence for one exchange. Wraps the channel receiver together
/// with the network task so that abandoning the stream aborts the in-flight
/// request; nothing is delivered past that point.
pub struct EventStream {
    events: ReceiverStream<ChatEvent>,
    task: JoinHandle<()>,
}

impl Stream for EventStream {
    type Item = ChatEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn normalize_base_url(value: &str) -> String {
    value.trim_end_matches('/').to_string()
}
