// `text/event-stream` decoding for the job progress channel.
//
// `SseDecoder` is a push parser: feed it raw body chunks as they arrive
// and it hands back the `data` payload of every event completed by that
// chunk. `progress_events` wraps a byte stream (the streaming body of a
// `reqwest` response, or any test double) into a stream of parsed
// `ProgressEvent`s.
//
// A stream that ends, or fails, before the server sent a terminal event
// yields one final `Err` so the job client can report the lost connection.

use crate::backend::ProgressStream;
use crate::error::ClientError;
use crate::model::ProgressEvent;
use futures::stream::{self, Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;
use tracing::{debug, warn};

/// Incremental decoder for the server-sent events wire format.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume `chunk` and return the payloads of all events it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
                None => (&*line, ""),
            };
            if field == "data" {
                self.data.push(value.to_string());
            }
        }

        events
    }
}

struct State<S> {
    inner: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    finished: bool,
}

/// Turn a streaming response body into a stream of progress events.
///
/// Payloads that are not valid JSON are logged and skipped.
pub fn progress_events<S, B, E>(body: S) -> ProgressStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ClientError> + Send + 'static,
{
    let state = State {
        inner: Box::pin(body),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    let events = stream::unfold(state, |mut st| async move {
        loop {
            if let Some(payload) = st.pending.pop_front() {
                match serde_json::from_str::<ProgressEvent>(&payload) {
                    Ok(event) => return Some((Ok(event), st)),
                    Err(e) => {
                        warn!("Skipping malformed progress payload {:?}: {}", payload, e);
                        continue;
                    }
                }
            }
            if st.finished {
                return None;
            }
            match st.inner.next().await {
                Some(Ok(chunk)) => {
                    let decoded = st.decoder.push(chunk.as_ref());
                    st.pending.extend(decoded);
                }
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(e.into()), st));
                }
                None => {
                    debug!("Progress stream reached end of body");
                    st.finished = true;
                    return Some((Err(ClientError::StreamClosed), st));
                }
            }
        }
    });

    Box::pin(events)
}
