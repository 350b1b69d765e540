//! Upstream byte stream → normalized events → client SSE body.

use std::{collections::VecDeque, io};

use assistant_protocol::assistant::StreamEvent;
use axum::{body::Body, response::Response};
use bytes::Bytes;
use futures::{stream::BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use super::{ChunkDecoder, EventStream, Signal, STATUS_THINKING};
use crate::{
    observability::metrics::Metrics,
    routers::{
        error::GatewayError,
        sse::{build_sse_response, send_event, sse_data, LineBuffer, SSE_CHANNEL_SIZE},
    },
};

/// Enforces the event-ordering rules of the client stream: at most one
/// status, and only before the first text; grounding at most once.
#[derive(Debug, Default)]
pub(crate) struct EventNormalizer {
    status_sent: bool,
    text_started: bool,
    grounding_sent: bool,
}

impl EventNormalizer {
    /// Event to open the stream with, if any.
    pub fn start(&mut self, status: Option<&str>) -> Option<StreamEvent> {
        let status = status?;
        self.status_sent = true;
        Some(StreamEvent::status(status))
    }

    pub fn on_signal(&mut self, signal: Signal) -> Option<StreamEvent> {
        match signal {
            Signal::Text(text) if !text.is_empty() => {
                self.text_started = true;
                Some(StreamEvent::text(text))
            }
            Signal::Thinking if !self.status_sent && !self.text_started => {
                self.status_sent = true;
                Some(StreamEvent::status(STATUS_THINKING))
            }
            Signal::Grounding(metadata) if !self.grounding_sent => {
                self.grounding_sent = true;
                Some(StreamEvent::grounding(metadata))
            }
            _ => None,
        }
    }
}

struct DecodeState<D> {
    bytes: BoxStream<'static, reqwest::Result<Bytes>>,
    lines: LineBuffer,
    decoder: D,
    normalizer: EventNormalizer,
    pending: VecDeque<StreamEvent>,
    error: Option<GatewayError>,
    finished: bool,
}

impl<D: ChunkDecoder> DecodeState<D> {
    fn handle_lines(&mut self, lines: Vec<String>) {
        for line in lines {
            let Some(data) = sse_data(&line) else {
                continue;
            };
            if data.trim().is_empty() {
                continue;
            }
            match self.decoder.decode(data) {
                Ok(signals) => {
                    for signal in signals {
                        if signal == Signal::Done {
                            self.finished = true;
                            return;
                        }
                        if let Some(event) = self.normalizer.on_signal(signal) {
                            self.pending.push_back(event);
                        }
                    }
                }
                Err(e) => {
                    self.fail(e);
                    return;
                }
            }
        }
    }

    fn fail(&mut self, error: GatewayError) {
        self.error = Some(error);
        self.finished = true;
    }
}

/// Decode an upstream SSE body into normalized events.
///
/// Lines may be split across reads at any byte. The stream ends at the
/// decoder's `Done` signal, at upstream EOF, or after the first error.
pub(crate) fn decode_upstream<D: ChunkDecoder>(
    response: reqwest::Response,
    decoder: D,
    status: Option<&'static str>,
) -> EventStream {
    let mut normalizer = EventNormalizer::default();
    let pending: VecDeque<StreamEvent> = normalizer.start(status).into_iter().collect();

    let state = DecodeState {
        bytes: response.bytes_stream().boxed(),
        lines: LineBuffer::new(),
        decoder,
        normalizer,
        pending,
        error: None,
        finished: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(event) = st.pending.pop_front() {
                return Some((Ok(event), st));
            }
            if let Some(error) = st.error.take() {
                return Some((Err(error), st));
            }
            if st.finished {
                return None;
            }

            match st.bytes.next().await {
                Some(Ok(chunk)) => match st.lines.push(&chunk) {
                    Ok(lines) => st.handle_lines(lines),
                    Err(e) => st.fail(e),
                },
                Some(Err(e)) => {
                    st.fail(GatewayError::upstream(format!(
                        "Upstream stream interrupted: {e}"
                    )));
                }
                None => {
                    let tail: Vec<String> = st.lines.finish().into_iter().collect();
                    st.handle_lines(tail);
                    st.finished = true;
                }
            }
        }
    })
    .boxed()
}

/// Pump normalized events into an SSE response.
///
/// The pump stops as soon as the client goes away, which drops the upstream
/// connection with it. An upstream error after the stream started aborts
/// the body; nothing is replayed.
pub(crate) fn relay(mut events: EventStream, model: String) -> Response {
    let (tx, rx) = mpsc::channel::<Result<Bytes, io::Error>>(SSE_CHANNEL_SIZE);

    tokio::spawn(async move {
        let mut count = 0usize;
        while let Some(item) = events.next().await {
            match item {
                Ok(event) => {
                    Metrics::record_stream_event(event.kind());
                    if !send_event(&tx, &event).await {
                        debug!(model = %model, "Client disconnected, stopping stream");
                        return;
                    }
                    count += 1;
                }
                Err(e) => {
                    warn!(model = %model, error = %e, events = count, "Stream terminated by upstream error");
                    Metrics::record_stream_error(e.category());
                    let _ = tx.send(Err(io::Error::other(e.to_string()))).await;
                    return;
                }
            }
        }
        debug!(model = %model, events = count, "Stream completed");
    });

    build_sse_response(Body::from_stream(ReceiverStream::new(rx)))
}
