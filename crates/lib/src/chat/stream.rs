//! Chat stream: a cancellable, lazily pulled sequence of chat events over one SSE response.
//!
//! Dropping or closing the stream releases the connection. After a terminal event
//! (`Final` or `Error`) the stream is closed and yields nothing further.

use super::sse::{parse_event, SseDecoder};
use super::types::Source;
use crate::error::ApiError;
use futures_util::{Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;

/// One event of a chat stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Text to append to the in-progress assistant message.
    Content(String),
    /// Seals the message with its citations; `title` is set when the backend generated one.
    Final {
        sources: Vec<Source>,
        title: Option<String>,
    },
    /// The stream broke; the message stays unsealed.
    Error(String),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Content(_))
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, ApiError>> + Send>>;

pub struct ChatStream {
    inner: Option<ByteStream>,
    decoder: SseDecoder,
    pending: VecDeque<StreamEvent>,
    closed: bool,
}

impl ChatStream {
    /// Wrap an open `text/event-stream` response.
    pub fn from_response(res: reqwest::Response) -> Self {
        Self::from_byte_stream(res.bytes_stream().map(|chunk| {
            chunk
                .map(|b| b.to_vec())
                .map_err(|e| ApiError::Stream(e.to_string()))
        }))
    }

    /// Wrap any byte stream carrying SSE frames.
    pub fn from_byte_stream<S>(bytes: S) -> Self
    where
        S: Stream<Item = Result<Vec<u8>, ApiError>> + Send + 'static,
    {
        Self {
            inner: Some(Box::pin(bytes)),
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            closed: false,
        }
    }

    /// Stream that replays already-decoded events (for canned backends).
    pub fn from_events(events: impl IntoIterator<Item = StreamEvent>) -> Self {
        Self {
            inner: None,
            decoder: SseDecoder::new(),
            pending: events.into_iter().collect(),
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Release the connection and discard buffered events. Safe to call repeatedly.
    pub fn close(&mut self) {
        if !self.closed {
            log::debug!("closing chat stream");
        }
        self.closed = true;
        self.inner = None;
        self.pending.clear();
    }

    /// Next event in delivery order, or `None` once the stream is closed.
    /// A body that ends without a `final` event yields a single `Error`.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        loop {
            if self.closed {
                return None;
            }
            if let Some(ev) = self.pending.pop_front() {
                if ev.is_terminal() {
                    self.close();
                }
                return Some(ev);
            }
            let Some(inner) = self.inner.as_mut() else {
                self.close();
                return Some(StreamEvent::Error(
                    "stream ended before final event".to_string(),
                ));
            };
            match inner.next().await {
                Some(Ok(chunk)) => {
                    let events = self.decoder.push(&chunk);
                    self.pending.extend(events.iter().filter_map(parse_event));
                }
                Some(Err(e)) => {
                    self.close();
                    return Some(StreamEvent::Error(e.to_string()));
                }
                None => {
                    self.inner = None;
                    if let Some(frame) = self.decoder.finish() {
                        self.pending.extend(parse_event(&frame));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn chunks(parts: &[&str]) -> ChatStream {
        let items: Vec<Result<Vec<u8>, ApiError>> =
            parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        ChatStream::from_byte_stream(stream::iter(items))
    }

    #[tokio::test]
    async fn yields_content_then_final_then_nothing() {
        let mut s = chunks(&[
            "data: {\"type\":\"content\",\"content\":\"The \"}\n\n",
            "data: {\"type\":\"content\",\"content\":\"protocol is...\"}\n\n",
            "data: {\"type\":\"final\",\"sources\":[]}\n\n",
            "data: {\"type\":\"content\",\"content\":\"late\"}\n\n",
        ]);
        assert_eq!(s.next_event().await, Some(StreamEvent::Content("The ".into())));
        assert_eq!(
            s.next_event().await,
            Some(StreamEvent::Content("protocol is...".into()))
        );
        assert!(matches!(s.next_event().await, Some(StreamEvent::Final { .. })));
        assert!(s.is_closed());
        assert_eq!(s.next_event().await, None);
    }

    #[tokio::test]
    async fn truncated_body_reports_error_once() {
        let mut s = chunks(&["data: {\"type\":\"content\",\"content\":\"partial\"}\n\n"]);
        assert_eq!(s.next_event().await, Some(StreamEvent::Content("partial".into())));
        assert!(matches!(s.next_event().await, Some(StreamEvent::Error(_))));
        assert_eq!(s.next_event().await, None);
    }

    #[tokio::test]
    async fn transport_error_terminates() {
        let items: Vec<Result<Vec<u8>, ApiError>> = vec![
            Ok(b"data: {\"type\":\"content\",\"content\":\"a\"}\n\n".to_vec()),
            Err(ApiError::Stream("connection reset".into())),
        ];
        let mut s = ChatStream::from_byte_stream(stream::iter(items));
        assert_eq!(s.next_event().await, Some(StreamEvent::Content("a".into())));
        match s.next_event().await {
            Some(StreamEvent::Error(reason)) => assert!(reason.contains("connection reset")),
            other => panic!("expected error, got {:?}", other),
        }
        assert_eq!(s.next_event().await, None);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_stops_delivery() {
        let mut s = ChatStream::from_events(vec![
            StreamEvent::Content("a".into()),
            StreamEvent::Content("b".into()),
        ]);
        assert_eq!(s.next_event().await, Some(StreamEvent::Content("a".into())));
        s.close();
        s.close();
        assert!(s.is_closed());
        assert_eq!(s.next_event().await, None);
    }
}
