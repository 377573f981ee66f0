//! Server-Sent Events framing: bytes in, frames out, frames to chat events.
//!
//! Frames are separated by a blank line. `data:` lines are joined with '\n', `event:` names
//! the frame, comment lines (leading ':') and `id:`/`retry:` fields are ignored.

use super::stream::StreamEvent;
use super::types::Source;
use serde::Deserialize;

/// One decoded SSE frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental decoder; chunk boundaries may fall anywhere, including inside a UTF-8 sequence.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// Last byte seen was '\r', so a following '\n' belongs to the same line break.
    after_cr: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns every frame completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.extend_normalized(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..pos).collect();
            self.buffer.drain(..2);
            if let Some(frame) = parse_block(&String::from_utf8_lossy(&block)) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Append `chunk` with "\r\n" and lone "\r" line endings rewritten to "\n".
    fn extend_normalized(&mut self, chunk: &[u8]) {
        for &b in chunk {
            let after_cr = std::mem::replace(&mut self.after_cr, b == b'\r');
            match b {
                b'\r' => self.buffer.push(b'\n'),
                b'\n' if after_cr => {}
                _ => self.buffer.push(b),
            }
        }
    }

    /// Flush a trailing frame the server did not terminate with a blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        self.after_cr = false;
        let block = std::mem::take(&mut self.buffer);
        parse_block(&String::from_utf8_lossy(&block))
    }
}

fn parse_block(block: &str) -> Option<SseFrame> {
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();
    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "data" => data.push(value),
            "event" => event = Some(value.to_string()),
            _ => {}
        }
    }
    if data.is_empty() && event.is_none() {
        return None;
    }
    Some(SseFrame {
        event,
        data: data.join("\n"),
    })
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WirePayload {
    Content {
        #[serde(default)]
        content: String,
    },
    Final {
        #[serde(default)]
        sources: Vec<Source>,
        #[serde(default)]
        title: Option<String>,
    },
    Error {
        #[serde(default, alias = "detail")]
        message: Option<String>,
    },
}

/// Interpret a frame as a chat event. Keep-alives, `[DONE]` markers and unrecognised payloads
/// yield `None`.
pub fn parse_event(frame: &SseFrame) -> Option<StreamEvent> {
    if frame.event.as_deref() == Some("error") {
        let reason = if frame.data.trim().is_empty() {
            "stream error".to_string()
        } else {
            frame.data.trim().to_string()
        };
        return Some(StreamEvent::Error(reason));
    }
    let data = frame.data.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    match serde_json::from_str::<WirePayload>(data) {
        Ok(WirePayload::Content { content }) => Some(StreamEvent::Content(content)),
        Ok(WirePayload::Final { sources, title }) => Some(StreamEvent::Final {
            sources,
            title: title.filter(|t| !t.trim().is_empty()),
        }),
        Ok(WirePayload::Error { message }) => Some(StreamEvent::Error(
            message.unwrap_or_else(|| "stream error".to_string()),
        )),
        Err(e) => {
            log::debug!("skipping unparseable chat event {:?}: {}", data, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(frames: &[SseFrame]) -> Vec<StreamEvent> {
        frames.iter().filter_map(parse_event).collect()
    }

    #[test]
    fn frames_split_across_chunks() {
        let mut d = SseDecoder::new();
        assert!(d.push(b"data: {\"type\":\"content\",\"con").is_empty());
        let frames = d.push(b"tent\":\"The \"}\n\ndata: {\"type\":\"content\",\"content\":\"protocol\"}\n\n");
        assert_eq!(
            events(&frames),
            vec![
                StreamEvent::Content("The ".into()),
                StreamEvent::Content("protocol".into())
            ]
        );
    }

    #[test]
    fn crlf_and_comments_are_tolerated() {
        let mut d = SseDecoder::new();
        let frames = d.push(b": keep-alive\r\n\r\ndata: {\"type\":\"content\",\"content\":\"x\"}\r\n\r\n");
        assert_eq!(events(&frames), vec![StreamEvent::Content("x".into())]);
    }

    #[test]
    fn lone_cr_ends_lines() {
        let mut d = SseDecoder::new();
        let frames = d.push(b"event: message\rdata: first\rdata: second\r\rdata: third\r\r");
        assert_eq!(
            frames,
            vec![
                SseFrame {
                    event: Some("message".into()),
                    data: "first\nsecond".into()
                },
                SseFrame {
                    event: None,
                    data: "third".into()
                },
            ]
        );
    }

    #[test]
    fn crlf_split_across_chunks_is_one_line_break() {
        let mut d = SseDecoder::new();
        assert!(d.push(b"data: a\r").is_empty());
        assert!(d.push(b"\ndata: b\r").is_empty());
        let frames = d.push(b"\n\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "a\nb");
    }

    #[test]
    fn multibyte_text_split_mid_character() {
        let payload = "data: {\"type\":\"content\",\"content\":\"മെട്രോ\"}\n\n".as_bytes();
        let (a, b) = payload.split_at(40);
        let mut d = SseDecoder::new();
        let mut frames = d.push(a);
        frames.extend(d.push(b));
        assert_eq!(events(&frames), vec![StreamEvent::Content("മെട്രോ".into())]);
    }

    #[test]
    fn final_carries_sources_and_title() {
        let frame = SseFrame {
            event: None,
            data: r#"{"type":"final","title":"Trackside dress code","sources":[{"id":"d1","file_name":"a.pdf","context":"c"}]}"#.into(),
        };
        match parse_event(&frame) {
            Some(StreamEvent::Final { sources, title }) => {
                assert_eq!(sources.len(), 1);
                assert_eq!(sources[0].id, "d1");
                assert_eq!(title.as_deref(), Some("Trackside dress code"));
            }
            other => panic!("expected final, got {:?}", other),
        }
    }

    #[test]
    fn error_event_and_error_payload() {
        let named = SseFrame {
            event: Some("error".into()),
            data: "upstream timeout".into(),
        };
        assert_eq!(parse_event(&named), Some(StreamEvent::Error("upstream timeout".into())));
        let typed = SseFrame {
            event: None,
            data: r#"{"type":"error","detail":"quota"}"#.into(),
        };
        assert_eq!(parse_event(&typed), Some(StreamEvent::Error("quota".into())));
    }

    #[test]
    fn done_marker_and_garbage_are_skipped() {
        let mut d = SseDecoder::new();
        let frames = d.push(b"data: [DONE]\n\ndata: not json\n\nevent: ping\n\n");
        assert_eq!(frames.len(), 3);
        assert!(events(&frames).is_empty());
    }

    #[test]
    fn multi_line_data_is_joined() {
        let mut d = SseDecoder::new();
        let frames = d.push(b"data: {\"type\":\"content\",\ndata: \"content\":\"joined\"}\n\n");
        assert_eq!(events(&frames), vec![StreamEvent::Content("joined".into())]);
    }

    #[test]
    fn finish_flushes_unterminated_frame() {
        let mut d = SseDecoder::new();
        assert!(d.push(b"data: {\"type\":\"final\",\"sources\":[]}").is_empty());
        let frame = d.finish().unwrap();
        assert!(matches!(parse_event(&frame), Some(StreamEvent::Final { .. })));
        assert!(d.finish().is_none());
    }
}
