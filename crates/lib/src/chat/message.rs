//! A message in the active thread plus its seal state.

use super::stream::StreamEvent;
use super::types::{ChatMessage, Role};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyState {
    /// Receiving content; not yet final.
    Streaming,
    /// Complete. User turns and loaded history are always sealed.
    Sealed,
    /// The stream broke or was abandoned; partial content stays visible but is never sealed.
    Failed(String),
}

/// What applying an event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Applied {
    Appended,
    Sealed { title: Option<String> },
    Failed(String),
    Ignored,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThreadEntry {
    pub message: ChatMessage,
    pub state: ReplyState,
}

impl ThreadEntry {
    pub fn sealed(message: ChatMessage) -> Self {
        Self {
            message,
            state: ReplyState::Sealed,
        }
    }

    /// Empty assistant message awaiting stream content.
    pub fn streaming() -> Self {
        Self {
            message: ChatMessage::assistant(String::new()),
            state: ReplyState::Streaming,
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.state == ReplyState::Sealed
    }

    /// Copy/share affordances are only offered for sealed messages.
    pub fn is_shareable(&self) -> bool {
        self.is_sealed()
    }

    pub fn is_assistant(&self) -> bool {
        self.message.role == Role::Assistant
    }

    /// Apply a stream event. Only a streaming entry changes; anything after the terminal
    /// event (including a second `final`) is ignored.
    pub(crate) fn apply(&mut self, event: StreamEvent) -> Applied {
        if self.state != ReplyState::Streaming {
            return Applied::Ignored;
        }
        match event {
            StreamEvent::Content(text) => {
                self.message.content.push_str(&text);
                Applied::Appended
            }
            StreamEvent::Final { sources, title } => {
                self.message.sources = Some(sources);
                self.state = ReplyState::Sealed;
                Applied::Sealed { title }
            }
            StreamEvent::Error(reason) => {
                self.state = ReplyState::Failed(reason.clone());
                Applied::Failed(reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::types::Source;

    fn source(id: &str) -> Source {
        Source {
            id: id.into(),
            file_name: format!("{}.pdf", id),
            context: String::new(),
            storage_url: None,
            file_type: None,
        }
    }

    #[test]
    fn content_concatenates_in_delivery_order() {
        let mut e = ThreadEntry::streaming();
        for part in ["The ", "protocol ", "is..."] {
            assert_eq!(e.apply(StreamEvent::Content(part.into())), Applied::Appended);
        }
        assert!(!e.is_shareable());
        e.apply(StreamEvent::Final {
            sources: vec![source("d1")],
            title: None,
        });
        assert_eq!(e.message.content, "The protocol is...");
        assert!(e.is_shareable());
    }

    #[test]
    fn second_final_is_a_no_op() {
        let mut e = ThreadEntry::streaming();
        e.apply(StreamEvent::Content("x".into()));
        assert!(matches!(
            e.apply(StreamEvent::Final {
                sources: vec![source("d1")],
                title: Some("T".into())
            }),
            Applied::Sealed { .. }
        ));
        assert_eq!(
            e.apply(StreamEvent::Final {
                sources: vec![source("d2")],
                title: None
            }),
            Applied::Ignored
        );
        assert_eq!(e.message.sources, Some(vec![source("d1")]));
        assert_eq!(e.apply(StreamEvent::Content("more".into())), Applied::Ignored);
        assert_eq!(e.message.content, "x");
    }

    #[test]
    fn error_leaves_partial_unsealed() {
        let mut e = ThreadEntry::streaming();
        e.apply(StreamEvent::Content("half".into()));
        e.apply(StreamEvent::Error("boom".into()));
        assert_eq!(e.state, ReplyState::Failed("boom".into()));
        assert_eq!(e.message.content, "half");
        assert!(e.message.sources.is_none());
        assert!(!e.is_shareable());
        assert_eq!(
            e.apply(StreamEvent::Final {
                sources: vec![],
                title: None
            }),
            Applied::Ignored
        );
    }
}
