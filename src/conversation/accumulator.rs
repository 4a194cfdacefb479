use futures::{ Stream, StreamExt };
use log::{ debug, info };

use super::{ CancelFlag, SharedContext, TurnEvent, TurnEventSender, TurnState };
use crate::error::ChatResult;
use crate::llm::chat::ResponseFragment;
use crate::models::chat::GroundingSource;

#[derive(Debug, Clone, PartialEq)]
pub struct AccumulatedResponse {
    pub content: String,
    pub grounding_sources: Vec<GroundingSource>,
    pub fragments: usize,
    pub cancelled: bool,
}

impl AccumulatedResponse {
    /// A turn cancelled before any fragment could be read.
    pub(crate) fn interrupted() -> Self {
        Self {
            content: String::new(),
            grounding_sources: Vec::new(),
            fragments: 0,
            cancelled: true,
        }
    }
}

/// Folds the fragments of one turn into its placeholder message. Single use:
/// every turn gets a fresh accumulator.
pub struct StreamAccumulator {
    message_id: String,
    cancel: CancelFlag,
    content: String,
    sources: Vec<GroundingSource>,
    fragments: usize,
}

impl StreamAccumulator {
    pub fn new(message_id: impl Into<String>, cancel: CancelFlag) -> Self {
        Self {
            message_id: message_id.into(),
            cancel,
            content: String::new(),
            sources: Vec::new(),
            fragments: 0,
        }
    }

    fn absorb(&mut self, fragment: ResponseFragment) {
        if let Some(text) = fragment.text {
            self.content.push_str(&text);
        }
        for citation in fragment.citations {
            // First title seen for a URI wins.
            if !self.sources.iter().any(|s| s.uri == citation.uri) {
                self.sources.push(citation);
            }
        }
        self.fragments += 1;
    }

    /// Consumes `stream` in delivery order until it ends, fails, or the
    /// cancel flag is observed. The flag is checked before each item is
    /// applied, error items included, and also wakes a read that is waiting
    /// on a stalled stream. Once set, nothing more is read.
    pub async fn consume<S>(
        mut self,
        mut stream: S,
        ctx: &SharedContext,
        events: &TurnEventSender
    ) -> ChatResult<AccumulatedResponse>
        where S: Stream<Item = ChatResult<ResponseFragment>> + Unpin
    {
        let mut cancelled = false;
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                item = stream.next() => Some(item),
            };
            let Some(next) = next else {
                cancelled = true;
                break;
            };
            let Some(item) = next else {
                break;
            };
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let fragment = item?;

            let mut guard = ctx.lock().await;
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            self.absorb(fragment);
            if guard.state() == TurnState::AwaitingFirstFragment {
                guard.transition(TurnState::Streaming);
            }
            if let Some(message) = guard.message_mut(&self.message_id) {
                message.content = self.content.clone();
                message.grounding_sources = self.sources.clone();
            }
            drop(guard);

            let _ = events.send(TurnEvent::MessageUpdated {
                message_id: self.message_id.clone(),
                content: self.content.clone(),
                grounding_sources: self.sources.clone(),
            });
        }

        if cancelled {
            info!(
                "Stream for message {} cancelled after {} fragments",
                self.message_id,
                self.fragments
            );
        } else {
            debug!("Stream for message {} completed after {} fragments", self.message_id, self.fragments);
        }

        Ok(AccumulatedResponse {
            content: self.content,
            grounding_sources: self.sources,
            fragments: self.fragments,
            cancelled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::ConversationContext;
    use crate::error::ChatError;
    use crate::llm::ModelId;
    use crate::models::chat::Message;
    use futures::stream;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn text(t: &str) -> ChatResult<ResponseFragment> {
        Ok(ResponseFragment { text: Some(t.to_string()), citations: Vec::new() })
    }

    fn cited(title: &str, uri: &str) -> ChatResult<ResponseFragment> {
        Ok(ResponseFragment {
            text: None,
            citations: vec![GroundingSource { title: title.into(), uri: uri.into() }],
        })
    }

    async fn setup() -> (SharedContext, String, CancelFlag) {
        let mut ctx = ConversationContext::new("hi", ModelId::Flash);
        let cancel = ctx.begin_turn();
        ctx.transition(TurnState::AwaitingFirstFragment);
        let placeholder = Message::placeholder(ModelId::Flash);
        let id = placeholder.id.clone();
        ctx.push_message(placeholder);
        (ctx.shared(), id, cancel)
    }

    #[tokio::test]
    async fn concatenates_deltas_without_separators() {
        let (ctx, id, cancel) = setup().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let fragments = stream::iter(vec![text("Hel"), text("lo")]);

        let result = StreamAccumulator::new(&id, cancel).consume(fragments, &ctx, &tx).await.unwrap();
        assert_eq!(result.content, "Hello");
        assert!(!result.cancelled);
        assert_eq!(result.fragments, 2);

        let guard = ctx.lock().await;
        assert_eq!(guard.messages()[1].content, "Hello");
        assert_eq!(guard.state(), TurnState::Streaming);
        drop(guard);

        let mut updates = Vec::new();
        while let Ok(event) = rx.try_recv() {
            updates.push(event);
        }
        assert_eq!(updates.len(), 2);
        assert!(matches!(&updates[1], TurnEvent::MessageUpdated { content, .. } if content == "Hello"));
    }

    #[tokio::test]
    async fn sources_are_deduplicated_by_uri_first_title_wins() {
        let (ctx, id, cancel) = setup().await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let fragments = stream::iter(vec![
            cited("First", "https://a.example"),
            cited("Other", "https://b.example"),
            cited("Second", "https://a.example")
        ]);

        let result = StreamAccumulator::new(&id, cancel).consume(fragments, &ctx, &tx).await.unwrap();
        assert_eq!(result.grounding_sources, vec![
            GroundingSource { title: "First".into(), uri: "https://a.example".into() },
            GroundingSource { title: "Other".into(), uri: "https://b.example".into() }
        ]);
        assert_eq!(ctx.lock().await.messages()[1].grounding_sources, result.grounding_sources);
    }

    #[tokio::test]
    async fn stops_at_cancellation_with_a_prefix() {
        let (ctx, id, cancel) = setup().await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let flag = cancel.clone();
        let mut delivered = 0;
        let fragments = stream::iter(vec!["a", "b", "c", "d"]).map(move |t| {
            delivered += 1;
            if delivered == 3 {
                flag.cancel();
            }
            text(t)
        });

        let result = StreamAccumulator::new(&id, cancel)
            .consume(Box::pin(fragments), &ctx, &tx).await
            .unwrap();
        assert!(result.cancelled);
        assert_eq!(result.content, "ab");
        assert!("abcd".starts_with(&result.content));
        assert_eq!(ctx.lock().await.messages()[1].content, "ab");
    }

    #[tokio::test]
    async fn pre_cancelled_turn_reads_nothing() {
        let (ctx, id, cancel) = setup().await;
        cancel.cancel();
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = StreamAccumulator::new(&id, cancel)
            .consume(stream::iter(vec![text("x")]), &ctx, &tx).await
            .unwrap();
        assert!(result.cancelled);
        assert_eq!(result.fragments, 0);
        assert!(result.content.is_empty());
    }

    #[tokio::test]
    async fn error_after_cancellation_is_not_a_failure() {
        let (ctx, id, cancel) = setup().await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let flag = cancel.clone();
        let fragments = stream::iter(vec![
            text("partial"),
            Err(ChatError::RemoteService("connection reset".into()))
        ]).map(move |item| {
            if item.is_err() {
                flag.cancel();
            }
            item
        });

        let result = StreamAccumulator::new(&id, cancel)
            .consume(Box::pin(fragments), &ctx, &tx).await
            .unwrap();
        assert!(result.cancelled);
        assert_eq!(result.content, "partial");
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_stalled_stream() {
        let (ctx, id, cancel) = setup().await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let fragments = stream::iter(vec![text("a")]).chain(stream::pending());

        let flag = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag.cancel();
        });

        let result = tokio::time
            ::timeout(
                Duration::from_secs(2),
                StreamAccumulator::new(&id, cancel).consume(Box::pin(fragments), &ctx, &tx)
            ).await
            .expect("accumulator stayed blocked on the stream")
            .unwrap();
        assert!(result.cancelled);
        assert_eq!(result.content, "a");
    }

    #[tokio::test]
    async fn stream_errors_propagate() {
        let (ctx, id, cancel) = setup().await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let fragments = stream::iter(vec![
            text("partial"),
            Err(ChatError::RemoteService("connection reset".into()))
        ]);
        let err = StreamAccumulator::new(&id, cancel).consume(fragments, &ctx, &tx).await.unwrap_err();
        assert!(matches!(err, ChatError::RemoteService(_)));
        assert_eq!(ctx.lock().await.messages()[1].content, "partial");
    }
}
