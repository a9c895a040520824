//! Event dispatch and the fail-soft reply policy.
//!
//! The [`Dispatcher`] turns one inbound event into at most one reply (plus
//! at most one apology). Failures are typed as [`DispatchError`] and mapped
//! to user-facing fallbacks by [`fallback_reply`]; nothing here panics or
//! propagates an error past [`Dispatcher::handle`].
//!
//! Submitted events are queued per conversation key the moment they arrive,
//! and each key's queue is drained by one task. Events for one conversation
//! are therefore handled strictly in arrival order, even when an earlier one
//! spends time downloading content; different conversations run concurrently.

use crate::command::Command;
use crate::identity::resolve_key;
use crate::pipeline::ConversationEngine;
use gemline_config::MessagesConfig;
use gemline_core::channel::{Channel, InboundEvent, InboundMessage};
use gemline_core::error::{ChannelError, ProviderError};
use gemline_core::message::ConversationKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Which pipeline an event was routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Image,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("event carries no reply token")]
    MissingReplyToken,

    #[error("image message carries no content id")]
    MissingContent,

    #[error("content download failed: {0}")]
    Download(#[source] ChannelError),

    #[error("image inference failed: {0}")]
    Inference(#[source] ProviderError),

    #[error("reply delivery failed: {source}")]
    Delivery {
        kind: MessageKind,
        #[source]
        source: ChannelError,
    },
}

/// The apology to send for `err`, if any.
///
/// A missing reply token leaves nothing to reply to.
pub fn fallback_reply(err: &DispatchError, texts: &MessagesConfig) -> Option<String> {
    match err {
        DispatchError::MissingReplyToken => None,
        DispatchError::MissingContent => Some(texts.image_missing.clone()),
        DispatchError::Download(_) | DispatchError::Inference(_) => {
            Some(texts.image_error_apology.clone())
        }
        DispatchError::Delivery {
            kind: MessageKind::Image,
            ..
        } => Some(texts.image_error_apology.clone()),
        DispatchError::Delivery {
            kind: MessageKind::Text,
            ..
        } => Some(texts.error_apology.clone()),
    }
}

/// Arrival queue for one conversation key.
struct Lane {
    id: u64,
    tx: mpsc::UnboundedSender<InboundEvent>,
}

#[derive(Default)]
struct Lanes {
    next_id: u64,
    open: HashMap<ConversationKey, Lane>,
}

/// Routes inbound events through the engine and delivers replies.
pub struct Dispatcher {
    engine: Arc<ConversationEngine>,
    channel: Arc<dyn Channel>,
    lanes: Mutex<Lanes>,
}

impl Dispatcher {
    pub fn new(engine: Arc<ConversationEngine>, channel: Arc<dyn Channel>) -> Self {
        Self {
            engine,
            channel,
            lanes: Mutex::new(Lanes::default()),
        }
    }

    pub fn engine(&self) -> &Arc<ConversationEngine> {
        &self.engine
    }

    /// Handle one event. Failures are logged and answered with at most one
    /// best-effort apology.
    pub async fn handle(&self, event: InboundEvent) {
        let Err(err) = self.process(&event).await else {
            return;
        };
        error!(error = %err, "Event handling failed");

        let (Some(token), Some(apology)) = (
            event.reply_token.as_deref(),
            fallback_reply(&err, self.engine.texts()),
        ) else {
            return;
        };
        if let Err(e) = self.channel.reply(token, &apology).await {
            warn!(error = %e, "Apology delivery failed");
        }
    }

    /// Queue the events of one webhook delivery for background handling.
    ///
    /// Returns without waiting. Each event takes its place in its
    /// conversation's queue immediately, so the order of `submit` calls is
    /// the order in which a conversation sees its events.
    pub fn submit(self: &Arc<Self>, events: Vec<InboundEvent>) {
        let mut lanes = self.lanes.lock().unwrap_or_else(|e| e.into_inner());
        for event in events {
            let key = resolve_key(&event.source);
            let event = match lanes.open.get(&key) {
                Some(lane) => match lane.tx.send(event) {
                    Ok(()) => continue,
                    // The lane's task is gone; open a fresh one.
                    Err(mpsc::error::SendError(event)) => event,
                },
                None => event,
            };

            lanes.next_id += 1;
            let id = lanes.next_id;
            let (tx, rx) = mpsc::unbounded_channel();
            if tx.send(event).is_err() {
                continue;
            }
            debug!(key = %key, lane = id, "Opening conversation lane");
            lanes.open.insert(key.clone(), Lane { id, tx });
            tokio::spawn(Arc::clone(self).drain(key, id, rx));
        }
    }

    /// Handle queued events for one key until its queue runs dry.
    async fn drain(
        self: Arc<Self>,
        key: ConversationKey,
        id: u64,
        mut rx: mpsc::UnboundedReceiver<InboundEvent>,
    ) {
        while let Some(event) = self.next_queued(&key, id, &mut rx) {
            self.handle(event).await;
        }
    }

    /// Next event for the lane, closing the lane when there is none.
    fn next_queued(
        &self,
        key: &ConversationKey,
        id: u64,
        rx: &mut mpsc::UnboundedReceiver<InboundEvent>,
    ) -> Option<InboundEvent> {
        if let Ok(event) = rx.try_recv() {
            return Some(event);
        }
        // Sends happen under this lock, so an empty queue here stays empty.
        let mut lanes = self.lanes.lock().unwrap_or_else(|e| e.into_inner());
        if let Ok(event) = rx.try_recv() {
            return Some(event);
        }
        if lanes.open.get(key).is_some_and(|lane| lane.id == id) {
            lanes.open.remove(key);
        }
        None
    }

    #[cfg(test)]
    fn open_lanes(&self) -> usize {
        self.lanes.lock().unwrap_or_else(|e| e.into_inner()).open.len()
    }

    async fn process(&self, event: &InboundEvent) -> Result<(), DispatchError> {
        let key = resolve_key(&event.source);

        if let InboundMessage::Unsupported { kind } = &event.message {
            debug!(key = %key, kind = %kind, "Ignoring unsupported message");
            return Ok(());
        }
        let token = event
            .reply_token
            .as_deref()
            .ok_or(DispatchError::MissingReplyToken)?;

        match &event.message {
            InboundMessage::Text { text } => {
                let text = text.trim();
                let reply = match Command::parse(text) {
                    Some(command) => self.engine.run_command(&key, command).await,
                    None => self.engine.generate_text_reply(text, &key).await,
                };
                self.deliver(token, &reply, MessageKind::Text).await
            }
            InboundMessage::Image { id } => {
                let id = id
                    .as_deref()
                    .filter(|id| !id.is_empty())
                    .ok_or(DispatchError::MissingContent)?;
                let content = self
                    .channel
                    .fetch_content(id)
                    .await
                    .map_err(DispatchError::Download)?;
                let reply = self
                    .engine
                    .image_reply(&key, content.bytes, &content.mime_type, None)
                    .await
                    .map_err(DispatchError::Inference)?;
                self.deliver(token, &reply, MessageKind::Image).await
            }
            InboundMessage::Unsupported { .. } => Ok(()),
        }
    }

    async fn deliver(
        &self,
        token: &str,
        reply: &str,
        kind: MessageKind,
    ) -> Result<(), DispatchError> {
        let text = if reply.is_empty() {
            self.engine.texts().no_content.as_str()
        } else {
            reply
        };
        self.channel
            .reply(token, text)
            .await
            .map_err(|source| DispatchError::Delivery { kind, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::DownscaleOptions;
    use crate::pipeline::EngineSettings;
    use crate::test_helpers::{CountMode, RecordingChannel, ScriptedBackend};
    use gemline_core::channel::EventSource;
    use gemline_core::message::{Part, Turn};
    use gemline_core::provider::GenerateResult;
    use std::time::Duration;

    fn texts() -> MessagesConfig {
        MessagesConfig::default()
    }

    fn dispatcher(
        backend: ScriptedBackend,
        channel: RecordingChannel,
    ) -> (Arc<ScriptedBackend>, Arc<RecordingChannel>, Dispatcher) {
        let backend = Arc::new(backend);
        let channel = Arc::new(channel);
        let settings = EngineSettings {
            model: "gemini-test".into(),
            system_prompt: "SYS".into(),
            token_budget: 1_000_000,
            media: DownscaleOptions::default(),
            texts: texts(),
        };
        let engine = Arc::new(ConversationEngine::new(backend.clone(), settings));
        let dispatcher = Dispatcher::new(engine, channel.clone());
        (backend, channel, dispatcher)
    }

    #[test]
    fn fallback_policy() {
        let t = texts();
        let delivery = |kind| DispatchError::Delivery {
            kind,
            source: ChannelError::Timeout("30s".into()),
        };
        assert_eq!(fallback_reply(&DispatchError::MissingReplyToken, &t), None);
        assert_eq!(
            fallback_reply(&DispatchError::MissingContent, &t),
            Some(t.image_missing.clone())
        );
        assert_eq!(
            fallback_reply(
                &DispatchError::Download(ChannelError::Timeout("30s".into())),
                &t
            ),
            Some(t.image_error_apology.clone())
        );
        assert_eq!(
            fallback_reply(&delivery(MessageKind::Text), &t),
            Some(t.error_apology.clone())
        );
        assert_eq!(
            fallback_reply(&delivery(MessageKind::Image), &t),
            Some(t.image_error_apology.clone())
        );
    }

    #[tokio::test]
    async fn text_event_is_answered() {
        let (_, channel, d) = dispatcher(
            ScriptedBackend::new(CountMode::Chars)
                .with_responses(vec![Ok(GenerateResult::PlainText("Hi there!".into()))]),
            RecordingChannel::new(),
        );
        d.handle(InboundEvent::text(EventSource::user("U1"), "tok-1", "  Hello  "))
            .await;

        assert_eq!(channel.replies(), vec![("tok-1".into(), "Hi there!".into())]);
        let turns = d
            .engine()
            .histories()
            .snapshot(&ConversationKey::user("U1"))
            .await;
        assert_eq!(turns[0], Turn::user_text("Hello"));
    }

    #[tokio::test]
    async fn empty_generation_sends_placeholder() {
        let (_, channel, d) = dispatcher(
            ScriptedBackend::new(CountMode::Chars)
                .with_responses(vec![Ok(GenerateResult::Candidates(vec![]))]),
            RecordingChannel::new(),
        );
        d.handle(InboundEvent::text(EventSource::user("U1"), "tok", "Hello"))
            .await;
        assert_eq!(channel.replies()[0].1, texts().no_content);
    }

    #[tokio::test]
    async fn commands_bypass_inference() {
        let (backend, channel, d) =
            dispatcher(ScriptedBackend::new(CountMode::Chars), RecordingChannel::new());
        let source = EventSource::group("G1");

        d.handle(InboundEvent::text(source.clone(), "t1", "/sp You are a pirate."))
            .await;
        d.handle(InboundEvent::text(source.clone(), "t2", "/SP?"))
            .await;
        d.handle(InboundEvent::text(source, "t3", "/ch")).await;

        let replies = channel.replies();
        assert_eq!(
            replies[0].1,
            format!("{}\nYou are a pirate.", texts().prompt_updated)
        );
        assert_eq!(
            replies[1].1,
            format!("{}\nYou are a pirate.", texts().prompt_current)
        );
        assert_eq!(replies[2].1, texts().history_cleared);
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn image_event_round_trip() {
        let jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0, 9, 9];
        let (backend, channel, d) = dispatcher(
            ScriptedBackend::new(CountMode::Chars)
                .with_responses(vec![Ok(GenerateResult::PlainText("A cat.".into()))]),
            RecordingChannel::new().with_content("m-1", jpeg.clone(), "image/jpeg"),
        );
        d.handle(InboundEvent::image(EventSource::user("U1"), "tok", "m-1"))
            .await;

        assert_eq!(channel.replies(), vec![("tok".into(), "A cat.".into())]);
        assert_eq!(backend.requests().len(), 1);
    }

    #[tokio::test]
    async fn download_failure_apologizes_without_recording() {
        let (backend, channel, d) =
            dispatcher(ScriptedBackend::new(CountMode::Chars), RecordingChannel::new());
        d.handle(InboundEvent::image(EventSource::user("U1"), "tok", "missing"))
            .await;

        assert_eq!(
            channel.replies(),
            vec![("tok".into(), texts().image_error_apology)]
        );
        assert!(backend.requests().is_empty());
        assert!(
            d.engine()
                .histories()
                .snapshot(&ConversationKey::user("U1"))
                .await
                .is_empty()
        );
    }

    #[tokio::test]
    async fn image_without_id_reports_missing_content() {
        let (_, channel, d) =
            dispatcher(ScriptedBackend::new(CountMode::Chars), RecordingChannel::new());
        let event = InboundEvent {
            source: EventSource::user("U1"),
            reply_token: Some("tok".into()),
            message: InboundMessage::Image { id: None },
        };
        d.handle(event).await;
        assert_eq!(channel.replies()[0].1, texts().image_missing);
    }

    #[tokio::test]
    async fn failed_delivery_gets_one_apology() {
        let (_, channel, d) = dispatcher(
            ScriptedBackend::new(CountMode::Chars),
            RecordingChannel::new().failing_replies(1),
        );
        d.handle(InboundEvent::text(EventSource::user("U1"), "tok", "Hello"))
            .await;
        assert_eq!(channel.replies(), vec![("tok".into(), texts().error_apology)]);
    }

    #[tokio::test]
    async fn failed_apology_is_swallowed() {
        let (_, channel, d) = dispatcher(
            ScriptedBackend::new(CountMode::Chars),
            RecordingChannel::new().failing_replies(2),
        );
        d.handle(InboundEvent::text(EventSource::user("U1"), "tok", "Hello"))
            .await;
        assert!(channel.replies().is_empty());
    }

    #[tokio::test]
    async fn unsupported_and_tokenless_events_are_dropped() {
        let (backend, channel, d) =
            dispatcher(ScriptedBackend::new(CountMode::Chars), RecordingChannel::new());
        let d = Arc::new(d);
        d.submit(vec![
            InboundEvent {
                source: EventSource::user("U1"),
                reply_token: Some("tok".into()),
                message: InboundMessage::Unsupported {
                    kind: "sticker".into(),
                },
            },
            InboundEvent {
                source: EventSource::user("U1"),
                reply_token: None,
                message: InboundMessage::Text {
                    text: "Hello".into(),
                },
            },
        ]);
        for _ in 0..100 {
            if d.open_lanes() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(d.open_lanes(), 0);
        assert!(channel.replies().is_empty());
        assert!(backend.requests().is_empty());
    }

    async fn wait_for_replies(channel: &RecordingChannel, n: usize) -> Vec<(String, String)> {
        for _ in 0..200 {
            let replies = channel.replies();
            if replies.len() >= n {
                return replies;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {n} replies, got {:?}", channel.replies());
    }

    #[tokio::test]
    async fn slow_image_keeps_its_place_ahead_of_later_text() {
        let jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2];
        let (_, channel, d) = dispatcher(
            ScriptedBackend::new(CountMode::Chars),
            RecordingChannel::new()
                .with_content("img", jpeg, "image/jpeg")
                .with_fetch_delay(Duration::from_millis(50)),
        );
        let d = Arc::new(d);

        d.submit(vec![InboundEvent::image(EventSource::user("U1"), "t1", "img")]);
        tokio::time::sleep(Duration::from_millis(5)).await;
        d.submit(vec![InboundEvent::text(
            EventSource::user("U1"),
            "t2",
            "later text",
        )]);

        let replies = wait_for_replies(&channel, 2).await;
        assert_eq!(replies[0].0, "t1");
        assert_eq!(replies[1], ("t2".into(), "echo: later text".into()));

        let turns = d
            .engine()
            .histories()
            .snapshot(&ConversationKey::user("U1"))
            .await;
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[0].parts[0], Part::text(texts().image_marker));
        assert_eq!(turns[2], Turn::user_text("later text"));
    }

    #[tokio::test]
    async fn separate_conversations_do_not_wait_for_each_other() {
        let jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2];
        let (_, channel, d) = dispatcher(
            ScriptedBackend::new(CountMode::Chars),
            RecordingChannel::new()
                .with_content("img", jpeg, "image/jpeg")
                .with_fetch_delay(Duration::from_millis(200)),
        );
        let d = Arc::new(d);

        d.submit(vec![
            InboundEvent::image(EventSource::user("U1"), "slow", "img"),
            InboundEvent::text(EventSource::user("U2"), "fast", "hi"),
        ]);

        let replies = wait_for_replies(&channel, 1).await;
        assert_eq!(replies[0], ("fast".into(), "echo: hi".into()));
        wait_for_replies(&channel, 2).await;
    }
}
