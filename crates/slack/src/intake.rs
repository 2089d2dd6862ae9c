//! Per-event decisions for an inbound Events API delivery.
//!
//! The intake owns the state machine that sits between a parsed envelope and
//! the reply queue: self-authored events are dropped first, then the event id
//! is presented to the deduplicator, and only admitted events are routed and
//! enqueued. Nothing here waits on Slack.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::dedup::EventDeduplicator;
use crate::dispatch::{DispatchError, ReplyDispatcher, ReplyJob};
use crate::events::{EventContext, EventRecord, EventRouter, HandlerResult, SlackEnvelope};
use crate::web_api::BotIdentity;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IntakeSettings {
    /// Drop every event that carries a `bot_id`, not only our own.
    pub ignore_bot_messages: bool,
    pub reply_in_thread: bool,
}

impl Default for IntakeSettings {
    fn default() -> Self {
        Self { ignore_bot_messages: true, reply_in_thread: true }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IntakeOutcome {
    Challenge(String),
    SelfIgnored,
    Duplicate,
    Dispatched,
    /// Admitted, but the router produced no reply.
    NoReply,
    /// Admitted, but the handler or the reply validation failed.
    DispatchFailed,
    /// The reply queue is shut down. The event id is released so Slack's
    /// retry is admitted by whichever instance receives it.
    QueueClosed,
    Unsupported,
}

impl IntakeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Challenge(_) => "challenge",
            Self::SelfIgnored => "self_ignored",
            Self::Duplicate => "duplicate",
            Self::Dispatched => "dispatched",
            Self::NoReply => "no_reply",
            Self::DispatchFailed => "dispatch_failed",
            Self::QueueClosed => "queue_closed",
            Self::Unsupported => "unsupported",
        }
    }
}

pub struct EventIntake {
    identity: BotIdentity,
    settings: IntakeSettings,
    deduplicator: Arc<EventDeduplicator>,
    router: EventRouter,
    dispatcher: ReplyDispatcher,
}

impl EventIntake {
    pub fn new(
        deduplicator: Arc<EventDeduplicator>,
        router: EventRouter,
        dispatcher: ReplyDispatcher,
    ) -> Self {
        Self {
            identity: BotIdentity::default(),
            settings: IntakeSettings::default(),
            deduplicator,
            router,
            dispatcher,
        }
    }

    pub fn with_identity(mut self, identity: BotIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_settings(mut self, settings: IntakeSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn identity(&self) -> &BotIdentity {
        &self.identity
    }

    pub fn deduplicator(&self) -> &EventDeduplicator {
        &self.deduplicator
    }

    pub fn dispatcher(&self) -> &ReplyDispatcher {
        &self.dispatcher
    }

    pub async fn accept(&self, envelope: SlackEnvelope) -> IntakeOutcome {
        match envelope {
            SlackEnvelope::UrlVerification { challenge } => {
                info!(
                    event_name = "ingress.slack.url_verification",
                    correlation_id = "url_verification",
                    "answering url verification challenge"
                );
                IntakeOutcome::Challenge(challenge)
            }
            SlackEnvelope::Unsupported { event_id, event_type } => {
                debug!(
                    event_name = "ingress.slack.unsupported",
                    correlation_id = event_id.as_deref().unwrap_or("unknown"),
                    event_type = %event_type,
                    "acknowledging unsupported slack event"
                );
                IntakeOutcome::Unsupported
            }
            SlackEnvelope::Event(record) => self.accept_event(record).await,
        }
    }

    async fn accept_event(&self, record: EventRecord) -> IntakeOutcome {
        info!(
            event_name = "ingress.slack.event_received",
            correlation_id = %record.event_id,
            event_type = record.event_type.as_str(),
            channel_id = %record.channel_id,
            sender_id = %record.sender_id,
            "received slack event"
        );

        if self.is_self_authored(&record) {
            debug!(
                event_name = "ingress.slack.self_ignored",
                correlation_id = %record.event_id,
                sender_id = %record.sender_id,
                "ignoring bot-authored event"
            );
            return IntakeOutcome::SelfIgnored;
        }

        if !self.deduplicator.admit(&record.event_id) {
            info!(
                event_name = "ingress.slack.duplicate_dropped",
                correlation_id = %record.event_id,
                "dropping redelivered slack event"
            );
            return IntakeOutcome::Duplicate;
        }

        let context = EventContext { correlation_id: record.event_id.clone() };
        let template = match self.router.route(&record, &context).await {
            Ok(HandlerResult::Responded(template)) => template,
            Ok(HandlerResult::Ignored) => return IntakeOutcome::NoReply,
            Err(error) => {
                warn!(
                    event_name = "ingress.slack.handler_failed",
                    correlation_id = %record.event_id,
                    error = %error,
                    "event handler failed"
                );
                return IntakeOutcome::DispatchFailed;
            }
        };

        let thread_ts = if self.settings.reply_in_thread {
            record.reply_thread_ts().map(str::to_owned)
        } else {
            None
        };
        let job = ReplyJob::new(&record.event_id, &record.channel_id, template, thread_ts);
        match self.dispatcher.dispatch(job) {
            Ok(()) => {
                info!(
                    event_name = "ingress.slack.reply_enqueued",
                    correlation_id = %record.event_id,
                    channel_id = %record.channel_id,
                    "greeting reply enqueued"
                );
                IntakeOutcome::Dispatched
            }
            Err(DispatchError::QueueClosed) => {
                self.deduplicator.release(&record.event_id);
                warn!(
                    event_name = "ingress.slack.reply_queue_closed",
                    correlation_id = %record.event_id,
                    "reply queue is closed; releasing event id for redelivery"
                );
                IntakeOutcome::QueueClosed
            }
            Err(error) => {
                warn!(
                    event_name = "ingress.slack.reply_enqueue_failed",
                    correlation_id = %record.event_id,
                    error = %error,
                    "could not enqueue greeting reply"
                );
                IntakeOutcome::DispatchFailed
            }
        }
    }

    fn is_self_authored(&self, record: &EventRecord) -> bool {
        if self.identity.user_id.as_deref() == Some(record.sender_id.as_str()) {
            return true;
        }
        match record.bot_id.as_deref() {
            Some(bot_id) => {
                self.settings.ignore_bot_messages || self.identity.bot_id.as_deref() == Some(bot_id)
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::{Mutex, Notify};

    use super::{EventIntake, IntakeOutcome, IntakeSettings};
    use crate::dedup::EventDeduplicator;
    use crate::dispatch::ReplyDispatcher;
    use crate::events::{greeting_router, EventRecord, SlackEnvelope, SlackEventType};
    use crate::web_api::{BotIdentity, OutgoingMessage, PostedMessage, SlackWebApi, WebApiError};

    #[derive(Default)]
    struct RecordingApi {
        posted: Mutex<Vec<OutgoingMessage>>,
        delivered: Notify,
    }

    impl RecordingApi {
        async fn wait_for_posts(&self, count: usize) -> Vec<OutgoingMessage> {
            loop {
                let notified = self.delivered.notified();
                {
                    let posted = self.posted.lock().await;
                    if posted.len() >= count {
                        return posted.clone();
                    }
                }
                notified.await;
            }
        }
    }

    #[async_trait]
    impl SlackWebApi for RecordingApi {
        async fn auth_test(&self) -> Result<BotIdentity, WebApiError> {
            Ok(BotIdentity::default())
        }

        async fn post_message(
            &self,
            message: &OutgoingMessage,
        ) -> Result<PostedMessage, WebApiError> {
            self.posted.lock().await.push(message.clone());
            self.delivered.notify_waiters();
            Ok(PostedMessage { channel: Some(message.channel.clone()), ts: None })
        }
    }

    fn intake(api: Arc<RecordingApi>, settings: IntakeSettings) -> EventIntake {
        let (dispatcher, _workers) = ReplyDispatcher::spawn(api, 1);
        EventIntake::new(
            Arc::new(EventDeduplicator::default()),
            greeting_router("Hello!"),
            dispatcher,
        )
        .with_identity(BotIdentity {
            user_id: Some("UBOT".to_owned()),
            bot_id: Some("BBOT".to_owned()),
            team: None,
        })
        .with_settings(settings)
    }

    fn mention(event_id: &str, sender_id: &str) -> SlackEnvelope {
        SlackEnvelope::Event(EventRecord {
            event_id: event_id.to_owned(),
            event_type: SlackEventType::AppMention,
            sender_id: sender_id.to_owned(),
            bot_id: None,
            channel_id: "C1".to_owned(),
            ts: Some("1730000000.0001".to_owned()),
            thread_ts: None,
            text: "<@UBOT> hi".to_owned(),
            received_at: Utc::now(),
        })
    }

    fn from_bot(event_id: &str, bot_id: &str) -> SlackEnvelope {
        let SlackEnvelope::Event(mut record) = mention(event_id, bot_id) else {
            unreachable!("mention always builds an event");
        };
        record.bot_id = Some(bot_id.to_owned());
        SlackEnvelope::Event(record)
    }

    #[tokio::test]
    async fn url_verification_leaves_seen_set_untouched() {
        let intake = intake(Arc::new(RecordingApi::default()), IntakeSettings::default());

        let outcome =
            intake.accept(SlackEnvelope::UrlVerification { challenge: "abc".to_owned() }).await;

        assert_eq!(outcome, IntakeOutcome::Challenge("abc".to_owned()));
        assert!(intake.deduplicator().is_empty());
        assert_eq!(intake.dispatcher().stats().enqueued, 0);
    }

    #[tokio::test]
    async fn first_delivery_dispatches_and_redelivery_is_dropped() {
        let api = Arc::new(RecordingApi::default());
        let intake = intake(api.clone(), IntakeSettings::default());

        assert_eq!(intake.accept(mention("Ev01", "U1")).await, IntakeOutcome::Dispatched);
        assert_eq!(intake.accept(mention("Ev01", "U1")).await, IntakeOutcome::Duplicate);
        assert_eq!(intake.dispatcher().stats().enqueued, 1);

        let posted = tokio::time::timeout(Duration::from_secs(2), api.wait_for_posts(1))
            .await
            .expect("reply should be posted");
        assert_eq!(posted[0].channel, "C1");
        assert_eq!(posted[0].text, "Hello!");
        assert_eq!(posted[0].thread_ts.as_deref(), Some("1730000000.0001"));
    }

    #[tokio::test]
    async fn own_messages_are_ignored_before_deduplication() {
        let intake = intake(Arc::new(RecordingApi::default()), IntakeSettings::default());

        assert_eq!(intake.accept(mention("EvSelf", "UBOT")).await, IntakeOutcome::SelfIgnored);
        assert_eq!(intake.accept(from_bot("EvSelfBot", "BBOT")).await, IntakeOutcome::SelfIgnored);

        assert!(!intake.deduplicator().contains("EvSelf"));
        assert_eq!(intake.dispatcher().stats().enqueued, 0);
    }

    #[tokio::test]
    async fn other_bots_are_ignored_only_when_configured() {
        let strict = intake(Arc::new(RecordingApi::default()), IntakeSettings::default());
        assert_eq!(strict.accept(from_bot("EvOther", "BOTHER")).await, IntakeOutcome::SelfIgnored);

        let lenient = intake(
            Arc::new(RecordingApi::default()),
            IntakeSettings { ignore_bot_messages: false, reply_in_thread: true },
        );
        assert_eq!(lenient.accept(from_bot("EvOther", "BOTHER")).await, IntakeOutcome::Dispatched);
        assert_eq!(lenient.accept(from_bot("EvOwn", "BBOT")).await, IntakeOutcome::SelfIgnored);
    }

    #[tokio::test]
    async fn unthreaded_replies_omit_thread_ts() {
        let api = Arc::new(RecordingApi::default());
        let intake = intake(
            api.clone(),
            IntakeSettings { ignore_bot_messages: true, reply_in_thread: false },
        );

        assert_eq!(intake.accept(mention("Ev02", "U1")).await, IntakeOutcome::Dispatched);

        let posted = tokio::time::timeout(Duration::from_secs(2), api.wait_for_posts(1))
            .await
            .expect("reply should be posted");
        assert_eq!(posted[0].thread_ts, None);
    }

    #[tokio::test]
    async fn unsupported_events_are_acknowledged_without_tracking() {
        let intake = intake(Arc::new(RecordingApi::default()), IntakeSettings::default());

        let outcome = intake
            .accept(SlackEnvelope::Unsupported {
                event_id: Some("EvReaction".to_owned()),
                event_type: "reaction_added".to_owned(),
            })
            .await;

        assert_eq!(outcome, IntakeOutcome::Unsupported);
        assert!(intake.deduplicator().is_empty());
    }

    #[tokio::test]
    async fn closed_queue_releases_event_for_redelivery() {
        let (dispatcher, workers) = ReplyDispatcher::spawn(Arc::new(RecordingApi::default()), 1);
        let intake = EventIntake::new(
            Arc::new(EventDeduplicator::default()),
            greeting_router("Hello!"),
            dispatcher,
        );
        workers.shutdown(Duration::ZERO).await;
        tokio::time::timeout(Duration::from_secs(2), async {
            while !intake.dispatcher().is_closed() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("queue should close");

        assert_eq!(intake.accept(mention("EvLate", "U1")).await, IntakeOutcome::QueueClosed);
        assert!(!intake.deduplicator().contains("EvLate"));
        assert_eq!(intake.accept(mention("EvLate", "U1")).await, IntakeOutcome::QueueClosed);
    }

    #[tokio::test]
    async fn concurrent_redeliveries_dispatch_once() {
        let intake = Arc::new(intake(Arc::new(RecordingApi::default()), IntakeSettings::default()));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let intake = Arc::clone(&intake);
                tokio::spawn(async move { intake.accept(mention("EvBurst", "U1")).await })
            })
            .collect();

        let mut dispatched = 0;
        for task in tasks {
            if task.await.expect("task should not panic") == IntakeOutcome::Dispatched {
                dispatched += 1;
            }
        }

        assert_eq!(dispatched, 1);
        assert_eq!(intake.dispatcher().stats().enqueued, 1);
    }
}
