use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::blocks::{greeting_message, MessageTemplate};

/// A parsed Events API delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlackEnvelope {
    UrlVerification { challenge: String },
    Event(EventRecord),
    Unsupported { event_id: Option<String>, event_type: String },
}

impl SlackEnvelope {
    pub fn correlation_id(&self) -> &str {
        match self {
            Self::UrlVerification { .. } => "url_verification",
            Self::Event(record) => &record.event_id,
            Self::Unsupported { event_id, .. } => event_id.as_deref().unwrap_or("unknown"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlackEventType {
    AppMention,
    DirectMessage,
}

impl SlackEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AppMention => "app_mention",
            Self::DirectMessage => "message_im",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventRecord {
    pub event_id: String,
    pub event_type: SlackEventType,
    /// Posting user id, or the bot id when a bot authored the message.
    pub sender_id: String,
    pub bot_id: Option<String>,
    pub channel_id: String,
    pub ts: Option<String>,
    pub thread_ts: Option<String>,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl EventRecord {
    /// Timestamp a threaded reply should attach to: the existing thread, else
    /// the triggering message itself.
    pub fn reply_thread_ts(&self) -> Option<&str> {
        self.thread_ts.as_deref().or(self.ts.as_deref())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("malformed event payload: {0}")]
    Malformed(String),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
}

#[derive(Debug, Default, Deserialize)]
struct RawPayload {
    #[serde(rename = "type")]
    payload_type: Option<String>,
    challenge: Option<String>,
    event_id: Option<String>,
    event: Option<RawEvent>,
}

#[derive(Debug, Default, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: Option<String>,
    subtype: Option<String>,
    user: Option<String>,
    bot_id: Option<String>,
    channel: Option<String>,
    channel_type: Option<String>,
    text: Option<String>,
    ts: Option<String>,
    thread_ts: Option<String>,
}

/// Message subtypes that describe edits to existing messages and carry no sender.
const SENDERLESS_SUBTYPES: &[&str] = &["message_changed", "message_deleted", "message_replied"];

pub fn parse_envelope(body: &[u8]) -> Result<SlackEnvelope, PayloadError> {
    let raw: RawPayload =
        serde_json::from_slice(body).map_err(|error| PayloadError::Malformed(error.to_string()))?;

    let payload_type = non_blank(raw.payload_type).ok_or(PayloadError::MissingField("type"))?;
    match payload_type.as_str() {
        "url_verification" => {
            let challenge = non_blank(raw.challenge).ok_or(PayloadError::MissingField("challenge"))?;
            Ok(SlackEnvelope::UrlVerification { challenge })
        }
        "event_callback" => parse_event_callback(raw.event_id, raw.event),
        other => Ok(SlackEnvelope::Unsupported {
            event_id: non_blank(raw.event_id),
            event_type: other.to_owned(),
        }),
    }
}

fn parse_event_callback(
    event_id: Option<String>,
    event: Option<RawEvent>,
) -> Result<SlackEnvelope, PayloadError> {
    let event_id = non_blank(event_id).ok_or(PayloadError::MissingField("event_id"))?;
    let event = event.ok_or(PayloadError::MissingField("event"))?;
    let raw_type = non_blank(event.event_type).ok_or(PayloadError::MissingField("event.type"))?;

    let senderless =
        event.subtype.as_deref().is_some_and(|subtype| SENDERLESS_SUBTYPES.contains(&subtype));
    let handled = match raw_type.as_str() {
        "app_mention" => Some(SlackEventType::AppMention),
        "message" if event.channel_type.as_deref() == Some("im") && !senderless => {
            Some(SlackEventType::DirectMessage)
        }
        _ => None,
    };
    let Some(event_type) = handled else {
        let event_type = match event.subtype {
            Some(subtype) => format!("{raw_type}.{subtype}"),
            None => raw_type,
        };
        return Ok(SlackEnvelope::Unsupported { event_id: Some(event_id), event_type });
    };

    let bot_id = non_blank(event.bot_id);
    let sender_id = non_blank(event.user)
        .or_else(|| bot_id.clone())
        .ok_or(PayloadError::MissingField("event.user"))?;
    let channel_id = non_blank(event.channel).ok_or(PayloadError::MissingField("event.channel"))?;

    Ok(SlackEnvelope::Event(EventRecord {
        event_id,
        event_type,
        sender_id,
        bot_id,
        channel_id,
        ts: non_blank(event.ts),
        thread_ts: non_blank(event.thread_ts),
        text: event.text.unwrap_or_default(),
        received_at: Utc::now(),
    }))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded(MessageTemplate),
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error("greeting handler failure: {0}")]
    Greeting(String),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_types(&self) -> &[SlackEventType];
    async fn handle(
        &self,
        record: &EventRecord,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

/// Routes an admitted event to the handler registered for its type.
#[derive(Default)]
pub struct EventRouter {
    handlers: HashMap<SlackEventType, Arc<dyn EventHandler>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        let handler: Arc<dyn EventHandler> = Arc::new(handler);
        for event_type in handler.event_types() {
            self.handlers.insert(*event_type, Arc::clone(&handler));
        }
    }

    pub async fn route(
        &self,
        record: &EventRecord,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let Some(handler) = self.handlers.get(&record.event_type) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(record, ctx).await
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

pub fn greeting_router(text: impl Into<String>) -> EventRouter {
    let mut router = EventRouter::new();
    router.register(GreetingHandler::new(text));
    router
}

/// Answers mentions and direct messages with the same fixed text.
pub struct GreetingHandler {
    text: String,
}

impl GreetingHandler {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl EventHandler for GreetingHandler {
    fn event_types(&self) -> &[SlackEventType] {
        &[SlackEventType::AppMention, SlackEventType::DirectMessage]
    }

    async fn handle(
        &self,
        _record: &EventRecord,
        _ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        if self.text.trim().is_empty() {
            return Err(EventHandlerError::Greeting("greeting text is empty".to_owned()));
        }
        Ok(HandlerResult::Responded(greeting_message(&self.text)))
    }
}
