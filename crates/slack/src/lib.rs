//! Slack Events API integration for the greeter bot.
//!
//! - **Events** (`events`) - envelope parsing and the handler router
//! - **Intake** (`intake`) - self-ignore, deduplication and reply enqueueing
//! - **Dedup** (`dedup`) - bounded set of recently seen event ids
//! - **Dispatch** (`dispatch`) - worker pool that posts replies off the request path
//! - **Web API** (`web_api`) - `auth.test` and `chat.postMessage` client
//! - **Signature** (`signature`) - `X-Slack-Signature` verification
//! - **Block Kit** (`blocks`) - reply message builders
//!
//! # Architecture
//!
//! ```text
//! webhook body → parse_envelope → EventIntake → EventRouter → ReplyDispatcher
//!                                      ↓                             ↓
//!                              EventDeduplicator            chat.postMessage
//! ```

pub mod blocks;
pub mod dedup;
pub mod dispatch;
pub mod events;
pub mod intake;
pub mod signature;
pub mod web_api;
