//! Off-request reply delivery.
//!
//! The webhook handler enqueues a [`ReplyJob`] and returns; a fixed pool of
//! workers drains the queue and calls `chat.postMessage`. Delivery failures are
//! logged and counted, never retried.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::blocks::MessageTemplate;
use crate::web_api::{OutgoingMessage, SlackWebApi};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyJob {
    pub correlation_id: String,
    pub message: OutgoingMessage,
}

impl ReplyJob {
    pub fn new(
        correlation_id: impl Into<String>,
        channel_id: impl Into<String>,
        template: MessageTemplate,
        thread_ts: Option<String>,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            message: OutgoingMessage::from_template(channel_id, template, thread_ts),
        }
    }

    fn validate(&self) -> Result<(), DispatchError> {
        if self.message.channel.trim().is_empty() {
            return Err(DispatchError::EmptyChannel);
        }
        if self.message.text.trim().is_empty() {
            return Err(DispatchError::EmptyText);
        }
        Ok(())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("reply channel must not be empty")]
    EmptyChannel,
    #[error("reply text must not be empty")]
    EmptyText,
    #[error("reply queue is closed")]
    QueueClosed,
}

#[derive(Debug, Default)]
pub struct DispatchStats {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchSnapshot {
    pub enqueued: u64,
    pub delivered: u64,
    pub failed: u64,
}

impl DispatchSnapshot {
    pub fn in_flight(&self) -> u64 {
        self.enqueued.saturating_sub(self.delivered + self.failed)
    }
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone)]
pub struct ReplyDispatcher {
    sender: mpsc::UnboundedSender<ReplyJob>,
    stats: Arc<DispatchStats>,
}

pub struct DispatchWorkers {
    handles: Vec<JoinHandle<()>>,
}

impl ReplyDispatcher {
    /// Starts `workers` consumer tasks on the current runtime.
    pub fn spawn(api: Arc<dyn SlackWebApi>, workers: usize) -> (Self, DispatchWorkers) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let queue = Arc::new(Mutex::new(receiver));
        let stats = Arc::new(DispatchStats::default());

        let handles = (0..workers.max(1))
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    Arc::clone(&queue),
                    Arc::clone(&api),
                    Arc::clone(&stats),
                ))
            })
            .collect();

        (Self { sender, stats }, DispatchWorkers { handles })
    }

    /// Hands the job to the worker pool without waiting for delivery.
    pub fn dispatch(&self, job: ReplyJob) -> Result<(), DispatchError> {
        job.validate()?;
        self.sender.send(job).map_err(|_| DispatchError::QueueClosed)?;
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub fn stats(&self) -> DispatchSnapshot {
        self.stats.snapshot()
    }
}

impl DispatchWorkers {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits for workers to drain the queue once every [`ReplyDispatcher`]
    /// handle has been dropped. Workers still running after `grace` are aborted.
    /// Returns the number of workers that exited on their own.
    pub async fn shutdown(self, grace: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + grace;
        let mut finished = 0;

        for mut handle in self.handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(_) => finished += 1,
                Err(_) => handle.abort(),
            }
        }

        finished
    }
}

async fn run_worker(
    worker_id: usize,
    queue: Arc<Mutex<mpsc::UnboundedReceiver<ReplyJob>>>,
    api: Arc<dyn SlackWebApi>,
    stats: Arc<DispatchStats>,
) {
    loop {
        let next = {
            let mut receiver = queue.lock().await;
            receiver.recv().await
        };
        let Some(job) = next else {
            break;
        };

        match api.post_message(&job.message).await {
            Ok(posted) => {
                stats.delivered.fetch_add(1, Ordering::Relaxed);
                info!(
                    event_name = "egress.slack.reply_posted",
                    correlation_id = %job.correlation_id,
                    worker_id,
                    channel_id = %job.message.channel,
                    message_ts = posted.ts.as_deref().unwrap_or("unknown"),
                    "posted greeting reply"
                );
            }
            Err(error) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    event_name = "egress.slack.reply_failed",
                    correlation_id = %job.correlation_id,
                    worker_id,
                    channel_id = %job.message.channel,
                    error = %error,
                    "failed to post greeting reply"
                );
            }
        }
    }

    info!(worker_id, "reply worker stopped");
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::{Mutex, Notify};

    use super::{DispatchError, ReplyDispatcher, ReplyJob};
    use crate::blocks::greeting_message;
    use crate::web_api::{BotIdentity, OutgoingMessage, PostedMessage, SlackWebApi, WebApiError};

    #[derive(Default)]
    struct ScriptedApi {
        posted: Mutex<Vec<OutgoingMessage>>,
        results: Mutex<VecDeque<Result<PostedMessage, WebApiError>>>,
        gate: Option<Arc<Notify>>,
        delivered: Notify,
    }

    impl ScriptedApi {
        fn gated(gate: Arc<Notify>) -> Self {
            Self { gate: Some(gate), ..Self::default() }
        }

        fn with_results(results: Vec<Result<PostedMessage, WebApiError>>) -> Self {
            Self { results: Mutex::new(results.into()), ..Self::default() }
        }

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
    impl SlackWebApi for ScriptedApi {
        async fn auth_test(&self) -> Result<BotIdentity, WebApiError> {
            Ok(BotIdentity::default())
        }

        async fn post_message(
            &self,
            message: &OutgoingMessage,
        ) -> Result<PostedMessage, WebApiError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.posted.lock().await.push(message.clone());
            let result = self.results.lock().await.pop_front().unwrap_or(Ok(PostedMessage {
                channel: Some(message.channel.clone()),
                ts: Some("1730000000.9999".to_owned()),
            }));
            self.delivered.notify_waiters();
            result
        }
    }

    fn job(channel: &str, text: &str) -> ReplyJob {
        ReplyJob::new("Ev01", channel, greeting_message(text), None)
    }

    #[tokio::test]
    async fn dispatch_returns_before_delivery_completes() {
        let gate = Arc::new(Notify::new());
        let api = Arc::new(ScriptedApi::gated(Arc::clone(&gate)));
        let (dispatcher, _workers) = ReplyDispatcher::spawn(api.clone(), 1);

        dispatcher.dispatch(job("C1", "Hello!")).expect("enqueue");

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(api.posted.lock().await.is_empty(), "delivery should still be blocked");
        assert_eq!(dispatcher.stats().in_flight(), 1);

        gate.notify_one();
        let posted = tokio::time::timeout(Duration::from_secs(2), api.wait_for_posts(1))
            .await
            .expect("delivery should finish once released");
        assert_eq!(posted[0].channel, "C1");
        assert_eq!(posted[0].text, "Hello!");
    }

    #[tokio::test]
    async fn failed_delivery_is_counted_and_worker_keeps_running() {
        let api = Arc::new(ScriptedApi::with_results(vec![Err(WebApiError::Api {
            method: "chat.postMessage",
            error: "channel_not_found".to_owned(),
        })]));
        let (dispatcher, _workers) = ReplyDispatcher::spawn(api.clone(), 1);

        dispatcher.dispatch(job("C404", "Hello!")).expect("enqueue");
        dispatcher.dispatch(job("C1", "Hello!")).expect("enqueue");

        tokio::time::timeout(Duration::from_secs(2), api.wait_for_posts(2))
            .await
            .expect("both jobs should be attempted");
        tokio::time::sleep(Duration::from_millis(10)).await;

        let stats = dispatcher.stats();
        assert_eq!(stats.enqueued, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.delivered, 1);
    }

    #[tokio::test]
    async fn jobs_without_destination_or_text_are_rejected() {
        let api = Arc::new(ScriptedApi::default());
        let (dispatcher, _workers) = ReplyDispatcher::spawn(api, 1);

        assert_eq!(dispatcher.dispatch(job("", "Hello!")), Err(DispatchError::EmptyChannel));
        assert_eq!(dispatcher.dispatch(job("C1", "  ")), Err(DispatchError::EmptyText));
        assert_eq!(dispatcher.stats().enqueued, 0);
    }

    #[tokio::test]
    async fn shutdown_drains_queue_after_handles_are_dropped() {
        let api = Arc::new(ScriptedApi::default());
        let (dispatcher, workers) = ReplyDispatcher::spawn(api.clone(), 3);
        assert_eq!(workers.len(), 3);

        for index in 0..5 {
            dispatcher.dispatch(job(&format!("C{index}"), "Hello!")).expect("enqueue");
        }
        drop(dispatcher);

        let finished = workers.shutdown(Duration::from_secs(2)).await;

        assert_eq!(finished, 3);
        assert_eq!(api.posted.lock().await.len(), 5);
    }
}
