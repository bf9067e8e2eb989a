//! Bulk sends with per-recipient progress.
//!
//! A batch emits a 0% [`BulkEvent::Progress`] snapshot, then one progress
//! event per recipient in request order, then a single
//! [`BulkEvent::Complete`]. A lost transport or an unwritable delivery log
//! ends the batch early with one [`BulkEvent::Error`].

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use super::progress::{BulkEvent, DeliveryAttemptResult, Tally};
use super::{has_content, DispatchError, Dispatcher};
use crate::mail::{Email, MailError, Mailer};
use crate::request::null_as_default;
use crate::store::{DeliveryLog, StoreError};

/// Events buffered between the batch task and the response body.
const EVENT_BUFFER: usize = 16;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkSendRequest {
    #[serde(default, deserialize_with = "null_as_default")]
    pub recipients: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub subject: String,
    pub text: Option<String>,
    pub html: Option<String>,
}

impl BulkSendRequest {
    fn validate(&self) -> Result<(), DispatchError> {
        if self.recipients.is_empty() {
            return Err(DispatchError::Validation("recipients required"));
        }
        if self.subject.is_empty() || !has_content(self.text.as_deref(), self.html.as_deref()) {
            return Err(DispatchError::Validation("subject and content required"));
        }
        Ok(())
    }
}

/// A validated bulk send with its transport already connected.
///
/// Nothing has been sent yet. Drive it with [`BulkBatch::run`] or
/// [`BulkBatch::into_stream`].
pub struct BulkBatch {
    user_id: Uuid,
    recipients: Vec<String>,
    message: Email,
    mailer: Arc<dyn Mailer>,
    log: Arc<dyn DeliveryLog>,
    throttle: Duration,
}

/// Why a batch stopped before its `complete` event.
#[derive(Debug, thiserror::Error)]
enum Halt {
    #[error("event receiver dropped")]
    Disconnected,

    #[error("mail transport failed: {0}")]
    Transport(MailError),

    #[error("delivery log unavailable: {0}")]
    Log(#[from] StoreError),
}

impl Dispatcher {
    /// Check the request and the caller's configuration, then connect.
    ///
    /// All failures here happen before any event is produced.
    pub async fn prepare_bulk(
        &self,
        user_id: Uuid,
        request: BulkSendRequest,
    ) -> Result<BulkBatch, DispatchError> {
        request.validate()?;

        let sender = self.sender(user_id).await?;
        let message = sender.compose(
            &request.recipients[0],
            &request.subject,
            request.text.as_deref(),
            request.html.as_deref(),
        )?;

        Ok(BulkBatch {
            user_id,
            recipients: request.recipients,
            message,
            mailer: sender.mailer,
            log: self.log.clone(),
            throttle: self.throttle,
        })
    }
}

impl BulkBatch {
    pub fn total(&self) -> usize {
        self.recipients.len()
    }

    /// Spawn the batch and return its events as a stream.
    pub fn into_stream(self) -> ReceiverStream<BulkEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(self.run(tx));
        ReceiverStream::new(rx)
    }

    /// Send to every recipient in order, reporting progress on `events`.
    ///
    /// The last event is either `complete` or `error`. If the receiver goes
    /// away the batch stops quietly after the attempt in flight.
    #[tracing::instrument(name = "bulk_send", skip_all, fields(user_id = %self.user_id, total = self.total()))]
    pub async fn run(self, events: mpsc::Sender<BulkEvent>) {
        tracing::info!("starting bulk send");

        match self.dispatch(&events).await {
            Ok(()) => tracing::info!("bulk send complete"),
            Err(Halt::Disconnected) => tracing::info!("client went away, stopping bulk send"),
            Err(halt) => {
                tracing::error!(error = %halt, "bulk send aborted");
                let _ = events
                    .send(BulkEvent::error("bulk send aborted", halt.to_string()))
                    .await;
            }
        }
    }

    async fn dispatch(&self, events: &mpsc::Sender<BulkEvent>) -> Result<(), Halt> {
        let mut tally = Tally::new(self.total());
        emit(events, tally.initial()).await?;

        for (i, recipient) in self.recipients.iter().enumerate() {
            if i > 0 && !self.throttle.is_zero() {
                tokio::time::sleep(self.throttle).await;
            }

            let result = self.attempt(recipient).await?;
            emit(events, tally.record(result)).await?;
        }

        tracing::debug!(processed = tally.processed(), "all recipients attempted");
        emit(events, tally.complete()).await
    }

    /// Send to one recipient and log the outcome.
    ///
    /// Rejections are folded into the returned result. A lost connection is
    /// still logged as a failed attempt and then ends the batch.
    async fn attempt(&self, recipient: &str) -> Result<DeliveryAttemptResult, Halt> {
        let email = self.message.readdressed(recipient);

        let (result, fatal) = match self.mailer.send(&email).await {
            Ok(message_id) => {
                tracing::debug!(recipient, %message_id, "delivered");
                (DeliveryAttemptResult::delivered(recipient, message_id), None)
            }
            Err(err) if err.is_fatal() => (DeliveryAttemptResult::failed(recipient, err.to_string()), Some(err)),
            Err(err) => {
                tracing::warn!(recipient, error = %err, "delivery failed");
                (DeliveryAttemptResult::failed(recipient, err.to_string()), None)
            }
        };

        self.log
            .append(&result.log_entry(self.user_id, &self.message.subject))
            .await?;

        match fatal {
            Some(err) => Err(Halt::Transport(err)),
            None => Ok(result),
        }
    }
}

async fn emit(events: &mpsc::Sender<BulkEvent>, event: BulkEvent) -> Result<(), Halt> {
    events.send(event).await.map_err(|_| Halt::Disconnected)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use futures_util::StreamExt;
    use serde_json::{json, Value};

    use super::super::testing::*;
    use super::*;
    use crate::store::MemoryStore;

    fn request(recipients: &[&str]) -> BulkSendRequest {
        BulkSendRequest {
            recipients: recipients.iter().map(|r| r.to_string()).collect(),
            subject: "Spring sale".into(),
            text: Some("Everything must go".into()),
            html: None,
        }
    }

    fn dispatcher(store: &MemoryStore, connector: Arc<ScriptedConnector>) -> Dispatcher {
        Dispatcher::new(Arc::new(store.clone()), Arc::new(store.clone()), connector)
            .throttle(Duration::ZERO)
    }

    async fn collect(batch: BulkBatch) -> Vec<Value> {
        batch
            .into_stream()
            .map(|event| serde_json::to_value(event).unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn two_recipients_stream_progress_then_complete() {
        let (store, user_id) = configured_store().await;
        let connector = ScriptedConnector::new(ScriptedMailer::default());
        let batch = dispatcher(&store, connector.clone())
            .prepare_bulk(user_id, request(&["a@x.com", "b@x.com"]))
            .await
            .unwrap();

        let events = collect(batch).await;
        assert_eq!(events.len(), 4);
        assert_eq!(events[0]["percentage"], 0);
        assert!(events[0].get("currentEmail").is_none());
        assert_eq!(events[1]["currentEmail"], "a@x.com");
        assert_eq!(events[2]["currentEmail"], "b@x.com");
        assert_eq!(events[3]["type"], "complete");
        assert_eq!(events[3]["successful"], 2);
        assert_eq!(events[3]["failed"], 0);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn counters_and_percentages_hold_at_every_snapshot() {
        let (store, user_id) = configured_store().await;
        let mailer = ScriptedMailer::default().reject("c@x.com", "550 mailbox unavailable");
        let recipients = ["a@x.com", "b@x.com", "c@x.com", "d@x.com", "e@x.com", "f@x.com", "g@x.com"];
        let batch = dispatcher(&store, ScriptedConnector::new(mailer))
            .prepare_bulk(user_id, request(&recipients))
            .await
            .unwrap();

        let events = collect(batch).await;
        assert_eq!(events.len(), recipients.len() + 2);

        let total = recipients.len() as u64;
        for (processed, event) in events[..events.len() - 1].iter().enumerate() {
            let processed = processed as u64;
            assert_eq!(event["type"], "progress");
            assert_eq!(event["processed"], processed);
            assert_eq!(event["total"], total);
            let expected = ((processed as f64 / total as f64) * 100.0).round() as u64;
            assert_eq!(event["percentage"], expected);
            let sum = event["successful"].as_u64().unwrap() + event["failed"].as_u64().unwrap();
            assert_eq!(sum, processed);
        }

        let complete = events.last().unwrap();
        assert_eq!(complete["percentage"], 100);
        assert_eq!(complete["successful"], 6);
        assert_eq!(complete["failed"], 1);
        let order: Vec<_> = complete["results"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["email"].as_str().unwrap())
            .collect();
        assert_eq!(order, recipients);
    }

    #[tokio::test]
    async fn rejected_recipient_is_reported_not_fatal() {
        let (store, user_id) = configured_store().await;
        let mailer = ScriptedMailer::default().reject("a@x.com", "550 no such user");
        let batch = dispatcher(&store, ScriptedConnector::new(mailer))
            .prepare_bulk(user_id, request(&["a@x.com"]))
            .await
            .unwrap();

        let events = collect(batch).await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[1]["failed"], 1);
        assert_eq!(events[1]["lastResult"]["success"], false);
        assert_eq!(
            events[2]["results"],
            json!([{ "email": "a@x.com", "success": false, "error": "550 no such user" }])
        );

        let log = store.log_for(user_id).await;
        assert_eq!(log.len(), 1);
        assert!(!log[0].success);
        assert_eq!(log[0].error.as_deref(), Some("550 no such user"));
    }

    #[tokio::test]
    async fn lost_connection_ends_stream_with_error() {
        let (store, user_id) = configured_store().await;
        let mailer = ScriptedMailer::default().drop_after(2);
        let connector = ScriptedConnector::new(mailer);
        let recipients = ["a@x.com", "b@x.com", "c@x.com", "d@x.com", "e@x.com"];
        let batch = dispatcher(&store, connector.clone())
            .prepare_bulk(user_id, request(&recipients))
            .await
            .unwrap();

        let events = collect(batch).await;
        let types: Vec<_> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
        assert_eq!(types, ["progress", "progress", "progress", "error"]);
        assert_eq!(events[3]["error"], "bulk send aborted");
        assert!(events[3]["details"]
            .as_str()
            .unwrap()
            .contains("connection reset by peer"));

        // Recipients after the failed attempt are never tried.
        assert_eq!(connector.mailer.attempts(), 3);
        assert_eq!(connector.mailer.sent(), ["a@x.com", "b@x.com"]);

        let log = store.log_for(user_id).await;
        let logged: Vec<_> = log.iter().map(|e| (e.recipient.as_str(), e.success)).collect();
        assert_eq!(logged, [("a@x.com", true), ("b@x.com", true), ("c@x.com", false)]);
    }

    #[tokio::test]
    async fn log_is_written_in_recipient_order() {
        let (store, user_id) = configured_store().await;
        let recipients = ["c@x.com", "a@x.com", "b@x.com"];
        let batch = dispatcher(&store, ScriptedConnector::new(ScriptedMailer::default()))
            .prepare_bulk(user_id, request(&recipients))
            .await
            .unwrap();
        collect(batch).await;

        let log = store.log_for(user_id).await;
        let logged: Vec<_> = log.iter().map(|e| e.recipient.as_str()).collect();
        assert_eq!(logged, recipients);
        assert!(log.iter().all(|e| e.success && e.message_id.is_some()));
        assert!(log.iter().all(|e| e.subject == "Spring sale"));
    }

    #[tokio::test]
    async fn repeated_batches_are_not_deduplicated() {
        let (store, user_id) = configured_store().await;
        let connector = ScriptedConnector::new(ScriptedMailer::default());
        let dispatcher = dispatcher(&store, connector.clone());

        for _ in 0..2 {
            let batch = dispatcher
                .prepare_bulk(user_id, request(&["a@x.com", "a@x.com"]))
                .await
                .unwrap();
            collect(batch).await;
        }

        assert_eq!(store.log_for(user_id).await.len(), 4);
        assert_eq!(connector.mailer.sent().len(), 4);
    }

    #[tokio::test]
    async fn empty_recipients_fail_before_streaming() {
        let (store, user_id) = configured_store().await;
        let connector = ScriptedConnector::new(ScriptedMailer::default());

        let err = dispatcher(&store, connector.clone())
            .prepare_bulk(user_id, request(&[]))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, DispatchError::Validation("recipients required")));
        assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn subject_and_content_are_required() {
        let (store, user_id) = configured_store().await;
        let dispatcher = dispatcher(&store, ScriptedConnector::new(ScriptedMailer::default()));

        let no_subject = BulkSendRequest {
            subject: String::new(),
            ..request(&["a@x.com"])
        };
        let no_content = BulkSendRequest {
            text: Some(String::new()),
            html: None,
            ..request(&["a@x.com"])
        };
        let html_only = BulkSendRequest {
            text: None,
            html: Some("<p>hi</p>".into()),
            ..request(&["a@x.com"])
        };

        for req in [no_subject, no_content] {
            let err = dispatcher.prepare_bulk(user_id, req).await.err().unwrap();
            assert!(matches!(err, DispatchError::Validation("subject and content required")));
        }
        assert!(dispatcher.prepare_bulk(user_id, html_only).await.is_ok());
    }

    #[tokio::test]
    async fn missing_smtp_fails_before_streaming() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        let connector = ScriptedConnector::new(ScriptedMailer::default());

        let err = dispatcher(&store, connector.clone())
            .prepare_bulk(user_id, request(&["a@x.com"]))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, DispatchError::Configuration(_)));
        assert_eq!(err.to_string(), "smtp or identity missing");
        assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
        assert!(store.log_for(user_id).await.is_empty());
    }

    #[tokio::test]
    async fn unwritable_log_is_fatal() {
        let (store, user_id) = configured_store().await;
        let connector = ScriptedConnector::new(ScriptedMailer::default());
        let batch = Dispatcher::new(Arc::new(store), Arc::new(BrokenLog), connector.clone())
            .throttle(Duration::ZERO)
            .prepare_bulk(user_id, request(&["a@x.com", "b@x.com"]))
            .await
            .unwrap();

        let events = collect(batch).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1]["type"], "error");
        assert!(events[1]["details"]
            .as_str()
            .unwrap()
            .starts_with("delivery log unavailable"));
        assert_eq!(connector.mailer.attempts(), 1);
    }

    #[tokio::test]
    async fn dropped_receiver_stops_the_batch() {
        let (store, user_id) = configured_store().await;
        let connector = ScriptedConnector::new(ScriptedMailer::default());
        let batch = dispatcher(&store, connector.clone())
            .prepare_bulk(user_id, request(&["a@x.com", "b@x.com", "c@x.com"]))
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::channel(1);
        let task = tokio::spawn(batch.run(tx));

        let first = rx.recv().await.unwrap();
        assert!(!first.is_terminal());
        drop(rx);
        task.await.unwrap();

        // At most the attempt whose progress event could not be delivered.
        assert!(connector.mailer.attempts() <= 2);
        assert!(store.log_for(user_id).await.iter().all(|e| e.success));
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_sleeps_between_recipients_only() {
        let (store, user_id) = configured_store().await;
        let throttle = Duration::from_millis(100);
        let batch = Dispatcher::new(
            Arc::new(store.clone()),
            Arc::new(store),
            ScriptedConnector::new(ScriptedMailer::default()),
        )
        .throttle(throttle)
        .prepare_bulk(user_id, request(&["a@x.com", "b@x.com", "c@x.com"]))
        .await
        .unwrap();

        let started = tokio::time::Instant::now();
        let events = collect(batch).await;

        assert_eq!(events.len(), 5);
        let elapsed = started.elapsed();
        assert!(elapsed >= throttle * 2, "elapsed {elapsed:?}");
        assert!(elapsed < throttle * 3, "elapsed {elapsed:?}");
    }
}
