//! # Notifier
//!
//! Best-effort delivery of presence messages to alert transports.
//!
//! ## Delivery Path
//! ```text
//! ┌──────────────┐  try_send   ┌──────────────┐  deliver   ┌──────────────────┐
//! │  Scan loop   │ ──────────► │ Notifier task│ ─────────► │ NotificationSink │
//! │ (never waits)│   bounded   │ (one at a    │            │ Telegram / Log   │
//! └──────────────┘   channel   │  time)       │ ◄───────── └──────────────────┘
//!                              └──────────────┘   errors logged, dropped
//! ```
//!
//! A full queue drops the message with a warning instead of stalling the
//! scan loop.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::AlertSettings;
use crate::error::{NotifyError, NotifyResult};

/// Messages queued beyond this are dropped.
const QUEUE_CAPACITY: usize = 64;

/// Telegram request timeout.
const TELEGRAM_TIMEOUT: Duration = Duration::from_secs(10);

const TELEGRAM_API: &str = "https://api.telegram.org";

// =============================================================================
// Sinks
// =============================================================================

/// Somewhere a formatted message can be sent.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Sends one message.
    async fn deliver(&self, message: &str) -> NotifyResult<()>;
}

/// Writes messages to the log. Used when no transport is configured.
#[derive(Debug, Clone, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, message: &str) -> NotifyResult<()> {
        info!(message, "Alert transport not configured; message not sent");
        Ok(())
    }
}

/// Telegram Bot API `sendMessage`.
pub struct TelegramSink {
    client: reqwest::Client,
    url: String,
    chat_id: String,
}

impl TelegramSink {
    pub fn new(bot_token: &str, chat_id: &str) -> NotifyResult<Self> {
        Self::with_base_url(TELEGRAM_API, bot_token, chat_id)
    }

    /// Points the sink at another API host.
    pub fn with_base_url(base: &str, bot_token: &str, chat_id: &str) -> NotifyResult<Self> {
        let client = reqwest::Client::builder().timeout(TELEGRAM_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: format!("{}/bot{}/sendMessage", base.trim_end_matches('/'), bot_token),
            chat_id: chat_id.to_string(),
        })
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn deliver(&self, message: &str) -> NotifyResult<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "chat_id": self.chat_id, "text": message }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Builds the sink the alert settings ask for.
pub fn sink_from_settings(alerts: &AlertSettings) -> NotifyResult<Box<dyn NotificationSink>> {
    match alerts.telegram() {
        Some((token, chat_id)) => {
            info!("Sending alerts to Telegram");
            Ok(Box::new(TelegramSink::new(token, chat_id)?))
        }
        None => {
            info!("No alert transport configured; alerts go to the log");
            Ok(Box::new(LogSink))
        }
    }
}

// =============================================================================
// Notifier Task
// =============================================================================

#[derive(Debug)]
enum NotifierCommand {
    Deliver(String),
    Shutdown,
}

/// Handle for queueing messages.
#[derive(Clone)]
pub struct NotifierHandle {
    cmd_tx: mpsc::Sender<NotifierCommand>,
}

impl NotifierHandle {
    /// Queues a message without waiting. Returns false if it was dropped.
    pub fn notify(&self, message: String) -> bool {
        match self.cmd_tx.try_send(NotifierCommand::Deliver(message)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Notification queue full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Notifier stopped, dropping message");
                false
            }
        }
    }

    /// Asks the task to finish queued messages and exit.
    pub async fn shutdown(&self) -> NotifyResult<()> {
        self.cmd_tx
            .send(NotifierCommand::Shutdown)
            .await
            .map_err(|_| NotifyError::Closed)
    }
}

/// Delivers queued messages to every sink in order.
pub struct Notifier {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl Notifier {
    pub fn new(sinks: Vec<Box<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }

    /// Starts the delivery task.
    pub fn start(self) -> (NotifierHandle, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(QUEUE_CAPACITY);
        let task = tokio::spawn(self.run(cmd_rx));
        (NotifierHandle { cmd_tx }, task)
    }

    async fn run(self, mut cmd_rx: mpsc::Receiver<NotifierCommand>) {
        debug!(sinks = self.sinks.len(), "Notifier started");
        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                NotifierCommand::Deliver(message) => self.deliver(&message).await,
                NotifierCommand::Shutdown => break,
            }
        }
        debug!("Notifier stopped");
    }

    async fn deliver(&self, message: &str) {
        for sink in &self.sinks {
            if let Err(e) = sink.deliver(message).await {
                warn!(sink = sink.name(), error = %e, "Alert delivery failed");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records what it was asked to deliver, optionally failing every time.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingSink {
        pub sent: Arc<Mutex<Vec<String>>>,
        pub fail: bool,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn deliver(&self, message: &str) -> NotifyResult<()> {
            self.sent.lock().unwrap().push(message.to_string());
            if self.fail {
                return Err(NotifyError::Rejected {
                    status: 502,
                    body: "bad gateway".into(),
                });
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_messages_delivered_in_order() {
        let sink = RecordingSink::default();
        let (handle, task) = Notifier::new(vec![Box::new(sink.clone())]).start();

        assert!(handle.notify("one".into()));
        assert!(handle.notify("two".into()));
        handle.shutdown().await.unwrap();
        task.await.unwrap();

        assert_eq!(*sink.sent.lock().unwrap(), vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_stop_others() {
        let broken = RecordingSink {
            fail: true,
            ..RecordingSink::default()
        };
        let healthy = RecordingSink::default();
        let (handle, task) =
            Notifier::new(vec![Box::new(broken.clone()), Box::new(healthy.clone())]).start();

        handle.notify("hello".into());
        handle.notify("again".into());
        handle.shutdown().await.unwrap();
        task.await.unwrap();

        assert_eq!(broken.sent.lock().unwrap().len(), 2);
        assert_eq!(healthy.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_notify_after_stop_is_dropped() {
        let (handle, task) = Notifier::new(vec![Box::new(LogSink)]).start();
        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert!(!handle.notify("late".into()));
    }

    #[test]
    fn test_sink_selection() {
        let mut alerts = AlertSettings::default();
        assert_eq!(sink_from_settings(&alerts).unwrap().name(), "log");

        alerts.telegram_bot_token = Some("123:abc".into());
        alerts.telegram_chat_id = Some("42".into());
        assert_eq!(sink_from_settings(&alerts).unwrap().name(), "telegram");
    }

    #[test]
    fn test_telegram_url() {
        let sink = TelegramSink::with_base_url("http://localhost:8081/", "123:abc", "42").unwrap();
        assert_eq!(sink.url, "http://localhost:8081/bot123:abc/sendMessage");
    }
}
