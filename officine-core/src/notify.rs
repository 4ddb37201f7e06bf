//! src/notify.rs
//! ============================================================================
//! # Notification Sink
//!
//! Typed status messages shown in the well-known sink element
//! (`#codexGlobal` by default). Every message is also kept in a bounded
//! history and broadcast to subscribers, so a message emitted while the sink
//! is absent from the document is not lost.

use std::{collections::VecDeque, fmt, str::FromStr, time::Duration};

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::broadcast::{self, error::RecvError},
    time::{Instant, sleep_until, timeout_at},
};
use tracing::{debug, info, warn};

use crate::{
    config::NotificationConfig,
    dom::{Document, MountEvent, NodeId, markup},
};

const SUBSCRIBER_CAPACITY: usize = 64;

/// Notification levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum NotificationLevel {
    Info = 0,
    Success = 1,
    Warning = 2,
    Error = 3,
}

impl NotificationLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    /// How long the sink should keep the message on screen. Errors stay.
    pub const fn auto_dismiss_ms(self) -> Option<u32> {
        match self {
            Self::Info => Some(3000),
            Self::Success => Some(2000),
            Self::Warning => Some(5000),
            Self::Error => None,
        }
    }
}

impl fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "success" => Ok(Self::Success),
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown notification level: {other}")),
        }
    }
}

/// Compact notification with timestamp
#[derive(Debug, Clone)]
pub struct Notification {
    pub message: CompactString,
    pub level: NotificationLevel,
    pub timestamp: DateTime<Utc>,
    pub auto_dismiss_ms: Option<u32>,
}

#[derive(Debug)]
pub struct NotificationSink {
    document: Document,
    config: NotificationConfig,
    history: Mutex<VecDeque<Notification>>,
    events: broadcast::Sender<Notification>,
}

impl NotificationSink {
    pub fn new(document: Document, config: NotificationConfig) -> Self {
        let (events, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        Self {
            document,
            config,
            history: Mutex::new(VecDeque::new()),
            events,
        }
    }

    /// The sink element, when it is part of the document.
    pub fn element(&self) -> Option<NodeId> {
        self.document.get_element_by_id(&self.config.sink_id)
    }

    pub fn is_ready(&self) -> bool {
        self.element().is_some()
    }

    /// Records, broadcasts and renders one message. Returns whether it was
    /// rendered into the sink element.
    pub fn show(&self, level: NotificationLevel, message: impl Into<CompactString>) -> bool {
        let notification: Notification = Notification {
            message: message.into(),
            level,
            timestamp: Utc::now(),
            auto_dismiss_ms: level.auto_dismiss_ms(),
        };

        {
            let mut history = self.history.lock();
            while history.len() >= self.config.history_size.max(1) {
                history.pop_front();
            }
            history.push_back(notification.clone());
        }
        // no subscribers is fine
        let _ = self.events.send(notification.clone());

        let Some(sink) = self.element() else {
            warn!(
                "Notification sink #{} absent, message kept in history: [{level}] {}",
                self.config.sink_id, notification.message
            );
            return false;
        };

        match self.document.append_html(sink, &render(&notification)) {
            Ok(_) => {
                info!("Message added: [{level}] {}", notification.message);
                true
            }
            Err(e) => {
                warn!("Could not render notification into sink: {e}");
                false
            }
        }
    }

    #[inline]
    pub fn show_info(&self, message: impl Into<CompactString>) -> bool {
        self.show(NotificationLevel::Info, message)
    }

    #[inline]
    pub fn show_success(&self, message: impl Into<CompactString>) -> bool {
        self.show(NotificationLevel::Success, message)
    }

    #[inline]
    pub fn show_warning(&self, message: impl Into<CompactString>) -> bool {
        self.show(NotificationLevel::Warning, message)
    }

    #[inline]
    pub fn show_error(&self, message: impl Into<CompactString>) -> bool {
        self.show(NotificationLevel::Error, message)
    }

    /// Waits until the sink element exists, for at most the configured
    /// ready timeout. Woken by mount events, re-checked every poll interval.
    pub async fn wait_ready(&self) -> bool {
        if self.is_ready() {
            return true;
        }

        let mut mounts: broadcast::Receiver<MountEvent> = self.document.subscribe_mounts();
        let deadline: Instant = Instant::now() + self.config.ready_timeout;
        let poll: Duration = self.config.poll_interval;

        let waited = timeout_at(deadline, async {
            loop {
                tokio::select! {
                    event = mounts.recv() => {
                        if let Err(RecvError::Closed) = event {
                            sleep_until(Instant::now() + poll).await;
                        }
                    }
                    () = sleep_until(Instant::now() + poll) => {}
                }
                if self.is_ready() {
                    break;
                }
            }
        })
        .await;

        if waited.is_err() {
            warn!(
                "Notification sink #{} not ready after {:?}",
                self.config.sink_id, self.config.ready_timeout
            );
            return self.is_ready();
        }
        debug!("Notification sink #{} ready", self.config.sink_id);
        true
    }

    /// [`show`](Self::show) once the sink is ready, or regardless after the
    /// ready timeout.
    pub async fn show_when_ready(
        &self,
        level: NotificationLevel,
        message: impl Into<CompactString>,
    ) -> bool {
        self.wait_ready().await;
        self.show(level, message)
    }

    /// Oldest first.
    pub fn history(&self) -> Vec<Notification> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn last(&self) -> Option<Notification> {
        self.history.lock().back().cloned()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.events.subscribe()
    }
}

fn render(notification: &Notification) -> String {
    let level: &str = notification.level.as_str();
    let role: &str = if notification.level == NotificationLevel::Error {
        "alert"
    } else {
        "status"
    };
    let dismiss: String = notification
        .auto_dismiss_ms
        .map(|ms| format!(r#" data-dismiss-ms="{ms}""#))
        .unwrap_or_default();

    format!(
        r#"<div class="missive missive--{level}" data-level="{level}" role="{role}"{dismiss}>{}</div>"#,
        markup::escape_text(&notification.message)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink_for(markup: &str) -> NotificationSink {
        NotificationSink::new(Document::parse(markup), NotificationConfig::default())
    }

    #[test]
    fn test_show_renders_escaped_message() {
        let sink = sink_for(r#"<body><div id="codexGlobal"></div></body>"#);
        assert!(sink.show_error("Montant < 0"));

        let el = sink.element().unwrap();
        let html = sink.document.inner_html(el);
        assert!(html.contains(r#"data-level="error""#));
        assert!(html.contains("Montant &lt; 0"));
        assert!(!html.contains("data-dismiss-ms"));
    }

    #[test]
    fn test_absent_sink_keeps_history() {
        let sink = sink_for("<body></body>");
        assert!(!sink.show_info("hello"));
        let last = sink.last().unwrap();
        assert_eq!(last.level, NotificationLevel::Info);
        assert_eq!(last.auto_dismiss_ms, Some(3000));
    }

    #[test]
    fn test_history_is_bounded() {
        let config = NotificationConfig {
            history_size: 2,
            ..NotificationConfig::default()
        };
        let sink = NotificationSink::new(Document::parse("<body></body>"), config);
        sink.show_info("a");
        sink.show_info("b");
        sink.show_info("c");
        let messages: Vec<_> = sink.history().into_iter().map(|n| n.message).collect();
        assert_eq!(messages, vec!["b", "c"]);
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!("warn".parse::<NotificationLevel>(), Ok(NotificationLevel::Warning));
        assert_eq!("Success".parse::<NotificationLevel>(), Ok(NotificationLevel::Success));
        assert!("loud".parse::<NotificationLevel>().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready_wakes_on_mount() {
        let sink = std::sync::Arc::new(sink_for(r#"<body><div id="slot"></div></body>"#));
        let doc = sink.document.clone();

        let waiter = tokio::spawn({
            let sink = std::sync::Arc::clone(&sink);
            async move { sink.wait_ready().await }
        });
        tokio::time::sleep(Duration::from_millis(120)).await;
        let slot = doc.get_element_by_id("slot").unwrap();
        doc.set_inner_html(slot, r#"<div id="codexGlobal"></div>"#).unwrap();

        assert!(waiter.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready_times_out() {
        let sink = sink_for("<body></body>");
        let started = Instant::now();
        assert!(!sink.wait_ready().await);
        assert!(started.elapsed() >= Duration::from_secs(2));
    }
}
