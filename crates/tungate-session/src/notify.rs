//! Notification bridge
//!
//! Surfaces engine-originated alerts as OS notifications. The alert's
//! identifier doubles as the notification channel; a missing channel is
//! created on first use with the alert's category label. When the alert
//! carries a deep link, the posted notification reopens the controlling UI
//! with that URL as payload, replacing any pending action with the same id.

use std::sync::Arc;

use tracing::debug;

use tungate_platform::os::{AlertSink, OsNotification};

/// Channel used when an alert arrives without an identifier.
const DEFAULT_CHANNEL: &str = "tungate";

/// Label used when an alert arrives without a category.
const DEFAULT_CHANNEL_LABEL: &str = "Tunnel alerts";

/// An engine-originated alert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineAlert {
    /// Channel identifier; blank means the default channel.
    pub identifier: String,
    /// Human-readable category, used as the channel label on creation.
    pub category: String,
    pub title: String,
    pub body: String,
    /// Deep link back into the controlling UI.
    pub open_url: Option<String>,
    /// Numeric notification id; posts with the same id replace each other.
    pub type_id: i32,
}

/// Bridges [`EngineAlert`]s to the OS notification surface. Posting is
/// fire-and-forget and never blocks session lifecycle work.
pub struct NotificationBridge {
    sink: Arc<dyn AlertSink>,
}

impl NotificationBridge {
    pub fn new(sink: Arc<dyn AlertSink>) -> Self {
        Self { sink }
    }

    pub fn post(&self, alert: EngineAlert) {
        let channel_id = if alert.identifier.is_empty() {
            DEFAULT_CHANNEL.to_owned()
        } else {
            alert.identifier
        };
        let label = if alert.category.is_empty() {
            DEFAULT_CHANNEL_LABEL.to_owned()
        } else {
            alert.category
        };
        self.sink.ensure_channel(&channel_id, &label);

        let deep_link = alert.open_url.filter(|url| !url.is_empty());
        debug!(channel = %channel_id, id = alert.type_id, "posting engine alert");
        self.sink.post(OsNotification {
            channel_id,
            notification_id: alert.type_id,
            title: alert.title,
            body: alert.body,
            deep_link,
        });
    }
}
