// libs/video-call-cell/src/services/notify.rs
use tracing::{error, info};

use crate::models::NotificationLevel;

/// Transient user-facing status events. Purely side-effecting; carries no
/// business state.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, message: &str, level: NotificationLevel);
}

/// Default sink for headless embeddings: notifications land in the log.
pub struct TracingNotificationSink;

impl NotificationSink for TracingNotificationSink {
    fn notify(&self, message: &str, level: NotificationLevel) {
        match level {
            NotificationLevel::Info => info!("notification: {}", message),
            NotificationLevel::Success => info!("notification (success): {}", message),
            NotificationLevel::Error => error!("notification: {}", message),
        }
    }
}
