//! User notification channel.

use tracing::{info, warn};

/// Fire-and-forget user notifications (toasts, banners).
pub trait Notifier: Send + Sync {
    /// Reports a completed action.
    fn show_success(&self, title: &str, body: &str);
    /// Reports a failed action.
    fn show_error(&self, title: &str, body: &str);
}

/// Notifier that only writes to the log; for headless use.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn show_success(&self, title: &str, body: &str) {
        info!(title, body, "notify success");
    }

    fn show_error(&self, title: &str, body: &str) {
        warn!(title, body, "notify error");
    }
}
