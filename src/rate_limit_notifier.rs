use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::notifier::Notifier;

const RATE_LIMIT_NOTIFY_INTERVAL: Duration = Duration::from_secs(600);

pub struct RateLimitNotifier {
    notifier: Arc<dyn Notifier>,
    label: String,
    last_sent: Mutex<HashMap<String, Instant>>,
}

impl RateLimitNotifier {
    pub fn new(notifier: Arc<dyn Notifier>, label: &str) -> Self {
        Self {
            notifier,
            label: label.to_string(),
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    /// At most one alert per operation per interval.
    pub fn notify(&self, operation: &str, detail: &str) -> bool {
        let now = Instant::now();
        {
            let Ok(mut last_sent) = self.last_sent.lock() else {
                return false;
            };
            if let Some(prev) = last_sent.get(operation) {
                if now.duration_since(*prev) < RATE_LIMIT_NOTIFY_INTERVAL {
                    return false;
                }
            }
            last_sent.insert(operation.to_string(), now);
        }

        let subject = if self.label.is_empty() {
            format!("[RateLimit] {}", operation)
        } else {
            format!("[{}] Rate limit - {}", self.label, operation)
        };
        let body = format!(
            "Venue rate limit hit while {}.\nDetail: {}",
            operation, detail
        );
        self.notifier.send(&subject, &body);
        log::warn!(
            "[RateLimit] notification sent for '{}' (detail: {})",
            operation,
            detail
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::testing::RecordingNotifier;

    #[test]
    fn repeats_within_interval_are_suppressed() {
        let sink = Arc::new(RecordingNotifier::default());
        let notifier = RateLimitNotifier::new(sink.clone(), "zpair");
        assert!(notifier.notify("create_order", "429"));
        assert!(!notifier.notify("create_order", "429"));
        assert!(notifier.notify("get_account", "429"));
        assert_eq!(sink.subjects().len(), 2);
        assert!(sink.subjects()[0].contains("Rate limit - create_order"));
    }
}
