use std::sync::Arc;

use crate::email_client::EmailClient;

/// Fire-and-forget alert sink. Implementations must swallow their own failures.
pub trait Notifier: Send + Sync {
    fn send(&self, subject: &str, body: &str);
}

/// Writes alerts to the log only.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, subject: &str, body: &str) {
        log::info!("[NOTIFY] {} | {}", subject, body.replace('\n', " | "));
    }
}

impl Notifier for EmailClient {
    fn send(&self, subject: &str, body: &str) {
        EmailClient::send(self, subject, body);
    }
}

/// Email when SMTP is configured in the environment, log otherwise.
pub fn from_env(tag: Option<&str>) -> Arc<dyn Notifier> {
    match EmailClient::from_env(tag) {
        Some(client) => Arc::new(client),
        None => {
            log::info!("[NOTIFY] SMTP not configured; alerts go to the log");
            Arc::new(LogNotifier)
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Notifier;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    pub struct RecordingNotifier {
        pub messages: Mutex<Vec<(String, String)>>,
    }

    impl RecordingNotifier {
        pub fn subjects(&self) -> Vec<String> {
            self.messages
                .lock()
                .unwrap()
                .iter()
                .map(|(s, _)| s.clone())
                .collect()
        }

        pub fn contains(&self, needle: &str) -> bool {
            self.messages
                .lock()
                .unwrap()
                .iter()
                .any(|(s, b)| s.contains(needle) || b.contains(needle))
        }
    }

    impl Notifier for RecordingNotifier {
        fn send(&self, subject: &str, body: &str) {
            self.messages
                .lock()
                .unwrap()
                .push((subject.to_string(), body.to_string()));
        }
    }
}
