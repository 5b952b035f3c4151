use lettre::message::Message;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{SmtpTransport, Transport};
use std::env;
use std::thread;

#[derive(Debug, Clone)]
pub struct EmailClient {
    server: String,
    username: String,
    password: String,
    from: String,
    to: String,
    tag: Option<String>,
}

impl EmailClient {
    /// Reads `SMTP_SERVER`, `SMTP_USERNAME`, `SMTP_PASSWORD`, `EMAIL_FROM` and `EMAIL_TO`.
    pub fn from_env(tag: Option<&str>) -> Option<Self> {
        let read = |key: &str| env::var(key).ok().filter(|v| !v.trim().is_empty());
        let server = read("SMTP_SERVER")?;
        let username = read("SMTP_USERNAME")?;
        let password = read("SMTP_PASSWORD")?;
        let to = read("EMAIL_TO")?;
        let from = read("EMAIL_FROM").unwrap_or_else(|| username.clone());
        Some(Self {
            server,
            username,
            password,
            from,
            to,
            tag: tag.map(|t| t.to_string()),
        })
    }

    /// Sends on a detached thread; errors are logged and dropped.
    pub fn send(&self, subject: &str, body: &str) {
        let subject = match &self.tag {
            Some(tag) => format!("[{}] {}", tag, subject),
            None => subject.to_string(),
        };
        let message = match self.build(&subject, body) {
            Ok(message) => message,
            Err(err) => {
                log::warn!("[EMAIL] failed to build '{}': {}", subject, err);
                return;
            }
        };
        let client = self.clone();
        thread::spawn(move || {
            let mailer = match SmtpTransport::relay(&client.server) {
                Ok(builder) => builder
                    .credentials(Credentials::new(
                        client.username.clone(),
                        client.password.clone(),
                    ))
                    .build(),
                Err(err) => {
                    log::warn!("[EMAIL] invalid SMTP relay {}: {}", client.server, err);
                    return;
                }
            };
            if let Err(err) = mailer.send(&message) {
                log::warn!("[EMAIL] send failed: {}", err);
            }
        });
    }

    fn build(&self, subject: &str, body: &str) -> Result<Message, String> {
        Message::builder()
            .from(self.from.parse().map_err(|e| format!("from: {}", e))?)
            .to(self.to.parse().map_err(|e| format!("to: {}", e))?)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| e.to_string())
    }
}
