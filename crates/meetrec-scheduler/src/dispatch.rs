//! Alert dispatch: actually sends notifications to configured transports.
//! Supports: SMTP email, HTTP webhook, log-only.

use std::sync::Arc;

use async_trait::async_trait;
use meetrec_core::config::{AlertConfig, EmailAlertConfig, WebhookAlertConfig};

use super::notify::{AlertSink, Notification};

/// Log-only sink. Always available.
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, notification: &Notification) -> Result<(), String> {
        tracing::debug!("📝 Alert logged: {}", notification.title);
        Ok(())
    }
}

/// SMTP email sink (STARTTLS relay).
pub struct EmailSink {
    config: EmailAlertConfig,
}

impl EmailSink {
    pub fn new(config: EmailAlertConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl AlertSink for EmailSink {
    fn name(&self) -> &str {
        "email"
    }

    async fn send(&self, notification: &Notification) -> Result<(), String> {
        use lettre::{
            AsyncSmtpTransport, AsyncTransport, Message, message::Mailbox,
            message::header::ContentType, transport::smtp::authentication::Credentials,
        };

        if self.config.to.is_empty() {
            return Err("No email recipients configured".into());
        }

        let from: Mailbox = self
            .config
            .from
            .parse()
            .map_err(|e| format!("Invalid from: {e}"))?;

        let mut builder = Message::builder().from(from).subject(format!(
            "{} [MeetRec] {}",
            notification.priority.emoji(),
            notification.title
        ));
        for to in &self.config.to {
            let mailbox: Mailbox = to.parse().map_err(|e| format!("Invalid to '{to}': {e}"))?;
            builder = builder.to(mailbox);
        }

        let body = format!(
            "{}\n\nSource: {}\nTime: {}",
            notification.body,
            notification.source,
            notification.timestamp.to_rfc3339()
        );
        let email = builder
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| format!("Build email: {e}"))?;

        let creds = Credentials::new(self.config.username.clone(), self.config.password.clone());
        let mailer = AsyncSmtpTransport::<lettre::Tokio1Executor>::starttls_relay(&self.config.smtp_server)
            .map_err(|e| format!("SMTP relay: {e}"))?
            .port(self.config.smtp_port)
            .credentials(creds)
            .build();

        mailer
            .send(email)
            .await
            .map_err(|e| format!("SMTP send failed: {e}"))?;

        tracing::info!("✅ Email alert sent: {}", notification.title);
        Ok(())
    }
}

/// Generic HTTP webhook: POST with JSON body.
pub struct WebhookSink {
    config: WebhookAlertConfig,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(config: WebhookAlertConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, notification: &Notification) -> Result<(), String> {
        let mut req = self
            .client
            .post(&self.config.url)
            .json(&serde_json::json!({
                "title": notification.title,
                "body": notification.body,
                "priority": format!("{:?}", notification.priority),
                "source": notification.source,
                "timestamp": notification.timestamp.to_rfc3339(),
            }))
            .timeout(std::time::Duration::from_secs(10));

        for (key, value) in &self.config.headers {
            req = req.header(key.as_str(), value.as_str());
        }

        let resp = req
            .send()
            .await
            .map_err(|e| format!("Webhook send failed: {e}"))?;

        if resp.status().is_success() {
            tracing::info!("✅ Webhook alert sent to {}: {}", self.config.url, notification.title);
            Ok(())
        } else {
            Err(format!("Webhook error {}", resp.status()))
        }
    }
}

/// Sends to every transport; per-transport failures are logged.
/// Errs only when every transport failed.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        Self { sinks }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl AlertSink for FanoutSink {
    fn name(&self) -> &str {
        "fanout"
    }

    async fn send(&self, notification: &Notification) -> Result<(), String> {
        let mut failures = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.send(notification).await {
                tracing::warn!("⚠️ Alert transport '{}' failed: {e}", sink.name());
                failures.push(format!("{}: {e}", sink.name()));
            }
        }
        if !self.sinks.is_empty() && failures.len() == self.sinks.len() {
            return Err(failures.join("; "));
        }
        Ok(())
    }
}

/// Build the alert sink from config. Log output is always included.
pub fn sink_from_config(config: &AlertConfig) -> Arc<dyn AlertSink> {
    let mut sinks: Vec<Arc<dyn AlertSink>> = vec![Arc::new(LogSink)];

    if let Some(email) = &config.email {
        if !email.smtp_server.is_empty() && !email.to.is_empty() {
            sinks.push(Arc::new(EmailSink::new(email.clone())));
        }
    }
    if let Some(webhook) = &config.webhook {
        if !webhook.url.is_empty() {
            sinks.push(Arc::new(WebhookSink::new(webhook.clone())));
        }
    }

    tracing::debug!("📮 Alert transports: {}", sinks.iter().map(|s| s.name()).collect::<Vec<_>>().join(", "));
    Arc::new(FanoutSink::new(sinks))
}
