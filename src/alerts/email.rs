//! SMTP email delivery.

use askama::Template;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;

use super::payload::{AlertEvent, StatusPayload};
use super::retry::{retry_with_backoff, RetryPolicy};
use super::AlertError;
use crate::config::SmtpConfig;

const SMTP_TIMEOUT: Duration = Duration::from_secs(15);

/// A rendered email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailContent {
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// SMTP alert channel.
pub struct EmailChannel {
    config: SmtpConfig,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailChannel {
    pub fn new(config: SmtpConfig) -> Result<Self, AlertError> {
        let builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| AlertError::Email(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };

        let mut builder = builder.port(config.port).timeout(Some(SMTP_TIMEOUT));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            config,
        })
    }

    pub fn config(&self) -> &SmtpConfig {
        &self.config
    }

    pub fn identity(&self) -> String {
        format!("email:{}", self.config.host)
    }

    pub fn subscribed(&self, event: AlertEvent) -> bool {
        match event {
            AlertEvent::UrlDown => self.config.on_failure,
            AlertEvent::UrlUp => self.config.on_recovery,
            AlertEvent::Test => true,
            AlertEvent::LatencyHigh | AlertEvent::LatencyNormal => false,
        }
    }

    /// Build the multipart message for every configured recipient.
    pub fn build_message(&self, content: &EmailContent) -> Result<Message, AlertError> {
        let from: Mailbox = self
            .config
            .from_addr
            .parse()
            .map_err(|e| AlertError::Email(format!("invalid from address: {}", e)))?;

        let mut builder = Message::builder().from(from).subject(content.subject.clone());
        for to in &self.config.to_addrs {
            let mailbox: Mailbox = to
                .parse()
                .map_err(|e| AlertError::Email(format!("invalid recipient {}: {}", to, e)))?;
            builder = builder.to(mailbox);
        }

        builder
            .multipart(MultiPart::alternative_plain_html(
                content.text.clone(),
                content.html.clone(),
            ))
            .map_err(|e| AlertError::Email(e.to_string()))
    }

    /// Send with the shared retry policy.
    pub async fn send(
        &self,
        retry: &RetryPolicy,
        content: &EmailContent,
    ) -> Result<(), AlertError> {
        let message = self.build_message(content)?;
        let label = self.identity();

        retry_with_backoff(retry, &label, |_| {
            let message = message.clone();
            async move {
                self.transport
                    .send(message)
                    .await
                    .map(|_| ())
                    .map_err(|e| AlertError::Email(e.to_string()))
            }
        })
        .await
    }
}

/// Fields shared by the plain-text and HTML bodies.
struct EmailView<'a> {
    headline: String,
    name: &'a str,
    url: &'a str,
    code: String,
    response_time_ms: u64,
    error: &'a str,
    previous: &'a str,
    checked_at: &'a str,
    color: &'static str,
}

#[derive(Template)]
#[template(path = "alert_email.txt")]
struct TextEmailTemplate<'a> {
    view: &'a EmailView<'a>,
}

#[derive(Template)]
#[template(path = "alert_email.html")]
struct HtmlEmailTemplate<'a> {
    view: &'a EmailView<'a>,
}

/// Render a state-change payload as an email.
pub fn render_status_email(payload: &StatusPayload) -> Result<EmailContent, AlertError> {
    let name = payload.url.name.as_str();
    let headline = match payload.event {
        AlertEvent::UrlDown => format!("{} is DOWN", name),
        AlertEvent::UrlUp => format!("{} is UP", name),
        AlertEvent::Test => "Test alert".to_string(),
        AlertEvent::LatencyHigh | AlertEvent::LatencyNormal => {
            format!("{} latency changed", name)
        }
    };

    let view = EmailView {
        name,
        url: &payload.url.url,
        code: payload
            .status
            .code
            .map_or_else(|| "none".to_string(), |c| c.to_string()),
        response_time_ms: payload.status.response_time_ms,
        error: payload.status.error.as_deref().unwrap_or("-"),
        previous: payload.previous_status.unwrap_or("unknown"),
        checked_at: &payload.status.timestamp,
        color: if payload.status.success { "#2e7d32" } else { "#c62828" },
        headline,
    };

    Ok(EmailContent {
        subject: format!("[uptrail] {}", view.headline),
        text: TextEmailTemplate { view: &view }.render()?,
        html: HtmlEmailTemplate { view: &view }.render()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ProbeResult;
    use chrono::Utc;

    fn smtp_config(port: u16) -> SmtpConfig {
        SmtpConfig {
            host: "127.0.0.1".to_string(),
            port,
            use_tls: false,
            username: None,
            password: None,
            from_addr: "uptrail@example.com".to_string(),
            to_addrs: vec!["ops@example.com".to_string(), "oncall@example.com".to_string()],
            enabled: true,
            on_failure: true,
            on_recovery: false,
            cooldown_seconds: 300,
        }
    }

    #[test]
    fn test_render_down_email() {
        let error = "HTTP 500: <oops>";
        let result =
            ProbeResult::down("api", "https://api.example.com", Some(500), error, 12, Utc::now());
        let payload = StatusPayload::from_result(AlertEvent::UrlDown, &result, Some(true));
        let content = render_status_email(&payload).unwrap();

        assert_eq!(content.subject, "[uptrail] api is DOWN");
        assert!(content.text.contains("Status code: 500"));
        assert!(content.text.contains("Previous status: up"));
        assert!(content.text.contains("Error: HTTP 500: <oops>"));
        assert!(content.html.contains("HTTP 500: &lt;oops&gt;"));
        assert!(!content.html.contains("<oops>"));
    }

    #[tokio::test]
    async fn test_build_multipart_message() {
        let channel = EmailChannel::new(smtp_config(2525)).unwrap();
        let content = render_status_email(&StatusPayload::test()).unwrap();
        let message = channel.build_message(&content).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("Subject: [uptrail] Test alert"));
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("ops@example.com"));
        assert!(raw.contains("oncall@example.com"));
    }

    #[tokio::test]
    async fn test_invalid_recipient_is_rejected() {
        let mut config = smtp_config(2525);
        config.to_addrs = vec!["not an address".to_string()];
        let channel = EmailChannel::new(config).unwrap();
        let content = render_status_email(&StatusPayload::test()).unwrap();
        assert!(matches!(channel.build_message(&content), Err(AlertError::Email(_))));
    }

    #[tokio::test]
    async fn test_send_to_closed_port_fails() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let channel = EmailChannel::new(smtp_config(port)).unwrap();
        let content = render_status_email(&StatusPayload::test()).unwrap();
        let result = channel
            .send(&RetryPolicy::new(2, Duration::ZERO), &content)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_subscriptions() {
        let channel = EmailChannel::new(smtp_config(2525)).unwrap();
        assert!(channel.subscribed(AlertEvent::UrlDown));
        assert!(!channel.subscribed(AlertEvent::UrlUp));
        assert!(!channel.subscribed(AlertEvent::LatencyHigh));
        assert_eq!(channel.identity(), "email:127.0.0.1");
    }
}
