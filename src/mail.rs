//! Outbound email.
//!
//! `HttpMailer` posts to a Resend-compatible transactional mail API.
//! `LogMailer` only logs, for local development without credentials.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::config::MailConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: Email) -> anyhow::Result<()>;
}

/// Mail API request payload.
#[derive(Debug, Serialize)]
struct SendPayload<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: &'a str,
    html: &'a str,
}

pub struct HttpMailer {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    from: String,
}

impl HttpMailer {
    pub fn new(cfg: &MailConfig, api_key: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("build mail http client")?;
        Ok(Self {
            client,
            api_url: cfg.api_url.clone(),
            api_key,
            from: cfg.from.clone(),
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    #[instrument(skip(self, email), fields(to = %email.to, subject = %email.subject))]
    async fn send(&self, email: Email) -> anyhow::Result<()> {
        let payload = SendPayload {
            from: &self.from,
            to: [&email.to],
            subject: &email.subject,
            text: &email.text,
            html: &email.html,
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .context("mail api request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, body = %body, "mail api rejected message");
            anyhow::bail!("mail api returned {status}");
        }

        info!("email sent");
        Ok(())
    }
}

/// Writes messages to the log instead of delivering them.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: Email) -> anyhow::Result<()> {
        info!(to = %email.to, subject = %email.subject, body = %email.text, "email (not sent)");
        Ok(())
    }
}

/// Picks the transport for the configured credentials.
pub fn from_config(cfg: &MailConfig) -> anyhow::Result<Box<dyn Mailer>> {
    match &cfg.api_key {
        Some(key) => Ok(Box::new(HttpMailer::new(cfg, key.clone())?)),
        None => {
            warn!("MAIL_API_KEY not set; emails will only be logged");
            Ok(Box::new(LogMailer))
        }
    }
}

/// Message carrying a password-reset code.
pub fn password_reset_email(to: &str, code: &str, reset_url: &str) -> Email {
    let text = format!(
        "Forgot your password? Submit a PATCH request with your new password and \
         passwordConfirm to: {reset_url}\n\nYour reset code is {code}. It is valid for \
         10 minutes.\nIf you didn't forget your password, please ignore this email."
    );
    let html = format!(
        "<p>Forgot your password? Use the code below to choose a new one.</p>\
         <p style=\"font-size:20px;font-weight:bold;letter-spacing:4px\">{code}</p>\
         <p>The code is valid for 10 minutes. If you didn't forget your password, \
         please ignore this email.</p>"
    );
    Email {
        to: to.to_string(),
        subject: "Your password reset code (valid for 10 min)".into(),
        text,
        html,
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_email_carries_code_and_link() {
        let email = password_reset_email(
            "a@example.com",
            "a1b2c3",
            "http://localhost/api/v1/users/resetPassword/a1b2c3",
        );
        assert_eq!(email.to, "a@example.com");
        assert!(email.text.contains("a1b2c3"));
        assert!(email.text.contains("/resetPassword/a1b2c3"));
        assert!(email.html.contains("a1b2c3"));
    }

    #[test]
    fn payload_matches_mail_api_shape() {
        let payload = SendPayload {
            from: "noreply@example.com",
            to: ["a@example.com"],
            subject: "s",
            text: "t",
            html: "<p>h</p>",
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["to"][0], "a@example.com");
        assert_eq!(json["from"], "noreply@example.com");
    }

    #[tokio::test]
    async fn log_mailer_always_succeeds() {
        let email = password_reset_email("a@example.com", "abc", "http://x");
        LogMailer.send(email).await.unwrap();
    }

    #[tokio::test]
    async fn missing_api_key_selects_log_mailer() {
        let cfg = MailConfig {
            api_key: None,
            api_url: "http://127.0.0.1:9/emails".into(),
            from: "noreply@example.com".into(),
            timeout_secs: 1,
        };
        let mailer = from_config(&cfg).unwrap();
        mailer
            .send(password_reset_email("a@example.com", "abc", "http://x"))
            .await
            .unwrap();
    }
}
