use async_trait::async_trait;
use minijinja::{Environment, context};
use serde_json::json;
use std::{future::Future, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::Mutex;

const SENDGRID_ENDPOINT: &str = "https://api.sendgrid.com/v3/mail/send";

#[derive(Error, Debug)]
pub enum MailError {
    /// The provider could not be reached, after all retry attempts.
    #[error("mail transport failed: {0}")]
    Transport(String),
    /// The provider answered with an error status. Not retried.
    #[error("mail provider rejected message with status {0}")]
    Rejected(u16),
    #[error("mail client setup failed: {0}")]
    Build(String),
}

/// OutgoingEmail
///
/// A fully rendered message, ready for whichever provider sits behind `Mailer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to_name: String,
    pub to_email: String,
    pub subject: String,
    pub html_body: String,
}

const WELCOME_TEMPLATE: &str = include_str!("../templates/welcome.html");

impl OutgoingEmail {
    /// Renders the activation email. The `.html` template name turns on
    /// auto-escaping for every interpolated value.
    pub fn welcome(username: &str, email: &str, activation_url: &str) -> Result<Self, MailError> {
        let mut env = Environment::new();
        env.add_template("welcome.html", WELCOME_TEMPLATE)
            .map_err(|e| MailError::Build(format!("load welcome template: {e}")))?;
        let html_body = env
            .get_template("welcome.html")
            .and_then(|template| template.render(context! { username, activation_url }))
            .map_err(|e| MailError::Build(format!("render welcome template: {e}")))?;

        Ok(Self {
            to_name: username.to_string(),
            to_email: email.to_string(),
            subject: "Finish Registration with GopherSocial".to_string(),
            html_body,
        })
    }
}

/// Mailer
///
/// External email collaborator. `sandbox` asks the provider to accept the message
/// without delivering it. Returns the provider's HTTP status on success.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail, sandbox: bool) -> Result<u16, MailError>;
}

pub type MailerState = Arc<dyn Mailer>;

/// RetryPolicy
///
/// Bounded retry with linearly increasing backoff: after failed attempt `n` the
/// policy sleeps `base_delay * n` before trying again.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    /// run
    ///
    /// Calls `operation` with the 1-based attempt number until it succeeds or
    /// `max_attempts` is reached (at least one attempt is always made). The last
    /// error is returned.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= max_attempts => return Err(e),
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(attempt, ?delay, error = %e, "attempt failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// SendGridMailer
///
/// Sends through the SendGrid v3 HTTP API. Transport failures are retried under the
/// configured `RetryPolicy`; an error status from SendGrid is final.
pub struct SendGridMailer {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    from_email: String,
    from_name: String,
    retry: RetryPolicy,
}

impl SendGridMailer {
    pub fn new(api_key: &str, from_email: &str, from_name: &str, retry: RetryPolicy) -> Result<Self, MailError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| MailError::Build(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: SENDGRID_ENDPOINT.to_string(),
            api_key: api_key.to_string(),
            from_email: from_email.to_string(),
            from_name: from_name.to_string(),
            retry,
        })
    }

    /// Points the mailer at a different API root (a local stub in tests).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl Mailer for SendGridMailer {
    async fn send(&self, email: &OutgoingEmail, sandbox: bool) -> Result<u16, MailError> {
        let payload = json!({
            "personalizations": [{
                "to": [{ "email": email.to_email, "name": email.to_name }]
            }],
            "from": { "email": self.from_email, "name": self.from_name },
            "subject": email.subject,
            "content": [{ "type": "text/html", "value": email.html_body }],
            "mail_settings": { "sandbox_mode": { "enable": sandbox } }
        });

        let response = self
            .retry
            .run(|attempt| {
                let request = self
                    .client
                    .post(&self.endpoint)
                    .bearer_auth(&self.api_key)
                    .json(&payload);
                async move {
                    tracing::debug!(attempt, "dispatching email via sendgrid");
                    request.send().await
                }
            })
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            tracing::error!(
                status = status.as_u16(),
                recipient = %email.to_email,
                "sendgrid rejected email"
            );
            return Err(MailError::Rejected(status.as_u16()));
        }

        Ok(status.as_u16())
    }
}

/// MockMailer
///
/// Records every message instead of sending it. Can be told to fail every send,
/// which is how registration rollback is exercised without a network.
pub struct MockMailer {
    pub should_fail: bool,
    sent: Mutex<Vec<(OutgoingEmail, bool)>>,
}

impl MockMailer {
    pub fn new() -> Self {
        Self {
            should_fail: false,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Messages accepted so far, each paired with the sandbox flag it was sent with.
    pub async fn sent(&self) -> Vec<(OutgoingEmail, bool)> {
        self.sent.lock().await.clone()
    }
}

impl Default for MockMailer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send(&self, email: &OutgoingEmail, sandbox: bool) -> Result<u16, MailError> {
        if self.should_fail {
            return Err(MailError::Transport("Mock Mailer Error: Simulation requested".to_string()));
        }
        self.sent.lock().await.push((email.clone(), sandbox));
        Ok(202)
    }
}
