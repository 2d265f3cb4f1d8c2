//! HTTP webhook channel.
//!
//! Posts each notification to one endpoint, as the notification's JSON by
//! default or through a minijinja body template (chat integrations usually
//! want `{"text": ...}`).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Method;

use crate::templating::TemplateRenderer;
use crate::traits::{Notification, Notifier, NotifyError};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Endpoint settings before `${VAR}` references are resolved.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    /// Case-insensitive; `None` means `POST`.
    pub method: Option<String>,
    pub headers: HashMap<String, String>,
    pub body_template: Option<String>,
    pub timeout: Duration,
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: None,
            headers: HashMap::new(),
            body_template: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn body_template(mut self, template: impl Into<String>) -> Self {
        self.body_template = Some(template.into());
        self
    }
}

/// A webhook endpoint with env references resolved and the body template
/// checked, so configuration mistakes surface at startup rather than on
/// the first alert.
#[derive(Debug)]
pub struct WebhookNotifier {
    url: String,
    method: Method,
    headers: HeaderMap,
    body_template: Option<String>,
    renderer: Arc<TemplateRenderer>,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig, renderer: Arc<TemplateRenderer>) -> Result<Self, NotifyError> {
        let url = expand_env(&config.url)?;
        let method = match config.method.as_deref() {
            None => Method::POST,
            Some(m) => Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                .map_err(|_| NotifyError::Config(format!("invalid HTTP method: {m}")))?,
        };

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| NotifyError::Config(format!("invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(&expand_env(value)?)
                .map_err(|e| NotifyError::Config(format!("invalid value for header {name}: {e}")))?;
            headers.insert(name, value);
        }

        if let Some(template) = &config.body_template {
            renderer
                .validate(template)
                .map_err(|e| NotifyError::Config(format!("invalid body template: {e}")))?;
        }

        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            url,
            method,
            headers,
            body_template: config.body_template,
            renderer,
            client,
        })
    }

    fn body(&self, notification: &Notification) -> Result<String, NotifyError> {
        match &self.body_template {
            Some(template) => self.renderer.render(template, notification),
            None => serde_json::to_string(notification)
                .map_err(|e| NotifyError::Config(format!("failed to serialize notification: {e}"))),
        }
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let response = self
            .client
            .request(self.method.clone(), &self.url)
            .headers(self.headers.clone())
            .body(self.body(notification)?)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            tracing::warn!(%status, body = %detail, "Webhook rejected notification");
            return Err(NotifyError::Rejected(format!("webhook returned {status}: {detail}")));
        }
        tracing::debug!(%status, method = %self.method, "Webhook accepted notification");
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "webhook"
    }
}

/// Replace every `${NAME}` with the value of env var `NAME`. Unset vars and
/// unterminated references are configuration errors.
fn expand_env(input: &str) -> Result<String, NotifyError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| NotifyError::Config(format!("unterminated ${{...}} in {input}")))?;
        let name = &after[..end];
        let value = std::env::var(name)
            .map_err(|_| NotifyError::Config(format!("env var not set: {name}")))?;
        out.push_str(&value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
