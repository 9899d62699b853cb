//! Decodes broker deliveries and bridges them onto the broadcast relay.
//!
//! The change producer publishes either a JSON document describing a model
//! change (`{"model": ..., "action": ..., "instance": ...}`) or a plain text
//! payload. The normalizer decodes the body according to the configured
//! format and forwards the decoded form unchanged; nothing garbled ever
//! reaches a subscriber.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use serde_json::Value;
use tracing::{debug, warn};

use crate::relay::Relay;
use crate::storage::ChangeLog;

/// Expected encoding of broker message bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageFormat {
    /// Bodies are UTF-8 JSON documents.
    #[default]
    Json,
    /// Bodies are opaque UTF-8 text, passed through untouched.
    Text,
}

/// A normalized change event as it travels the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Json(Value),
    Text(String),
}

impl ChangeEvent {
    /// Decode a raw broker body. Fails on invalid UTF-8, and in
    /// [`MessageFormat::Json`] mode on anything that is not valid JSON.
    pub fn decode(body: &[u8], format: MessageFormat) -> Result<Self> {
        let text = std::str::from_utf8(body).context("message body is not valid UTF-8")?;
        match format {
            MessageFormat::Json => Ok(ChangeEvent::Json(
                serde_json::from_str(text).context("message body is not valid JSON")?,
            )),
            MessageFormat::Text => Ok(ChangeEvent::Text(text.to_owned())),
        }
    }

    /// Wire form sent to subscribers: canonical JSON for structured events,
    /// the original text otherwise.
    pub fn to_frame(&self) -> String {
        match self {
            ChangeEvent::Json(value) => value.to_string(),
            ChangeEvent::Text(text) => text.clone(),
        }
    }
}

/// Bridges decoded broker messages onto the relay, optionally recording each
/// one in the bounded changelog.
#[derive(Clone)]
pub struct Normalizer {
    relay: Relay,
    changelog: Option<Arc<ChangeLog>>,
    format: MessageFormat,
}

impl Normalizer {
    pub fn new(relay: Relay, changelog: Option<Arc<ChangeLog>>, format: MessageFormat) -> Self {
        Self {
            relay,
            changelog,
            format,
        }
    }

    /// Handle one broker delivery. Undecodable bodies are dropped with a
    /// warning and never reach the relay; a changelog failure is logged and
    /// the message is still relayed.
    pub async fn handle(&self, body: Vec<u8>) -> Result<()> {
        let event = match ChangeEvent::decode(&body, self.format) {
            Ok(event) => event,
            Err(e) => {
                warn!(bytes = body.len(), "dropping undecodable message: {e:#}");
                return Ok(());
            }
        };

        if let Some(changelog) = &self.changelog {
            if let Err(e) = changelog.append(&event.to_frame()) {
                warn!(key = changelog.key(), "changelog append failed: {e:#}");
            }
        }

        let receivers = self.relay.publish(Arc::new(event));
        debug!(receivers, "change relayed");
        Ok(())
    }
}
