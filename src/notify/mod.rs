//! Outbound notifications (activation email boundary).
//!
//! Delivery is dispatched from request handlers as supervised background
//! work, so a slow or failing notifier never holds up the response. Failures
//! are logged by the caller, never surfaced to the client.
//!
//! The default notifier for local dev is [`LogNotifier`], which logs the
//! recipient and returns `Ok(())`. The token itself is never logged.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use thiserror::Error;

use crate::auth::principal::PrincipalId;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("delivery to {recipient} failed: {reason}")]
    Delivery { recipient: String, reason: String },
}

/// Welcome message carrying the activation token plaintext.
#[derive(Clone)]
pub struct ActivationMessage {
    pub recipient: String,
    pub name: String,
    pub principal_id: PrincipalId,
    pub token: String,
}

impl fmt::Debug for ActivationMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivationMessage")
            .field("recipient", &self.recipient)
            .field("name", &self.name)
            .field("principal_id", &self.principal_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Notification delivery abstraction.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_activation(&self, message: &ActivationMessage) -> Result<(), NotifyError>;
}

/// Local dev notifier that logs instead of sending.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_activation(&self, message: &ActivationMessage) -> Result<(), NotifyError> {
        tracing::info!(
            recipient = %message.recipient,
            principal_id = message.principal_id,
            "Activation notice dispatched"
        );
        Ok(())
    }
}

/// Keeps delivered messages in memory; tests read tokens back from it.
#[derive(Debug, Default)]
pub struct MemoryOutbox {
    sent: Mutex<Vec<ActivationMessage>>,
}

impl MemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<ActivationMessage> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Most recent token sent to `recipient`.
    pub fn token_for(&self, recipient: &str) -> Option<String> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|message| message.recipient == recipient)
            .map(|message| message.token.clone())
    }
}

#[async_trait]
impl Notifier for MemoryOutbox {
    async fn send_activation(&self, message: &ActivationMessage) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        Ok(())
    }
}
