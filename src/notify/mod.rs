//! Outbound delivery to recipients.

pub mod format;

use std::path::Path;

use async_trait::async_trait;
use tracing::info;

use crate::Result;
use crate::store::Recipient;

/// Delivery channel. A failure concerns only the recipient it was sent to.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_text(&self, recipient: &Recipient, text: &str) -> Result<()>;

    async fn send_image(&self, recipient: &Recipient, path: &Path, caption: &str) -> Result<()>;
}

/// Writes every delivery to the structured log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_text(&self, recipient: &Recipient, text: &str) -> Result<()> {
        info!(
            recipient_id = recipient.id,
            external_id = recipient.external_id,
            "\n{text}"
        );
        Ok(())
    }

    async fn send_image(&self, recipient: &Recipient, path: &Path, caption: &str) -> Result<()> {
        info!(
            recipient_id = recipient.id,
            external_id = recipient.external_id,
            image = %path.display(),
            "\n{caption}"
        );
        Ok(())
    }
}
