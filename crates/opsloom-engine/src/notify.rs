//! Outbound notifications
//!
//! The runner announces approval requests and run completion through a
//! [`Notifier`]. Notification failures never affect run state; the
//! runner logs and continues.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::workflow::RunStatus;

/// Sink for run lifecycle notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    /// A human-approval step is waiting on the named recipients
    async fn approval_requested(
        &self,
        run_id: Uuid,
        step_id: &str,
        recipients: &[String],
        expires_at: DateTime<Utc>,
    ) -> anyhow::Result<()>;

    /// The run reached a terminal status
    async fn run_finished(&self, run_id: Uuid, status: RunStatus) -> anyhow::Result<()>;
}

/// Notifier that writes to the log stream
#[derive(Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn approval_requested(
        &self,
        run_id: Uuid,
        step_id: &str,
        recipients: &[String],
        expires_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        info!(
            %run_id,
            %step_id,
            recipients = recipients.join(", "),
            %expires_at,
            "approval requested"
        );
        Ok(())
    }

    async fn run_finished(&self, run_id: Uuid, status: RunStatus) -> anyhow::Result<()> {
        info!(%run_id, %status, "run finished");
        Ok(())
    }
}
