//! Administrator alerts for aborted passes.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::NotificationTarget;
use crate::model::Recipient;
use crate::store::LocalStore;

/// Subject line of every alert.
pub const ALERT_SUBJECT: &str = "cohort sync error";

/// Delivery failure.
#[derive(Debug, Error)]
#[error("failed to notify {recipient}: {cause}")]
pub struct NotifyError {
    pub recipient: String,
    pub cause: String,
}

/// Delivers a message to one recipient.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipient: &Recipient, subject: &str, body: &str)
        -> Result<(), NotifyError>;
}

/// Writes alerts to the log instead of sending mail.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        recipient: &Recipient,
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        warn!(
            target: "cohortsync::alerts",
            recipient = %recipient.email,
            subject = %subject,
            body = %body,
            "Administrator alert"
        );
        Ok(())
    }
}

/// Resolve recipients for `target` and send `message` to each.
///
/// Returns the number of successful deliveries. Failures, including failing
/// to resolve recipients, are logged and never propagate.
pub async fn alert_administrators(
    store: &dyn LocalStore,
    notifier: &dyn Notifier,
    target: NotificationTarget,
    message: &str,
) -> usize {
    let recipients = match target {
        NotificationTarget::None => return 0,
        NotificationTarget::Support => store
            .support_contact()
            .await
            .map(|contact| contact.into_iter().collect::<Vec<_>>()),
        NotificationTarget::AllAdmins => store.site_administrators().await,
    };

    let recipients: Vec<Recipient> = match recipients {
        Ok(recipients) => recipients,
        Err(e) => {
            warn!(notify_target = %target, error = %e, "Could not resolve alert recipients");
            return 0;
        }
    };

    let mut delivered = 0;
    for recipient in &recipients {
        match notifier.notify(recipient, ALERT_SUBJECT, message).await {
            Ok(()) => delivered += 1,
            Err(e) => warn!(error = %e, "Alert delivery failed"),
        }
    }

    info!(notify_target = %target, delivered, total = recipients.len(), "Administrator alert sent");
    delivered
}
