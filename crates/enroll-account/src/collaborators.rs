//! Interfaces to the services registration hands off to once the account
//! is committed. Implementations live outside this crate.

use serde::{Deserialize, Serialize};

use crate::registration::RecoveryCredential;

/// Registration-lock and PIN setup.
pub trait PinStateHandler: Send + Sync {
    /// Called after the account is marked registered. `storage_capable`
    /// reports whether the server holds a PIN-protected backup for it.
    fn on_registration(
        &self,
        recovery: Option<&RecoveryCredential>,
        pin: Option<&str>,
        storage_capable: bool,
        enable_lock: bool,
    ) -> anyhow::Result<()>;

    /// Called when registration carried a non-empty PIN.
    fn on_pin_changed_or_created(&self, pin: &str) -> anyhow::Result<()>;
}

/// Network connections to the messaging service.
pub trait ConnectionManager: Send + Sync {
    /// Drop every connection opened with the old credentials.
    fn close_connections(&self);

    /// Start receiving messages with the new credentials.
    fn start_incoming_observer(&self);
}

/// One-shot maintenance work queued after registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceJob {
    DirectoryRefresh,
    RotateCertificate,
}

/// Recurring work scheduled after registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodicSchedule {
    DirectoryRefresh,
    RotateSignedPreKey,
}

/// Background job queue. Both calls are fire-and-forget.
pub trait JobScheduler: Send + Sync {
    fn enqueue(&self, job: MaintenanceJob);

    fn schedule(&self, schedule: PeriodicSchedule);
}

/// User-visible notifications.
pub trait NotificationManager: Send + Sync {
    /// Dismiss the "you have been logged out" notification, if shown.
    fn cancel_unregistered_notification(&self);
}
