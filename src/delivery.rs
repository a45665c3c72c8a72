//! Delivery tracking: one outcome row per (message, recipient) pair.
//!
//! Upserts make retried sends idempotent from a bookkeeping standpoint, and
//! late transport callbacks overwrite the original outcome rather than
//! appending.  Aggregates feed the STATS and STATUS reporting commands.

use crate::storage::{Storage, StorageError};

/// Delivery state for a single recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Queued,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Queued => "queued",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }
}

/// Categorized failure causes, so reporting can tell systemic problems from
/// one-off carrier drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    InvalidDestination,
    CarrierRejected,
    TransientNetwork,
    Unknown,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::InvalidDestination => "invalid-destination",
            FailureReason::CarrierRejected => "carrier-rejected",
            FailureReason::TransientNetwork => "transient-network",
            FailureReason::Unknown => "unknown",
        }
    }
}

/// Record one delivery attempt. Repeated calls for the same pair overwrite.
pub fn record_attempt(
    storage: &Storage,
    message_id: i64,
    member_id: i64,
    status: DeliveryStatus,
    reason: Option<FailureReason>,
    provider_sid: Option<&str>,
) -> Result<(), StorageError> {
    storage.upsert_delivery(
        message_id,
        member_id,
        status.as_str(),
        reason.map(|r| r.as_str()),
        provider_sid,
    )
}

/// Apply a late status callback from the transport.  Returns false when the
/// sid matches no recorded delivery (stale or foreign callback).
pub fn apply_callback(
    storage: &Storage,
    provider_sid: &str,
    status: DeliveryStatus,
    reason: Option<FailureReason>,
) -> Result<bool, StorageError> {
    storage.update_delivery_by_sid(provider_sid, status.as_str(), reason.map(|r| r.as_str()))
}

/// Success/failure statistics over a trailing window.
#[derive(Debug, Clone)]
pub struct DeliveryAggregate {
    pub sent: u64,
    pub failed: u64,
    pub reasons: Vec<(String, u64)>,
}

impl DeliveryAggregate {
    /// Fraction of attempts that succeeded, in percent. 100 for no attempts.
    pub fn success_rate(&self) -> u64 {
        let total = self.sent + self.failed;
        if total == 0 {
            return 100;
        }
        self.sent * 100 / total
    }
}

/// Compute delivery statistics over the last `window_secs` seconds.
pub fn aggregate(storage: &Storage, window_secs: u64) -> Result<DeliveryAggregate, StorageError> {
    let cutoff = crate::storage::now_secs().saturating_sub(window_secs);
    let (sent, failed) = storage.delivery_counts_since(cutoff)?;
    let reasons = storage.failure_reasons_since(cutoff)?;
    Ok(DeliveryAggregate {
        sent,
        failed,
        reasons,
    })
}
