//! Crash-recovery journal port.
//!
//! When shutdown interrupts a bid update, the intended allocation is
//! journaled so the next process start can reconcile by re-issuing
//! `set_bid` idempotently before the first new cycle.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::DomainResult;

/// One journaled intended allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct IntendedAllocation {
    pub campaign_id: i64,
    pub arm_id: i64,
    pub alloc: f64,
    pub ts: DateTime<Utc>,
}

/// Repository interface for the intended-allocation journal.
#[async_trait]
pub trait JournalRepository: Send + Sync {
    /// Upsert an intent, keyed by `(campaign_id, arm_id)`.
    async fn record(&self, intent: &IntendedAllocation) -> DomainResult<()>;

    /// All outstanding intents, oldest first.
    async fn pending(&self) -> DomainResult<Vec<IntendedAllocation>>;

    /// Remove an intent once reconciled.
    async fn clear(&self, campaign_id: i64, arm_id: i64) -> DomainResult<()>;
}
