//! Credit ledger data model (`spec.md` §3 "Reservation", "Ledger entry").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One credit = 30 seconds of audio output, ceiling-rounded
/// (`spec.md` GLOSSARY "Credit").
pub const SECONDS_PER_CREDIT: u32 = 30;

pub fn credits_for_seconds(seconds: u32) -> u32 {
    seconds.div_ceil(SECONDS_PER_CREDIT)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationState {
    Pending,
    Settled,
    Released,
}

/// One per job at creation (`spec.md` §3 "Reservation"). Id equals the
/// owning job id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub id: String,
    pub user_id: String,
    pub estimated_credits: u32,
    pub state: ReservationState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryKind {
    Grant,
    Reserve,
    Release,
    Settle,
    Subscription,
}

/// Append-only record of credit movements (`spec.md` §3 "Ledger entry").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub user_id: String,
    pub job_id: Option<String>,
    pub kind: LedgerEntryKind,
    pub delta: i64,
    pub resulting_balance: i64,
    pub at: DateTime<Utc>,
}

/// Durable per-user account state, the document this crate keeps under
/// compare-and-set in the `DocumentStore` (`SPEC_FULL.md` §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    pub user_id: String,
    pub balance: i64,
    pub reserved: i64,
    pub overdrafted: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

impl UserAccount {
    pub fn new(user_id: impl Into<String>, balance: i64) -> Self {
        Self {
            user_id: user_id.into(),
            balance,
            reserved: 0,
            overdrafted: balance < 0,
            expires_at: None,
        }
    }

    /// `balance - reserved`, what `estimate` reports as `available`
    /// (`SPEC_FULL.md` §3 "ProjectedBalance view").
    pub fn available(&self) -> i64 {
        self.balance - self.reserved
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimateResult {
    pub estimated_seconds: u32,
    pub estimated_credits: u32,
    pub balance: i64,
    pub available: i64,
    pub projected: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettleResult {
    pub actual_credits: u32,
    pub balance: i64,
    pub overdrafted: bool,
}
