//! Credit reservation/settlement state machine (`spec.md` §4.6,
//! component C6): gates synthesis, guarantees at-most-one charge per job,
//! releases reservations on failure or timeout.
//!
//! The durable account (balance/reserved/overdrafted) lives behind
//! [`DocumentStore`]'s compare-and-set contract, retried optimistically on
//! conflict (`SPEC_FULL.md` §4.6); a per-user `tokio::sync::Mutex` then
//! serializes the retry loop itself so two concurrent callers for the same
//! user don't both spin against the store (`spec.md` §5 "Credit state per
//! user serialized by a per-user mutex").
//!
//! Reservations and ledger entries are kept in-memory: this core targets a
//! single host (`spec.md` §1 Non-goals), and both are scoped to the
//! lifetime of a job, unlike the account balance which must survive a
//! restart.

use std::sync::Arc;
use std::time::Duration;

use aria_interfaces::{CasError, DocumentStore};
use aria_protocol::{ErrorKind, GatewayError};
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::model::{
    credits_for_seconds, EstimateResult, LedgerEntry, LedgerEntryKind, Reservation,
    ReservationState, SettleResult, UserAccount,
};

const ACCOUNTS_COLLECTION: &str = "ledger_accounts";
const MAX_CAS_RETRIES: u32 = 5;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("account overdrafted")]
    Locked,
    #[error("insufficient credits: need {needed}, available {available}")]
    InsufficientCredits { needed: u32, available: i64 },
    #[error("reservation not found for job {0}")]
    ReservationNotFound(String),
    #[error("reservation for job {0} is not pending (state: {1:?})")]
    NotPending(String, ReservationState),
    #[error("document store error: {0}")]
    Store(#[from] CasError),
    #[error("gave up retrying compare-and-set after {0} attempts")]
    CasExhausted(u32),
}

impl From<LedgerError> for GatewayError {
    fn from(e: LedgerError) -> Self {
        let kind = match &e {
            LedgerError::Locked => ErrorKind::Locked,
            LedgerError::InsufficientCredits { .. } => ErrorKind::InsufficientCredits,
            LedgerError::ReservationNotFound(_) | LedgerError::NotPending(_, _) => {
                ErrorKind::InvalidInput
            }
            LedgerError::Store(_) | LedgerError::CasExhausted(_) => ErrorKind::Internal,
        };
        GatewayError::new(kind, e.to_string())
    }
}

pub struct CreditLedger {
    store: Arc<dyn DocumentStore>,
    user_locks: DashMap<String, Arc<AsyncMutex<()>>>,
    reservations: DashMap<String, Reservation>,
    ledger_entries: DashMap<String, Vec<LedgerEntry>>,
    reservation_ttl: ChronoDuration,
}

impl CreditLedger {
    pub fn new(store: Arc<dyn DocumentStore>, reservation_ttl: Duration) -> Arc<Self> {
        let ledger = Arc::new(Self {
            store,
            user_locks: DashMap::new(),
            reservations: DashMap::new(),
            ledger_entries: DashMap::new(),
            reservation_ttl: ChronoDuration::from_std(reservation_ttl)
                .unwrap_or(ChronoDuration::hours(24)),
        });
        spawn_reaper(Arc::clone(&ledger));
        ledger
    }

    fn lock_for(&self, user_id: &str) -> Arc<AsyncMutex<()>> {
        Arc::clone(
            self.user_locks
                .entry(user_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    async fn load_account(&self, user_id: &str) -> Result<UserAccount, LedgerError> {
        match self.store.get(ACCOUNTS_COLLECTION, user_id).await? {
            Some(doc) => Ok(serde_json::from_value(doc.value).map_err(|e| {
                LedgerError::Store(CasError::Backend(format!("corrupt account doc: {e}")))
            })?),
            None => Ok(UserAccount::new(user_id, 0)),
        }
    }

    /// Grant credits to a user (used by account top-ups and by test setup).
    /// Not part of `spec.md`'s §4.6 operation list directly, but `grant` is
    /// a named ledger-entry kind (`spec.md` §3), so this is its mutator.
    pub async fn grant(&self, user_id: &str, amount: u32) -> Result<i64, LedgerError> {
        let lock = self.lock_for(user_id);
        let _guard = lock.lock().await;
        let account = self
            .mutate_account(user_id, |acct| {
                acct.balance += amount as i64;
                acct.overdrafted = acct.balance < 0;
                Ok(())
            })
            .await?;
        self.append_entry(
            user_id,
            None,
            LedgerEntryKind::Grant,
            amount as i64,
            account.balance,
        );
        Ok(account.balance)
    }

    /// Pure computation over the current account state; no mutation
    /// (`spec.md` §4.6 `estimate`).
    pub async fn estimate(
        &self,
        user_id: &str,
        estimated_seconds: u32,
    ) -> Result<EstimateResult, LedgerError> {
        let account = self.load_account(user_id).await?;
        let estimated_credits = credits_for_seconds(estimated_seconds);
        let available = account.available();
        Ok(EstimateResult {
            estimated_seconds,
            estimated_credits,
            balance: account.balance,
            available,
            projected: available - estimated_credits as i64,
        })
    }

    /// `spec.md` §4.6 `reserve`: rejects on overdraft or insufficient
    /// available balance; otherwise holds `estimated_credits` and records
    /// a `pending` reservation keyed by `job_id`.
    pub async fn reserve(
        &self,
        user_id: &str,
        job_id: &str,
        estimated_credits: u32,
    ) -> Result<String, LedgerError> {
        let lock = self.lock_for(user_id);
        let _guard = lock.lock().await;

        // Idempotent replay: a caller retrying `reserve` for a job that
        // already holds a pending reservation gets the same id back
        // rather than double-reserving.
        if let Some(existing) = self.reservations.get(job_id) {
            if existing.state == ReservationState::Pending {
                return Ok(existing.id.clone());
            }
        }

        let account = self.load_account(user_id).await?;
        if account.overdrafted {
            return Err(LedgerError::Locked);
        }
        if account.available() < estimated_credits as i64 {
            return Err(LedgerError::InsufficientCredits {
                needed: estimated_credits,
                available: account.available(),
            });
        }

        let account = self
            .mutate_account(user_id, |acct| {
                acct.reserved += estimated_credits as i64;
                Ok(())
            })
            .await?;

        let now = Utc::now();
        let reservation = Reservation {
            id: job_id.to_string(),
            user_id: user_id.to_string(),
            estimated_credits,
            state: ReservationState::Pending,
            created_at: now,
            expires_at: now + self.reservation_ttl,
        };
        self.reservations.insert(job_id.to_string(), reservation);
        self.append_entry(
            user_id,
            Some(job_id),
            LedgerEntryKind::Reserve,
            -(estimated_credits as i64),
            account.balance,
        );
        info!(user_id, job_id, estimated_credits, "reservation created");
        Ok(job_id.to_string())
    }

    /// `spec.md` §4.6 `settle`: requires the reservation to be `pending`.
    pub async fn settle(
        &self,
        user_id: &str,
        job_id: &str,
        actual_seconds: u32,
    ) -> Result<SettleResult, LedgerError> {
        let lock = self.lock_for(user_id);
        let _guard = lock.lock().await;

        let mut reservation = self
            .reservations
            .get(job_id)
            .map(|r| r.clone())
            .ok_or_else(|| LedgerError::ReservationNotFound(job_id.to_string()))?;
        if reservation.state != ReservationState::Pending {
            return Err(LedgerError::NotPending(job_id.to_string(), reservation.state));
        }

        let actual_credits = credits_for_seconds(actual_seconds);
        let estimated_credits = reservation.estimated_credits;
        let account = self
            .mutate_account(user_id, |acct| {
                acct.reserved -= estimated_credits as i64;
                acct.balance -= actual_credits as i64;
                acct.overdrafted = acct.balance < 0;
                Ok(())
            })
            .await?;

        reservation.state = ReservationState::Settled;
        self.reservations.insert(job_id.to_string(), reservation);
        self.append_entry(
            user_id,
            Some(job_id),
            LedgerEntryKind::Settle,
            -(actual_credits as i64),
            account.balance,
        );
        info!(
            user_id,
            job_id, actual_credits, balance = account.balance, "reservation settled"
        );
        Ok(SettleResult {
            actual_credits,
            balance: account.balance,
            overdrafted: account.overdrafted,
        })
    }

    /// `spec.md` §4.6 `release`: idempotent on an already-released (or
    /// settled) reservation.
    pub async fn release(&self, user_id: &str, job_id: &str) -> Result<(), LedgerError> {
        let lock = self.lock_for(user_id);
        let _guard = lock.lock().await;

        let mut reservation = match self.reservations.get(job_id) {
            Some(r) => r.clone(),
            None => return Ok(()),
        };
        if reservation.state != ReservationState::Pending {
            return Ok(());
        }

        let estimated_credits = reservation.estimated_credits;
        let account = self
            .mutate_account(user_id, |acct| {
                acct.reserved -= estimated_credits as i64;
                Ok(())
            })
            .await?;

        reservation.state = ReservationState::Released;
        self.reservations.insert(job_id.to_string(), reservation);
        self.append_entry(
            user_id,
            Some(job_id),
            LedgerEntryKind::Release,
            estimated_credits as i64,
            account.balance,
        );
        info!(user_id, job_id, "reservation released");
        Ok(())
    }

    pub async fn account_snapshot(&self, user_id: &str) -> Result<UserAccount, LedgerError> {
        self.load_account(user_id).await
    }

    pub fn reservation(&self, job_id: &str) -> Option<Reservation> {
        self.reservations.get(job_id).map(|r| r.clone())
    }

    pub fn entries_for(&self, user_id: &str) -> Vec<LedgerEntry> {
        self.ledger_entries
            .get(user_id)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    fn append_entry(
        &self,
        user_id: &str,
        job_id: Option<&str>,
        kind: LedgerEntryKind,
        delta: i64,
        resulting_balance: i64,
    ) {
        self.ledger_entries
            .entry(user_id.to_string())
            .or_default()
            .push(LedgerEntry {
                user_id: user_id.to_string(),
                job_id: job_id.map(str::to_string),
                kind,
                delta,
                resulting_balance,
                at: Utc::now(),
            });
    }

    /// Optimistic compare-and-set retry loop over the account document
    /// (`SPEC_FULL.md` §4.6).
    async fn mutate_account<F>(&self, user_id: &str, f: F) -> Result<UserAccount, LedgerError>
    where
        F: Fn(&mut UserAccount) -> Result<(), LedgerError>,
    {
        for _ in 0..MAX_CAS_RETRIES {
            let existing = self.store.get(ACCOUNTS_COLLECTION, user_id).await?;
            let (mut account, expected_version) = match &existing {
                Some(doc) => (
                    serde_json::from_value::<UserAccount>(doc.value.clone()).map_err(|e| {
                        LedgerError::Store(CasError::Backend(format!("corrupt account doc: {e}")))
                    })?,
                    Some(doc.version),
                ),
                None => (UserAccount::new(user_id, 0), None),
            };
            f(&mut account)?;
            let value = serde_json::to_value(&account).expect("UserAccount always serializes");
            match self
                .store
                .compare_and_set(ACCOUNTS_COLLECTION, user_id, expected_version, value)
                .await
            {
                Ok(_) => return Ok(account),
                Err(CasError::Conflict(_, _, _)) => continue,
                Err(other) => return Err(LedgerError::Store(other)),
            }
        }
        Err(LedgerError::CasExhausted(MAX_CAS_RETRIES))
    }
}

const REAPER_INTERVAL: Duration = Duration::from_secs(60);

/// TTL reaper: releases any `pending` reservation past its expiry every
/// minute (`spec.md` §4.6 "A TTL reaper scans reservations every minute").
fn spawn_reaper(ledger: Arc<CreditLedger>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(REAPER_INTERVAL);
        loop {
            ticker.tick().await;
            let now = Utc::now();
            let expired: Vec<(String, String)> = ledger
                .reservations
                .iter()
                .filter(|e| e.value().state == ReservationState::Pending && e.value().expires_at < now)
                .map(|e| (e.value().user_id.clone(), e.key().clone()))
                .collect();
            for (user_id, job_id) in expired {
                if let Err(e) = ledger.release(&user_id, &job_id).await {
                    warn!(user_id, job_id, error = %e, "TTL reaper failed to release reservation");
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use aria_interfaces::InMemoryDocumentStore;

    fn new_ledger() -> Arc<CreditLedger> {
        CreditLedger::new(Arc::new(InMemoryDocumentStore::new()), Duration::from_secs(86_400))
    }

    #[tokio::test]
    async fn estimate_is_pure_and_matches_scenario_one() {
        let ledger = new_ledger();
        ledger.grant("u1", 10).await.unwrap();
        let est = ledger.estimate("u1", 45).await.unwrap();
        assert_eq!(est.estimated_credits, 2);
        assert_eq!(est.available, 10);
        assert_eq!(est.projected, 8);

        // Pure: calling it again doesn't change anything.
        let est2 = ledger.estimate("u1", 45).await.unwrap();
        assert_eq!(est2.balance, 10);
    }

    #[tokio::test]
    async fn reserve_settle_happy_path_matches_scenario_one() {
        let ledger = new_ledger();
        ledger.grant("u1", 10).await.unwrap();

        let reservation_id = ledger.reserve("u1", "job-1", 2).await.unwrap();
        assert_eq!(reservation_id, "job-1");
        let acct = ledger.account_snapshot("u1").await.unwrap();
        assert_eq!(acct.reserved, 2);
        assert_eq!(acct.available(), 8);

        let settled = ledger.settle("u1", "job-1", 46).await.unwrap();
        assert_eq!(settled.actual_credits, 2);
        assert_eq!(settled.balance, 8);
        assert!(!settled.overdrafted);

        let acct = ledger.account_snapshot("u1").await.unwrap();
        assert_eq!(acct.reserved, 0);
        assert_eq!(
            ledger.reservation("job-1").unwrap().state,
            ReservationState::Settled
        );
    }

    #[tokio::test]
    async fn reserve_fails_insufficient_credits_matches_scenario_two() {
        let ledger = new_ledger();
        ledger.grant("u1", 1).await.unwrap();

        let err = ledger.reserve("u1", "job-1", 2).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientCredits { .. }));
        assert!(ledger.reservation("job-1").is_none());
        let acct = ledger.account_snapshot("u1").await.unwrap();
        assert_eq!(acct.balance, 1);
        assert_eq!(acct.reserved, 0);
    }

    #[tokio::test]
    async fn reserve_release_reserve_is_idempotent_on_balance() {
        let ledger = new_ledger();
        ledger.grant("u1", 10).await.unwrap();

        ledger.reserve("u1", "job-1", 3).await.unwrap();
        ledger.release("u1", "job-1").await.unwrap();
        let id2 = ledger.reserve("u1", "job-1", 3).await.unwrap();
        assert_eq!(id2, "job-1");

        let acct = ledger.account_snapshot("u1").await.unwrap();
        assert_eq!(acct.balance, 10);
        assert_eq!(acct.reserved, 3);
    }

    #[tokio::test]
    async fn release_on_already_released_is_a_no_op() {
        let ledger = new_ledger();
        ledger.grant("u1", 10).await.unwrap();
        ledger.reserve("u1", "job-1", 3).await.unwrap();

        ledger.release("u1", "job-1").await.unwrap();
        ledger.release("u1", "job-1").await.unwrap();

        let acct = ledger.account_snapshot("u1").await.unwrap();
        assert_eq!(acct.reserved, 0);
        assert_eq!(acct.balance, 10);
    }

    #[tokio::test]
    async fn overdraft_flips_on_settle_and_blocks_future_reserves() {
        let ledger = new_ledger();
        ledger.grant("u1", 1).await.unwrap();
        ledger.reserve("u1", "job-1", 1).await.unwrap();

        let settled = ledger.settle("u1", "job-1", 61).await.unwrap(); // 3 credits
        assert!(settled.overdrafted);
        assert_eq!(settled.balance, -2);

        let err = ledger.reserve("u1", "job-2", 1).await.unwrap_err();
        assert!(matches!(err, LedgerError::Locked));
    }

    #[tokio::test]
    async fn settle_requires_pending_reservation() {
        let ledger = new_ledger();
        ledger.grant("u1", 10).await.unwrap();
        ledger.reserve("u1", "job-1", 2).await.unwrap();
        ledger.settle("u1", "job-1", 45).await.unwrap();

        let err = ledger.settle("u1", "job-1", 45).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotPending(_, _)));
    }
}
