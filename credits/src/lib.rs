//! Credit reservation/settlement state machine (`spec.md` §4.6,
//! component C6): gates synthesis, guarantees at-most-one charge per job,
//! releases on failure/timeout.

pub mod ledger;
pub mod model;

pub use ledger::{CreditLedger, LedgerError};
pub use model::{
    credits_for_seconds, EstimateResult, LedgerEntry, LedgerEntryKind, Reservation,
    ReservationState, SettleResult, UserAccount, SECONDS_PER_CREDIT,
};
