//! Per-class worker subprocess lifecycle management (`spec.md` §4.2,
//! component C2): spawn, readiness probing, restart with backoff, and
//! class-specific concurrency gating.

pub mod backoff;
pub mod error;
pub mod pool;
pub mod worker;

pub use backoff::Backoff;
pub use error::PoolError;
pub use pool::{PoolConfig, WorkerHandle, WorkerPool};
pub use worker::{Worker, WorkerSpawnSpec};
