//! Exponential backoff schedule for worker restarts (`spec.md` §4.2:
//! "250 ms, 500 ms, 1 s, capped at 5 s" — prescriptive per the REDESIGN
//! FLAGS resolution in `SPEC_FULL.md`).

use std::time::Duration;

const SCHEDULE_MS: [u64; 3] = [250, 500, 1_000];
const CAP_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, Default)]
pub struct Backoff;

impl Backoff {
    /// `attempt` is 1-based (first restart attempt == 1).
    pub fn delay_for(attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let idx = (attempt - 1) as usize;
        let ms = SCHEDULE_MS.get(idx).copied().unwrap_or(CAP_MS);
        Duration::from_millis(ms.min(CAP_MS))
    }
}
