//! Durable decision artifact store plus the freeze/EOD discipline layer:
//! atomic latest-file replacement, per-run history, the active-path rule,
//! end-of-day archives, and the config-hash freeze guard.

pub mod freeze;
pub mod guard;
pub mod store;

pub use freeze::{enforce_market_open, latest_eod_snapshot, run_freeze_snapshot, FreezeOutcome};
pub use guard::{check_freeze, record_run, FreezeCheck};
pub use store::{DecisionStore, SymbolSlice};
