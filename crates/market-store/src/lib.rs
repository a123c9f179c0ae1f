//! SQLite-backed market state: symbol universe, frozen snapshots, regimes,
//! per-snapshot evaluations, operator alerts, and config freeze state.

pub mod alerts;
pub mod csv_source;
pub mod db;
pub mod evaluations;
pub mod freeze_state;
pub mod regime;
pub mod snapshot;
pub mod universe;

pub use alerts::Alert;
pub use db::MarketStore;
pub use evaluations::CspEvaluation;
pub use freeze_state::FreezeState;
pub use snapshot::{BuildOptions, BENCHMARKS};
