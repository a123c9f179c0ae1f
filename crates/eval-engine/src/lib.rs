//! Staged evaluation engine: symbol-level gates and scoring (stage 1),
//! options-chain contract selection (stage 2), producing one
//! `DecisionArtifactV2` per run.

pub mod contracts;
pub mod gates;
pub mod providers;
pub mod scoring;
pub mod service;

pub use contracts::{select_contract, ContractFilters, ContractSelection};
pub use gates::{run_hard_gates, GateConfig, GateInputs, GateOutcome};
pub use providers::{HttpChainProvider, StaticChainProvider};
pub use scoring::{compute_score, ScoreBreakdown, ScoringConfig, UniversePriority};
pub use service::EvaluationEngine;
