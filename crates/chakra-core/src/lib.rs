//! Shared types, errors, and configuration for the ChakraOps core.

pub mod artifact;
pub mod config;
pub mod error;
pub mod hours;
pub mod provider;
pub mod symbol;
pub mod types;

pub use artifact::{
    assign_band, band_reason, compute_rank_score, ArtifactMetadata, CandidateRow,
    DecisionArtifactV2, EarningsInfo, GateEvaluation, SymbolDiagnostics, SymbolEvalSummary,
    ARTIFACT_VERSION,
};
pub use config::CoreConfig;
pub use error::ChakraError;
pub use hours::{get_market_phase, is_market_open};
pub use provider::{OptionChain, OptionContract, OptionRight, OptionsChainProvider};
pub use symbol::normalize_symbol;
pub use types::*;
