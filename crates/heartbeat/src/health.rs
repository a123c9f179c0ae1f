use chakra_core::HeartbeatStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// Published scheduler health, returned by value from the accessor.
#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatHealth {
    pub last_cycle_time: Option<DateTime<Utc>>,
    pub status: HeartbeatStatus,
    pub data_timestamp: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub is_running: bool,
}

impl Default for HeartbeatHealth {
    fn default() -> Self {
        Self {
            last_cycle_time: None,
            status: HeartbeatStatus::Unknown,
            data_timestamp: None,
            last_error: None,
            is_running: false,
        }
    }
}

/// Last-cycle evaluation details for the operator debug panel.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleStats {
    pub symbols_evaluated: usize,
    pub candidates_count: usize,
    pub rejected_symbols_count: usize,
    pub rejection_reasons: HashMap<String, usize>,
    pub market_data_age_minutes: f64,
    pub enabled_universe_size: usize,
}

impl CycleStats {
    pub fn skipped(reason: &str, universe_size: usize) -> Self {
        Self {
            rejected_symbols_count: universe_size,
            rejection_reasons: HashMap::from([(reason.to_string(), universe_size.max(1))]),
            enabled_universe_size: universe_size,
            ..Self::default()
        }
    }
}
