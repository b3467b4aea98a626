use serde::{Deserialize, Serialize};

/// Limits applied when a campaign is created.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LedgerConfig {
    pub max_description_len: usize,
    pub max_duration_days: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_description_len: 1_024,
            max_duration_days: 3_650,
        }
    }
}
