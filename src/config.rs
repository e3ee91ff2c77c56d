use crate::error::TxnError;
use serde::{Deserialize, Serialize};

pub const ENV_ENABLE_SAVEPOINTS: &str = "TXN_ENABLE_SAVEPOINTS";
pub const ENV_MAX_APPLY_BATCH_RECORDS: &str = "TXN_MAX_APPLY_BATCH_RECORDS";
pub const ENV_CHUNK_APPLY_TIMEOUT_MS: &str = "TXN_CHUNK_APPLY_TIMEOUT_MS";

/// Runtime configuration shared by every transaction a manager begins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnConfig {
    pub savepoints_enabled: bool,
    /// Upper bound on live intents flushed to storage in one chunk at commit.
    pub max_apply_batch_records: usize,
    pub chunk_apply_timeout_ms: u64,
    pub finalize_timeout_ms: u64,
    pub max_intents_per_txn: usize,
    pub max_savepoint_depth: usize,
}

impl Default for TxnConfig {
    fn default() -> Self {
        Self {
            savepoints_enabled: true,
            max_apply_batch_records: 100_000,
            chunk_apply_timeout_ms: 5_000,
            finalize_timeout_ms: 5_000,
            max_intents_per_txn: 10_000_000,
            max_savepoint_depth: 65_536,
        }
    }
}

impl TxnConfig {
    /// Tiny apply threshold so ordinary workloads span many chunks.
    pub fn small_batches(max_apply_batch_records: usize) -> Self {
        Self {
            max_apply_batch_records,
            ..Self::default()
        }
    }

    pub fn with_apply_batch_records(mut self, records: usize) -> Self {
        self.max_apply_batch_records = records;
        self
    }

    pub fn with_savepoints(mut self, enabled: bool) -> Self {
        self.savepoints_enabled = enabled;
        self
    }

    /// Defaults overlaid with any `TXN_*` environment variables that parse.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(enabled) = lookup(ENV_ENABLE_SAVEPOINTS).and_then(|v| parse_bool(&v)) {
            config.savepoints_enabled = enabled;
        }
        if let Some(records) = lookup(ENV_MAX_APPLY_BATCH_RECORDS).and_then(|v| v.parse().ok()) {
            config.max_apply_batch_records = records;
        }
        if let Some(ms) = lookup(ENV_CHUNK_APPLY_TIMEOUT_MS).and_then(|v| v.parse().ok()) {
            config.chunk_apply_timeout_ms = ms;
        }
        config
    }

    pub fn validate(&self) -> Result<(), TxnError> {
        if self.max_apply_batch_records == 0 {
            return Err(TxnError::InvalidConfig {
                message: "max_apply_batch_records must be > 0".into(),
            });
        }
        if self.chunk_apply_timeout_ms == 0 {
            return Err(TxnError::InvalidConfig {
                message: "chunk_apply_timeout_ms must be > 0".into(),
            });
        }
        if self.finalize_timeout_ms == 0 {
            return Err(TxnError::InvalidConfig {
                message: "finalize_timeout_ms must be > 0".into(),
            });
        }
        if self.max_intents_per_txn == 0 {
            return Err(TxnError::InvalidConfig {
                message: "max_intents_per_txn must be > 0".into(),
            });
        }
        if self.max_savepoint_depth == 0 {
            return Err(TxnError::InvalidConfig {
                message: "max_savepoint_depth must be > 0".into(),
            });
        }
        Ok(())
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
