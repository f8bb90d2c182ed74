//! The runtime's single configuration record.
//!
//! Per-subsystem `*Config` structs, each `Default`-constructible,
//! aggregated under one top-level record, rather than parsed from a
//! file — file/env parsing is explicitly out of scope.

use std::time::Duration;

/// Backoff tuning for the remote invocation engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 10,
            attempts: 4,
        }
    }
}

/// Tabular store / table-actor mapping tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableConfig {
    pub shard_count: u32,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self { shard_count: 1 }
    }
}

/// Preferred wire envelope on encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferredWire {
    Jb,
    Mime,
    Bson,
}

impl Default for PreferredWire {
    fn default() -> Self {
        PreferredWire::Jb
    }
}

/// Wire serialization tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WireConfig {
    pub preferred: PreferredWire,
    pub inline_blob_threshold: usize,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            preferred: PreferredWire::default(),
            inline_blob_threshold: 64,
        }
    }
}

/// Aggregate configuration record for the whole runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RuntimeConfig {
    pub backoff: BackoffConfig,
    pub table: TableConfig,
    pub wire: WireConfig,
}

impl BackoffConfig {
    pub fn base(&self) -> Duration {
        Duration::from_millis(self.base_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.backoff.base_ms, 10);
        assert_eq!(cfg.backoff.attempts, 4);
        assert_eq!(cfg.table.shard_count, 1);
        assert_eq!(cfg.wire.preferred, PreferredWire::Jb);
        assert_eq!(cfg.wire.inline_blob_threshold, 64);
    }
}
