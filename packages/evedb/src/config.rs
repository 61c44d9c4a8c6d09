//! Store configuration.
//!
//! The core never loads configuration files on its own; embedding
//! applications deserialize a [`StoreConfig`] and hand it down.

use serde::Deserialize;

/// Default partition capacity in rows.
pub const DEFAULT_PARTITION_CAPACITY: u64 = 1_048_576;

/// Default Bloom synopsis false-positive rate.
pub const DEFAULT_BLOOM_FPR: f64 = 0.01;

/// Default maximum rows per table slice produced by readers.
pub const DEFAULT_MAX_SLICE_SIZE: usize = 65_536;

/// Tunables for partition building and synopsis sizing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Rows accepted by an active partition before it seals.
    pub partition_capacity: u64,
    /// Target false-positive rate for Bloom synopses.
    pub bloom_fpr: f64,
    /// Expected distinct values per Bloom synopsis, used for sizing.
    pub bloom_capacity: usize,
    /// Upper bound on rows per slice emitted by readers.
    pub max_slice_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            partition_capacity: DEFAULT_PARTITION_CAPACITY,
            bloom_fpr: DEFAULT_BLOOM_FPR,
            bloom_capacity: DEFAULT_PARTITION_CAPACITY as usize,
            max_slice_size: DEFAULT_MAX_SLICE_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = StoreConfig::default();
        assert_eq!(cfg.partition_capacity, DEFAULT_PARTITION_CAPACITY);
        assert_eq!(cfg.bloom_fpr, DEFAULT_BLOOM_FPR);
        assert_eq!(cfg.max_slice_size, DEFAULT_MAX_SLICE_SIZE);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: StoreConfig = serde_json::from_str(r#"{"partition_capacity": 1024}"#).unwrap();
        assert_eq!(cfg.partition_capacity, 1024);
        assert_eq!(cfg.bloom_fpr, DEFAULT_BLOOM_FPR);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let res: std::result::Result<StoreConfig, _> =
            serde_json::from_str(r#"{"partition_cap": 1024}"#);
        assert!(res.is_err());
    }
}
