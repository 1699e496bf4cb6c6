//! Ring overlay configuration.
//!
//! The four knobs named in the spec's external-interfaces section,
//! validated at construction so an invalid `RingConfig` can never exist.

use serde::Deserialize;

use crate::error::ConfigError;

/// Validated configuration for RM-TMan and the random peer cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingConfig {
    pred_list_length: u32,
    succ_list_length: u32,
    cyclon_cache_size: u32,
    stabilization_interval_base_ms: u64,
}

/// Raw, unvalidated shape deserialized from a TOML document.
#[derive(Debug, Deserialize)]
struct RawRingConfig {
    pred_list_length: u32,
    succ_list_length: u32,
    cyclon_cache_size: u32,
    stabilization_interval_base: u64,
}

impl RingConfig {
    /// Construct and validate a configuration from explicit values.
    pub fn new(
        pred_list_length: u32,
        succ_list_length: u32,
        cyclon_cache_size: u32,
        stabilization_interval_base_ms: u64,
    ) -> Result<Self, ConfigError> {
        if pred_list_length == 0 {
            return Err(ConfigError::ZeroListLength("pred_list_length"));
        }
        if succ_list_length == 0 {
            return Err(ConfigError::ZeroListLength("succ_list_length"));
        }
        if cyclon_cache_size < 3 {
            return Err(ConfigError::CacheTooSmall(cyclon_cache_size));
        }
        if stabilization_interval_base_ms == 0 {
            return Err(ConfigError::ZeroStabilizationInterval);
        }
        Ok(Self {
            pred_list_length,
            succ_list_length,
            cyclon_cache_size,
            stabilization_interval_base_ms,
        })
    }

    /// Parse and validate a configuration from a TOML document.
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        let raw: RawRingConfig =
            toml::from_str(src).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        Self::new(
            raw.pred_list_length,
            raw.succ_list_length,
            raw.cyclon_cache_size,
            raw.stabilization_interval_base,
        )
    }

    /// Reasonable defaults for local demos and tests: 4 predecessors, 4
    /// successors, an 8-entry peer cache, 200ms gossip period.
    pub fn defaults() -> Self {
        Self::new(4, 4, 8, 200).expect("defaults are always valid")
    }

    pub fn pred_list_length(&self) -> u32 {
        self.pred_list_length
    }

    pub fn succ_list_length(&self) -> u32 {
        self.succ_list_length
    }

    pub fn cyclon_cache_size(&self) -> u32 {
        self.cyclon_cache_size
    }

    pub fn stabilization_interval_base_ms(&self) -> u64 {
        self.stabilization_interval_base_ms
    }
}

impl Default for RingConfig {
    fn default() -> Self {
        Self::defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_pred_list_length() {
        assert_eq!(
            RingConfig::new(0, 4, 8, 200),
            Err(ConfigError::ZeroListLength("pred_list_length"))
        );
    }

    #[test]
    fn rejects_small_cache() {
        assert_eq!(
            RingConfig::new(4, 4, 2, 200),
            Err(ConfigError::CacheTooSmall(2))
        );
    }

    #[test]
    fn rejects_zero_stabilization_interval() {
        assert_eq!(
            RingConfig::new(4, 4, 8, 0),
            Err(ConfigError::ZeroStabilizationInterval)
        );
    }

    #[test]
    fn parses_valid_toml() {
        let toml_src = r#"
            pred_list_length = 3
            succ_list_length = 5
            cyclon_cache_size = 10
            stabilization_interval_base = 500
        "#;
        let cfg = RingConfig::from_toml_str(toml_src).unwrap();
        assert_eq!(cfg.pred_list_length(), 3);
        assert_eq!(cfg.succ_list_length(), 5);
        assert_eq!(cfg.cyclon_cache_size(), 10);
        assert_eq!(cfg.stabilization_interval_base_ms(), 500);
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(matches!(
            RingConfig::from_toml_str("not valid toml ["),
            Err(ConfigError::Malformed(_))
        ));
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = RingConfig::defaults();
        assert_eq!(cfg.pred_list_length(), 4);
        assert_eq!(cfg.succ_list_length(), 4);
    }
}
