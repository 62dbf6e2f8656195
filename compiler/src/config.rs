//! Lowering configuration
//!
//! Controls the optional parts of the pass. Presets mirror the usual
//! development / release split; individual switches are set with the
//! builder-style `with_*` methods or read from a TOML table.

use serde::{Deserialize, Serialize};

/// Configuration for a lowering run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoweringConfig {
    /// Verify every function after it has been lowered
    pub verify_functions: bool,

    /// Log function and module dumps when verification fails
    pub dump_on_verification_failure: bool,

    /// Replace calls to constant factories (`listOf`, `arrayOf`) with static
    /// aggregates when every element is a constant
    pub fold_constant_factories: bool,

    /// Remove blocks unreachable from the entry after lowering a function
    pub prune_unreachable_blocks: bool,

    /// Attach human-readable labels to created blocks
    pub emit_block_labels: bool,

    /// Name of the produced module
    pub module_name: String,
}

impl Default for LoweringConfig {
    fn default() -> Self {
        Self {
            verify_functions: true,
            dump_on_verification_failure: true,
            fold_constant_factories: true,
            prune_unreachable_blocks: true,
            emit_block_labels: true,
            module_name: "main".to_string(),
        }
    }
}

impl LoweringConfig {
    /// Configuration for development builds: everything checked and labeled
    pub fn development() -> Self {
        Self::default()
    }

    /// Configuration for release builds: no labels, no dumps
    pub fn release() -> Self {
        Self {
            verify_functions: true,
            dump_on_verification_failure: false,
            fold_constant_factories: true,
            prune_unreachable_blocks: true,
            emit_block_labels: false,
            module_name: "main".to_string(),
        }
    }

    /// Parse a configuration from TOML; missing keys take default values
    pub fn from_toml_str(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| format!("Failed to parse lowering config: {}", e))
    }

    pub fn with_verification(mut self, enabled: bool) -> Self {
        self.verify_functions = enabled;
        self
    }

    pub fn with_verification_dumps(mut self, enabled: bool) -> Self {
        self.dump_on_verification_failure = enabled;
        self
    }

    pub fn with_constant_folding(mut self, enabled: bool) -> Self {
        self.fold_constant_factories = enabled;
        self
    }

    pub fn with_pruning(mut self, enabled: bool) -> Self {
        self.prune_unreachable_blocks = enabled;
        self
    }

    pub fn with_block_labels(mut self, enabled: bool) -> Self {
        self.emit_block_labels = enabled;
        self
    }

    pub fn with_module_name(mut self, name: impl Into<String>) -> Self {
        self.module_name = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let dev = LoweringConfig::development();
        assert!(dev.emit_block_labels);
        assert!(dev.dump_on_verification_failure);

        let release = LoweringConfig::release();
        assert!(!release.emit_block_labels);
        assert!(release.verify_functions);
    }

    #[test]
    fn test_from_toml_uses_defaults_for_missing_keys() {
        let config = LoweringConfig::from_toml_str(
            r#"
            module_name = "app"
            fold_constant_factories = false
            "#,
        )
        .unwrap();
        assert_eq!(config.module_name, "app");
        assert!(!config.fold_constant_factories);
        assert!(config.verify_functions);
    }

    #[test]
    fn test_from_toml_rejects_bad_types() {
        assert!(LoweringConfig::from_toml_str("verify_functions = 3").is_err());
    }

    #[test]
    fn test_builder_setters() {
        let config = LoweringConfig::default()
            .with_pruning(false)
            .with_module_name("lib");
        assert!(!config.prune_unreachable_blocks);
        assert_eq!(config.module_name, "lib");
    }
}
