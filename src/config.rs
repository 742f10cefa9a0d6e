//! Catalog configuration
//!
//! Ceilings on manually created entities. Automatic entities are never
//! counted against these.
//!
//! ```rust
//! use lineage_db::config::CatalogConfig;
//!
//! let config = CatalogConfig::from_json_str(r#"{ "limits": { "contexts": 50 } }"#)?;
//! assert_eq!(config.limits.contexts, 50);
//! assert_eq!(config.limits.artifacts, 6000);
//! # Ok::<(), lineage_db::Error>(())
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CapacityClass;
use crate::{Error, Result};

/// Default ceiling for manually created artifacts
pub const DEFAULT_MAX_ARTIFACTS: usize = 6000;
/// Default ceiling for manually created contexts
pub const DEFAULT_MAX_CONTEXTS: usize = 500;
/// Default ceiling for manually created actions
pub const DEFAULT_MAX_ACTIONS: usize = 3000;
/// Default ceiling for manually created associations
pub const DEFAULT_MAX_ASSOCIATIONS: usize = 6000;

/// Per-kind manual entity ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityLimits {
    /// Maximum manual artifacts
    pub artifacts: usize,
    /// Maximum manual contexts
    pub contexts: usize,
    /// Maximum manual actions
    pub actions: usize,
    /// Maximum manual associations
    pub associations: usize,
}

impl Default for CapacityLimits {
    fn default() -> Self {
        Self {
            artifacts: DEFAULT_MAX_ARTIFACTS,
            contexts: DEFAULT_MAX_CONTEXTS,
            actions: DEFAULT_MAX_ACTIONS,
            associations: DEFAULT_MAX_ASSOCIATIONS,
        }
    }
}

impl CapacityLimits {
    /// Ceiling for one counter.
    #[must_use]
    pub const fn limit(&self, class: CapacityClass) -> usize {
        match class {
            CapacityClass::Artifacts => self.artifacts,
            CapacityClass::Actions => self.actions,
            CapacityClass::Contexts => self.contexts,
            CapacityClass::Associations => self.associations,
        }
    }
}

/// Catalog configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Manual entity ceilings
    pub limits: CapacityLimits,
}

impl CatalogConfig {
    /// Parse and validate a JSON configuration.
    ///
    /// Missing fields fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the JSON is malformed or a ceiling is zero.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("failed to parse catalog config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be read, `Error::Config` if its
    /// contents are invalid.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    /// Check that every ceiling admits at least one entity.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the first zero ceiling.
    pub fn validate(&self) -> Result<()> {
        for class in [
            CapacityClass::Artifacts,
            CapacityClass::Actions,
            CapacityClass::Contexts,
            CapacityClass::Associations,
        ] {
            if self.limits.limit(class) == 0 {
                return Err(Error::Config(format!(
                    "ceiling for {class} must be greater than zero"
                )));
            }
        }
        Ok(())
    }
}
