//! Engine configuration.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;

use facturo_authority::Environment;

/// Configuration for one deployment of the engine.
///
/// Loadable from a `facturo` config file and `FACTURO_*` environment
/// variables; every field has a workable default for dev setups.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Point-of-sale identifier registered with the tax authority.
    pub sales_point: u16,
    pub environment: Environment,
    /// Upper bound on a single authorization call; on expiry the document
    /// stays pending and the call counts as authority-unavailable.
    pub authorize_timeout_secs: u64,
    /// Rate applied when a line does not specify one.
    pub default_vat_rate: Decimal,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sales_point: 1,
            environment: Environment::Development,
            authorize_timeout_secs: 30,
            default_vat_rate: Decimal::from(21u32),
        }
    }
}

impl EngineConfig {
    pub fn authorize_timeout(&self) -> Duration {
        Duration::from_secs(self.authorize_timeout_secs)
    }

    /// Load from `facturo.*` (if present) overridden by `FACTURO_*`
    /// environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name("facturo").required(false))
            .add_source(config::Environment::with_prefix("FACTURO"))
            .build()?
            .try_deserialize()
    }
}
