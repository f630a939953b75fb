//! Runtime configuration, loadable from TOML or JSON.
//!
//! ```toml
//! wire_format = "cbor"
//! max_frame_bytes = 65536
//!
//! [reorder]
//! enabled = true
//! max_pending = 32
//!
//! [reconnect]
//! strategy = "exponential"
//! base_ms = 250
//! max_ms = 8000
//! max_attempts = 6
//!
//! [render]
//! batch = true
//!
//! [diagnostics]
//! send_to_host = true
//! history = 64
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use widget_sync_core::WireFormat;

use crate::reconnect::{ExponentialBackoff, FixedInterval, NoReconnect, ReconnectPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Encoding of outbound frames. Inbound frames are decoded by their type.
    pub wire_format: WireFormat,
    pub reorder: ReorderConfig,
    pub reconnect: ReconnectConfig,
    pub render: RenderConfig,
    pub diagnostics: DiagnosticsConfig,
    /// Inbound frames above this size are rejected.
    pub max_frame_bytes: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            wire_format: WireFormat::Json,
            reorder: ReorderConfig::default(),
            reconnect: ReconnectConfig::default(),
            render: RenderConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
            max_frame_bytes: 1 << 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReorderConfig {
    pub enabled: bool,
    /// Early messages held per model before a gap is given up on.
    pub max_pending: usize,
}

impl Default for ReorderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_pending: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectStrategy {
    None,
    Fixed,
    #[default]
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub strategy: ReconnectStrategy,
    pub base_ms: u64,
    pub max_ms: u64,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            strategy: ReconnectStrategy::Exponential,
            base_ms: 250,
            max_ms: 10_000,
            max_attempts: Some(8),
        }
    }
}

impl ReconnectConfig {
    pub fn policy(&self) -> Box<dyn ReconnectPolicy> {
        let base = Duration::from_millis(self.base_ms);
        match self.strategy {
            ReconnectStrategy::None => Box::new(NoReconnect),
            ReconnectStrategy::Fixed => Box::new(FixedInterval::new(base, self.max_attempts)),
            ReconnectStrategy::Exponential => Box::new(ExponentialBackoff::new(
                base,
                Duration::from_millis(self.max_ms),
                self.max_attempts,
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Coalesce renders per binding and flush once per poll.
    pub batch: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub send_to_host: bool,
    /// Diagnostics retained locally, oldest dropped first.
    pub history: usize,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            send_to_host: true,
            history: 128,
        }
    }
}

impl SyncConfig {
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(src)?;
        config.validate()
    }

    pub fn from_json_str(src: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(src)?;
        config.validate()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.max_frame_bytes == 0 {
            return Err(ConfigError::Invalid("max_frame_bytes must be positive".into()));
        }
        if self.reorder.enabled && self.reorder.max_pending == 0 {
            return Err(ConfigError::Invalid(
                "reorder.max_pending must be positive when reordering is enabled".into(),
            ));
        }
        if self.reconnect.strategy == ReconnectStrategy::Exponential
            && self.reconnect.max_ms < self.reconnect.base_ms
        {
            return Err(ConfigError::Invalid(
                "reconnect.max_ms must not be below reconnect.base_ms".into(),
            ));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_documents_yield_defaults() {
        assert_eq!(SyncConfig::from_toml_str("").unwrap(), SyncConfig::default());
        assert_eq!(SyncConfig::from_json_str("{}").unwrap(), SyncConfig::default());
    }

    #[test]
    fn toml_overrides_nested_sections() {
        let config = SyncConfig::from_toml_str(
            r#"
            wire_format = "cbor"
            [reorder]
            max_pending = 4
            [reconnect]
            strategy = "fixed"
            base_ms = 100
            [render]
            batch = true
            "#,
        )
        .unwrap();
        assert_eq!(config.wire_format, WireFormat::Cbor);
        assert!(config.reorder.enabled);
        assert_eq!(config.reorder.max_pending, 4);
        assert_eq!(config.reconnect.strategy, ReconnectStrategy::Fixed);
        assert!(config.render.batch);
        let policy = config.reconnect.policy();
        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(100)));
    }

    #[test]
    fn json_config_and_validation() {
        let config =
            SyncConfig::from_json_str(r#"{"reconnect":{"strategy":"none"},"diagnostics":{"history":2}}"#)
                .unwrap();
        assert_eq!(config.reconnect.policy().next_delay(1), None);
        assert_eq!(config.diagnostics.history, 2);

        assert!(matches!(
            SyncConfig::from_json_str(r#"{"max_frame_bytes":0}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SyncConfig::from_toml_str("wire_format = 3"),
            Err(ConfigError::Toml(_))
        ));
        assert!(matches!(
            SyncConfig::from_json_str("{"),
            Err(ConfigError::Json(_))
        ));
    }
}
