//! Reconciler Configuration
//!
//! Tunables for the concurrency core. Every field has a default matching the
//! behaviour callers expect out of the box, so an empty JSON object is a valid
//! configuration.
//!
//! # Example
//!
//! ```rust
//! use reconciler_core::config::ReconcilerConfig;
//!
//! let config = ReconcilerConfig::from_json(r#"{ "nested_update_limit": 10 }"#).unwrap();
//! assert_eq!(config.nested_update_limit, 10);
//! assert_eq!(config.rerender_limit, 25);
//! ```

use serde::{Deserialize, Serialize};

use crate::context::RendererSlot;
use crate::error::ConfigError;
use crate::scheduler::SchedulerPriority;

/// Configuration for a [`Reconciler`](crate::runtime::Reconciler) instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// How many synchronous re-entrant commits one root may receive before
    /// the update loop guard fails.
    pub nested_update_limit: u32,

    /// How many consecutive render-phase re-renders are allowed.
    pub rerender_limit: u32,

    /// Which context value slot this renderer reads and writes.
    pub renderer_slot: RendererSlot,

    /// Expiration timeouts used for starvation detection.
    pub expiration: ExpirationConfig,

    /// Whether the process-wide default transition indicator is enabled.
    pub default_transition_indicator: bool,

    /// Emit misuse diagnostics. Defaults to on in debug builds only.
    pub diagnostics: bool,

    /// Priority used to schedule a cache's deferred abort.
    pub cache_abort_priority: SchedulerPriority,
}

/// Milliseconds after which a pending lane is considered starved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpirationConfig {
    /// Sync and continuous input lanes.
    pub sync_ms: u64,
    /// Default and transition lanes.
    pub transition_ms: u64,
}

impl Default for ExpirationConfig {
    fn default() -> Self {
        Self {
            sync_ms: 250,
            transition_ms: 5000,
        }
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            nested_update_limit: 50,
            rerender_limit: 25,
            renderer_slot: RendererSlot::Primary,
            expiration: ExpirationConfig::default(),
            default_transition_indicator: true,
            diagnostics: cfg!(debug_assertions),
            cache_abort_priority: SchedulerPriority::Low,
        }
    }
}

impl ReconcilerConfig {
    /// Parse and validate a configuration from JSON.
    pub fn from_json(input: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject limits that would make every update fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nested_update_limit == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "nested_update_limit",
            });
        }
        if self.rerender_limit == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "rerender_limit",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_uses_defaults() {
        let config = ReconcilerConfig::from_json("{}").unwrap();
        assert_eq!(config, ReconcilerConfig::default());
    }

    #[test]
    fn partial_override() {
        let config = ReconcilerConfig::from_json(
            r#"{ "renderer_slot": "secondary", "expiration": { "sync_ms": 100 } }"#,
        )
        .unwrap();

        assert_eq!(config.renderer_slot, RendererSlot::Secondary);
        assert_eq!(config.expiration.sync_ms, 100);
        assert_eq!(config.expiration.transition_ms, 5000);
    }

    #[test]
    fn zero_limits_are_rejected() {
        let err = ReconcilerConfig::from_json(r#"{ "rerender_limit": 0 }"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ZeroLimit {
                field: "rerender_limit"
            }
        ));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = ReconcilerConfig::from_json("{ nope").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
