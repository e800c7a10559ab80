//! Execution context configuration

use serde::Deserialize;
use std::time::Duration;

/// What a write to a read-only property does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadOnlyPolicy {
    /// The write is silently dropped (sloppy mode)
    #[default]
    Ignore,
    /// The write throws a TypeError (strict mode)
    Throw,
}

/// Tunables of a [`crate::Vm`].
///
/// Every field has a default, so a JSON configuration only needs the keys it
/// changes.
///
/// # Example
///
/// ```
/// use interpreter::{ReadOnlyPolicy, VmConfig};
///
/// let config = VmConfig::from_json_str(r#"{ "max_call_depth": 64, "read_only_policy": "throw" }"#).unwrap();
/// assert_eq!(config.max_call_depth, 64);
/// assert_eq!(config.read_only_policy, ReadOnlyPolicy::Throw);
/// assert!(config.inline_caching);
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Live bytes that trigger the first collection
    pub gc_threshold_bytes: usize,
    /// Hard heap limit; allocations past it fail with out-of-memory
    pub max_heap_bytes: usize,
    /// Maximum number of script frames
    pub max_call_depth: usize,
    /// Maximum number of registers across all frames
    pub register_file_capacity: usize,
    /// Maximum nesting of host-to-script calls
    pub max_reentry_depth: usize,
    /// Whether property and call sites use inline caches
    pub inline_caching: bool,
    /// Behavior of writes to read-only properties
    pub read_only_policy: ReadOnlyPolicy,
    /// Calls before a function is handed to the installed compiler tier
    pub tier_up_threshold: u32,
    /// Watchdog limit for one top-level invocation
    pub time_limit_ms: Option<u64>,
    /// Interrupt checks between clock reads
    pub ticks_per_check: u32,
}

impl VmConfig {
    /// Parse a configuration from JSON, filling unspecified fields with defaults
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// The watchdog limit as a duration
    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit_ms.map(Duration::from_millis)
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            gc_threshold_bytes: 1024 * 1024,
            max_heap_bytes: 256 * 1024 * 1024,
            max_call_depth: 1000,
            register_file_capacity: 256 * 1024,
            max_reentry_depth: 128,
            inline_caching: true,
            read_only_policy: ReadOnlyPolicy::Ignore,
            tier_up_threshold: 100,
            time_limit_ms: None,
            ticks_per_check: 1024,
        }
    }
}
