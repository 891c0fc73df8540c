//! Configuration Module - Tag Table and Heap Walk Settings
//!
//! Controls tag table sizing, entry recycling, walk buffers and tracing.
//!
//! # Examples
//!
//! ```rust
//! use fti::TagMapConfig;
//!
//! let config = TagMapConfig {
//!     initial_size: Some(100_000),
//!     load_factor: 2.0,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use crate::tagmap::hashmap::{bucket_bytes, TagHashmap};
use serde::Serialize;

/// Default entries-per-bucket ratio before the table grows
pub const DEFAULT_LOAD_FACTOR: f32 = 4.0;

/// Load factors at or below this value select the default
pub const MIN_LOAD_FACTOR: f32 = 0.01;

/// Default cap on recycled entries kept per table
pub const DEFAULT_MAX_FREE_ENTRIES: usize = 4096;

/// Default initial capacity of the walk's visit stack
pub const DEFAULT_VISIT_STACK_SIZE: usize = 4000;

/// Default initial capacity of the marker's saved-header stack
pub const DEFAULT_SAVE_STACK_SIZE: usize = 4000;

/// Tag table configuration
#[derive(Debug, Clone, Serialize)]
pub struct TagMapConfig {
    /// Preferred initial bucket count
    ///
    /// Rounded down to a size from the fixed size sequence, never below the
    /// smallest size.
    /// Default: None (smallest size)
    pub initial_size: Option<usize>,

    /// Average chain length that triggers a resize
    ///
    /// Must not be negative. Values at or below 0.01 select the default.
    /// Default: 4.0
    pub load_factor: f32,

    /// Maximum number of recycled entries kept for reuse
    ///
    /// Default: 4096
    pub max_free_entries: usize,

    /// Report table memory usage, resizes and sweeps
    ///
    /// Default: false
    pub trace_object_tagging: bool,

    /// Initial capacity of the visit stack
    ///
    /// Default: 4000
    pub initial_visit_stack_size: usize,

    /// Initial capacity of the saved-header stack
    ///
    /// Default: 4000
    pub initial_save_stack_size: usize,

    /// Upper bound on bucket array size in bytes
    ///
    /// A resize that would exceed it fails like an allocation failure and
    /// disables further resizing.
    /// Default: None (unbounded)
    pub bucket_budget_bytes: Option<usize>,
}

impl Default for TagMapConfig {
    fn default() -> Self {
        Self {
            initial_size: None,
            load_factor: DEFAULT_LOAD_FACTOR,
            max_free_entries: DEFAULT_MAX_FREE_ENTRIES,
            trace_object_tagging: false,
            initial_visit_stack_size: DEFAULT_VISIT_STACK_SIZE,
            initial_save_stack_size: DEFAULT_SAVE_STACK_SIZE,
            bucket_budget_bytes: None,
        }
    }
}

impl TagMapConfig {
    /// Validate configuration
    ///
    /// Returns error if configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.load_factor.is_finite() {
            return Err(ConfigError::InvalidLoadFactor(format!(
                "load_factor must be finite, got {}",
                self.load_factor
            )));
        }
        if self.load_factor < 0.0 {
            return Err(ConfigError::InvalidLoadFactor(format!(
                "load_factor must not be negative, got {}",
                self.load_factor
            )));
        }

        if self.initial_visit_stack_size == 0 {
            return Err(ConfigError::InvalidStackSize(
                "initial_visit_stack_size must be > 0".to_string(),
            ));
        }

        if let Some(budget) = self.bucket_budget_bytes {
            let initial = bucket_bytes(TagHashmap::size_for(self.initial_size));
            if budget < initial {
                return Err(ConfigError::InvalidBudget(format!(
                    "bucket_budget_bytes ({}) is smaller than the initial table ({})",
                    budget, initial
                )));
            }
        }

        Ok(())
    }

    /// Load factor actually used by the table
    pub fn effective_load_factor(&self) -> f32 {
        if self.load_factor > MIN_LOAD_FACTOR {
            self.load_factor
        } else {
            DEFAULT_LOAD_FACTOR
        }
    }

    /// Build configuration from environment variables
    ///
    /// Overrides defaults with environment variables:
    /// - FTI_INITIAL_SIZE
    /// - FTI_LOAD_FACTOR
    /// - FTI_MAX_FREE_ENTRIES
    /// - FTI_TRACE_TAGGING
    ///
    /// # Examples
    ///
    /// ```bash
    /// export FTI_INITIAL_SIZE=307261
    /// export FTI_TRACE_TAGGING=1
    /// ```
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("FTI_INITIAL_SIZE") {
            if let Ok(size) = val.parse::<usize>() {
                config.initial_size = Some(size);
            }
        }

        if let Ok(val) = std::env::var("FTI_LOAD_FACTOR") {
            if let Ok(factor) = val.parse::<f32>() {
                config.load_factor = factor;
            }
        }

        if let Ok(val) = std::env::var("FTI_MAX_FREE_ENTRIES") {
            if let Ok(max) = val.parse::<usize>() {
                config.max_free_entries = max;
            }
        }

        if let Ok(val) = std::env::var("FTI_TRACE_TAGGING") {
            config.trace_object_tagging = val == "1" || val.eq_ignore_ascii_case("true");
        }

        config
    }
}

/// Error types for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid load factor: {0}")]
    InvalidLoadFactor(String),

    #[error("Invalid stack size: {0}")]
    InvalidStackSize(String),

    #[error("Invalid bucket budget: {0}")]
    InvalidBudget(String),
}
