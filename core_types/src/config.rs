//! # Platform Configuration
//!
//! Capacities and limits fixed at startup. Every table in the core is sized
//! from a [`PlatformConfig`] exactly once; nothing grows afterwards.
//!
//! The configuration can be built in code with the `with_*` builders or
//! parsed from JSON. Missing JSON fields take their defaults.

use crate::error::{ResourceError, Result};
use serde::{Deserialize, Serialize};

/// Largest number of slots a single resource kind may have
///
/// Bound by the width of the slot index inside a resource id.
pub const MAX_TABLE_CAPACITY: usize = 4096;

/// Largest number of block size classes a memory pool may have
pub const MAX_BLOCK_SIZE_CLASSES: usize = 17;

/// Default block size classes for memory pools, smallest first
pub const DEFAULT_BLOCK_SIZES: [usize; MAX_BLOCK_SIZE_CLASSES] = [
    8, 16, 32, 48, 64, 96, 128, 160, 256, 512, 1024, 2048, 4096, 8192, 16384, 32768, 80000,
];

/// Platform configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Application table capacity
    pub max_applications: usize,
    /// Task table capacity
    pub max_tasks: usize,
    /// Library table capacity
    pub max_libraries: usize,
    /// Memory pool table capacity
    pub max_memory_pools: usize,
    /// Number of entries in the CDS registry
    pub max_cds_entries: usize,
    /// Generic counter table capacity
    pub max_generic_counters: usize,
    /// Size classes used when a pool is created without its own table
    pub default_block_sizes: Vec<usize>,
    /// Longest application or counter name, in bytes
    pub max_api_name_len: usize,
    /// Longest CDS block name (the part after the dot), in bytes
    pub cds_max_name_len: usize,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            max_applications: 32,
            max_tasks: 64,
            max_libraries: 10,
            max_memory_pools: 10,
            max_cds_entries: 512,
            max_generic_counters: 8,
            default_block_sizes: DEFAULT_BLOCK_SIZES.to_vec(),
            max_api_name_len: 20,
            cds_max_name_len: 16,
        }
    }
}

impl PlatformConfig {
    /// Parses a configuration from JSON and validates it
    pub fn from_json(json: &str) -> Result<Self> {
        let config: PlatformConfig = serde_json::from_str(json)
            .map_err(|e| ResourceError::BadArgument(format!("platform config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ResourceError::BadArgument(format!("platform config: {}", e)))
    }

    /// Builder: sets the application table capacity
    pub fn with_max_applications(mut self, count: usize) -> Self {
        self.max_applications = count;
        self
    }

    /// Builder: sets the task table capacity
    pub fn with_max_tasks(mut self, count: usize) -> Self {
        self.max_tasks = count;
        self
    }

    /// Builder: sets the library table capacity
    pub fn with_max_libraries(mut self, count: usize) -> Self {
        self.max_libraries = count;
        self
    }

    /// Builder: sets the memory pool table capacity
    pub fn with_max_memory_pools(mut self, count: usize) -> Self {
        self.max_memory_pools = count;
        self
    }

    /// Builder: sets the CDS registry capacity
    pub fn with_max_cds_entries(mut self, count: usize) -> Self {
        self.max_cds_entries = count;
        self
    }

    /// Builder: sets the generic counter table capacity
    pub fn with_max_generic_counters(mut self, count: usize) -> Self {
        self.max_generic_counters = count;
        self
    }

    /// Builder: replaces the default pool block sizes
    pub fn with_default_block_sizes(mut self, sizes: &[usize]) -> Self {
        self.default_block_sizes = sizes.to_vec();
        self
    }

    /// Longest accepted `AppName.BlockName` string
    pub fn cds_max_full_name_len(&self) -> usize {
        self.max_api_name_len + 1 + self.cds_max_name_len
    }

    /// Checks that every capacity fits the id encoding and the default block
    /// table is usable
    pub fn validate(&self) -> Result<()> {
        let capacities = [
            ("max_applications", self.max_applications),
            ("max_tasks", self.max_tasks),
            ("max_libraries", self.max_libraries),
            ("max_memory_pools", self.max_memory_pools),
            ("max_cds_entries", self.max_cds_entries),
            ("max_generic_counters", self.max_generic_counters),
        ];
        for (name, value) in capacities {
            if value == 0 || value > MAX_TABLE_CAPACITY {
                return Err(ResourceError::BadArgument(format!(
                    "{} must be between 1 and {}, got {}",
                    name, MAX_TABLE_CAPACITY, value
                )));
            }
        }

        validate_block_sizes(&self.default_block_sizes)?;

        if self.max_api_name_len == 0 || self.cds_max_name_len == 0 {
            return Err(ResourceError::BadArgument(
                "name limits must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Checks a block size table: 1..=17 entries, all non-zero, no duplicates
pub fn validate_block_sizes(sizes: &[usize]) -> Result<()> {
    if sizes.is_empty() || sizes.len() > MAX_BLOCK_SIZE_CLASSES {
        return Err(ResourceError::BadArgument(format!(
            "expected 1 to {} block sizes, got {}",
            MAX_BLOCK_SIZE_CLASSES,
            sizes.len()
        )));
    }
    if sizes.iter().any(|&s| s == 0) {
        return Err(ResourceError::BadArgument(
            "block size of zero".to_string(),
        ));
    }
    let mut sorted = sizes.to_vec();
    sorted.sort_unstable();
    if sorted.windows(2).any(|w| w[0] == w[1]) {
        return Err(ResourceError::BadArgument(
            "duplicate block size".to_string(),
        ));
    }
    Ok(())
}
