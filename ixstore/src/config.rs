//! Engine configuration.
//!
//! Loaded from environment variables by the `ixstore` binary; library users
//! can build an [`EngineConfig`] directly.
//!
//! # Environment Variables
//!
//! - `IXSTORE_BUFFER_PAGES`: buffer frames per open file (default: `40`)
//! - `IXSTORE_PAGE_SIZE`: page size for new index files (default: `4092`)

use crate::storage::{DEFAULT_POOL_CAPACITY, MAX_PAGE_SIZE, MIN_PAGE_SIZE};

/// Engine configuration.
///
/// # Post-conditions
///
/// When constructed via `from_env()`:
/// - `buffer_capacity` is at least 1
/// - `page_size` is within the paged file's supported range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Frames in each open file's buffer pool.
    pub buffer_capacity: usize,
    /// User-visible page size for newly created index files.
    pub page_size: usize,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: Self::DEFAULT_BUFFER_PAGES,
            page_size: Self::DEFAULT_PAGE_SIZE,
        }
    }
}

impl EngineConfig {
    /// Default buffer frames per open file.
    pub const DEFAULT_BUFFER_PAGES: usize = DEFAULT_POOL_CAPACITY;
    /// Default page size for new index files.
    pub const DEFAULT_PAGE_SIZE: usize = 4092;

    /// Load configuration from environment variables, falling back to the
    /// defaults for unset variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which returns a variable's
    /// value if it is set.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let buffer_capacity = load_usize(
            &lookup,
            "IXSTORE_BUFFER_PAGES",
            Self::DEFAULT_BUFFER_PAGES,
            1..=usize::MAX,
        )?;
        let page_size = load_usize(
            &lookup,
            "IXSTORE_PAGE_SIZE",
            Self::DEFAULT_PAGE_SIZE,
            MIN_PAGE_SIZE..=MAX_PAGE_SIZE,
        )?;

        Ok(Self {
            buffer_capacity,
            page_size,
        })
    }
}

fn load_usize(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: usize,
    range: std::ops::RangeInclusive<usize>,
) -> Result<usize, ConfigError> {
    let Some(value) = lookup(name) else {
        return Ok(default);
    };
    value
        .parse::<usize>()
        .ok()
        .filter(|parsed| range.contains(parsed))
        .ok_or_else(|| ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!(
                "'{value}' is not a number in {}..={}",
                range.start(),
                range.end()
            ),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.buffer_capacity, 40);
        assert_eq!(config.page_size, 4092);
    }

    #[test]
    fn test_unset_variables_use_defaults() {
        let config = EngineConfig::from_lookup(|_| None).expect("defaults");
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = EngineConfig::from_lookup(|name| match name {
            "IXSTORE_BUFFER_PAGES" => Some("8".to_string()),
            "IXSTORE_PAGE_SIZE" => Some("512".to_string()),
            _ => None,
        })
        .expect("valid overrides");
        assert_eq!(config.buffer_capacity, 8);
        assert_eq!(config.page_size, 512);
    }

    #[test]
    fn test_invalid_values() {
        let zero = EngineConfig::from_lookup(|name| {
            (name == "IXSTORE_BUFFER_PAGES").then(|| "0".to_string())
        });
        assert!(matches!(
            zero,
            Err(ConfigError::InvalidValue { ref name, .. }) if name == "IXSTORE_BUFFER_PAGES"
        ));

        let garbage = EngineConfig::from_lookup(|name| {
            (name == "IXSTORE_PAGE_SIZE").then(|| "big".to_string())
        });
        assert!(garbage.is_err());
    }

    #[test]
    fn test_config_error_display_invalid() {
        let error = ConfigError::InvalidValue {
            name: "TEST_VAR".to_string(),
            message: "bad value".to_string(),
        };
        assert_eq!(error.to_string(), "invalid value for TEST_VAR: bad value");
    }
}
