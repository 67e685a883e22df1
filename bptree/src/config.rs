//! Tree configuration.
//!
//! Configuration can be built in code or loaded from environment variables.
//!
//! # Environment Variables
//!
//! - `BPTREE_ORDER`: maximum number of children per node (default: `500`)
//! - `BPTREE_PAGE_SIZE`: page size in bytes for new files (default: host page size)
//! - `BPTREE_CACHE_CAPACITY`: number of decoded nodes kept in memory (default: `1024`)
//!
//! # Invariants
//!
//! - `order` is always in `[MIN_ORDER, MAX_ORDER]`
//! - `page_size` is always in `[MIN_PAGE_SIZE, MAX_PAGE_SIZE]`

use crate::storage::{MIN_PAGE_SIZE, os};

/// Tree configuration.
///
/// The order of an existing tree is fixed when it is created. Opening it with
/// a different order fails with `ConfigError::OrderMismatch`. The same applies
/// to the page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeConfig {
    order: u16,
    page_size: u16,
    cache_capacity: usize,
}

/// Error returned when a configuration value is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A value is outside its allowed range or cannot be parsed.
    InvalidValue { name: String, message: String },
    /// The tree file was created with another order.
    OrderMismatch { stored: u16, requested: u16 },
    /// The tree file was created with another page size.
    PageSizeMismatch { stored: u16, requested: u16 },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
            Self::OrderMismatch { stored, requested } => write!(
                f,
                "tree was created with order {stored}, but {requested} was requested"
            ),
            Self::PageSizeMismatch { stored, requested } => write!(
                f,
                "tree was created with page size {stored}, but {requested} was requested"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            order: Self::DEFAULT_ORDER,
            page_size: os::host_page_size(),
            cache_capacity: Self::DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl TreeConfig {
    /// Smallest order that still allows splitting.
    pub const MIN_ORDER: u16 = 3;
    /// Largest supported order.
    pub const MAX_ORDER: u16 = 1000;
    pub const DEFAULT_ORDER: u16 = 500;
    pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

    /// Set the tree order.
    ///
    /// # Errors
    ///
    /// Returns an error if `order` is outside `[MIN_ORDER, MAX_ORDER]`.
    pub fn with_order(mut self, order: u16) -> Result<Self, ConfigError> {
        if !(Self::MIN_ORDER..=Self::MAX_ORDER).contains(&order) {
            return Err(ConfigError::InvalidValue {
                name: "order".to_string(),
                message: format!(
                    "{order} is outside [{}, {}]",
                    Self::MIN_ORDER,
                    Self::MAX_ORDER
                ),
            });
        }
        self.order = order;
        Ok(self)
    }

    /// Set the page size used when a new file is created.
    ///
    /// # Errors
    ///
    /// Returns an error if `page_size` is below `MIN_PAGE_SIZE`.
    pub fn with_page_size(mut self, page_size: u16) -> Result<Self, ConfigError> {
        if page_size < MIN_PAGE_SIZE {
            return Err(ConfigError::InvalidValue {
                name: "page_size".to_string(),
                message: format!("{page_size} is below the minimum of {MIN_PAGE_SIZE}"),
            });
        }
        self.page_size = page_size;
        Ok(self)
    }

    /// Set how many decoded nodes are cached. 0 disables the cache.
    #[must_use]
    pub const fn with_cache_capacity(mut self, cache_capacity: usize) -> Self {
        self.cache_capacity = cache_capacity;
        self
    }

    #[must_use]
    pub const fn order(&self) -> u16 {
        self.order
    }

    #[must_use]
    pub const fn page_size(&self) -> u16 {
        self.page_size
    }

    #[must_use]
    pub const fn cache_capacity(&self) -> usize {
        self.cache_capacity
    }

    /// Load configuration from environment variables.
    ///
    /// Unset variables fall back to the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but unparsable or out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(order) = parse_var::<u16>(&lookup, "BPTREE_ORDER")? {
            config = config.with_order(order)?;
        }
        if let Some(page_size) = parse_var::<u16>(&lookup, "BPTREE_PAGE_SIZE")? {
            config = config.with_page_size(page_size)?;
        }
        if let Some(capacity) = parse_var::<usize>(&lookup, "BPTREE_CACHE_CAPACITY")? {
            config = config.with_cache_capacity(capacity);
        }

        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, ConfigError> {
    let Some(value) = lookup(name) else {
        return Ok(None);
    };
    value
        .trim()
        .parse::<T>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("'{value}' is not a valid number"),
        })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_map(vars: &[(&str, &str)]) -> Result<TreeConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        TreeConfig::from_vars(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = TreeConfig::default();
        assert_eq!(config.order(), 500);
        assert_eq!(config.cache_capacity(), 1024);
        assert!(config.page_size() >= MIN_PAGE_SIZE);
    }

    #[test]
    fn test_order_bounds() {
        let config = TreeConfig::default();
        assert!(config.with_order(3).is_ok());
        assert!(config.with_order(1000).is_ok());
        assert!(config.with_order(2).is_err());
        assert!(config.with_order(1001).is_err());
    }

    #[test]
    fn test_page_size_bounds() {
        let config = TreeConfig::default();
        assert!(config.with_page_size(32).is_ok());
        assert!(config.with_page_size(u16::MAX).is_ok());
        assert!(config.with_page_size(31).is_err());
    }

    #[test]
    fn test_from_vars() {
        let config = from_map(&[
            ("BPTREE_ORDER", "4"),
            ("BPTREE_PAGE_SIZE", "64"),
            ("BPTREE_CACHE_CAPACITY", "0"),
        ])
        .expect("config");
        assert_eq!(config.order(), 4);
        assert_eq!(config.page_size(), 64);
        assert_eq!(config.cache_capacity(), 0);

        let defaults = from_map(&[]).expect("defaults");
        assert_eq!(defaults, TreeConfig::default());
    }

    #[test]
    fn test_from_vars_rejects_bad_values() {
        let error = from_map(&[("BPTREE_ORDER", "many")]).expect_err("unparsable");
        assert_eq!(
            error.to_string(),
            "invalid value for BPTREE_ORDER: 'many' is not a valid number"
        );

        assert!(from_map(&[("BPTREE_ORDER", "1")]).is_err());
        assert!(from_map(&[("BPTREE_PAGE_SIZE", "70000")]).is_err());
    }

    #[test]
    fn test_config_error_display_mismatch() {
        let error = ConfigError::OrderMismatch {
            stored: 4,
            requested: 8,
        };
        assert_eq!(
            error.to_string(),
            "tree was created with order 4, but 8 was requested"
        );
    }
}
