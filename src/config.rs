use std::path::PathBuf;

use crate::error::Result;
use crate::time::Timestamp;
use crate::tree;
use crate::Error;

/// Configuration for a single history file
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// Path of the history file
    pub path: PathBuf,

    /// Size of every block in the file, header included (default: 4KB)
    pub block_size: usize,

    /// Maximum number of children per node (default: 50)
    pub max_children: usize,

    /// Number of decoded nodes kept in memory (default: 256)
    pub cache_size: usize,

    /// Earliest time the tree can hold (default: 0)
    pub start_time: Timestamp,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./state.ht"),
            block_size: 4 * 1024, // 4KB
            max_children: 50,
            cache_size: 256,
            start_time: Timestamp::new(0),
        }
    }
}

impl HistoryConfig {
    /// Create a new config for the given file path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Set block size
    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Set maximum children per node
    pub fn max_children(mut self, max_children: usize) -> Self {
        self.max_children = max_children;
        self
    }

    /// Set node cache size
    pub fn cache_size(mut self, size: usize) -> Self {
        self.cache_size = size;
        self
    }

    /// Set tree start time
    pub fn start_time(mut self, start: impl Into<Timestamp>) -> Self {
        self.start_time = start.into();
        self
    }

    /// Checks the geometry can hold the file header and at least one
    /// interval of any type per node.
    pub fn validate(&self) -> Result<()> {
        if self.max_children < 2 {
            return Err(Error::InvalidConfig(format!(
                "max_children must be at least 2, got {}",
                self.max_children
            )));
        }
        if self.cache_size == 0 {
            return Err(Error::InvalidConfig(
                "cache_size must be positive".to_string(),
            ));
        }
        if u32::try_from(self.block_size).is_err() {
            return Err(Error::InvalidConfig(format!(
                "block_size {} does not fit in 32 bits",
                self.block_size
            )));
        }
        let min = tree::min_block_size(self.max_children);
        if self.block_size < min {
            return Err(Error::InvalidConfig(format!(
                "block_size {} is below the minimum of {} for {} children",
                self.block_size, min, self.max_children
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HistoryConfig::default();
        assert_eq!(config.path, PathBuf::from("./state.ht"));
        assert_eq!(config.block_size, 4 * 1024);
        assert_eq!(config.max_children, 50);
        assert_eq!(config.cache_size, 256);
        assert_eq!(config.start_time, Timestamp::new(0));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = HistoryConfig::new("/tmp/kernel.ht")
            .block_size(64 * 1024)
            .max_children(8)
            .cache_size(16)
            .start_time(1_000);

        assert_eq!(config.path, PathBuf::from("/tmp/kernel.ht"));
        assert_eq!(config.block_size, 64 * 1024);
        assert_eq!(config.max_children, 8);
        assert_eq!(config.cache_size, 16);
        assert_eq!(config.start_time, Timestamp::new(1_000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_configs() {
        let base = HistoryConfig::new("/tmp/invalid.ht");

        let too_few_children = base.clone().max_children(1);
        assert!(matches!(
            too_few_children.validate(),
            Err(Error::InvalidConfig(_))
        ));

        let no_cache = base.clone().cache_size(0);
        assert!(matches!(no_cache.validate(), Err(Error::InvalidConfig(_))));

        let tiny_blocks = base.clone().block_size(128);
        assert!(matches!(tiny_blocks.validate(), Err(Error::InvalidConfig(_))));

        // Wide fan-out needs room for the reserved child table.
        let wide = base.block_size(1024).max_children(200);
        assert!(matches!(wide.validate(), Err(Error::InvalidConfig(_))));
    }
}
