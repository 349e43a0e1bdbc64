// config.rs — Fiber runtime configuration
//
// Stack size and cache capacity for a `FiberScheduler`. Loaded from JSON by
// embedders or built in code; always validated before a scheduler uses it.

use serde::{Deserialize, Serialize};

pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;
pub const MIN_STACK_SIZE: usize = 16 * 1024;
pub const DEFAULT_CACHE_SIZE: usize = 100;
pub const MAX_CACHE_SIZE: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("fiber stack size {size} is below the minimum of {min} bytes")]
    StackTooSmall { size: usize, min: usize },
    #[error("fiber cache size {size} is outside 1..={max}")]
    CacheSize { size: usize, max: usize },
    #[error("malformed fiber configuration: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FiberConfig {
    /// Bytes of stack per fiber.
    pub stack_size: usize,
    /// Idle fibers kept for reuse.
    pub cache_size: usize,
}

impl Default for FiberConfig {
    fn default() -> Self {
        FiberConfig {
            stack_size: DEFAULT_STACK_SIZE,
            cache_size: DEFAULT_CACHE_SIZE,
        }
    }
}

impl FiberConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: FiberConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stack_size < MIN_STACK_SIZE {
            return Err(ConfigError::StackTooSmall {
                size: self.stack_size,
                min: MIN_STACK_SIZE,
            });
        }
        if !(1..=MAX_CACHE_SIZE).contains(&self.cache_size) {
            return Err(ConfigError::CacheSize {
                size: self.cache_size,
                max: MAX_CACHE_SIZE,
            });
        }
        Ok(())
    }
}
