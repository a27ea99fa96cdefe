//! Runtime configuration.
//!
//! Thread-local, like the rest of the runtime state. Read with [`config`],
//! replace with [`set_config`].

use std::cell::Cell;

/// Tunables for the scheduler and expression cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Upper bound on flush passes per state before pending keys are dropped.
    pub max_flush_passes: usize,
    /// Maximum number of cached compiled expressions (0 = unbounded).
    pub expression_cache_capacity: usize,
    /// Largest run of `undefined` holes a list index write may create.
    pub max_list_gap: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_flush_passes: 100,
            expression_cache_capacity: 1024,
            max_list_gap: 1024,
        }
    }
}

thread_local! {
    static CONFIG: Cell<RuntimeConfig> = Cell::new(RuntimeConfig::default());
}

/// Current configuration.
pub fn config() -> RuntimeConfig {
    CONFIG.with(Cell::get)
}

/// Replace the configuration for this thread.
pub fn set_config(config: RuntimeConfig) {
    CONFIG.with(|c| c.set(config));
}

/// Restore defaults (for testing).
pub fn reset_config() {
    set_config(RuntimeConfig::default());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_reset_config() {
        reset_config();
        assert_eq!(config().max_flush_passes, 100);

        set_config(RuntimeConfig {
            max_flush_passes: 3,
            ..RuntimeConfig::default()
        });
        assert_eq!(config().max_flush_passes, 3);

        reset_config();
        assert_eq!(config(), RuntimeConfig::default());
    }
}
