use std::path::Path;

use crate::config::CacheConfig;

/// Macro to initialize tracing for tests
///
/// Usage:
/// - `init_test_tracing!()` - uses DEBUG level (default)
/// - `init_test_tracing!(INFO)` - uses specified level
#[macro_export]
macro_rules! init_test_tracing {
    () => {
        init_test_tracing!(DEBUG);
    };
    ($level:ident) => {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::$level)
            .with_test_writer()
            .try_init();
    };
}

/// Cache configuration rooted at a scratch directory, with a small memory
/// capacity so growth paths are exercised
#[inline]
pub fn test_config(dir: &Path) -> CacheConfig {
    CacheConfig::builder()
        .cache_dir(dir)
        .initial_memory_capacity(16)
        .build()
}

pub use crate::init_test_tracing;
