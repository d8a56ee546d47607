//! Configuration for the merge index.

/// Default cap on the in-memory fetch cache, in rows.
pub const DEFAULT_MAX_FETCH_SIZE: usize = 10_000;

/// Environment variable overriding [`MergeConfig::max_fetch_size`].
pub const MAX_FETCH_SIZE_ENV: &str = "MERGE_TABLE_MAX_SIZE";

/// Configuration for a merge index.
///
/// There is exactly one tunable: the fetch-cache cap. Everything else
/// about the index is fixed by construction (column set, cursor variant,
/// registered sources).
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// Rows the fetch cache may hold before it is discarded. Once
    /// discarded, lookups that need to replay cached rows fail with
    /// [`MergeError::FetchedTooLarge`](crate::MergeError::FetchedTooLarge).
    pub max_fetch_size: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            max_fetch_size: DEFAULT_MAX_FETCH_SIZE,
        }
    }
}

impl MergeConfig {
    /// Configuration with the default cap overridden by the
    /// `MERGE_TABLE_MAX_SIZE` environment variable, when set and parseable.
    #[must_use]
    pub fn from_env() -> Self {
        let max_fetch_size = std::env::var(MAX_FETCH_SIZE_ENV)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_FETCH_SIZE);
        Self { max_fetch_size }
    }

    /// Configuration with an explicit cap.
    #[must_use]
    pub fn with_max_fetch_size(max_fetch_size: usize) -> Self {
        Self { max_fetch_size }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_cap() {
        assert_eq!(MergeConfig::default().max_fetch_size, 10_000);
    }

    #[test]
    fn test_explicit_cap() {
        assert_eq!(MergeConfig::with_max_fetch_size(3).max_fetch_size, 3);
    }

    #[test]
    fn test_env_override() {
        std::env::set_var(MAX_FETCH_SIZE_ENV, "123");
        assert_eq!(MergeConfig::from_env().max_fetch_size, 123);

        std::env::set_var(MAX_FETCH_SIZE_ENV, "not a number");
        assert_eq!(
            MergeConfig::from_env().max_fetch_size,
            DEFAULT_MAX_FETCH_SIZE
        );

        std::env::remove_var(MAX_FETCH_SIZE_ENV);
        assert_eq!(
            MergeConfig::from_env().max_fetch_size,
            DEFAULT_MAX_FETCH_SIZE
        );
    }
}
