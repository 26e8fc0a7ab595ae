//! Error types for `execrelay` core library.

use thiserror::Error;

/// Result type alias using `execrelay` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `execrelay` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error: unreadable or malformed settings, invalid values
    #[error("Configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_names_the_problem() {
        let err = Error::Config("pumps.chunk_size must be positive".into());
        assert_eq!(
            err.to_string(),
            "Configuration error: pumps.chunk_size must be positive"
        );
    }
}
