//! Configuration errors for the core.
//!
//! Runtime failures at the browser boundary are [`crate::capability::ToolError`];
//! this type only covers tunables that cannot be turned into a working
//! component.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configured regex did not compile.
    #[error("invalid pattern in {field}: {source}")]
    Pattern {
        field: String,
        #[source]
        source: regex::Error,
    },

    /// A value is out of range or inconsistent with another value.
    #[error("invalid {field}: {reason}")]
    Invalid { field: String, reason: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;
