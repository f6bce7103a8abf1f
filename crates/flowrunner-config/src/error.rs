//! Configuration error types.

use std::path::PathBuf;

use thiserror::Error;

/// A result type using `ConfigError`.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors raised while resolving a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path of the file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not a valid template.
    #[error("invalid template: {0}")]
    Template(#[from] Box<handlebars::TemplateError>),

    /// The template could not be rendered, usually because a variable is missing.
    #[error("failed to render template: {0}")]
    Render(#[from] Box<handlebars::RenderError>),

    /// The rendered text is not the expected JSON shape.
    #[error("invalid record: {0}")]
    Json(#[from] serde_json::Error),

    /// The envelope names a different record kind.
    #[error("schema '{found}' is not a {expected} schema")]
    SchemaMismatch {
        /// Record kind that was expected.
        expected: &'static str,
        /// Schema URI found in the envelope.
        found: String,
    },

    /// The decoded record failed validation.
    #[error(transparent)]
    Invalid(#[from] flowrunner_core::CoreError),

    /// The `--vars` list has an odd number of items.
    #[error("--vars must have an even number of keys and values")]
    OddVars,
}
