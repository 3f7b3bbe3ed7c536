//! Error types for the assignment build pipeline

use thiserror::Error;

/// Result type for build operations
pub type Result<T, E = ForgeError> = std::result::Result<T, E>;

/// Errors that can occur while registering components or building artifacts
#[derive(Error, Debug)]
pub enum ForgeError {
    /// Same (exercise, role) or plugin/util name registered twice across
    /// merged blueprints. Always fatal, surfaced at registration/merge time.
    #[error("Duplicate registration: {0}")]
    DuplicateRegistration(String),

    #[error("Unknown plugin `{name}`; available plugins: {available:?}")]
    UnknownPlugin {
        name: String,
        available: Vec<String>,
    },

    #[error("Invalid sampler signature: expected 0 or 1 parameters, got {0}")]
    InvalidSamplerSignature(usize),

    #[error("Invalid registration: {0}")]
    InvalidRegistration(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Deserialization failed: {0}")]
    Deserialization(String),

    /// Strict mode only; the default is to warn and continue.
    #[error("Resource key `{0}` missing from sampler output")]
    MissingResourceKey(String),

    #[error("Resource materialization failed: {0}")]
    Resource(String),

    #[error("Solution failed: {0}")]
    Solution(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_registration_display() {
        let err = ForgeError::DuplicateRegistration("foo.solution".to_string());
        assert_eq!(err.to_string(), "Duplicate registration: foo.solution");
    }

    #[test]
    fn test_unknown_plugin_lists_available() {
        let err = ForgeError::UnknownPlugin {
            name: "missing".to_string(),
            available: vec!["error_handler".to_string(), "sql_executor".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("missing"));
        assert!(msg.contains("error_handler"));
        assert!(msg.contains("sql_executor"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ForgeError = io_err.into();
        match err {
            ForgeError::Io(inner) => assert!(inner.to_string().contains("file not found")),
            other => panic!("Expected Io variant, got: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_sampler_signature_display() {
        let err = ForgeError::InvalidSamplerSignature(3);
        assert!(err.to_string().contains("got 3"));
    }
}
