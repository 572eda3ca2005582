use serde::Serialize;

/// Crate-wide error type. Every fallible function returns `Result<T, AppError>`.
/// Serializes as `{ error: "...", kind: "..." }` so daemon output stays structured.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Rejected configuration update. Carries every problem found, not just the first.
    #[error("Invalid configuration: {}", .0.join("; "))]
    Configuration(Vec<String>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database",
            AppError::Pool(_) => "pool",
            AppError::NotFound(_) => "not_found",
            AppError::Validation(_) => "validation",
            AppError::Configuration(_) => "configuration",
            AppError::Io(_) => "io",
            AppError::Serde(_) => "serde",
            AppError::ConfigParse(_) => "config_parse",
            AppError::Execution(_) => "execution",
            AppError::Timeout(_) => "timeout",
            AppError::Internal(_) => "internal",
        }
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("AppError", 2)?;
        s.serialize_field("error", &self.to_string())?;
        s.serialize_field("kind", self.kind())?;
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_lists_all_problems() {
        let err = AppError::Configuration(vec![
            "auto_apply_threshold must be within [0, 1]".into(),
            "max_concurrent_fixes must be at least 1".into(),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("auto_apply_threshold"));
        assert!(msg.contains("max_concurrent_fixes"));
        assert_eq!(err.kind(), "configuration");
    }

    #[test]
    fn test_serializes_with_kind() {
        let err = AppError::Timeout("analysis".into());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "timeout");
        assert_eq!(json["error"], "Timed out: analysis");
    }
}
