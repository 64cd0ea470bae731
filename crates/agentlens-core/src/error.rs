use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error("Model call failed: {0}")]
    Model(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Helper for creating configuration errors
    ///
    /// # Example
    /// ```
    /// use agentlens_core::Error;
    /// let err = Error::config_error("Invalid exporter configuration");
    /// ```
    pub fn config_error(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Helper for creating telemetry pipeline errors
    ///
    /// # Example
    /// ```
    /// use agentlens_core::Error;
    /// let err = Error::telemetry_error("tracer provider already installed");
    /// ```
    pub fn telemetry_error(msg: impl Into<String>) -> Self {
        Error::Telemetry(msg.into())
    }

    /// Helper for creating general errors with a message
    pub fn message(msg: impl Into<String>) -> Self {
        Error::Other(anyhow::anyhow!("{}", msg.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::config_error("bad path").to_string(),
            "Configuration error: bad path"
        );
        assert_eq!(
            Error::telemetry_error("no exporter").to_string(),
            "Telemetry error: no exporter"
        );
        assert_eq!(Error::message("boom").to_string(), "boom");
    }

    #[test]
    fn test_from_serde_error() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: Error = parse_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
