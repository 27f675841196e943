use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the loading, feature and prediction stages.
///
/// A query that matches no rows is not an error; see
/// [`QueryOutcome`](crate::domain::QueryOutcome).
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed input: missing columns, unparseable cells, duplicate keys.
    #[error("data format error: {0}")]
    DataFormat(String),

    /// Prepared data does not line up with what a model or the configuration expects.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Short category name used in log fields and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::DataFormat(_) => "DataFormat",
            PipelineError::Configuration(_) => "Configuration",
            PipelineError::Model(_) => "Model",
            PipelineError::Io { .. } => "Io",
            PipelineError::Csv(_) => "Csv",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(PipelineError::DataFormat("x".into()).kind(), "DataFormat");
        assert_eq!(
            PipelineError::Configuration("x".into()).kind(),
            "Configuration"
        );
        let io = PipelineError::io(
            "ops.csv",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(io.kind(), "Io");
    }

    #[test]
    fn test_error_display() {
        let error = PipelineError::DataFormat("missing column(s): date".to_string());
        assert_eq!(
            error.to_string(),
            "data format error: missing column(s): date"
        );

        let io = PipelineError::io(
            "data/ops.csv",
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        );
        assert_eq!(io.to_string(), "I/O error on data/ops.csv: no such file");
    }
}
