use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CalculatorError {
    #[error("subject not found: {name}")]
    SubjectNotFound { name: String },
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid grades JSON in {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode grades dataset for {path:?}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid grades CSV in {path:?}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}
