use std::path::PathBuf;
use thiserror::Error;

/// Flight core error types
///
/// None of these stop the control loop. They come back from catalog and
/// profile I/O and are logged or surfaced as events by the caller.
#[derive(Error, Debug)]
pub enum FlightError {
    #[error("Catalog I/O error at {path}: {source}")]
    CatalogIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Catalog parse error at {path}: {source}")]
    CatalogParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Catalog encode error at {path}: {source}")]
    CatalogEncode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Profile I/O error at {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Profile parse error at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid rig profile: {0}")]
    InvalidProfile(String),

    #[error("Status write failed: {0}")]
    StatusWrite(#[from] std::io::Error),
}

pub type FlightResult<T> = Result<T, FlightError>;
