use thiserror::Error;

/// Failures surfaced by the shared state store and the primitives on top
/// of it. Transport problems never show up here; those are reported as
/// booleans at the notifier boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage i/o on key '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid store key '{0}'")]
    InvalidKey(String),

    #[error("malformed entry under key '{key}': {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}
