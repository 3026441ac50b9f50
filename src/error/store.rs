use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record '{id}' already exists in {collection}.")]
    Duplicate {
        collection: &'static str,
        id: String,
    },
    #[error("Record '{id}' does not exist in {collection}.")]
    Missing {
        collection: &'static str,
        id: String,
    },
    #[error("Failed to encode {collection} record: {source}")]
    Encode {
        collection: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to decode {collection} record '{id}': {source}")]
    Decode {
        collection: &'static str,
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{context}: {source}")]
    Sqlite {
        context: &'static str,
        #[source]
        source: tokio_rusqlite::Error,
    },
}
