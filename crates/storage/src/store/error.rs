#![forbid(unsafe_code)]

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("unknown id")]
    UnknownId,
    /// The changeset is not held by this worker in the expected state.
    #[error("changeset {changeset_id} not claimable (state={state})")]
    NotClaimable { changeset_id: i64, state: String },
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "IO",
            Self::Sql(_) => "SQL",
            Self::Json(_) => "JSON",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::UnknownId => "UNKNOWN_ID",
            Self::NotClaimable { .. } => "NOT_CLAIMABLE",
        }
    }
}
