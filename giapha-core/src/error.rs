use thiserror::Error;

/// Failures reported by a remote partition gateway.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Batch rejected: {0}")]
    Rejected(String),

    #[error("Record not found: {branch}/{id}")]
    RecordNotFound { branch: String, id: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Malformed record: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures surfaced by the graph store's mutation API.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Person not found: {0}")]
    NotFound(String),

    #[error("Unknown branch: {0}")]
    UnknownBranch(String),

    #[error("Display name must not be blank")]
    BlankName,

    #[error("Relative {id} belongs to branch '{found}', cannot join a batch on '{expected}'")]
    CrossBranch {
        id: String,
        found: String,
        expected: String,
    },

    #[error("Remote write failed: {0}")]
    Transport(#[source] GatewayError),

    #[error("Atomic batch failed: {0}")]
    Transaction(#[source] GatewayError),
}

impl StoreError {
    /// Stable machine-readable code for presentation layers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::UnknownBranch(_) => "unknown_branch",
            Self::BlankName => "blank_name",
            Self::CrossBranch { .. } => "cross_branch",
            Self::Transport(_) => "transport",
            Self::Transaction(_) => "transaction",
        }
    }
}

/// Process-level errors for the server binary.
#[derive(Error, Debug)]
pub enum GiaphaError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IPC error: {0}")]
    Ipc(String),
}
