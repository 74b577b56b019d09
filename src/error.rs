use thiserror::Error;

/// Main error type for repograph
#[derive(Error, Debug)]
pub enum RepographError {
    /// Index storage errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required argument was missing or malformed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The workspace does not exist in the content source
    #[error("Workspace \"{workspace}\" does not exist in source \"{source_name}\"")]
    InvalidWorkspace {
        workspace: String,
        source_name: String,
    },

    /// An operation was attempted in a state that does not allow it
    #[error("State violation: {0}")]
    StateViolation(String),

    /// Node not found in the content graph
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// Unknown namespace prefix or malformed name
    #[error("Namespace error: {0}")]
    Namespace(String),

    /// Markup parse errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// Query text could not be parsed
    #[error("Query parse error: {0}")]
    QueryParse(String),

    /// Query refers to unknown tables or columns
    #[error("Query error: {0}")]
    Query(String),

    /// Search errors
    #[error("Search error: {0}")]
    Search(String),
}

impl RepographError {
    /// True for the "workspace not found" case, as opposed to storage failures.
    pub fn is_invalid_workspace(&self) -> bool {
        matches!(self, RepographError::InvalidWorkspace { .. })
    }
}

/// Convenient Result type using RepographError
pub type Result<T> = std::result::Result<T, RepographError>;
