use thiserror::Error;

/// The main error type for synchronization runs.
///
/// This enum represents all possible errors that can occur while talking
/// to the hypervisor or the inventory, decoding their payloads, or running
/// units of work on the worker pool.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Represents errors that occur while reaching a remote API
    ///
    /// # Fields
    /// * `0` - A description of what went wrong during the request
    #[error("Connection error: {0}")]
    Connection(String),

    /// Represents rejected credentials or API tokens
    ///
    /// # Fields
    /// * `0` - A description of the authentication failure
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Represents a non-success response from a remote API
    ///
    /// # Fields
    /// * `status` - The HTTP status code returned
    /// * `path` - The request path that failed
    /// * `message` - The response body, if any
    #[error("API error ({status}) on '{path}': {message}")]
    Api {
        status: u16,
        path: String,
        message: String,
    },

    /// The guest agent of a VM refused or cannot serve a request
    #[error("Guest agent unavailable: {0}")]
    GuestAgentUnavailable(String),

    /// A record the run depends on does not exist
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A payload could not be decoded into its typed model
    #[error("Failed to decode {entity}: {source}")]
    Decode {
        entity: String,
        source: serde_json::Error,
    },

    /// A unit of work panicked or was cancelled
    #[error("Worker failure: {0}")]
    Worker(String),

    /// Represents validation failures with detailed context
    ///
    /// # Fields
    /// * `source` - The underlying validation error
    #[error("Validation error: {source}")]
    Validation {
        #[from]
        source: ValidationError,
    },

    /// A reconciliation step was handed a value it cannot act on
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl SyncError {
    pub(crate) fn decode(entity: impl Into<String>, source: serde_json::Error) -> Self {
        SyncError::Decode {
            entity: entity.into(),
            source,
        }
    }
}

/// Specialized error type for configuration validation failures.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Represents a validation failure for a specific field
    ///
    /// # Fields
    /// * `field` - The name of the field that failed validation
    /// * `message` - A detailed message about why validation failed
    #[error("Field '{field}' validation failed: {message}")]
    Field { field: String, message: String },

    /// Represents format/syntax validation failures
    #[error("Format error: {0}")]
    Format(String),
}

impl ValidationError {
    pub(crate) fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationError::Field {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Type alias for Results that may fail with a SyncError
pub type SyncResult<T> = Result<T, SyncError>;
