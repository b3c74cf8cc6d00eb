use thiserror::Error;

/// Errors raised synchronously by the object graph and query engine.
///
/// Remote failures are normally reported as events rather than returned; the
/// [`CourierError::Remote`] variant exists so that those events can carry a
/// typed error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CourierError {
    #[error("Object has been destroyed")]
    Destroyed,

    #[error("Event `{event}` is not supported by {emitter}")]
    UnsupportedEvent { event: String, emitter: String },

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid id: {0}")]
    InvalidId(String),

    #[error("Invalid predicate: {0}")]
    InvalidPredicate(String),

    #[error("Predicates are not supported for {0} queries")]
    PredicateNotAllowed(String),

    #[error("A predicate is required for {0} queries")]
    PredicateRequired(String),

    #[error("Invalid sort: {0}")]
    InvalidSort(String),

    #[error("Pagination window {requested} exceeds the maximum of {max}")]
    PaginationTooLarge { requested: usize, max: usize },

    #[error("The model of a query cannot be changed")]
    ImmutableModel,

    #[error("Invalid value for `{field}`: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Operation not permitted: {0}")]
    NotPermitted(String),

    #[error("Remote error ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Local cache error: {0}")]
    Cache(String),
}

impl CourierError {
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, CourierError>;
