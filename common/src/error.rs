use thiserror::Error;

/// The crate-wide result alias, mirrored in every layer from the parser
/// down to the server so a caller never has to spell out the error type.
pub type CResult<T> = Result<T, Error>;

/// Error taxonomy for the whole query/storage core.
///
/// Every variant maps to exactly one `"1"` reply string on the wire: a
/// worker never panics a connection down over a query error, it replies
/// with `Display`-formatted text and moves on.
#[derive(Debug, Error)]
pub enum Error {
    #[error("syntax error at position {position}: {message}")]
    Parse { message: String, position: usize },

    #[error("{0}")]
    Schema(String),

    #[error("invalid value for column {column} (expected {expected}, got {got})")]
    Type {
        column: String,
        expected: &'static str,
        got: String,
    },

    #[error("{0}")]
    Plan(String),

    #[error("{0}")]
    Auth(String),

    #[error("{0}")]
    Kv(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn schema(msg: impl Into<String>) -> Self {
        Error::Schema(msg.into())
    }

    pub fn plan(msg: impl Into<String>) -> Self {
        Error::Plan(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Error::Auth(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }
}
