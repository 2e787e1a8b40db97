use thiserror::Error;

use crate::types::Params;

/// Top-level error type for Arbor.
///
/// Every variant is returned to the caller as-is; nothing is retried.
#[derive(Error, Debug)]
pub enum ArborError {
    /// Store unreachable or credentials rejected.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Missing or invalid type descriptor.
    #[error("Mapping error: {0}")]
    Mapping(String),

    /// Transaction lifecycle misuse on a session.
    #[error("Transaction state error: {0}")]
    TransactionState(String),

    /// A required property or identity is absent.
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// The store rejected a statement, or a parameter could not be bound.
    #[error(
        "Query error: {message} (statement: {statement}; params: {})",
        params_snapshot(.params)
    )]
    Query {
        message: String,
        statement: String,
        params: Params,
    },

    #[error("Purge refused: set store.allow_purge to enable destructive resets")]
    PurgeNotPermitted,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ArborError {
    pub fn query(message: impl Into<String>, statement: &str, params: &Params) -> Self {
        Self::Query {
            message: message.into(),
            statement: statement.to_string(),
            params: params.clone(),
        }
    }
}

fn params_snapshot(params: &Params) -> String {
    serde_json::to_string(params).unwrap_or_else(|_| format!("{params:?}"))
}

pub type Result<T> = std::result::Result<T, ArborError>;
