use std::fmt;

use crate::interval::IntervalParseError;

pub type Result<T, E = AdapterError> = std::result::Result<T, E>;

/// Errors raised by the adapter layer.
///
/// Driver errors are wrapped transparently so the database's own message
/// reaches the caller untouched.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Transaction nesting depth exceeded: {depth} levels are open and only one savepoint is supported")]
    NestingDepthExceeded { depth: u32 },

    #[error("No active transaction")]
    NoActiveTransaction,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    IntervalParse(#[from] IntervalParseError),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error(transparent)]
    Driver(#[from] tokio_postgres::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

/// Coarse classification of a failure, used by callers deciding whether to
/// surface, retry at a higher level, or abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// SQLSTATE class 42 syntax errors
    Syntax,
    /// Missing table/column, ambiguous reference
    Semantic,
    /// Data exceptions and constraint violations
    Execution,
    /// Aborted or invalid transaction state
    Transaction,
    /// Connection/communication errors
    Connection,
    /// Adapter-level rejection (configuration, unsupported feature, parse)
    Adapter,
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Syntax => write!(f, "Syntax Error"),
            ErrorCategory::Semantic => write!(f, "Semantic Error"),
            ErrorCategory::Execution => write!(f, "Execution Error"),
            ErrorCategory::Transaction => write!(f, "Transaction Error"),
            ErrorCategory::Connection => write!(f, "Connection Error"),
            ErrorCategory::Adapter => write!(f, "Adapter Error"),
            ErrorCategory::Unknown => write!(f, "Error"),
        }
    }
}

/// SQLSTATE raised by the distributed engine when a transaction must be
/// restarted after a serialization conflict.
pub const SERIALIZATION_FAILURE: &str = "40001";

impl AdapterError {
    /// SQLSTATE code of the underlying database error, if any.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            AdapterError::Driver(e) => e.as_db_error().map(|db| db.code().code()),
            _ => None,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            AdapterError::Driver(e) => match e.as_db_error() {
                Some(db) => categorize_sqlstate(db.code().code()),
                None if e.is_closed() => ErrorCategory::Connection,
                None => ErrorCategory::Unknown,
            },
            AdapterError::NestingDepthExceeded { .. } | AdapterError::NoActiveTransaction => {
                ErrorCategory::Transaction
            }
            AdapterError::Catalog(_) | AdapterError::Io(_) => ErrorCategory::Unknown,
            _ => ErrorCategory::Adapter,
        }
    }

    /// Whether the database asked for the whole transaction to be retried.
    /// The adapter never retries on its own.
    pub fn is_retryable(&self) -> bool {
        self.sqlstate() == Some(SERIALIZATION_FAILURE)
    }
}

/// Categorize a SQLSTATE code into an ErrorCategory.
pub fn categorize_sqlstate(code: &str) -> ErrorCategory {
    let Some(class) = code.get(..2) else {
        return ErrorCategory::Unknown;
    };
    match class {
        // 42601 = syntax_error; everything else in class 42 is semantic
        "42" if code == "42601" || code == "42000" => ErrorCategory::Syntax,
        "42" => ErrorCategory::Semantic,
        "22" | "23" | "53" | "54" | "55" | "57" => ErrorCategory::Execution,
        "25" | "40" => ErrorCategory::Transaction,
        "08" => ErrorCategory::Connection,
        _ => ErrorCategory::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_sqlstate() {
        assert_eq!(categorize_sqlstate("42601"), ErrorCategory::Syntax);
        assert_eq!(categorize_sqlstate("42P01"), ErrorCategory::Semantic);
        assert_eq!(categorize_sqlstate("23505"), ErrorCategory::Execution);
        assert_eq!(categorize_sqlstate("40001"), ErrorCategory::Transaction);
        assert_eq!(categorize_sqlstate("08006"), ErrorCategory::Connection);
        assert_eq!(categorize_sqlstate("XX000"), ErrorCategory::Unknown);
        assert_eq!(categorize_sqlstate("4"), ErrorCategory::Unknown);
    }

    #[test]
    fn test_categorize_non_ascii_sqlstate() {
        assert_eq!(categorize_sqlstate("é0001"), ErrorCategory::Unknown);
        assert_eq!(categorize_sqlstate("4é"), ErrorCategory::Unknown);
    }

    #[test]
    fn test_adapter_errors_are_categorized() {
        assert_eq!(
            AdapterError::Unsupported("expression index".into()).category(),
            ErrorCategory::Adapter
        );
        assert_eq!(
            AdapterError::NestingDepthExceeded { depth: 2 }.category(),
            ErrorCategory::Transaction
        );
        assert!(!AdapterError::NoActiveTransaction.is_retryable());
    }

    #[test]
    fn test_messages_keep_detail() {
        let err = AdapterError::Catalog("relation \"accounts\" does not exist".into());
        assert!(err.to_string().contains("relation \"accounts\" does not exist"));

        let err = AdapterError::NestingDepthExceeded { depth: 2 };
        assert!(err.to_string().contains("nesting depth exceeded"));
    }
}
