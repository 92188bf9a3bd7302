//! Error types for sqlgate
//!
//! A small, closed taxonomy:
//! - `Connection` - connect/prepare/allocate failed
//! - `Arity` - placeholder vs argument count, or column count vs row shape
//! - `Execution` - execute/bind/fetch failed
//! - `Pool` - the requested role has no members
//! - `Deserialization` - row materialization failed
//!
//! Every constructor is `#[track_caller]` and records the raise site, so the
//! rendered message always carries `file:line` next to the native error text.

use std::fmt;
use std::panic::Location;
use thiserror::Error;

/// Result type for sqlgate operations
pub type Result<T> = std::result::Result<T, Error>;

/// The backend a driver-originated error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Driver {
    /// MySQL (native client protocol)
    MySql,
    /// Microsoft SQL Server (ODBC)
    SqlServer,
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MySql => write!(f, "mysql"),
            Self::SqlServer => write!(f, "sqlserver"),
        }
    }
}

/// Which count disagreed in an [`Error::Arity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArityKind {
    /// Placeholder count vs supplied argument count
    Params,
    /// Result column count vs row-shape field count
    Columns,
}

impl fmt::Display for ArityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Params => write!(f, "parameter"),
            Self::Columns => write!(f, "column"),
        }
    }
}

/// Source location captured at the raise site.
///
/// Renders as `file:line` with the file reduced to its basename.
#[derive(Debug, Clone, Copy)]
pub struct SourceLocation(&'static Location<'static>);

impl SourceLocation {
    #[track_caller]
    fn caller() -> Self {
        Self(Location::caller())
    }

    /// File basename of the raise site.
    pub fn file(&self) -> &'static str {
        let file = self.0.file();
        file.rsplit(['/', '\\']).next().unwrap_or(file)
    }

    /// Line number of the raise site.
    pub fn line(&self) -> u32 {
        self.0.line()
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file(), self.line())
    }
}

/// Main error type for sqlgate
#[derive(Error, Debug)]
pub enum Error {
    /// Connect, prepare or handle allocation failed
    #[error("[{location}] connection error ({driver}): {message}")]
    Connection {
        /// Originating backend
        driver: Driver,
        /// Message, including the native error string
        message: String,
        /// Native error code, when the driver reported one
        code: Option<i32>,
        /// Raise site
        location: SourceLocation,
    },

    /// Placeholder/argument or column/shape counts disagree
    #[error("[{location}] {what} arity mismatch: statement has {expected}, request has {actual}")]
    Arity {
        /// Which count disagreed
        what: ArityKind,
        /// Count on the statement side (placeholders or result columns)
        expected: usize,
        /// Count on the caller side (arguments or row-shape fields)
        actual: usize,
        /// Raise site
        location: SourceLocation,
    },

    /// Execute, bind or fetch failed
    #[error("[{location}] execution error ({driver}): {message}")]
    Execution {
        /// Originating backend
        driver: Driver,
        /// Message, including the native error string
        message: String,
        /// Native error code, when the driver reported one
        code: Option<i32>,
        /// Raise site
        location: SourceLocation,
    },

    /// The requested role has no members in the cluster
    #[error("[{location}] pool error: {message}")]
    Pool {
        /// What was requested and found missing
        message: String,
        /// Raise site
        location: SourceLocation,
    },

    /// Row materialization failed
    #[error("[{location}] deserialization error: {message}")]
    Deserialization {
        /// What could not be materialized
        message: String,
        /// Raise site
        location: SourceLocation,
    },
}

impl Error {
    /// Create a connection error
    #[track_caller]
    pub fn connection(driver: Driver, message: impl Into<String>) -> Self {
        Self::Connection {
            driver,
            message: message.into(),
            code: None,
            location: SourceLocation::caller(),
        }
    }

    /// Create a connection error carrying the native error code
    #[track_caller]
    pub fn connection_with_code(driver: Driver, message: impl Into<String>, code: i32) -> Self {
        Self::Connection {
            driver,
            message: message.into(),
            code: Some(code),
            location: SourceLocation::caller(),
        }
    }

    /// Create an execution error
    #[track_caller]
    pub fn execution(driver: Driver, message: impl Into<String>) -> Self {
        Self::Execution {
            driver,
            message: message.into(),
            code: None,
            location: SourceLocation::caller(),
        }
    }

    /// Create an execution error carrying the native error code
    #[track_caller]
    pub fn execution_with_code(driver: Driver, message: impl Into<String>, code: i32) -> Self {
        Self::Execution {
            driver,
            message: message.into(),
            code: Some(code),
            location: SourceLocation::caller(),
        }
    }

    /// Placeholder count and argument count disagree
    #[track_caller]
    pub fn param_arity(placeholders: usize, arguments: usize) -> Self {
        Self::Arity {
            what: ArityKind::Params,
            expected: placeholders,
            actual: arguments,
            location: SourceLocation::caller(),
        }
    }

    /// Result column count and row-shape field count disagree
    #[track_caller]
    pub fn column_arity(columns: usize, fields: usize) -> Self {
        Self::Arity {
            what: ArityKind::Columns,
            expected: columns,
            actual: fields,
            location: SourceLocation::caller(),
        }
    }

    /// Create a pool error
    #[track_caller]
    pub fn pool(message: impl Into<String>) -> Self {
        Self::Pool {
            message: message.into(),
            location: SourceLocation::caller(),
        }
    }

    /// Create a deserialization error
    #[track_caller]
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::Deserialization {
            message: message.into(),
            location: SourceLocation::caller(),
        }
    }

    /// Backend the error originated from, for driver-call failures
    pub fn driver(&self) -> Option<Driver> {
        match self {
            Self::Connection { driver, .. } | Self::Execution { driver, .. } => Some(*driver),
            _ => None,
        }
    }

    /// Native error code, when the driver reported one
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Connection { code, .. } | Self::Execution { code, .. } => *code,
            _ => None,
        }
    }

    /// Whether this is a SQL-side failure (connection, execution or arity),
    /// as opposed to pool routing or row materialization.
    pub fn is_sql(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Execution { .. } | Self::Arity { .. }
        )
    }

    /// Raise site of the error
    pub fn location(&self) -> SourceLocation {
        match self {
            Self::Connection { location, .. }
            | Self::Arity { location, .. }
            | Self::Execution { location, .. }
            | Self::Pool { location, .. }
            | Self::Deserialization { location, .. } => *location,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_raise_site() {
        let err = Error::connection(Driver::MySql, "connection refused");
        let rendered = err.to_string();
        assert!(rendered.contains("error.rs:"));
        assert!(rendered.contains("connection refused"));
        assert!(rendered.contains("mysql"));
    }

    #[test]
    fn test_location_is_basename() {
        let err = Error::pool("no master node available");
        assert_eq!(err.location().file(), "error.rs");
        assert!(err.location().line() > 0);
    }

    #[test]
    fn test_driver_and_code_accessors() {
        let err = Error::execution_with_code(Driver::SqlServer, "syntax error", 102);
        assert_eq!(err.driver(), Some(Driver::SqlServer));
        assert_eq!(err.code(), Some(102));

        let err = Error::pool("no slave node available");
        assert_eq!(err.driver(), None);
        assert_eq!(err.code(), None);
    }

    #[test]
    fn test_arity_display() {
        let err = Error::param_arity(2, 1);
        let rendered = err.to_string();
        assert!(rendered.contains("parameter arity mismatch"));
        assert!(rendered.contains("statement has 2"));
        assert!(rendered.contains("request has 1"));

        let err = Error::column_arity(3, 2);
        assert!(err.to_string().contains("column arity mismatch"));
    }

    #[test]
    fn test_is_sql() {
        assert!(Error::connection(Driver::MySql, "x").is_sql());
        assert!(Error::execution(Driver::SqlServer, "x").is_sql());
        assert!(Error::param_arity(1, 0).is_sql());
        assert!(!Error::pool("x").is_sql());
        assert!(!Error::deserialization("x").is_sql());
    }
}
