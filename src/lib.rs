//! # sqlgate
//!
//! Typed prepared-statement access for MySQL and Microsoft SQL Server with
//! cluster-aware connection pooling.
//!
//! The crate covers three coupled concerns:
//!
//! - **Typed binding and decoding**: user values drive parameter binding and
//!   user row shapes (scalars, tuples, declared records) drive result column
//!   extraction, uniformly for both backends. NULL, variable-width text and
//!   blobs up to 16 MiB are handled by the same machinery.
//! - **Connection pooling**: a single-node FIFO pool, and a cluster pool
//!   (MySQL Group Replication) that routes reads to secondaries and writes to
//!   primaries across a fleet whose membership changes at runtime.
//! - **Cluster monitoring**: a sentinel thread polls
//!   `performance_schema.replication_group_members`, publishes topology
//!   snapshots and wakes the pool so it can reconcile its per-endpoint queues
//!   without discarding live connections.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use sqlgate::prelude::*;
//! use sqlgate::params;
//!
//! let db = Database::mysql(NodeInfo::new("127.0.0.1", "3306"), "app", "secret");
//! let mut conn = db.get_conn()?;
//! conn.exec("insert into t values (?, ?)", params![42_u32, "hi"])?;
//! let rows: Vec<(u32, String)> =
//!     conn.query("select id, name from t where id = ?", params![42_u32])?;
//! ```
//!
//! ## Feature flags
//!
//! - `mysql` - MySQL backend via the `mysql` crate
//! - `sqlserver` - SQL Server backend via ODBC (`odbc-api`)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod connection;
pub mod database;
pub mod error;
pub mod node;
pub mod pool;
pub mod row;
pub mod scoped;
pub mod sentinel;
pub mod value;

// Backend implementations (conditionally compiled)
#[cfg(feature = "mysql")]
pub mod mysql;

#[cfg(feature = "sqlserver")]
pub mod sqlserver;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::connection::{Connection, Connector};
    pub use crate::database::Database;
    pub use crate::error::{ArityKind, Driver, Error, Result};
    pub use crate::node::{ConnectionOptions, NodeInfo, Role};
    pub use crate::pool::{ClusterPool, ConnectionPool, PooledConn, SinglePool};
    pub use crate::row::{ColumnKind, ColumnSpec, FromRow, FromSql, Record};
    pub use crate::scoped::ScopeGuard;
    pub use crate::sentinel::{MemberFilter, Sentinel, SentinelConfig};
    pub use crate::value::{MediumText, SqlType, Value};

    #[cfg(feature = "mysql")]
    pub use crate::mysql::{MySqlConnection, MySqlConnector};

    #[cfg(feature = "sqlserver")]
    pub use crate::sqlserver::{SqlServerConnection, SqlServerConnector};
}

// Re-export commonly used items at crate root
pub use error::{Error, Result};
pub use value::Value;
