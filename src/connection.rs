//! Connection traits.
//!
//! [`Connection`] is the seam between the typed query surface and the two
//! backends: it carries the common operations (unprepared execute, prepared
//! exec/query, transaction verbs, health). Dispatch is static; pools and the
//! façade are generic over a [`Connector`], never over trait objects.
//! Backend-specific extras (`ping`, `last_insert_id`) live on the concrete
//! connection types.

use crate::error::Result;
use crate::row::FromRow;
use crate::value::Value;

/// One native database session.
///
/// A connection is exclusively owned by one borrower at a time. Any driver
/// call that fails flips the health flag, permanently; the pool destroys
/// unhealthy connections on return and lazily builds replacements.
pub trait Connection: Send {
    /// Run an unprepared statement with no result.
    fn execute(&mut self, sql: &str) -> Result<()>;

    /// Run a prepared statement, discarding any result.
    ///
    /// The placeholder count reported by the driver after prepare must equal
    /// `params.len()`; otherwise this fails with an arity error before any
    /// execution happens.
    fn exec(&mut self, sql: &str, params: &[Value]) -> Result<()>;

    /// Run a prepared statement and materialize every result row into `R`.
    ///
    /// Checks both arities after prepare and before execute: placeholders vs
    /// `params.len()`, and the statement's column count vs `R::COLUMNS`.
    fn query<R: FromRow>(&mut self, sql: &str, params: &[Value]) -> Result<Vec<R>>;

    /// Open a transaction.
    fn begin_transaction(&mut self) -> Result<()>;

    /// Commit the open transaction.
    fn commit_transaction(&mut self) -> Result<()>;

    /// Roll back the open transaction.
    fn rollback(&mut self) -> Result<()>;

    /// Last-observed health. False once any driver call has failed.
    fn is_healthy(&self) -> bool;

    /// Endpoint address this session is bound to, used for return-to-pool
    /// routing.
    fn ip(&self) -> &str;
}

/// Factory for connections to arbitrary cluster endpoints.
pub trait Connector: Send + Sync + 'static {
    /// The connection type this factory produces.
    type Conn: Connection + Send + 'static;

    /// Establish a session with the given endpoint.
    fn connect(&self, node: &crate::node::NodeInfo) -> Result<Self::Conn>;
}
