//! The façade: one pool, topology chosen at compile time.
//!
//! `Database<SinglePool<_>>` exposes `get_conn`; `Database<ClusterPool<_>>`
//! exposes `get_master_conn` / `get_slave_conn`. Requesting a role from a
//! single-node database (or a general connection from a cluster one) is a
//! compile-time error because the method does not exist on that type.

use crate::connection::Connector;
use crate::error::Result;
use crate::node::NodeInfo;
use crate::pool::{ClusterPool, PooledConn, SinglePool};
use crate::sentinel::SentinelConfig;

#[cfg(feature = "mysql")]
use crate::mysql::MySqlConnector;

#[cfg(feature = "sqlserver")]
use crate::sqlserver::SqlServerConnector;

/// Handle to one database deployment. Owns the pool; hands out borrow
/// guards.
pub struct Database<P> {
    pool: P,
}

impl<P> Database<P> {
    /// The underlying pool.
    pub fn pool(&self) -> &P {
        &self.pool
    }
}

impl<C: Connector> Database<SinglePool<C>> {
    /// Single-node deployment over any connector.
    pub fn single(node: NodeInfo, connector: C) -> Self {
        Self {
            pool: SinglePool::new(node, connector),
        }
    }

    /// Borrow a connection to the one endpoint.
    pub fn get_conn(&self) -> Result<PooledConn<'_, SinglePool<C>>> {
        self.pool.get()
    }
}

impl<C: Connector> Database<ClusterPool<C>> {
    /// Cluster deployment over any connector, seeded with the given
    /// endpoints.
    pub fn cluster(nodes: Vec<NodeInfo>, connector: C) -> Self {
        Self {
            pool: ClusterPool::new(nodes, connector),
        }
    }

    /// Cluster deployment with an explicit sentinel cadence.
    pub fn cluster_with_config(nodes: Vec<NodeInfo>, connector: C, config: SentinelConfig) -> Self {
        Self {
            pool: ClusterPool::with_config(nodes, connector, config),
        }
    }

    /// Borrow a connection to the current primary.
    pub fn get_master_conn(&self) -> Result<PooledConn<'_, ClusterPool<C>>> {
        self.pool.get_master()
    }

    /// Borrow a connection to a secondary.
    pub fn get_slave_conn(&self) -> Result<PooledConn<'_, ClusterPool<C>>> {
        self.pool.get_slave()
    }
}

#[cfg(feature = "mysql")]
impl Database<SinglePool<MySqlConnector>> {
    /// Single MySQL node.
    pub fn mysql(
        node: NodeInfo,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::single(node, MySqlConnector::new(user, password))
    }
}

#[cfg(feature = "mysql")]
impl Database<ClusterPool<MySqlConnector>> {
    /// MySQL Group Replication cluster; all members share one set of
    /// credentials.
    pub fn mysql_cluster(
        nodes: Vec<NodeInfo>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::cluster(nodes, MySqlConnector::new(user, password))
    }
}

#[cfg(feature = "sqlserver")]
impl Database<SinglePool<SqlServerConnector>> {
    /// Single SQL Server node over the named ODBC driver.
    ///
    /// SQL Server clustering is not supported; there is no cluster
    /// constructor for this connector.
    pub fn sqlserver(
        node: NodeInfo,
        user: impl Into<String>,
        password: impl Into<String>,
        odbc_driver_name: impl Into<String>,
    ) -> Self {
        Self::single(node, SqlServerConnector::new(user, password, odbc_driver_name))
    }
}
