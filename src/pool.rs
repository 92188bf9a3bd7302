//! Connection pools and the borrow guard.
//!
//! Two pool shapes share the same return surface:
//! - [`SinglePool`]: one endpoint, one FIFO queue.
//! - [`ClusterPool`]: per-endpoint FIFO queues split by replication role,
//!   round-robin selection inside each role, and a reconciliation thread
//!   that follows the sentinel's topology snapshots without discarding
//!   connections to surviving endpoints.
//!
//! Locks are held only for queue pops and pushes; connecting always happens
//! outside any pool lock. Reconciliation takes both role locks at once
//! (masters first, then slaves, always in that order), so borrowers can
//! never observe a half-swapped topology and `get` can never interleave
//! with a rebuild.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::connection::{Connection, Connector};
use crate::error::{Error, Result};
use crate::node::{NodeInfo, Role};
use crate::sentinel::{Sentinel, SentinelConfig};

/// The return half of a pool: where borrow guards hand connections back.
pub trait ConnectionPool {
    /// Connection type the pool manages.
    type Conn: Connection + Send;

    /// Return a borrowed connection. Unhealthy connections are destroyed,
    /// not enqueued; in cluster mode a connection whose endpoint has left
    /// the topology is destroyed as well.
    fn return_back(&self, conn: Self::Conn);
}

/// Scoped owner of a checked-out connection; returns it on drop.
///
/// Move-only. Dropping the guard (including by reassignment) hands the
/// connection back to its pool, which destroys it if it is unhealthy.
pub struct PooledConn<'a, P: ConnectionPool> {
    conn: Option<P::Conn>,
    pool: &'a P,
}

impl<'a, P: ConnectionPool> std::fmt::Debug for PooledConn<'a, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConn")
            .field("conn", &self.conn.is_some())
            .finish()
    }
}

impl<'a, P: ConnectionPool> PooledConn<'a, P> {
    fn new(conn: P::Conn, pool: &'a P) -> Self {
        Self {
            conn: Some(conn),
            pool,
        }
    }

    /// Health of the borrowed connection.
    pub fn is_healthy(&self) -> bool {
        self.conn.as_ref().is_some_and(Connection::is_healthy)
    }
}

impl<P: ConnectionPool> std::ops::Deref for PooledConn<'_, P> {
    type Target = P::Conn;

    fn deref(&self) -> &P::Conn {
        self.conn.as_ref().expect("connection already returned")
    }
}

impl<P: ConnectionPool> std::ops::DerefMut for PooledConn<'_, P> {
    fn deref_mut(&mut self) -> &mut P::Conn {
        self.conn.as_mut().expect("connection already returned")
    }
}

impl<P: ConnectionPool> Drop for PooledConn<'_, P> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.return_back(conn);
        }
    }
}

// ==================== Single mode ====================

/// One endpoint, one FIFO queue of idle connections.
pub struct SinglePool<C: Connector> {
    node: NodeInfo,
    connector: C,
    queue: Mutex<VecDeque<C::Conn>>,
}

impl<C: Connector> SinglePool<C> {
    /// Pool over one endpoint. Connections are created lazily on first
    /// borrow.
    pub fn new(node: NodeInfo, connector: C) -> Self {
        Self {
            node,
            connector,
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Borrow a connection: queue head if it is healthy, otherwise a fresh
    /// session (the unhealthy head is destroyed). Connecting happens outside
    /// the pool lock.
    pub fn get(&self) -> Result<PooledConn<'_, Self>> {
        let popped = self.queue.lock().pop_front();
        if let Some(conn) = popped {
            if conn.is_healthy() {
                return Ok(PooledConn::new(conn, self));
            }
            tracing::debug!(ip = %conn.ip(), "discarding unhealthy idle connection");
        }

        let conn = self.connector.connect(&self.node)?;
        Ok(PooledConn::new(conn, self))
    }

    /// Number of idle connections currently queued.
    pub fn idle(&self) -> usize {
        self.queue.lock().len()
    }
}

impl<C: Connector> ConnectionPool for SinglePool<C> {
    type Conn = C::Conn;

    fn return_back(&self, conn: C::Conn) {
        if !conn.is_healthy() {
            tracing::debug!(ip = %conn.ip(), "destroying unhealthy connection on return");
            return;
        }
        self.queue.lock().push_back(conn);
    }
}

// ==================== Cluster mode ====================

/// Queues, node list and round-robin counter for one replication role.
struct RoleGroup<T> {
    /// Monotonic borrow counter; never reset.
    fetch_count: u64,
    /// Current members of this role, in snapshot order.
    nodes: Vec<NodeInfo>,
    /// Idle connections keyed by endpoint ip.
    queues: HashMap<String, VecDeque<T>>,
}

impl<T> RoleGroup<T> {
    fn new() -> Self {
        Self {
            fetch_count: 0,
            nodes: Vec::new(),
            queues: HashMap::new(),
        }
    }
}

/// Rebuild both role groups from a topology snapshot, preserving queues for
/// surviving ips (including across role flips) and dropping queues whose ip
/// left the topology.
fn rebuild_groups<T>(
    snapshot: Vec<NodeInfo>,
    masters: &mut RoleGroup<T>,
    slaves: &mut RoleGroup<T>,
) {
    let mut new_master_queues = HashMap::new();
    let mut new_slave_queues = HashMap::new();
    let mut master_nodes = Vec::new();
    let mut slave_nodes = Vec::new();

    for node in snapshot {
        if node.role == Role::Primary {
            let queue = masters
                .queues
                .remove(&node.ip)
                .or_else(|| slaves.queues.remove(&node.ip))
                .unwrap_or_default();
            new_master_queues.insert(node.ip.clone(), queue);
            master_nodes.push(node);
        } else {
            let queue = slaves
                .queues
                .remove(&node.ip)
                .or_else(|| masters.queues.remove(&node.ip))
                .unwrap_or_default();
            new_slave_queues.insert(node.ip.clone(), queue);
            slave_nodes.push(node);
        }
    }

    // Whatever is left in the old maps belongs to departed endpoints; the
    // assignment below closes those connections.
    masters.queues = new_master_queues;
    masters.nodes = master_nodes;
    slaves.queues = new_slave_queues;
    slaves.nodes = slave_nodes;
}

struct ClusterShared<C: Connector> {
    masters: Mutex<RoleGroup<C::Conn>>,
    slaves: Mutex<RoleGroup<C::Conn>>,
    run: AtomicBool,
    // Declared last: queues close before the sentinel shuts down.
    sentinel: Sentinel<C>,
}

impl<C: Connector> ClusterShared<C> {
    fn reconcile(&self, snapshot: Vec<NodeInfo>) {
        // Lock order: masters, then slaves. Both held for the whole swap.
        let mut masters = self.masters.lock();
        let mut slaves = self.slaves.lock();
        rebuild_groups(snapshot, &mut masters, &mut slaves);
        tracing::info!(
            masters = masters.nodes.len(),
            slaves = slaves.nodes.len(),
            "cluster topology reconciled"
        );
    }
}

/// Role-routed pool over a MySQL Group Replication fleet.
pub struct ClusterPool<C: Connector> {
    shared: Arc<ClusterShared<C>>,
    reconciler: Option<JoinHandle<()>>,
}

impl<C: Connector> ClusterPool<C> {
    /// Pool seeded with the given endpoints, monitored at the default
    /// cadence.
    pub fn new(nodes: Vec<NodeInfo>, connector: C) -> Self {
        Self::with_config(nodes, connector, SentinelConfig::default())
    }

    /// Pool with an explicit sentinel cadence.
    pub fn with_config(nodes: Vec<NodeInfo>, connector: C, config: SentinelConfig) -> Self {
        let shared = Arc::new(ClusterShared {
            masters: Mutex::new(RoleGroup::new()),
            slaves: Mutex::new(RoleGroup::new()),
            run: AtomicBool::new(true),
            sentinel: Sentinel::with_config(nodes, connector, config),
        });

        let thread_shared = Arc::clone(&shared);
        let reconciler = thread::spawn(move || {
            while thread_shared.run.load(Ordering::Acquire) {
                let snapshot = thread_shared
                    .sentinel
                    .wait_for_cluster_change_until(&thread_shared.run);
                if !thread_shared.run.load(Ordering::Acquire) {
                    break;
                }
                thread_shared.reconcile(snapshot);
            }
        });

        Self {
            shared,
            reconciler: Some(reconciler),
        }
    }

    /// Borrow a connection to the current primary selected round-robin.
    ///
    /// Fails with a pool error when no primary is known.
    pub fn get_master(&self) -> Result<PooledConn<'_, Self>> {
        self.get_role(&self.shared.masters, "master")
    }

    /// Borrow a connection to a secondary selected round-robin.
    ///
    /// Fails with a pool error when no secondary is known.
    pub fn get_slave(&self) -> Result<PooledConn<'_, Self>> {
        self.get_role(&self.shared.slaves, "slave")
    }

    fn get_role(
        &self,
        group: &Mutex<RoleGroup<C::Conn>>,
        role: &str,
    ) -> Result<PooledConn<'_, Self>> {
        let (node, popped) = {
            let mut group = group.lock();
            group.fetch_count += 1;
            if group.nodes.is_empty() {
                return Err(Error::pool(format!("no {role} node found now")));
            }
            let index = (group.fetch_count % group.nodes.len() as u64) as usize;
            let node = group.nodes[index].clone();
            let popped = group
                .queues
                .get_mut(&node.ip)
                .and_then(VecDeque::pop_front);
            (node, popped)
        };

        match popped {
            Some(conn) if conn.is_healthy() => Ok(PooledConn::new(conn, self)),
            stale => {
                if stale.is_some() {
                    tracing::debug!(ip = %node.ip, "discarding unhealthy idle connection");
                }
                drop(stale);
                let conn = self.shared.sentinel.create_connection(&node)?;
                Ok(PooledConn::new(conn, self))
            }
        }
    }

    /// Current primaries, in snapshot order.
    pub fn master_nodes(&self) -> Vec<NodeInfo> {
        self.shared.masters.lock().nodes.clone()
    }

    /// Current secondaries, in snapshot order.
    pub fn slave_nodes(&self) -> Vec<NodeInfo> {
        self.shared.slaves.lock().nodes.clone()
    }

    /// Idle connection counts, `(masters, slaves)`.
    pub fn idle_connections(&self) -> (usize, usize) {
        let masters = self
            .shared
            .masters
            .lock()
            .queues
            .values()
            .map(VecDeque::len)
            .sum();
        let slaves = self
            .shared
            .slaves
            .lock()
            .queues
            .values()
            .map(VecDeque::len)
            .sum();
        (masters, slaves)
    }

    /// The pool's sentinel.
    pub fn sentinel(&self) -> &Sentinel<C> {
        &self.shared.sentinel
    }
}

impl<C: Connector> ConnectionPool for ClusterPool<C> {
    type Conn = C::Conn;

    fn return_back(&self, conn: C::Conn) {
        if !conn.is_healthy() {
            tracing::debug!(ip = %conn.ip(), "destroying unhealthy connection on return");
            return;
        }
        {
            let mut slaves = self.shared.slaves.lock();
            if let Some(queue) = slaves.queues.get_mut(conn.ip()) {
                queue.push_back(conn);
                return;
            }
        }
        {
            let mut masters = self.shared.masters.lock();
            if let Some(queue) = masters.queues.get_mut(conn.ip()) {
                queue.push_back(conn);
                return;
            }
        }
        tracing::debug!(ip = %conn.ip(), "endpoint left the topology; dropping connection");
    }
}

impl<C: Connector> Drop for ClusterPool<C> {
    fn drop(&mut self) {
        self.shared.run.store(false, Ordering::Release);
        self.shared.sentinel.wakeup();
        if let Some(reconciler) = self.reconciler.take() {
            let _ = reconciler.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::FromRow;
    use crate::value::Value;
    use std::sync::atomic::AtomicUsize;

    struct FakeConn {
        id: usize,
        ip: String,
        healthy: bool,
    }

    impl Connection for FakeConn {
        fn execute(&mut self, _sql: &str) -> Result<()> {
            Ok(())
        }

        fn exec(&mut self, _sql: &str, _params: &[Value]) -> Result<()> {
            Ok(())
        }

        fn query<R: FromRow>(&mut self, _sql: &str, _params: &[Value]) -> Result<Vec<R>> {
            Ok(Vec::new())
        }

        fn begin_transaction(&mut self) -> Result<()> {
            Ok(())
        }

        fn commit_transaction(&mut self) -> Result<()> {
            Ok(())
        }

        fn rollback(&mut self) -> Result<()> {
            Ok(())
        }

        fn is_healthy(&self) -> bool {
            self.healthy
        }

        fn ip(&self) -> &str {
            &self.ip
        }
    }

    struct FakeConnector {
        created: AtomicUsize,
    }

    impl FakeConnector {
        fn new() -> Self {
            Self {
                created: AtomicUsize::new(0),
            }
        }
    }

    impl Connector for FakeConnector {
        type Conn = FakeConn;

        fn connect(&self, node: &NodeInfo) -> Result<FakeConn> {
            let id = self.created.fetch_add(1, Ordering::Relaxed) + 1;
            Ok(FakeConn {
                id,
                ip: node.ip.clone(),
                healthy: true,
            })
        }
    }

    fn primary(ip: &str) -> NodeInfo {
        NodeInfo::with_role(ip, "3306", Role::Primary)
    }

    fn secondary(ip: &str) -> NodeInfo {
        NodeInfo::with_role(ip, "3306", Role::Secondary)
    }

    #[test]
    fn test_unhealthy_queue_head_triggers_lazy_create() {
        let pool = SinglePool::new(NodeInfo::new("10.0.0.1", "3306"), FakeConnector::new());
        pool.queue.lock().push_back(FakeConn {
            id: 0,
            ip: "10.0.0.1".into(),
            healthy: false,
        });

        let conn = pool.get().unwrap();
        assert!(conn.is_healthy());
        assert_eq!(conn.id, 1);
        // The unhealthy head is gone, not requeued.
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_rebuild_preserves_surviving_queues() {
        let mut masters: RoleGroup<u32> = RoleGroup::new();
        let mut slaves: RoleGroup<u32> = RoleGroup::new();
        masters.nodes = vec![primary("10.0.0.1")];
        masters.queues.insert("10.0.0.1".into(), VecDeque::from([7]));
        slaves.nodes = vec![secondary("10.0.0.2")];
        slaves.queues.insert("10.0.0.2".into(), VecDeque::from([8]));

        // Same membership, unchanged roles.
        rebuild_groups(
            vec![primary("10.0.0.1"), secondary("10.0.0.2")],
            &mut masters,
            &mut slaves,
        );

        assert_eq!(masters.queues["10.0.0.1"], VecDeque::from([7]));
        assert_eq!(slaves.queues["10.0.0.2"], VecDeque::from([8]));
        assert_eq!(masters.nodes.len(), masters.queues.len());
        assert_eq!(slaves.nodes.len(), slaves.queues.len());
    }

    #[test]
    fn test_rebuild_moves_queue_across_role_flip() {
        let mut masters: RoleGroup<u32> = RoleGroup::new();
        let mut slaves: RoleGroup<u32> = RoleGroup::new();
        slaves.nodes = vec![secondary("10.0.0.2")];
        slaves.queues.insert("10.0.0.2".into(), VecDeque::from([9]));

        // The secondary was promoted.
        rebuild_groups(vec![primary("10.0.0.2")], &mut masters, &mut slaves);

        assert_eq!(masters.queues["10.0.0.2"], VecDeque::from([9]));
        assert!(slaves.queues.is_empty());
        assert!(slaves.nodes.is_empty());
    }

    #[test]
    fn test_rebuild_drops_departed_endpoints_and_adds_new_empty() {
        let mut masters: RoleGroup<u32> = RoleGroup::new();
        let mut slaves: RoleGroup<u32> = RoleGroup::new();
        masters.nodes = vec![primary("10.0.0.1")];
        masters.queues.insert("10.0.0.1".into(), VecDeque::from([1]));

        rebuild_groups(
            vec![primary("10.0.0.9"), secondary("10.0.0.2")],
            &mut masters,
            &mut slaves,
        );

        // Departed ip is gone, new ips have empty queues for lazy creation.
        assert!(!masters.queues.contains_key("10.0.0.1"));
        assert_eq!(masters.queues["10.0.0.9"], VecDeque::new());
        assert_eq!(slaves.queues["10.0.0.2"], VecDeque::new());
    }
}
