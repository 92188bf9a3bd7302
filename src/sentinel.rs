//! Cluster monitor for MySQL Group Replication.
//!
//! A dedicated thread polls `performance_schema.replication_group_members`
//! through a lazily rebuilt monitor connection, keeps the sorted set of seed
//! endpoints (seeds are never forgotten) and the last known ONLINE
//! membership, and signals a condition variable whenever membership changes.
//! The pool's reconciliation thread blocks on that signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::connection::{Connection, Connector};
use crate::error::Result;
use crate::node::{NodeInfo, Role};

const MEMBERS_ANY: &str = "select member_host, member_port, member_role \
     from performance_schema.replication_group_members where member_state = 'ONLINE'";
const MEMBERS_PRIMARY: &str = "select member_host, member_port, member_role \
     from performance_schema.replication_group_members where member_state = 'ONLINE' \
     and member_role = 'PRIMARY'";
const MEMBERS_SECONDARY: &str = "select member_host, member_port, member_role \
     from performance_schema.replication_group_members where member_state = 'ONLINE' \
     and member_role = 'SECONDARY'";

/// Which members a topology query selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberFilter {
    /// ONLINE members with `member_role = 'PRIMARY'`
    Primary,
    /// ONLINE members with `member_role = 'SECONDARY'`
    Secondary,
    /// Every ONLINE member
    Any,
}

impl MemberFilter {
    /// The SQL this filter runs.
    pub const fn sql(self) -> &'static str {
        match self {
            Self::Primary => MEMBERS_PRIMARY,
            Self::Secondary => MEMBERS_SECONDARY,
            Self::Any => MEMBERS_ANY,
        }
    }
}

/// Polling cadence of the monitor thread.
#[derive(Debug, Clone, Copy)]
pub struct SentinelConfig {
    /// Sleep between full seed passes.
    pub poll_interval: Duration,
    /// Sleep after a failed probe before trying the next seed.
    pub retry_backoff: Duration,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            retry_backoff: Duration::from_secs(3),
        }
    }
}

struct TopologyState {
    /// Every endpoint ever seeded or observed, sorted by ip.
    seed_nodes: Vec<NodeInfo>,
    /// Last known ONLINE membership, sorted by ip.
    online_nodes: Vec<NodeInfo>,
    /// Bumped on every membership change and on wakeup; waiters block until
    /// it moves.
    epoch: u64,
}

struct SentinelShared<C: Connector> {
    connector: C,
    config: SentinelConfig,
    state: Mutex<TopologyState>,
    changed: Condvar,
    run: AtomicBool,
}

/// The cluster monitor.
pub struct Sentinel<C: Connector> {
    shared: Arc<SentinelShared<C>>,
    monitor: Option<JoinHandle<()>>,
}

impl<C: Connector> Sentinel<C> {
    /// Start monitoring with the default 3-second cadence.
    pub fn new(nodes: Vec<NodeInfo>, connector: C) -> Self {
        Self::with_config(nodes, connector, SentinelConfig::default())
    }

    /// Start monitoring with an explicit cadence.
    pub fn with_config(mut nodes: Vec<NodeInfo>, connector: C, config: SentinelConfig) -> Self {
        nodes.sort();
        let shared = Arc::new(SentinelShared {
            connector,
            config,
            state: Mutex::new(TopologyState {
                seed_nodes: nodes.clone(),
                online_nodes: nodes,
                epoch: 0,
            }),
            changed: Condvar::new(),
            run: AtomicBool::new(true),
        });

        let monitor_shared = Arc::clone(&shared);
        let monitor = thread::spawn(move || monitor_loop(&monitor_shared));

        Self {
            shared,
            monitor: Some(monitor),
        }
    }

    /// Block until the next membership change (or a [`wakeup`](Self::wakeup))
    /// and return the current ONLINE snapshot.
    ///
    /// A shutdown wake returns a snapshot equal to the previous one; callers
    /// must treat whatever comes back as the latest truth and reconcile
    /// idempotently.
    pub fn wait_for_cluster_change(&self) -> Vec<NodeInfo> {
        let mut state = self.shared.state.lock();
        let seen = state.epoch;
        while state.epoch == seen {
            self.shared.changed.wait(&mut state);
        }
        state.online_nodes.clone()
    }

    /// Like [`wait_for_cluster_change`](Self::wait_for_cluster_change), but
    /// also returns as soon as `stop` is set. `stop` must be raised before
    /// calling [`wakeup`](Self::wakeup), so a shutdown wake can never fall
    /// between the caller's stop check and the wait.
    pub fn wait_for_cluster_change_until(&self, stop: &AtomicBool) -> Vec<NodeInfo> {
        let mut state = self.shared.state.lock();
        let seen = state.epoch;
        while state.epoch == seen && !stop.load(Ordering::Acquire) {
            self.shared.changed.wait(&mut state);
        }
        state.online_nodes.clone()
    }

    /// Release one waiter of [`wait_for_cluster_change`](Self::wait_for_cluster_change)
    /// without a membership change. Used for shutdown.
    pub fn wakeup(&self) {
        let mut state = self.shared.state.lock();
        state.epoch += 1;
        drop(state);
        self.shared.changed.notify_all();
    }

    /// Open a session with one cluster endpoint, using the monitor's
    /// credentials.
    pub fn create_connection(&self, node: &NodeInfo) -> Result<C::Conn> {
        self.shared.connector.connect(node)
    }

    /// Fetch the selected ONLINE members over an existing connection.
    pub fn fetch_members(
        &self,
        conn: &mut C::Conn,
        filter: MemberFilter,
    ) -> Result<Vec<NodeInfo>> {
        fetch_members_with(conn, filter)
    }

    /// Single-node variant of [`fetch_members`](Self::fetch_members): the
    /// first selected member, if any.
    pub fn fetch_one(
        &self,
        conn: &mut C::Conn,
        filter: MemberFilter,
    ) -> Result<Option<NodeInfo>> {
        Ok(fetch_members_with(conn, filter)?.into_iter().next())
    }

    /// Snapshot of the last known ONLINE membership, sorted by ip.
    pub fn online_nodes(&self) -> Vec<NodeInfo> {
        self.shared.state.lock().online_nodes.clone()
    }

    /// Snapshot of every endpoint ever seeded or observed, sorted by ip.
    pub fn seed_nodes(&self) -> Vec<NodeInfo> {
        self.shared.state.lock().seed_nodes.clone()
    }
}

impl<C: Connector> Drop for Sentinel<C> {
    fn drop(&mut self) {
        self.shared.run.store(false, Ordering::Release);
        self.wakeup();
        if let Some(monitor) = self.monitor.take() {
            let _ = monitor.join();
        }
    }
}

fn monitor_loop<C: Connector>(shared: &SentinelShared<C>) {
    let mut monitor_conn: Option<C::Conn> = None;
    while shared.run.load(Ordering::Acquire) {
        let seeds = shared.state.lock().seed_nodes.clone();
        for node in &seeds {
            match probe(shared, &mut monitor_conn, node) {
                Ok(true) => break,
                Ok(false) => {
                    // Empty membership means the connection is not good.
                    monitor_conn = None;
                }
                Err(error) => {
                    tracing::warn!(ip = %node.ip, %error, "cluster membership probe failed");
                    monitor_conn = None;
                    thread::sleep(shared.config.retry_backoff);
                }
            }
        }
        thread::sleep(shared.config.poll_interval);
    }
}

/// One probe against one seed: ensure the monitor connection, fetch ONLINE
/// members, publish on change. `Ok(true)` ends the seed pass.
fn probe<C: Connector>(
    shared: &SentinelShared<C>,
    slot: &mut Option<C::Conn>,
    node: &NodeInfo,
) -> Result<bool> {
    let mut conn = match slot.take() {
        Some(conn) => conn,
        None => shared.connector.connect(node)?,
    };

    // The connection goes back into the slot only after a useful answer;
    // failures and empty answers leave the slot empty so the next probe
    // rebuilds it.
    let mut members = fetch_members_with(&mut conn, MemberFilter::Any)?;
    if members.is_empty() {
        return Ok(false);
    }
    members.sort();
    *slot = Some(conn);

    let mut state = shared.state.lock();
    if members != state.online_nodes {
        state.seed_nodes = union_by_ip(&members, &state.seed_nodes);
        tracing::info!(members = members.len(), "cluster membership changed");
        state.online_nodes = members;
        state.epoch += 1;
        drop(state);
        shared.changed.notify_all();
    }
    Ok(true)
}

fn fetch_members_with<Conn: Connection>(
    conn: &mut Conn,
    filter: MemberFilter,
) -> Result<Vec<NodeInfo>> {
    let rows: Vec<(String, String, String)> = conn.query(filter.sql(), &[])?;
    Ok(rows
        .into_iter()
        .map(|(host, port, role)| NodeInfo {
            ip: host,
            port,
            role: Role::from_member_role(&role),
        })
        .collect())
}

/// Union of two ip-sorted slices, keyed by ip; entries from `latest` win on
/// ties so an observed role replaces a stale seed role.
fn union_by_ip(latest: &[NodeInfo], seeds: &[NodeInfo]) -> Vec<NodeInfo> {
    let mut merged = Vec::with_capacity(latest.len() + seeds.len());
    let (mut i, mut j) = (0, 0);
    while i < latest.len() && j < seeds.len() {
        match latest[i].ip.cmp(&seeds[j].ip) {
            std::cmp::Ordering::Less => {
                merged.push(latest[i].clone());
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                merged.push(seeds[j].clone());
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                merged.push(latest[i].clone());
                i += 1;
                j += 1;
            }
        }
    }
    merged.extend(latest[i..].iter().cloned());
    merged.extend(seeds[j..].iter().cloned());
    merged
}
