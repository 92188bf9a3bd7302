//! Shared test support: a scripted connector so pool, sentinel and façade
//! behavior can be exercised without a live database.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sqlgate::prelude::*;
use sqlgate::Value;

/// Scripted cluster state, shared by the test body and every mock session.
pub struct MockCluster {
    /// `(member_host, member_port, member_role)` rows the membership queries
    /// return.
    members: Mutex<Vec<(String, String, String)>>,
    /// Canned rows for every other query.
    rows: Mutex<Vec<Vec<Value>>>,
    connects: Mutex<HashMap<String, usize>>,
    total_connects: AtomicUsize,
    fail_connects: AtomicBool,
    next_id: AtomicUsize,
}

impl MockCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            members: Mutex::new(Vec::new()),
            rows: Mutex::new(Vec::new()),
            connects: Mutex::new(HashMap::new()),
            total_connects: AtomicUsize::new(0),
            fail_connects: AtomicBool::new(false),
            next_id: AtomicUsize::new(0),
        })
    }

    pub fn set_members(&self, members: &[(&str, &str, &str)]) {
        *self.members.lock() = members
            .iter()
            .map(|(host, port, role)| (host.to_string(), port.to_string(), role.to_string()))
            .collect();
    }

    pub fn set_rows(&self, rows: Vec<Vec<Value>>) {
        *self.rows.lock() = rows;
    }

    pub fn fail_connects(&self, fail: bool) {
        self.fail_connects.store(fail, Ordering::Relaxed);
    }

    pub fn connects_to(&self, ip: &str) -> usize {
        self.connects.lock().get(ip).copied().unwrap_or(0)
    }

    pub fn total_connects(&self) -> usize {
        self.total_connects.load(Ordering::Relaxed)
    }
}

/// Connector producing scripted sessions.
pub struct MockConnector {
    cluster: Arc<MockCluster>,
}

impl MockConnector {
    pub fn new(cluster: Arc<MockCluster>) -> Self {
        Self { cluster }
    }
}

impl Connector for MockConnector {
    type Conn = MockConn;

    fn connect(&self, node: &NodeInfo) -> Result<MockConn> {
        if self.cluster.fail_connects.load(Ordering::Relaxed) {
            return Err(Error::connection(Driver::MySql, "mock connect refused"));
        }
        let id = self.cluster.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.cluster.total_connects.fetch_add(1, Ordering::Relaxed);
        *self
            .cluster
            .connects
            .lock()
            .entry(node.ip.clone())
            .or_insert(0) += 1;
        Ok(MockConn {
            id,
            ip: node.ip.clone(),
            healthy: true,
            cluster: Arc::clone(&self.cluster),
            log: Vec::new(),
        })
    }
}

/// One scripted session.
pub struct MockConn {
    pub id: usize,
    ip: String,
    healthy: bool,
    cluster: Arc<MockCluster>,
    /// Every statement this session has seen.
    pub log: Vec<String>,
}

impl MockConn {
    /// Simulate a failed driver call.
    pub fn poison(&mut self) {
        self.healthy = false;
    }
}

impl Connection for MockConn {
    fn execute(&mut self, sql: &str) -> Result<()> {
        self.log.push(sql.to_string());
        Ok(())
    }

    fn exec(&mut self, sql: &str, _params: &[Value]) -> Result<()> {
        self.log.push(sql.to_string());
        Ok(())
    }

    fn query<R: FromRow>(&mut self, sql: &str, _params: &[Value]) -> Result<Vec<R>> {
        self.log.push(sql.to_string());
        let rows: Vec<Vec<Value>> = if sql.contains("replication_group_members") {
            let members = self.cluster.members.lock().clone();
            members
                .into_iter()
                .filter(|(_, _, role)| {
                    if sql.contains("member_role = 'PRIMARY'") {
                        role == "PRIMARY"
                    } else if sql.contains("member_role = 'SECONDARY'") {
                        role == "SECONDARY"
                    } else {
                        true
                    }
                })
                .map(|(host, port, role)| {
                    vec![Value::Text(host), Value::Text(port), Value::Text(role)]
                })
                .collect()
        } else {
            self.cluster.rows.lock().clone()
        };
        rows.into_iter().map(R::from_row).collect()
    }

    fn begin_transaction(&mut self) -> Result<()> {
        self.execute("START TRANSACTION")
    }

    fn commit_transaction(&mut self) -> Result<()> {
        self.execute("COMMIT")
    }

    fn rollback(&mut self) -> Result<()> {
        self.execute("ROLLBACK")
    }

    fn is_healthy(&self) -> bool {
        self.healthy
    }

    fn ip(&self) -> &str {
        &self.ip
    }
}

/// Millisecond-scale sentinel cadence so tests converge quickly.
pub fn fast_config() -> SentinelConfig {
    SentinelConfig {
        poll_interval: Duration::from_millis(10),
        retry_backoff: Duration::from_millis(10),
    }
}

/// Poll a condition until it holds or the timeout passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}
