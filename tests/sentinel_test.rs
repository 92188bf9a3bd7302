//! Sentinel behavior: membership discovery, seed retention, wakeup and the
//! member queries.

mod common;

use common::{fast_config, wait_until, MockCluster, MockConnector};
use sqlgate::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn sentinel_over(
    cluster: &Arc<MockCluster>,
    seeds: Vec<NodeInfo>,
) -> Sentinel<MockConnector> {
    Sentinel::with_config(seeds, MockConnector::new(Arc::clone(cluster)), fast_config())
}

#[test]
fn test_wait_returns_discovered_membership() {
    let cluster = MockCluster::new();
    cluster.set_members(&[
        ("10.0.0.1", "3306", "PRIMARY"),
        ("10.0.0.2", "3306", "SECONDARY"),
    ]);
    let sentinel = sentinel_over(&cluster, vec![NodeInfo::new("10.0.0.1", "3306")]);

    // Seeds carry unknown roles, so the first successful probe publishes a
    // change carrying the observed roles.
    let snapshot = sentinel.wait_for_cluster_change();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[0].role, Role::Primary);
    assert_eq!(snapshot[1].role, Role::Secondary);
}

#[test]
fn test_seeds_are_never_forgotten() {
    let cluster = MockCluster::new();
    cluster.set_members(&[
        ("10.0.0.2", "3306", "PRIMARY"),
        ("10.0.0.3", "3306", "SECONDARY"),
    ]);
    let sentinel = sentinel_over(&cluster, vec![NodeInfo::new("10.0.0.1", "3306")]);

    let _ = sentinel.wait_for_cluster_change();

    let seed_ips: Vec<String> = sentinel.seed_nodes().into_iter().map(|n| n.ip).collect();
    assert_eq!(seed_ips, ["10.0.0.1", "10.0.0.2", "10.0.0.3"]);

    // Online membership only carries what the cluster reported.
    let online_ips: Vec<String> = sentinel.online_nodes().into_iter().map(|n| n.ip).collect();
    assert_eq!(online_ips, ["10.0.0.2", "10.0.0.3"]);
}

#[test]
fn test_wakeup_releases_a_waiter_without_change() {
    let cluster = MockCluster::new();
    // No members: the monitor keeps resetting its connection and never
    // publishes a change.
    let sentinel = Arc::new(sentinel_over(&cluster, vec![NodeInfo::new("10.0.0.1", "3306")]));

    let waiter = {
        let sentinel = Arc::clone(&sentinel);
        std::thread::spawn(move || sentinel.wait_for_cluster_change())
    };
    std::thread::sleep(Duration::from_millis(50));
    sentinel.wakeup();

    let snapshot = waiter.join().unwrap();
    // Shutdown-style wake: the snapshot equals the seed state.
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].ip, "10.0.0.1");
}

#[test]
fn test_monitor_survives_connect_failures() {
    let cluster = MockCluster::new();
    cluster.fail_connects(true);
    let sentinel = sentinel_over(&cluster, vec![NodeInfo::new("10.0.0.1", "3306")]);

    // Let it fail a few rounds, then recover.
    std::thread::sleep(Duration::from_millis(60));
    cluster.set_members(&[("10.0.0.1", "3306", "PRIMARY")]);
    cluster.fail_connects(false);

    assert!(wait_until(Duration::from_secs(2), || {
        sentinel
            .online_nodes()
            .first()
            .is_some_and(|n| n.role == Role::Primary)
    }));
}

#[test]
fn test_fetch_members_filters_by_role() {
    let cluster = MockCluster::new();
    cluster.set_members(&[
        ("10.0.0.1", "3306", "PRIMARY"),
        ("10.0.0.2", "3306", "SECONDARY"),
        ("10.0.0.3", "3306", "SECONDARY"),
    ]);
    let sentinel = sentinel_over(&cluster, vec![NodeInfo::new("10.0.0.1", "3306")]);
    let node = NodeInfo::new("10.0.0.1", "3306");
    let mut conn = sentinel.create_connection(&node).unwrap();

    let all = sentinel.fetch_members(&mut conn, MemberFilter::Any).unwrap();
    assert_eq!(all.len(), 3);

    let primaries = sentinel
        .fetch_members(&mut conn, MemberFilter::Primary)
        .unwrap();
    assert_eq!(primaries.len(), 1);
    assert_eq!(primaries[0].ip, "10.0.0.1");
    assert_eq!(primaries[0].port, "3306");

    let one = sentinel
        .fetch_one(&mut conn, MemberFilter::Secondary)
        .unwrap()
        .unwrap();
    assert_eq!(one.ip, "10.0.0.2");

    let missing = {
        cluster.set_members(&[("10.0.0.1", "3306", "PRIMARY")]);
        sentinel.fetch_one(&mut conn, MemberFilter::Secondary).unwrap()
    };
    assert!(missing.is_none());
}
