//! Per-set serialization of concurrent reconciliations

use std::sync::Arc;
use std::time::Duration;

use ipsetmgr::{AddressFamily, IpsetConfig, IpsetMgr};
use ipsetmgr_test::{fake_ips, RecordingExecutor};

const V4: AddressFamily = AddressFamily::IPv4;

fn shared_mgr(delay: Duration) -> (Arc<IpsetMgr>, Arc<RecordingExecutor>) {
    let exec = Arc::new(RecordingExecutor::new().with_delay(delay));
    let mgr = Arc::new(IpsetMgr::new(IpsetConfig::default(), exec.clone()));
    (mgr, exec)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_set_is_serialized() {
    let (mgr, exec) = shared_mgr(Duration::from_millis(5));

    let tasks: Vec<_> = (1..=4)
        .map(|n| {
            let mgr = Arc::clone(&mgr);
            tokio::spawn(async move { mgr.set_members("sg1", V4, &fake_ips(0..n)).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(exec.max_in_flight(), 1);
    // Exactly one of the calls created the set
    let creates = exec
        .commands()
        .iter()
        .filter(|c| c.starts_with("ipset create"))
        .count();
    assert_eq!(creates, 1);
    assert!(mgr.set_exists("sg1", V4).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_different_sets_run_in_parallel() {
    let (mgr, exec) = shared_mgr(Duration::from_millis(20));

    let tasks: Vec<_> = ["sg1", "sg2", "sg3"]
        .into_iter()
        .map(|id| {
            let mgr = Arc::clone(&mgr);
            tokio::spawn(async move { mgr.set_members(id, V4, &fake_ips(0..2)).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert!(exec.max_in_flight() > 1);
    assert_eq!(mgr.managed_sets().await.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_destroy_racing_with_sync() {
    let (mgr, exec) = shared_mgr(Duration::from_millis(5));
    mgr.set_members("sg1", V4, &fake_ips(0..1)).await.unwrap();

    let destroyer = {
        let mgr = Arc::clone(&mgr);
        tokio::spawn(async move { mgr.destroy("sg1", V4).await })
    };
    let syncer = {
        let mgr = Arc::clone(&mgr);
        tokio::spawn(async move { mgr.set_members("sg1", V4, &fake_ips(0..2)).await })
    };
    destroyer.await.unwrap().unwrap();
    syncer.await.unwrap().unwrap();

    assert_eq!(exec.max_in_flight(), 1);

    // Whichever ran last decides whether the set is still tracked, and the
    // tracked state always matches what the last sequence left behind.
    let commands = exec.commands();
    let last_destroy = commands
        .iter()
        .rposition(|c| c == "ipset destroy IPv4sg1");
    let last_swap = commands
        .iter()
        .rposition(|c| c == "ipset swap IPv4sg1-new IPv4sg1");
    let last_add = commands
        .iter()
        .rposition(|c| c == "ipset add -exist IPv4sg1 10.0.0.2");
    let last_write = last_swap.max(last_add);

    if last_destroy > last_write {
        assert!(!mgr.set_exists("sg1", V4).await);
    } else {
        assert_eq!(mgr.members("sg1", V4).await.unwrap(), fake_ips(0..2));
    }
}
