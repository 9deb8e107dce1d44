//! Shutdown discipline: in-flight subprocesses die within the grace bound
//! and finalizers run.

use netpulse::core::monitor::process::{ProbeRunner, ProcessSupervisor};
use netpulse::core::monitor::types::MonitorError;
use netpulse::core::monitor::{InstanceLock, ShutdownSignal};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

#[cfg(unix)]
#[tokio::test]
async fn ten_inflight_probes_die_within_two_seconds() {
    let supervisor = Arc::new(ProcessSupervisor::new());
    let (tx, rx) = watch::channel(false);
    let signal = ShutdownSignal::from_receiver(rx);

    // Ten hop pings and one traceroute stand-in, all long-running
    let mut handles = Vec::new();
    for _ in 0..11 {
        let sup = Arc::clone(&supervisor);
        let sig = signal.clone();
        handles.push(tokio::spawn(async move {
            sup.run(
                &["sleep".to_string(), "300".to_string()],
                Duration::from_secs(600),
                &sig,
            )
            .await
        }));
    }
    // Let them all spawn
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(supervisor.tracked_count(), 11);

    let started = Instant::now();
    let _ = tx.send(true);
    for handle in handles {
        let outcome = handle.await.unwrap();
        assert!(matches!(outcome, Err(MonitorError::Cancelled)));
    }
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(supervisor.tracked_count(), 0);

    // The sweep finds nothing left to kill
    supervisor.kill_orphans();
}

#[test]
fn lock_file_is_removed_on_drop() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".netpulse.lock");
    let lock = InstanceLock::acquire_at(path.clone()).unwrap();
    assert!(path.exists());
    drop(lock);
    assert!(!path.exists());
}
