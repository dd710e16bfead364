//! Failure handling: lost workers, silent workers and misbehaving peers.


use std::time::Duration;

use rowfarm::distributed::protocol::Frame;
use rowfarm::{Job, Matrix};
use test_harness::*;

#[tokio::test]
async fn test_killed_worker_unit_goes_to_replacement() {
    let master = start_master(fast_master_config()).await;
    let addr = master.local_addr();
    let slow = spawn_worker_with(addr, "slow", slow_multiply(Duration::from_millis(500)));

    let data = Matrix::from([[1, 2, 3], [4, 5, 6], [7, 8, 9]]);
    let runner = {
        let master = master.clone();
        let job = Job::square(&data).unwrap();
        tokio::spawn(async move { master.run_job(job, 1).await })
    };

    let busy = {
        let master = master.clone();
        wait_until(
            move || {
                master
                    .workers()
                    .iter()
                    .any(|w| w.id == "slow" && w.in_flight.is_some())
            },
            Duration::from_secs(2),
        )
        .await
    };
    assert!(busy, "slow worker should be holding a unit");

    // Kill the worker mid-unit, then bring up a healthy one
    slow.abort();
    let fast = spawn_worker(addr, "fast");

    let outcome = tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("job finishes after recovery")
        .unwrap()
        .unwrap();

    assert!(outcome.is_complete());
    assert_eq!(
        outcome.matrix,
        Matrix::from([[30, 36, 42], [66, 81, 96], [102, 126, 150]])
    );
    assert!(outcome.stats.requeued >= 1);
    assert!(!master.live_workers().contains(&"slow".to_string()));
    fast.abort();
}

#[tokio::test]
async fn test_survivor_finishes_job_alone() {
    let master = start_master(fast_master_config()).await;
    let addr = master.local_addr();
    let doomed = spawn_worker_with(addr, "doomed", slow_multiply(Duration::from_millis(300)));
    let survivor = spawn_worker(addr, "survivor");

    let lhs = Matrix::random(8, 8, 20);
    let expected = lhs.multiply(&lhs).unwrap();
    let runner = {
        let master = master.clone();
        let job = Job::square(&lhs).unwrap();
        tokio::spawn(async move { master.run_job(job, 2).await })
    };

    let busy = {
        let master = master.clone();
        wait_until(
            move || master.state().registry.assignment_of("doomed").is_some(),
            Duration::from_secs(2),
        )
        .await
    };
    assert!(busy);
    doomed.abort();

    let outcome = tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("survivor completes the job")
        .unwrap()
        .unwrap();
    assert!(outcome.is_complete());
    assert_eq!(outcome.matrix, expected);
    survivor.abort();
}

#[tokio::test]
async fn test_silent_worker_is_evicted() {
    let config = fast_master_config();
    let bound = Duration::from_millis(config.heartbeat_deadline_ms + 2 * config.detector_period_ms);
    let master = start_master(config).await;

    let mut raw = RawWorker::register(master.local_addr(), "quiet").await;
    let registered = {
        let master = master.clone();
        wait_until(move || master.live_workers().len() == 1, Duration::from_secs(1)).await
    };
    assert!(registered);

    // Allow some slack for scheduling on a busy machine
    let evicted = {
        let master = master.clone();
        wait_until(
            move || master.live_workers().is_empty(),
            bound + Duration::from_millis(500),
        )
        .await
    };
    assert!(evicted, "silent worker outlived its heartbeat deadline");
    assert!(raw.is_closed_by_master(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_heartbeats_keep_worker_alive() {
    let config = fast_master_config();
    let deadline = Duration::from_millis(config.heartbeat_deadline_ms);
    let master = start_master(config).await;

    let mut raw = RawWorker::register(master.local_addr(), "chatty").await;
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline * 2 {
        raw.heartbeat().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(master.live_workers(), vec!["chatty".to_string()]);
}

#[tokio::test]
async fn test_evicted_worker_unit_is_requeued() {
    let master = start_master(fast_master_config()).await;
    let addr = master.local_addr();
    let mut quiet = RawWorker::register(addr, "quiet").await;

    let data = Matrix::from([[1, 2], [3, 4]]);
    let runner = {
        let master = master.clone();
        let job = Job::square(&data).unwrap();
        tokio::spawn(async move { master.run_job(job, 1).await })
    };

    // Take a unit and go silent; the detector has to reclaim it
    let _task = quiet.next_task(Duration::from_secs(2)).await.unwrap();
    let worker = spawn_worker(addr, "fresh");

    let outcome = tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("job finishes once the silent worker is evicted")
        .unwrap()
        .unwrap();
    assert!(outcome.is_complete());
    assert_eq!(outcome.matrix, Matrix::from([[7, 10], [15, 22]]));
    assert!(outcome.stats.requeued >= 1);
    worker.abort();
}

#[tokio::test]
async fn test_first_frame_must_be_register() {
    let master = start_master(fast_master_config()).await;
    let mut raw = RawWorker::connect(master.local_addr(), "rude").await;

    raw.heartbeat().await;
    assert!(raw.is_closed_by_master(Duration::from_secs(2)).await);
    assert!(master.live_workers().is_empty());
}

#[tokio::test]
async fn test_garbage_bytes_close_connection() {
    use tokio::io::AsyncWriteExt;

    let master = start_master(fast_master_config()).await;
    let mut raw = RawWorker::connect(master.local_addr(), "noise").await;

    raw.stream
        .write_all(b"GET / HTTP/1.1\r\n\r\n")
        .await
        .unwrap();
    assert!(raw.is_closed_by_master(Duration::from_secs(2)).await);
    assert!(master.live_workers().is_empty());
}

#[tokio::test]
async fn test_duplicate_worker_id_gets_assigned_id() {
    let master = start_master(fast_master_config()).await;
    let addr = master.local_addr();

    let _first = RawWorker::register(addr, "twin").await;
    let registered = {
        let master = master.clone();
        wait_until(move || master.live_workers().len() == 1, Duration::from_secs(1)).await
    };
    assert!(registered);
    let _second = RawWorker::register(addr, "twin").await;
    let registered = {
        let master = master.clone();
        wait_until(move || master.live_workers().len() == 2, Duration::from_secs(1)).await
    };
    assert!(registered);

    let ids = master.live_workers();
    assert!(ids.contains(&"twin".to_string()));
    assert!(ids.iter().any(|id| id.starts_with("W-")));
}

#[tokio::test]
async fn test_worker_sending_task_is_tolerated() {
    let master = start_master(fast_master_config()).await;
    let mut raw = RawWorker::register(master.local_addr(), "odd").await;

    raw.send(Frame::task("odd", b"0;1|1".to_vec())).await;
    raw.heartbeat().await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(master.live_workers(), vec!["odd".to_string()]);
}
