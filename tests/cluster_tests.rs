//! End-to-end tests: a master and real workers over loopback TCP.


use std::time::Duration;

use rowfarm::error::CoordinateError;
use rowfarm::{Job, Matrix};
use test_harness::*;

#[tokio::test]
async fn test_square_two_by_two_with_one_worker() {
    let master = start_master(fast_master_config()).await;
    let worker = spawn_worker(master.local_addr(), "w1");

    let data = Matrix::from([[1, 2], [3, 4]]);
    let result = master
        .coordinate("multiply", &data, 1)
        .await
        .expect("one worker is enough");

    assert_eq!(result, Matrix::from([[7, 10], [15, 22]]));
    worker.abort();
}

#[tokio::test]
async fn test_multiply_two_matrices() {
    let master = start_master(fast_master_config()).await;
    let worker = spawn_worker(master.local_addr(), "w1");

    let job = Job::multiply(
        Matrix::from([[1, 2], [3, 4]]),
        Matrix::from([[5, 6], [7, 8]]),
    )
    .unwrap();
    let outcome = master.run_job(job, 1).await.unwrap();

    assert!(outcome.is_complete());
    assert_eq!(outcome.matrix, Matrix::from([[19, 22], [43, 50]]));
    assert_eq!(outcome.stats.dispatched, 2);
    assert_eq!(outcome.stats.requeued, 0);
    worker.abort();
}

#[tokio::test]
async fn test_no_workers_returns_none() {
    let mut config = fast_master_config();
    config.worker_wait_ms = 100;
    let master = start_master(config).await;

    let data = Matrix::from([[1, 2], [3, 4]]);
    assert!(master.coordinate("multiply", &data, 1).await.is_none());

    let err = master.run_job(Job::square(&data).unwrap(), 1).await;
    assert_eq!(err.unwrap_err(), CoordinateError::NoWorkers);
}

#[tokio::test]
async fn test_unknown_operation_returns_none() {
    let master = start_master(fast_master_config()).await;
    let worker = spawn_worker(master.local_addr(), "w1");

    let data = Matrix::from([[1, 2], [3, 4]]);
    assert!(master.coordinate("transpose", &data, 1).await.is_none());
    // Nothing was dispatched for the rejected request
    assert!(master.state().active_job().is_none());
    worker.abort();
}

#[tokio::test]
async fn test_many_workers_share_a_larger_job() {
    let master = start_master(fast_master_config()).await;
    let addr = master.local_addr();
    let workers: Vec<_> = (0..3)
        .map(|i| spawn_worker(addr, &format!("w{}", i)))
        .collect();

    let lhs = Matrix::random(12, 12, 50);
    let rhs = Matrix::random(12, 7, 50);
    let expected = lhs.multiply(&rhs).unwrap();

    let outcome = master
        .run_job(Job::multiply(lhs, rhs).unwrap(), 3)
        .await
        .unwrap();

    assert!(outcome.is_complete());
    assert_eq!(outcome.matrix, expected);
    assert_eq!(outcome.total, 12);
    assert!(outcome.stats.dispatched >= 12);
    assert_eq!(master.live_workers().len(), 3);

    for worker in workers {
        worker.abort();
    }
}

#[tokio::test]
async fn test_consecutive_jobs_on_same_master() {
    let master = start_master(fast_master_config()).await;
    let worker = spawn_worker(master.local_addr(), "w1");

    let first = Matrix::from([[2, 0], [0, 2]]);
    let second = Matrix::from([[1, 1], [1, 1]]);

    assert_eq!(
        master.coordinate("multiply", &first, 1).await,
        Some(Matrix::from([[4, 0], [0, 4]]))
    );
    assert_eq!(
        master.coordinate("matrix_multiply", &second, 1).await,
        Some(Matrix::from([[2, 2], [2, 2]]))
    );
    worker.abort();
}

#[tokio::test]
async fn test_worker_holds_one_unit_at_a_time() {
    let master = start_master(fast_master_config()).await;
    let mut raw = RawWorker::register(master.local_addr(), "raw").await;

    let job = Job::square(&Matrix::from([[1, 2, 3], [4, 5, 6], [7, 8, 9]])).unwrap();
    let runner = {
        let master = master.clone();
        tokio::spawn(async move { master.run_job(job, 1).await })
    };

    let mut answered = Vec::new();
    for _ in 0..3 {
        let task = raw
            .next_task(Duration::from_secs(2))
            .await
            .expect("a task for the only worker");
        // Nothing else arrives while this unit is outstanding
        assert!(raw.next_task(Duration::from_millis(150)).await.is_none());
        raw.heartbeat().await;
        answered.push(raw.answer(&task).await);
    }
    answered.sort_unstable();
    assert_eq!(answered, vec![0, 1, 2]);

    let outcome = runner.await.unwrap().unwrap();
    assert!(outcome.is_complete());
    assert_eq!(
        outcome.matrix,
        Matrix::from([[30, 36, 42], [66, 81, 96], [102, 126, 150]])
    );
}

#[tokio::test]
async fn test_duplicate_results_are_ignored() {
    let master = start_master(fast_master_config()).await;
    let mut raw = RawWorker::register(master.local_addr(), "raw").await;

    let job = Job::square(&Matrix::from([[1, 2], [3, 4]])).unwrap();
    let runner = {
        let master = master.clone();
        tokio::spawn(async move { master.run_job(job, 1).await })
    };

    let task = raw.next_task(Duration::from_secs(2)).await.unwrap();
    raw.answer(&task).await;
    // Second copy of the same row, with a different value
    let index = raw.answer(&task).await;
    raw.send_result(index, &[-1, -1]).await;

    let task = raw.next_task(Duration::from_secs(2)).await.unwrap();
    raw.answer(&task).await;

    let outcome = runner.await.unwrap().unwrap();
    assert_eq!(outcome.matrix, Matrix::from([[7, 10], [15, 22]]));
    assert!(outcome.stats.duplicate_results >= 1);
}

#[tokio::test]
async fn test_second_job_rejected_while_first_runs() {
    let master = start_master(fast_master_config()).await;
    let mut raw = RawWorker::register(master.local_addr(), "raw").await;

    let data = Matrix::from([[1, 2], [3, 4]]);
    let runner = {
        let master = master.clone();
        let job = Job::square(&data).unwrap();
        tokio::spawn(async move { master.run_job(job, 1).await })
    };

    let task = raw.next_task(Duration::from_secs(2)).await.unwrap();
    let err = master.run_job(Job::square(&data).unwrap(), 1).await;
    assert_eq!(err.unwrap_err(), CoordinateError::JobInProgress);

    raw.answer(&task).await;
    let task = raw.next_task(Duration::from_secs(2)).await.unwrap();
    raw.answer(&task).await;
    assert!(runner.await.unwrap().unwrap().is_complete());
}

#[tokio::test]
async fn test_deadline_returns_partial_result() {
    let mut config = fast_master_config();
    config.job_deadline_ms = 400;
    // Keep the silent worker registered for the whole job
    config.heartbeat_deadline_ms = 5000;
    let master = start_master(config).await;
    let mut raw = RawWorker::register(master.local_addr(), "raw").await;

    let job = Job::square(&Matrix::from([[1, 2], [3, 4]])).unwrap();
    let runner = {
        let master = master.clone();
        tokio::spawn(async move { master.run_job(job, 1).await })
    };

    // Answer one row and sit on the next
    let task = raw.next_task(Duration::from_secs(2)).await.unwrap();
    let index = raw.answer(&task).await;
    let _held = raw.next_task(Duration::from_secs(2)).await.unwrap();

    let outcome = runner.await.unwrap().unwrap();
    assert!(!outcome.is_complete());
    assert_eq!(outcome.completed, 1);
    assert_eq!(outcome.missing, vec![1 - index]);
    // Missing rows come back as zeros
    assert_eq!(outcome.matrix.row(1 - index), Some(&[0, 0][..]));
}

#[tokio::test]
async fn test_worker_exits_when_master_shuts_down() {
    let master = start_master(fast_master_config()).await;
    let addr = master.local_addr();
    let worker = spawn_worker(addr, "w1");

    assert_eq!(master.wait_for_workers(1, Duration::from_secs(2)).await, 1);

    master.shutdown();
    let summary = tokio::time::timeout(Duration::from_secs(2), worker)
        .await
        .expect("worker stops after master shutdown")
        .unwrap()
        .unwrap();
    assert_eq!(summary.worker_id, "w1");
}
