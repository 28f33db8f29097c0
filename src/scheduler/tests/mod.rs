use super::*;
use crate::error::Error;
use std::sync::atomic::AtomicUsize;

fn counting_job(counter: Arc<AtomicUsize>) -> Arc<dyn Job> {
    job_fn(move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })
}

fn failing_job(counter: Arc<AtomicUsize>) -> Arc<dyn Job> {
    job_fn(move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::Other("agent unreachable".into()))
        }
    })
}

async fn state_of(scheduler: &TaskScheduler, name: &str) -> TaskState {
    scheduler.task_status(name).await.unwrap().state
}

#[tokio::test]
async fn test_register_starts_pending() {
    let scheduler = TaskScheduler::new();
    scheduler
        .register(
            "download_process",
            counting_job(Arc::default()),
            Duration::from_secs(10),
            3,
        )
        .await
        .unwrap();

    let status = scheduler.status().await;
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].name, "download_process");
    assert_eq!(status[0].state, TaskState::Pending);
    assert_eq!(status[0].error_count, 0);
    assert!(status[0].last_run.is_none());
}

#[tokio::test]
async fn test_duplicate_registration_rejected() {
    let scheduler = TaskScheduler::new();
    scheduler
        .register("rename_sweep", counting_job(Arc::default()), Duration::from_secs(1), 3)
        .await
        .unwrap();

    let err = scheduler
        .register("rename_sweep", counting_job(Arc::default()), Duration::from_secs(1), 3)
        .await
        .unwrap_err();
    assert_eq!(err, TaskError::Duplicate("rename_sweep".into()));
    assert_eq!(scheduler.status().await.len(), 1);
}

#[tokio::test]
async fn test_unknown_task_status() {
    let scheduler = TaskScheduler::new();
    assert_eq!(
        scheduler.task_status("missing").await.unwrap_err(),
        TaskError::Unknown("missing".into())
    );
}

#[tokio::test]
async fn test_job_runs_periodically() {
    let scheduler = TaskScheduler::new();
    let counter = Arc::new(AtomicUsize::new(0));
    scheduler
        .register("tick", counting_job(counter.clone()), Duration::from_millis(10), 3)
        .await
        .unwrap();

    assert_eq!(scheduler.start_all().await, 1);
    assert_eq!(state_of(&scheduler, "tick").await, TaskState::Running);

    tokio::time::sleep(Duration::from_millis(100)).await;
    scheduler.shutdown().await;

    assert!(counter.load(Ordering::SeqCst) >= 3);
    let status = scheduler.task_status("tick").await.unwrap();
    assert!(status.last_run.is_some());
    assert_eq!(status.error_count, 0);
}

#[tokio::test]
async fn test_failures_counted_not_retried_immediately() {
    let scheduler = TaskScheduler::new();
    let counter = Arc::new(AtomicUsize::new(0));
    scheduler
        .register("flaky", failing_job(counter.clone()), Duration::from_millis(200), 3)
        .await
        .unwrap();

    scheduler.start_all().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // one invocation, then asleep for the full interval
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    let status = scheduler.task_status("flaky").await.unwrap();
    assert_eq!(status.error_count, 1);
    assert_eq!(status.state, TaskState::Running);
    assert!(status.last_run.is_none());

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_success_resets_error_count() {
    let scheduler = TaskScheduler::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let job = job_fn(move || {
        let calls = c.clone();
        async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::Other("not yet".into()))
            } else {
                Ok(())
            }
        }
    });
    scheduler
        .register("recovering", job, Duration::from_millis(10), 3)
        .await
        .unwrap();

    scheduler.start_all().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    scheduler.shutdown().await;

    let status = scheduler.task_status("recovering").await.unwrap();
    assert!(calls.load(Ordering::SeqCst) >= 3);
    assert_eq!(status.error_count, 0);
    assert!(status.last_run.is_some());
}

#[tokio::test]
async fn test_panicking_job_does_not_kill_loop() {
    let scheduler = TaskScheduler::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let job = job_fn(move || {
        let calls = c.clone();
        async move {
            if calls.fetch_add(1, Ordering::SeqCst) < usize::MAX {
                panic!("job bug");
            }
            Ok(())
        }
    });
    scheduler
        .register("buggy", job, Duration::from_millis(10), 100)
        .await
        .unwrap();

    scheduler.start_all().await;
    tokio::time::sleep(Duration::from_millis(80)).await;
    scheduler.shutdown().await;

    assert!(calls.load(Ordering::SeqCst) >= 2, "loop survived the panic");
    let status = scheduler.task_status("buggy").await.unwrap();
    assert!(status.error_count >= 2);
    assert!(status.state.is_terminal());
}

#[tokio::test]
async fn test_shutdown_wakes_sleeping_tasks() {
    let scheduler = TaskScheduler::new();
    scheduler
        .register("slow_a", counting_job(Arc::default()), Duration::from_secs(300), 3)
        .await
        .unwrap();
    scheduler
        .register("slow_b", counting_job(Arc::default()), Duration::from_secs(600), 3)
        .await
        .unwrap();

    scheduler.start_all().await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    tokio::time::timeout(Duration::from_secs(1), scheduler.shutdown())
        .await
        .expect("shutdown must not wait out the interval");

    for status in scheduler.status().await {
        assert_eq!(status.state, TaskState::Completed, "{}", status.name);
    }
}

#[tokio::test]
async fn test_shutdown_cancels_running_invocation() {
    let scheduler = TaskScheduler::new();
    let job = job_fn(|| async {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    });
    scheduler
        .register("stuck", job, Duration::from_secs(1), 3)
        .await
        .unwrap();

    scheduler.start_all().await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    tokio::time::timeout(Duration::from_secs(1), scheduler.shutdown())
        .await
        .unwrap();

    let state = state_of(&scheduler, "stuck").await;
    assert_eq!(state, TaskState::Cancelled);
    assert!(state.is_terminal());
}

#[tokio::test]
async fn test_start_all_ignores_non_pending() {
    let scheduler = TaskScheduler::new();
    scheduler
        .register("once", counting_job(Arc::default()), Duration::from_secs(60), 3)
        .await
        .unwrap();

    assert_eq!(scheduler.start_all().await, 1);
    assert_eq!(scheduler.start_all().await, 0, "already running");

    scheduler.shutdown().await;
    assert_eq!(scheduler.start_all().await, 0, "completed tasks need a reset");
}

#[tokio::test]
async fn test_reset_allows_restart() {
    let scheduler = TaskScheduler::new();
    let counter = Arc::new(AtomicUsize::new(0));
    scheduler
        .register("restartable", counting_job(counter.clone()), Duration::from_secs(60), 3)
        .await
        .unwrap();

    scheduler.start_all().await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    scheduler.shutdown().await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    scheduler.reset().await;
    assert_eq!(state_of(&scheduler, "restartable").await, TaskState::Pending);

    assert_eq!(scheduler.start_all().await, 1);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 2, "fresh shutdown signal after reset");
    assert_eq!(state_of(&scheduler, "restartable").await, TaskState::Running);

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_reset_keeps_error_count() {
    let scheduler = TaskScheduler::new();
    let counter = Arc::new(AtomicUsize::new(0));
    scheduler
        .register("unreachable", failing_job(counter.clone()), Duration::from_secs(60), 3)
        .await
        .unwrap();

    scheduler.start_all().await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    scheduler.shutdown().await;
    assert_eq!(scheduler.task_status("unreachable").await.unwrap().error_count, 1);

    scheduler.reset().await;
    assert_eq!(scheduler.task_status("unreachable").await.unwrap().error_count, 1);

    scheduler.start_all().await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    scheduler.shutdown().await;

    let status = scheduler.task_status("unreachable").await.unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert_eq!(status.error_count, 2, "failures accumulate across restarts");
}

#[tokio::test]
async fn test_status_serializes_interval_as_whole_seconds() {
    let scheduler = TaskScheduler::new();
    scheduler
        .register("rename_sweep", counting_job(Arc::default()), Duration::from_secs(600), 3)
        .await
        .unwrap();

    let status = scheduler.task_status("rename_sweep").await.unwrap();
    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["interval"], serde_json::json!(600));
    assert!(json["interval"].is_u64());
}
