//! End-to-end tests for the tasklets runtime.
//!
//! These exercise the public facade the way an embedding host would:
//! submissions, joins, cancellation, timeouts, batches, adaptive
//! introspection, and shutdown.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tasklets::job::from_fn;
use tasklets::{
    Config, JobOptions, JobState, LogLevel, Outcome, Runtime, RuntimeEvent, TaskletError,
    WorkContext,
};

fn runtime_with_workers(workers: usize) -> Runtime {
    Runtime::with_config(
        Config::new()
            .with_workers(workers)
            .with_logging(LogLevel::Off),
    )
    .expect("runtime should start")
}

#[test]
fn single_job_completes_with_result() {
    let rt = runtime_with_workers(2);
    let before = rt.stats().completed_jobs;

    let id = rt
        .spawn(from_fn(|| Ok::<_, String>("42".to_string())))
        .expect("spawn");
    let outcome = rt.join(id).expect("join");

    assert_eq!(outcome.state(), JobState::Completed);
    assert_eq!(outcome.result_string(), Some("42".to_string()));
    assert_eq!(rt.stats().completed_jobs, before + 1);

    rt.shutdown(Duration::from_millis(500));
}

#[test]
fn thrown_error_becomes_failed_outcome() {
    let rt = runtime_with_workers(2);

    let id = rt
        .spawn(|_ctx: &WorkContext| Err::<Vec<u8>, _>("boom".to_string()))
        .expect("spawn");
    let outcome = rt.join(id).expect("join");

    assert_eq!(outcome.state(), JobState::Failed);
    assert!(outcome.error_text().expect("error text").contains("boom"));

    let stats = rt.stats();
    assert_eq!(stats.failed_jobs, 1);
    assert_eq!(stats.completed_jobs, 0);

    rt.shutdown(Duration::from_millis(500));
}

#[test]
fn delayed_dequeue_times_out_without_executing() {
    let rt = runtime_with_workers(1);

    // Occupy the only worker long enough for the victim's deadline to pass.
    let blocker = rt
        .spawn(|_ctx: &WorkContext| -> Result<Vec<u8>, String> {
            std::thread::sleep(Duration::from_millis(200));
            Ok(Vec::new())
        })
        .expect("spawn blocker");

    let executed = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&executed);
    let victim = rt
        .spawn_with(
            move |_ctx: &WorkContext| -> Result<Vec<u8>, String> {
                flag.store(true, Ordering::SeqCst);
                Ok(Vec::new())
            },
            JobOptions::new().with_timeout_ms(50),
        )
        .expect("spawn victim");

    let outcome = rt.join(victim).expect("join victim");
    assert_eq!(
        outcome,
        Outcome::Failure(TaskletError::Timeout { timeout_ms: 50 })
    );
    assert!(!executed.load(Ordering::SeqCst));

    rt.join(blocker).expect("join blocker");
    rt.shutdown(Duration::from_millis(500));
}

#[test]
fn parallel_batch_produces_identical_results() {
    let rt = runtime_with_workers(4);

    let ids = rt
        .spawn_many(100, |_index| {
            Box::new(|_ctx: &WorkContext| -> Result<Vec<u8>, String> {
                let sum: f64 = (0..1000).map(|i| (i as f64).sqrt()).sum();
                Ok(format!("{sum:.6}").into_bytes())
            })
        })
        .expect("spawn_many");

    let outcomes = rt.join_many(&ids).expect("join_many");
    assert_eq!(outcomes.len(), 100);

    let first = outcomes[0].result_string().expect("first result");
    for outcome in &outcomes {
        assert_eq!(outcome.state(), JobState::Completed);
        assert_eq!(outcome.result_string().as_deref(), Some(first.as_str()));
    }
    assert_eq!(rt.stats().completed_jobs, 100);

    rt.shutdown(Duration::from_millis(500));
}

#[test]
fn pending_job_can_be_cancelled() {
    let rt = runtime_with_workers(1);

    let blocker = rt
        .spawn(|_ctx: &WorkContext| -> Result<Vec<u8>, String> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(b"first".to_vec())
        })
        .expect("spawn blocker");

    let executed = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&executed);
    let victim = rt
        .spawn(move |_ctx: &WorkContext| -> Result<Vec<u8>, String> {
            flag.store(true, Ordering::SeqCst);
            Ok(Vec::new())
        })
        .expect("spawn victim");

    assert!(rt.cancel(victim).expect("cancel"));
    assert_eq!(rt.join(victim).expect("join"), Outcome::Cancelled);
    assert_eq!(rt.get_status(victim).expect("status"), JobState::Cancelled);

    // The first job is unaffected.
    let outcome = rt.join(blocker).expect("join blocker");
    assert_eq!(outcome.result_string(), Some("first".to_string()));
    assert!(!executed.load(Ordering::SeqCst));

    rt.shutdown(Duration::from_millis(500));
}

#[test]
fn shutdown_is_idempotent_and_emits_one_event() {
    let rt = runtime_with_workers(2);

    let events = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&events);
    rt.on_event(move |event| {
        if *event == RuntimeEvent::Shutdown {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    rt.shutdown(Duration::from_millis(500));

    let start = Instant::now();
    rt.shutdown(Duration::from_secs(10));
    rt.shutdown(Duration::from_secs(10));
    assert!(start.elapsed() < Duration::from_millis(100));

    // The listener runs on the host loop; it has already been joined by the
    // first shutdown, so the count is final.
    assert_eq!(events.load(Ordering::SeqCst), 1);
}

#[test]
fn submit_returns_before_the_job_runs() {
    let rt = runtime_with_workers(1);

    let id = rt
        .spawn(|_ctx: &WorkContext| -> Result<Vec<u8>, String> {
            std::thread::sleep(Duration::from_millis(150));
            Ok(Vec::new())
        })
        .expect("spawn");

    // No synchronous execution: the job cannot have finished yet.
    let status = rt.get_status(id).expect("status");
    assert!(matches!(status, JobState::Pending | JobState::Running));

    rt.join(id).expect("join");
    rt.shutdown(Duration::from_millis(500));
}

#[test]
fn job_ids_are_unique_for_the_process() {
    let rt = runtime_with_workers(4);

    let mut ids = Vec::new();
    for _ in 0..200 {
        ids.push(
            rt.spawn(from_fn(|| Ok::<_, String>(String::new())))
                .expect("spawn"),
        );
    }
    rt.join_many(&ids).expect("join_many");

    let mut unique = ids.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), ids.len());

    rt.shutdown(Duration::from_millis(500));
}

#[test]
fn descriptor_accounting_balances_after_load() {
    let rt = runtime_with_workers(4);

    let ids = rt
        .spawn_many(50, |_| {
            Box::new(|_ctx: &WorkContext| -> Result<Vec<u8>, String> { Ok(Vec::new()) })
        })
        .expect("spawn_many");
    rt.join_many(&ids).expect("join_many");

    let pool = rt.memory_stats().pool;
    assert_eq!(pool.in_use, 0);
    assert_eq!(
        pool.in_use + pool.available_in_pool as u64 + pool.dropped,
        pool.total_created
    );

    rt.shutdown(Duration::from_millis(500));
}

#[test]
fn low_level_join_keeps_tasklets_until_cleanup() {
    let rt = runtime_with_workers(2);

    let id = rt
        .spawn(from_fn(|| Ok::<_, String>(String::new())))
        .expect("spawn");
    rt.join(id).expect("join");

    // Low-level joins never reap: results stay readable across passes.
    let before = rt.memory_stats().active_tasklets;
    assert!(before >= 1);
    rt.force_cleanup();
    assert!(rt.get_status(id).is_ok());
    assert_eq!(rt.memory_stats().active_tasklets, before);

    rt.shutdown(Duration::from_millis(500));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_marks_tasklets_for_cleanup() {
    let rt = runtime_with_workers(2);

    rt.run(from_fn(|| Ok::<_, String>(String::new())))
        .await
        .expect("run");

    // The facade marked the tasklet; a pass (forced here, or the background
    // task racing us) reaps it.
    let reaped = rt.force_cleanup();
    assert!(reaped <= 1);
    assert_eq!(rt.memory_stats().active_tasklets, 0);

    tokio::task::spawn_blocking(move || rt.shutdown(Duration::from_millis(500)))
        .await
        .expect("shutdown");
}

#[test]
fn timeout_zero_never_times_out() {
    let rt = runtime_with_workers(1);

    let blocker = rt
        .spawn(|_ctx: &WorkContext| -> Result<Vec<u8>, String> {
            std::thread::sleep(Duration::from_millis(150));
            Ok(Vec::new())
        })
        .expect("spawn blocker");
    let patient = rt
        .spawn_with(
            from_fn(|| Ok::<_, String>("done".to_string())),
            JobOptions::new().with_timeout_ms(0),
        )
        .expect("spawn patient");

    rt.join(blocker).expect("join blocker");
    let outcome = rt.join(patient).expect("join patient");
    assert_eq!(outcome.result_string(), Some("done".to_string()));

    rt.shutdown(Duration::from_millis(500));
}

#[test]
fn force_analysis_on_fresh_runtime_yields_valid_defaults() {
    let rt = runtime_with_workers(2);

    rt.force_analysis();
    let rec = rt.recommendations();
    assert!(rec.invariants_hold());
    assert!(rec.worker_count >= 1);
    assert!(rec.overall_confidence >= 0.0 && rec.overall_confidence <= 1.0);

    rt.shutdown(Duration::from_millis(500));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_all_preserves_submission_order() {
    let rt = runtime_with_workers(4);

    let works: Vec<Box<dyn tasklets::Work>> = (0..20)
        .map(|i| {
            Box::new(move |_ctx: &WorkContext| -> Result<Vec<u8>, String> {
                Ok(i.to_string().into_bytes())
            }) as Box<dyn tasklets::Work>
        })
        .collect();

    let outcomes = rt.run_all(works).await.expect("run_all");
    assert_eq!(outcomes.len(), 20);
    for (i, outcome) in outcomes.iter().enumerate() {
        assert_eq!(outcome.result_string(), Some(i.to_string()));
    }

    tokio::task::spawn_blocking(move || rt.shutdown(Duration::from_millis(500)))
        .await
        .expect("shutdown");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn batch_reports_progress_for_every_item() {
    let rt = runtime_with_workers(2);

    let progress_names: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&progress_names);
    let progress: tasklets::runtime::ProgressCallback =
        Arc::new(move |completed, total, name: &str| {
            assert!(completed >= 1 && completed <= total);
            seen.lock().expect("lock").push(name.to_string());
        });

    let items: Vec<(String, Box<dyn tasklets::Work>)> = (0..5)
        .map(|i| {
            (
                format!("item-{i}"),
                Box::new(move |_ctx: &WorkContext| -> Result<Vec<u8>, String> {
                    Ok(i.to_string().into_bytes())
                }) as Box<dyn tasklets::Work>,
            )
        })
        .collect();

    let outcomes = rt.batch(items, Some(progress)).await.expect("batch");
    assert_eq!(outcomes.len(), 5);
    for (i, named) in outcomes.iter().enumerate() {
        assert_eq!(named.name, format!("item-{i}"));
        assert!(named.outcome.is_success());
    }

    // Every item produced exactly one progress event, order unspecified.
    let mut names = progress_names.lock().expect("lock").clone();
    names.sort();
    assert_eq!(
        names,
        (0..5).map(|i| format!("item-{i}")).collect::<Vec<_>>()
    );

    tokio::task::spawn_blocking(move || rt.shutdown(Duration::from_millis(500)))
        .await
        .expect("shutdown");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn completion_callbacks_run_off_the_worker_threads() {
    let rt = runtime_with_workers(2);

    let callback_thread: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&callback_thread);
    let payload = rt
        .run_with(
            from_fn(|| Ok::<_, String>("x".to_string())),
            JobOptions::new().with_callback(move |_id, _outcome| {
                let name = std::thread::current().name().map(String::from);
                *slot.lock().expect("lock") = name;
            }),
        )
        .await
        .expect("run_with");
    assert_eq!(payload, b"x");

    let name = callback_thread
        .lock()
        .expect("lock")
        .clone()
        .expect("callback ran");
    assert!(!name.starts_with("tasklets-worker"));

    tokio::task::spawn_blocking(move || rt.shutdown(Duration::from_millis(500)))
        .await
        .expect("shutdown");
}

#[test]
fn submissions_fail_after_shutdown() {
    let rt = runtime_with_workers(2);
    rt.shutdown(Duration::from_millis(200));
    assert_eq!(
        rt.spawn(from_fn(|| Ok::<_, String>(String::new()))),
        Err(TaskletError::PoolShutdown)
    );
}

#[test]
fn worker_resize_under_load_loses_nothing() {
    let rt = runtime_with_workers(1);

    let ids = rt
        .spawn_many(40, |i| {
            Box::new(move |_ctx: &WorkContext| -> Result<Vec<u8>, String> {
                std::thread::sleep(Duration::from_millis(3));
                Ok(i.to_string().into_bytes())
            })
        })
        .expect("spawn_many");

    rt.set_worker_count(16).expect("scale up");
    rt.set_worker_count(1).expect("scale down");

    let outcomes = rt.join_many(&ids).expect("join_many");
    assert!(outcomes.iter().all(|o| o.state() == JobState::Completed));
    assert_eq!(rt.stats().completed_jobs, 40);

    rt.shutdown(Duration::from_millis(500));
}
