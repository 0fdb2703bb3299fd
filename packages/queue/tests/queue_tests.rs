#![allow(clippy::disallowed_methods)]

mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use common::{TestResult, collect_until_drain, fast_config, open_queue, wait_for};
use job_queue::{
    Completion, DbConfig, FnProcessor, Job, JobQueue, JobResult, JobState, Priority, Processing,
    QueueError, QueueEvent,
};
use tokio::sync::mpsc;

fn succeeded(event: &QueueEvent) -> bool {
    matches!(event, QueueEvent::JobDidSucceed { .. })
}

#[tokio::test]
async fn processes_an_enqueued_job() -> TestResult {
    let queue = open_queue(fast_config()).await?;
    let mut events = queue.subscribe();

    queue.register(
        "greet",
        FnProcessor::sync(|job: &Job| match job.data::<String>() {
            Ok(name) => JobResult::success().with_response(format!("hello {}", name)),
            Err(e) => JobResult::critical(e.to_string()),
        }),
    );
    let job = queue.enqueue("ada", "greet").await?;
    queue.start().await?;

    match wait_for(&mut events, succeeded).await? {
        QueueEvent::JobDidSucceed { job: done, response, .. } => {
            assert_eq!(done.id, job.id);
            assert_eq!(response.as_deref(), Some("hello ada"));
        }
        other => return Err(format!("unexpected event: {:?}", other).into()),
    }
    wait_for(&mut events, |e| matches!(e, QueueEvent::DidDrain { .. })).await?;
    assert_eq!(queue.job_count().await?, 0);
    Ok(())
}

#[tokio::test]
async fn dispatches_high_priority_first() -> TestResult {
    let queue = open_queue(fast_config()).await?;
    let mut events = queue.subscribe();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = seen.clone();
    queue.register(
        "step",
        FnProcessor::sync(move |job: &Job| {
            if let Ok(name) = job.data::<String>() {
                record.lock().unwrap().push(name);
            }
            JobResult::success()
        }),
    );

    for (name, priority) in [
        ("a", Priority::Default),
        ("b", Priority::High),
        ("c", Priority::Default),
        ("d", Priority::High),
    ] {
        queue.enqueue_with(name, priority, "step", None).await?;
    }

    queue.start().await?;
    collect_until_drain(&mut events).await?;

    assert_eq!(*seen.lock().unwrap(), vec!["b", "d", "a", "c"]);
    Ok(())
}

#[tokio::test]
async fn failing_job_is_dropped_at_the_retry_limit() -> TestResult {
    let queue = open_queue(fast_config().with_retry_limit(2)).await?;
    let mut events = queue.subscribe();

    queue.register("flaky", FnProcessor::sync(|_job: &Job| JobResult::fail("boom")));
    queue.enqueue(&42, "flaky").await?;
    queue.start().await?;

    let mut retries = 0;
    loop {
        match wait_for(&mut events, |e| matches!(e, QueueEvent::JobDidFail { .. })).await? {
            QueueEvent::JobDidFail { terminal: false, .. } => retries += 1,
            QueueEvent::JobDidFail { job, response, terminal: true, .. } => {
                assert_eq!(job.attempts, 2);
                assert_eq!(response.as_deref(), Some("boom"));
                break;
            }
            other => return Err(format!("unexpected event: {:?}", other).into()),
        }
    }

    assert_eq!(retries, 1);
    assert!(!queue.job_exists("flaky").await?);
    Ok(())
}

#[tokio::test]
async fn critical_failure_drops_immediately() -> TestResult {
    let queue = open_queue(fast_config()).await?;
    let mut events = queue.subscribe();

    queue.register(
        "parse",
        FnProcessor::sync(|_job: &Job| JobResult::critical("malformed")),
    );
    queue.enqueue("not json", "parse").await?;
    queue.start().await?;

    match wait_for(&mut events, |e| matches!(e, QueueEvent::JobDidFail { .. })).await? {
        QueueEvent::JobDidFail { job, terminal, .. } => {
            assert!(terminal);
            assert_eq!(job.attempts, 0);
        }
        other => return Err(format!("unexpected event: {:?}", other).into()),
    }
    assert_eq!(queue.job_count().await?, 0);
    Ok(())
}

#[tokio::test]
async fn group_completes_after_its_last_job() -> TestResult {
    let queue = open_queue(fast_config()).await?;
    let mut events = queue.subscribe();

    queue.register("resize", FnProcessor::sync(|_job: &Job| JobResult::success()));
    queue.start().await?;

    let jobs = queue
        .enqueue_group("album", |batch| {
            batch.enqueue("one.png", "resize")?;
            batch.enqueue("two.png", "resize")?;
            batch.enqueue_with_priority("cover.png", Priority::High, "resize")?;
            Ok(())
        })
        .await?;
    assert_eq!(jobs.len(), 3);
    assert!(jobs.iter().all(|job| job.group.as_deref() == Some("album")));

    let events = collect_until_drain(&mut events).await?;
    let successes = events.iter().filter(|e| succeeded(e)).count();
    let completions: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| matches!(e, QueueEvent::GroupDidComplete { group, .. } if group == "album"))
        .map(|(i, _)| i)
        .collect();

    assert_eq!(successes, 3);
    assert_eq!(completions.len(), 1);
    let last_success = events
        .iter()
        .rposition(succeeded)
        .ok_or("no success event")?;
    assert!(completions[0] > last_success);
    assert_eq!(queue.job_count_for_group("album").await?, 0);
    Ok(())
}

#[tokio::test]
async fn failed_group_setup_stores_nothing() -> TestResult {
    let queue = open_queue(fast_config()).await?;

    let result = queue
        .enqueue_group("broken", |batch| {
            batch.enqueue("first", "noop")?;
            let bad: HashMap<(u8, u8), u8> = HashMap::from([((1, 2), 3)]);
            batch.enqueue(&bad, "noop")?;
            Ok(())
        })
        .await;

    assert!(matches!(result, Err(QueueError::Payload(_))));
    assert_eq!(queue.job_count().await?, 0);

    // The hold was never taken, so later jobs still run.
    let mut events = queue.subscribe();
    queue.register("noop", FnProcessor::sync(|_job: &Job| JobResult::success()));
    queue.enqueue("after", "noop").await?;
    queue.start().await?;
    wait_for(&mut events, succeeded).await?;
    Ok(())
}

#[tokio::test]
async fn unencodable_payload_is_rejected() -> TestResult {
    let queue = open_queue(fast_config()).await?;

    let bad: HashMap<(u8, u8), u8> = HashMap::from([((1, 2), 3)]);
    let result = queue.enqueue(&bad, "noop").await;

    assert!(matches!(result, Err(QueueError::Payload(_))));
    assert_eq!(queue.job_count().await?, 0);
    Ok(())
}

#[tokio::test]
async fn callback_processor_reports_later() -> TestResult {
    let queue = open_queue(fast_config()).await?;
    let mut events = queue.subscribe();

    let (tx, mut rx) = mpsc::unbounded_channel::<Completion>();
    queue.register(
        "upload",
        FnProcessor::new(move |_job: &Job| {
            let (completion, processing) = Processing::callback();
            let _ = tx.send(completion);
            processing
        }),
    );
    let job = queue.enqueue("file.bin", "upload").await?;
    queue.start().await?;

    let completion = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await?
        .ok_or("processor never ran")?;
    assert!(queue.is_active("upload").await?);
    assert_eq!(queue.status().await?.in_flight, Some(job.id));

    completion.complete(JobResult::success().with_response("stored"));

    match wait_for(&mut events, succeeded).await? {
        QueueEvent::JobDidSucceed { response, .. } => {
            assert_eq!(response.as_deref(), Some("stored"));
        }
        other => return Err(format!("unexpected event: {:?}", other).into()),
    }
    Ok(())
}

#[tokio::test]
async fn emptying_discards_the_in_flight_outcome() -> TestResult {
    let queue = open_queue(fast_config()).await?;
    let mut events = queue.subscribe();

    let (tx, mut rx) = mpsc::unbounded_channel::<Completion>();
    queue.register(
        "slow",
        FnProcessor::new(move |_job: &Job| {
            let (completion, processing) = Processing::callback();
            let _ = tx.send(completion);
            processing
        }),
    );
    queue.enqueue("work", "slow").await?;
    queue.enqueue("more", "slow").await?;
    queue.start().await?;

    let completion = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await?
        .ok_or("processor never ran")?;

    assert_eq!(queue.empty().await?, 2);
    wait_for(&mut events, |e| matches!(e, QueueEvent::DidDrain { .. })).await?;

    completion.complete(JobResult::success());
    tokio::time::sleep(Duration::from_millis(200)).await;

    while let Ok(event) = events.try_recv() {
        assert!(!succeeded(&event), "unexpected event: {:?}", event);
    }
    assert_eq!(queue.job_count().await?, 0);
    assert_eq!(queue.status().await?.in_flight, None);
    Ok(())
}

#[tokio::test]
async fn stopped_queue_does_not_dispatch() -> TestResult {
    let queue = open_queue(fast_config()).await?;
    let mut events = queue.subscribe();

    let runs = Arc::new(Mutex::new(0));
    let counter = runs.clone();
    queue.register(
        "count",
        FnProcessor::sync(move |_job: &Job| {
            *counter.lock().unwrap() += 1;
            JobResult::success()
        }),
    );

    queue.start().await?;
    wait_for(&mut events, |e| matches!(e, QueueEvent::DidStart { .. })).await?;
    queue.stop().await?;
    wait_for(&mut events, |e| matches!(e, QueueEvent::DidStop { .. })).await?;
    assert!(!queue.is_running().await?);

    queue.enqueue(&1, "count").await?;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(*runs.lock().unwrap(), 0);
    assert_eq!(queue.job_count().await?, 1);

    queue.start().await?;
    wait_for(&mut events, succeeded).await?;
    assert_eq!(*runs.lock().unwrap(), 1);
    Ok(())
}

#[tokio::test]
async fn start_and_stop_are_idempotent() -> TestResult {
    let queue = open_queue(fast_config()).await?;
    let mut events = queue.subscribe();

    queue.start().await?;
    queue.start().await?;
    queue.stop().await?;
    queue.stop().await?;
    // Round-trip through the mailbox so every event has been sent.
    queue.status().await?;

    let mut starts = 0;
    let mut stops = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            QueueEvent::DidStart { .. } => starts += 1,
            QueueEvent::DidStop { .. } => stops += 1,
            _ => {}
        }
    }
    assert_eq!((starts, stops), (1, 1));
    Ok(())
}

#[tokio::test]
async fn missing_processor_defers_until_registered() -> TestResult {
    let queue = open_queue(fast_config()).await?;
    let mut events = queue.subscribe();

    let job = queue.enqueue("later", "report").await?;
    queue.start().await?;
    tokio::time::sleep(Duration::from_millis(150)).await;

    let stored = queue
        .next_job_for_task("report")
        .await?
        .ok_or("job vanished")?;
    assert_eq!(stored.id, job.id);
    assert_eq!(stored.attempts, 0);

    queue.register("report", FnProcessor::sync(|_job: &Job| JobResult::success()));
    wait_for(&mut events, succeeded).await?;
    assert!(!queue.job_exists("report").await?);
    Ok(())
}

#[tokio::test]
async fn fallback_processor_handles_unknown_tasks() -> TestResult {
    let queue = open_queue(fast_config()).await?;
    let mut events = queue.subscribe();

    queue.set_fallback(FnProcessor::sync(|job: &Job| {
        JobResult::success().with_response(job.task.clone())
    }));
    queue.enqueue(&(), "anything").await?;
    queue.start().await?;

    match wait_for(&mut events, succeeded).await? {
        QueueEvent::JobDidSucceed { response, .. } => {
            assert_eq!(response.as_deref(), Some("anything"));
        }
        other => return Err(format!("unexpected event: {:?}", other).into()),
    }
    Ok(())
}

#[tokio::test]
async fn panicking_processor_counts_as_failure() -> TestResult {
    let queue = open_queue(fast_config().with_retry_limit(1)).await?;
    let mut events = queue.subscribe();

    queue.register(
        "explode",
        FnProcessor::sync(|_job: &Job| -> JobResult { panic!("processor blew up") }),
    );
    queue.register("fine", FnProcessor::sync(|_job: &Job| JobResult::success()));

    queue
        .enqueue_with("bang", Priority::High, "explode", None)
        .await?;
    queue.enqueue("ok", "fine").await?;
    queue.start().await?;

    match wait_for(&mut events, |e| matches!(e, QueueEvent::JobDidFail { .. })).await? {
        QueueEvent::JobDidFail { job, terminal, .. } => {
            assert_eq!(job.task, "explode");
            assert!(terminal);
        }
        other => return Err(format!("unexpected event: {:?}", other).into()),
    }

    // A fresh worker picks up the next job.
    match wait_for(&mut events, succeeded).await? {
        QueueEvent::JobDidSucceed { job, .. } => assert_eq!(job.task, "fine"),
        other => return Err(format!("unexpected event: {:?}", other).into()),
    }
    Ok(())
}

#[tokio::test]
async fn stale_reservations_are_recovered_on_start() -> TestResult {
    let db = db::init(DbConfig::memory()).await?;

    // A previous process reserved the job and never finished it.
    let previous = db::JobRepository::new(db.clone());
    let job = previous
        .create(
            job_queue::Payload::encode("orphan")?,
            Priority::Default,
            "resume",
            None,
        )
        .await?;
    assert!(previous.reserve(job.id).await?);

    let queue = JobQueue::with_database(db, fast_config()).await?;
    let mut events = queue.subscribe();
    assert!(queue.is_active("resume").await?);

    queue.register("resume", FnProcessor::sync(|_job: &Job| JobResult::success()));
    queue.start().await?;

    let done = wait_for(&mut events, succeeded).await?;
    assert_eq!(done.job_id(), Some(job.id));
    Ok(())
}

#[tokio::test]
async fn queries_reflect_stored_jobs() -> TestResult {
    let queue = open_queue(fast_config()).await?;

    queue.enqueue("a", "mail").await?;
    let urgent = queue
        .enqueue_with("b", Priority::High, "mail", Some("batch"))
        .await?;
    queue.enqueue("c", "sms").await?;

    assert_eq!(queue.job_count().await?, 3);
    assert_eq!(queue.job_count_for_group("batch").await?, 1);
    assert!(queue.job_exists("sms").await?);
    assert!(!queue.job_exists("push").await?);
    assert!(!queue.is_active("mail").await?);

    let next = queue.next_job_for_task("mail").await?.ok_or("no mail job")?;
    assert_eq!(next.id, urgent.id);
    assert_eq!(next.state, JobState::Pending);

    let all = queue.fetch_all_jobs().await?;
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].id, urgent.id);
    Ok(())
}

#[tokio::test]
async fn retry_limit_can_be_changed() -> TestResult {
    let queue = open_queue(fast_config()).await?;
    assert_eq!(queue.retry_limit().await?, 4);

    queue.set_retry_limit(7)?;
    assert_eq!(queue.retry_limit().await?, 7);
    Ok(())
}

#[tokio::test]
async fn shutdown_waits_for_the_scheduler() -> TestResult {
    let queue = open_queue(fast_config()).await?;
    queue.start().await?;
    queue.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn cancelled_group_enqueue_does_not_stall_the_queue() -> TestResult {
    let queue = open_queue(fast_config()).await?;
    let mut events = queue.subscribe();
    queue.register("resize", FnProcessor::sync(|_job: &Job| JobResult::success()));

    // Dropped while waiting for the scheduler to acknowledge the hold.
    let cancelled = tokio::time::timeout(
        Duration::ZERO,
        queue.enqueue_group("album", |batch| {
            batch.enqueue("one.png", "resize")?;
            Ok(())
        }),
    )
    .await;
    assert!(cancelled.is_err());

    let job = queue.enqueue("later.png", "resize").await?;
    queue.start().await?;

    let done = wait_for(&mut events, succeeded).await?;
    assert_eq!(done.job_id(), Some(job.id));
    assert_eq!(queue.job_count_for_group("album").await?, 0);
    Ok(())
}

#[tokio::test]
async fn deferred_job_waits_for_the_retry_delay() -> TestResult {
    let delay = Duration::from_millis(300);
    let queue = open_queue(fast_config().with_retry_delay(delay)).await?;

    let (tx, mut rx) = mpsc::unbounded_channel::<Instant>();
    queue.register(
        "poll",
        FnProcessor::sync(move |_job: &Job| {
            let _ = tx.send(Instant::now());
            JobResult::defer()
        }),
    );
    queue.enqueue("status", "poll").await?;
    queue.start().await?;

    let mut dispatched = Vec::new();
    for _ in 0..2 {
        let at = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await?
            .ok_or("processor dropped")?;
        dispatched.push(at);
    }

    let gap = dispatched[1].duration_since(dispatched[0]);
    assert!(gap >= delay, "re-dispatched after {:?}", gap);
    queue.stop().await?;
    Ok(())
}
