use std::error::Error;
use std::time::Duration;

use job_queue::{JobQueue, QueueConfig, QueueEvent, QueueSettings};
use tokio::sync::broadcast;

pub type TestResult<T = ()> = Result<T, Box<dyn Error>>;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn fast_config() -> QueueConfig {
    QueueConfig::default().with_tick_interval(Duration::from_millis(20))
}

/// Open a stopped queue over a fresh in-memory database.
pub async fn open_queue(config: QueueConfig) -> TestResult<JobQueue> {
    let settings = QueueSettings::memory().with_queue(config);
    Ok(JobQueue::open(settings).await?)
}

/// Wait for the first event matching `pred`, skipping the rest.
pub async fn wait_for(
    rx: &mut broadcast::Receiver<QueueEvent>,
    pred: impl Fn(&QueueEvent) -> bool,
) -> TestResult<QueueEvent> {
    let event = tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return Ok(event),
                Ok(_) => continue,
                Err(e) => return Err(e),
            }
        }
    })
    .await??;
    Ok(event)
}

/// Collect every event up to and including the first drain.
#[allow(dead_code)]
pub async fn collect_until_drain(
    rx: &mut broadcast::Receiver<QueueEvent>,
) -> TestResult<Vec<QueueEvent>> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(EVENT_TIMEOUT, rx.recv()).await??;
        let drained = matches!(event, QueueEvent::DidDrain { .. });
        events.push(event);
        if drained {
            return Ok(events);
        }
    }
}
