use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::error;

use signet_slo::Result;

#[async_trait]
pub trait Job: Send + Sync {
    async fn run(&self) -> Result<()>;
}

/// Decides when the job fires next, in seconds since the epoch.
pub trait Trigger: Send {
    fn next(&mut self, now: i64) -> i64;
}

/// Fires every `interval` seconds.
#[derive(Debug, Clone, Copy)]
pub struct IntervalTrigger {
    pub interval: u64,
}

impl Trigger for IntervalTrigger {
    fn next(&mut self, now: i64) -> i64 {
        now + self.interval as i64
    }
}

/// Drives a job until the shutdown future resolves. The job runs once up
/// front, then on every trigger tick. Failures are logged and do not stop
/// the schedule.
pub async fn run_schedule<J, T, F>(job: J, mut trigger: T, shutdown: F)
where
    J: Job,
    T: Trigger,
    F: Future<Output = ()> + Send,
{
    if let Err(err) = job.run().await {
        error!("scheduled job failed: {}", err);
    }

    tokio::pin!(shutdown);
    loop {
        let now = unix_now();
        let next = trigger.next(now);
        let sleep =
            Duration::from_secs(next.saturating_sub(now).max(1) as u64);
        tokio::select! {
            _ = tokio::time::sleep(sleep) => {
                if let Err(err) = job.run().await {
                    error!("scheduled job failed: {}", err);
                }
            },
            _ = &mut shutdown => break,
        }
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    struct Counter(AtomicU32);

    #[async_trait]
    impl Job for Counter {
        async fn run(&self) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn interval_trigger_advances() {
        let mut t = IntervalTrigger { interval: 60 };
        assert_eq!(t.next(100), 160);
        assert_eq!(t.next(160), 220);
    }

    #[tokio::test]
    async fn schedule_runs_job_immediately_and_stops_on_shutdown() {
        let job = Counter(AtomicU32::new(0));
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            run_schedule(job, IntervalTrigger { interval: 3600 }, async {
                let _ = rx.await;
            })
            .await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(()).ok();
        handle.await.unwrap();
    }
}
