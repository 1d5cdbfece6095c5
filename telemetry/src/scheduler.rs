//! Drives the periodic maintenance tasks independently of request traffic.

use crate::metrics_defs::TASK_DURATION;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::histogram;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait PeriodicTask: Send + Sync {
    fn name(&self) -> &'static str;

    fn period(&self) -> Duration;

    /// One run. `now` is the tick time; implementations check `cancel`
    /// between units of work and return early once it fires.
    async fn run(&self, now: DateTime<Utc>, cancel: &CancellationToken);
}

pub struct Scheduler {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawns one loop per task. The first run happens one period after start.
    pub fn start(tasks: Vec<Arc<dyn PeriodicTask>>) -> Self {
        let cancel = CancellationToken::new();
        let handles = tasks
            .into_iter()
            .map(|task| tokio::spawn(run_loop(task, cancel.clone())))
            .collect();
        Scheduler { cancel, handles }
    }

    /// Cancels every loop, including a run in progress, and waits for them
    /// to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Periodic task panicked");
            }
        }
    }
}

async fn run_loop(task: Arc<dyn PeriodicTask>, cancel: CancellationToken) {
    let period = task.period();
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(task = task.name(), period_secs = period.as_secs_f64(), "Scheduled periodic task");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let started = Instant::now();
                task.run(Utc::now(), &cancel).await;
                histogram!(TASK_DURATION, "task" => task.name())
                    .record(started.elapsed().as_secs_f64());
            }
        }
    }
    tracing::info!(task = task.name(), "Periodic task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTask {
        runs: AtomicUsize,
        period: Duration,
    }

    #[async_trait]
    impl PeriodicTask for CountingTask {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn period(&self) -> Duration {
            self.period
        }

        async fn run(&self, _now: DateTime<Utc>, _cancel: &CancellationToken) {
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_runs_periodically_until_stopped() {
        let task = Arc::new(CountingTask {
            runs: AtomicUsize::new(0),
            period: Duration::from_millis(20),
        });
        let tasks: Vec<Arc<dyn PeriodicTask>> = vec![task.clone()];
        let scheduler = Scheduler::start(tasks);

        tokio::time::sleep(Duration::from_millis(110)).await;
        scheduler.stop().await;

        let runs = task.runs.load(Ordering::SeqCst);
        assert!(runs >= 2, "expected at least two runs, got {runs}");

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(task.runs.load(Ordering::SeqCst), runs);
    }

    #[tokio::test]
    async fn test_first_run_waits_one_period() {
        let task = Arc::new(CountingTask {
            runs: AtomicUsize::new(0),
            period: Duration::from_secs(3600),
        });
        let tasks: Vec<Arc<dyn PeriodicTask>> = vec![task.clone()];
        let scheduler = Scheduler::start(tasks);

        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.stop().await;
        assert_eq!(task.runs.load(Ordering::SeqCst), 0);
    }
}
