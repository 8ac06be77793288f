// Scheduled executor for periodic background tasks (reconciler and friends).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// A task that runs periodically until told to stop.
pub trait ScheduledTask: Send + Sync + 'static {
    fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>>;

    /// Polled before every tick; true ends the loop.
    fn should_terminate(&self) -> bool {
        false
    }
}

impl<T: ScheduledTask> ScheduledTask for Arc<T> {
    fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>> {
        (**self).run()
    }

    fn should_terminate(&self) -> bool {
        (**self).should_terminate()
    }
}

/// Runs one task on a fixed interval. Ticks skipped while a slow run is in
/// progress are not replayed.
pub struct ScheduledExecutor {
    interval: Duration,
    task_name: String,
    shutdown: Arc<AtomicBool>,
}

impl ScheduledExecutor {
    pub fn new(task_name: impl Into<String>, interval: Duration) -> Self {
        Self { task_name: task_name.into(), interval, shutdown: Arc::new(AtomicBool::new(false)) }
    }

    /// Handle that stops the executor when set to true.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Run until `shutdown_handle()` fires or the task asks to terminate.
    /// The first execution happens one full interval after start.
    pub async fn start<T>(self, task: T)
    where
        T: ScheduledTask,
    {
        let Self { interval, task_name, shutdown } = self;

        tracing::info!("Starting scheduled task '{}' with interval: {:?}", task_name, interval);

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // interval() fires immediately; swallow that first tick so the task
        // starts one period after launch.
        ticker.tick().await;

        loop {
            ticker.tick().await;

            if shutdown.load(Ordering::Relaxed) || task.should_terminate() {
                break;
            }

            if let Err(e) = task.run().await {
                tracing::error!("Scheduled task '{}' failed: {}", task_name, e);
            }

            if shutdown.load(Ordering::Relaxed) || task.should_terminate() {
                break;
            }
        }

        tracing::info!("Scheduled task '{}' stopped", task_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct CountingTask {
        counter: Arc<AtomicU32>,
        max_runs: u32,
    }

    impl ScheduledTask for CountingTask {
        fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>> {
            Box::pin(async move {
                self.counter.fetch_add(1, Ordering::Relaxed);
                Ok(())
            })
        }

        fn should_terminate(&self) -> bool {
            self.counter.load(Ordering::Relaxed) >= self.max_runs
        }
    }

    #[tokio::test(start_paused = true)]
    async fn runs_until_terminated() {
        let counter = Arc::new(AtomicU32::new(0));
        let task = CountingTask { counter: counter.clone(), max_runs: 3 };

        let executor = ScheduledExecutor::new("test", Duration::from_secs(60));
        executor.start(task).await;

        assert_eq!(counter.load(Ordering::Relaxed), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_handle_stops_the_loop() {
        let counter = Arc::new(AtomicU32::new(0));
        let task = CountingTask { counter: counter.clone(), max_runs: u32::MAX };

        let executor = ScheduledExecutor::new("test", Duration::from_millis(50));
        let handle = executor.shutdown_handle();

        let runner = tokio::spawn(executor.start(task));
        tokio::time::sleep(Duration::from_millis(175)).await;
        handle.store(true, Ordering::Relaxed);

        runner.await.unwrap();
        assert!(counter.load(Ordering::Relaxed) >= 2);
    }
}
