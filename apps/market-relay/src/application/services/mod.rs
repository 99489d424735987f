//! Application Services
//!
//! - `StartupSupervisor`: launches the feed and broker loops as independent
//!   background tasks and keeps them alive for the life of the process.
//!
//! Each loop runs inside its own spawned task. A panic escaping a loop is
//! caught around the loop future, logged, and the loop is restarted after
//! the restart delay. Loops never share a task, so one loop failing to start or
//! crashing has no effect on the other.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::BackgroundLoop;

/// Default delay before restarting a loop that crashed.
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(3);

// =============================================================================
// Startup Supervisor
// =============================================================================

/// Launches background loops at process start.
#[derive(Debug, Clone)]
pub struct StartupSupervisor {
    cancel: CancellationToken,
    restart_delay: Duration,
}

impl StartupSupervisor {
    /// Create a supervisor bound to the process shutdown token.
    #[must_use]
    pub const fn new(cancel: CancellationToken, restart_delay: Duration) -> Self {
        Self {
            cancel,
            restart_delay,
        }
    }

    /// Spawn every loop as its own supervised task.
    ///
    /// Returns immediately; nothing is awaited.
    #[must_use]
    pub fn launch(&self, loops: Vec<Arc<dyn BackgroundLoop>>) -> SupervisorHandle {
        let tasks = loops
            .into_iter()
            .map(|background| {
                let name = background.name();
                let cancel = self.cancel.clone();
                let restart_delay = self.restart_delay;
                tracing::info!(task = name, "Launching background loop");
                let handle = tokio::spawn(supervise(background, cancel, restart_delay));
                (name, handle)
            })
            .collect();

        SupervisorHandle {
            cancel: self.cancel.clone(),
            tasks,
        }
    }
}

/// Handle to the launched loops, used only for shutdown.
#[derive(Debug)]
pub struct SupervisorHandle {
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl SupervisorHandle {
    /// Names of the supervised loops.
    #[must_use]
    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|(name, _)| *name).collect()
    }

    /// Cancel every loop and wait for each to unwind.
    ///
    /// A loop still running after `timeout` is aborted.
    pub async fn shutdown(self, timeout: Duration) {
        self.cancel.cancel();

        for (name, mut handle) in self.tasks {
            match tokio::time::timeout(timeout, &mut handle).await {
                Ok(Ok(())) => tracing::info!(task = name, "Background loop stopped"),
                Ok(Err(e)) => tracing::error!(task = name, error = %e, "Background loop failed"),
                Err(_) => {
                    tracing::warn!(
                        task = name,
                        timeout_secs = timeout.as_secs(),
                        "Background loop did not stop in time, aborting"
                    );
                    handle.abort();
                    let _ = handle.await;
                }
            }
        }
    }
}

/// Run one loop, restarting it if it panics or returns early.
///
/// The loop future runs inside this task, so aborting the task drops it.
async fn supervise(
    background: Arc<dyn BackgroundLoop>,
    cancel: CancellationToken,
    restart_delay: Duration,
) {
    let name = background.name();

    loop {
        let outcome = AssertUnwindSafe(background.run(cancel.clone()))
            .catch_unwind()
            .await;

        match outcome {
            Ok(()) if cancel.is_cancelled() => return,
            Ok(()) => {
                tracing::warn!(task = name, "Background loop returned before shutdown");
            }
            Err(_) => {
                tracing::error!(task = name, "Background loop panicked");
            }
        }

        tracing::info!(
            task = name,
            delay_ms = restart_delay.as_millis(),
            "Restarting background loop"
        );

        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(restart_delay) => {}
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    /// Panics on its first run, then waits for cancellation.
    struct FlakyLoop {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl BackgroundLoop for FlakyLoop {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn run(&self, cancel: CancellationToken) {
            let run = self.runs.fetch_add(1, Ordering::SeqCst);
            assert!(run > 0, "first run crashes");
            cancel.cancelled().await;
        }
    }

    /// Counts how many times it was started.
    struct SteadyLoop {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl BackgroundLoop for SteadyLoop {
        fn name(&self) -> &'static str {
            "steady"
        }

        async fn run(&self, cancel: CancellationToken) {
            self.runs.fetch_add(1, Ordering::SeqCst);
            cancel.cancelled().await;
        }
    }

    /// Keeps ticking and never looks at its cancellation token.
    struct StubbornLoop {
        ticks: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl BackgroundLoop for StubbornLoop {
        fn name(&self) -> &'static str {
            "stubborn"
        }

        async fn run(&self, _cancel: CancellationToken) {
            loop {
                self.ticks.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
    }

    #[tokio::test]
    async fn crashed_loop_is_restarted_without_touching_the_other() {
        let flaky = Arc::new(FlakyLoop {
            runs: AtomicUsize::new(0),
        });
        let steady = Arc::new(SteadyLoop {
            runs: AtomicUsize::new(0),
        });

        let supervisor =
            StartupSupervisor::new(CancellationToken::new(), Duration::from_millis(10));
        let handle = supervisor.launch(vec![
            Arc::clone(&flaky) as Arc<dyn BackgroundLoop>,
            Arc::clone(&steady) as Arc<dyn BackgroundLoop>,
        ]);

        assert_eq!(handle.task_names(), vec!["flaky", "steady"]);

        tokio::time::timeout(Duration::from_secs(2), async {
            while flaky.runs.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("flaky loop restarted");

        assert_eq!(steady.runs.load(Ordering::SeqCst), 1);

        handle.shutdown(Duration::from_secs(1)).await;
        assert_eq!(flaky.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn shutdown_cancels_all_loops() {
        let steady = Arc::new(SteadyLoop {
            runs: AtomicUsize::new(0),
        });
        let cancel = CancellationToken::new();
        let supervisor = StartupSupervisor::new(cancel.clone(), DEFAULT_RESTART_DELAY);
        let handle = supervisor.launch(vec![Arc::clone(&steady) as Arc<dyn BackgroundLoop>]);

        tokio::time::sleep(Duration::from_millis(20)).await;
        tokio::time::timeout(Duration::from_secs(2), handle.shutdown(Duration::from_secs(1)))
            .await
            .expect("shutdown completes");

        assert!(cancel.is_cancelled());
        assert_eq!(steady.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_stops_loop_that_ignores_cancellation() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let supervisor =
            StartupSupervisor::new(CancellationToken::new(), Duration::from_millis(10));
        let handle = supervisor.launch(vec![Arc::new(StubbornLoop {
            ticks: Arc::clone(&ticks),
        }) as Arc<dyn BackgroundLoop>]);

        tokio::time::sleep(Duration::from_millis(30)).await;
        tokio::time::timeout(
            Duration::from_secs(2),
            handle.shutdown(Duration::from_millis(50)),
        )
        .await
        .expect("shutdown completes");

        let at_shutdown = ticks.load(Ordering::SeqCst);
        assert!(at_shutdown > 0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), at_shutdown);
    }
}
