//! Supervised run tasks with cooperative cancellation.

use crate::error::SpawnError;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Read side of a run's cancellation flag, checked at step boundaries.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that is never raised.
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the run is cancelled. Pending forever otherwise.
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Write side of a run's cancellation flag.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn pair() -> (Self, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, CancelSignal { rx })
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

struct RunEntry {
    task_id: Uuid,
    cancel: CancelHandle,
    handle: Option<JoinHandle<()>>,
}

/// Tracks in-flight runs by id.
///
/// Each run executes as its own tokio task. The supervisor rejects a second
/// run for an id that is still in flight, lets callers cancel a run, and lets
/// the host drain every run before exiting.
#[derive(Clone, Default)]
pub struct RunSupervisor {
    runs: Arc<Mutex<HashMap<String, RunEntry>>>,
    draining: Arc<AtomicBool>,
}

impl RunSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RunEntry>> {
        self.runs.lock().unwrap_or_else(|poisoned| {
            tracing::error!("run supervisor lock poisoned; recovering");
            poisoned.into_inner()
        })
    }

    /// Schedules `make(signal)` as the task for `run_id`.
    ///
    /// # Errors
    ///
    /// Returns [`SpawnError::DuplicateRun`] if `run_id` is still in flight and
    /// [`SpawnError::ShuttingDown`] once [`shutdown`](Self::shutdown) started.
    pub fn spawn<F, Fut>(&self, run_id: impl Into<String>, make: F) -> Result<(), SpawnError>
    where
        F: FnOnce(CancelSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let run_id = run_id.into();
        if self.draining.load(Ordering::SeqCst) {
            return Err(SpawnError::ShuttingDown);
        }

        // The lock is held across spawn + insert so the task's own cleanup
        // cannot run before its entry exists.
        let mut runs = self.lock();
        if runs.contains_key(&run_id) {
            return Err(SpawnError::DuplicateRun(run_id));
        }

        let task_id = Uuid::new_v4();
        let (cancel, signal) = CancelHandle::pair();
        let future = make(signal);

        let runs_ref = self.runs.clone();
        let cleanup_id = run_id.clone();
        let handle = tokio::spawn(async move {
            future.await;
            let mut runs = runs_ref.lock().unwrap_or_else(|p| p.into_inner());
            if runs.get(&cleanup_id).is_some_and(|e| e.task_id == task_id) {
                runs.remove(&cleanup_id);
            }
        });

        runs.insert(
            run_id,
            RunEntry {
                task_id,
                cancel,
                handle: Some(handle),
            },
        );
        Ok(())
    }

    /// Requests cancellation of `run_id`. Takes effect at its next step
    /// boundary; an in-flight collaborator call is not interrupted.
    pub fn cancel(&self, run_id: &str) -> bool {
        match self.lock().get(run_id) {
            Some(entry) => {
                entry.cancel.cancel();
                tracing::info!(run_id = %run_id, "run cancellation requested");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, run_id: &str) -> bool {
        self.lock().contains_key(run_id)
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    /// Stops accepting runs and waits for in-flight ones.
    ///
    /// Runs get `grace` to finish on their own. Survivors are then cancelled
    /// and get another `grace` to reach a step boundary before their tasks
    /// are aborted. Returns the number of aborted tasks.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        self.draining.store(true, Ordering::SeqCst);

        let (mut handles, cancels): (Vec<_>, Vec<_>) = {
            let mut runs = self.lock();
            let pending: Vec<_> = runs
                .values_mut()
                .filter_map(|e| e.handle.take().map(|h| (h, e.cancel.clone())))
                .collect();
            pending.into_iter().unzip()
        };

        if handles.is_empty() {
            return 0;
        }
        tracing::info!(count = handles.len(), "waiting for in-flight runs");

        if join_all(&mut handles, grace).await {
            return 0;
        }

        tracing::warn!(
            grace_secs = grace.as_secs(),
            "runs still in flight after grace period; cancelling"
        );
        for cancel in &cancels {
            cancel.cancel();
        }
        if join_all(&mut handles, grace).await {
            return 0;
        }

        let mut aborted = 0;
        for handle in &handles {
            if !handle.is_finished() {
                handle.abort();
                aborted += 1;
            }
        }
        tracing::warn!(aborted, "aborted runs that did not stop in time");
        aborted
    }
}

/// Awaits every handle within `limit`; returns whether all finished.
async fn join_all(handles: &mut [JoinHandle<()>], limit: Duration) -> bool {
    let wait = async {
        for handle in handles.iter_mut() {
            if handle.is_finished() {
                continue;
            }
            if let Err(e) = handle.await {
                tracing::error!("run task failed: {}", e);
            }
        }
    };
    tokio::time::timeout(limit, wait).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_in_flight_id_is_rejected() {
        let supervisor = RunSupervisor::new();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        supervisor
            .spawn("run-1", |_| async move {
                let _ = release_rx.await;
            })
            .unwrap();

        let err = supervisor.spawn("run-1", |_| async {}).unwrap_err();
        assert_eq!(err, SpawnError::DuplicateRun("run-1".to_string()));

        release_tx.send(()).unwrap();
        supervisor.shutdown(Duration::from_secs(1)).await;
        assert_eq!(supervisor.active_count(), 0);
    }

    #[tokio::test]
    async fn finished_run_frees_its_id() {
        let supervisor = RunSupervisor::new();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        supervisor
            .spawn("run-1", |_| async move {
                let _ = done_tx.send(());
            })
            .unwrap();
        done_rx.await.unwrap();

        // Cleanup happens right after the future completes.
        for _ in 0..100 {
            if !supervisor.is_running("run-1") {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!supervisor.is_running("run-1"));
        assert!(supervisor.spawn("run-1", |_| async {}).is_ok());
    }

    #[tokio::test]
    async fn cancel_raises_signal() {
        let supervisor = RunSupervisor::new();
        let (seen_tx, seen_rx) = tokio::sync::oneshot::channel();
        supervisor
            .spawn("run-1", |mut signal| async move {
                signal.cancelled().await;
                let _ = seen_tx.send(signal.is_cancelled());
            })
            .unwrap();

        assert!(supervisor.cancel("run-1"));
        assert!(seen_rx.await.unwrap());
        assert!(!supervisor.cancel("missing"));
    }

    #[tokio::test]
    async fn shutdown_cancels_stragglers_and_rejects_new_runs() {
        let supervisor = RunSupervisor::new();
        supervisor
            .spawn("slow", |mut signal| async move {
                signal.cancelled().await;
            })
            .unwrap();

        let aborted = supervisor.shutdown(Duration::from_millis(50)).await;
        assert_eq!(aborted, 0);
        assert_eq!(
            supervisor.spawn("late", |_| async {}).unwrap_err(),
            SpawnError::ShuttingDown
        );
    }

    #[tokio::test]
    async fn shutdown_aborts_tasks_that_ignore_cancellation() {
        let supervisor = RunSupervisor::new();
        supervisor
            .spawn("stuck", |_| async {
                std::future::pending::<()>().await;
            })
            .unwrap();

        let aborted = supervisor.shutdown(Duration::from_millis(20)).await;
        assert_eq!(aborted, 1);
    }

    #[test]
    fn never_signal_is_not_cancelled() {
        assert!(!CancelSignal::never().is_cancelled());
    }
}
