//! Per-session serial task queues.
//!
//! Every action performed on a session's client — send, delete, re-sync —
//! goes through that session's queue, so a single session never issues
//! overlapping calls. Tasks run strictly FIFO within a session and in
//! parallel across sessions; a uniform random delay between tasks further
//! de-correlates senders. On shutdown, pending tasks are rejected.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use fc_domain::config::QueueConfig;
use fc_domain::{Error, Result};

use crate::jitter;

type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

struct QueuedTask {
    run: Box<dyn FnOnce() -> TaskFuture + Send>,
}

struct QueueHandle {
    tx: mpsc::UnboundedSender<QueuedTask>,
    cancel: CancellationToken,
}

/// The map of per-session queues. Workers are spawned lazily on first use
/// and torn down when the session is removed or the engine shuts down.
pub struct SessionQueues {
    queues: Mutex<HashMap<String, QueueHandle>>,
    min_delay: Duration,
    max_delay: Duration,
    shutdown: CancellationToken,
}

impl SessionQueues {
    pub fn new(config: &QueueConfig, shutdown: CancellationToken) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            min_delay: Duration::from_millis(config.min_inter_task_delay_ms),
            max_delay: Duration::from_millis(config.max_inter_task_delay_ms),
            shutdown,
        }
    }

    /// Run `task` on the session's queue and wait for its result.
    ///
    /// Tasks enqueued for the same session execute strictly in enqueue
    /// order. Returns [`Error::Shutdown`] when the queue was torn down
    /// before the task could run.
    pub async fn enqueue<T, F, Fut>(&self, session_phone: &str, task: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            return Err(Error::Shutdown);
        }

        let (result_tx, result_rx) = oneshot::channel();
        let queued = QueuedTask {
            run: Box::new(move || {
                Box::pin(async move {
                    // The receiver may have given up; that is not the
                    // task's concern.
                    let _ = result_tx.send(task().await);
                })
            }),
        };

        let tx = self.sender_for(session_phone);
        tx.send(queued).map_err(|_| Error::Shutdown)?;
        result_rx.await.map_err(|_| Error::Shutdown)?
    }

    fn sender_for(&self, session_phone: &str) -> mpsc::UnboundedSender<QueuedTask> {
        let mut queues = self.queues.lock();
        if let Some(handle) = queues.get(session_phone) {
            if !handle.cancel.is_cancelled() {
                return handle.tx.clone();
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = self.shutdown.child_token();
        tokio::spawn(worker(
            session_phone.to_owned(),
            rx,
            self.min_delay,
            self.max_delay,
            cancel.clone(),
        ));
        queues.insert(
            session_phone.to_owned(),
            QueueHandle {
                tx: tx.clone(),
                cancel,
            },
        );
        tx
    }

    /// Tear down one session's queue; its pending tasks are rejected.
    pub fn remove(&self, session_phone: &str) {
        if let Some(handle) = self.queues.lock().remove(session_phone) {
            handle.cancel.cancel();
        }
    }

    /// Number of live queues (for monitoring).
    pub fn queue_count(&self) -> usize {
        self.queues.lock().len()
    }
}

async fn worker(
    session_phone: String,
    mut rx: mpsc::UnboundedReceiver<QueuedTask>,
    min_delay: Duration,
    max_delay: Duration,
    cancel: CancellationToken,
) {
    tracing::debug!(session = %session_phone, "session queue worker started");
    loop {
        let task = tokio::select! {
            _ = cancel.cancelled() => break,
            task = rx.recv() => match task {
                Some(t) => t,
                None => break,
            },
        };

        (task.run)().await;

        let pause = jitter::between(min_delay, max_delay);
        if !pause.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    // Reject whatever is still queued: dropping a task drops its result
    // sender, which resolves the caller with a shutdown error.
    rx.close();
    while rx.try_recv().is_ok() {}
    tracing::debug!(session = %session_phone, "session queue worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn fast_config() -> QueueConfig {
        QueueConfig {
            min_inter_task_delay_ms: 0,
            max_inter_task_delay_ms: 0,
        }
    }

    #[tokio::test]
    async fn tasks_run_fifo_within_a_session() {
        let queues = Arc::new(SessionQueues::new(&fast_config(), CancellationToken::new()));
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut waiters = Vec::new();
        for i in 0..5u32 {
            let queues = queues.clone();
            let order = order.clone();
            waiters.push(tokio::spawn(async move {
                queues
                    .enqueue("+100", move || async move {
                        order.lock().push(i);
                        Ok(i)
                    })
                    .await
            }));
        }
        for w in waiters {
            w.await.unwrap().unwrap();
        }
        // Spawned in index order but enqueue order may interleave; instead
        // verify results arrive and the recorded order is a permutation that
        // matches queue order by re-running deterministically below.
        assert_eq!(order.lock().len(), 5);

        // Deterministic order: enqueue sequentially without awaiting results
        // in between is what the dispatcher does per chunk.
        let order2 = Arc::new(Mutex::new(Vec::new()));
        let mut results = Vec::new();
        for i in 0..5u32 {
            let order2 = order2.clone();
            let queues2 = queues.clone();
            results.push(tokio::spawn(async move {
                queues2
                    .enqueue("+200", move || async move {
                        order2.lock().push(i);
                        Ok(())
                    })
                    .await
            }));
            // Yield so the enqueue happens before the next spawn.
            tokio::task::yield_now().await;
        }
        for r in results {
            r.await.unwrap().unwrap();
        }
        assert_eq!(*order2.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn sessions_run_in_parallel() {
        let queues = Arc::new(SessionQueues::new(&fast_config(), CancellationToken::new()));
        let (gate_tx, gate_rx) = oneshot::channel::<()>();

        // Block +100's queue on a gate.
        let queues_a = queues.clone();
        let blocked = tokio::spawn(async move {
            queues_a
                .enqueue("+100", move || async move {
                    let _ = gate_rx.await;
                    Ok(())
                })
                .await
        });

        // +200 proceeds while +100 is blocked.
        let done = queues
            .enqueue("+200", || async { Ok(42) })
            .await
            .unwrap();
        assert_eq!(done, 42);

        gate_tx.send(()).unwrap();
        blocked.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn inter_task_delay_spaces_tasks() {
        let config = QueueConfig {
            min_inter_task_delay_ms: 50,
            max_inter_task_delay_ms: 60,
        };
        let queues = Arc::new(SessionQueues::new(&config, CancellationToken::new()));

        let start = std::time::Instant::now();
        queues.enqueue("+100", || async { Ok(()) }).await.unwrap();
        queues.enqueue("+100", || async { Ok(()) }).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50), "{:?}", start.elapsed());
    }

    #[tokio::test]
    async fn shutdown_rejects_pending_tasks() {
        let shutdown = CancellationToken::new();
        let queues = Arc::new(SessionQueues::new(&fast_config(), shutdown.clone()));
        let (gate_tx, gate_rx) = oneshot::channel::<()>();

        let queues_a = queues.clone();
        let running = tokio::spawn(async move {
            queues_a
                .enqueue("+100", move || async move {
                    let _ = gate_rx.await;
                    Ok(())
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Queued behind the running task, never executes.
        let queues_b = queues.clone();
        let pending = tokio::spawn(async move {
            queues_b.enqueue("+100", || async { Ok(()) }).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        shutdown.cancel();
        drop(gate_tx);

        assert!(matches!(pending.await.unwrap(), Err(Error::Shutdown)));
        // New work is refused outright.
        assert!(matches!(
            queues.enqueue("+100", || async { Ok(()) }).await,
            Err(Error::Shutdown)
        ));
        let _ = running.await;
    }

    #[tokio::test]
    async fn removed_sessions_get_a_fresh_queue_on_reuse() {
        let queues = Arc::new(SessionQueues::new(&fast_config(), CancellationToken::new()));
        queues.enqueue("+100", || async { Ok(()) }).await.unwrap();
        assert_eq!(queues.queue_count(), 1);

        queues.remove("+100");
        // A later enqueue spawns a new worker transparently.
        queues.enqueue("+100", || async { Ok(7) }).await.unwrap();
    }
}
