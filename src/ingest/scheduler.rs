//! Time-windowed batch scheduler.
//!
//! One global timer for all sources. The first event enqueued while idle arms
//! it; when it fires, every pending buffer is sealed in a single swap and
//! handed to the batch handler. Events arriving during a flush wait for the
//! next window.
//!
//! ```text
//!          enqueue              timer fires           handler done
//!   Idle ──────────▶ Armed ──────────────▶ Flushing ─────────────▶ Armed (queue non-empty)
//!                                                     └──────────▶ Idle  (queue empty)
//! ```
//!
//! The lock guards only the queue and phase, never the handler call. Each
//! handler call runs in its own task, so a panicking flush still settles.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, error, info};

use crate::core::BatchHandler;
use crate::domain::{Batch, Event, EventId, SourceId};

use super::queue::IngestQueue;

/// Lifecycle of the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing pending, timer not running
    Idle,
    /// Events pending, timer running
    Armed,
    /// Handler running on a sealed set of batches
    Flushing,
    /// Drained; no further events are accepted
    Stopped,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Scheduler has been shut down")]
    Closed,
}

#[derive(Debug)]
struct State {
    phase: Phase,
    queue: IngestQueue,
}

pub struct BatchScheduler {
    state: Mutex<State>,
    armed: Notify,
    window: Duration,
}

impl BatchScheduler {
    pub fn new(window: Duration) -> Self {
        Self {
            state: Mutex::new(State {
                phase: Phase::Idle,
                queue: IngestQueue::new(),
            }),
            armed: Notify::new(),
            window,
        }
    }

    /// Buffer an event for the next flush, arming the timer if idle
    pub async fn enqueue(&self, event: Event) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().await;
        if state.phase == Phase::Stopped {
            return Err(SchedulerError::Closed);
        }

        state.queue.push(event);
        if state.phase == Phase::Idle {
            state.phase = Phase::Armed;
            self.armed.notify_one();
        }
        Ok(())
    }

    /// Drop an event that has not been flushed yet
    pub async fn remove(&self, source: &SourceId, id: &EventId) -> bool {
        self.state.lock().await.queue.remove(source, id)
    }

    /// Replace an event that has not been flushed yet
    pub async fn update(&self, event: Event) -> bool {
        self.state.lock().await.queue.update(event)
    }

    pub async fn phase(&self) -> Phase {
        self.state.lock().await.phase
    }

    /// Number of events waiting for the next flush
    pub async fn pending(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Start the timer loop
    pub fn start(self: &Arc<Self>, handler: Arc<dyn BatchHandler>) -> SchedulerHandle {
        let (stop_tx, stop_rx) = mpsc::channel::<()>(1);
        let scheduler = Arc::clone(self);

        let task = tokio::spawn(async move {
            scheduler.run(handler, stop_rx).await;
        });

        SchedulerHandle { stop_tx, task }
    }

    async fn run(&self, handler: Arc<dyn BatchHandler>, mut stop_rx: mpsc::Receiver<()>) {
        info!(window = ?self.window, "Batch scheduler started");

        loop {
            if !self.wait_until_armed(&mut stop_rx).await {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.window) => {}
                _ = stop_rx.recv() => break,
            }

            let batches = self.seal().await;
            if !batches.is_empty() {
                dispatch(&handler, batches).await;
            }
            self.settle().await;
        }

        self.drain(&handler).await;
        info!("Batch scheduler stopped");
    }

    /// Returns false if asked to stop while waiting
    async fn wait_until_armed(&self, stop_rx: &mut mpsc::Receiver<()>) -> bool {
        loop {
            if self.phase().await == Phase::Armed {
                return true;
            }
            tokio::select! {
                _ = self.armed.notified() => {}
                _ = stop_rx.recv() => return false,
            }
        }
    }

    async fn seal(&self) -> Vec<Batch> {
        let mut state = self.state.lock().await;
        state.phase = Phase::Flushing;
        let batches = state.queue.take_all();
        debug!(batches = batches.len(), "Sealed pending batches");
        batches
    }

    async fn settle(&self) {
        let mut state = self.state.lock().await;
        state.phase = if state.queue.is_empty() {
            Phase::Idle
        } else {
            Phase::Armed
        };
    }

    /// Final flush of whatever is still pending
    async fn drain(&self, handler: &Arc<dyn BatchHandler>) {
        let batches = {
            let mut state = self.state.lock().await;
            state.phase = Phase::Stopped;
            state.queue.take_all()
        };

        if !batches.is_empty() {
            info!(batches = batches.len(), "Final flush before shutdown");
            dispatch(handler, batches).await;
        }
    }
}

/// Run one handler call in its own task, containing panics
async fn dispatch(handler: &Arc<dyn BatchHandler>, batches: Vec<Batch>) {
    let handler = Arc::clone(handler);
    let count = batches.len();

    if let Err(e) = tokio::spawn(async move { handler.handle(batches).await }).await {
        error!(batches = count, error = %e, "Batch handler failed, flush abandoned");
    }
}

/// Handle to a running scheduler
pub struct SchedulerHandle {
    stop_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl SchedulerHandle {
    /// Flush anything pending once more, then stop
    pub async fn stop(self) -> Result<()> {
        let _ = self.stop_tx.send(()).await;
        self.task.await?;
        Ok(())
    }
}
