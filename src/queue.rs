//! The global turn queue serializing queue-routed game types.
//!
//! Exactly one worker task consumes jobs in FIFO order and runs each to
//! completion before popping the next, so crash, cups, blackjack and
//! slots never run concurrently with each other.
//!
//! Completion is structural: a job's `run` closure receives a
//! [`JobGuard`] whose `Drop` signals the worker. A job that returns
//! early, errors out or panics still releases the queue.

use crate::session::ActivePlayers;
use crate::{GameError, GameResult, PlayerId};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Queue capacity. Large enough to never realistically fill.
const QUEUE_CAPACITY: usize = 100;

/// Signals job completion to the queue worker when dropped.
pub struct JobGuard {
    done: Option<oneshot::Sender<()>>,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }
}

/// One queued game run. Ephemeral: created per bet, consumed by the
/// worker.
pub struct GameJob {
    player: PlayerId,
    on_queued: Option<Box<dyn FnOnce(usize) + Send>>,
    run: Box<dyn FnOnce(JobGuard) -> BoxFuture<'static, ()> + Send>,
}

impl GameJob {
    /// Build a job from an async closure. The closure owns the guard for
    /// its whole run; dropping it (on any exit path) releases the worker.
    pub fn new<F, Fut>(player: PlayerId, run: F) -> Self
    where
        F: FnOnce(JobGuard) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        Self {
            player,
            on_queued: None,
            run: Box::new(move |guard| {
                let fut: BoxFuture<'static, ()> = Box::pin(run(guard));
                fut
            }),
        }
    }

    /// Callback fired synchronously at enqueue time when other jobs are
    /// already waiting, with the caller's position in line.
    pub fn notify_queued(mut self, f: impl FnOnce(usize) + Send + 'static) -> Self {
        self.on_queued = Some(Box::new(f));
        self
    }
}

/// Handle for enqueueing jobs onto the single worker.
#[derive(Clone)]
pub struct TurnQueue {
    jobs: mpsc::Sender<GameJob>,
    waiting: Arc<AtomicUsize>,
}

impl TurnQueue {
    /// Spawn the worker task and return the enqueue handle.
    pub fn start(players: Arc<ActivePlayers>) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let waiting = Arc::new(AtomicUsize::new(0));
        tokio::spawn(worker(rx, Arc::clone(&waiting), players));
        Self { jobs: tx, waiting }
    }

    /// Append a job. When others are already waiting, the job's queued
    /// callback fires with its position before the append completes.
    pub fn enqueue(&self, mut job: GameJob) -> GameResult<()> {
        let ahead = self.waiting.load(Ordering::SeqCst);
        if ahead > 0 {
            if let Some(on_queued) = job.on_queued.take() {
                on_queued(ahead);
            }
        }

        self.waiting.fetch_add(1, Ordering::SeqCst);
        self.jobs.try_send(job).map_err(|_| {
            self.waiting.fetch_sub(1, Ordering::SeqCst);
            GameError::QueueFull
        })
    }

    /// Number of jobs waiting in line (excludes the one running).
    pub fn depth(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}

async fn worker(
    mut jobs: mpsc::Receiver<GameJob>,
    waiting: Arc<AtomicUsize>,
    players: Arc<ActivePlayers>,
) {
    while let Some(job) = jobs.recv().await {
        let (done_tx, done_rx) = oneshot::channel();
        let guard = JobGuard {
            done: Some(done_tx),
        };

        // Mark before decrementing so observers always see the job as
        // either waiting or active during the handoff.
        players.mark(&job.player);
        waiting.fetch_sub(1, Ordering::SeqCst);
        tokio::spawn((job.run)(guard));
        // Blocks until the job's guard drops, on whatever path it exits.
        let _ = done_rx.await;
        players.unmark(&job.player);
    }
}
