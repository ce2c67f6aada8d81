//! Background worker pools for the I/O and CPU halves of pipeline stages.
//!
//! Jobs are ordered by a priority value (lower runs first, ties in
//! submission order). A finished job reports a [`TaskCompletion`] over a
//! channel that the coordinator drains once per tick; workers never touch
//! chunk state themselves beyond what the job closure captured.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::{Condvar, Mutex};

use crate::chunk::ChunkId;
use crate::stage::Stage;

/// Which pool a job runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PoolKind {
    /// Load, save, compression and decompression.
    Io,
    /// Generation and geometry/collider builds.
    Work,
}

impl PoolKind {
    fn thread_prefix(self) -> &'static str {
        match self {
            PoolKind::Io => "cubeworks-io",
            PoolKind::Work => "cubeworks-work",
        }
    }
}

/// Priority for jobs with no urgency; they run in submission order.
pub const PRIORITY_NORMAL: u64 = u64::MAX;

/// Report of one finished job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskCompletion {
    pub chunk: ChunkId,
    pub stage: Stage,
    pub pool: PoolKind,
    /// Value returned by the job; `false` if it panicked.
    pub success: bool,
}

type Job = Box<dyn FnOnce() -> bool + Send + 'static>;

struct QueuedJob {
    priority: u64,
    seq: u64,
    chunk: ChunkId,
    stage: Stage,
    job: Job,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    // BinaryHeap pops the greatest; the smallest (priority, seq) must win.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct Queue {
    jobs: BinaryHeap<QueuedJob>,
    shutdown: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    available: Condvar,
}

/// A fixed set of named worker threads serving a priority queue.
pub struct WorkerPool {
    kind: PoolKind,
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
    next_seq: AtomicU64,
    in_flight: AtomicUsize,
}

impl WorkerPool {
    /// Spawns `threads` workers (at least one) reporting to `completions`.
    pub fn new(kind: PoolKind, threads: usize, completions: Sender<TaskCompletion>) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            available: Condvar::new(),
        });

        let handles = (0..threads.max(1))
            .map(|i| {
                let shared = Arc::clone(&shared);
                let completions = completions.clone();
                std::thread::Builder::new()
                    .name(format!("{}-{i}", kind.thread_prefix()))
                    .spawn(move || worker_loop(kind, &shared, &completions))
                    .expect("Failed to spawn chunk worker thread")
            })
            .collect();

        tracing::debug!(?kind, threads = threads.max(1), "worker pool started");
        Self {
            kind,
            shared,
            handles,
            next_seq: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    /// Queues a job for `chunk`'s `stage`.
    pub fn submit<F>(&self, chunk: ChunkId, stage: Stage, priority: u64, job: F)
    where
        F: FnOnce() -> bool + Send + 'static,
    {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        let mut queue = self.shared.queue.lock();
        queue.jobs.push(QueuedJob {
            priority,
            seq,
            chunk,
            stage,
            job: Box::new(job),
        });
        drop(queue);
        self.shared.available.notify_one();
    }

    /// Returns a finished job's slot. Only the coordinator calls this.
    pub fn reclaim(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Jobs submitted and not yet reclaimed.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn queued_count(&self) -> usize {
        self.shared.queue.lock().jobs.len()
    }

    /// Drops queued jobs and joins the workers after their current job.
    pub fn shutdown(&mut self) {
        {
            let mut queue = self.shared.queue.lock();
            queue.shutdown = true;
            queue.jobs.clear();
        }
        self.shared.available.notify_all();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(kind: PoolKind, shared: &Shared, completions: &Sender<TaskCompletion>) {
    loop {
        let next = {
            let mut queue = shared.queue.lock();
            loop {
                if queue.shutdown {
                    return;
                }
                if let Some(job) = queue.jobs.pop() {
                    break job;
                }
                shared.available.wait(&mut queue);
            }
        };

        let QueuedJob {
            chunk, stage, job, ..
        } = next;
        let success = catch_unwind(AssertUnwindSafe(job)).unwrap_or_else(|_| {
            tracing::warn!(?chunk, ?stage, "chunk job panicked");
            false
        });
        if completions
            .send(TaskCompletion {
                chunk,
                stage,
                pool: kind,
                success,
            })
            .is_err()
        {
            return;
        }
    }
}

/// The two pools plus the completion channel they share.
pub struct Pools {
    pub io: WorkerPool,
    pub work: WorkerPool,
    completions: Receiver<TaskCompletion>,
}

impl Pools {
    pub fn new(io_threads: usize, work_threads: usize) -> Self {
        let (tx, rx) = unbounded();
        Self {
            io: WorkerPool::new(PoolKind::Io, io_threads, tx.clone()),
            work: WorkerPool::new(PoolKind::Work, work_threads, tx),
            completions: rx,
        }
    }

    pub fn get(&self, kind: PoolKind) -> &WorkerPool {
        match kind {
            PoolKind::Io => &self.io,
            PoolKind::Work => &self.work,
        }
    }

    pub fn submit<F>(&self, kind: PoolKind, chunk: ChunkId, stage: Stage, priority: u64, job: F)
    where
        F: FnOnce() -> bool + Send + 'static,
    {
        self.get(kind).submit(chunk, stage, priority, job);
    }

    /// Collects every finished job and reclaims its pool slot.
    ///
    /// Call this once per tick on the coordinating thread.
    pub fn drain_completions(&self) -> Vec<TaskCompletion> {
        let mut done = Vec::new();
        while let Ok(completion) = self.completions.try_recv() {
            self.get(completion.pool).reclaim();
            done.push(completion);
        }
        done
    }

    pub fn in_flight_count(&self) -> usize {
        self.io.in_flight_count() + self.work.in_flight_count()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
