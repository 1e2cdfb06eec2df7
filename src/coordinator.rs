//! Bounded, unordered fan-out of work items.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::stream::{self, Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::engine::{FetchOutcome, LoopPolicy, run_work_item};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::resolve::WorkItem;
use crate::transport::Transport;

pub const DEFAULT_CONCURRENCY: usize = 12;

/// Items completed out of the current batch.
#[derive(Debug, Default)]
pub struct ProgressCounter {
    completed: AtomicU64,
    total: AtomicU64,
}

impl ProgressCounter {
    fn start(&self, total: u64) {
        self.total.store(total, Ordering::SeqCst);
        self.completed.store(0, Ordering::SeqCst);
    }

    fn tick(&self) -> u64 {
        self.completed.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn snapshot(&self) -> (u64, u64) {
        (
            self.completed.load(Ordering::SeqCst),
            self.total.load(Ordering::SeqCst),
        )
    }
}

#[derive(Clone)]
pub struct Coordinator {
    concurrency: usize,
    cancel: CancellationToken,
    progress: Arc<ProgressCounter>,
}

impl Coordinator {
    pub fn new(concurrency: usize, cancel: CancellationToken) -> Self {
        Self {
            concurrency: concurrency.max(1),
            cancel,
            progress: Arc::new(ProgressCounter::default()),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn progress(&self) -> Arc<ProgressCounter> {
        Arc::clone(&self.progress)
    }

    /// Run `job` over `items` with at most `concurrency` in flight. Outcomes
    /// arrive in completion order, one per item. Jobs started after
    /// cancellation are expected to return a cancelled outcome promptly.
    pub fn run<'a, T, F, Fut>(
        &'a self,
        phase: &str,
        items: Vec<T>,
        sink: &'a dyn ProgressSink,
        job: F,
    ) -> impl Stream<Item = FetchOutcome> + use<'a, T, F, Fut>
    where
        T: 'a,
        F: FnMut(T) -> Fut + 'a,
        Fut: Future<Output = FetchOutcome> + 'a,
    {
        let total = items.len() as u64;
        self.progress.start(total);
        sink.event(ProgressEvent::Phase {
            message: phase.to_string(),
            total,
        });
        let counter = Arc::clone(&self.progress);

        stream::iter(items)
            .map(job)
            .buffer_unordered(self.concurrency)
            .inspect(move |outcome| {
                let completed = counter.tick();
                sink.event(ProgressEvent::Completed {
                    line: outcome.to_string(),
                    completed,
                    total,
                });
            })
    }

    /// The fetch-verify loop over every work item.
    pub fn run_work_items<'a, T: Transport>(
        &'a self,
        transport: &'a T,
        items: Vec<WorkItem>,
        policy: &'a LoopPolicy,
        sink: &'a dyn ProgressSink,
    ) -> impl Stream<Item = FetchOutcome> + use<'a, T> {
        let cancel = &self.cancel;
        self.run("Downloading runs", items, sink, move |item| async move {
            run_work_item(transport, &item, policy, cancel).await
        })
    }
}
