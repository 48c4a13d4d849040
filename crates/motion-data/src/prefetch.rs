// PrefetchIterator: batches loaded ahead of the consumer by worker threads
//
// Workers pop (batch index, sample indices) pairs from a shared queue, load
// and collate the batch, and send it through a bounded channel:
//
//   queue ──► worker 0 ──┐
//         ──► worker 1 ──┼──► sync_channel(prefetch_factor * workers) ──► reorder ──► consumer
//         ──► worker N ──┘
//
// Workers finish out of order; the iterator buffers early arrivals and
// yields batch 0, 1, 2, ... so an epoch is deterministic for a given index
// order. Dropping the iterator closes the channel, which stops the workers,
// and joins them.

use std::collections::BTreeMap;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use motion_core::{Error, Result};

use crate::dataset::Dataset;
use crate::sample::Collate;

type WorkQueue = Arc<Mutex<std::vec::IntoIter<(usize, Vec<usize>)>>>;

/// Load `indices` from `dataset` on the calling thread and collate them.
pub(crate) fn fetch_batch<D>(
    dataset: &D,
    indices: &[usize],
) -> Result<<D::Item as Collate>::Batch>
where
    D: Dataset + ?Sized,
    D::Item: Collate,
{
    let samples = indices
        .iter()
        .map(|&i| dataset.get(i))
        .collect::<Result<Vec<_>>>()?;
    <D::Item as Collate>::collate(samples)
}

/// An iterator that yields prefetched batches from background workers.
///
/// Workers are joined when the iterator is dropped.
pub struct PrefetchIterator<B: Send + 'static> {
    rx: Option<mpsc::Receiver<(usize, Result<B>)>>,
    handles: Vec<thread::JoinHandle<()>>,
    pending: BTreeMap<usize, Result<B>>,
    next_batch: usize,
    total: usize,
}

impl<B: Send + 'static> PrefetchIterator<B> {
    /// Start `num_workers` threads loading `batches` from `dataset`.
    pub(crate) fn spawn<D>(
        dataset: Arc<D>,
        batches: Vec<Vec<usize>>,
        num_workers: usize,
        prefetch_factor: usize,
    ) -> Self
    where
        D: Dataset + 'static,
        D::Item: Collate<Batch = B>,
    {
        let total = batches.len();
        let workers = num_workers.max(1).min(total.max(1));
        let capacity = prefetch_factor.max(1) * workers;
        let (tx, rx) = mpsc::sync_channel::<(usize, Result<B>)>(capacity);

        // Shared work queue: each worker pops the next batch to load
        let queue: WorkQueue = Arc::new(Mutex::new(
            batches.into_iter().enumerate().collect::<Vec<_>>().into_iter(),
        ));

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let queue = queue.clone();
            let tx = tx.clone();
            let dataset = dataset.clone();

            let spawned = thread::Builder::new()
                .name(format!("motion-loader-{worker}"))
                .spawn(move || {
                    loop {
                        let item = {
                            let mut q = queue.lock().unwrap_or_else(|p| p.into_inner());
                            q.next()
                        };
                        let Some((batch_idx, indices)) = item else {
                            break;
                        };
                        let result = fetch_batch(&*dataset, &indices);
                        // receiver gone: the consumer stopped early
                        if tx.send((batch_idx, result)).is_err() {
                            break;
                        }
                    }
                    tracing::debug!(worker, "loader worker finished");
                });
            match spawned {
                Ok(h) => handles.push(h),
                Err(e) => {
                    tracing::warn!(worker, error = %e, "could not spawn loader worker");
                }
            }
        }

        // Drop the original sender so the channel closes when all workers finish
        drop(tx);

        Self {
            rx: Some(rx),
            handles,
            pending: BTreeMap::new(),
            next_batch: 0,
            total,
        }
    }

    /// Batches not yet yielded.
    pub fn remaining(&self) -> usize {
        self.total - self.next_batch
    }
}

impl<B: Send + 'static> Iterator for PrefetchIterator<B> {
    type Item = Result<B>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_batch >= self.total {
            return None;
        }
        loop {
            if let Some(batch) = self.pending.remove(&self.next_batch) {
                self.next_batch += 1;
                return Some(batch);
            }
            let received = self.rx.as_ref().map(|rx| rx.recv());
            match received {
                Some(Ok((idx, batch))) => {
                    self.pending.insert(idx, batch);
                }
                _ => {
                    // Channel closed with batches missing: a worker died
                    let missing = self.next_batch;
                    self.next_batch = self.total;
                    return Some(Err(Error::msg(format!(
                        "loader workers exited before delivering batch {missing}"
                    ))));
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining(), Some(self.remaining()))
    }
}

impl<B: Send + 'static> ExactSizeIterator for PrefetchIterator<B> {}

impl<B: Send + 'static> Drop for PrefetchIterator<B> {
    fn drop(&mut self) {
        // Closing the channel makes every blocked or future send fail
        self.rx.take();
        for h in self.handles.drain(..) {
            let _ = h.join();
        }
    }
}
