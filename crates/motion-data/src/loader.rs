// DataLoader: batching, shuffling, iteration
//
// Usage:
//
//   let mut loader = DataLoader::new(
//       Arc::new(dataset),
//       DataLoaderConfig::default().batch_size(12).num_workers(4),
//   );
//
//   for epoch in 0..num_epochs {
//       for batch in loader.iter_epoch() {
//           let batch = batch?;
//           // train on batch ...
//       }
//   }
//
// With `num_workers == 0` batches are loaded on the calling thread as the
// iterator advances. Otherwise worker threads prefetch them (see
// `prefetch.rs`) and the iterator hands them out in batch order.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{thread_rng, SeedableRng};

use rayon::prelude::*;

use motion_core::{DataLoaderParams, Error, Result};

use crate::dataset::Dataset;
use crate::prefetch::{fetch_batch, PrefetchIterator};
use crate::sample::Collate;

/// The batch type a loader over `D` yields.
pub type BatchOf<D> = <<D as Dataset>::Item as Collate>::Batch;

/// Configuration for the DataLoader.
#[derive(Debug, Clone, PartialEq)]
pub struct DataLoaderConfig {
    /// Number of samples per batch.
    pub batch_size: usize,
    /// Whether to shuffle indices each epoch.
    pub shuffle: bool,
    /// Whether to drop the last incomplete batch.
    pub drop_last: bool,
    /// Number of background workers (0 = load on the calling thread).
    pub num_workers: usize,
    /// Batches buffered per worker.
    pub prefetch_factor: usize,
    /// Optional random seed for reproducible shuffling.
    pub seed: Option<u64>,
}

impl Default for DataLoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            shuffle: false,
            drop_last: false,
            num_workers: 0,
            prefetch_factor: 2,
            seed: None,
        }
    }
}

impl DataLoaderConfig {
    /// Batch size, shuffle flag and worker count of a loader section.
    pub fn from_params(params: &DataLoaderParams) -> Self {
        Self::default()
            .batch_size(params.batch_size)
            .shuffle(params.shuffle)
            .num_workers(params.num_workers)
    }

    pub fn batch_size(mut self, bs: usize) -> Self {
        self.batch_size = bs;
        self
    }

    pub fn shuffle(mut self, s: bool) -> Self {
        self.shuffle = s;
        self
    }

    pub fn drop_last(mut self, d: bool) -> Self {
        self.drop_last = d;
        self
    }

    pub fn num_workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    pub fn prefetch_factor(mut self, pf: usize) -> Self {
        self.prefetch_factor = pf;
        self
    }

    pub fn seed(mut self, s: u64) -> Self {
        self.seed = Some(s);
        self
    }

    pub fn maybe_seed(mut self, s: Option<u64>) -> Self {
        self.seed = s;
        self
    }
}

/// A DataLoader wraps a Dataset and produces collated batches.
///
/// The dataset is held via `Arc` so it can be shared with worker threads.
pub struct DataLoader<D: Dataset> {
    dataset: Arc<D>,
    config: DataLoaderConfig,
    indices: Vec<usize>,
}

impl<D> DataLoader<D>
where
    D: Dataset + 'static,
    D::Item: Collate,
{
    /// Create a new DataLoader over a dataset. A batch size of 0 is
    /// treated as 1.
    pub fn new(dataset: Arc<D>, mut config: DataLoaderConfig) -> Self {
        config.batch_size = config.batch_size.max(1);
        config.prefetch_factor = config.prefetch_factor.max(1);
        let indices: Vec<usize> = (0..dataset.len()).collect();
        Self {
            dataset,
            config,
            indices,
        }
    }

    pub fn dataset(&self) -> &Arc<D> {
        &self.dataset
    }

    pub fn config(&self) -> &DataLoaderConfig {
        &self.config
    }

    /// The number of batches per epoch.
    pub fn num_batches(&self) -> usize {
        if self.config.drop_last {
            self.dataset.len() / self.config.batch_size
        } else {
            self.dataset.len().div_ceil(self.config.batch_size)
        }
    }

    /// Total number of samples.
    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    /// Whether the dataset is empty.
    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    /// Sample order of the current epoch.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Reshuffle indices (called at the start of each epoch).
    pub fn reshuffle(&mut self) {
        if self.config.shuffle {
            match self.config.seed {
                Some(seed) => {
                    let mut rng = StdRng::seed_from_u64(seed);
                    self.indices.shuffle(&mut rng);
                }
                None => {
                    let mut rng = thread_rng();
                    self.indices.shuffle(&mut rng);
                }
            }
        }
    }

    fn batch_indices(&self, batch_idx: usize) -> &[usize] {
        let bs = self.config.batch_size;
        let start = batch_idx * bs;
        let end = (start + bs).min(self.indices.len());
        &self.indices[start..end]
    }

    /// Load batch `batch_idx` of the current order on the calling thread.
    ///
    /// Samples are fetched in parallel via rayon when `num_workers > 0`.
    pub fn batch(&self, batch_idx: usize) -> Result<BatchOf<D>> {
        if batch_idx >= self.num_batches() {
            return Err(Error::IndexOutOfRange {
                index: batch_idx,
                len: self.num_batches(),
            });
        }
        let indices = self.batch_indices(batch_idx);
        if self.config.num_workers > 0 && indices.len() > 1 {
            let samples = indices
                .par_iter()
                .map(|&i| self.dataset.get(i))
                .collect::<Result<Vec<_>>>()?;
            <D::Item as Collate>::collate(samples)
        } else {
            fetch_batch(&*self.dataset, indices)
        }
    }

    /// Iterate over one epoch of batches.
    ///
    /// Reshuffles first. Batches arrive in order whatever the worker count;
    /// a failed sample turns its whole batch into an `Err` item.
    pub fn iter_epoch(&mut self) -> EpochIter<D> {
        self.reshuffle();
        let batches: Vec<Vec<usize>> = (0..self.num_batches())
            .map(|b| self.batch_indices(b).to_vec())
            .collect();
        tracing::debug!(
            dataset = self.dataset.name(),
            batches = batches.len(),
            workers = self.config.num_workers,
            "starting epoch"
        );

        if self.config.num_workers == 0 {
            EpochIter::Sequential {
                dataset: self.dataset.clone(),
                batches: batches.into_iter(),
            }
        } else {
            EpochIter::Prefetch(PrefetchIterator::spawn(
                self.dataset.clone(),
                batches,
                self.config.num_workers,
                self.config.prefetch_factor,
            ))
        }
    }
}

/// Iterator over one epoch of batches.
pub enum EpochIter<D>
where
    D: Dataset + 'static,
    D::Item: Collate,
{
    Sequential {
        dataset: Arc<D>,
        batches: std::vec::IntoIter<Vec<usize>>,
    },
    Prefetch(PrefetchIterator<BatchOf<D>>),
}

impl<D> Iterator for EpochIter<D>
where
    D: Dataset + 'static,
    D::Item: Collate,
{
    type Item = Result<BatchOf<D>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            EpochIter::Sequential { dataset, batches } => {
                let indices = batches.next()?;
                Some(fetch_batch(&**dataset, &indices))
            }
            EpochIter::Prefetch(it) => it.next(),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self {
            EpochIter::Sequential { batches, .. } => batches.size_hint(),
            EpochIter::Prefetch(it) => it.size_hint(),
        }
    }
}

impl<D> ExactSizeIterator for EpochIter<D>
where
    D: Dataset + 'static,
    D::Item: Collate,
{
}
