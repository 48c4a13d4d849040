// Dataset trait: unified interface for indexable sample sources

use motion_core::Result;

/// A dataset is an indexed collection of samples.
///
/// Implementations must be `Send + Sync` so the DataLoader can read from
/// several worker threads at once. Reading a sample may touch disk, so
/// `get` is fallible.
pub trait Dataset: Send + Sync {
    /// The sample type produced by [`Dataset::get`].
    type Item: Send + 'static;

    /// Total number of samples in the dataset.
    fn len(&self) -> usize;

    /// Whether the dataset is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Retrieve the sample at position `index`.
    ///
    /// Fails with [`motion_core::Error::IndexOutOfRange`] when
    /// `index >= self.len()`.
    fn get(&self, index: usize) -> Result<Self::Item>;

    /// Optional human-readable name.
    fn name(&self) -> &str {
        "dataset"
    }
}
