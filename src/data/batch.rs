use std::path::PathBuf;

use crate::error::{CosalError, Result};
use crate::math::Tensor;

/// One group of related images as produced by a [`BatchSource`].
///
/// `images` is `[1, N, C, H, W]` and `gts` is `[1, N, 1, H, W]`; the leading
/// grouping axis is squeezed by the consumer.
#[derive(Debug, Clone)]
pub struct Batch {
    pub images: Tensor,
    pub gts: Tensor,
    pub labels: Vec<usize>,
    /// `(height, width)` of each image before resizing.
    pub orig_sizes: Vec<(u32, u32)>,
    /// Output path of each image relative to a set root, e.g. `cat/0001.png`.
    pub subpaths: Vec<PathBuf>,
}

impl Batch {
    /// Number of images in the group.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Checks that every per-image field agrees on the group size.
    pub fn validate(&self) -> Result<()> {
        let n = self.len();
        let lead = |t: &Tensor| t.shape.get(1).copied();
        if lead(&self.images) != Some(n)
            || lead(&self.gts) != Some(n)
            || self.orig_sizes.len() != n
            || self.subpaths.len() != n
        {
            return Err(CosalError::Data(format!(
                "malformed batch: images {:?}, gts {:?}, {} labels, {} sizes, {} paths",
                self.images.shape,
                self.gts.shape,
                n,
                self.orig_sizes.len(),
                self.subpaths.len()
            )));
        }
        Ok(())
    }
}

/// Produces batches for one pass over a dataset.
pub trait BatchSource {
    /// Next batch, or `None` when the pass is over.
    fn next_batch(&mut self) -> Result<Option<Batch>>;

    /// Seeds any per-pass randomness from the epoch index. Called before
    /// [`BatchSource::reset`] at the start of every training epoch.
    fn set_epoch(&mut self, _epoch: usize) {}

    /// Rewinds to the start for a new pass.
    fn reset(&mut self);

    fn num_batches(&self) -> usize;
}

/// Replays prepared batches in order.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    batches: Vec<Batch>,
    cursor: usize,
}

impl InMemorySource {
    pub fn new(batches: Vec<Batch>) -> InMemorySource {
        InMemorySource { batches, cursor: 0 }
    }
}

impl BatchSource for InMemorySource {
    fn next_batch(&mut self) -> Result<Option<Batch>> {
        let batch = self.batches.get(self.cursor).cloned();
        if batch.is_some() {
            self.cursor += 1;
        }
        Ok(batch)
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }

    fn num_batches(&self) -> usize {
        self.batches.len()
    }
}
