use std::ops::Range;

use crate::document::{DocumentId, DocumentRef};

/// Batch size used when the caller passes a non-positive value.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Partition of an enumeration into fixed-size batches.
///
/// Batch `i` spans `[i * batch_size, min((i + 1) * batch_size, total))`.
/// The same math is used whether one batch or all of them run, so a
/// failed batch can be retried on its own.
///
/// # Examples
///
/// ```
/// use reindexer::plan::BatchPlan;
///
/// let plan = BatchPlan::new(250, 100, 2);
/// assert_eq!(plan.num_batches(), 3);
/// assert_eq!(plan.selected_ordinal(), Some(2));
/// assert_eq!(plan.span(1), 100..200);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    total: usize,
    batch_size: usize,
    num_batches: usize,
    /// 0-based index of the only batch to run.
    selected: Option<usize>,
}

impl BatchPlan {
    /// `selected_batch` is a 1-based ordinal; anything outside
    /// `[1, num_batches]` runs every batch.
    pub fn new(total: usize, batch_size: i64, selected_batch: i64) -> Self {
        let batch_size = usize::try_from(batch_size)
            .ok()
            .filter(|&size| size > 0)
            .unwrap_or(DEFAULT_BATCH_SIZE);
        let num_batches = total.div_ceil(batch_size);
        let selected = usize::try_from(selected_batch)
            .ok()
            .filter(|&ordinal| ordinal >= 1 && ordinal <= num_batches)
            .map(|ordinal| ordinal - 1);

        Self {
            total,
            batch_size,
            num_batches,
            selected,
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn num_batches(&self) -> usize {
        self.num_batches
    }

    /// The 1-based ordinal of the selected batch, if the run is narrowed.
    pub fn selected_ordinal(&self) -> Option<usize> {
        self.selected.map(|index| index + 1)
    }

    /// Enumeration indices covered by batch `index` (0-based).
    pub fn span(&self, index: usize) -> Range<usize> {
        let start = (index * self.batch_size).min(self.total);
        let end = (start + self.batch_size).min(self.total);
        start..end
    }

    /// Indices of the batches this plan executes, in ascending order.
    pub fn batch_indices(&self) -> Range<usize> {
        match self.selected {
            Some(index) => index..index + 1,
            None => 0..self.num_batches,
        }
    }

    /// Borrow the batches to execute out of the full enumeration.
    pub fn batches<'a>(
        self,
        docs: &'a [DocumentRef],
    ) -> impl Iterator<Item = Batch<'a>> + 'a {
        debug_assert_eq!(docs.len(), self.total);
        self.batch_indices().map(move |index| Batch {
            index,
            members: &docs[self.span(index)],
        })
    }
}

/// One contiguous slice of the enumeration.
#[derive(Debug, Clone, Copy)]
pub struct Batch<'a> {
    /// 0-based position in the plan.
    pub index: usize,
    pub members: &'a [DocumentRef],
}

impl Batch<'_> {
    pub fn ordinal(&self) -> usize {
        self.index + 1
    }

    pub fn first_id(&self) -> Option<&DocumentId> {
        self.members.first().map(|doc| &doc.id)
    }
}
