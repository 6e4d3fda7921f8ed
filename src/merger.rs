//! Binary heap merger of sorted runs.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Binary heap merger implementation.
/// Merges multiple sorted runs into a single sorted output.
/// Time complexity is *m* \* log(*k*) where *m* is the number of items and *k* the number of runs.
///
/// When the front items of several runs are equal, the item of the run with the highest index is
/// emitted first. The merger is a one-shot iterator: once drained it cannot be restarted.
pub struct BinaryHeapMerger<T, C>
where
    T: Ord,
    C: IntoIterator<Item = T>,
{
    // binary heap is max-heap by default so items are reversed to turn it into a min-heap;
    // the run index is not reversed, so among equal items the highest index pops first
    items: BinaryHeap<(Reverse<T>, usize)>,
    runs: Vec<C::IntoIter>,
    remaining: usize,
    initiated: bool,
}

impl<T, C> BinaryHeapMerger<T, C>
where
    T: Ord,
    C: IntoIterator<Item = T>,
{
    /// Creates an instance of a binary heap merger using runs as inputs.
    /// Run items should be sorted in ascending order otherwise the result is undefined.
    ///
    /// # Arguments
    /// * `runs` - Sorted runs to be merged in a single sorted one, in partition order
    pub fn new<I>(runs: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C::IntoIter: ExactSizeIterator,
    {
        let runs = Vec::from_iter(runs.into_iter().map(|r| r.into_iter()));
        let remaining = runs.iter().map(|r| r.len()).sum();
        let items = BinaryHeap::with_capacity(runs.len());

        return BinaryHeapMerger {
            runs,
            items,
            remaining,
            initiated: false,
        };
    }
}

impl<T, C> Iterator for BinaryHeapMerger<T, C>
where
    T: Ord,
    C: IntoIterator<Item = T>,
{
    type Item = T;

    /// Returns the next item from the runs in ascending order.
    fn next(&mut self) -> Option<Self::Item> {
        if !self.initiated {
            for (idx, run) in self.runs.iter_mut().enumerate() {
                if let Some(item) = run.next() {
                    self.items.push((Reverse(item), idx));
                }
            }
            self.initiated = true;
        }

        let (result, idx) = self.items.pop()?;
        if let Some(item) = self.runs[idx].next() {
            self.items.push((Reverse(item), idx));
        }
        self.remaining -= 1;

        return Some(result.0);
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T, C> ExactSizeIterator for BinaryHeapMerger<T, C>
where
    T: Ord,
    C: IntoIterator<Item = T>,
{
}
