//! K-way merge of N sorted streams.
//!
//! A manual binary min-heap over one head item per stream, with the
//! comparator as a generic parameter so each instantiation is monomorphized.
//! Ties break on stream index, which keeps the merge stable: equal items
//! leave in the order of the streams they came from.
//!
//! Used by the global vocabulary merge (streams of partial-vocabulary
//! entries under the injected word order) and by the external sorter
//! (streams of sorted [`IdTriple`](crate::triples::IdTriple) runs).

use std::cmp::Ordering;
use std::io;

// ============================================================================
// MergeSource
// ============================================================================

/// A forward-only stream of items that can be k-way merged.
pub trait MergeSource {
    type Item;

    /// Pull the next item, or `None` once exhausted.
    fn next_item(&mut self) -> io::Result<Option<Self::Item>>;
}

impl<I, T> MergeSource for I
where
    I: Iterator<Item = io::Result<T>>,
{
    type Item = T;

    #[inline]
    fn next_item(&mut self) -> io::Result<Option<T>> {
        self.next().transpose()
    }
}

struct HeapEntry<T> {
    item: T,
    stream_idx: usize,
}

// ============================================================================
// KWayMerge
// ============================================================================

/// K-way merge iterator over sorted [`MergeSource`]s.
pub struct KWayMerge<S: MergeSource, F: Fn(&S::Item, &S::Item) -> Ordering> {
    heap: Vec<HeapEntry<S::Item>>,
    streams: Vec<S>,
    cmp: F,
}

impl<S: MergeSource, F: Fn(&S::Item, &S::Item) -> Ordering> KWayMerge<S, F> {
    /// Seed the heap with the first item of each non-empty stream.
    pub fn new(mut streams: Vec<S>, cmp: F) -> io::Result<Self> {
        let mut heap = Vec::with_capacity(streams.len());
        for (idx, stream) in streams.iter_mut().enumerate() {
            if let Some(item) = stream.next_item()? {
                heap.push(HeapEntry {
                    item,
                    stream_idx: idx,
                });
            }
        }

        let mut me = Self { heap, streams, cmp };
        if me.heap.len() > 1 {
            let last_internal = (me.heap.len() / 2).saturating_sub(1);
            for i in (0..=last_internal).rev() {
                me.sift_down(i);
            }
        }
        Ok(me)
    }

    #[inline]
    fn heap_less(&self, i: usize, j: usize) -> bool {
        match (self.cmp)(&self.heap[i].item, &self.heap[j].item) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => self.heap[i].stream_idx < self.heap[j].stream_idx,
        }
    }

    #[inline]
    fn sift_down(&mut self, mut pos: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * pos + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let mut smallest = left;
            if right < len && self.heap_less(right, left) {
                smallest = right;
            }
            if !self.heap_less(smallest, pos) {
                break;
            }
            self.heap.swap(pos, smallest);
            pos = smallest;
        }
    }

    #[inline]
    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if !self.heap_less(pos, parent) {
                break;
            }
            self.heap.swap(pos, parent);
            pos = parent;
        }
    }

    fn heap_pop(&mut self) -> Option<HeapEntry<S::Item>> {
        if self.heap.is_empty() {
            return None;
        }
        let last = self.heap.len() - 1;
        self.heap.swap(0, last);
        let entry = self.heap.pop();
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        entry
    }

    fn heap_push(&mut self, entry: HeapEntry<S::Item>) {
        self.heap.push(entry);
        let pos = self.heap.len() - 1;
        self.sift_up(pos);
    }

    /// Pop the next item in merge order along with the index of its stream.
    pub fn next_with_source(&mut self) -> io::Result<Option<(S::Item, usize)>> {
        let Some(entry) = self.heap_pop() else {
            return Ok(None);
        };
        let idx = entry.stream_idx;
        if let Some(next) = self.streams[idx].next_item()? {
            self.heap_push(HeapEntry {
                item: next,
                stream_idx: idx,
            });
        }
        Ok(Some((entry.item, idx)))
    }

    /// Pop the next item in merge order.
    #[inline]
    pub fn next_item(&mut self) -> io::Result<Option<S::Item>> {
        Ok(self.next_with_source()?.map(|(item, _)| item))
    }

    /// Pop the next item, skipping every following item that compares equal.
    pub fn next_deduped(&mut self) -> io::Result<Option<S::Item>> {
        let Some(item) = self.next_item()? else {
            return Ok(None);
        };
        while self
            .heap
            .first()
            .is_some_and(|head| (self.cmp)(&head.item, &item) == Ordering::Equal)
        {
            self.next_item()?;
        }
        Ok(Some(item))
    }

    pub fn is_exhausted(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn num_streams(&self) -> usize {
        self.streams.len()
    }
}
