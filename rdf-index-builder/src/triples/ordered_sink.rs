//! Ordering barrier between concurrently finishing batches and a sequential sink.
//!
//! Partial-vocabulary writers for different batches finish in whatever order
//! their sort and rewrite happen to take. The spool behind them must receive
//! batches in ascending batch index, because the global merge numbers its
//! per-batch map files the same way. [`OrderedSink`] parks early arrivals in
//! a `BTreeMap` and releases every contiguous prefix as soon as it is
//! complete.

use std::collections::BTreeMap;
use std::io;

use parking_lot::Mutex;

/// A sequential consumer of whole batches.
pub trait BatchSink<T> {
    /// Called exactly once per batch, in ascending `batch` order.
    fn append_batch(&mut self, batch: usize, items: Vec<T>) -> io::Result<()>;
}

impl<T> BatchSink<T> for Vec<(usize, Vec<T>)> {
    fn append_batch(&mut self, batch: usize, items: Vec<T>) -> io::Result<()> {
        self.push((batch, items));
        Ok(())
    }
}

struct OrderedState<S, T> {
    sink: S,
    next_expected: usize,
    pending: BTreeMap<usize, Vec<T>>,
}

/// Thread-safe barrier releasing batches to `S` in batch-index order.
pub struct OrderedSink<S, T> {
    state: Mutex<OrderedState<S, T>>,
}

impl<S: BatchSink<T>, T> OrderedSink<S, T> {
    pub fn new(sink: S) -> Self {
        Self {
            state: Mutex::new(OrderedState {
                sink,
                next_expected: 0,
                pending: BTreeMap::new(),
            }),
        }
    }

    /// Hand over batch `batch`. Writes it, and any parked successors, if it
    /// is the next one expected; parks it otherwise.
    pub fn push(&self, batch: usize, items: Vec<T>) -> io::Result<()> {
        let mut st = self.state.lock();
        if batch < st.next_expected || st.pending.contains_key(&batch) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("ordered sink: batch {batch} delivered twice"),
            ));
        }
        st.pending.insert(batch, items);
        loop {
            let next = st.next_expected;
            let Some(items) = st.pending.remove(&next) else {
                break;
            };
            st.sink.append_batch(next, items)?;
            st.next_expected += 1;
        }
        Ok(())
    }

    /// Number of batches released to the sink so far.
    pub fn released(&self) -> usize {
        self.state.lock().next_expected
    }

    /// Recover the sink. Fails if a batch is still parked behind a gap.
    pub fn into_inner(self) -> io::Result<S> {
        let st = self.state.into_inner();
        if let Some((&first, _)) = st.pending.iter().next() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "ordered sink: batch {first} parked but batch {} never arrived",
                    st.next_expected
                ),
            ));
        }
        Ok(st.sink)
    }
}
