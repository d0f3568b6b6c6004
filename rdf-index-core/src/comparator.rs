//! Total orders over vocabulary words.
//!
//! The comparator is injected by the host: the same instance orders each
//! batch's partial vocabulary and drives the global merge, so the two call
//! sites always agree. It must be a strict weak ordering.

use std::cmp::Ordering;

/// Injected total order over normalized vocabulary words.
pub trait WordComparator: Send + Sync {
    fn compare(&self, a: &str, b: &str) -> Ordering;

    #[inline]
    fn less(&self, a: &str, b: &str) -> bool {
        self.compare(a, b) == Ordering::Less
    }
}

/// Plain byte order. Also used for the prefix-compression candidates, which
/// are always merged in byte order regardless of the injected comparator.
#[derive(Copy, Clone, Debug, Default)]
pub struct ByteOrder;

impl WordComparator for ByteOrder {
    #[inline]
    fn compare(&self, a: &str, b: &str) -> Ordering {
        a.as_bytes().cmp(b.as_bytes())
    }
}

/// ASCII case-insensitive order with a byte-order tie break, so that
/// `"Apple"` and `"apple"` are adjacent but still distinct.
#[derive(Copy, Clone, Debug, Default)]
pub struct CaseFoldOrder;

impl WordComparator for CaseFoldOrder {
    fn compare(&self, a: &str, b: &str) -> Ordering {
        let folded = a
            .bytes()
            .map(|c| c.to_ascii_lowercase())
            .cmp(b.bytes().map(|c| c.to_ascii_lowercase()));
        folded.then_with(|| a.as_bytes().cmp(b.as_bytes()))
    }
}
