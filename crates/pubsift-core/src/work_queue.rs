//! Lock-free work queue for distributing items across parallel workers

use std::sync::atomic::{AtomicUsize, Ordering};

/// Lock-free work queue distributing items to workers.
///
/// Workers call [`next()`](WorkQueue::next) to atomically claim the next item.
/// [`next_indexed()`](WorkQueue::next_indexed) also returns the item's
/// position, so a worker can write its result into an owned output slot.
pub struct WorkQueue<S> {
    items: Vec<S>,
    cursor: AtomicUsize,
}

impl<S> WorkQueue<S> {
    pub fn new(items: Vec<S>) -> Self {
        Self {
            items,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Keep only items that pass the filter (resume support)
    pub fn filtered(items: Vec<S>, keep: impl Fn(&S) -> bool) -> Self {
        let filtered: Vec<S> = items.into_iter().filter(|s| keep(s)).collect();
        log::debug!("{} items in work queue", filtered.len());
        Self::new(filtered)
    }

    /// Get next item to process (lock-free)
    pub fn next(&self) -> Option<&S> {
        self.next_indexed().map(|(_, item)| item)
    }

    /// Get next item together with its position in the queue
    pub fn next_indexed(&self) -> Option<(usize, &S)> {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.items.get(i).map(|item| (i, item))
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }
}
