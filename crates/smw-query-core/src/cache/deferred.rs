//! Work deferred until no transaction is active.

/// Queue of items released only while no transaction is open.
///
/// Transactions nest; the queue is idle once every `begin_transaction`
/// has been matched by `end_transaction`.
#[derive(Debug)]
pub struct TransactionIdleQueue<T> {
    items: Vec<T>,
    depth: u32,
}

impl<T> Default for TransactionIdleQueue<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            depth: 0,
        }
    }
}

impl<T> TransactionIdleQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    pub fn begin_transaction(&mut self) {
        self.depth += 1;
    }

    pub fn end_transaction(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub fn is_transaction_active(&self) -> bool {
        self.depth > 0
    }

    /// Take every queued item, or nothing while a transaction is open.
    pub fn drain(&mut self) -> Vec<T> {
        if self.is_transaction_active() {
            return Vec::new();
        }
        std::mem::take(&mut self.items)
    }

    pub fn retain(&mut self, keep: impl FnMut(&T) -> bool) {
        self.items.retain(keep);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Put `items` back ahead of anything queued since they were drained.
    pub fn requeue(&mut self, items: Vec<T>) {
        self.items.splice(0..0, items);
    }
}
