use std::collections::BTreeMap;

/// Holds out-of-order completions and releases them strictly by key.
#[derive(Debug, Clone)]
pub struct ReorderBuffer<T> {
    next_expected: u64,
    pending: BTreeMap<u64, T>,
}

impl<T> ReorderBuffer<T> {
    pub fn new(first: u64) -> Self {
        Self {
            next_expected: first,
            pending: BTreeMap::new(),
        }
    }

    /// Buffers `value` under `key`. Keys already released or already buffered are
    /// rejected and handed back.
    pub fn insert(&mut self, key: u64, value: T) -> Result<(), T> {
        if key < self.next_expected || self.pending.contains_key(&key) {
            return Err(value);
        }
        self.pending.insert(key, value);
        Ok(())
    }

    /// Releases the next item if it has arrived.
    pub fn pop_ready(&mut self) -> Option<(u64, T)> {
        let value = self.pending.remove(&self.next_expected)?;
        let key = self.next_expected;
        self.next_expected += 1;
        Some((key, value))
    }

    pub fn next_expected(&self) -> u64 {
        self.next_expected
    }

    /// Items buffered behind a missing predecessor.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
