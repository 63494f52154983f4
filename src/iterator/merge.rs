use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::types::{InternalKey, ValueType};

/// One source's current entry, staged in the merge heap.
struct HeapItem {
    key: InternalKey,
    value: Vec<u8>,
    source: usize,
}

impl Ord for HeapItem {
    /// InternalKey ordering is (user_key ASC, sequence DESC): for one user
    /// key, the newest version compares smallest and is popped first.
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.source.cmp(&other.source))
    }
}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapItem {}

/// Merges multiple sorted iterators into a single sorted stream.
///
/// K-way merge over a min-heap: each source contributes its current entry;
/// popping yields (user_key ASC, sequence DESC) order. For each key only
/// the entry with the highest sequence number is yielded — older versions
/// from other sources are consumed and discarded.
///
/// Tombstones ARE yielded: the consumer (compaction) must see them to
/// decide whether they still shadow anything.
pub struct MergeIterator<'a> {
    sources: Vec<Box<dyn StorageIterator + 'a>>,
    heap: BinaryHeap<Reverse<HeapItem>>,
    current: Option<HeapItem>,
}

impl<'a> MergeIterator<'a> {
    /// Create a MergeIterator from multiple sorted sources.
    pub fn new(sources: Vec<Box<dyn StorageIterator + 'a>>) -> Result<Self> {
        let mut merge = MergeIterator {
            sources,
            heap: BinaryHeap::new(),
            current: None,
        };
        for source in 0..merge.sources.len() {
            merge.stage(source);
        }
        merge.pull()?;
        Ok(merge)
    }

    /// Push the source's current entry onto the heap, if it has one.
    fn stage(&mut self, source: usize) {
        let it = &self.sources[source];
        if it.is_valid() {
            self.heap.push(Reverse(HeapItem {
                key: InternalKey {
                    user_key: it.key().to_vec(),
                    sequence: it.sequence(),
                    value_type: it.value_type(),
                },
                value: it.value().to_vec(),
                source,
            }));
        }
    }

    fn advance_source(&mut self, source: usize) -> Result<()> {
        self.sources[source].next()?;
        self.stage(source);
        Ok(())
    }

    /// Pop the next winner and drop the shadowed versions of its key.
    fn pull(&mut self) -> Result<()> {
        self.current = match self.heap.pop() {
            Some(Reverse(item)) => {
                self.advance_source(item.source)?;
                loop {
                    let shadowed = matches!(
                        self.heap.peek(),
                        Some(Reverse(top)) if top.key.user_key == item.key.user_key
                    );
                    if !shadowed {
                        break;
                    }
                    let Reverse(dup) = self.heap.pop().unwrap();
                    self.advance_source(dup.source)?;
                }
                Some(item)
            }
            None => None,
        };
        Ok(())
    }
}

impl<'a> StorageIterator for MergeIterator<'a> {
    fn key(&self) -> &[u8] {
        &self.current.as_ref().unwrap().key.user_key
    }

    fn value(&self) -> &[u8] {
        &self.current.as_ref().unwrap().value
    }

    fn sequence(&self) -> u64 {
        self.current.as_ref().unwrap().key.sequence
    }

    fn value_type(&self) -> ValueType {
        self.current.as_ref().unwrap().key.value_type
    }

    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    fn next(&mut self) -> Result<()> {
        self.pull()
    }
}
