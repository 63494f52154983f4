use rand::Rng;

use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::types::{Key, ValueType, Version};

/// Maximum height of the skip list. LevelDB uses 12.
pub const MAX_HEIGHT: usize = 12;

/// A single node in the skip list.
///
/// Each node has `height` forward pointers. Level 0 contains all nodes
/// (a regular linked list). Higher levels skip over nodes, enabling
/// O(log n) average-case search.
///
/// ```text
/// Level 3:  HEAD ──────────────────────────────► 50 ──────────► NIL
/// Level 2:  HEAD ──────────► 20 ────────────────► 50 ──────────► NIL
/// Level 1:  HEAD ──► 10 ──► 20 ────► 35 ────────► 50 ──► 60 ──► NIL
/// Level 0:  HEAD ──► 10 ──► 20 ──► 25 ──► 35 ──► 50 ──► 60 ──► 70 ► NIL
/// ```
///
/// Nodes live in an arena (`SkipList::nodes`) and point at each other by
/// index — no unsafe, good cache locality. Index 0 is the head sentinel.
struct SkipNode {
    key: Key,
    version: Version,
    forward: Vec<Option<usize>>,
}

/// A probabilistic sorted map from user key to its newest version.
///
/// Why skip list over red-black tree?
///   - Simpler to implement correctly
///   - Better cache locality for iteration (level 0 is a linked list)
///   - This is what LevelDB uses
///
/// Average case: O(log n) insert, O(log n) lookup, O(n) iteration.
/// Inserting an existing key replaces its version in place — the memtable
/// only ever serves the newest version of a key.
pub struct SkipList {
    nodes: Vec<SkipNode>,
    height: usize,
    len: usize,
}

impl SkipList {
    /// Create a new empty skip list.
    pub fn new() -> Self {
        let head = SkipNode {
            key: Vec::new(),
            version: Version {
                sequence: 0,
                value_type: ValueType::Put,
                value: Vec::new(),
            },
            forward: vec![None; MAX_HEIGHT],
        };
        SkipList {
            nodes: vec![head],
            height: 1,
            len: 0,
        }
    }

    /// Insert a key with its version. Replaces the version if the key exists.
    pub fn insert(&mut self, key: Key, version: Version) {
        // Find the predecessor of `key` at every level.
        let mut preds = [0usize; MAX_HEIGHT];
        let mut current = 0;
        for level in (0..self.height).rev() {
            while let Some(next) = self.nodes[current].forward[level] {
                if self.nodes[next].key < key {
                    current = next;
                } else {
                    break;
                }
            }
            preds[level] = current;
        }

        // Existing key: replace the version in place.
        if let Some(next) = self.nodes[preds[0]].forward[0] {
            if self.nodes[next].key == key {
                self.nodes[next].version = version;
                return;
            }
        }

        let node_height = self.random_height();
        if node_height > self.height {
            // Levels above the old height start at the head.
            for level in self.height..node_height {
                preds[level] = 0;
            }
            self.height = node_height;
        }

        let new_index = self.nodes.len();
        let mut forward = vec![None; node_height];
        for (level, slot) in forward.iter_mut().enumerate() {
            *slot = self.nodes[preds[level]].forward[level];
        }
        self.nodes.push(SkipNode {
            key,
            version,
            forward,
        });
        for level in 0..node_height {
            self.nodes[preds[level]].forward[level] = Some(new_index);
        }
        self.len += 1;
    }

    /// Look up a key. Returns its stored version (tombstones included).
    pub fn get(&self, key: &[u8]) -> Option<&Version> {
        let mut current = 0;
        for level in (0..self.height).rev() {
            while let Some(next) = self.nodes[current].forward[level] {
                if self.nodes[next].key.as_slice() < key {
                    current = next;
                } else {
                    break;
                }
            }
        }
        let candidate = self.nodes[current].forward[0]?;
        if self.nodes[candidate].key == key {
            Some(&self.nodes[candidate].version)
        } else {
            None
        }
    }

    /// Number of entries in the skip list.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the skip list is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Create an iterator over all entries in sorted key order.
    /// Traverses level 0 (the bottom level contains all entries).
    pub fn iter(&self) -> SkipListIterator<'_> {
        SkipListIterator {
            list: self,
            current: self.nodes[0].forward[0],
        }
    }

    /// Generate a random level for a new node.
    /// Each level has a 1/4 probability (LevelDB uses 1/4, not 1/2).
    /// Higher branching factor = shorter skip list = fewer levels = less memory.
    fn random_height(&self) -> usize {
        let mut rng = rand::thread_rng();
        let mut height = 1;
        while height < MAX_HEIGHT && rng.gen_range(0..4) == 0 {
            height += 1;
        }
        height
    }
}

impl Default for SkipList {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over skip list entries in sorted order.
///
/// Simply follows level 0 forward pointers — level 0 is a sorted linked list
/// containing every entry, tombstones included.
pub struct SkipListIterator<'a> {
    list: &'a SkipList,
    current: Option<usize>,
}

impl<'a> StorageIterator for SkipListIterator<'a> {
    fn key(&self) -> &[u8] {
        &self.list.nodes[self.current.unwrap()].key
    }

    fn value(&self) -> &[u8] {
        &self.list.nodes[self.current.unwrap()].version.value
    }

    fn sequence(&self) -> u64 {
        self.list.nodes[self.current.unwrap()].version.sequence
    }

    fn value_type(&self) -> ValueType {
        self.list.nodes[self.current.unwrap()].version.value_type
    }

    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    fn next(&mut self) -> Result<()> {
        if let Some(index) = self.current {
            self.current = self.list.nodes[index].forward[0];
        }
        Ok(())
    }
}
