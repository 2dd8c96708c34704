//! Reference-counted compacting heap
//!
//! Objects live in a flat word-addressed buffer and are known to emitted
//! code only by reference number. The indirection table maps each number to
//! the object's current address, so compaction can slide objects down
//! without invalidating anything the program holds.
//!
//! Object layout, in words:
//!
//! ```text
//! +----------+-------------+--------+------+---------------------+
//! | refcount | field count | bitmap | size | payload (size words) |
//! +----------+-------------+--------+------+---------------------+
//! ```
//!
//! Bit `i` of the bitmap marks payload word `i` as a reference. Reference 0
//! is the none value and is never dereferenced.
//!
//! Pure reference counting does not reclaim unreachable cycles.

use std::collections::{HashSet, VecDeque};

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;

use crate::config::HeapConfig;
use crate::error::HeapError;

pub type Ref = u32;

pub type Result<T> = std::result::Result<T, HeapError>;

/// The none reference
pub const NONE: Ref = 0;

pub const HEADER_WORDS: usize = 4;

/// Address 0 stays unused so that no object ever sits there
pub const HEAP_START: usize = 1;

const REFCOUNT: usize = 0;
const FIELD_COUNT: usize = 1;
const BITMAP: usize = 2;
const SIZE: usize = 3;

/// Bitmap width; fields past it are never traced
const BITMAP_BITS: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeapStats {
    pub capacity: usize,
    /// Words between `HEAP_START` and the allocation pointer
    pub used: usize,
    pub live_objects: usize,
    /// Zero-count objects awaiting compaction
    pub dead_objects: usize,
    pub reclaimable: usize,
    pub recycled_references: usize,
    pub compactions: usize,
    pub scope_depth: usize,
}

#[derive(Debug)]
pub struct Heap {
    config: HeapConfig,
    memory: Vec<u32>,
    /// Next free address
    top: usize,
    table: IndexMap<Ref, usize>,
    free_refs: Vec<Ref>,
    last_ref: Ref,
    /// Root sets, innermost last; the base scope is never popped
    scopes: Vec<IndexSet<Ref>>,
    reclaimable: usize,
    compactions: usize,
}

impl Heap {
    pub fn new(config: HeapConfig) -> Self {
        let mut heap = Heap {
            memory: Vec::new(),
            top: HEAP_START,
            table: IndexMap::new(),
            free_refs: Vec::new(),
            last_ref: 0,
            scopes: Vec::new(),
            reclaimable: 0,
            compactions: 0,
            config,
        };
        heap.init();
        heap
    }

    /// Reset every piece of state; runs before each independent program
    pub fn init(&mut self) {
        self.memory = vec![0; self.config.capacity_words];
        self.top = HEAP_START;
        self.table.clear();
        self.free_refs.clear();
        self.last_ref = 0;
        self.scopes = vec![IndexSet::new()];
        self.reclaimable = 0;
        self.compactions = 0;
    }

    pub fn capacity(&self) -> usize {
        self.memory.len()
    }

    /// Allocate an object of `field_count` words. Bit i of `ref_fields`
    /// marks word i as a reference. The object starts with count 1, held by
    /// the current scope.
    pub fn construct(&mut self, field_count: usize, ref_fields: u32) -> Result<Ref> {
        if field_count < BITMAP_BITS && ref_fields >> field_count != 0 {
            return Err(HeapError::InvalidLayout {
                bitmap: ref_fields,
                fields: field_count,
            });
        }

        let too_large = || HeapError::OutOfMemory {
            requested: field_count.saturating_add(HEADER_WORDS),
            available: self.capacity().saturating_sub(self.top),
        };
        let size = u32::try_from(field_count).map_err(|_| too_large())?;
        let words = HEADER_WORDS.checked_add(field_count).ok_or_else(too_large)?;
        if !self.fits(words) {
            self.compact();
            if !self.fits(words) {
                return Err(HeapError::OutOfMemory {
                    requested: words,
                    available: self.capacity().saturating_sub(self.top),
                });
            }
        } else if self.reclaimable > self.capacity() / 2 {
            self.compact();
        }

        let r = self.next_reference()?;
        let addr = self.top;
        self.memory[addr + REFCOUNT] = 1;
        self.memory[addr + FIELD_COUNT] = size;
        self.memory[addr + BITMAP] = ref_fields;
        self.memory[addr + SIZE] = size;
        self.memory[addr + HEADER_WORDS..addr + words].fill(0);
        self.top += words;
        self.table.insert(r, addr);
        self.top_scope().insert(r);
        Ok(r)
    }

    /// Allocate an object with no reference fields
    pub fn allocate(&mut self, field_count: usize) -> Result<Ref> {
        self.construct(field_count, 0)
    }

    pub fn load(&self, r: Ref, offset: usize) -> Result<u32> {
        let addr = self.field_address(r, offset)?;
        Ok(self.memory[addr])
    }

    /// Write a field. Storing into a reference field moves one count from
    /// the old value to the new one.
    pub fn store(&mut self, r: Ref, offset: usize, value: u32) -> Result<()> {
        let addr = self.field_address(r, offset)?;
        let traced = self.is_reference_field(r, offset)?;
        if traced && value != NONE {
            self.address_of(value)?;
        }
        let old = self.memory[addr];
        self.memory[addr] = value;
        if !traced || old == value {
            return Ok(());
        }
        self.update_refcount(value, r, 1, true)?;
        self.update_refcount(old, r, -1, true)
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(IndexSet::new());
    }

    /// Drop one count from every root of the innermost scope
    pub fn pop_scope(&mut self) -> Result<()> {
        if self.scopes.len() <= 1 {
            return Err(HeapError::ScopeUnderflow);
        }
        let roots = self.scopes.pop().unwrap_or_default();
        for r in roots {
            self.update_refcount(r, NONE, -1, true)?;
        }
        Ok(())
    }

    /// Mention `r` as a root of the current scope; counts once per scope
    pub fn retain(&mut self, r: Ref) -> Result<()> {
        if r == NONE {
            return Ok(());
        }
        self.address_of(r)?;
        if self.top_scope().insert(r) {
            self.update_refcount(r, NONE, 1, false)?;
        }
        Ok(())
    }

    /// Drop one holder of `r`, releasing its current-scope root if it has one
    pub fn release(&mut self, r: Ref) -> Result<()> {
        if r == NONE {
            return Ok(());
        }
        self.address_of(r)?;
        self.top_scope().shift_remove(&r);
        self.update_refcount(r, NONE, -1, true)
    }

    /// Adjust `root`'s count by `delta` and, for a structural decrement,
    /// release everything it referenced once it reaches zero.
    ///
    /// `target` is the object being stored into; the traversal never enters
    /// it, and nothing happens at all if it is already dead.
    pub fn update_refcount(
        &mut self,
        root: Ref,
        target: Ref,
        delta: i32,
        structural: bool,
    ) -> Result<()> {
        if root == NONE {
            return Ok(());
        }
        if target != NONE && self.refcount(target)? == 0 {
            return Ok(());
        }

        let mut explored: HashSet<Ref> = HashSet::new();
        explored.insert(target);
        explored.insert(root);
        let descend = structural && delta < 0;

        let mut queue = VecDeque::new();
        if self.adjust(root, delta)? && descend {
            queue.push_back(root);
        }
        while let Some(curr) = queue.pop_front() {
            for child in self.children(curr)? {
                if explored.insert(child) && self.adjust(child, delta)? {
                    queue.push_back(child);
                }
            }
        }
        Ok(())
    }

    /// Slide every object with a nonzero count down to the start of the
    /// heap, in table order. Zero-count objects are dropped and their
    /// reference numbers recycled. Returns the new allocation pointer.
    pub fn compact(&mut self) -> usize {
        let mut memory = vec![0; self.capacity()];
        let mut table = IndexMap::with_capacity(self.table.len());
        let mut free = HEAP_START;
        let mut recycled = Vec::new();

        for (&r, &addr) in &self.table {
            if self.memory[addr + REFCOUNT] == 0 {
                recycled.push(r);
                continue;
            }
            let words = HEADER_WORDS + self.memory[addr + SIZE] as usize;
            memory[free..free + words].copy_from_slice(&self.memory[addr..addr + words]);
            table.insert(r, free);
            free += words;
        }

        log::debug!(
            "heap compaction: {} objects kept, {} references recycled, {} words freed",
            table.len(),
            recycled.len(),
            self.top - free
        );

        for scope in &mut self.scopes {
            scope.retain(|r| table.contains_key(r));
        }
        self.free_refs.extend(recycled);
        self.memory = memory;
        self.table = table;
        self.top = free;
        self.reclaimable = 0;
        self.compactions += 1;
        free
    }

    pub fn refcount(&self, r: Ref) -> Result<u32> {
        Ok(self.memory[self.address_of(r)? + REFCOUNT])
    }

    pub fn address_of(&self, r: Ref) -> Result<usize> {
        self.table
            .get(&r)
            .copied()
            .ok_or(HeapError::InvalidReference(r))
    }

    pub fn stats(&self) -> HeapStats {
        let dead_objects = self
            .table
            .values()
            .filter(|&&addr| self.memory[addr + REFCOUNT] == 0)
            .count();
        HeapStats {
            capacity: self.capacity(),
            used: self.top - HEAP_START,
            live_objects: self.table.len() - dead_objects,
            dead_objects,
            reclaimable: self.reclaimable,
            recycled_references: self.free_refs.len(),
            compactions: self.compactions,
            scope_depth: self.scopes.len(),
        }
    }

    /// Whether every table entry lies inside the allocated region and no two
    /// objects overlap
    pub fn verify(&self) -> bool {
        let mut ranges: Vec<(usize, usize)> = Vec::with_capacity(self.table.len());
        for &addr in self.table.values() {
            if addr < HEAP_START || addr + HEADER_WORDS > self.top {
                return false;
            }
            let end = addr + HEADER_WORDS + self.memory[addr + SIZE] as usize;
            if end > self.top {
                return false;
            }
            ranges.push((addr, end));
        }
        ranges.sort_unstable();
        ranges.windows(2).all(|pair| pair[0].1 <= pair[1].0)
    }

    fn fits(&self, words: usize) -> bool {
        self.top
            .checked_add(words)
            .map_or(false, |end| end <= self.capacity())
    }

    fn top_scope(&mut self) -> &mut IndexSet<Ref> {
        if self.scopes.is_empty() {
            self.scopes.push(IndexSet::new());
        }
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    fn next_reference(&mut self) -> Result<Ref> {
        if let Some(r) = self.free_refs.pop() {
            return Ok(r);
        }
        if self.last_ref >= self.config.max_references {
            return Err(HeapError::ReferencesExhausted {
                max: self.config.max_references,
            });
        }
        self.last_ref += 1;
        Ok(self.last_ref)
    }

    fn field_address(&self, r: Ref, offset: usize) -> Result<usize> {
        let addr = self.address_of(r)?;
        let fields = self.memory[addr + FIELD_COUNT] as usize;
        if offset >= fields {
            return Err(HeapError::FieldOutOfBounds {
                reference: r,
                offset,
                fields,
            });
        }
        Ok(addr + HEADER_WORDS + offset)
    }

    fn is_reference_field(&self, r: Ref, offset: usize) -> Result<bool> {
        let addr = self.address_of(r)?;
        Ok(offset < BITMAP_BITS && self.memory[addr + BITMAP] & (1 << offset) != 0)
    }

    /// Non-none references held in `r`'s reference fields
    fn children(&self, r: Ref) -> Result<Vec<Ref>> {
        let addr = self.address_of(r)?;
        let bitmap = self.memory[addr + BITMAP];
        let size = (self.memory[addr + SIZE] as usize).min(BITMAP_BITS);
        Ok((0..size)
            .filter(|&i| bitmap & (1u32 << i) != 0)
            .map(|i| self.memory[addr + HEADER_WORDS + i])
            .filter(|&child| child != NONE)
            .collect())
    }

    /// Apply `delta`, clamping at zero. Returns whether the object died now.
    fn adjust(&mut self, r: Ref, delta: i32) -> Result<bool> {
        let addr = self.address_of(r)?;
        let old = self.memory[addr + REFCOUNT];
        let new = (i64::from(old) + i64::from(delta)).clamp(0, i64::from(u32::MAX)) as u32;
        self.memory[addr + REFCOUNT] = new;
        let footprint = HEADER_WORDS + self.memory[addr + SIZE] as usize;
        let died = old > 0 && new == 0;
        if died {
            self.reclaimable += footprint;
        } else if old == 0 && new > 0 {
            // Revived before compaction reclaimed it
            self.reclaimable = self.reclaimable.saturating_sub(footprint);
        }
        Ok(died)
    }
}

impl Default for Heap {
    fn default() -> Self {
        Heap::new(HeapConfig::default())
    }
}
