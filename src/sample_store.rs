//! Fixed-capacity circular buffer of channel-level transitions.
//!
//! The store keeps `(tick, level)` records in time order between a read
//! position (oldest) and a write position (newest). It never reallocates
//! after construction and never locks; whoever owns it decides how reads
//! and appends are serialized.

use crate::tick_clock::Tick;

/// Default number of transition records kept in memory.
pub const DEFAULT_CAPACITY: usize = 1_000_000;

/// Channel state immediately after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sample {
    pub tick: Tick,
    pub level: u32,
}

impl Sample {
    pub const fn new(tick: Tick, level: u32) -> Self {
        Self { tick, level }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Sample store is full")]
    Overflow,

    #[error("{len} records do not fit a store of capacity {capacity}")]
    CapacityExceeded { len: usize, capacity: usize },
}

#[derive(Debug, Clone)]
pub struct SampleStore {
    records: Vec<Sample>,
    read_pos: usize,
    write_pos: usize,
    count: usize,
    tick_origin: Tick,
    /// Cleared only by `clear`; draining through eviction keeps the origin.
    has_origin: bool,
}

impl SampleStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: vec![Sample::default(); capacity],
            read_pos: 0,
            write_pos: 0,
            count: 0,
            tick_origin: 0,
            has_origin: false,
        }
    }

    /// Append a record after the newest one.
    ///
    /// The first record after a [`clear`](Self::clear) becomes the tick
    /// origin. A store emptied by eviction keeps its origin. A full
    /// store rejects the record with [`StoreError::Overflow`]; the caller
    /// decides whether to [`evict_oldest`](Self::evict_oldest) and retry.
    pub fn append(&mut self, tick: Tick, level: u32) -> Result<usize, StoreError> {
        if self.count == 0 {
            if !self.has_origin {
                self.tick_origin = tick;
                self.has_origin = true;
            }
            self.read_pos = 0;
            self.write_pos = 0;
        } else if self.count == self.capacity() {
            return Err(StoreError::Overflow);
        } else {
            self.write_pos = self.next_index(self.write_pos);
        }

        self.records[self.write_pos] = Sample::new(tick, level);
        self.count += 1;
        Ok(self.write_pos)
    }

    /// Drop the oldest record. Returns it, or `None` when empty.
    pub fn evict_oldest(&mut self) -> Option<Sample> {
        if self.count == 0 {
            return None;
        }
        let oldest = self.records[self.read_pos];
        self.count -= 1;
        if self.count > 0 {
            self.read_pos = self.next_index(self.read_pos);
        }
        Some(oldest)
    }

    pub fn clear(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
        self.count = 0;
        self.tick_origin = 0;
        self.has_origin = false;
    }

    /// Replace the whole content with `records`, oldest first.
    ///
    /// The tick origin is reset to 0, so the records' ticks are taken as
    /// already relative to it.
    pub fn bulk_load(&mut self, records: &[Sample]) -> Result<usize, StoreError> {
        if records.len() > self.capacity() {
            return Err(StoreError::CapacityExceeded {
                len: records.len(),
                capacity: self.capacity(),
            });
        }

        self.records[..records.len()].copy_from_slice(records);
        self.read_pos = 0;
        self.write_pos = records.len().saturating_sub(1);
        self.count = records.len();
        self.tick_origin = 0;
        self.has_origin = !records.is_empty();
        Ok(records.len())
    }

    /// Record at a physical index.
    pub fn at(&self, index: usize) -> Sample {
        self.records[index % self.capacity()]
    }

    /// Record at a logical position, 0 being the oldest.
    pub fn get(&self, position: usize) -> Option<Sample> {
        (position < self.count).then(|| self.records[self.physical(position)])
    }

    pub fn first(&self) -> Option<Sample> {
        self.get(0)
    }

    pub fn last(&self) -> Option<Sample> {
        (self.count > 0).then(|| self.records[self.write_pos])
    }

    /// Records oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = Sample> + ExactSizeIterator + '_ {
        (0..self.count).map(move |position| self.records[self.physical(position)])
    }

    /// Physical index of a logical position.
    pub fn physical(&self, position: usize) -> usize {
        (self.read_pos + position) % self.capacity()
    }

    /// Logical position of a physical index.
    pub fn logical(&self, index: usize) -> usize {
        (index + self.capacity() - self.read_pos) % self.capacity()
    }

    pub fn next_index(&self, index: usize) -> usize {
        if index + 1 >= self.capacity() {
            0
        } else {
            index + 1
        }
    }

    pub fn prev_index(&self, index: usize) -> usize {
        if index == 0 {
            self.capacity() - 1
        } else {
            index - 1
        }
    }

    pub fn read_pos(&self) -> usize {
        self.read_pos
    }

    pub fn write_pos(&self) -> usize {
        self.write_pos
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == self.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    pub fn tick_origin(&self) -> Tick {
        self.tick_origin
    }
}

impl Default for SampleStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
