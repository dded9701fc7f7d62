//! Merge iterator for combining multiple sorted cell sources.
//!
//! The merge iterator maintains a min-heap of sources and always returns
//! cells in [`CellKey`](crate::types::CellKey) order: rows ascending,
//! timestamps descending within a column, delete markers ahead of puts at
//! equal timestamps.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::store::StoreFileReader;
use crate::types::Cell;
use crate::Result;

/// A single entry in the merge heap.
#[derive(Debug, Clone)]
struct MergeEntry {
    cell: Cell,
    source_index: usize,
}

// For the min-heap, we need reverse ordering (smallest key first).
impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cell.key == other.cell.key
    }
}

impl Eq for MergeEntry {}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (BinaryHeap is a max-heap).
        match other.cell.key.cmp(&self.cell.key) {
            Ordering::Equal => other.source_index.cmp(&self.source_index),
            ord => ord,
        }
    }
}

/// Trait for sorted cell sources that can be merged.
pub trait CellMergeSource {
    /// Check if the source has a current cell.
    fn valid(&self) -> bool;

    /// Get the current cell.
    fn current(&self) -> Option<Cell>;

    /// Move to the next cell.
    fn next(&mut self) -> Result<()>;

    /// Seek to the first cell.
    fn seek_to_first(&mut self) -> Result<()>;
}

/// Merge iterator that combines multiple sorted cell sources.
pub struct MergeIterator<S: CellMergeSource> {
    sources: Vec<S>,
    heap: BinaryHeap<MergeEntry>,
    current: Option<MergeEntry>,
}

impl<S: CellMergeSource> MergeIterator<S> {
    /// Create a new merge iterator from multiple sources.
    pub fn new(sources: Vec<S>) -> Self {
        Self {
            sources,
            heap: BinaryHeap::new(),
            current: None,
        }
    }

    /// Seek to the first cell across all sources.
    pub fn seek_to_first(&mut self) -> Result<()> {
        self.heap.clear();
        self.current = None;

        for (index, source) in self.sources.iter_mut().enumerate() {
            source.seek_to_first()?;
            if let Some(cell) = source.current() {
                self.heap.push(MergeEntry {
                    cell,
                    source_index: index,
                });
            }
        }

        self.advance()
    }

    /// Check if the iterator has a current cell.
    pub fn valid(&self) -> bool {
        self.current.is_some()
    }

    /// Get the current cell.
    pub fn current(&self) -> Option<&Cell> {
        self.current.as_ref().map(|e| &e.cell)
    }

    /// Move to the next cell.
    pub fn next(&mut self) -> Result<()> {
        self.advance()
    }

    fn advance(&mut self) -> Result<()> {
        if let Some(entry) = self.current.take() {
            let source = &mut self.sources[entry.source_index];
            source.next()?;
            if let Some(cell) = source.current() {
                self.heap.push(MergeEntry {
                    cell,
                    source_index: entry.source_index,
                });
            }
        }

        self.current = self.heap.pop();
        Ok(())
    }
}

/// A source over the cells of an opened store file.
pub struct StoreFileSource {
    reader: Arc<StoreFileReader>,
    position: usize,
}

impl StoreFileSource {
    /// Create a source over a shared reader.
    pub fn new(reader: Arc<StoreFileReader>) -> Self {
        Self {
            reader,
            position: 0,
        }
    }
}

impl CellMergeSource for StoreFileSource {
    fn valid(&self) -> bool {
        self.position < self.reader.cells().len()
    }

    fn current(&self) -> Option<Cell> {
        self.reader.cells().get(self.position).cloned()
    }

    fn next(&mut self) -> Result<()> {
        if self.valid() {
            self.position += 1;
        }
        Ok(())
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }
}

/// A simple in-memory merge source for testing.
pub struct VecCellSource {
    cells: Vec<Cell>,
    position: usize,
}

impl VecCellSource {
    /// Create a source over pre-sorted cells.
    pub fn new(cells: Vec<Cell>) -> Self {
        Self { cells, position: 0 }
    }
}

impl CellMergeSource for VecCellSource {
    fn valid(&self) -> bool {
        self.position < self.cells.len()
    }

    fn current(&self) -> Option<Cell> {
        self.cells.get(self.position).cloned()
    }

    fn next(&mut self) -> Result<()> {
        if self.position < self.cells.len() {
            self.position += 1;
        }
        Ok(())
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }
}
