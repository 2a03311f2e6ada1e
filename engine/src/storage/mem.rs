//! Low-level memory for type-erased columns.
//!
//! [`RawVec`] manages a contiguous block of uniform-sized cells without type
//! information. It tracks capacity only; length, initialization and cell
//! contents are the caller's responsibility. [`Column`](super::column::Column)
//! layers length tracking and byte-level cell access on top.
//!
//! Zero-sized layouts never allocate; the block reports whatever capacity is
//! requested and hands out a dangling, well-aligned pointer.

use std::{
    alloc::{self, Layout},
    cmp,
    ptr::{self, NonNull},
};

/// How a block grows when capacity is exceeded.
///
/// Columns on the hot insert path use exponential growth to amortize
/// reallocation; bulk loads reserve exactly.
#[derive(Debug, Clone, Copy)]
pub enum GrowthStrategy {
    /// Grow to a multiple of the current capacity (typically 2).
    Multiply(usize),
    /// Grow by the exact amount requested.
    Exact,
}

impl GrowthStrategy {
    /// The capacity to grow to, given the current and the requested capacity.
    pub fn new_capacity(&self, current: usize, requested: usize) -> usize {
        match self {
            Self::Multiply(factor) => cmp::max(current * factor, requested),
            Self::Exact => requested,
        }
    }
}

/// A contiguous block of uniform-sized cells, indexable by row.
///
/// # Safety
/// The block does not track initialization and never drops cell contents.
/// Callers must only read rows they have written and must keep `index <
/// capacity` on every access.
pub struct RawVec {
    /// Pointer to the block. Dangling while capacity is zero or the cell
    /// layout is zero-sized.
    ptr: NonNull<u8>,

    /// Number of cells the block can hold.
    capacity: usize,

    /// The layout of one cell.
    cell_layout: Layout,

    /// Growth strategy applied by `reserve`.
    growth: GrowthStrategy,
}

impl RawVec {
    /// Construct an empty block for cells of the given layout.
    #[inline]
    pub const fn new(cell_layout: Layout, growth: GrowthStrategy) -> Self {
        Self {
            ptr: NonNull::dangling(),
            capacity: 0,
            cell_layout,
            growth,
        }
    }

    /// Number of cells the block can hold.
    #[inline]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Size of one cell in bytes.
    #[inline]
    pub const fn cell_size(&self) -> usize {
        self.cell_layout.size()
    }

    /// Get a pointer to the cell at `index`.
    ///
    /// # Panics
    /// Debug builds panic when `index >= capacity()`.
    #[inline]
    pub fn ptr_at(&self, index: usize) -> NonNull<u8> {
        debug_assert!(
            index < self.capacity,
            "index {} out of bounds (capacity {})",
            index,
            self.capacity
        );
        // SAFETY: index is within the allocated block; for zero-sized cells
        // the offset is zero and the dangling pointer is returned unchanged.
        unsafe { NonNull::new_unchecked(self.ptr.as_ptr().add(index * self.cell_layout.size())) }
    }

    /// Ensure capacity for at least `needed` cells total.
    ///
    /// Returns `true` when the base pointer of the block changed, so callers
    /// can invalidate cached locations.
    pub fn reserve_total(&mut self, needed: usize) -> bool {
        if needed <= self.capacity {
            return false;
        }
        let new_capacity = self.growth.new_capacity(self.capacity, needed);
        self.grow_to(new_capacity)
    }

    /// Grow the block to the requested capacity. Returns whether the base
    /// pointer changed.
    fn grow_to(&mut self, capacity: usize) -> bool {
        if self.cell_layout.size() == 0 {
            // Markers never allocate; capacity is bookkeeping only.
            self.capacity = capacity;
            return false;
        }

        let new_layout = Layout::from_size_align(
            capacity * self.cell_layout.size(),
            self.cell_layout.align(),
        )
        .expect("column layout overflow");

        let old_ptr = self.ptr.as_ptr();
        let new_ptr = if self.capacity == 0 {
            // SAFETY: new_layout has non-zero size here.
            unsafe { alloc::alloc(new_layout) }
        } else {
            let old_layout = Layout::from_size_align(
                self.capacity * self.cell_layout.size(),
                self.cell_layout.align(),
            )
            .expect("column layout overflow");
            // SAFETY: ptr was allocated with old_layout by this block.
            unsafe { alloc::realloc(self.ptr.as_ptr(), old_layout, new_layout.size()) }
        };

        if new_ptr.is_null() {
            alloc::handle_alloc_error(new_layout);
        }

        self.ptr = NonNull::new(new_ptr).expect("allocation returned null");
        self.capacity = capacity;
        old_ptr != new_ptr
    }

    /// Move the allocation out of this block, leaving it empty. Used by the
    /// merge fast path that adopts a whole staged column.
    pub fn take(&mut self) -> RawVec {
        let taken = RawVec {
            ptr: self.ptr,
            capacity: self.capacity,
            cell_layout: self.cell_layout,
            growth: self.growth,
        };
        self.ptr = NonNull::dangling();
        self.capacity = 0;
        taken
    }

    /// Free the allocation and reset to empty.
    pub fn clear(&mut self) {
        if self.capacity > 0 && self.cell_layout.size() > 0 {
            let layout = Layout::from_size_align(
                self.capacity * self.cell_layout.size(),
                self.cell_layout.align(),
            )
            .expect("column layout overflow");
            // SAFETY: ptr was allocated with this layout by grow_to.
            unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) };
        }
        self.ptr = NonNull::dangling();
        self.capacity = 0;
    }

    /// Copy `count` cells from `src_index` in `src` to `dst_index` in self.
    ///
    /// # Safety
    /// Both ranges must be within capacity and the source cells initialized.
    /// The blocks must share a cell layout.
    pub unsafe fn copy_cells(&mut self, dst_index: usize, src: &RawVec, src_index: usize, count: usize) {
        debug_assert_eq!(self.cell_layout, src.cell_layout, "cell layout mismatch");
        let size = self.cell_layout.size();
        if size == 0 || count == 0 {
            return;
        }
        // SAFETY: caller guarantees both ranges are in bounds; the blocks
        // are distinct allocations so the ranges cannot overlap.
        unsafe {
            ptr::copy_nonoverlapping(
                src.ptr_at(src_index).as_ptr(),
                self.ptr_at(dst_index).as_ptr(),
                count * size,
            );
        }
    }
}

impl Drop for RawVec {
    fn drop(&mut self) {
        self.clear();
    }
}

// SAFETY: the block owns its allocation; cells are plain bytes.
unsafe impl Send for RawVec {}
// SAFETY: no interior mutability.
unsafe impl Sync for RawVec {}
