// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Page-granular interval arithmetic and the ordered registration index.

use tracing::trace;

use super::error::{MrError, MrResult};

/// A page-aligned, half-open address interval `[base, end)`.
///
/// Both bounds are multiples of the cache's page size; the raw buffer the
/// range was computed from lies fully inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PageRange {
    base: usize,
    end: usize,
}

impl PageRange {
    /// Round a raw `(addr, len)` buffer out to the pages containing it.
    ///
    /// `page_size` must be a power of two (validated at cache construction).
    pub(crate) fn containing(addr: usize, len: usize, page_size: usize) -> MrResult<Self> {
        if len == 0 {
            return Err(MrError::InvalidRegion {
                reason: "zero-length buffer",
            });
        }
        let base = addr & !(page_size - 1);
        let end = addr
            .checked_add(len)
            .and_then(|raw_end| raw_end.checked_add(page_size - 1))
            .map(|e| e & !(page_size - 1))
            .ok_or(MrError::InvalidRegion {
                reason: "address range overflows the address space",
            })?;
        Ok(Self { base, end })
    }

    pub(crate) fn base(&self) -> usize {
        self.base
    }

    pub(crate) fn end(&self) -> usize {
        self.end
    }

    /// Length in bytes; always a multiple of the page size.
    pub(crate) fn len(&self) -> usize {
        self.end - self.base
    }

    fn contains(&self, other: &PageRange) -> bool {
        self.base <= other.base && other.end <= self.end
    }

    fn overlaps(&self, other: &PageRange) -> bool {
        self.base < other.end && other.base < self.end
    }
}

/// One live registration: a page range, its share count, and the backend
/// handle all shares borrow.
#[derive(Debug)]
pub(crate) struct RegEntry<H> {
    pub(crate) range: PageRange,
    pub(crate) refcnt: usize,
    pub(crate) handle: H,
}

/// Outcome of a covering lookup.
pub(crate) enum Lookup {
    /// Slot of the entry whose range contains the request.
    Covered(usize),
    /// Insertion slot that keeps the index sorted by base address.
    Vacant(usize),
}

/// Ordered set of non-overlapping live registrations.
///
/// Entries are kept sorted by base address in a flat vector: inserts shift
/// the tail right, removals shift it left. The slot capacity doubles when
/// full and is released entirely when the last entry is removed, so an idle
/// cache holds no storage.
#[derive(Debug)]
pub(crate) struct RegionIndex<H> {
    slots: Vec<RegEntry<H>>,
    /// Logical capacity; governs the doubling cadence independently of any
    /// over-allocation by the vector itself.
    capacity: usize,
    initial_capacity: usize,
}

impl<H: Eq> RegionIndex<H> {
    pub(crate) fn new(initial_capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            capacity: 0,
            initial_capacity,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Walk the entries in increasing address order and classify `range`.
    ///
    /// Stops at the first entry containing the request (hit) or starting at
    /// or beyond its end (miss, insert before it). A request straddling an
    /// entry's boundary is rejected rather than splitting or extending the
    /// entry, preserving the non-overlap invariant.
    pub(crate) fn lookup(&self, range: &PageRange) -> MrResult<Lookup> {
        for (slot, entry) in self.slots.iter().enumerate() {
            if entry.range.contains(range) {
                return Ok(Lookup::Covered(slot));
            }
            if entry.range.overlaps(range) {
                return Err(MrError::OverlapConflict {
                    base: range.base(),
                    end: range.end(),
                });
            }
            if range.end() <= entry.range.base() {
                return Ok(Lookup::Vacant(slot));
            }
        }
        Ok(Lookup::Vacant(self.slots.len()))
    }

    pub(crate) fn find_by_handle(&self, handle: &H) -> Option<usize> {
        self.slots.iter().position(|entry| &entry.handle == handle)
    }

    pub(crate) fn entry_mut(&mut self, slot: usize) -> &mut RegEntry<H> {
        &mut self.slots[slot]
    }

    /// Make room for one more entry, doubling the slot capacity if full.
    ///
    /// Called before the backend registration on a miss so that the insert
    /// after a successful registration cannot fail and strand a live handle.
    pub(crate) fn ensure_capacity(&mut self) -> MrResult<()> {
        if self.slots.len() < self.capacity {
            return Ok(());
        }
        let target = if self.capacity == 0 {
            self.initial_capacity
        } else {
            self.capacity * 2
        };
        self.slots.try_reserve_exact(target - self.slots.len())?;
        trace!(capacity = target, "growing registration cache storage");
        self.capacity = target;
        Ok(())
    }

    /// Insert at `slot`, shifting later entries right.
    ///
    /// Callers must have classified `slot` via [`lookup`](Self::lookup) and
    /// reserved room via [`ensure_capacity`](Self::ensure_capacity).
    pub(crate) fn insert_at(&mut self, slot: usize, entry: RegEntry<H>) {
        debug_assert!(self.slots.len() < self.capacity);
        self.slots.insert(slot, entry);
    }

    /// Remove the entry at `slot`, shifting later entries left.
    ///
    /// Releases the backing storage when the last entry goes; the next miss
    /// re-grows from the configured initial capacity.
    pub(crate) fn remove_at(&mut self, slot: usize) -> RegEntry<H> {
        let entry = self.slots.remove(slot);
        if self.slots.is_empty() {
            self.slots = Vec::new();
            self.capacity = 0;
        }
        entry
    }

    /// Base addresses of all live entries, in index order. Test hook for
    /// the ordering invariant.
    #[cfg(test)]
    pub(crate) fn bases(&self) -> Vec<usize> {
        self.slots.iter().map(|entry| entry.range.base()).collect()
    }
}
