//! Handle-addressed record storage for the depot.
//!
//! This module provides `Table<T>`, a slab of fixed-type records addressed
//! by small integer handles, and `Heap`, a table of variable-length byte
//! objects. Everything the depot persists lives in one of these tables, and
//! every cross-reference between records is a handle, never a pointer.
//!
//! # Design Rationale
//!
//! Layered objects form webs of shared state: many objects can reference the
//! same file descriptor record, many extents can reference the same heap
//! object. Raw references would force lifetime gymnastics on every operation
//! that walks an object's chain while mutating siblings. Handles sidestep
//! that:
//!
//! - Records are small `Copy` structs; operations read them out by value,
//!   mutate the local copy, and write it back.
//! - A freed handle's slot is recycled through a free list, so long-running
//!   depots do not grow without bound.
//! - Dead handles are detected (`get` on a freed slot returns an error), so
//!   a use-after-free bug surfaces as `Error::BadHandle` instead of silent
//!   corruption.
//!
//! # Slot Layout
//!
//! ```text
//! ┌─────────┬─────────┬─────────┬─────────┬─────────┐
//! │ Some(a) │  None   │ Some(c) │  None   │ Some(e) │   slots
//! └─────────┴────┬────┴─────────┴────┬────┴─────────┘
//!                └──── free list ────┘
//! ```
//!
//! Handles are the slot index; `None` slots are linked through the free
//! list and reused in LIFO order.

use crate::error::{Error, Result};

/// A slab of records addressed by `u32` handles.
///
/// Insertion returns a handle; the handle stays valid until `remove`. Slots
/// are recycled, so a handle held across a remove may alias a new record.
/// Callers own the discipline of not holding handles past removal, which in
/// practice falls out of the reference-counting rules of the records
/// themselves.
#[derive(Debug)]
pub struct Table<T> {
    slots: Vec<Option<T>>,
    free: Vec<u32>,
    /// Name reported in `BadHandle` errors.
    kind: &'static str,
}

impl<T> Table<T> {
    /// Create an empty table.
    ///
    /// `kind` names the record type in stale-handle errors.
    pub fn new(kind: &'static str) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            kind,
        }
    }

    /// Insert a record, returning its handle.
    pub fn insert(&mut self, value: T) -> u32 {
        match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(value);
                index
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Some(value));
                index
            }
        }
    }

    /// Read a record by handle.
    pub fn get(&self, handle: u32) -> Result<&T> {
        self.slots
            .get(handle as usize)
            .and_then(|slot| slot.as_ref())
            .ok_or(Error::BadHandle(self.kind))
    }

    /// Get mutable access to a record by handle.
    pub fn get_mut(&mut self, handle: u32) -> Result<&mut T> {
        self.slots
            .get_mut(handle as usize)
            .and_then(|slot| slot.as_mut())
            .ok_or(Error::BadHandle(self.kind))
    }

    /// Remove a record, returning it and recycling the slot.
    pub fn remove(&mut self, handle: u32) -> Result<T> {
        let value = self
            .slots
            .get_mut(handle as usize)
            .and_then(|slot| slot.take())
            .ok_or(Error::BadHandle(self.kind))?;
        self.free.push(handle);
        Ok(value)
    }

    /// Number of live records.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// True if no records are live.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Copy> Table<T> {
    /// Read a record out by value.
    ///
    /// This is the workhorse accessor: operations copy the record out,
    /// update the copy, and `put` it back, so no borrow of the table is
    /// held across sibling lookups.
    #[inline]
    pub fn read(&self, handle: u32) -> Result<T> {
        self.get(handle).copied()
    }

    /// Write a record back by value.
    #[inline]
    pub fn put(&mut self, handle: u32, value: T) -> Result<()> {
        *self.get_mut(handle)? = value;
        Ok(())
    }
}

/// Variable-length byte objects addressed by `u32` handles.
///
/// The heap backs short in-memory extents, encapsulation headers and
/// trailers, and the byte objects behind heap-object descriptors. It is a
/// thin wrapper over a `Table<Vec<u8>>` with range-checked read and write.
#[derive(Debug)]
pub struct Heap {
    objects: Table<Vec<u8>>,
    /// Total bytes across all live objects.
    occupied: u64,
}

impl Heap {
    /// Create an empty heap.
    pub fn new() -> Self {
        Self {
            objects: Table::new("heap object"),
            occupied: 0,
        }
    }

    /// Allocate a zero-filled object of `length` bytes.
    pub fn alloc(&mut self, length: usize) -> u32 {
        self.occupied += length as u64;
        self.objects.insert(vec![0u8; length])
    }

    /// Store a copy of `data` as a new object.
    pub fn store(&mut self, data: &[u8]) -> u32 {
        self.occupied += data.len() as u64;
        self.objects.insert(data.to_vec())
    }

    /// Length of an object in bytes.
    pub fn length(&self, handle: u32) -> Result<u64> {
        Ok(self.objects.get(handle)?.len() as u64)
    }

    /// Copy `dest.len()` bytes starting at `offset` into `dest`.
    pub fn read_at(&self, handle: u32, offset: u64, dest: &mut [u8]) -> Result<()> {
        let object = self.objects.get(handle)?;
        let start = offset as usize;
        let end = start
            .checked_add(dest.len())
            .filter(|&end| end <= object.len())
            .ok_or_else(|| {
                Error::OutOfBounds(format!(
                    "read of {} bytes at offset {} exceeds object of {} bytes",
                    dest.len(),
                    offset,
                    object.len()
                ))
            })?;
        dest.copy_from_slice(&object[start..end]);
        Ok(())
    }

    /// Overwrite bytes starting at `offset` with `src`.
    pub fn write_at(&mut self, handle: u32, offset: u64, src: &[u8]) -> Result<()> {
        let object = self.objects.get_mut(handle)?;
        let start = offset as usize;
        let end = start
            .checked_add(src.len())
            .filter(|&end| end <= object.len())
            .ok_or_else(|| {
                Error::OutOfBounds(format!(
                    "write of {} bytes at offset {} exceeds object of {} bytes",
                    src.len(),
                    offset,
                    object.len()
                ))
            })?;
        object[start..end].copy_from_slice(src);
        Ok(())
    }

    /// Release an object.
    pub fn free(&mut self, handle: u32) -> Result<()> {
        let object = self.objects.remove(handle)?;
        self.occupied -= object.len() as u64;
        Ok(())
    }

    /// Total bytes across all live objects.
    #[inline]
    pub fn occupied(&self) -> u64 {
        self.occupied
    }

    /// Number of live objects.
    #[inline]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_insert_get() {
        let mut table: Table<u64> = Table::new("test");
        let a = table.insert(10);
        let b = table.insert(20);
        assert_eq!(*table.get(a).unwrap(), 10);
        assert_eq!(*table.get(b).unwrap(), 20);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_table_remove_and_recycle() {
        let mut table: Table<u64> = Table::new("test");
        let a = table.insert(10);
        let _b = table.insert(20);
        assert_eq!(table.remove(a).unwrap(), 10);
        assert_eq!(table.len(), 1);

        // Freed slot is recycled for the next insert.
        let c = table.insert(30);
        assert_eq!(c, a);
        assert_eq!(*table.get(c).unwrap(), 30);
    }

    #[test]
    fn test_table_stale_handle() {
        let mut table: Table<u64> = Table::new("test");
        let a = table.insert(10);
        table.remove(a).unwrap();
        assert!(table.get(a).is_err());
        assert!(table.remove(a).is_err());
    }

    #[test]
    fn test_table_unknown_handle() {
        let table: Table<u64> = Table::new("test");
        assert!(table.get(7).is_err());
    }

    #[test]
    fn test_table_read_put_round_trip() {
        let mut table: Table<(u32, u32)> = Table::new("test");
        let h = table.insert((1, 2));
        let mut record = table.read(h).unwrap();
        record.1 = 99;
        table.put(h, record).unwrap();
        assert_eq!(table.read(h).unwrap(), (1, 99));
    }

    #[test]
    fn test_heap_store_and_read() {
        let mut heap = Heap::new();
        let h = heap.store(b"hello world");
        assert_eq!(heap.length(h).unwrap(), 11);

        let mut buf = [0u8; 5];
        heap.read_at(h, 6, &mut buf).unwrap();
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn test_heap_write_at() {
        let mut heap = Heap::new();
        let h = heap.alloc(8);
        heap.write_at(h, 2, b"abcd").unwrap();

        let mut buf = [0u8; 8];
        heap.read_at(h, 0, &mut buf).unwrap();
        assert_eq!(&buf, b"\0\0abcd\0\0");
    }

    #[test]
    fn test_heap_bounds_checked() {
        let mut heap = Heap::new();
        let h = heap.store(b"short");

        let mut buf = [0u8; 6];
        assert!(heap.read_at(h, 0, &mut buf).is_err());
        assert!(heap.read_at(h, 3, &mut buf[..3]).is_err());
        assert!(heap.write_at(h, 4, b"xx").is_err());
    }

    #[test]
    fn test_heap_occupancy_tracking() {
        let mut heap = Heap::new();
        assert_eq!(heap.occupied(), 0);

        let a = heap.store(b"12345");
        let b = heap.alloc(100);
        assert_eq!(heap.occupied(), 105);
        assert_eq!(heap.object_count(), 2);

        heap.free(a).unwrap();
        assert_eq!(heap.occupied(), 100);
        heap.free(b).unwrap();
        assert_eq!(heap.occupied(), 0);
        assert_eq!(heap.object_count(), 0);
    }

    #[test]
    fn test_heap_free_stale() {
        let mut heap = Heap::new();
        let h = heap.store(b"x");
        heap.free(h).unwrap();
        assert!(heap.free(h).is_err());
        assert!(heap.length(h).is_err());
    }
}
