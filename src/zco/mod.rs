//! Zero-copy layered objects.
//!
//! A `Zco` is a protocol data unit assembled from pieces that are never
//! copied into it: extents referencing regions of files or heap byte
//! objects, plus encapsulation headers and trailers attached by protocol
//! layers as the object moves down (and stripped as it moves up) a stack.
//!
//! # Object Layout
//!
//! ```text
//!  headers (capsules)        source extents              trailers (capsules)
//! ┌────────┬────────┐  ┌─────────┬─────────┬────────┐  ┌────────┐
//! │  LTP   │   BP   │→ │ file    │ heap    │ file   │→ │  CRC   │
//! │ header │ header │  │ region  │ object  │ region │  │        │
//! └────────┴────────┘  └─────────┴─────────┴────────┘  └────────┘
//!  ← prepend order      → append order                  → append order
//! ```
//!
//! Five lengths describe the aggregate. `headers_length`, `source_length`
//! and `trailers_length` partition the raw bytes of the extent chain (a
//! receiving layer uses `delimit_source` to mark where its own header and
//! trailer bytes sit inside extents it received as opaque data).
//! `aggregate_capsule_length` counts the explicitly attached capsules, and
//! `total_length` is always the sum of all four.
//!
//! Extents share their backing data through reference-counted descriptors
//! (see [`source`]), so clones cost bookkeeping, not copies. Every byte of
//! extent data is charged to the depot's occupancy ledger when the extent
//! is attached and released when it is destroyed.

pub mod reader;
pub mod source;

use crate::depot::{Core, Txn};
use crate::error::{Error, Result};
use crate::ledger::{Account, Medium};
use crate::observability;
use source::{Cleanup, FileRef, ObjRef};
use std::path::PathBuf;

/// Handle of a layered object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ZcoHandle(pub(crate) u32);

/// Handle of a file source descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FileRefHandle(pub(crate) u32);

/// Handle of a heap-object source descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjRefHandle(pub(crate) u32);

/// Handle of a raw byte object in the depot heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjectHandle(pub(crate) u32);

/// Whether an operation must clear its length with the occupancy ledger.
///
/// Callers that went through blocking admission already hold an award for
/// the space and pass `AlreadyReserved`; the data is charged to the books
/// either way, but no availability check is repeated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Charge {
    /// Check availability before admitting; refuse if the book is full.
    NeedsReservation,
    /// Space was already awarded through the admission queue.
    AlreadyReserved,
}

/// A source data region to attach to an object.
#[derive(Clone, Copy, Debug)]
pub struct ExtentSpec {
    /// Where the bytes live.
    pub source: ExtentSource,
    /// Byte offset of the region within the source.
    pub offset: u64,
    /// Length of the region in bytes.
    pub length: u64,
}

/// The backing of a new extent.
#[derive(Clone, Copy, Debug)]
pub enum ExtentSource {
    /// A file source descriptor.
    File(FileRefHandle),
    /// A heap-object source descriptor.
    Obj(ObjRefHandle),
    /// A bare heap byte object; a single-use descriptor is created for it
    /// and the object is freed when the last extent referencing it dies.
    Heap(ObjectHandle),
}

impl ExtentSource {
    /// The occupancy medium this source's bytes are charged to.
    #[inline]
    pub fn medium(&self) -> Medium {
        match self {
            ExtentSource::File(_) => Medium::File,
            ExtentSource::Obj(_) | ExtentSource::Heap(_) => Medium::Heap,
        }
    }
}

/// Internal extent backing after descriptor resolution.
#[derive(Clone, Copy, Debug)]
pub(crate) enum SourceRef {
    File(u32),
    Obj(u32),
}

impl SourceRef {
    #[inline]
    pub(crate) fn medium(&self) -> Medium {
        match self {
            SourceRef::File(_) => Medium::File,
            SourceRef::Obj(_) => Medium::Heap,
        }
    }
}

/// One region of source data, a link in the object's extent chain.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Extent {
    pub(crate) source: SourceRef,
    pub(crate) offset: u64,
    pub(crate) length: u64,
    pub(crate) next: Option<u32>,
}

/// One explicitly attached header or trailer.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Capsule {
    /// Heap object holding the capsule text.
    pub(crate) text: u32,
    pub(crate) length: u64,
    pub(crate) prev: Option<u32>,
    pub(crate) next: Option<u32>,
}

/// The layered-object record.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ZcoRecord {
    pub(crate) acct: Account,
    pub(crate) refs: u32,
    pub(crate) first_header: Option<u32>,
    pub(crate) last_header: Option<u32>,
    pub(crate) first_extent: Option<u32>,
    pub(crate) last_extent: Option<u32>,
    pub(crate) first_trailer: Option<u32>,
    pub(crate) last_trailer: Option<u32>,
    /// Leading extent-chain bytes identified as header text.
    pub(crate) headers_length: u64,
    /// Extent-chain bytes identified as source data.
    pub(crate) source_length: u64,
    /// Trailing extent-chain bytes identified as trailer text.
    pub(crate) trailers_length: u64,
    /// Bytes in explicitly attached capsules.
    pub(crate) aggregate_capsule_length: u64,
    /// Sum of the other four lengths, maintained by every mutation.
    pub(crate) total_length: u64,
}

impl ZcoRecord {
    fn new(acct: Account) -> Self {
        Self {
            acct,
            refs: 1,
            first_header: None,
            last_header: None,
            first_extent: None,
            last_extent: None,
            first_trailer: None,
            last_trailer: None,
            headers_length: 0,
            source_length: 0,
            trailers_length: 0,
            aggregate_capsule_length: 0,
            total_length: 0,
        }
    }
}

impl Txn<'_> {
    /// Store a copy of `data` as a heap byte object.
    pub fn insert_bytes(&mut self, data: &[u8]) -> ObjectHandle {
        ObjectHandle(self.heap.store(data))
    }

    /// Create a file source descriptor for an existing file.
    pub fn create_file_ref(
        &mut self,
        path: impl Into<PathBuf>,
        cleanup: Cleanup,
    ) -> Result<FileRefHandle> {
        let file_ref = FileRef::new(path, cleanup)?;
        Ok(FileRefHandle(self.file_refs.insert(file_ref)))
    }

    /// Re-point a file descriptor at a new path, refreshing its change
    /// token and recorded length.
    pub fn revise_file_ref(
        &mut self,
        handle: FileRefHandle,
        path: impl Into<PathBuf>,
        cleanup: Cleanup,
    ) -> Result<()> {
        self.file_refs.get_mut(handle.0)?.revise(path, cleanup)
    }

    /// Release a file descriptor, or flag it for release once the last
    /// extent referencing it is destroyed. The cleanup action runs at
    /// actual release.
    pub fn destroy_file_ref(&mut self, handle: FileRefHandle) -> Result<()> {
        let file_ref = self.file_refs.get_mut(handle.0)?;
        if file_ref.refs > 0 {
            file_ref.destroy_pending = true;
            return Ok(());
        }
        let file_ref = self.file_refs.remove(handle.0)?;
        file_ref.run_cleanup();
        Ok(())
    }

    /// The path a file descriptor names.
    pub fn file_ref_path(&self, handle: FileRefHandle) -> Result<PathBuf> {
        Ok(self.file_refs.get(handle.0)?.path().to_path_buf())
    }

    /// True if a tracking reader has transmitted the descriptor's final
    /// file octet.
    pub fn file_ref_xmit_eof(&self, handle: FileRefHandle) -> Result<bool> {
        Ok(self.file_refs.get(handle.0)?.xmit_eof())
    }

    /// Create a shareable descriptor over an existing heap byte object.
    pub fn create_obj_ref(&mut self, object: ObjectHandle) -> Result<ObjRefHandle> {
        let length = self.heap.length(object.0)?;
        Ok(ObjRefHandle(
            self.obj_refs.insert(ObjRef::new(object.0, length)),
        ))
    }

    /// Release a heap-object descriptor, or flag it for release once the
    /// last extent referencing it is destroyed. The backing byte object is
    /// freed at actual release.
    pub fn destroy_obj_ref(&mut self, handle: ObjRefHandle) -> Result<()> {
        let obj_ref = self.obj_refs.get_mut(handle.0)?;
        if obj_ref.refs > 0 {
            obj_ref.destroy_pending = true;
            return Ok(());
        }
        let obj_ref = self.obj_refs.remove(handle.0)?;
        self.heap.free(obj_ref.object)?;
        Ok(())
    }

    /// Create a layered object, optionally with an initial source extent.
    ///
    /// Returns `Ok(None)` when `charge` is `NeedsReservation` and the
    /// account's book cannot admit the extent.
    pub fn create(
        &mut self,
        acct: Account,
        source: Option<ExtentSpec>,
        charge: Charge,
    ) -> Result<Option<ZcoHandle>> {
        let handle = ZcoHandle(self.zcos.insert(ZcoRecord::new(acct)));
        if let Some(spec) = source {
            if self.append_extent(handle, spec, charge)?.is_none() {
                self.zcos.remove(handle.0)?;
                return Ok(None);
            }
        }
        observability::zco_created(acct);
        Ok(Some(handle))
    }

    /// Append a source extent to an object.
    ///
    /// Returns the admitted length, or `Ok(None)` when `charge` is
    /// `NeedsReservation` and the account's book cannot admit it.
    pub fn append_extent(
        &mut self,
        zco: ZcoHandle,
        spec: ExtentSpec,
        charge: Charge,
    ) -> Result<Option<u64>> {
        if spec.length == 0 {
            return Err(Error::InvalidArgument(
                "extent length must be positive".into(),
            ));
        }
        let record = self.zcos.read(zco.0)?;
        let medium = spec.source.medium();
        if charge == Charge::NeedsReservation
            && !self.ledger.enough_space(record.acct, medium, spec.length)
        {
            tracing::warn!(
                account = record.acct.label(),
                medium = medium.label(),
                length = spec.length,
                "extent refused for lack of reserved space"
            );
            observability::admission_refused(record.acct);
            return Ok(None);
        }
        let source = self.resolve_source(&spec)?;
        self.attach_extent(zco.0, source, spec.offset, spec.length)?;
        Ok(Some(spec.length))
    }

    /// Attach an encapsulation header in front of all current headers.
    pub fn prepend_header(&mut self, zco: ZcoHandle, text: &[u8]) -> Result<()> {
        if text.is_empty() {
            return Err(Error::InvalidArgument("header must not be empty".into()));
        }
        let mut record = self.zcos.read(zco.0)?;
        let length = text.len() as u64;
        let object = self.heap.store(text);
        let capsule = self.capsules.insert(Capsule {
            text: object,
            length,
            prev: None,
            next: record.first_header,
        });
        if let Some(old_first) = record.first_header {
            let mut old = self.capsules.read(old_first)?;
            old.prev = Some(capsule);
            self.capsules.put(old_first, old)?;
        }
        record.first_header = Some(capsule);
        if record.last_header.is_none() {
            record.last_header = Some(capsule);
        }
        record.aggregate_capsule_length += length;
        record.total_length += length;
        self.ledger.charge(record.acct, Medium::Heap, length);
        self.zcos.put(zco.0, record)
    }

    /// Detach and discard the outermost header.
    pub fn discard_first_header(&mut self, zco: ZcoHandle) -> Result<()> {
        let mut record = self.zcos.read(zco.0)?;
        let first = record.first_header.ok_or_else(|| {
            Error::InvalidArgument("object has no headers to discard".into())
        })?;
        let capsule = self.capsules.remove(first)?;
        self.heap.free(capsule.text)?;
        record.first_header = capsule.next;
        match capsule.next {
            Some(next) => {
                let mut n = self.capsules.read(next)?;
                n.prev = None;
                self.capsules.put(next, n)?;
            }
            None => record.last_header = None,
        }
        record.aggregate_capsule_length -= capsule.length;
        record.total_length -= capsule.length;
        self.ledger.release(record.acct, Medium::Heap, capsule.length)?;
        self.zcos.put(zco.0, record)
    }

    /// Attach an encapsulation trailer after all current trailers.
    pub fn append_trailer(&mut self, zco: ZcoHandle, text: &[u8]) -> Result<()> {
        if text.is_empty() {
            return Err(Error::InvalidArgument("trailer must not be empty".into()));
        }
        let mut record = self.zcos.read(zco.0)?;
        let length = text.len() as u64;
        let object = self.heap.store(text);
        let capsule = self.capsules.insert(Capsule {
            text: object,
            length,
            prev: record.last_trailer,
            next: None,
        });
        if let Some(old_last) = record.last_trailer {
            let mut old = self.capsules.read(old_last)?;
            old.next = Some(capsule);
            self.capsules.put(old_last, old)?;
        }
        record.last_trailer = Some(capsule);
        if record.first_trailer.is_none() {
            record.first_trailer = Some(capsule);
        }
        record.aggregate_capsule_length += length;
        record.total_length += length;
        self.ledger.charge(record.acct, Medium::Heap, length);
        self.zcos.put(zco.0, record)
    }

    /// Detach and discard the innermost trailer.
    pub fn discard_last_trailer(&mut self, zco: ZcoHandle) -> Result<()> {
        let mut record = self.zcos.read(zco.0)?;
        let last = record.last_trailer.ok_or_else(|| {
            Error::InvalidArgument("object has no trailers to discard".into())
        })?;
        let capsule = self.capsules.remove(last)?;
        self.heap.free(capsule.text)?;
        record.last_trailer = capsule.prev;
        match capsule.prev {
            Some(prev) => {
                let mut p = self.capsules.read(prev)?;
                p.next = None;
                self.capsules.put(prev, p)?;
            }
            None => record.first_trailer = None,
        }
        record.aggregate_capsule_length -= capsule.length;
        record.total_length -= capsule.length;
        self.ledger.release(record.acct, Medium::Heap, capsule.length)?;
        self.zcos.put(zco.0, record)
    }

    /// Copy out the text of the Nth attached header (0 = outermost).
    pub fn header_text(&self, zco: ZcoHandle, skip: usize) -> Result<Vec<u8>> {
        let record = self.zcos.read(zco.0)?;
        let mut cursor = record.first_header;
        for _ in 0..skip {
            cursor = self
                .capsules
                .read(cursor.ok_or_else(|| {
                    Error::OutOfBounds("fewer headers than requested".into())
                })?)?
                .next;
        }
        let capsule = self.capsules.read(cursor.ok_or_else(|| {
            Error::OutOfBounds("fewer headers than requested".into())
        })?)?;
        let mut text = vec![0u8; capsule.length as usize];
        self.heap.read_at(capsule.text, 0, &mut text)?;
        Ok(text)
    }

    /// Copy out the text of the Nth attached trailer (0 = innermost).
    pub fn trailer_text(&self, zco: ZcoHandle, skip: usize) -> Result<Vec<u8>> {
        let record = self.zcos.read(zco.0)?;
        let mut cursor = record.first_trailer;
        for _ in 0..skip {
            cursor = self
                .capsules
                .read(cursor.ok_or_else(|| {
                    Error::OutOfBounds("fewer trailers than requested".into())
                })?)?
                .next;
        }
        let capsule = self.capsules.read(cursor.ok_or_else(|| {
            Error::OutOfBounds("fewer trailers than requested".into())
        })?)?;
        let mut text = vec![0u8; capsule.length as usize];
        self.heap.read_at(capsule.text, 0, &mut text)?;
        Ok(text)
    }

    /// Convert all attached capsules into source extents.
    ///
    /// Headers become extents at the front of the chain, trailers at the
    /// back, and their lengths fold into the source length. After bonding
    /// the object has no capsules, which makes its entire content
    /// cloneable.
    pub fn bond(&mut self, zco: ZcoHandle) -> Result<()> {
        let mut record = self.zcos.read(zco.0)?;

        // Headers, innermost first, so prepending preserves order.
        while let Some(capsule_id) = record.last_header {
            let capsule = self.capsules.remove(capsule_id)?;
            record.last_header = capsule.prev;
            let obj_ref = self.obj_refs.insert(ObjRef {
                object: capsule.text,
                length: capsule.length,
                refs: 1,
                destroy_pending: true,
            });
            let extent = self.extents.insert(Extent {
                source: SourceRef::Obj(obj_ref),
                offset: 0,
                length: capsule.length,
                next: record.first_extent,
            });
            record.first_extent = Some(extent);
            if record.last_extent.is_none() {
                record.last_extent = Some(extent);
            }
        }
        record.first_header = None;

        while let Some(capsule_id) = record.first_trailer {
            let capsule = self.capsules.remove(capsule_id)?;
            record.first_trailer = capsule.next;
            let obj_ref = self.obj_refs.insert(ObjRef {
                object: capsule.text,
                length: capsule.length,
                refs: 1,
                destroy_pending: true,
            });
            let extent = self.extents.insert(Extent {
                source: SourceRef::Obj(obj_ref),
                offset: 0,
                length: capsule.length,
                next: None,
            });
            if let Some(last) = record.last_extent {
                let mut l = self.extents.read(last)?;
                l.next = Some(extent);
                self.extents.put(last, l)?;
            }
            record.last_extent = Some(extent);
            if record.first_extent.is_none() {
                record.first_extent = Some(extent);
            }
        }
        record.last_trailer = None;

        // The capsule bytes stay charged to the heap book; they are now
        // accounted as extent data instead of capsule data.
        record.source_length += record.aggregate_capsule_length;
        record.aggregate_capsule_length = 0;
        self.zcos.put(zco.0, record)
    }

    /// Create a new object sharing `length` bytes of this object's extent
    /// chain starting at `offset`. The object must have no capsules in the
    /// range (bond first). The shared bytes are charged to the clone's
    /// account.
    pub fn clone_zco(&mut self, zco: ZcoHandle, offset: u64, length: u64) -> Result<ZcoHandle> {
        let record = self.zcos.read(zco.0)?;
        let cloneable = record.total_length - record.aggregate_capsule_length;
        if offset.checked_add(length).map_or(true, |end| end > cloneable) {
            return Err(Error::OutOfBounds(format!(
                "clone of {length} bytes at offset {offset} exceeds {cloneable} cloneable bytes"
            )));
        }
        let handle = ZcoHandle(self.zcos.insert(ZcoRecord::new(record.acct)));
        self.share_extents(record, handle.0, offset, length)?;
        observability::zco_created(record.acct);
        Ok(handle)
    }

    /// Append `length` bytes of `from`'s extent chain, starting at
    /// `offset`, to the object `to` as shared extents.
    pub fn clone_source_data(
        &mut self,
        to: ZcoHandle,
        from: ZcoHandle,
        offset: u64,
        length: u64,
    ) -> Result<()> {
        let from_record = self.zcos.read(from.0)?;
        let to_record = self.zcos.read(to.0)?;
        if from_record.acct != to_record.acct {
            return Err(Error::InvalidArgument(
                "cannot share source data across accounts".into(),
            ));
        }
        let cloneable = from_record.total_length - from_record.aggregate_capsule_length;
        if offset.checked_add(length).map_or(true, |end| end > cloneable) {
            return Err(Error::OutOfBounds(format!(
                "clone of {length} bytes at offset {offset} exceeds {cloneable} cloneable bytes"
            )));
        }
        self.share_extents(from_record, to.0, offset, length)
    }

    /// Add a co-owner to an object. Each reference needs its own
    /// balancing `destroy`.
    pub fn add_reference(&mut self, zco: ZcoHandle) -> Result<()> {
        let mut record = self.zcos.read(zco.0)?;
        record.refs += 1;
        self.zcos.put(zco.0, record)
    }

    /// Drop one reference to an object, destroying it when the last
    /// reference goes. Destruction releases all occupancy the object held
    /// and immediately re-services the admission queue of its account.
    pub fn destroy(&mut self, zco: ZcoHandle) -> Result<()> {
        let mut record = self.zcos.read(zco.0)?;
        if record.refs > 1 {
            record.refs -= 1;
            return self.zcos.put(zco.0, record);
        }
        let acct = self.destroy_zco(zco.0)?;
        observability::zco_destroyed(acct);
        self.service_account(acct);
        Ok(())
    }

    /// Mark where source data sits inside the extent chain: the first
    /// `offset` raw bytes are header text, the next `length` are source,
    /// and the rest are trailer text.
    pub fn delimit_source(&mut self, zco: ZcoHandle, offset: u64, length: u64) -> Result<()> {
        let mut record = self.zcos.read(zco.0)?;
        let raw = record.total_length - record.aggregate_capsule_length;
        if offset.checked_add(length).map_or(true, |end| end > raw) {
            return Err(Error::OutOfBounds(format!(
                "source of {length} bytes at offset {offset} extends beyond {raw} raw bytes"
            )));
        }
        record.headers_length = offset;
        record.source_length = length;
        record.trailers_length = raw - (offset + length);
        self.zcos.put(zco.0, record)
    }

    /// Discard all extent-chain bytes delimited as header or trailer
    /// text, truncating or deleting extents and releasing their
    /// occupancy. Idempotent: with nothing delimited it does nothing.
    pub fn strip(&mut self, zco: ZcoHandle) -> Result<()> {
        let mut record = self.zcos.read(zco.0)?;
        let acct = record.acct;
        let mut source_to_save = record.source_length;
        let mut prev: Option<u32> = None;
        let mut cursor = record.first_extent;
        while let Some(extent_id) = cursor {
            let mut extent = self.extents.read(extent_id)?;
            let next = extent.next;

            // Leading bytes still delimited as header text.
            let header_len = extent.length.min(record.headers_length);
            if header_len > 0 {
                record.headers_length -= header_len;
                record.total_length -= header_len;
                extent.offset += header_len;
                extent.length -= header_len;
                self.ledger.release(acct, extent.source.medium(), header_len)?;
            }

            // Whatever remains past the source data must be trailer text.
            if extent.length <= source_to_save {
                source_to_save -= extent.length;
            } else {
                let trailer_len = extent.length - source_to_save;
                source_to_save = 0;
                record.trailers_length -= trailer_len;
                record.total_length -= trailer_len;
                extent.length -= trailer_len;
                self.ledger.release(acct, extent.source.medium(), trailer_len)?;
            }

            if extent.length == 0 {
                self.unref_source(extent.source)?;
                self.extents.remove(extent_id)?;
                match prev {
                    Some(prev_id) => {
                        let mut p = self.extents.read(prev_id)?;
                        p.next = next;
                        self.extents.put(prev_id, p)?;
                    }
                    None => record.first_extent = next,
                }
                if record.last_extent == Some(extent_id) {
                    record.last_extent = prev;
                }
            } else {
                self.extents.put(extent_id, extent)?;
                prev = Some(extent_id);
            }
            cursor = next;
        }
        self.zcos.put(zco.0, record)
    }

    /// Overwrite `data.len()` bytes of the object's concatenated content
    /// starting at `offset`, in place, across capsules and extents.
    ///
    /// File-backed bytes are revised through the filesystem. A file write
    /// failure does not stop the walk; the first failure is reported after
    /// all revisable bytes have been written.
    pub fn revise(&mut self, zco: ZcoHandle, offset: u64, data: &[u8]) -> Result<()> {
        let record = self.zcos.read(zco.0)?;
        if offset
            .checked_add(data.len() as u64)
            .map_or(true, |end| end > record.total_length)
        {
            return Err(Error::OutOfBounds(format!(
                "revision of {} bytes at offset {offset} exceeds object of {} bytes",
                data.len(),
                record.total_length
            )));
        }
        let mut to_skip = offset;
        let mut remaining: &[u8] = data;
        let mut first_failure: Option<Error> = None;

        // Headers, then extents, then trailers: the transmission order.
        let mut cursor = record.first_header;
        while let Some(capsule_id) = cursor {
            if remaining.is_empty() {
                break;
            }
            let capsule = self.capsules.read(capsule_id)?;
            cursor = capsule.next;
            if to_skip >= capsule.length {
                to_skip -= capsule.length;
                continue;
            }
            let take = ((capsule.length - to_skip) as usize).min(remaining.len());
            self.heap.write_at(capsule.text, to_skip, &remaining[..take])?;
            remaining = &remaining[take..];
            to_skip = 0;
        }

        let mut cursor = record.first_extent;
        while let Some(extent_id) = cursor {
            if remaining.is_empty() {
                break;
            }
            let extent = self.extents.read(extent_id)?;
            cursor = extent.next;
            if to_skip >= extent.length {
                to_skip -= extent.length;
                continue;
            }
            let take = ((extent.length - to_skip) as usize).min(remaining.len());
            match extent.source {
                SourceRef::Obj(obj_ref) => {
                    let object = self.obj_refs.get(obj_ref)?.object;
                    self.heap
                        .write_at(object, extent.offset + to_skip, &remaining[..take])?;
                }
                SourceRef::File(file_ref) => {
                    let result = self
                        .file_refs
                        .get(file_ref)?
                        .write_at(extent.offset + to_skip, &remaining[..take]);
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "file-backed revision failed");
                        first_failure.get_or_insert(e);
                    }
                }
            }
            remaining = &remaining[take..];
            to_skip = 0;
        }

        let mut cursor = record.first_trailer;
        while let Some(capsule_id) = cursor {
            if remaining.is_empty() {
                break;
            }
            let capsule = self.capsules.read(capsule_id)?;
            cursor = capsule.next;
            if to_skip >= capsule.length {
                to_skip -= capsule.length;
                continue;
            }
            let take = ((capsule.length - to_skip) as usize).min(remaining.len());
            self.heap.write_at(capsule.text, to_skip, &remaining[..take])?;
            remaining = &remaining[take..];
            to_skip = 0;
        }

        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Total concatenated length of an object.
    pub fn total_length(&self, zco: ZcoHandle) -> Result<u64> {
        Ok(self.zcos.read(zco.0)?.total_length)
    }

    /// Extent-chain bytes currently delimited as source data.
    pub fn source_length(&self, zco: ZcoHandle) -> Result<u64> {
        Ok(self.zcos.read(zco.0)?.source_length)
    }

    /// Extent-chain bytes currently delimited as header text.
    pub fn headers_length(&self, zco: ZcoHandle) -> Result<u64> {
        Ok(self.zcos.read(zco.0)?.headers_length)
    }

    /// Extent-chain bytes currently delimited as trailer text.
    pub fn trailers_length(&self, zco: ZcoHandle) -> Result<u64> {
        Ok(self.zcos.read(zco.0)?.trailers_length)
    }

    /// Bytes held in explicitly attached capsules.
    pub fn aggregate_capsule_length(&self, zco: ZcoHandle) -> Result<u64> {
        Ok(self.zcos.read(zco.0)?.aggregate_capsule_length)
    }

    /// The account the object's data is charged to.
    pub fn account(&self, zco: ZcoHandle) -> Result<Account> {
        Ok(self.zcos.read(zco.0)?.acct)
    }

    /// Number of co-owners currently holding the object.
    pub fn reference_count(&self, zco: ZcoHandle) -> Result<u32> {
        Ok(self.zcos.read(zco.0)?.refs)
    }
}

impl Core {
    /// Resolve an extent spec into a descriptor reference, bumping the
    /// descriptor's count.
    fn resolve_source(&mut self, spec: &ExtentSpec) -> Result<SourceRef> {
        let source = match spec.source {
            ExtentSource::File(handle) => {
                self.file_refs.get(handle.0)?;
                SourceRef::File(handle.0)
            }
            ExtentSource::Obj(handle) => {
                let obj_ref = self.obj_refs.get(handle.0)?;
                if spec
                    .offset
                    .checked_add(spec.length)
                    .map_or(true, |end| end > obj_ref.length)
                {
                    return Err(Error::OutOfBounds(format!(
                        "extent of {} bytes at offset {} exceeds object of {} bytes",
                        spec.length, spec.offset, obj_ref.length
                    )));
                }
                SourceRef::Obj(handle.0)
            }
            ExtentSource::Heap(object) => {
                let length = self.heap.length(object.0)?;
                if spec
                    .offset
                    .checked_add(spec.length)
                    .map_or(true, |end| end > length)
                {
                    return Err(Error::OutOfBounds(format!(
                        "extent of {} bytes at offset {} exceeds object of {length} bytes",
                        spec.length, spec.offset
                    )));
                }
                let mut obj_ref = ObjRef::new(object.0, length);
                obj_ref.destroy_pending = true;
                SourceRef::Obj(self.obj_refs.insert(obj_ref))
            }
        };
        self.ref_source(source)?;
        Ok(source)
    }

    fn ref_source(&mut self, source: SourceRef) -> Result<()> {
        match source {
            SourceRef::File(id) => self.file_refs.get_mut(id)?.refs += 1,
            SourceRef::Obj(id) => self.obj_refs.get_mut(id)?.refs += 1,
        }
        Ok(())
    }

    /// Drop one extent's hold on a descriptor, releasing the descriptor's
    /// backing resource when the count reaches zero with destruction
    /// pending.
    fn unref_source(&mut self, source: SourceRef) -> Result<()> {
        match source {
            SourceRef::File(id) => {
                let file_ref = self.file_refs.get_mut(id)?;
                file_ref.refs -= 1;
                if file_ref.refs == 0 && file_ref.destroy_pending {
                    let file_ref = self.file_refs.remove(id)?;
                    file_ref.run_cleanup();
                }
            }
            SourceRef::Obj(id) => {
                let obj_ref = self.obj_refs.get_mut(id)?;
                obj_ref.refs -= 1;
                if obj_ref.refs == 0 && obj_ref.destroy_pending {
                    let obj_ref = self.obj_refs.remove(id)?;
                    self.heap.free(obj_ref.object)?;
                }
            }
        }
        Ok(())
    }

    /// Link a resolved extent at the tail of an object's chain, updating
    /// lengths and charging the occupancy books.
    fn attach_extent(
        &mut self,
        zco: u32,
        source: SourceRef,
        offset: u64,
        length: u64,
    ) -> Result<()> {
        let mut record = self.zcos.read(zco)?;
        let extent = self.extents.insert(Extent {
            source,
            offset,
            length,
            next: None,
        });
        match record.last_extent {
            Some(last) => {
                let mut l = self.extents.read(last)?;
                l.next = Some(extent);
                self.extents.put(last, l)?;
            }
            None => record.first_extent = Some(extent),
        }
        record.last_extent = Some(extent);
        record.source_length += length;
        record.total_length += length;
        self.ledger.charge(record.acct, source.medium(), length);
        observability::bytes_admitted(record.acct, source.medium(), length);
        self.zcos.put(zco, record)
    }

    /// Share the extents covering `[offset, offset + length)` of a source
    /// object's chain with the destination object.
    fn share_extents(
        &mut self,
        from: ZcoRecord,
        to: u32,
        offset: u64,
        length: u64,
    ) -> Result<()> {
        let mut to_skip = offset;
        let mut to_take = length;
        let mut cursor = from.first_extent;
        while let Some(extent_id) = cursor {
            if to_take == 0 {
                break;
            }
            let extent = self.extents.read(extent_id)?;
            cursor = extent.next;
            if to_skip >= extent.length {
                to_skip -= extent.length;
                continue;
            }
            let take = (extent.length - to_skip).min(to_take);
            self.ref_source(extent.source)?;
            self.attach_extent(to, extent.source, extent.offset + to_skip, take)?;
            to_take -= take;
            to_skip = 0;
        }
        Ok(())
    }

    /// Destroy an object outright: every capsule, extent, and descriptor
    /// hold, with all occupancy released. Returns the account that
    /// regained space.
    pub(crate) fn destroy_zco(&mut self, zco: u32) -> Result<Account> {
        let record = self.zcos.remove(zco)?;
        let acct = record.acct;

        let mut cursor = record.first_extent;
        while let Some(extent_id) = cursor {
            let extent = self.extents.remove(extent_id)?;
            cursor = extent.next;
            self.ledger.release(acct, extent.source.medium(), extent.length)?;
            self.unref_source(extent.source)?;
        }

        for list in [record.first_header, record.first_trailer] {
            let mut cursor = list;
            while let Some(capsule_id) = cursor {
                let capsule = self.capsules.remove(capsule_id)?;
                cursor = capsule.next;
                self.heap.free(capsule.text)?;
                self.ledger.release(acct, Medium::Heap, capsule.length)?;
            }
        }
        Ok(acct)
    }
}
