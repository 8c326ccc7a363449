//! Per-consumer read cursors over layered objects.
//!
//! A `ZcoReader` tracks how much of an object one consumer has copied out,
//! with independent cursors for the whole concatenation (transmission) and
//! for each delimited region (reception). Readers are cheap, never shared,
//! and never stored in the depot; many readers can walk the same object
//! concurrently because reading mutates only the reader, except for the
//! optional file transmit-progress tracking.
//!
//! Degraded file reads (see [`super::source`]) do not stop a reader: the
//! cursor advances over the unreadable bytes, the destination is filled
//! with blank bytes, and the call reports zero bytes transferred so the
//! consumer can tell the data is not real.

use super::{Capsule, SourceRef, ZcoHandle};
use crate::depot::{Core, Txn};
use crate::error::{Error, Result};

/// A read cursor over one layered object.
#[derive(Clone, Copy, Debug)]
pub struct ZcoReader {
    pub(crate) zco: ZcoHandle,
    /// Concatenation bytes consumed by `transmit`.
    pub(crate) length_copied: u64,
    /// Extent-chain bytes consumed as presumptive header text.
    pub(crate) headers_copied: u64,
    /// Delimited source bytes consumed.
    pub(crate) source_copied: u64,
    /// Delimited trailer bytes consumed.
    pub(crate) trailers_copied: u64,
    /// Update file descriptors' transmit progress as bytes are read.
    pub(crate) track_file_offset: bool,
}

impl ZcoReader {
    /// Start reading an object for transmission, at the first byte of the
    /// concatenation (outermost header first).
    pub fn start_transmitting(zco: ZcoHandle) -> Self {
        Self {
            zco,
            length_copied: 0,
            headers_copied: 0,
            source_copied: 0,
            trailers_copied: 0,
            track_file_offset: false,
        }
    }

    /// Start reading a received object for extraction, at the first byte
    /// of the extent chain.
    pub fn start_receiving(zco: ZcoHandle) -> Self {
        Self::start_transmitting(zco)
    }

    /// Record transmit progress on file descriptors as this reader copies
    /// file-backed bytes.
    pub fn track_file_offset(&mut self) {
        self.track_file_offset = true;
    }

    /// The object this reader walks.
    #[inline]
    pub fn zco(&self) -> ZcoHandle {
        self.zco
    }

    /// Move `length` bytes of this reader's consumed header tally back,
    /// so over-read bytes are delivered again (as source data, once the
    /// source has been delimited at the true header boundary).
    pub fn restore_source(&mut self, length: u64) -> Result<()> {
        if length > self.headers_copied {
            return Err(Error::InvalidArgument(format!(
                "cannot restore {length} bytes, only {} were consumed as headers",
                self.headers_copied
            )));
        }
        self.headers_copied -= length;
        Ok(())
    }
}

impl Txn<'_> {
    /// Copy the next `buf.len()` as-yet-uncopied bytes of the whole
    /// concatenation (headers, then extent chain, then trailers) into
    /// `buf`.
    ///
    /// Returns the number of bytes transmitted, which is less than
    /// `buf.len()` at end of object, and 0 when a file source had
    /// degraded (the cursor still advances and `buf` is still filled).
    pub fn transmit(&mut self, reader: &mut ZcoReader, buf: &mut [u8]) -> Result<u64> {
        let record = self.zcos.read(reader.zco.0)?;
        let mut to_skip = reader.length_copied;
        let mut copied = 0usize;
        let mut degraded = false;

        copied += self.copy_capsules(record.first_header, &mut to_skip, &mut buf[..])?;
        reader.length_copied += copied as u64;

        if copied < buf.len() {
            let track = reader.track_file_offset;
            let (n, ok) =
                self.copy_extents(record.first_extent, &mut to_skip, &mut buf[copied..], track)?;
            degraded |= !ok;
            copied += n;
            reader.length_copied += n as u64;
        }

        if copied < buf.len() {
            let n = self.copy_capsules(record.first_trailer, &mut to_skip, &mut buf[copied..])?;
            copied += n;
            reader.length_copied += n as u64;
        }

        Ok(if degraded { 0 } else { copied as u64 })
    }

    /// Advance a transmission reader by `length` bytes without copying.
    pub fn transmit_skip(&mut self, reader: &mut ZcoReader, length: u64) -> Result<u64> {
        let record = self.zcos.read(reader.zco.0)?;
        let remaining = record.total_length - reader.length_copied;
        let skipped = length.min(remaining);
        reader.length_copied += skipped;
        Ok(skipped)
    }

    /// Copy the next `buf.len()` as-yet-uncopied bytes of presumptive
    /// header text from the front of the extent chain.
    ///
    /// Returns bytes copied, 0 on a degraded file source.
    pub fn receive_headers(&mut self, reader: &mut ZcoReader, buf: &mut [u8]) -> Result<u64> {
        let record = self.zcos.read(reader.zco.0)?;
        let mut to_skip = reader.headers_copied;
        let track = reader.track_file_offset;
        let (copied, ok) = self.copy_extents(record.first_extent, &mut to_skip, buf, track)?;
        reader.headers_copied += copied as u64;
        Ok(if ok { copied as u64 } else { 0 })
    }

    /// Copy the next `buf.len()` as-yet-uncopied bytes of delimited
    /// source data.
    ///
    /// Returns bytes copied, 0 on a degraded file source.
    pub fn receive_source(&mut self, reader: &mut ZcoReader, buf: &mut [u8]) -> Result<u64> {
        let record = self.zcos.read(reader.zco.0)?;
        let mut to_skip = record.headers_length + reader.source_copied;
        let track = reader.track_file_offset;
        let (copied, ok) = self.copy_extents(record.first_extent, &mut to_skip, buf, track)?;
        reader.source_copied += copied as u64;
        Ok(if ok { copied as u64 } else { 0 })
    }

    /// Advance a reader's source cursor by `length` bytes without
    /// copying. Returns the number of bytes actually skipped.
    pub fn skip_source(&mut self, reader: &mut ZcoReader, length: u64) -> Result<u64> {
        let record = self.zcos.read(reader.zco.0)?;
        let raw = record.total_length - record.aggregate_capsule_length;
        let consumed = record.headers_length + reader.source_copied;
        let skipped = length.min(raw.saturating_sub(consumed));
        reader.source_copied += skipped;
        Ok(skipped)
    }

    /// Copy the next `buf.len()` as-yet-uncopied bytes of delimited
    /// trailer text.
    ///
    /// Returns bytes copied, 0 on a degraded file source.
    pub fn receive_trailers(&mut self, reader: &mut ZcoReader, buf: &mut [u8]) -> Result<u64> {
        let record = self.zcos.read(reader.zco.0)?;
        let mut to_skip =
            record.headers_length + record.source_length + reader.trailers_copied;
        let track = reader.track_file_offset;
        let (copied, ok) = self.copy_extents(record.first_extent, &mut to_skip, buf, track)?;
        reader.trailers_copied += copied as u64;
        Ok(if ok { copied as u64 } else { 0 })
    }
}

impl Core {
    /// Copy from a capsule list into `buf`, consuming `to_skip` first.
    /// Returns bytes copied.
    fn copy_capsules(
        &self,
        first: Option<u32>,
        to_skip: &mut u64,
        buf: &mut [u8],
    ) -> Result<usize> {
        let mut copied = 0usize;
        let mut cursor = first;
        while let Some(capsule_id) = cursor {
            if copied == buf.len() {
                break;
            }
            let capsule: Capsule = self.capsules.read(capsule_id)?;
            cursor = capsule.next;
            if *to_skip >= capsule.length {
                *to_skip -= capsule.length;
                continue;
            }
            let take = ((capsule.length - *to_skip) as usize).min(buf.len() - copied);
            self.heap
                .read_at(capsule.text, *to_skip, &mut buf[copied..copied + take])?;
            copied += take;
            *to_skip = 0;
        }
        Ok(copied)
    }

    /// Copy from the extent chain into `buf`, consuming `to_skip` first.
    /// Returns bytes covered and whether every file source was intact.
    fn copy_extents(
        &mut self,
        first: Option<u32>,
        to_skip: &mut u64,
        buf: &mut [u8],
        track: bool,
    ) -> Result<(usize, bool)> {
        let mut copied = 0usize;
        let mut intact = true;
        let mut cursor = first;
        while let Some(extent_id) = cursor {
            if copied == buf.len() {
                break;
            }
            let extent = self.extents.read(extent_id)?;
            cursor = extent.next;
            if *to_skip >= extent.length {
                *to_skip -= extent.length;
                continue;
            }
            let take = ((extent.length - *to_skip) as usize).min(buf.len() - copied);
            let dest = &mut buf[copied..copied + take];
            match extent.source {
                SourceRef::Obj(obj_ref) => {
                    let object = self.obj_refs.get(obj_ref)?.object;
                    self.heap.read_at(object, extent.offset + *to_skip, dest)?;
                }
                SourceRef::File(file_ref) => {
                    let fill = self.fill_byte;
                    let start = extent.offset + *to_skip;
                    let file_ref = self.file_refs.get_mut(file_ref)?;
                    let transferred = file_ref.read_at(start, dest, fill);
                    if transferred == 0 {
                        intact = false;
                    } else if track {
                        file_ref.note_progress(start + transferred);
                    }
                }
            }
            copied += take;
            *to_skip = 0;
        }
        Ok((copied, intact))
    }
}
