//! Reference-counted source descriptors.
//!
//! Extents never own their data. They reference it through a descriptor,
//! either a `FileRef` (a region of a file on the filesystem) or an `ObjRef`
//! (a byte object in the depot heap). Descriptors are reference counted:
//! every extent referencing one holds a count, and the descriptor's backing
//! resource is released when the count reaches zero with destruction
//! pending.
//!
//! # Files Change Underneath Us
//!
//! A file named by a `FileRef` can be truncated, deleted, or replaced while
//! objects still reference it. Reads are therefore defensive: at creation
//! the descriptor captures the file's device and inode numbers as a change
//! token, and every read re-checks them. When the check fails, or the file
//! is gone, the read fills the destination with a fill byte, reports zero
//! bytes transferred, and the caller's cursor still advances. Consumers get
//! recognizably blank data instead of a crash.

use crate::error::{Error, Result};
use std::fs;
use std::os::unix::fs::{FileExt, MetadataExt};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Fill byte for degraded file reads: ASCII space.
pub const FILE_FILL_BYTE: u8 = 0x20;

/// What to do with a file when the last reference to it is dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Cleanup {
    /// Leave the file in place.
    Retain,
    /// Unlink the file.
    Unlink,
    /// Run a shell command (for multi-file or application-defined cleanup).
    Script(String),
}

/// Descriptor for file-resident source data.
#[derive(Clone, Debug)]
pub struct FileRef {
    pub(crate) path: PathBuf,
    /// Device number captured at creation, half of the change token.
    pub(crate) device: u64,
    /// Inode number captured at creation, half of the change token.
    pub(crate) inode: u64,
    /// File length recorded at creation or last revision.
    pub(crate) file_length: u64,
    /// Highest file offset any tracking reader has transmitted past.
    pub(crate) xmit_progress: u64,
    pub(crate) cleanup: Cleanup,
    pub(crate) refs: u32,
    pub(crate) destroy_pending: bool,
}

impl FileRef {
    /// Create a descriptor for an existing file, capturing its identity.
    pub fn new(path: impl Into<PathBuf>, cleanup: Cleanup) -> Result<Self> {
        let path = path.into();
        let meta = fs::metadata(&path).map_err(|e| {
            Error::InvalidArgument(format!("cannot describe file {}: {e}", path.display()))
        })?;
        Ok(Self {
            device: meta.dev(),
            inode: meta.ino(),
            file_length: meta.len(),
            xmit_progress: 0,
            path,
            cleanup,
            refs: 0,
            destroy_pending: false,
        })
    }

    /// Re-point the descriptor at a (possibly new) path, refreshing the
    /// change token and recorded length. Transmit progress restarts.
    pub fn revise(&mut self, path: impl Into<PathBuf>, cleanup: Cleanup) -> Result<()> {
        let revised = Self::new(path, cleanup)?;
        self.path = revised.path;
        self.device = revised.device;
        self.inode = revised.inode;
        self.file_length = revised.file_length;
        self.xmit_progress = 0;
        self.cleanup = revised.cleanup;
        Ok(())
    }

    /// The path this descriptor names.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if a tracking reader has transmitted the file's final octet.
    #[inline]
    pub fn xmit_eof(&self) -> bool {
        self.xmit_progress >= self.file_length
    }

    /// Copy `dest.len()` bytes starting at `offset` from the file.
    ///
    /// Returns the number of bytes actually transferred: `dest.len()` on
    /// success, or 0 when the file is missing or no longer the file the
    /// descriptor was created against, in which case `dest` is filled with
    /// `fill`.
    pub fn read_at(&self, offset: u64, dest: &mut [u8], fill: u8) -> u64 {
        match self.try_read_at(offset, dest) {
            Ok(()) => dest.len() as u64,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    offset,
                    length = dest.len(),
                    error = %e,
                    "file source unreadable, filling with blank bytes"
                );
                dest.fill(fill);
                0
            }
        }
    }

    fn try_read_at(&self, offset: u64, dest: &mut [u8]) -> Result<()> {
        let file = fs::File::open(&self.path)?;
        let meta = file.metadata()?;
        if meta.dev() != self.device || meta.ino() != self.inode {
            return Err(Error::InvalidArgument(format!(
                "file {} was replaced since the descriptor was created",
                self.path.display()
            )));
        }
        file.read_exact_at(dest, offset)?;
        Ok(())
    }

    /// Overwrite bytes in the file at `offset`.
    ///
    /// Same identity check as reads; used by in-place revision.
    pub fn write_at(&self, offset: u64, src: &[u8]) -> Result<()> {
        let file = fs::OpenOptions::new().write(true).open(&self.path)?;
        let meta = file.metadata()?;
        if meta.dev() != self.device || meta.ino() != self.inode {
            return Err(Error::InvalidArgument(format!(
                "file {} was replaced since the descriptor was created",
                self.path.display()
            )));
        }
        file.write_all_at(src, offset)?;
        Ok(())
    }

    /// Advance transmit progress to cover bytes up to `end_offset`.
    pub(crate) fn note_progress(&mut self, end_offset: u64) {
        if end_offset > self.xmit_progress {
            self.xmit_progress = end_offset;
        }
    }

    /// Perform the configured cleanup action.
    ///
    /// Invoked when the last reference is released. Failures are logged
    /// rather than propagated: the descriptor record is going away either
    /// way, and the caller is typically deep in a destroy cascade.
    pub(crate) fn run_cleanup(&self) {
        match &self.cleanup {
            Cleanup::Retain => {}
            Cleanup::Unlink => {
                if let Err(e) = fs::remove_file(&self.path) {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "failed to unlink released file"
                    );
                }
            }
            Cleanup::Script(script) => {
                match Command::new("sh").arg("-c").arg(script).status() {
                    Ok(status) if status.success() => {}
                    Ok(status) => {
                        tracing::warn!(script, %status, "cleanup script failed");
                    }
                    Err(e) => {
                        tracing::warn!(script, error = %e, "cleanup script did not run");
                    }
                }
            }
        }
    }
}

/// Descriptor for heap-resident source data.
///
/// Wraps a byte object in the depot heap so that many extents (and clones
/// of their objects) can share a single copy of the bytes.
#[derive(Clone, Copy, Debug)]
pub struct ObjRef {
    /// Handle of the backing byte object in the depot heap.
    pub(crate) object: u32,
    /// Length of the backing object in bytes.
    pub(crate) length: u64,
    pub(crate) refs: u32,
    pub(crate) destroy_pending: bool,
}

impl ObjRef {
    /// Create a descriptor over an existing heap object.
    pub fn new(object: u32, length: u64) -> Self {
        Self {
            object,
            length,
            refs: 0,
            destroy_pending: false,
        }
    }

    /// Length of the referenced object.
    #[inline]
    pub fn length(&self) -> u64 {
        self.length
    }
}
