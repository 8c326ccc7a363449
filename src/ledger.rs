//! Occupancy accounting for admitted data.
//!
//! The depot divides its capacity into six books: two accounts (inbound
//! data arriving from peers, outbound data queued for transmission) times
//! three storage media (heap, file, bulk). Each book tracks current
//! occupancy against a configurable ceiling. Every byte of source data held
//! by a layered object is charged to exactly one book, and released from
//! that book when the last reference to it goes away.
//!
//! Only data bytes are charged. Record structures, descriptors, and chain
//! links are bookkeeping overhead and never appear in the books, so a clone
//! that shares 300 bytes of an existing extent raises occupancy by exactly
//! 300.

use crate::error::{Error, Result};
use crate::observability;

/// Default ceiling for every book: effectively unlimited.
pub const DEFAULT_MAX_OCCUPANCY: u64 = 1_000_000_000_000;

/// Which traffic direction a layered object belongs to.
///
/// An object is assigned to an account at creation and keeps it for life.
/// Clones inherit the original's account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Account {
    /// Data received from peers, awaiting local delivery.
    Inbound,
    /// Locally sourced data queued for transmission.
    Outbound,
}

impl Account {
    /// Index into per-account arrays.
    #[inline]
    pub(crate) fn index(self) -> usize {
        match self {
            Account::Inbound => 0,
            Account::Outbound => 1,
        }
    }

    /// Lowercase name for log fields and metric labels.
    #[inline]
    pub fn label(self) -> &'static str {
        match self {
            Account::Inbound => "inbound",
            Account::Outbound => "outbound",
        }
    }
}

/// Which storage medium holds a piece of source data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Medium {
    /// In-memory byte objects.
    Heap,
    /// Regions of files on the filesystem.
    File,
    /// Secondary mass storage.
    Bulk,
}

impl Medium {
    /// All media, in book order.
    pub const ALL: [Medium; 3] = [Medium::Heap, Medium::File, Medium::Bulk];

    /// Index into per-medium arrays.
    #[inline]
    pub(crate) fn index(self) -> usize {
        match self {
            Medium::Heap => 0,
            Medium::File => 1,
            Medium::Bulk => 2,
        }
    }

    /// Lowercase name for log fields and metric labels.
    #[inline]
    pub fn label(self) -> &'static str {
        match self {
            Medium::Heap => "heap",
            Medium::File => "file",
            Medium::Bulk => "bulk",
        }
    }
}

/// One account-medium book: current occupancy against a ceiling.
#[derive(Clone, Copy, Debug)]
pub struct Book {
    current: u64,
    max: u64,
}

impl Book {
    fn new(max: u64) -> Self {
        Self { current: 0, max }
    }

    /// Bytes currently charged to this book.
    #[inline]
    pub fn current(&self) -> u64 {
        self.current
    }

    /// Ceiling for this book.
    #[inline]
    pub fn max(&self) -> u64 {
        self.max
    }

    /// Bytes still admissible, zero if the book is over its ceiling.
    #[inline]
    pub fn available(&self) -> u64 {
        self.max.saturating_sub(self.current)
    }
}

/// The six occupancy books plus ceiling configuration.
#[derive(Debug)]
pub struct Ledger {
    books: [[Book; 3]; 2],
}

impl Ledger {
    /// Create a ledger with each book's ceiling taken from
    /// `limits[account][medium]`.
    pub fn new(limits: [[u64; 3]; 2]) -> Self {
        let book = |acct: usize, medium: usize| Book::new(limits[acct][medium]);
        Self {
            books: [
                [book(0, 0), book(0, 1), book(0, 2)],
                [book(1, 0), book(1, 1), book(1, 2)],
            ],
        }
    }

    /// The book for one account and medium.
    #[inline]
    pub fn book(&self, acct: Account, medium: Medium) -> Book {
        self.books[acct.index()][medium.index()]
    }

    /// True if `length` more bytes fit under the book's ceiling.
    ///
    /// A request that exactly consumes the remaining availability is
    /// admitted.
    #[inline]
    pub fn enough_space(&self, acct: Account, medium: Medium, length: u64) -> bool {
        length <= self.book(acct, medium).available()
    }

    /// Charge `length` bytes to a book.
    pub fn charge(&mut self, acct: Account, medium: Medium, length: u64) {
        let book = &mut self.books[acct.index()][medium.index()];
        book.current = book.current.saturating_add(length);
        tracing::debug!(
            account = acct.label(),
            medium = medium.label(),
            length,
            occupied = book.current,
            "occupancy increased"
        );
        observability::occupancy(acct, medium, book.current);
    }

    /// Release `length` bytes from a book.
    ///
    /// Releasing more than is charged indicates a bookkeeping bug; the
    /// book clamps at zero and the imbalance is reported as an error so
    /// the caller can log it.
    pub fn release(&mut self, acct: Account, medium: Medium, length: u64) -> Result<()> {
        let book = &mut self.books[acct.index()][medium.index()];
        if length > book.current {
            let over = length - book.current;
            book.current = 0;
            return Err(Error::InvalidArgument(format!(
                "release of {length} bytes exceeds {} {} occupancy by {over}",
                acct.label(),
                medium.label()
            )));
        }
        book.current -= length;
        tracing::debug!(
            account = acct.label(),
            medium = medium.label(),
            length,
            occupied = book.current,
            "occupancy decreased"
        );
        observability::occupancy(acct, medium, book.current);
        Ok(())
    }

    /// Per-medium availability for one account, in book order.
    pub fn available(&self, acct: Account) -> [u64; 3] {
        let row = &self.books[acct.index()];
        [row[0].available(), row[1].available(), row[2].available()]
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new([[DEFAULT_MAX_OCCUPANCY; 3]; 2])
    }
}
