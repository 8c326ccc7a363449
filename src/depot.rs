//! The depot: the shared context object owning all state.
//!
//! One `Depot` is created per daemon and passed by reference to every
//! protocol engine. It owns the store tables, the occupancy ledger, and
//! the admission queues behind a single lock. [`Depot::begin`] takes the
//! lock and returns a [`Txn`], the transaction bracket within which all
//! operations run; dropping the `Txn` ends the critical section.
//!
//! Blocking never happens inside a `Txn`. The admission facades
//! ([`Depot::create_zco`], [`Depot::append_zco_extent`]) release the lock
//! before parking on an attendant and re-enter when signaled, so a
//! producer waiting for space never stalls the rest of the stack.

use crate::admission::{Admission, Attendant, SpaceNeeded, Ticket, WaitOutcome};
use crate::error::Result;
use crate::ledger::{Account, Book, Ledger, Medium, DEFAULT_MAX_OCCUPANCY};
use crate::store::{Heap, Table};
use crate::zco::source::{FileRef, ObjRef, FILE_FILL_BYTE};
use crate::zco::{Capsule, Charge, Extent, ExtentSpec, ZcoHandle, ZcoRecord};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Configuration for a depot.
#[derive(Clone, Debug)]
pub struct DepotConfig {
    max_occupancy: [[u64; 3]; 2],
    fill_byte: u8,
}

impl DepotConfig {
    /// Configuration with effectively unlimited books and the standard
    /// fill byte.
    pub fn new() -> Self {
        Self {
            max_occupancy: [[DEFAULT_MAX_OCCUPANCY; 3]; 2],
            fill_byte: FILE_FILL_BYTE,
        }
    }

    /// Set the occupancy ceiling for one account-medium book.
    pub fn with_max_occupancy(mut self, acct: Account, medium: Medium, max: u64) -> Self {
        self.max_occupancy[acct.index()][medium.index()] = max;
        self
    }

    /// Set the byte used to fill destinations on degraded file reads.
    pub fn with_fill_byte(mut self, byte: u8) -> Self {
        self.fill_byte = byte;
        self
    }
}

impl Default for DepotConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Depot state behind the lock. Reachable only through a [`Txn`].
pub struct Core {
    pub(crate) heap: Heap,
    pub(crate) zcos: Table<ZcoRecord>,
    pub(crate) extents: Table<Extent>,
    pub(crate) capsules: Table<Capsule>,
    pub(crate) file_refs: Table<FileRef>,
    pub(crate) obj_refs: Table<ObjRef>,
    pub(crate) ledger: Ledger,
    pub(crate) admission: Admission,
    pub(crate) fill_byte: u8,
}

impl Core {
    /// Re-run the admission service pass for one account, typically after
    /// occupancy was released back to its books.
    pub(crate) fn service_account(&mut self, acct: Account) {
        self.admission.service(acct, &self.ledger);
    }
}

/// The shared context object.
pub struct Depot {
    core: Mutex<Core>,
}

impl Depot {
    /// Create a depot with the given configuration.
    pub fn new(config: DepotConfig) -> Self {
        Self {
            core: Mutex::new(Core {
                heap: Heap::new(),
                zcos: Table::new("zco"),
                extents: Table::new("extent"),
                capsules: Table::new("capsule"),
                file_refs: Table::new("file ref"),
                obj_refs: Table::new("obj ref"),
                ledger: Ledger::new(config.max_occupancy),
                admission: Admission::new(),
                fill_byte: config.fill_byte,
            }),
        }
    }

    /// Enter a critical section. All operations happen through the
    /// returned transaction; holding it excludes every other caller.
    pub fn begin(&self) -> Txn<'_> {
        Txn {
            core: self.core.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Create a layered object with its initial extent, reserving the
    /// space through the admission queue first.
    ///
    /// With no attendant the call is non-blocking: if the space cannot be
    /// awarded immediately the requisition is withdrawn and `Ok(None)` is
    /// returned. With an attendant the call parks until the award comes
    /// through or the attendant is paused (also `Ok(None)`).
    pub fn create_zco(
        &self,
        acct: Account,
        spec: ExtentSpec,
        coarse_priority: u8,
        fine_priority: u8,
        attendant: Option<&Arc<Attendant>>,
    ) -> Result<Option<ZcoHandle>> {
        let admitted = self.admit(acct, &spec, coarse_priority, fine_priority, attendant, |txn| {
            txn.create(acct, Some(spec), Charge::AlreadyReserved)
        })?;
        Ok(admitted.flatten())
    }

    /// Append an extent to an existing object, reserving the space
    /// through the admission queue first. Blocking behavior is the same
    /// as [`create_zco`](Self::create_zco).
    pub fn append_zco_extent(
        &self,
        zco: ZcoHandle,
        coarse_priority: u8,
        fine_priority: u8,
        spec: ExtentSpec,
        attendant: Option<&Arc<Attendant>>,
    ) -> Result<Option<u64>> {
        let acct = self.begin().account(zco)?;
        let admitted = self.admit(acct, &spec, coarse_priority, fine_priority, attendant, |txn| {
            txn.append_extent(zco, spec, Charge::AlreadyReserved)
        })?;
        Ok(admitted.flatten())
    }

    /// Reserve space for `spec`, then run `build` inside a fresh
    /// transaction with the award in hand. Returns `Ok(None)` if the
    /// space could not be reserved.
    fn admit<T>(
        &self,
        acct: Account,
        spec: &ExtentSpec,
        coarse_priority: u8,
        fine_priority: u8,
        attendant: Option<&Arc<Attendant>>,
        build: impl FnOnce(&mut Txn<'_>) -> Result<T>,
    ) -> Result<Option<T>> {
        let needed = match spec.source.medium() {
            Medium::Heap => SpaceNeeded::heap(spec.length),
            Medium::File => SpaceNeeded::file(spec.length),
            Medium::Bulk => SpaceNeeded::bulk(spec.length),
        };
        let mut txn = self.begin();
        let ticket = txn.request_space(
            acct,
            needed,
            coarse_priority,
            fine_priority,
            attendant.map(Arc::clone),
        );
        loop {
            match txn.space_awarded(ticket) {
                Ok(true) => break,
                // Swept out by the unclaimed-award tick: treat as refusal.
                Err(_) => return Ok(None),
                Ok(false) => {}
            }
            let Some(attendant) = attendant else {
                txn.shred(ticket);
                tracing::warn!(
                    account = acct.label(),
                    length = spec.length,
                    "space not immediately available, refusing"
                );
                return Ok(None);
            };
            // Park outside the critical section.
            drop(txn);
            match attendant.wait() {
                WaitOutcome::Signaled => txn = self.begin(),
                WaitOutcome::Interrupted => {
                    txn = self.begin();
                    txn.shred(ticket);
                    return Ok(None);
                }
            }
        }
        // Withdraw the requisition whether or not the build succeeds, so
        // a failed build does not leave an earmark pinning capacity.
        let built = build(&mut txn);
        txn.shred(ticket);
        Ok(Some(built?))
    }
}

/// An exclusive transaction over the depot.
///
/// All object, descriptor, and admission operations are methods on this
/// guard; see the [`zco`](crate::zco) module for the object operations.
pub struct Txn<'a> {
    pub(crate) core: MutexGuard<'a, Core>,
}

impl Deref for Txn<'_> {
    type Target = Core;

    fn deref(&self) -> &Core {
        &self.core
    }
}

impl DerefMut for Txn<'_> {
    fn deref_mut(&mut self) -> &mut Core {
        &mut self.core
    }
}

impl Txn<'_> {
    /// File a requisition for space under an account.
    ///
    /// The queue is serviced immediately, so a requisition that fits
    /// current availability (with nothing blocked ahead of it) is awarded
    /// before this returns.
    pub fn request_space(
        &mut self,
        acct: Account,
        needed: SpaceNeeded,
        coarse_priority: u8,
        fine_priority: u8,
        attendant: Option<Arc<Attendant>>,
    ) -> Ticket {
        let core = &mut *self.core;
        core.admission.request(
            acct,
            needed,
            coarse_priority,
            fine_priority,
            attendant,
            &core.ledger,
        )
    }

    /// True if a requisition has been awarded its space. Errs if the
    /// ticket is no longer queued.
    pub fn space_awarded(&self, ticket: Ticket) -> Result<bool> {
        self.admission.awarded(ticket)
    }

    /// Withdraw a requisition. Returns false if it was already gone.
    pub fn shred(&mut self, ticket: Ticket) -> bool {
        self.core.admission.shred(ticket)
    }

    /// Age awarded-but-unclaimed requisitions by `elapsed` seconds,
    /// sweeping out any unclaimed longer than `max_seconds` and
    /// re-servicing the queues. Run from a periodic clock task.
    pub fn tick_unclaimed(&mut self, elapsed: i64, max_seconds: i64) -> usize {
        let swept = self.core.admission.tick_unclaimed(elapsed, max_seconds);
        if swept > 0 {
            self.service_account(Account::Inbound);
            self.service_account(Account::Outbound);
        }
        swept
    }

    /// The occupancy book for one account and medium.
    pub fn book(&self, acct: Account, medium: Medium) -> Book {
        self.ledger.book(acct, medium)
    }

    /// Requisitions currently queued under an account.
    pub fn queue_len(&self, acct: Account) -> usize {
        self.admission.queue_len(acct)
    }
}
