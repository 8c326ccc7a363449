//! Flow-controlled admission of new data.
//!
//! Producers that want to put data into the depot first file a
//! *requisition* for the space, stating how much of each medium they need
//! and at what priority. Requisitions queue per account in strictly
//! descending priority order, FIFO within a priority. A *service pass*
//! walks the queue head to tail, awarding space to requisitions that fit
//! within what is currently available; the first pending requisition that
//! does not fit halts the pass, so a large high-priority request is never
//! starved by small requests sneaking past it (head-of-line blocking is
//! the point, not a defect).
//!
//! Awarded space is an earmark, not a charge: the books change only when
//! the producer actually creates the object, after which it cancels its
//! requisition with [`shred`](crate::depot::Txn::shred). Awards that are
//! never claimed are swept out by a periodic tick so abandoned producers
//! cannot pin capacity forever.
//!
//! Blocking producers park on an [`Attendant`], which a service pass
//! signals when the award comes through.

use crate::error::{Error, Result};
use crate::ledger::{Account, Ledger, Medium};
use crate::observability;
use std::sync::{Arc, Mutex};

/// Per-medium space requirement, in book order (heap, file, bulk).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpaceNeeded(pub [u64; 3]);

impl SpaceNeeded {
    /// Requirement for heap space only.
    pub fn heap(bytes: u64) -> Self {
        let mut needed = [0; 3];
        needed[Medium::Heap.index()] = bytes;
        Self(needed)
    }

    /// Requirement for file space only.
    pub fn file(bytes: u64) -> Self {
        let mut needed = [0; 3];
        needed[Medium::File.index()] = bytes;
        Self(needed)
    }

    /// Requirement for bulk space only.
    pub fn bulk(bytes: u64) -> Self {
        let mut needed = [0; 3];
        needed[Medium::Bulk.index()] = bytes;
        Self(needed)
    }

    /// The requirement for one medium.
    #[inline]
    pub fn for_medium(&self, medium: Medium) -> u64 {
        self.0[medium.index()]
    }

    fn fits(&self, available: &[u64; 3]) -> bool {
        self.0.iter().zip(available).all(|(need, avail)| need <= avail)
    }

    fn earmark(&self, available: &mut [u64; 3]) {
        for (avail, need) in available.iter_mut().zip(&self.0) {
            *avail = avail.saturating_sub(*need);
        }
    }
}

/// Identifies one queued requisition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ticket {
    pub(crate) acct: Account,
    pub(crate) serial: u64,
}

impl Ticket {
    /// The account the requisition queues under.
    #[inline]
    pub fn account(&self) -> Account {
        self.acct
    }
}

/// How a blocked wait for space ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A service pass awarded the requested space.
    Signaled,
    /// The attendant was paused; the producer should give up.
    Interrupted,
}

struct AttendantState {
    /// Dropped on pause so blocked waiters wake with an error.
    tx: Option<kanal::Sender<()>>,
    rx: kanal::Receiver<()>,
}

/// Blocking context for producers awaiting a space award.
///
/// One attendant serves one producer task. `wait` parks the caller until
/// a service pass signals the award or the attendant is paused. Pausing
/// interrupts the current and all future waits until `resume`.
pub struct Attendant {
    inner: Mutex<AttendantState>,
}

impl Attendant {
    /// Create a started attendant.
    pub fn new() -> Arc<Self> {
        let (tx, rx) = kanal::bounded(1);
        Arc::new(Self {
            inner: Mutex::new(AttendantState { tx: Some(tx), rx }),
        })
    }

    /// Interrupt the current wait and refuse future waits.
    pub fn pause(&self) {
        if let Ok(mut state) = self.inner.lock() {
            state.tx = None;
        }
    }

    /// Make the attendant ready to wait again after a pause.
    pub fn resume(&self) {
        if let Ok(mut state) = self.inner.lock() {
            let (tx, rx) = kanal::bounded(1);
            state.tx = Some(tx);
            state.rx = rx;
        }
    }

    /// Wake the parked producer. Idempotent while a signal is pending.
    pub(crate) fn signal(&self) {
        if let Ok(state) = self.inner.lock() {
            if let Some(tx) = &state.tx {
                let _ = tx.try_send(());
            }
        }
    }

    /// Park until signaled or paused. Never called while holding the
    /// depot lock.
    pub fn wait(&self) -> WaitOutcome {
        let rx = match self.inner.lock() {
            Ok(state) => state.rx.clone(),
            Err(_) => return WaitOutcome::Interrupted,
        };
        match rx.recv() {
            Ok(()) => WaitOutcome::Signaled,
            Err(_) => WaitOutcome::Interrupted,
        }
    }
}

struct Requisition {
    serial: u64,
    needed: SpaceNeeded,
    attendant: Option<Arc<Attendant>>,
    /// -1 while pending; counts seconds since award once serviced.
    seconds_unclaimed: i64,
    coarse_priority: u8,
    fine_priority: u8,
}

impl Requisition {
    #[inline]
    fn serviced(&self) -> bool {
        self.seconds_unclaimed >= 0
    }

    #[inline]
    fn priority(&self) -> (u8, u8) {
        (self.coarse_priority, self.fine_priority)
    }
}

/// The per-account requisition queues.
pub(crate) struct Admission {
    queues: [Vec<Requisition>; 2],
    next_serial: u64,
}

impl Admission {
    pub(crate) fn new() -> Self {
        Self {
            queues: [Vec::new(), Vec::new()],
            next_serial: 1,
        }
    }

    /// File a requisition and run a service pass over its queue.
    pub(crate) fn request(
        &mut self,
        acct: Account,
        needed: SpaceNeeded,
        coarse_priority: u8,
        fine_priority: u8,
        attendant: Option<Arc<Attendant>>,
        ledger: &Ledger,
    ) -> Ticket {
        let serial = self.next_serial;
        self.next_serial += 1;
        let requisition = Requisition {
            serial,
            needed,
            attendant,
            seconds_unclaimed: -1,
            coarse_priority,
            fine_priority,
        };

        // Scan from the tail for the last entry at this priority or
        // higher and insert after it, keeping the queue in descending
        // priority order with FIFO ties.
        let queue = &mut self.queues[acct.index()];
        let position = queue
            .iter()
            .rposition(|entry| entry.priority() >= requisition.priority())
            .map(|index| index + 1)
            .unwrap_or(0);
        queue.insert(position, requisition);
        observability::requisition_filed(acct);

        self.service(acct, ledger);
        Ticket { acct, serial }
    }

    /// True if the ticket's requisition has been awarded its space.
    ///
    /// Errors if the ticket is no longer queued (shredded or swept).
    pub(crate) fn awarded(&self, ticket: Ticket) -> Result<bool> {
        self.queues[ticket.acct.index()]
            .iter()
            .find(|entry| entry.serial == ticket.serial)
            .map(|entry| entry.serviced())
            .ok_or(Error::BadHandle("requisition ticket"))
    }

    /// Remove a requisition without servicing its queue. Space an awarded
    /// requisition had earmarked becomes grantable on the next pass.
    ///
    /// Returns false if the ticket was already gone, which is normal for
    /// producers that shred after claiming their award.
    pub(crate) fn shred(&mut self, ticket: Ticket) -> bool {
        let queue = &mut self.queues[ticket.acct.index()];
        match queue.iter().position(|entry| entry.serial == ticket.serial) {
            Some(index) => {
                queue.remove(index);
                true
            }
            None => false,
        }
    }

    /// Walk one account's queue, awarding space to requisitions that fit
    /// the ledger's current availability. Earlier awards earmark their
    /// space against later ones; the first pending requisition that does
    /// not fit halts the walk. Returns the number of new awards.
    pub(crate) fn service(&mut self, acct: Account, ledger: &Ledger) -> usize {
        let mut available = ledger.available(acct);
        let mut awards = 0;
        for entry in self.queues[acct.index()].iter_mut() {
            if entry.serviced() {
                entry.needed.earmark(&mut available);
                continue;
            }
            if !entry.needed.fits(&available) {
                break;
            }
            entry.seconds_unclaimed = 0;
            entry.needed.earmark(&mut available);
            awards += 1;
            tracing::debug!(
                account = acct.label(),
                serial = entry.serial,
                "space awarded"
            );
            if let Some(attendant) = &entry.attendant {
                attendant.signal();
            }
        }
        awards
    }

    /// Age every awarded requisition by `elapsed` seconds and sweep out
    /// those unclaimed longer than `max_seconds`. Returns the number
    /// swept; the caller re-services affected queues.
    pub(crate) fn tick_unclaimed(&mut self, elapsed: i64, max_seconds: i64) -> usize {
        let mut swept = 0;
        for queue in &mut self.queues {
            queue.retain_mut(|entry| {
                if !entry.serviced() {
                    return true;
                }
                entry.seconds_unclaimed += elapsed;
                if entry.seconds_unclaimed > max_seconds {
                    tracing::warn!(
                        serial = entry.serial,
                        unclaimed_secs = entry.seconds_unclaimed,
                        "sweeping requisition whose award was never claimed"
                    );
                    swept += 1;
                    return false;
                }
                true
            });
        }
        swept
    }

    /// Requisitions queued under one account.
    pub(crate) fn queue_len(&self, acct: Account) -> usize {
        self.queues[acct.index()].len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_with_heap_max(max: u64) -> Ledger {
        Ledger::new([[max, max, max]; 2])
    }

    #[test]
    fn test_award_within_availability() {
        let ledger = ledger_with_heap_max(1000);
        let mut admission = Admission::new();
        let ticket = admission.request(
            Account::Outbound,
            SpaceNeeded::heap(400),
            1,
            0,
            None,
            &ledger,
        );
        assert!(admission.awarded(ticket).unwrap());
    }

    #[test]
    fn test_earlier_awards_earmark_space() {
        let ledger = ledger_with_heap_max(100);
        let mut admission = Admission::new();
        let first = admission.request(
            Account::Outbound,
            SpaceNeeded::heap(100),
            1,
            0,
            None,
            &ledger,
        );
        let second = admission.request(
            Account::Outbound,
            SpaceNeeded::heap(50),
            1,
            0,
            None,
            &ledger,
        );
        assert!(admission.awarded(first).unwrap());
        assert!(!admission.awarded(second).unwrap());

        // Shredding the first award frees its earmark for the second on
        // the next pass.
        assert!(admission.shred(first));
        admission.service(Account::Outbound, &ledger);
        assert!(admission.awarded(second).unwrap());
    }

    #[test]
    fn test_head_of_line_blocking() {
        let ledger = ledger_with_heap_max(100);
        let mut admission = Admission::new();
        let big = admission.request(
            Account::Inbound,
            SpaceNeeded::heap(200),
            1,
            0,
            None,
            &ledger,
        );
        // Fits on its own, but must not jump the blocked head.
        let small = admission.request(
            Account::Inbound,
            SpaceNeeded::heap(10),
            1,
            0,
            None,
            &ledger,
        );
        assert!(!admission.awarded(big).unwrap());
        assert!(!admission.awarded(small).unwrap());
    }

    #[test]
    fn test_priority_ordering_with_fifo_ties() {
        let ledger = ledger_with_heap_max(0); // nothing awarded
        let mut admission = Admission::new();
        let low = admission.request(
            Account::Inbound,
            SpaceNeeded::heap(1),
            0,
            0,
            None,
            &ledger,
        );
        let high_a = admission.request(
            Account::Inbound,
            SpaceNeeded::heap(1),
            2,
            0,
            None,
            &ledger,
        );
        let high_b = admission.request(
            Account::Inbound,
            SpaceNeeded::heap(1),
            2,
            0,
            None,
            &ledger,
        );
        let mid = admission.request(
            Account::Inbound,
            SpaceNeeded::heap(1),
            1,
            5,
            None,
            &ledger,
        );

        let serials: Vec<u64> = admission.queues[Account::Inbound.index()]
            .iter()
            .map(|entry| entry.serial)
            .collect();
        assert_eq!(
            serials,
            vec![high_a.serial, high_b.serial, mid.serial, low.serial]
        );
    }

    #[test]
    fn test_accounts_are_independent() {
        let ledger = ledger_with_heap_max(100);
        let mut admission = Admission::new();
        let inbound = admission.request(
            Account::Inbound,
            SpaceNeeded::heap(500),
            1,
            0,
            None,
            &ledger,
        );
        let outbound = admission.request(
            Account::Outbound,
            SpaceNeeded::heap(80),
            1,
            0,
            None,
            &ledger,
        );
        assert!(!admission.awarded(inbound).unwrap());
        assert!(admission.awarded(outbound).unwrap());
    }

    #[test]
    fn test_multi_medium_requirement() {
        let ledger = Ledger::new([[100, 5, 100]; 2]);
        let mut admission = Admission::new();
        // Heap fits, file does not: no award.
        let ticket = admission.request(
            Account::Outbound,
            SpaceNeeded([50, 10, 0]),
            1,
            0,
            None,
            &ledger,
        );
        assert!(!admission.awarded(ticket).unwrap());
    }

    #[test]
    fn test_shredded_ticket_is_gone() {
        let ledger = ledger_with_heap_max(100);
        let mut admission = Admission::new();
        let ticket = admission.request(
            Account::Outbound,
            SpaceNeeded::heap(10),
            1,
            0,
            None,
            &ledger,
        );
        assert!(admission.shred(ticket));
        assert!(!admission.shred(ticket));
        assert!(admission.awarded(ticket).is_err());
    }

    #[test]
    fn test_tick_sweeps_stale_awards() {
        let ledger = ledger_with_heap_max(100);
        let mut admission = Admission::new();
        let awarded = admission.request(
            Account::Inbound,
            SpaceNeeded::heap(100),
            1,
            0,
            None,
            &ledger,
        );
        let pending = admission.request(
            Account::Inbound,
            SpaceNeeded::heap(100),
            1,
            0,
            None,
            &ledger,
        );
        assert!(admission.awarded(awarded).unwrap());

        // Pending requisitions never age out.
        assert_eq!(admission.tick_unclaimed(1, 3), 0);
        assert_eq!(admission.tick_unclaimed(1, 3), 0);
        assert_eq!(admission.tick_unclaimed(2, 3), 1);
        assert!(admission.awarded(awarded).is_err());

        admission.service(Account::Inbound, &ledger);
        assert!(admission.awarded(pending).unwrap());
    }

    #[test]
    fn test_attendant_signal_wakes_waiter() {
        let attendant = Attendant::new();
        attendant.signal();
        assert_eq!(attendant.wait(), WaitOutcome::Signaled);
    }

    #[test]
    fn test_attendant_pause_interrupts() {
        let attendant = Attendant::new();
        let waiter = {
            let attendant = Arc::clone(&attendant);
            std::thread::spawn(move || attendant.wait())
        };
        std::thread::sleep(std::time::Duration::from_millis(50));
        attendant.pause();
        assert_eq!(waiter.join().unwrap(), WaitOutcome::Interrupted);

        // Paused attendants refuse further waits until resumed.
        assert_eq!(attendant.wait(), WaitOutcome::Interrupted);
        attendant.resume();
        attendant.signal();
        assert_eq!(attendant.wait(), WaitOutcome::Signaled);
    }
}
