//! # Lamina
//!
//! Zero-copy layered data objects with flow-controlled admission, for
//! deeply stacked protocol engines (delay-tolerant networking and
//! similar store-and-forward stacks).
//!
//! A layered object ([`zco`]) aggregates references to data wherever it
//! already lives (file regions, heap byte objects) instead of copying it,
//! and lets each protocol layer wrap it in headers and trailers on the
//! way down and strip them on the way up. All objects live in a shared
//! [`Depot`](depot::Depot) context that charges every admitted byte to
//! per-direction, per-medium occupancy books and queues producers for
//! space when the books are full.
//!
//! ## Features
//!
//! - **Zero-copy aggregation**: extents reference file regions and heap
//!   objects through reference-counted descriptors; clones share bytes
//! - **Layered encapsulation**: prepend/strip headers and trailers
//!   without touching the source data
//! - **Flow-controlled admission**: priority-ordered space requisitions
//!   with blocking and non-blocking producers
//! - **Degrade, don't crash**: a file deleted out from under an object
//!   yields blank fill bytes, not a failure cascade
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lamina::prelude::*;
//!
//! let depot = Depot::new(DepotConfig::new()
//!     .with_max_occupancy(Account::Outbound, Medium::Heap, 1 << 20));
//!
//! // Admission-checked creation from a heap byte object.
//! let mut txn = depot.begin();
//! let payload = txn.insert_bytes(b"bundle payload");
//! drop(txn);
//! let zco = depot.create_zco(
//!     Account::Outbound,
//!     ExtentSpec { source: ExtentSource::Heap(payload), offset: 0, length: 14 },
//!     1, 0, None,
//! )?.expect("space available");
//!
//! // Each layer wraps the object on the way down the stack.
//! let mut txn = depot.begin();
//! txn.prepend_header(zco, b"BPv7")?;
//! let mut reader = ZcoReader::start_transmitting(zco);
//! let mut wire = vec![0u8; 18];
//! txn.transmit(&mut reader, &mut wire)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod admission;
pub mod depot;
pub mod error;
pub mod ledger;
pub mod observability;
pub mod store;
pub mod zco;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::admission::{Attendant, SpaceNeeded, Ticket, WaitOutcome};
    pub use crate::depot::{Depot, DepotConfig, Txn};
    pub use crate::error::{Error, Result};
    pub use crate::ledger::{Account, Medium};
    pub use crate::zco::reader::ZcoReader;
    pub use crate::zco::source::Cleanup;
    pub use crate::zco::{Charge, ExtentSource, ExtentSpec, ZcoHandle};
}

pub use error::{Error, Result};
