//! Metrics collection using metrics-rs.
//!
//! All metrics are recorded through the `metrics` facade, so they are
//! no-ops unless the embedding application installs a recorder.

use crate::ledger::{Account, Medium};
use metrics::{counter, gauge, Unit};
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

// Metric names as constants for consistency
const ZCOS_CREATED: &str = "lamina_zcos_created";
const ZCOS_DESTROYED: &str = "lamina_zcos_destroyed";
const BYTES_ADMITTED: &str = "lamina_bytes_admitted";
const REQUISITIONS_FILED: &str = "lamina_requisitions_filed";
const ADMISSIONS_REFUSED: &str = "lamina_admissions_refused";
const OCCUPANCY_BYTES: &str = "lamina_occupancy_bytes";

/// Initialize metrics descriptions.
///
/// Call this once at application startup before using any metrics.
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return; // Already initialized
    }

    metrics::describe_counter!(
        ZCOS_CREATED,
        Unit::Count,
        "Total number of layered objects created"
    );
    metrics::describe_counter!(
        ZCOS_DESTROYED,
        Unit::Count,
        "Total number of layered objects destroyed"
    );
    metrics::describe_counter!(
        BYTES_ADMITTED,
        Unit::Bytes,
        "Total source data bytes admitted into the depot"
    );
    metrics::describe_counter!(
        REQUISITIONS_FILED,
        Unit::Count,
        "Total space requisitions filed with the admission queues"
    );
    metrics::describe_counter!(
        ADMISSIONS_REFUSED,
        Unit::Count,
        "Total extents refused for lack of reserved space"
    );
    metrics::describe_gauge!(
        OCCUPANCY_BYTES,
        Unit::Bytes,
        "Current occupancy of one account-medium book"
    );
}

/// Record a layered object created.
#[inline]
pub(crate) fn zco_created(acct: Account) {
    counter!(ZCOS_CREATED, "account" => acct.label()).increment(1);
}

/// Record a layered object destroyed.
#[inline]
pub(crate) fn zco_destroyed(acct: Account) {
    counter!(ZCOS_DESTROYED, "account" => acct.label()).increment(1);
}

/// Record source data bytes admitted.
#[inline]
pub(crate) fn bytes_admitted(acct: Account, medium: Medium, bytes: u64) {
    counter!(BYTES_ADMITTED, "account" => acct.label(), "medium" => medium.label())
        .increment(bytes);
}

/// Record a requisition filed.
#[inline]
pub(crate) fn requisition_filed(acct: Account) {
    counter!(REQUISITIONS_FILED, "account" => acct.label()).increment(1);
}

/// Record an extent refused for lack of space.
#[inline]
pub(crate) fn admission_refused(acct: Account) {
    counter!(ADMISSIONS_REFUSED, "account" => acct.label()).increment(1);
}

/// Record the current occupancy of one book.
#[inline]
pub(crate) fn occupancy(acct: Account, medium: Medium, bytes: u64) {
    gauge!(OCCUPANCY_BYTES, "account" => acct.label(), "medium" => medium.label())
        .set(bytes as f64);
}
