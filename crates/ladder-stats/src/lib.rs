//! Statistics for the Ladder runtime.
//!
//! - [`AutoSummary`] aggregates levels gained by auto-advance per entity and
//!   per progression type between two summary ticks, and renders them into
//!   a short human-readable report.
//! - [`PerfCounters`] are lock-free counters the runtime bumps on every
//!   attempt, rejection, load and save. [`PerfCounters::snapshot`] copies
//!   them out for reporting.

mod counters;
mod summary;

pub use counters::{PerfCounters, PerfSnapshot, Rejection};
pub use summary::{AutoSummary, EntitySummary};
