//! # loam-gc
//!
//! A concurrent, on-the-fly, tricolor mark-and-sweep garbage collector for a
//! heap of polymorphic objects shared between multiple mutator threads and a
//! single collector thread.
//!
//! ## Design
//!
//! - **No stop-the-world**: mutators run freely; coordination happens at
//!   explicit per-mutator handshakes
//! - **Dijkstra-style barrier**: every in-heap pointer store shades both the
//!   installed and the evicted referent
//! - **Epoch recoloring**: white and black swap meaning each cycle, so
//!   survivors become next cycle's candidates without a write
//! - **Explicit roots**: no stack scanning; mutators register roots which
//!   are shaded at every handshake
//! - **Cycle safe**: reference cycles are reclaimed; in-heap references are
//!   raw pointers, never `Rc`/`Arc`
//!
//! ## Protocol
//!
//! A mutator thread brackets its collectible work with [`enter`]/[`leave`]
//! and calls [`handshake`] between work quanta. Allocation goes through
//! [`alloc`]; every allocation is owned by the collector from the next
//! handshake onward and is destroyed only by the collector, only after
//! being observed unreachable by a full trace.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod barrier;
mod channel;
pub mod collector;
pub mod color;
pub mod infants;
pub mod mutator;
pub mod object;

pub use barrier::{AtomicStrong, Strong, shade};
pub use collector::{
    collect, collections, current_white, objects_freed, objects_live, push_global_root,
    request_stop, spawn,
};
pub use color::{Color, GRAY, RED};
pub use infants::ChunkedDeque;
pub use mutator::{alloc, enter, handshake, leave, pop_root, push_root};
pub use object::{GcHeader, GcObject, ScanContext, SweepContext, SweepDisposition};

/// Abort on a broken protocol invariant.
///
/// The core has no recoverable errors: operations succeed, loop internally,
/// or the process dies here (allocating outside `enter`/`leave`, observing
/// an impossible color).
pub(crate) fn protocol_violation(what: &str) -> ! {
    tracing::error!(target: "loam::gc", what, "protocol violation");
    std::process::abort();
}
