//! # loam-intern
//!
//! Weak interning of byte strings on top of `loam-gc`.
//!
//! The interning set is a lock-free [`Ctrie`] holding [`Symbol`] leaves.
//! The trie references its symbols weakly: interning a view hands back the
//! canonical symbol pointer, but only mutator-held strong handles (and the
//! per-handshake root shading that covers them) keep a symbol alive. A
//! symbol nobody reaches for a full collection cycle is excised from the
//! trie and reclaimed one cycle later; interning the same view afterwards
//! produces a fresh symbol with an equal view.
//!
//! Callers must be inside [`loam_gc::enter`]/[`loam_gc::leave`].

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod ctrie;
pub mod symbol;

use std::ptr::NonNull;
use std::sync::OnceLock;

pub use ctrie::Ctrie;
pub use symbol::{Query, Symbol, canonical_hash};

struct TableHandle(NonNull<Ctrie>);

// SAFETY: the table is created once, registered as a global root, and never
// reclaimed while the collector runs; the pointer is freely shareable.
unsafe impl Send for TableHandle {}
unsafe impl Sync for TableHandle {}

static TABLE: OnceLock<TableHandle> = OnceLock::new();

fn table() -> &'static Ctrie {
    let handle = TABLE.get_or_init(|| {
        let trie = Ctrie::new();
        loam_gc::push_global_root(trie);
        tracing::debug!(target: "loam::intern", "interning table created");
        TableHandle(trie)
    });
    // SAFETY: rooted globally, so live until collector shutdown.
    unsafe { handle.0.as_ref() }
}

/// Intern a byte sequence, returning the canonical symbol for it.
///
/// The process-wide table is created on first use and registered as a
/// global root. The returned pointer stays canonical for `view` until a
/// collection cycle in which no strong handle reaches it; keep the symbol
/// registered as a root (or stored behind a strong field) across handshakes
/// if it must outlive the current work quantum.
pub fn intern(view: &[u8]) -> NonNull<Symbol> {
    table().emplace(&Query::new(view))
}

/// Find the interned symbol for `view` without creating one.
pub fn lookup(view: &[u8]) -> Option<NonNull<Symbol>> {
    TABLE.get()?;
    table().lookup(&Query::new(view))
}
