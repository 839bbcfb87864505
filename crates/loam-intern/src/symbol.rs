//! Interned byte strings.
//!
//! A [`Symbol`] is a leaf object: it has no outgoing strong references, so
//! shading takes it straight from white to black and the tracer never visits
//! its body. Symbols are referenced *weakly* from the [`Ctrie`] and strongly
//! only from mutator-owned handles; when no mutator reaches a symbol for a
//! full cycle, the sweep tears it down in two steps (white → red → freed),
//! giving concurrent readers a grace cycle to notice the red tombstone.

use std::hash::Hasher;
use std::ptr::NonNull;

use loam_gc::{
    GcHeader, GcObject, RED, ScanContext, SweepContext, SweepDisposition, color::invert,
    current_white,
};
use rustc_hash::FxHasher;

use crate::ctrie::Ctrie;

/// The canonical byte-hash every interning caller must use.
pub fn canonical_hash(view: &[u8]) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(view);
    hasher.finish()
}

/// A lookup key: a byte view plus its precomputed 64-bit hash.
///
/// The hash is caller-supplied so that it is computed exactly once per
/// operation; [`Query::with_hash`] additionally lets tests force collisions
/// at any trie depth.
#[derive(Clone, Copy)]
pub struct Query<'a> {
    /// Precomputed hash of `view`.
    pub hash: u64,
    /// The byte sequence being interned or looked up.
    pub view: &'a [u8],
}

impl<'a> Query<'a> {
    /// A query hashed with [`canonical_hash`].
    pub fn new(view: &'a [u8]) -> Self {
        Self {
            hash: canonical_hash(view),
            view,
        }
    }

    /// A query with an explicit hash.
    pub fn with_hash(hash: u64, view: &'a [u8]) -> Self {
        Self { hash, view }
    }
}

/// An interned byte string; the unique live representative of its view.
pub struct Symbol {
    header: GcHeader,
    /// The trie this symbol was interned into; consulted by the sweep hook.
    owner: *const Ctrie,
    hash: u64,
    bytes: Box<[u8]>,
}

// SAFETY: a Symbol is immutable after construction apart from its color
// word, which is atomic; the owner pointer is only dereferenced by the
// collector, which outlives every symbol it sweeps.
unsafe impl Send for Symbol {}
unsafe impl Sync for Symbol {}

impl Symbol {
    pub(crate) fn with_owner(owner: *const Ctrie, query: &Query<'_>) -> NonNull<Symbol> {
        loam_gc::alloc(Symbol {
            header: GcHeader::new(),
            owner,
            hash: query.hash,
            bytes: query.view.into(),
        })
    }

    /// The interned byte sequence.
    pub fn view(&self) -> &[u8] {
        &self.bytes
    }

    /// The hash this symbol was interned under.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Attempt to upgrade a weak sighting into a strong one.
    ///
    /// CASes white→black so the symbol survives the cycle in progress.
    /// Returns `false` when the symbol is red: the sweep already claimed it,
    /// and the caller must treat it as nonexistent (and may replace it).
    ///
    /// A stale read of the white encoding around a color remap makes the CAS
    /// fail against a black value, which is answered truthfully; the next
    /// handshake resynchronizes the encoding.
    pub(crate) fn try_upgrade(&self) -> bool {
        let white = current_white();
        match self.header.compare_exchange_color(white, invert(white)) {
            Ok(_) => true,
            Err(RED) => false,
            Err(_) => true,
        }
    }
}

impl GcObject for Symbol {
    fn header(&self) -> &GcHeader {
        &self.header
    }

    fn scan(&self, _ctx: &mut ScanContext) {}

    fn is_leaf(&self) -> bool {
        true
    }

    /// The two-sweep teardown.
    ///
    /// - black: reachable this cycle; keep.
    /// - white: race the mutators for it with a white→red CAS. Winning means
    ///   no mutator upgraded it; remove this exact node from the owning trie
    ///   and keep the memory one more cycle.
    /// - red: the grace cycle has passed; every mutator has handshaked since
    ///   the removal, so nothing can still hold a stale reference. Reclaim.
    fn sweep(&self, ctx: &SweepContext) -> SweepDisposition {
        let color = self.header.color();
        if color == ctx.black() {
            return SweepDisposition::Retain;
        }
        if color == RED {
            return SweepDisposition::Reclaim;
        }
        match self.header.compare_exchange_color(ctx.white(), RED) {
            Ok(_) => {
                // SAFETY: the owning trie is rooted for the lifetime of its
                // symbols (interning contract), so it is still live here.
                let trie = unsafe { &*self.owner };
                let _ = trie.remove(self);
                SweepDisposition::Retain
            }
            // Lost to a concurrent upgrade: reachable again.
            Err(_) => SweepDisposition::Retain,
        }
    }
}
