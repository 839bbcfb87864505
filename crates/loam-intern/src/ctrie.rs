//! Lock-free concurrent hash array mapped trie (Ctrie), used as the weak
//! interning set.
//!
//! Prokopec, Bronson, Bagwell, Odersky (2012): Concurrent Tries with
//! Efficient Non-Blocking Snapshots.
//!
//! Structure: an indirection node ([`Inode`]) holds an atomic reference to a
//! main node, which is one of
//!
//! - **Branches** (a C-node): a 64-way bitmap plus a packed child array;
//!   children are either further I-nodes or symbol entries,
//! - **Tomb** (a T-node): placeholder for a lone surviving entry after a
//!   removal, contracted away by the next operation that trips over it,
//! - **Chain** (an L-node list): hash-collision bucket below the deepest
//!   branch level.
//!
//! Every structural update builds a fresh main node and CASes it into the
//! parent I-node; a failed CAS restarts the whole operation from the root,
//! which is what makes lookups, inserts and removals linearizable.
//!
//! All nodes are collectible objects. Structural edges (I→main, C→I,
//! L→next L) are strong and traced; edges to symbols (C→S, T→S, L→S) are
//! **weak**, so the trie alone never keeps a symbol alive. Reachability of
//! a symbol comes from mutator-held handles plus the upgrade rule in
//! `Symbol::try_upgrade`.

use std::ptr::{self, NonNull};
use std::sync::atomic::Ordering;

use loam_gc::{AtomicStrong, GcHeader, GcObject, ScanContext, Strong, shade};

use crate::symbol::{Query, Symbol};

/// Hash bits consumed per branch level.
pub const BRANCH_BITS: u32 = 6;

/// Level at which discrimination stops and collisions fall into chains:
/// ten 6-bit levels cover hash bits 0..60.
pub const CHAIN_LEVEL: u32 = 60;

/// The interning trie. A collectible object itself; register it as a root
/// (the process-wide table in [`crate::intern`] registers globally) and keep
/// it rooted for the lifetime of its symbols, whose sweep hooks walk back
/// into their owning trie.
pub struct Ctrie {
    header: GcHeader,
    root: Strong<Inode>,
}

struct Inode {
    header: GcHeader,
    main: AtomicStrong<MainNode>,
}

struct MainNode {
    header: GcHeader,
    kind: MainKind,
}

enum MainKind {
    Branches {
        bitmap: u64,
        children: Box<[Branch]>,
    },
    Tomb {
        entry: *const Symbol,
    },
    Chain {
        entry: *const Symbol,
        next: *const MainNode,
    },
}

#[derive(Clone, Copy)]
enum Branch {
    Nested(*const Inode),
    Entry(*const Symbol),
}

// SAFETY: nodes are immutable after publication except for the I-node main
// slot, which is atomic; raw pointers target collector-owned allocations.
unsafe impl Send for MainNode {}
unsafe impl Sync for MainNode {}

impl GcObject for Ctrie {
    fn header(&self) -> &GcHeader {
        &self.header
    }
    fn scan(&self, ctx: &mut ScanContext) {
        ctx.push_strong(&self.root);
    }
}

impl GcObject for Inode {
    fn header(&self) -> &GcHeader {
        &self.header
    }
    fn scan(&self, ctx: &mut ScanContext) {
        ctx.push_atomic(&self.main);
    }
}

impl GcObject for MainNode {
    fn header(&self) -> &GcHeader {
        &self.header
    }
    fn scan(&self, ctx: &mut ScanContext) {
        match &self.kind {
            MainKind::Branches { children, .. } => {
                for branch in children.iter() {
                    if let Branch::Nested(child) = *branch {
                        // SAFETY: structural children are live while their
                        // parent is.
                        unsafe { ctx.push(child) };
                    }
                    // Entries are weak: deliberately not pushed.
                }
            }
            MainKind::Tomb { .. } => {}
            MainKind::Chain { next, .. } => {
                // The entry is weak; the continuation of the chain is not.
                unsafe { ctx.push(*next) };
            }
        }
    }
}

/// Tagged result of one attempt at an operation. `Restart` propagates to the
/// public entry loop and never escapes it.
enum Probe {
    Hit(NonNull<Symbol>),
    Miss,
    Restart,
}

fn flag_pos(hash: u64, lev: u32, bitmap: u64) -> (u64, usize) {
    let index = (hash >> lev) & 63;
    let flag = 1u64 << index;
    let pos = (bitmap & (flag - 1)).count_ones() as usize;
    (flag, pos)
}

fn invariant_broken(what: &str) -> ! {
    tracing::error!(target: "loam::intern", what, "ctrie invariant broken");
    std::process::abort();
}

fn alloc_main(kind: MainKind) -> NonNull<MainNode> {
    loam_gc::alloc(MainNode {
        header: GcHeader::new(),
        kind,
    })
}

fn alloc_inode(main: NonNull<MainNode>) -> NonNull<Inode> {
    loam_gc::alloc(Inode {
        header: GcHeader::new(),
        main: AtomicStrong::new(main.as_ptr()),
    })
}

/// Barrier duty for a copied child: nested nodes are strong edges, entries
/// are weak and deliberately left unshaded.
unsafe fn shade_branch(branch: Branch) {
    if let Branch::Nested(child) = branch {
        // SAFETY: caller copies children out of a live node.
        shade(unsafe { &*child });
    }
}

/// Allocate a branches node from an assembled child list, shading every
/// strong child (the copy is a store of each edge).
unsafe fn install_branches(bitmap: u64, children: Vec<Branch>) -> NonNull<MainNode> {
    for &branch in &children {
        unsafe { shade_branch(branch) };
    }
    alloc_main(MainKind::Branches {
        bitmap,
        children: children.into_boxed_slice(),
    })
}

/// Wrap a lone surviving entry in a tomb. The entry edge is weak.
fn entomb(entry: *const Symbol) -> NonNull<MainNode> {
    alloc_main(MainKind::Tomb { entry })
}

/// Contract: a single-entry branches node below the root becomes a tomb.
unsafe fn contracted(bitmap: u64, children: Vec<Branch>, lev: u32) -> NonNull<MainNode> {
    if lev > 0 && children.len() == 1 {
        if let Branch::Entry(entry) = children[0] {
            return entomb(entry);
        }
    }
    unsafe { install_branches(bitmap, children) }
}

/// Build the discriminating structure for two symbols that share a hash
/// prefix up to `lev`.
unsafe fn make_pair(a: *const Symbol, b: *const Symbol, lev: u32) -> NonNull<MainNode> {
    if lev >= CHAIN_LEVEL {
        // Out of hash bits: collision chain.
        let tail = alloc_main(MainKind::Chain {
            entry: a,
            next: ptr::null(),
        });
        return alloc_main(MainKind::Chain {
            entry: b,
            next: tail.as_ptr(),
        });
    }
    let (ha, hb) = unsafe { ((*a).hash(), (*b).hash()) };
    let ia = (ha >> lev) & 63;
    let ib = (hb >> lev) & 63;
    if ia != ib {
        let (first, second) = if ia < ib { (a, b) } else { (b, a) };
        unsafe {
            install_branches(
                (1u64 << ia) | (1u64 << ib),
                vec![Branch::Entry(first), Branch::Entry(second)],
            )
        }
    } else {
        let sub = unsafe { make_pair(a, b, lev + BRANCH_BITS) };
        let child = alloc_inode(sub);
        unsafe { install_branches(1u64 << ia, vec![Branch::Nested(child.as_ptr())]) }
    }
}

/// CAS a freshly built main node into `inode`, yielding `hit` on success.
unsafe fn cas_main(
    inode: &Inode,
    expected: *mut MainNode,
    desired: *const MainNode,
    hit: Probe,
) -> Probe {
    // SAFETY: both pointers are live main nodes; the barrier shades them.
    if unsafe {
        inode
            .main
            .compare_exchange(
                expected,
                desired.cast_mut(),
                Ordering::Release,
                Ordering::Relaxed,
            )
            .is_ok()
    } {
        hit
    } else {
        Probe::Restart
    }
}

/// Remove the tomb under `inode` by resurrecting its entry into the parent.
unsafe fn clean(inode: &Inode, lev: u32) {
    let main_ptr = inode.main.load(Ordering::Acquire);
    let main = unsafe { &*main_ptr };
    if let MainKind::Branches { bitmap, children } = &main.kind {
        let resurrected = children
            .iter()
            .map(|&branch| unsafe { resurrect(branch) })
            .collect();
        let desired = unsafe { contracted(*bitmap, resurrected, lev) };
        // SAFETY: per cas_main.
        let _ = unsafe {
            inode.main.compare_exchange(
                main_ptr,
                desired.as_ptr(),
                Ordering::Release,
                Ordering::Relaxed,
            )
        };
    }
}

/// A nested child whose main is a tomb collapses back to its entry.
unsafe fn resurrect(branch: Branch) -> Branch {
    match branch {
        Branch::Nested(child) => {
            let main = unsafe { &*(*child).main.load(Ordering::Acquire) };
            match main.kind {
                MainKind::Tomb { entry } => Branch::Entry(entry),
                _ => branch,
            }
        }
        Branch::Entry(_) => branch,
    }
}

/// After a removal left a tomb at `inode`, splice the tombed entry directly
/// into `parent`, recontracting as needed. Retries until the parent no
/// longer references `inode` or the splice lands.
unsafe fn clean_parent(parent: &Inode, inode: &Inode, hash: u64, lev: u32) {
    loop {
        let main = unsafe { &*inode.main.load(Ordering::Acquire) };
        let parent_main_ptr = parent.main.load(Ordering::Acquire);
        let parent_main = unsafe { &*parent_main_ptr };
        let MainKind::Branches { bitmap, children } = &parent_main.kind else {
            return;
        };
        let (flag, pos) = flag_pos(hash, lev, *bitmap);
        if bitmap & flag == 0 {
            return;
        }
        let Branch::Nested(at) = children[pos] else {
            return;
        };
        if !ptr::eq(at, inode) {
            return;
        }
        let MainKind::Tomb { entry } = main.kind else {
            return;
        };
        let mut patched = children.to_vec();
        patched[pos] = Branch::Entry(entry);
        let desired = unsafe { contracted(*bitmap, patched, lev) };
        // SAFETY: per cas_main.
        if unsafe {
            parent
                .main
                .compare_exchange(
                    parent_main_ptr,
                    desired.as_ptr(),
                    Ordering::Release,
                    Ordering::Relaxed,
                )
                .is_ok()
        } {
            return;
        }
    }
}

unsafe fn ilookup(inode: &Inode, query: &Query<'_>, lev: u32, parent: Option<&Inode>) -> Probe {
    let main = unsafe { &*inode.main.load(Ordering::Acquire) };
    match &main.kind {
        MainKind::Branches { bitmap, children } => {
            let (flag, pos) = flag_pos(query.hash, lev, *bitmap);
            if bitmap & flag == 0 {
                return Probe::Miss;
            }
            match children[pos] {
                Branch::Nested(child) => unsafe {
                    ilookup(&*child, query, lev + BRANCH_BITS, Some(inode))
                },
                Branch::Entry(entry) => {
                    let symbol = unsafe { &*entry };
                    if symbol.view() == query.view && symbol.try_upgrade() {
                        Probe::Hit(NonNull::from(symbol))
                    } else {
                        Probe::Miss
                    }
                }
            }
        }
        MainKind::Tomb { .. } => {
            if let Some(parent) = parent {
                unsafe { clean(parent, lev - BRANCH_BITS) };
            }
            Probe::Restart
        }
        MainKind::Chain { .. } => unsafe { chain_lookup(main, query) },
    }
}

unsafe fn chain_lookup(head: &MainNode, query: &Query<'_>) -> Probe {
    let mut node = head;
    loop {
        let MainKind::Chain { entry, next } = node.kind else {
            invariant_broken("non-chain node in a collision list");
        };
        let symbol = unsafe { &*entry };
        if symbol.view() == query.view {
            return if symbol.try_upgrade() {
                Probe::Hit(NonNull::from(symbol))
            } else {
                Probe::Miss
            };
        }
        if next.is_null() {
            return Probe::Miss;
        }
        node = unsafe { &*next };
    }
}

unsafe fn iinsert(
    inode: &Inode,
    query: &Query<'_>,
    owner: *const Ctrie,
    lev: u32,
    parent: Option<&Inode>,
) -> Probe {
    let main_ptr = inode.main.load(Ordering::Acquire);
    let main = unsafe { &*main_ptr };
    match &main.kind {
        MainKind::Branches { bitmap, children } => {
            let (flag, pos) = flag_pos(query.hash, lev, *bitmap);
            if bitmap & flag == 0 {
                // Empty slot: insert a fresh symbol.
                let fresh = Symbol::with_owner(owner, query);
                let mut assembled = Vec::with_capacity(children.len() + 1);
                assembled.extend_from_slice(&children[..pos]);
                assembled.push(Branch::Entry(fresh.as_ptr()));
                assembled.extend_from_slice(&children[pos..]);
                let desired = unsafe { install_branches(bitmap | flag, assembled) };
                return unsafe { cas_main(inode, main_ptr, desired.as_ptr(), Probe::Hit(fresh)) };
            }
            match children[pos] {
                Branch::Nested(child) => unsafe {
                    iinsert(&*child, query, owner, lev + BRANCH_BITS, Some(inode))
                },
                Branch::Entry(entry) => {
                    let symbol = unsafe { &*entry };
                    if symbol.view() == query.view {
                        if symbol.try_upgrade() {
                            return Probe::Hit(NonNull::from(symbol));
                        }
                        // Red: the sweep claimed it. Install a replacement in
                        // the same slot.
                        let fresh = Symbol::with_owner(owner, query);
                        let mut patched = children.to_vec();
                        patched[pos] = Branch::Entry(fresh.as_ptr());
                        let desired = unsafe { install_branches(*bitmap, patched) };
                        unsafe { cas_main(inode, main_ptr, desired.as_ptr(), Probe::Hit(fresh)) }
                    } else {
                        // Distinct view sharing the slot: grow a level.
                        let fresh = Symbol::with_owner(owner, query);
                        let sub = unsafe { make_pair(entry, fresh.as_ptr(), lev + BRANCH_BITS) };
                        let child = alloc_inode(sub);
                        let mut patched = children.to_vec();
                        patched[pos] = Branch::Nested(child.as_ptr());
                        let desired = unsafe { install_branches(*bitmap, patched) };
                        unsafe { cas_main(inode, main_ptr, desired.as_ptr(), Probe::Hit(fresh)) }
                    }
                }
            }
        }
        MainKind::Tomb { .. } => {
            if let Some(parent) = parent {
                unsafe { clean(parent, lev - BRANCH_BITS) };
            }
            Probe::Restart
        }
        MainKind::Chain { .. } => unsafe { chain_insert(inode, main_ptr, query, owner) },
    }
}

unsafe fn chain_insert(
    inode: &Inode,
    main_ptr: *mut MainNode,
    query: &Query<'_>,
    owner: *const Ctrie,
) -> Probe {
    let mut node = unsafe { &*main_ptr };
    loop {
        let MainKind::Chain { entry, next } = node.kind else {
            invariant_broken("non-chain node in a collision list");
        };
        let symbol = unsafe { &*entry };
        if symbol.view() == query.view {
            if symbol.try_upgrade() {
                return Probe::Hit(NonNull::from(symbol));
            }
            // Replace the red entry, copying the prefix of the chain.
            let fresh = Symbol::with_owner(owner, query);
            let desired = unsafe { chain_replaced(main_ptr, entry, fresh.as_ptr()) };
            return unsafe { cas_main(inode, main_ptr, desired.as_ptr(), Probe::Hit(fresh)) };
        }
        if next.is_null() {
            // Absent: prepend.
            let fresh = Symbol::with_owner(owner, query);
            shade(unsafe { &*main_ptr });
            let head = alloc_main(MainKind::Chain {
                entry: fresh.as_ptr(),
                next: main_ptr,
            });
            return unsafe { cas_main(inode, main_ptr, head.as_ptr(), Probe::Hit(fresh)) };
        }
        node = unsafe { &*next };
    }
}

/// Copy the chain up to `victim`, substituting `replacement` for it and
/// sharing the tail beyond it.
unsafe fn chain_replaced(
    head: *const MainNode,
    victim: *const Symbol,
    replacement: *const Symbol,
) -> NonNull<MainNode> {
    let mut prefix = Vec::new();
    let mut node = head;
    loop {
        let MainKind::Chain { entry, next } = (unsafe { &*node }).kind else {
            invariant_broken("non-chain node in a collision list");
        };
        if ptr::eq(entry, victim) {
            if !next.is_null() {
                shade(unsafe { &*next });
            }
            let mut rebuilt = alloc_main(MainKind::Chain {
                entry: replacement,
                next,
            });
            for &carried in prefix.iter().rev() {
                rebuilt = alloc_main(MainKind::Chain {
                    entry: carried,
                    next: rebuilt.as_ptr(),
                });
            }
            return rebuilt;
        }
        prefix.push(entry);
        if next.is_null() {
            invariant_broken("chain replacement target vanished mid-copy");
        }
        node = next;
    }
}

enum ChainRemoval {
    NotFound,
    /// One entry would remain; it gets entombed instead of chained.
    Single(*const Symbol),
    Rebuilt(*const MainNode),
}

/// Copy the chain without `victim`. Chains are immutable, so "without" means
/// copying the prefix and sharing the tail.
unsafe fn chain_without(head: *const MainNode, victim: *const Symbol) -> ChainRemoval {
    let mut prefix = Vec::new();
    let mut node = head;
    let tail;
    loop {
        let MainKind::Chain { entry, next } = (unsafe { &*node }).kind else {
            invariant_broken("non-chain node in a collision list");
        };
        if ptr::eq(entry, victim) {
            tail = next;
            break;
        }
        prefix.push(entry);
        if next.is_null() {
            return ChainRemoval::NotFound;
        }
        node = next;
    }
    // Stored chains always hold at least two entries, so exactly one of
    // prefix/tail can be empty at the same time as the other holds one.
    if prefix.is_empty() {
        if tail.is_null() {
            invariant_broken("collision chain with a single entry");
        }
        let MainKind::Chain { entry, next } = (unsafe { &*tail }).kind else {
            invariant_broken("non-chain node in a collision list");
        };
        if next.is_null() {
            return ChainRemoval::Single(entry);
        }
        return ChainRemoval::Rebuilt(tail);
    }
    if prefix.len() == 1 && tail.is_null() {
        return ChainRemoval::Single(prefix[0]);
    }
    if !tail.is_null() {
        shade(unsafe { &*tail });
    }
    let mut rebuilt: *const MainNode = tail;
    for &carried in prefix.iter().rev() {
        rebuilt = alloc_main(MainKind::Chain {
            entry: carried,
            next: rebuilt,
        })
        .as_ptr();
    }
    ChainRemoval::Rebuilt(rebuilt)
}

unsafe fn iremove(inode: &Inode, victim: &Symbol, lev: u32, parent: Option<&Inode>) -> Probe {
    let main_ptr = inode.main.load(Ordering::Acquire);
    let main = unsafe { &*main_ptr };
    let result = match &main.kind {
        MainKind::Branches { bitmap, children } => {
            let (flag, pos) = flag_pos(victim.hash(), lev, *bitmap);
            if bitmap & flag == 0 {
                return Probe::Miss;
            }
            match children[pos] {
                Branch::Nested(child) => unsafe {
                    iremove(&*child, victim, lev + BRANCH_BITS, Some(inode))
                },
                Branch::Entry(entry) => {
                    if !ptr::eq(entry, victim) {
                        return Probe::Miss;
                    }
                    let mut assembled = Vec::with_capacity(children.len() - 1);
                    assembled.extend_from_slice(&children[..pos]);
                    assembled.extend_from_slice(&children[pos + 1..]);
                    let desired = unsafe { contracted(bitmap ^ flag, assembled, lev) };
                    unsafe {
                        cas_main(
                            inode,
                            main_ptr,
                            desired.as_ptr(),
                            Probe::Hit(NonNull::from(victim)),
                        )
                    }
                }
            }
        }
        MainKind::Tomb { .. } => {
            if let Some(parent) = parent {
                unsafe { clean(parent, lev - BRANCH_BITS) };
            }
            Probe::Restart
        }
        MainKind::Chain { .. } => match unsafe { chain_without(main_ptr, victim) } {
            ChainRemoval::NotFound => Probe::Miss,
            ChainRemoval::Single(entry) => {
                let desired = entomb(entry);
                unsafe {
                    cas_main(
                        inode,
                        main_ptr,
                        desired.as_ptr(),
                        Probe::Hit(NonNull::from(victim)),
                    )
                }
            }
            ChainRemoval::Rebuilt(rebuilt) => unsafe {
                cas_main(inode, main_ptr, rebuilt, Probe::Hit(NonNull::from(victim)))
            },
        },
    };
    // A successful removal may have left a tomb here; splice it into the
    // parent so the structure stays compressed.
    if let Probe::Hit(_) = result {
        let now = unsafe { &*inode.main.load(Ordering::Acquire) };
        if matches!(now.kind, MainKind::Tomb { .. }) {
            if let Some(parent) = parent {
                unsafe { clean_parent(parent, inode, victim.hash(), lev - BRANCH_BITS) };
            }
        }
    }
    result
}

impl Ctrie {
    /// Allocate an empty trie. Must run between `enter`/`leave` (or on the
    /// collector thread).
    pub fn new() -> NonNull<Ctrie> {
        let empty = alloc_main(MainKind::Branches {
            bitmap: 0,
            children: Vec::new().into_boxed_slice(),
        });
        let root = alloc_inode(empty);
        loam_gc::alloc(Ctrie {
            header: GcHeader::new(),
            root: Strong::new(root.as_ptr()),
        })
    }

    fn root(&self) -> &Inode {
        let root = self.root.get();
        if root.is_null() {
            invariant_broken("trie root unset");
        }
        // SAFETY: the root I-node is strongly held by the trie for its whole
        // lifetime.
        unsafe { &*root }
    }

    /// Find the unique live symbol whose view equals `query.view`.
    ///
    /// A hit upgrades the symbol (white→black) so it survives the cycle in
    /// progress; a red symbol reads as absent.
    pub fn lookup(&self, query: &Query<'_>) -> Option<NonNull<Symbol>> {
        loop {
            // SAFETY: the trie structure is live while `self` is.
            match unsafe { ilookup(self.root(), query, 0, None) } {
                Probe::Hit(symbol) => return Some(symbol),
                Probe::Miss => return None,
                Probe::Restart => continue,
            }
        }
    }

    /// Return the existing symbol for `query.view`, or install and return a
    /// fresh one. At most one live symbol per view exists at any time.
    pub fn emplace(&self, query: &Query<'_>) -> NonNull<Symbol> {
        loop {
            // SAFETY: as for lookup.
            match unsafe { iinsert(self.root(), query, self, 0, None) } {
                Probe::Hit(symbol) => return symbol,
                Probe::Miss => invariant_broken("insert reported miss"),
                Probe::Restart => continue,
            }
        }
    }

    /// Identity-based removal: succeeds only if this exact symbol is still
    /// present. Used by the sweep to excise symbols it has claimed.
    pub fn remove(&self, symbol: &Symbol) -> Option<NonNull<Symbol>> {
        loop {
            // SAFETY: as for lookup.
            match unsafe { iremove(self.root(), symbol, 0, None) } {
                Probe::Hit(removed) => return Some(removed),
                Probe::Miss => return None,
                Probe::Restart => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These tests exercise trie structure only: each test thread enters as a
    // mutator, but no collector runs in unit-test binaries, so nothing is
    // ever swept and forced hashes steer node placement deterministically.

    fn trie() -> &'static Ctrie {
        loam_gc::enter();
        unsafe { Ctrie::new().as_ref() }
    }

    #[test]
    fn emplace_then_lookup_returns_same_symbol() {
        let t = trie();
        let q = Query::new(b"hello");
        let a = t.emplace(&q);
        let b = t.lookup(&q).expect("interned view must be found");
        assert_eq!(a, b);
        assert_eq!(unsafe { a.as_ref() }.view(), b"hello");
    }

    #[test]
    fn emplace_is_idempotent_per_view() {
        let t = trie();
        let a = t.emplace(&Query::new(b"x"));
        let b = t.emplace(&Query::new(b"x"));
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_views_get_distinct_symbols() {
        let t = trie();
        let a = t.emplace(&Query::new(b"left"));
        let b = t.emplace(&Query::new(b"right"));
        assert_ne!(a, b);
        assert!(t.lookup(&Query::new(b"left")).is_some());
        assert!(t.lookup(&Query::new(b"right")).is_some());
    }

    #[test]
    fn removal_is_by_identity() {
        let t = trie();
        let a = t.emplace(&Query::new(b"gone"));
        assert_eq!(t.remove(unsafe { a.as_ref() }), Some(a));
        assert!(t.lookup(&Query::new(b"gone")).is_none());
        // Second removal of the same pointer finds nothing.
        assert_eq!(t.remove(unsafe { a.as_ref() }), None);
    }

    #[test]
    fn removing_last_entry_leaves_usable_empty_root() {
        let t = trie();
        let q = Query::new(b"only");
        let a = t.emplace(&q);
        t.remove(unsafe { a.as_ref() });
        assert!(t.lookup(&q).is_none());
        let b = t.emplace(&q);
        assert_ne!(a, b);
        assert_eq!(t.lookup(&q), Some(b));
    }

    #[test]
    fn forced_collisions_chain_and_resolve() {
        let t = trie();
        // Identical full hashes: discrimination runs out of bits and both
        // land in one collision chain at the deepest level.
        let qa = Query::with_hash(0xdead_beef, b"alpha");
        let qb = Query::with_hash(0xdead_beef, b"beta");
        let a = t.emplace(&qa);
        let b = t.emplace(&qb);
        assert_ne!(a, b);
        assert_eq!(t.lookup(&qa), Some(a));
        assert_eq!(t.lookup(&qb), Some(b));
        // Identity-removal of one keeps the other reachable.
        assert_eq!(t.remove(unsafe { a.as_ref() }), Some(a));
        assert!(t.lookup(&qa).is_none());
        assert_eq!(t.lookup(&qb), Some(b));
    }

    #[test]
    fn triple_collision_chain_survives_middle_removal() {
        let t = trie();
        let qs = [
            Query::with_hash(7, b"one"),
            Query::with_hash(7, b"two"),
            Query::with_hash(7, b"three"),
        ];
        let syms: Vec<_> = qs.iter().map(|q| t.emplace(q)).collect();
        assert_eq!(t.remove(unsafe { syms[1].as_ref() }), Some(syms[1]));
        assert_eq!(t.lookup(&qs[0]), Some(syms[0]));
        assert!(t.lookup(&qs[1]).is_none());
        assert_eq!(t.lookup(&qs[2]), Some(syms[2]));
    }

    #[test]
    fn partial_hash_collisions_split_below_root() {
        let t = trie();
        // Same low 6 bits, different at the second level.
        let qa = Query::with_hash(0b000001, b"a");
        let qb = Query::with_hash(0b000001 | (1 << 6), b"b");
        let a = t.emplace(&qa);
        let b = t.emplace(&qb);
        assert_eq!(t.lookup(&qa), Some(a));
        assert_eq!(t.lookup(&qb), Some(b));
        // Removing one contracts the nested level away; the survivor is
        // still reachable and a reinsert works.
        assert_eq!(t.remove(unsafe { b.as_ref() }), Some(b));
        assert_eq!(t.lookup(&qa), Some(a));
        assert!(t.lookup(&qb).is_none());
        let b2 = t.emplace(&qb);
        assert_ne!(b, b2);
        assert_eq!(t.lookup(&qb), Some(b2));
    }
}
