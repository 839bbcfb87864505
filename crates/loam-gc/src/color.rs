//! Tricolor encodings.
//!
//! `WHITE` and `BLACK` are not fixed values: they alternate over `{0, 2}`,
//! and the collector swaps which integer means which at the end of every
//! cycle so that surviving black objects become white for the next cycle
//! without a write. `GRAY` and `RED` are fixed.

/// A concurrent object color, stored in every [`GcHeader`](crate::GcHeader).
///
/// The collector publishes the current white encoding; black is always
/// `white ^ 2`.
pub type Color = usize;

/// Reached, children not yet traced.
pub const GRAY: Color = 1;

/// An interned leaf being torn down across two sweeps (see `loam-intern`).
///
/// A red object has been removed from its weak index but is kept in memory
/// for one more full cycle so that concurrent readers holding a stale
/// reference can still inspect it.
pub const RED: Color = 3;

/// Map white to black and back.
#[inline]
pub const fn invert(color: Color) -> Color {
    color ^ 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn white_black_alternate() {
        assert_eq!(invert(0), 2);
        assert_eq!(invert(2), 0);
        assert_eq!(invert(invert(0)), 0);
    }

    #[test]
    fn fixed_colors_disjoint_from_flips() {
        for white in [0, 2] {
            assert_ne!(GRAY, white);
            assert_ne!(GRAY, invert(white));
            assert_ne!(RED, white);
            assert_ne!(RED, invert(white));
        }
    }
}
