//! User data identity (§3 User datum).
//!
//! A user datum is whatever the caller registered as an access target: a
//! raw memory interval, a 2-D matrix tile, or an opaque handle. Identity
//! for dependency/coherency purposes is the `(ld, sizeof_elem)` pair for
//! matrices, the address for intervals, the pointer value for handles —
//! `DatumKey` is exactly that identity, used to key the per-datum
//! dependency and coherency trees.

use crate::region::MatrixTile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatumKey {
    Interval { addr: usize },
    Matrix { ld: i64, sizeof_elem: i64 },
    Handle { ptr: usize },
}

/// A user-visible handle to registered memory, as described by §3. `size`
/// is only meaningful for `Interval`; matrix tiles carry their own extent.
#[derive(Debug, Clone, Copy)]
pub enum UserDatum {
    Interval { addr: usize, size: usize },
    Matrix(MatrixTile),
    Handle { ptr: usize },
}

impl UserDatum {
    pub fn key(&self) -> DatumKey {
        match *self {
            UserDatum::Interval { addr, .. } => DatumKey::Interval { addr },
            UserDatum::Matrix(t) => DatumKey::Matrix { ld: t.ld, sizeof_elem: t.s },
            UserDatum::Handle { ptr } => DatumKey::Handle { ptr },
        }
    }
}
