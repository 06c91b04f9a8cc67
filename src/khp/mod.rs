//! Generic K-dimensional hyper-partition tree (§4.2).
//!
//! A single arena-indexed structure, parameterized over the dimension `K`
//! and a payload type `P`, supporting insert-with-split, a `shrink`
//! callback so payloads can migrate offsets when a node is cut down, and
//! range-intersect traversal pruned by a per-node bounding-box summary.
//!
//! ## Structural note vs. the reference design
//!
//! The reference implementation gives every node "K pairs of children",
//! one `(left, right)` pair per axis tier, so that rects agreeing on axes
//! `0..k` but differing on axis `k` can be told apart by descending into a
//! nested red-black tree keyed on axis `k`. This implementation represents
//! the same structure with three edges per node — `left`, `right` (the
//! red-black pair for the axis this node was placed at) and `eq` (the root
//! of the nested tree for axis+1, used exactly when an inserted rect is
//! equal to this node's rect on this node's axis). This is behaviorally
//! identical (same case analysis, same pruning, same per-tier red-black
//! invariants — rotations never cross an `eq` edge) while avoiding a
//! K-wide array of child pairs on every node. See `DESIGN.md`.
mod node;
mod rb;
mod rebalance;
mod tree;

pub use node::{Color, Edge};
pub use tree::KhpTree;
