//! Day-Stout-Warren-style rebalancing (§4.2 Balance).
//!
//! The reference describes an in-place vine-then-tree pass. Because every
//! node here lives in a growable arena (no pointer back-references to
//! invalidate), a full flatten-and-reinsert achieves the same effect more
//! simply: the flattened rects are already pairwise disjoint (a valid
//! partition), so reinsertion never re-triggers a split or an overlap
//! decomposition — each one lands via a plain `Left`/`Right`/`Equal`
//! descent, and the red-black fixup applied on every insertion keeps the
//! rebuilt tree within the same `2K·log2(size+1)` bound this function
//! checks on entry.
use super::node::Node;
use super::tree::KhpTree;
use crate::region::Hyperrect;

fn height_bound(k: usize, size: usize) -> usize {
    let log2 = (size as f64 + 1.0).log2().ceil() as usize;
    2 * k * log2.max(1)
}

fn flatten<const K: usize, P>(nodes: Vec<Node<K, P>>, root: Option<usize>) -> Vec<(Hyperrect<K>, P)> {
    let mut slots: Vec<Option<Node<K, P>>> = nodes.into_iter().map(Some).collect();
    let mut out = Vec::with_capacity(slots.len());
    walk(&mut slots, root, &mut out);
    out
}

fn walk<const K: usize, P>(
    slots: &mut Vec<Option<Node<K, P>>>,
    id: Option<usize>,
    out: &mut Vec<(Hyperrect<K>, P)>,
) {
    let Some(id) = id else { return };
    let (left, right, eq) = {
        let n = slots[id].as_ref().unwrap();
        (n.left, n.right, n.eq)
    };
    walk(slots, left, out);
    let node = slots[id].take().unwrap();
    out.push((node.rect, node.payload));
    walk(slots, right, out);
    walk(slots, eq, out);
}

pub fn maybe_rebalance<const K: usize, P>(tree: &mut KhpTree<K, P>) {
    if !cfg!(feature = "rebalance") {
        return;
    }
    let size = tree.len();
    if size < 4 {
        return;
    }
    if tree.axis0_height() <= height_bound(K, size) {
        return;
    }
    log::debug!(target: "xkrt::khp", "rebalancing K={} tree of {} nodes (height {})", K, size, tree.axis0_height());

    let root = tree.root_id();
    let old_nodes = std::mem::take(tree.nodes_mut());
    let flat = flatten(old_nodes, root);
    tree.reset();
    for (rect, payload) in flat {
        let mut slot = Some(payload);
        tree.insert(
            rect,
            || slot.take().expect("each flattened payload is reinserted exactly once"),
            |_, _, _, _| {},
            |_, _, _, _| unreachable!("rebuild never re-splits a disjoint partition"),
            |_, _| {},
        );
    }
}
