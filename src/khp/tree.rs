use super::node::{Color, Edge, Node, NodeId};
use super::rb::fixup_insert;
use super::rebalance;
use crate::region::{Hyperrect, Interval};

enum AxisCase {
    Left,
    Right,
    Equal,
    /// The existing node's interval on this axis strictly contains the
    /// inserted rect's interval: split the node (§4.2 case 4).
    NodeContainsRect,
    /// Neither interval contains the other: decompose into up to a left
    /// overhang, the overlap, and a right overhang (§4.2 case 5).
    Overlap {
        left_overhang: Option<Interval>,
        overlap: Interval,
        right_overhang: Option<Interval>,
    },
}

fn classify(rect_ax: Interval, node_ax: Interval) -> AxisCase {
    if rect_ax.b <= node_ax.a {
        AxisCase::Left
    } else if rect_ax.a >= node_ax.b {
        AxisCase::Right
    } else if rect_ax == node_ax {
        AxisCase::Equal
    } else if node_ax.includes(&rect_ax) {
        AxisCase::NodeContainsRect
    } else {
        let left_overhang = if rect_ax.a < node_ax.a {
            Some(Interval::new(rect_ax.a, node_ax.a))
        } else {
            None
        };
        let right_overhang = if rect_ax.b > node_ax.b {
            Some(Interval::new(node_ax.b, rect_ax.b))
        } else {
            None
        };
        let overlap = rect_ax.intersection(&node_ax);
        AxisCase::Overlap {
            left_overhang,
            overlap,
            right_overhang,
        }
    }
}

fn with_axis<const K: usize>(rect: &Hyperrect<K>, axis: usize, interval: Interval) -> Hyperrect<K> {
    let mut axes = rect.axes;
    axes[axis] = interval;
    Hyperrect::new(axes)
}

fn union<const K: usize>(a: &Hyperrect<K>, b: &Hyperrect<K>) -> Hyperrect<K> {
    let mut axes = a.axes;
    for i in 0..K {
        axes[i] = Interval::new(a.axes[i].a.min(b.axes[i].a), a.axes[i].b.max(b.axes[i].b));
    }
    Hyperrect::new(axes)
}

/// A K-dimensional hyper-partition tree over rects with payload `P`.
pub struct KhpTree<const K: usize, P> {
    nodes: Vec<Node<K, P>>,
    root: Option<NodeId>,
    len: usize,
}

impl<const K: usize, P> Default for KhpTree<K, P> {
    fn default() -> Self {
        KhpTree {
            nodes: Vec::new(),
            root: None,
            len: 0,
        }
    }
}

impl<const K: usize, P> KhpTree<K, P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn root_includes(&self) -> Option<&Hyperrect<K>> {
        self.root.map(|id| &self.nodes[id].includes)
    }

    fn recompute_includes_from(&mut self, mut id: Option<NodeId>) {
        while let Some(cur) = id {
            let mut inc = self.nodes[cur].rect.clone();
            if let Some(l) = self.nodes[cur].left {
                inc = union(&inc, &self.nodes[l].includes);
            }
            if let Some(r) = self.nodes[cur].right {
                inc = union(&inc, &self.nodes[r].includes);
            }
            if let Some(e) = self.nodes[cur].eq {
                inc = union(&inc, &self.nodes[e].includes);
            }
            self.nodes[cur].includes = inc;
            id = self.nodes[cur].parent;
        }
    }

    fn insert_leaf(
        &mut self,
        parent: Option<NodeId>,
        edge: Edge,
        axis: usize,
        rect: Hyperrect<K>,
        payload: P,
    ) -> NodeId {
        let mut node = Node::new(rect, axis, payload);
        node.parent = parent;
        node.parent_edge = edge;
        let id = self.nodes.len();
        self.nodes.push(node);
        match parent {
            None => self.root = Some(id),
            Some(p) => match edge {
                Edge::Left => self.nodes[p].left = Some(id),
                Edge::Right => self.nodes[p].right = Some(id),
                Edge::Eq => {
                    self.nodes[id].color = Color::Black; // tier root
                    self.nodes[p].eq = Some(id);
                }
            },
        }
        self.len += 1;
        id
    }

    /// Ensures `rect` is represented as an exact union of tree nodes
    /// (splitting existing nodes where necessary), invoking `touch` on
    /// every node whose final sub-rect is covered by `rect` (freshly
    /// created leaves use `make_payload()`; nodes produced by a split use
    /// `on_split` to derive the remainder's payload from the original;
    /// `on_shrink` lets the surviving node's payload migrate offsets).
    pub fn insert(
        &mut self,
        rect: Hyperrect<K>,
        mut make_payload: impl FnMut() -> P,
        mut on_shrink: impl FnMut(&mut P, usize, Interval, Interval),
        mut on_split: impl FnMut(&P, usize, Interval, Interval) -> P,
        mut touch: impl FnMut(&mut P, &Hyperrect<K>),
    ) {
        if rect.is_empty() {
            return;
        }
        self.insert_inner(rect, &mut make_payload, &mut on_shrink, &mut on_split, &mut touch);
        rebalance::maybe_rebalance(self);
    }

    fn insert_inner(
        &mut self,
        rect: Hyperrect<K>,
        make_payload: &mut impl FnMut() -> P,
        on_shrink: &mut impl FnMut(&mut P, usize, Interval, Interval),
        on_split: &mut impl FnMut(&P, usize, Interval, Interval) -> P,
        touch: &mut impl FnMut(&mut P, &Hyperrect<K>),
    ) {
        let mut cur = self.root;
        let mut parent = None;
        let mut edge = Edge::Left;
        let mut axis = 0usize;
        let mut rect = rect;

        loop {
            let Some(id) = cur else {
                let new_id = self.insert_leaf(parent, edge, axis, rect.clone(), make_payload());
                touch(&mut self.nodes[new_id].payload, &rect);
                fixup_insert(&mut self.nodes, &mut self.root, new_id);
                self.recompute_includes_from(Some(new_id));
                return;
            };

            let node_ax = self.nodes[id].rect.axes[axis];
            match classify(rect.axes[axis], node_ax) {
                AxisCase::Left => {
                    parent = Some(id);
                    edge = Edge::Left;
                    cur = self.nodes[id].left;
                }
                AxisCase::Right => {
                    parent = Some(id);
                    edge = Edge::Right;
                    cur = self.nodes[id].right;
                }
                AxisCase::Equal => {
                    if axis + 1 == K {
                        touch(&mut self.nodes[id].payload, &rect);
                        self.recompute_includes_from(Some(id));
                        return;
                    }
                    axis += 1;
                    parent = Some(id);
                    edge = Edge::Eq;
                    cur = self.nodes[id].eq;
                }
                AxisCase::NodeContainsRect => {
                    let old_interval = node_ax;
                    let new_interval = rect.axes[axis];

                    let left_remainder = if old_interval.a < new_interval.a {
                        Some(Interval::new(old_interval.a, new_interval.a))
                    } else {
                        None
                    };
                    let right_remainder = if new_interval.b < old_interval.b {
                        Some(Interval::new(new_interval.b, old_interval.b))
                    } else {
                        None
                    };

                    let base_rect = self.nodes[id].rect.clone();
                    let remainder_payloads: Vec<(Hyperrect<K>, P)> = [left_remainder, right_remainder]
                        .into_iter()
                        .flatten()
                        .map(|interval| {
                            let payload = on_split(&self.nodes[id].payload, axis, old_interval, interval);
                            (with_axis(&base_rect, axis, interval), payload)
                        })
                        .collect();

                    on_shrink(&mut self.nodes[id].payload, axis, old_interval, new_interval);
                    self.nodes[id].rect = with_axis(&self.nodes[id].rect.clone(), axis, new_interval);
                    self.recompute_includes_from(Some(id));

                    for (remainder_rect, payload) in remainder_payloads {
                        self.insert_fresh(remainder_rect, payload);
                    }

                    // Restart insertion of the original rect from the root.
                    cur = self.root;
                    parent = None;
                    edge = Edge::Left;
                    axis = 0;
                }
                AxisCase::Overlap {
                    left_overhang,
                    overlap,
                    right_overhang,
                } => {
                    if let Some(lo) = left_overhang {
                        self.insert_inner(with_axis(&rect, axis, lo), make_payload, on_shrink, on_split, touch);
                    }
                    if let Some(ro) = right_overhang {
                        self.insert_inner(with_axis(&rect, axis, ro), make_payload, on_shrink, on_split, touch);
                    }
                    rect = with_axis(&rect, axis, overlap);
                    // Re-classify the same node on the narrowed rect.
                }
            }
        }
    }

    /// Inserts a single already-decomposed rect as a brand new node,
    /// walking from the root (used for split remainders, which the
    /// reference implementation describes as "reinsert ... as new
    /// nodes").
    fn insert_fresh(&mut self, rect: Hyperrect<K>, payload: P) {
        let mut cell = Some(payload);
        self.insert_inner(
            rect,
            &mut || cell.take().expect("insert_fresh payload consumed twice"),
            &mut |_, _, _, _| {},
            &mut |_, _, _, _| unreachable!("fresh insert of an exact rect never re-splits"),
            &mut |_, _| {},
        );
    }

    /// Traverses the tree collecting `(sub_rect, &mut payload)` pairs for
    /// every stored node whose rect intersects `rect`, pruned by the
    /// `includes` bounding box (§4.2 Intersect).
    pub fn intersect(&mut self, rect: &Hyperrect<K>, mut visit: impl FnMut(&Hyperrect<K>, &mut P)) {
        self.intersect_rec(self.root, rect, &mut visit);
    }

    fn intersect_rec(&mut self, id: Option<NodeId>, rect: &Hyperrect<K>, visit: &mut impl FnMut(&Hyperrect<K>, &mut P)) {
        let Some(id) = id else { return };
        if !self.nodes[id].includes.intersects(rect) {
            return;
        }
        if self.nodes[id].rect.intersects(rect) {
            let node_rect = self.nodes[id].rect.clone();
            visit(&node_rect, &mut self.nodes[id].payload);
        }
        self.intersect_rec(self.nodes[id].left, rect, visit);
        self.intersect_rec(self.nodes[id].right, rect, visit);
        self.intersect_rec(self.nodes[id].eq, rect, visit);
    }

    /// Read-only variant of `intersect` for callers that only need shared
    /// access (e.g. `who_owns` tallies).
    pub fn intersect_ref(&self, rect: &Hyperrect<K>, mut visit: impl FnMut(&Hyperrect<K>, &P)) {
        self.intersect_ref_rec(self.root, rect, &mut visit);
    }

    fn intersect_ref_rec(&self, id: Option<NodeId>, rect: &Hyperrect<K>, visit: &mut impl FnMut(&Hyperrect<K>, &P)) {
        let Some(id) = id else { return };
        if !self.nodes[id].includes.intersects(rect) {
            return;
        }
        if self.nodes[id].rect.intersects(rect) {
            visit(&self.nodes[id].rect, &self.nodes[id].payload);
        }
        self.intersect_ref_rec(self.nodes[id].left, rect, visit);
        self.intersect_ref_rec(self.nodes[id].right, rect, visit);
        self.intersect_ref_rec(self.nodes[id].eq, rect, visit);
    }

    /// In-order (by axis-0 key) collection of all `(rect, payload)` used
    /// by the rebalance pass and by tests asserting global invariants.
    pub fn collect_all(&self) -> Vec<(Hyperrect<K>, &P)> {
        let mut out = Vec::with_capacity(self.len);
        self.collect_rec(self.root, &mut out);
        out
    }

    fn collect_rec<'a>(&'a self, id: Option<NodeId>, out: &mut Vec<(Hyperrect<K>, &'a P)>) {
        let Some(id) = id else { return };
        self.collect_rec(self.nodes[id].left, out);
        out.push((self.nodes[id].rect.clone(), &self.nodes[id].payload));
        self.collect_rec(self.nodes[id].right, out);
        self.collect_rec(self.nodes[id].eq, out);
    }

    /// Height of the axis-0 tier only (`left`/`right` edges), used by the
    /// rebalance threshold check (§4.2 Balance).
    pub fn axis0_height(&self) -> usize {
        fn rec<const K: usize, P>(nodes: &[Node<K, P>], id: Option<NodeId>) -> usize {
            match id {
                None => 0,
                Some(id) => 1 + rec(nodes, nodes[id].left).max(rec(nodes, nodes[id].right)),
            }
        }
        rec(&self.nodes, self.root)
    }

    pub(super) fn nodes(&self) -> &[Node<K, P>] {
        &self.nodes
    }

    pub(super) fn root_id(&self) -> Option<NodeId> {
        self.root
    }

    pub(super) fn nodes_mut(&mut self) -> &mut Vec<Node<K, P>> {
        &mut self.nodes
    }

    pub(super) fn reset(&mut self) {
        self.nodes.clear();
        self.root = None;
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::Rect2;

    fn r(x0: i64, x1: i64, y0: i64, y1: i64) -> Rect2 {
        Rect2::new2(Interval::new(x0, x1), Interval::new(y0, y1))
    }

    fn assert_disjoint_and_covers(tree: &KhpTree<2, u32>, inserted: &[Rect2]) {
        let all = tree.collect_all();
        for i in 0..all.len() {
            for j in (i + 1)..all.len() {
                assert!(!all[i].0.intersects(&all[j].0), "nodes must be pairwise disjoint");
            }
        }
        let mut area_nodes = 0i64;
        for (rect, _) in &all {
            area_nodes += rect.row().len() * rect.col().len();
        }
        let mut area_inserted = 0i64;
        for rect in inserted {
            area_inserted += rect.row().len() * rect.col().len();
        }
        assert!(area_nodes <= area_inserted);
    }

    #[test]
    fn insert_disjoint_rects_creates_separate_nodes() {
        let mut tree: KhpTree<2, u32> = KhpTree::new();
        let rects = [r(0, 10, 0, 10), r(20, 30, 0, 10), r(0, 10, 20, 30)];
        for (i, rect) in rects.iter().enumerate() {
            tree.insert(rect.clone(), || i as u32, |_, _, _, _| {}, |_, _, _, iv| iv.len() as u32, |_, _| {});
        }
        assert_eq!(tree.len(), 3);
        assert_disjoint_and_covers(&tree, &rects);
    }

    #[test]
    fn insert_overlapping_rect_splits_existing_node() {
        let mut tree: KhpTree<2, u32> = KhpTree::new();
        tree.insert(r(0, 100, 0, 10), || 1, |_, _, _, _| {}, |_, _, _, iv| iv.len() as u32, |_, _| {});
        // A sub-rect fully contained on axis 0 triggers a split.
        tree.insert(r(20, 40, 0, 10), || 2, |_, _, _, _| {}, |_, _, _, iv| iv.len() as u32, |_, _| {});
        assert!(tree.len() >= 2);
        let all = tree.collect_all();
        for i in 0..all.len() {
            for j in (i + 1)..all.len() {
                assert!(!all[i].0.intersects(&all[j].0));
            }
        }
        let mut hit = false;
        tree.intersect_ref(&r(20, 40, 0, 10), |_, _| hit = true);
        assert!(hit);
    }

    #[test]
    fn intersect_finds_overlapping_nodes_only() {
        let mut tree: KhpTree<2, u32> = KhpTree::new();
        tree.insert(r(0, 10, 0, 10), || 1, |_, _, _, _| {}, |_, _, _, iv| iv.len() as u32, |_, _| {});
        tree.insert(r(100, 110, 0, 10), || 2, |_, _, _, _| {}, |_, _, _, iv| iv.len() as u32, |_, _| {});
        let mut hits = 0;
        tree.intersect_ref(&r(5, 50, 0, 10), |_, _| hits += 1);
        assert_eq!(hits, 1);
    }
}
