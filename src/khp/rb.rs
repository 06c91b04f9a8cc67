//! Red-black rotation and insert-fixup, generic over which of a node's
//! three edges (`Left`/`Right`/`Eq`) currently attaches it to its parent.
//! Rotations only ever swap `Left`/`Right` edges within a single axis
//! tier; the `Eq` edge of the node being rotated (if any) travels with it
//! unchanged, since it roots an independent nested tier.

use super::node::{Color, Edge, Node, NodeId};

fn color<const K: usize, P>(nodes: &[Node<K, P>], id: Option<NodeId>) -> Color {
    match id {
        Some(id) => nodes[id].color,
        None => Color::Black,
    }
}

/// Rewrites whichever slot currently holds `old` (a node's former
/// position relative to its parent, or the tree root) to hold `new`.
fn attach<const K: usize, P>(
    nodes: &mut [Node<K, P>],
    root: &mut Option<NodeId>,
    parent: Option<NodeId>,
    edge: Edge,
    new: Option<NodeId>,
) {
    match parent {
        None => *root = new,
        Some(p) => match edge {
            Edge::Left => nodes[p].left = new,
            Edge::Right => nodes[p].right = new,
            Edge::Eq => nodes[p].eq = new,
        },
    }
    if let Some(n) = new {
        nodes[n].parent = parent;
        nodes[n].parent_edge = edge;
    }
}

fn left_rotate<const K: usize, P>(nodes: &mut [Node<K, P>], root: &mut Option<NodeId>, x: NodeId) {
    let y = nodes[x].right.expect("left_rotate requires a right child");
    let parent = nodes[x].parent;
    let edge = nodes[x].parent_edge;

    nodes[x].right = nodes[y].left;
    if let Some(yl) = nodes[y].left {
        nodes[yl].parent = Some(x);
        nodes[yl].parent_edge = Edge::Right;
    }

    attach(nodes, root, parent, edge, Some(y));

    nodes[y].left = Some(x);
    nodes[x].parent = Some(y);
    nodes[x].parent_edge = Edge::Left;
}

fn right_rotate<const K: usize, P>(nodes: &mut [Node<K, P>], root: &mut Option<NodeId>, x: NodeId) {
    let y = nodes[x].left.expect("right_rotate requires a left child");
    let parent = nodes[x].parent;
    let edge = nodes[x].parent_edge;

    nodes[x].left = nodes[y].right;
    if let Some(yr) = nodes[y].right {
        nodes[yr].parent = Some(x);
        nodes[yr].parent_edge = Edge::Left;
    }

    attach(nodes, root, parent, edge, Some(y));

    nodes[y].right = Some(x);
    nodes[x].parent = Some(y);
    nodes[x].parent_edge = Edge::Right;
}

/// Standard CLRS red-black insert fixup, restricted to the `Left`/`Right`
/// edges of the axis tier `z` belongs to. Stops climbing (treating the
/// ancestor as an implicit black "tier root") the moment it reaches a node
/// attached to its own parent via an `Eq` edge, since that boundary marks
/// the root of this tier — exactly where the red-black root-is-black rule
/// applies independently per axis tier (§4.2, §8).
pub fn fixup_insert<const K: usize, P>(nodes: &mut Vec<Node<K, P>>, root: &mut Option<NodeId>, mut z: NodeId) {
    loop {
        let parent = nodes[z].parent;
        let Some(p) = parent else { break };
        if nodes[z].parent_edge == Edge::Eq {
            break; // z is this tier's root
        }
        if nodes[p].color == Color::Black {
            break;
        }
        // p is red, so p has a parent (red root would already be illegal).
        let gp = match nodes[p].parent {
            Some(gp) if nodes[p].parent_edge != Edge::Eq => gp,
            _ => break,
        };
        let p_is_left = nodes[p].parent_edge == Edge::Left;
        let uncle = if p_is_left { nodes[gp].right } else { nodes[gp].left };

        if color(nodes, uncle) == Color::Red {
            nodes[p].color = Color::Black;
            if let Some(u) = uncle {
                nodes[u].color = Color::Black;
            }
            nodes[gp].color = Color::Red;
            z = gp;
            continue;
        }

        let z_is_left = nodes[z].parent_edge == Edge::Left;
        if p_is_left {
            if !z_is_left {
                left_rotate(nodes, root, p);
                z = p; // p is now the child after rotation
            }
            let p_now = nodes[z].parent.unwrap();
            nodes[p_now].color = Color::Black;
            nodes[gp].color = Color::Red;
            right_rotate(nodes, root, gp);
        } else {
            if z_is_left {
                right_rotate(nodes, root, p);
                z = p;
            }
            let p_now = nodes[z].parent.unwrap();
            nodes[p_now].color = Color::Black;
            nodes[gp].color = Color::Red;
            left_rotate(nodes, root, gp);
        }
        break;
    }

    // Tier root is always black (root-of-tier + true-root invariant).
    let mut r = Some(z);
    while let Some(id) = r {
        match nodes[id].parent {
            Some(p) if nodes[id].parent_edge != Edge::Eq => r = Some(p),
            _ => break,
        }
    }
    if let Some(top) = r {
        nodes[top].color = Color::Black;
    }
}
