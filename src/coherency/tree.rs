//! The coherency tree itself (§4.4): a `KhpTree<2, MemoryBlock>` per user
//! datum, registered the same way as the dependency domain.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::coherency::block::MemoryBlock;
use crate::datum::DatumKey;
use crate::khp::KhpTree;
use crate::region::{Interval, Rect2};

pub type CoherencyTree = KhpTree<2, MemoryBlock>;

/// Registry of per-user-datum coherency trees, mirroring
/// `crate::dependency::DomainRegistry`.
#[derive(Default)]
pub struct CoherencyRegistry {
    trees: Mutex<HashMap<DatumKey, Arc<Mutex<CoherencyTree>>>>,
}

impl CoherencyRegistry {
    pub fn new() -> CoherencyRegistry {
        CoherencyRegistry::default()
    }

    pub fn tree_for(&self, key: DatumKey) -> Arc<Mutex<CoherencyTree>> {
        self.trees.lock().entry(key).or_insert_with(|| Arc::new(Mutex::new(CoherencyTree::new()))).clone()
    }
}

/// Inserts `rect` into `tree` as a partition of existing blocks, splitting
/// as needed, then returns the resulting partition via `visit` — used by
/// `Fetch` step 2.a/2.b (§4.4) to both ensure the partition exists and
/// collect it in one pass. `elem_size` scales the axis-0 (byte) offset
/// used to patch replicated allocation views on split (§4.4, `block.rs`).
pub fn insert_and_partition(tree: &mut CoherencyTree, rect: &Rect2, elem_size: i64, mut visit: impl FnMut(&Rect2, &mut MemoryBlock)) {
    tree.insert(
        *rect,
        MemoryBlock::default,
        |_, _, _, _| {},
        move |parent, axis, old_interval, new_interval| {
            let offset = new_interval.a - old_interval.a;
            let (row_offset, col_offset) = if axis == 0 { (offset, 0) } else { (0, offset) };
            parent.split_child(elem_size, row_offset, col_offset)
        },
        |_, _| {},
    );
    tree.intersect(rect, |sub_rect, block| visit(sub_rect, block));
}
