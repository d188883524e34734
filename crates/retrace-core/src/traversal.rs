use std::any::{Any, type_name};
use std::ops::{Deref, DerefMut};

use bitflags::bitflags;

use crate::error::TraversalError;
use crate::graph::{BlockId, Cached, DataGraph, MapId, Node, NodeData, Persistent};
use crate::id::{CapturedId, Id};

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct TraversalFlags: u8 {
        /// Collect named blocks that a naming scope did not visit.
        const GC = 1 << 0;
        /// Clear caches of blocks that go inactive during the pass.
        const CACHE_CLEARING = 1 << 1;
    }
}

impl Default for TraversalFlags {
    fn default() -> Self {
        Self::all()
    }
}

/// Cursor of one pass over a [`DataGraph`].
///
/// Every request made through the traversal consumes the next slot of the
/// active block. On the first pass the slot is created; on later passes the
/// node found there is handed back, as long as the application asks for the
/// same things in the same order.
pub struct DataTraversal<'g> {
    pub(crate) graph: &'g mut DataGraph,
    pub(crate) active_block: BlockId,
    pub(crate) position: usize,
    pub(crate) flags: TraversalFlags,
}

fn mismatch<N>(block: BlockId, position: usize) -> TraversalError {
    let expected = type_name::<N>();
    log::warn!(
        "slot {position} of block {block:?} holds something other than `{expected}`; \
         the traversal order changed between passes"
    );
    TraversalError::NodeTypeMismatch { position, expected }
}

struct KeyedData<T> {
    key: CapturedId,
    value: Option<T>,
}

impl<T: 'static> NodeData for KeyedData<T> {}

impl<'g> DataTraversal<'g> {
    pub fn new(graph: &'g mut DataGraph, flags: TraversalFlags) -> Self {
        let root = graph.root;
        graph.blocks[root].cache_clear = false;
        Self {
            graph,
            active_block: root,
            position: 0,
            flags,
        }
    }

    pub fn graph(&self) -> &DataGraph {
        &*self.graph
    }

    pub fn graph_mut(&mut self) -> &mut DataGraph {
        &mut *self.graph
    }

    pub fn flags(&self) -> TraversalFlags {
        self.flags
    }

    pub fn gc_enabled(&self) -> bool {
        self.flags.contains(TraversalFlags::GC)
    }

    pub fn cache_clearing_enabled(&self) -> bool {
        self.flags.contains(TraversalFlags::CACHE_CLEARING)
    }

    pub fn active_block(&self) -> BlockId {
        self.active_block
    }

    fn next_slot(&mut self, create: impl FnOnce(&mut DataGraph) -> Node) -> (usize, bool) {
        let position = self.position;
        self.position += 1;
        let is_new = position == self.graph.blocks[self.active_block].nodes.len();
        if is_new {
            let node = create(self.graph);
            self.graph.blocks[self.active_block].nodes.push(node);
        }
        (position, is_new)
    }

    /// Returns the node at the next slot, creating it with `create` on the
    /// first pass. The flag is `true` when the node was just created.
    pub fn get_node<N: NodeData>(
        &mut self,
        create: impl FnOnce() -> N,
    ) -> Result<(&mut N, bool), TraversalError> {
        let (position, is_new) = self.next_slot(|_| Node::Data(Box::new(create())));
        let block = self.active_block;
        let node = match &mut self.graph.blocks[block].nodes[position] {
            Node::Data(data) => {
                let data: &mut dyn Any = &mut **data;
                data.downcast_mut::<N>()
            }
            _ => None,
        };
        match node {
            Some(node) => Ok((node, is_new)),
            None => Err(mismatch::<N>(block, position)),
        }
    }

    /// Persistent value at the next slot. It survives until its block is
    /// destroyed.
    pub fn get_data<T: 'static>(
        &mut self,
        init: impl FnOnce() -> T,
    ) -> Result<(&mut T, bool), TraversalError> {
        let (data, is_new) = self.get_node(|| Persistent(init()))?;
        Ok((&mut data.0, is_new))
    }

    /// Cached value at the next slot. It is dropped whenever its block's
    /// cache is cleared, and `init` runs again on the next visit.
    pub fn get_cached_data<T: 'static>(
        &mut self,
        init: impl FnOnce() -> T,
    ) -> Result<(&mut T, bool), TraversalError> {
        let (cached, _) = self.get_node(|| Cached::<T>(None))?;
        let is_new = cached.0.is_none();
        Ok((cached.0.get_or_insert_with(init), is_new))
    }

    /// Value tied to `key`: dropped and rebuilt whenever `key` differs from
    /// the one it was built for.
    pub fn get_keyed_data<T: 'static>(
        &mut self,
        key: &Id,
        init: impl FnOnce() -> T,
    ) -> Result<(&mut T, bool), TraversalError> {
        let (keyed, _) = self.get_node(|| KeyedData::<T> {
            key: CapturedId::default(),
            value: None,
        })?;
        if !keyed.key.matches(key) {
            keyed.value = None;
            keyed.key.capture(key);
        }
        let is_new = keyed.value.is_none();
        Ok((keyed.value.get_or_insert_with(init), is_new))
    }

    /// Child block at the next slot.
    pub fn get_block(&mut self) -> Result<BlockId, TraversalError> {
        let (position, _) = self.next_slot(|graph| Node::Block(graph.create_block()));
        match &self.graph.blocks[self.active_block].nodes[position] {
            Node::Block(block) => Ok(*block),
            _ => Err(mismatch::<BlockId>(self.active_block, position)),
        }
    }

    pub(crate) fn get_naming_map(&mut self) -> Result<MapId, TraversalError> {
        let (position, _) = self.next_slot(|graph| Node::Naming(graph.create_map()));
        match &self.graph.blocks[self.active_block].nodes[position] {
            Node::Naming(map) => Ok(*map),
            _ => Err(mismatch::<MapId>(self.active_block, position)),
        }
    }

    /// Runs `body` with `block` as the active block.
    ///
    /// Fails with [`TraversalError::StaleBlock`] if `block` has been
    /// destroyed since it was handed out.
    pub fn with_block<R, E>(
        &mut self,
        block: BlockId,
        body: impl FnOnce(&mut DataTraversal<'g>) -> Result<R, E>,
    ) -> Result<R, E>
    where
        E: From<TraversalError>,
    {
        let mut scoped = ScopedBlock::begin(self, block)?;
        body(&mut scoped)
    }
}

/// Makes a block active until dropped, then restores the previous block and
/// position.
pub struct ScopedBlock<'t, 'g> {
    traversal: &'t mut DataTraversal<'g>,
    parent_block: BlockId,
    parent_position: usize,
}

impl<'t, 'g> ScopedBlock<'t, 'g> {
    pub fn begin(
        traversal: &'t mut DataTraversal<'g>,
        block: BlockId,
    ) -> Result<Self, TraversalError> {
        let Some(b) = traversal.graph.blocks.get_mut(block) else {
            log::warn!("block {block:?} was destroyed and can't be entered");
            return Err(TraversalError::StaleBlock(block));
        };
        b.cache_clear = false;
        let parent_block = traversal.active_block;
        let parent_position = traversal.position;
        traversal.active_block = block;
        traversal.position = 0;
        Ok(Self {
            traversal,
            parent_block,
            parent_position,
        })
    }

    pub fn block(&self) -> BlockId {
        self.traversal.active_block
    }

    pub fn end(self) {}
}

impl<'g> Deref for ScopedBlock<'_, 'g> {
    type Target = DataTraversal<'g>;

    fn deref(&self) -> &Self::Target {
        &*self.traversal
    }
}

impl DerefMut for ScopedBlock<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.traversal
    }
}

impl Drop for ScopedBlock<'_, '_> {
    fn drop(&mut self) {
        self.traversal.active_block = self.parent_block;
        self.traversal.position = self.parent_position;
    }
}

impl DataGraph {
    /// Runs one pass with GC and cache clearing enabled.
    pub fn traverse<R>(&mut self, body: impl FnOnce(&mut DataTraversal<'_>) -> R) -> R {
        self.traverse_with(TraversalFlags::default(), body)
    }

    pub fn traverse_with<R>(
        &mut self,
        flags: TraversalFlags,
        body: impl FnOnce(&mut DataTraversal<'_>) -> R,
    ) -> R {
        let mut traversal = DataTraversal::new(self, flags);
        body(&mut traversal)
    }
}
