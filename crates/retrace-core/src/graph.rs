//! Persistent storage graph.
//!
//! A [`DataGraph`] owns every block, naming map and named entry created by
//! traversals. All of them live in generation-checked arenas and refer to each
//! other by key, so nothing dangles when a block is collected mid-pass.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use slotmap::{SlotMap, new_key_type};
use smallvec::SmallVec;

use crate::id::Id;

new_key_type! {
    /// Handle to a block of persistent storage inside a [`DataGraph`].
    pub struct BlockId;
    pub(crate) struct MapId;
    pub(crate) struct EntryId;
}

static NEXT_GRAPH_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Payload of a storage node.
///
/// `clear_cache` runs when the block holding the node stops being live (an
/// untaken branch, an unvisited named block). Anything the node can
/// regenerate should be released there. Destruction is ordinary `Drop`.
pub trait NodeData: Any {
    fn clear_cache(&mut self) {}
}

/// Value that lives as long as its block.
pub(crate) struct Persistent<T>(pub(crate) T);

impl<T: 'static> NodeData for Persistent<T> {}

/// Value that is dropped whenever its block's cache is cleared.
pub(crate) struct Cached<T>(pub(crate) Option<T>);

impl<T: 'static> NodeData for Cached<T> {
    fn clear_cache(&mut self) {
        self.0 = None;
    }
}

pub(crate) enum Node {
    Data(Box<dyn NodeData>),
    Block(BlockId),
    Naming(MapId),
}

pub(crate) struct DataBlock {
    pub(crate) nodes: Vec<Node>,
    pub(crate) cache_clear: bool,
}

impl DataBlock {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            cache_clear: true,
        }
    }
}

pub(crate) struct NamingMap {
    pub(crate) index: BTreeMap<Id, EntryId>,
    // head of the list of entries in the order they were last visited
    pub(crate) first: Option<EntryId>,
}

pub(crate) struct NamedEntry {
    pub(crate) id: Id,
    pub(crate) block: BlockId,
    pub(crate) prev: Option<EntryId>,
    pub(crate) next: Option<EntryId>,
    pub(crate) manual: bool,
    // stamp of the last naming-scope pass that visited this entry
    pub(crate) visited: u64,
}

/// Counters describing the work the graph has done so far.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GraphStats {
    /// Named-block requests that needed a keyed lookup (slow path).
    pub keyed_lookups: u64,
    /// Naming-scope passes whose order diverged from the previous pass.
    pub divergences: u64,
    pub blocks_created: u64,
    pub blocks_destroyed: u64,
    pub named_blocks_created: u64,
    pub named_blocks_collected: u64,
}

pub struct DataGraph {
    pub(crate) blocks: SlotMap<BlockId, DataBlock>,
    pub(crate) maps: SlotMap<MapId, NamingMap>,
    pub(crate) entries: SlotMap<EntryId, NamedEntry>,
    pub(crate) root: BlockId,
    pub(crate) serial: u64,
    pub(crate) scope_passes: u64,
    pub(crate) stats: GraphStats,
}

impl Default for DataGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl DataGraph {
    pub fn new() -> Self {
        let mut blocks = SlotMap::with_key();
        let root = blocks.insert(DataBlock::new());
        Self {
            blocks,
            maps: SlotMap::with_key(),
            entries: SlotMap::with_key(),
            root,
            serial: NEXT_GRAPH_SERIAL.fetch_add(1, Ordering::Relaxed),
            scope_passes: 0,
            stats: GraphStats {
                blocks_created: 1,
                ..GraphStats::default()
            },
        }
    }

    pub fn stats(&self) -> GraphStats {
        self.stats
    }

    /// Number of blocks currently allocated, the root included.
    pub fn live_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn live_named_blocks(&self) -> usize {
        self.entries.len()
    }

    /// Whether `block`'s cached nodes have been invalidated since the last
    /// pass that entered it.
    pub fn is_cache_clear(&self, block: BlockId) -> bool {
        self.blocks.get(block).is_none_or(|b| b.cache_clear)
    }

    pub(crate) fn create_block(&mut self) -> BlockId {
        self.stats.blocks_created += 1;
        self.blocks.insert(DataBlock::new())
    }

    pub(crate) fn create_map(&mut self) -> MapId {
        self.maps.insert(NamingMap {
            index: BTreeMap::new(),
            first: None,
        })
    }

    /// Invokes `clear_cache` on every node of `block`, last to first, and
    /// on everything nested below it. Blocks that are already clear are
    /// skipped.
    pub fn clear_block_cache(&mut self, block: BlockId) {
        let mut stack: SmallVec<[(BlockId, usize); 16]> = SmallVec::new();
        self.mark_cache_clear(block, &mut stack);

        while let Some(top) = stack.last_mut() {
            let (block, remaining) = *top;
            if remaining == 0 {
                stack.pop();
                continue;
            }
            top.1 = remaining - 1;

            let node = self
                .blocks
                .get_mut(block)
                .and_then(|b| b.nodes.get_mut(remaining - 1));
            match node {
                Some(Node::Data(data)) => data.clear_cache(),
                Some(Node::Block(child)) => {
                    let child = *child;
                    self.mark_cache_clear(child, &mut stack);
                }
                Some(Node::Naming(map)) => {
                    let map = *map;
                    let named: SmallVec<[BlockId; 8]> = match self.maps.get(map) {
                        Some(m) => m
                            .index
                            .values()
                            .rev()
                            .filter_map(|e| self.entries.get(*e))
                            .map(|e| e.block)
                            .collect(),
                        None => SmallVec::new(),
                    };
                    for block in named {
                        self.mark_cache_clear(block, &mut stack);
                    }
                }
                None => {}
            }
        }
    }

    fn mark_cache_clear(&mut self, block: BlockId, stack: &mut SmallVec<[(BlockId, usize); 16]>) {
        if let Some(b) = self.blocks.get_mut(block)
            && !b.cache_clear
        {
            b.cache_clear = true;
            stack.push((block, b.nodes.len()));
        }
    }

    /// Destroys everything stored in `block` but keeps the block itself.
    pub fn clear_block(&mut self, block: BlockId) {
        self.clear_block_cache(block);
        let Some(b) = self.blocks.get_mut(block) else {
            return;
        };
        let nodes = std::mem::take(&mut b.nodes);
        b.cache_clear = true;
        self.destroy_nodes(nodes);
    }

    pub(crate) fn destroy_block(&mut self, block: BlockId) {
        self.clear_block_cache(block);
        if let Some(b) = self.blocks.remove(block) {
            self.stats.blocks_destroyed += 1;
            self.destroy_nodes(b.nodes);
        }
    }

    // Nodes go last to first, and a nested block is emptied completely before
    // its earlier siblings are touched. Uses an explicit stack so that deep
    // nesting (loops are chains of blocks) can't overflow.
    fn destroy_nodes(&mut self, nodes: Vec<Node>) {
        let mut frames: Vec<Vec<Node>> = vec![nodes];
        loop {
            let node = match frames.last_mut() {
                None => break,
                Some(frame) => match frame.pop() {
                    Some(node) => node,
                    None => {
                        frames.pop();
                        continue;
                    }
                },
            };
            match node {
                Node::Data(data) => drop(data),
                Node::Block(child) => {
                    if let Some(b) = self.blocks.remove(child) {
                        self.stats.blocks_destroyed += 1;
                        frames.push(b.nodes);
                    }
                }
                Node::Naming(map) => {
                    if let Some(m) = self.maps.remove(map) {
                        let named = m
                            .index
                            .into_values()
                            .filter_map(|e| self.entries.remove(e))
                            .map(|e| Node::Block(e.block))
                            .collect();
                        frames.push(named);
                    }
                }
            }
        }
    }

    /// Releases a named entry that was not visited: scoped entries are
    /// destroyed along with their storage, manual ones only lose their
    /// caches and drop out of the visitation list.
    pub(crate) fn release_named_block(&mut self, map: MapId, entry: EntryId) {
        let Some(e) = self.entries.get_mut(entry) else {
            return;
        };
        if e.manual {
            e.prev = None;
            e.next = None;
            let block = e.block;
            log::trace!("keeping manual named block {:?}", e.id);
            self.clear_block_cache(block);
            return;
        }
        let Some(e) = self.entries.remove(entry) else {
            return;
        };
        if let Some(m) = self.maps.get_mut(map) {
            m.index.remove(&e.id);
        }
        self.stats.named_blocks_collected += 1;
        log::trace!("collecting named block {:?}", e.id);
        self.destroy_block(e.block);
    }

    pub(crate) fn release_named_block_list(&mut self, map: MapId, head: Option<EntryId>) {
        let mut cursor = head;
        while let Some(entry) = cursor {
            cursor = self.entries.get(entry).and_then(|e| e.next);
            self.release_named_block(map, entry);
        }
    }

    /// Deletes every named block called `id`, in every naming scope of the
    /// graph.
    ///
    /// Blocks that are still part of their scope's visitation order are
    /// not touched beyond losing their manual lifetime, so ordinary GC
    /// reclaims them once they stop being visited.
    pub fn delete_named_block(&mut self, id: &Id) {
        let mut doomed: SmallVec<[(MapId, EntryId); 4]> = SmallVec::new();
        for (map_id, map) in &self.maps {
            let Some(&entry) = map.index.get(id) else {
                continue;
            };
            let Some(e) = self.entries.get_mut(entry) else {
                continue;
            };
            let referenced = map.first == Some(entry) || e.prev.is_some() || e.next.is_some();
            e.manual = false;
            if !referenced {
                doomed.push((map_id, entry));
            }
        }
        log::debug!("deleting {} named block(s) for {:?}", doomed.len(), id);
        for (map, entry) in doomed {
            self.release_named_block(map, entry);
        }
    }
}

impl Drop for DataGraph {
    fn drop(&mut self) {
        let root = self.root;
        self.destroy_block(root);
    }
}
