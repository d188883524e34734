//! Named blocks.
//!
//! A [`NamingScope`] attaches blocks to [`Id`]s instead of positions, so the
//! storage for an item follows it when the item moves, appears or
//! disappears. Each scope remembers the order in which its names were
//! visited. As long as a pass repeats that order, every lookup is a pointer
//! step; the first out-of-order name switches the scope to keyed lookups for
//! the rest of the pass, and the new order becomes the prediction for the
//! next one.
//!
//! With GC enabled, names a pass did not visit are released when the scope
//! ends: [`Lifetime::Scoped`] blocks are destroyed, [`Lifetime::Manual`]
//! blocks lose their caches and stay until
//! [`DataGraph::delete_named_block`](crate::DataGraph::delete_named_block).

use crate::error::TraversalError;
use crate::graph::{DataGraph, EntryId, MapId, NamedEntry};
use crate::id::Id;
use crate::traversal::{DataTraversal, ScopedBlock};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Lifetime {
    /// Destroyed as soon as a pass of its scope does not visit it.
    #[default]
    Scoped,
    /// Kept until explicitly deleted.
    Manual,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeExit {
    Completed,
    Aborted,
}

/// State of one pass over one naming map.
pub struct NamingScope {
    map: MapId,
    graph: u64,
    pass: u64,
    // GC setting in effect when the scope was entered; it holds for the
    // whole pass over the scope
    gc_enabled: bool,
    divergence_detected: bool,
    // unvisited remainder of the previous pass's order
    predicted: Option<EntryId>,
    // head and tail of this pass's order, once it has diverged
    seen: Option<EntryId>,
    last_seen: Option<EntryId>,
}

impl NamingScope {
    /// Enters the naming map at the next slot of the active block.
    pub fn enter(traversal: &mut DataTraversal<'_>) -> Result<Self, TraversalError> {
        let map = traversal.get_naming_map()?;
        let gc_enabled = traversal.gc_enabled();
        let graph = &mut *traversal.graph;
        graph.scope_passes += 1;
        Ok(Self {
            map,
            graph: graph.serial,
            pass: graph.scope_passes,
            gc_enabled,
            divergence_detected: false,
            predicted: graph.maps[map].first,
            seen: None,
            last_seen: None,
        })
    }

    /// Makes the block named `id` active until the returned guard is dropped.
    ///
    /// The block is created on first use; `lifetime` only matters then.
    pub fn begin_named<'t, 'g>(
        &mut self,
        traversal: &'t mut DataTraversal<'g>,
        id: &Id,
        lifetime: Lifetime,
    ) -> Result<ScopedBlock<'t, 'g>, TraversalError> {
        let entry = self.find_named_block(traversal.graph, id, lifetime)?;
        let block = traversal.graph.entries[entry].block;
        ScopedBlock::begin(traversal, block)
    }

    pub fn named_block<'g, R, E>(
        &mut self,
        traversal: &mut DataTraversal<'g>,
        id: &Id,
        lifetime: Lifetime,
        body: impl FnOnce(&mut DataTraversal<'g>) -> Result<R, E>,
    ) -> Result<R, E>
    where
        E: From<TraversalError>,
    {
        let mut block = self.begin_named(traversal, id, lifetime)?;
        body(&mut block)
    }

    fn find_named_block(
        &mut self,
        graph: &mut DataGraph,
        id: &Id,
        lifetime: Lifetime,
    ) -> Result<EntryId, TraversalError> {
        if self.graph != graph.serial || !graph.maps.contains_key(self.map) {
            return Err(TraversalError::ForeignNamingScope);
        }

        if !self.divergence_detected {
            if let Some(predicted) = self.predicted
                && graph.entries[predicted].id == *id
            {
                let entry = &mut graph.entries[predicted];
                entry.visited = self.pass;
                self.predicted = entry.next;
                self.last_seen = Some(predicted);
                return Ok(predicted);
            }

            if !self.gc_enabled {
                log::warn!("named block {id:?} visited out of order while GC is disabled");
                return Err(TraversalError::NamedBlockOutOfOrder);
            }

            // Split the list in two: what was seen so far this pass, and the
            // unvisited rest of the previous order.
            if let Some(last_seen) = self.last_seen {
                self.seen = graph.maps[self.map].first;
                graph.entries[last_seen].next = None;
            }
            if let Some(predicted) = self.predicted {
                graph.entries[predicted].prev = None;
            }
            self.divergence_detected = true;
            graph.stats.divergences += 1;
            log::trace!("naming scope order diverged at {id:?}");
        }

        graph.stats.keyed_lookups += 1;
        let entry = match graph.maps[self.map].index.get(id) {
            Some(&entry) => entry,
            None => {
                let block = graph.create_block();
                let entry = graph.entries.insert(NamedEntry {
                    id: id.clone(),
                    block,
                    prev: None,
                    next: None,
                    manual: lifetime == Lifetime::Manual,
                    visited: 0,
                });
                graph.maps[self.map].index.insert(id.clone(), entry);
                graph.stats.named_blocks_created += 1;
                entry
            }
        };

        if graph.entries[entry].visited == self.pass {
            return Err(TraversalError::DuplicateName(format!("{id:?}")));
        }
        graph.entries[entry].visited = self.pass;

        self.unlink_predicted(graph, entry);
        self.append_seen(graph, entry);
        Ok(entry)
    }

    fn unlink_predicted(&mut self, graph: &mut DataGraph, entry: EntryId) {
        let (prev, next) = {
            let e = &graph.entries[entry];
            (e.prev, e.next)
        };
        if let Some(next) = next {
            graph.entries[next].prev = prev;
        }
        match prev {
            Some(prev) => graph.entries[prev].next = next,
            None if self.predicted == Some(entry) => self.predicted = next,
            None => {}
        }
        let e = &mut graph.entries[entry];
        e.prev = None;
        e.next = None;
    }

    fn append_seen(&mut self, graph: &mut DataGraph, entry: EntryId) {
        match self.last_seen {
            Some(tail) => {
                graph.entries[tail].next = Some(entry);
                graph.entries[entry].prev = Some(tail);
            }
            None => self.seen = Some(entry),
        }
        self.last_seen = Some(entry);
    }

    /// Ends the pass over this scope.
    ///
    /// Nothing is released if GC was disabled when the scope was entered.
    /// An aborted pass that never diverged leaves the map exactly as the
    /// previous pass did.
    pub fn end(mut self, traversal: &mut DataTraversal<'_>, exit: ScopeExit) {
        self.finish(traversal, exit);
    }

    fn finish(&mut self, traversal: &mut DataTraversal<'_>, exit: ScopeExit) {
        if !self.gc_enabled || self.graph != traversal.graph.serial {
            return;
        }
        let graph = &mut *traversal.graph;
        if !graph.maps.contains_key(self.map) {
            return;
        }

        if self.divergence_detected {
            let unvisited = self.predicted.take();
            graph.release_named_block_list(self.map, unvisited);
            graph.maps[self.map].first = self.seen;
        } else if exit == ScopeExit::Completed {
            let Some(unvisited) = self.predicted.take() else {
                return;
            };
            graph.release_named_block_list(self.map, Some(unvisited));
            match self.last_seen {
                Some(last_seen) => {
                    if let Some(e) = graph.entries.get_mut(last_seen) {
                        e.next = None;
                    }
                }
                None => graph.maps[self.map].first = None,
            }
        }
    }
}

struct NamingGuard<'t, 'g> {
    traversal: &'t mut DataTraversal<'g>,
    scope: NamingScope,
    exit: ScopeExit,
}

impl Drop for NamingGuard<'_, '_> {
    fn drop(&mut self) {
        let exit = if std::thread::panicking() {
            ScopeExit::Aborted
        } else {
            self.exit
        };
        self.scope.finish(self.traversal, exit);
    }
}

impl<'g> DataTraversal<'g> {
    /// Runs `body` inside a naming scope at the next slot.
    ///
    /// The scope counts as completed when `body` returns `Ok`, and as aborted
    /// when it returns `Err` or unwinds.
    pub fn naming_context<R, E>(
        &mut self,
        body: impl FnOnce(&mut DataTraversal<'g>, &mut NamingScope) -> Result<R, E>,
    ) -> Result<R, E>
    where
        E: From<TraversalError>,
    {
        let scope = NamingScope::enter(self)?;
        let mut guard = NamingGuard {
            traversal: self,
            scope,
            exit: ScopeExit::Aborted,
        };
        let result = body(&mut *guard.traversal, &mut guard.scope);
        if result.is_ok() {
            guard.exit = ScopeExit::Completed;
        }
        result
    }
}
