//! Control-flow helpers.
//!
//! Branches, loops and switches each get their own storage so that what the
//! application stores inside them keeps a stable position, whichever way
//! control goes on a given pass.

use std::ops::{Deref, DerefMut};

use crate::error::TraversalError;
use crate::id::Id;
use crate::naming::Lifetime;
use crate::traversal::{DataTraversal, ScopedBlock, TraversalFlags};

impl<'g> DataTraversal<'g> {
    /// Runs `body` in a dedicated block when `condition` holds.
    ///
    /// When it doesn't, the block's caches are cleared (if cache clearing is
    /// on) but its persistent data stays for the next time the branch is
    /// taken.
    pub fn if_block<R, E>(
        &mut self,
        condition: bool,
        body: impl FnOnce(&mut DataTraversal<'g>) -> Result<R, E>,
    ) -> Result<Option<R>, E>
    where
        E: From<TraversalError>,
    {
        let block = self.get_block()?;
        if condition {
            self.with_block(block, body).map(Some)
        } else {
            if self.cache_clearing_enabled() {
                self.graph.clear_block_cache(block);
            }
            Ok(None)
        }
    }

    /// Runs `body` once per item, each iteration in its own block.
    ///
    /// Iteration blocks form a chain, so storage is matched by iteration
    /// index. Blocks left over from a longer previous pass are destroyed when
    /// the loop completes.
    pub fn for_each<I, E>(
        &mut self,
        items: I,
        mut body: impl FnMut(&mut DataTraversal<'g>, I::Item) -> Result<(), E>,
    ) -> Result<(), E>
    where
        I: IntoIterator,
        E: From<TraversalError>,
    {
        let mut block = self.get_block()?;
        for item in items {
            let mut iteration = ScopedBlock::begin(self, block)?;
            let next = iteration.get_block()?;
            body(&mut iteration, item)?;
            iteration.end();
            block = next;
        }
        self.graph.clear_block(block);
        Ok(())
    }

    /// Runs `body` once per item, each iteration in a named block keyed by
    /// `key(&item)`.
    ///
    /// Storage follows items when they move within the sequence, and the
    /// storage of items that disappear is collected. Items without an
    /// identity of their own can be keyed by index through `enumerate`.
    pub fn for_each_keyed<I, E>(
        &mut self,
        items: I,
        mut key: impl FnMut(&I::Item) -> Id,
        mut body: impl FnMut(&mut DataTraversal<'g>, I::Item) -> Result<(), E>,
    ) -> Result<(), E>
    where
        I: IntoIterator,
        E: From<TraversalError>,
    {
        self.naming_context(|traversal, scope| {
            for item in items {
                let id = key(&item);
                scope.named_block(traversal, &id, Lifetime::Scoped, |t| body(t, item))?;
            }
            Ok(())
        })
    }

    /// Runs `body` in the block for `case`.
    ///
    /// Each case keeps its own storage. Cases that are not selected lose
    /// their caches but keep their persistent data.
    pub fn switch_block<R, E>(
        &mut self,
        case: &Id,
        body: impl FnOnce(&mut DataTraversal<'g>) -> Result<R, E>,
    ) -> Result<R, E>
    where
        E: From<TraversalError>,
    {
        self.naming_context(|traversal, scope| {
            scope.named_block(traversal, case, Lifetime::Manual, body)
        })
    }

    /// Runs `body` with garbage collection turned off.
    ///
    /// Naming scopes entered inside `body` keep the names they don't visit,
    /// and must be visited in exactly the order of their previous pass.
    /// Scopes entered before keep the setting they started with.
    pub fn with_gc_disabled<R>(&mut self, body: impl FnOnce(&mut DataTraversal<'g>) -> R) -> R {
        let flags = self.flags - TraversalFlags::GC;
        let mut scoped = ScopedFlags::replace(self, flags);
        body(&mut scoped)
    }

    /// Runs `body` with cache clearing turned off.
    pub fn with_cache_clearing_disabled<R>(
        &mut self,
        body: impl FnOnce(&mut DataTraversal<'g>) -> R,
    ) -> R {
        let flags = self.flags - TraversalFlags::CACHE_CLEARING;
        let mut scoped = ScopedFlags::replace(self, flags);
        body(&mut scoped)
    }
}

/// Overrides the traversal flags until dropped.
struct ScopedFlags<'t, 'g> {
    traversal: &'t mut DataTraversal<'g>,
    saved: TraversalFlags,
}

impl<'t, 'g> ScopedFlags<'t, 'g> {
    fn replace(traversal: &'t mut DataTraversal<'g>, flags: TraversalFlags) -> Self {
        let saved = std::mem::replace(&mut traversal.flags, flags);
        Self { traversal, saved }
    }
}

impl<'g> Deref for ScopedFlags<'_, 'g> {
    type Target = DataTraversal<'g>;

    fn deref(&self) -> &Self::Target {
        &*self.traversal
    }
}

impl DerefMut for ScopedFlags<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.traversal
    }
}

impl Drop for ScopedFlags<'_, '_> {
    fn drop(&mut self) {
        self.traversal.flags = self.saved;
    }
}
