use crate::error::TraversalError;
use crate::graph::BlockId;
use crate::id::{CapturedId, Id};
use crate::traversal::DataTraversal;

/// Where a cached region keeps its content, and whether that content must be
/// traversed on this pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CachedRegion {
    pub block: BlockId,
    pub traversal_required: bool,
}

impl<'g> DataTraversal<'g> {
    /// Claims the slots of a cached region keyed by `id`.
    ///
    /// Traversal is required when `id` differs from the one captured last
    /// time, or when the content block's caches were cleared since. The new
    /// id is captured before the content runs, so a failing pass is not
    /// retried until something changes.
    pub fn begin_cached_region(&mut self, id: &Id) -> Result<CachedRegion, TraversalError> {
        let (captured, _) = self.get_data(CapturedId::default)?;
        let unchanged = captured.matches(id);
        if !unchanged {
            captured.capture(id);
        }
        let block = self.get_block()?;
        let traversal_required = !unchanged || self.graph.is_cache_clear(block);
        if !traversal_required {
            log::trace!("skipping cached region {id:?}");
        }
        Ok(CachedRegion {
            block,
            traversal_required,
        })
    }

    /// Runs `body` in the region's block only if traversal is required.
    /// Returns `Ok(None)` when the region was skipped.
    pub fn cached_region<R, E>(
        &mut self,
        id: &Id,
        body: impl FnOnce(&mut DataTraversal<'g>) -> Result<R, E>,
    ) -> Result<Option<R>, E>
    where
        E: From<TraversalError>,
    {
        let region = self.begin_cached_region(id)?;
        if !region.traversal_required {
            return Ok(None);
        }
        self.with_block(region.block, body).map(Some)
    }
}
