use smallvec::SmallVec;

use retrace_core::{DataTraversal, Id, TraversalError};

use crate::traversal::{Recording, TreeTraversal};
use crate::tree::{ObjectId, TreeObject};

type PlacedObjects = SmallVec<[ObjectId; 4]>;

impl<O: TreeObject> TreeTraversal<O> {
    fn begin_recording(&mut self) -> Option<Recording> {
        let recording = Recording {
            parent: self.active_parent(),
            objects: SmallVec::new(),
        };
        self.recording.replace(recording)
    }

    fn end_recording(&mut self, outer: Option<Recording>) -> PlacedObjects {
        let finished = std::mem::replace(&mut self.recording, outer);
        let placed = finished.map(|r| (r.parent, r.objects));
        let Some((parent, objects)) = placed else {
            return SmallVec::new();
        };
        // Whatever a nested region placed was also placed by the enclosing one.
        if let Some(outer) = &mut self.recording
            && outer.parent == parent
        {
            outer.objects.extend(objects.iter().copied());
        }
        objects
    }
}

/// [`DataTraversal::cached_region`] for content that places objects.
///
/// The objects the content places directly under the active parent are
/// remembered. When the content is skipped they are placed again, in the
/// same order, so that objects around the region can still move without
/// displacing it.
pub fn cached_tree_region<'g, O, R, E>(
    data: &mut DataTraversal<'g>,
    tree: &mut TreeTraversal<O>,
    id: &Id,
    body: impl FnOnce(&mut DataTraversal<'g>, &mut TreeTraversal<O>) -> Result<R, E>,
) -> Result<Option<R>, E>
where
    O: TreeObject,
    E: From<TraversalError>,
{
    let region = data.begin_cached_region(id)?;

    if !region.traversal_required {
        let (placed, _) = data.get_data(PlacedObjects::new)?;
        let placed = placed.clone();
        for object in placed {
            if tree.tree().contains(object) {
                tree.add_object(object);
            }
        }
        return Ok(None);
    }

    let outer = tree.begin_recording();
    let result = data.with_block(region.block, |data| body(data, tree));
    let placed = tree.end_recording(outer);
    let (recorded, _) = data.get_data(PlacedObjects::new)?;
    *recorded = placed;
    result.map(Some)
}
