use smallvec::SmallVec;

use retrace_core::{DataTraversal, TraversalError};

use crate::tree::{Nodes, ObjectId, ObjectTree, TreeObject, link, mark_content_changed, unlink};

pub(crate) struct Recording {
    pub(crate) parent: Option<ObjectId>,
    pub(crate) objects: SmallVec<[ObjectId; 4]>,
}

/// Cursor of one reconciliation pass over an [`ObjectTree`].
///
/// The traversal tracks where the next object is expected: right after the
/// last object placed under the active parent, or first under it. Objects
/// already found there stay put; anything else is relocated into that slot.
pub struct TreeTraversal<O> {
    tree: ObjectTree<O>,
    active_parent: Option<ObjectId>,
    last_sibling: Option<ObjectId>,
    pub(crate) recording: Option<Recording>,
}

fn expected_node<O>(
    nodes: &Nodes<O>,
    active_parent: Option<ObjectId>,
    last_sibling: Option<ObjectId>,
) -> Option<ObjectId> {
    match last_sibling {
        Some(sibling) => nodes.get(sibling).and_then(|n| n.next),
        None => active_parent
            .and_then(|p| nodes.get(p))
            .and_then(|n| n.first_child),
    }
}

impl<O: TreeObject> TreeTraversal<O> {
    pub fn new(tree: &ObjectTree<O>) -> Self {
        Self {
            tree: tree.clone(),
            active_parent: None,
            last_sibling: None,
            recording: None,
        }
    }

    pub fn tree(&self) -> &ObjectTree<O> {
        &self.tree
    }

    pub fn active_parent(&self) -> Option<ObjectId> {
        self.active_parent
    }

    fn check_for_movement(&mut self, node: ObjectId) {
        let Some(parent) = self.active_parent else {
            log::warn!("object {node:?} placed outside of a tree traversal");
            return;
        };
        if let Some(recording) = &mut self.recording
            && recording.parent == Some(parent)
        {
            recording.objects.push(node);
        }

        let mut nodes = self.tree.nodes.borrow_mut();
        if !nodes.contains_key(node) || !nodes.contains_key(parent) {
            return;
        }
        let expected = expected_node(&nodes, Some(parent), self.last_sibling);
        if expected == Some(node) {
            return;
        }

        let old_parent = unlink(&mut nodes, node);
        {
            let nodes = &*nodes;
            let after = self.last_sibling.and_then(|s| nodes.get(s)).map(|n| &n.object);
            let before = expected.and_then(|e| nodes.get(e)).map(|n| &n.object);
            nodes[node].object.relocate(&nodes[parent].object, after, before);
        }
        link(&mut nodes, node, parent, self.last_sibling, expected);
        mark_content_changed(&mut nodes, old_parent);
        mark_content_changed(&mut nodes, Some(parent));
    }

    fn activate_parent(&mut self, parent: ObjectId) {
        self.active_parent = Some(parent);
        self.last_sibling = None;
    }

    /// Removes every object after the last one placed under the active
    /// parent.
    fn cap_sibling_list(&mut self) {
        let Some(parent) = self.active_parent else {
            return;
        };
        let mut nodes = self.tree.nodes.borrow_mut();
        let mut cursor = expected_node(&nodes, Some(parent), self.last_sibling);
        if cursor.is_none() {
            return;
        }
        let cut = match self.last_sibling {
            Some(sibling) => nodes.get_mut(sibling).map(|n| &mut n.next),
            None => nodes.get_mut(parent).map(|n| &mut n.first_child),
        };
        if let Some(link) = cut {
            *link = None;
        }
        while let Some(id) = cursor {
            let Some(node) = nodes.get_mut(id) else {
                break;
            };
            cursor = node.next.take();
            node.prev = None;
            node.parent = None;
            node.object.remove();
        }
        mark_content_changed(&mut nodes, Some(parent));
    }

    /// Places `node` at the current position under the active parent.
    pub fn add_object(&mut self, node: ObjectId) {
        self.check_for_movement(node);
        self.last_sibling = Some(node);
    }

    /// Places `node`, then reconciles its children with `content`.
    ///
    /// Children left over from the previous pass are removed only when
    /// `content` succeeds.
    pub fn scoped_node<R, E>(
        &mut self,
        node: ObjectId,
        content: impl FnOnce(&mut Self) -> Result<R, E>,
    ) -> Result<R, E> {
        self.check_for_movement(node);
        let parent = self.active_parent;
        self.activate_parent(node);
        let result = content(self);
        if result.is_ok() {
            self.cap_sibling_list();
        }
        self.active_parent = parent;
        self.last_sibling = Some(node);
        result
    }

    /// Reconciles the children of an object placed elsewhere.
    pub fn scoped_children<R, E>(
        &mut self,
        parent: ObjectId,
        content: impl FnOnce(&mut Self) -> Result<R, E>,
    ) -> Result<R, E> {
        let saved = (self.active_parent, self.last_sibling);
        self.activate_parent(parent);
        let result = content(self);
        if result.is_ok() {
            self.cap_sibling_list();
        }
        (self.active_parent, self.last_sibling) = saved;
        result
    }
}

impl<O: TreeObject + 'static> TreeTraversal<O> {
    /// Tree node kept in the next cached slot of `data`, created with `make`
    /// whenever the slot is empty. The node is not placed.
    pub fn cached_node(
        &self,
        data: &mut DataTraversal<'_>,
        make: impl FnOnce() -> O,
    ) -> Result<ObjectId, TraversalError> {
        let (handle, _) = data.get_cached_data(|| self.tree.create(make()))?;
        Ok(handle.id())
    }

    /// [`cached_node`](Self::cached_node) followed by
    /// [`add_object`](Self::add_object).
    pub fn add_cached_object(
        &mut self,
        data: &mut DataTraversal<'_>,
        make: impl FnOnce() -> O,
    ) -> Result<ObjectId, TraversalError> {
        let node = self.cached_node(data, make)?;
        self.add_object(node);
        Ok(node)
    }
}

/// Reconciles the children of `root` with `content`, in a fresh traversal.
pub fn traverse_object_tree<O, R, E>(
    tree: &ObjectTree<O>,
    root: ObjectId,
    content: impl FnOnce(&mut TreeTraversal<O>) -> Result<R, E>,
) -> Result<R, E>
where
    O: TreeObject,
{
    let mut traversal = TreeTraversal::new(tree);
    traversal.scoped_children(root, content)
}
