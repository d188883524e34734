use std::cell::RefCell;
use std::rc::Rc;

use slotmap::{SlotMap, new_key_type};

new_key_type! {
    pub struct ObjectId;
}

/// An object living in some external tree (a widget, a DOM node, a scene
/// graph entry) that the reconciler keeps in traversal order.
///
/// Callbacks run while the owning [`ObjectTree`] is borrowed, so they must
/// not call back into it.
pub trait TreeObject {
    /// Moves this object under `new_parent`, directly after `after`, or to the
    /// front when `after` is `None`. `before` is the sibling that will follow
    /// it, if any.
    fn relocate(&self, new_parent: &Self, after: Option<&Self>, before: Option<&Self>);

    /// Detaches this object from its parent.
    fn remove(&self);
}

pub(crate) struct TreeNode<O> {
    pub(crate) object: O,
    pub(crate) parent: Option<ObjectId>,
    pub(crate) prev: Option<ObjectId>,
    pub(crate) next: Option<ObjectId>,
    pub(crate) first_child: Option<ObjectId>,
    pub(crate) content_changed: bool,
}

pub(crate) type Nodes<O> = SlotMap<ObjectId, TreeNode<O>>;

/// Arena of tree nodes shared between the reconciler and the handles that
/// keep nodes alive.
pub struct ObjectTree<O> {
    pub(crate) nodes: Rc<RefCell<Nodes<O>>>,
}

impl<O> Clone for ObjectTree<O> {
    fn clone(&self) -> Self {
        Self {
            nodes: self.nodes.clone(),
        }
    }
}

impl<O: TreeObject> Default for ObjectTree<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: TreeObject> ObjectTree<O> {
    pub fn new() -> Self {
        Self {
            nodes: Rc::new(RefCell::new(SlotMap::with_key())),
        }
    }

    /// Adds an unplaced node. It stays in the arena for as long as the
    /// returned handle lives.
    pub fn create(&self, object: O) -> TreeNodeHandle<O> {
        let id = self.nodes.borrow_mut().insert(TreeNode {
            object,
            parent: None,
            prev: None,
            next: None,
            first_child: None,
            content_changed: false,
        });
        TreeNodeHandle {
            tree: self.clone(),
            id,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.nodes.borrow().contains_key(id)
    }

    pub fn with_object<R>(&self, id: ObjectId, f: impl FnOnce(&O) -> R) -> Option<R> {
        self.nodes.borrow().get(id).map(|n| f(&n.object))
    }

    pub fn parent(&self, id: ObjectId) -> Option<ObjectId> {
        self.nodes.borrow().get(id).and_then(|n| n.parent)
    }

    pub fn children(&self, id: ObjectId) -> Vec<ObjectId> {
        let nodes = self.nodes.borrow();
        let mut children = Vec::new();
        let mut cursor = nodes.get(id).and_then(|n| n.first_child);
        while let Some(child) = cursor {
            children.push(child);
            cursor = nodes.get(child).and_then(|n| n.next);
        }
        children
    }

    /// Whether anything under `id` was placed, moved or removed since the
    /// last [`clear_content_changes`](Self::clear_content_changes).
    pub fn content_changed(&self, id: ObjectId) -> bool {
        self.nodes.borrow().get(id).is_some_and(|n| n.content_changed)
    }

    pub fn clear_content_changes(&self) {
        for (_, node) in self.nodes.borrow_mut().iter_mut() {
            node.content_changed = false;
        }
    }
}

/// Owning handle of a tree node.
///
/// Dropping it removes the node: a placed object gets
/// [`TreeObject::remove`], and children still linked below it are simply
/// forgotten since they leave the external tree along with it.
pub struct TreeNodeHandle<O: TreeObject> {
    tree: ObjectTree<O>,
    id: ObjectId,
}

impl<O: TreeObject> TreeNodeHandle<O> {
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn tree(&self) -> &ObjectTree<O> {
        &self.tree
    }
}

impl<O: TreeObject> Drop for TreeNodeHandle<O> {
    fn drop(&mut self) {
        let Ok(mut nodes) = self.tree.nodes.try_borrow_mut() else {
            log::warn!("object tree busy while dropping node {:?}; leaking it", self.id);
            return;
        };
        if let Some(parent) = unlink(&mut nodes, self.id) {
            mark_content_changed(&mut nodes, Some(parent));
            if let Some(node) = nodes.get(self.id) {
                node.object.remove();
            }
        }
        let mut cursor = nodes.get(self.id).and_then(|n| n.first_child);
        while let Some(child) = cursor {
            let Some(node) = nodes.get_mut(child) else {
                break;
            };
            cursor = node.next.take();
            node.prev = None;
            node.parent = None;
        }
        nodes.remove(self.id);
    }
}

/// Takes `id` out of its sibling list. Returns the parent it was linked
/// under, if any.
pub(crate) fn unlink<O>(nodes: &mut Nodes<O>, id: ObjectId) -> Option<ObjectId> {
    let node = nodes.get_mut(id)?;
    let parent = node.parent.take()?;
    let prev = node.prev.take();
    let next = node.next.take();
    match prev {
        Some(prev) => {
            if let Some(p) = nodes.get_mut(prev) {
                p.next = next;
            }
        }
        None => {
            if let Some(p) = nodes.get_mut(parent) {
                p.first_child = next;
            }
        }
    }
    if let Some(next) = next
        && let Some(n) = nodes.get_mut(next)
    {
        n.prev = prev;
    }
    Some(parent)
}

pub(crate) fn link<O>(
    nodes: &mut Nodes<O>,
    id: ObjectId,
    parent: ObjectId,
    after: Option<ObjectId>,
    before: Option<ObjectId>,
) {
    if let Some(node) = nodes.get_mut(id) {
        node.parent = Some(parent);
        node.prev = after;
        node.next = before;
    }
    match after {
        Some(after) => {
            if let Some(a) = nodes.get_mut(after) {
                a.next = Some(id);
            }
        }
        None => {
            if let Some(p) = nodes.get_mut(parent) {
                p.first_child = Some(id);
            }
        }
    }
    if let Some(before) = before
        && let Some(b) = nodes.get_mut(before)
    {
        b.prev = Some(id);
    }
}

pub(crate) fn mark_content_changed<O>(nodes: &mut Nodes<O>, from: Option<ObjectId>) {
    let mut cursor = from;
    while let Some(id) = cursor {
        let Some(node) = nodes.get_mut(id) else {
            break;
        };
        if node.content_changed {
            break;
        }
        node.content_changed = true;
        cursor = node.parent;
    }
}
