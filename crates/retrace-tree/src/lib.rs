//! # Object-tree reconciliation
//!
//! Retrace-tree keeps an external tree of objects (widgets, DOM nodes, scene
//! entries) in the order a `retrace_core` traversal visits them. Objects
//! implement [`TreeObject`]; the reconciler only ever asks them to
//! `relocate` or `remove` themselves, and only when their position actually
//! changed.
//!
//! Tree nodes are usually kept in cached storage of the data graph, so an
//! object disappears from the tree as soon as the code that placed it stops
//! running:
//!
//! ```rust
//! use std::cell::RefCell;
//! use retrace_core::*;
//! use retrace_tree::*;
//!
//! struct Label(&'static str, RefCell<Vec<String>>);
//!
//! impl TreeObject for Label {
//!     fn relocate(&self, parent: &Self, _after: Option<&Self>, _before: Option<&Self>) {
//!         parent.1.borrow_mut().push(format!("+{}", self.0));
//!     }
//!     fn remove(&self) {}
//! }
//!
//! let tree = ObjectTree::new();
//! let root = tree.create(Label("root", RefCell::default()));
//! let mut graph = DataGraph::new();
//!
//! for shown in [true, true, false] {
//!     graph
//!         .traverse(|t| {
//!             traverse_object_tree(&tree, root.id(), |objects| {
//!                 t.if_block(shown, |t| {
//!                     objects.add_cached_object(t, || Label("child", RefCell::default()))
//!                 })
//!             })
//!         })
//!         .unwrap();
//! }
//!
//! // Placed once, then left alone, then removed.
//! assert_eq!(tree.with_object(root.id(), |r| r.1.borrow().len()), Some(1));
//! assert!(tree.children(root.id()).is_empty());
//! ```
//!
//! `cached_tree_region` combines this with content caching: a skipped region
//! re-places the objects it placed last time, so the surrounding reconciliation
//! still sees them.

pub mod caching;
pub mod traversal;
pub mod tree;

mod tests;

pub use caching::*;
pub use traversal::*;
pub use tree::{ObjectId, ObjectTree, TreeNodeHandle, TreeObject};
