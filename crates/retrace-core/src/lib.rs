//! # Retained state for immediate-style code
//!
//! Retrace lets code that re-runs from scratch on every pass keep state
//! between passes. Each pass walks a `DataGraph` with a `DataTraversal`, and
//! every request the code makes (a value, a child block, a naming scope)
//! claims the next slot of the active block. As long as the code makes the
//! same requests in the same order, it gets the same storage back.
//!
//! ```rust
//! use retrace_core::*;
//!
//! let mut graph = DataGraph::new();
//! for pass in 0..3 {
//!     graph.traverse(|t| -> Result<(), TraversalError> {
//!         let (counter, is_new) = t.get_data(|| 0)?;
//!         assert_eq!(is_new, pass == 0);
//!         *counter += 1;
//!         assert_eq!(*counter, pass + 1);
//!         Ok(())
//!     })
//!     .unwrap();
//! }
//! ```
//!
//! ## Control flow
//!
//! Positions only stay stable if branches and loops get storage of their
//! own. `if_block`, `for_each` and `switch_block` do that:
//!
//! ```rust
//! use retrace_core::*;
//!
//! let mut graph = DataGraph::new();
//! graph
//!     .traverse(|t| -> Result<(), TraversalError> {
//!         t.if_block(true, |t| {
//!             t.get_data(|| "only when the branch is taken")?;
//!             Ok::<_, TraversalError>(())
//!         })?;
//!         t.for_each(["a", "b"], |t, name| {
//!             t.get_data(|| name.len())?;
//!             Ok::<_, TraversalError>(())
//!         })
//!     })
//!     .unwrap();
//! ```
//!
//! ## Named blocks
//!
//! Items that move around (list rows, tabs) should key their storage by
//! [`Id`] instead of position. Inside `naming_context`, each `named_block`
//! follows its id across reorders, insertions and removals:
//!
//! ```rust
//! use retrace_core::*;
//!
//! let mut graph = DataGraph::new();
//! for order in [[1, 2, 3], [3, 1, 2]] {
//!     graph
//!         .traverse(|t| {
//!             t.naming_context(|t, scope| {
//!                 for item in order {
//!                     scope.named_block(t, &make_id(item), Lifetime::Scoped, |t| {
//!                         let (value, _) = t.get_data(|| item * 10)?;
//!                         assert_eq!(*value, item * 10);
//!                         Ok::<_, TraversalError>(())
//!                     })?;
//!                 }
//!                 Ok::<_, TraversalError>(())
//!             })
//!         })
//!         .unwrap();
//! }
//! assert_eq!(graph.live_named_blocks(), 3);
//! ```
//!
//! Names a pass does not visit are collected when their scope ends, unless
//! they were created with [`Lifetime::Manual`].
//!
//! ## Caches
//!
//! `get_cached_data` values are dropped whenever their block goes inactive,
//! and `cached_region` skips its content entirely while its id is unchanged
//! and nothing cleared its caches.

pub mod caching;
pub mod error;
pub mod flow;
pub mod graph;
pub mod id;
pub mod naming;
pub mod traversal;


pub use caching::*;
pub use error::*;
pub use graph::{BlockId, DataGraph, GraphStats, NodeData};
pub use id::*;
pub use naming::*;
pub use traversal::*;
