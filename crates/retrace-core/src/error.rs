use thiserror::Error;

use crate::graph::BlockId;

/// Failures reported by the storage graph during a traversal.
///
/// All of these indicate that the application's traversal is not stable in a
/// way the engine can work with, so they abort the current pass. The graph
/// itself stays consistent and can be traversed again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraversalError {
    /// A naming scope saw its names in a different order while garbage
    /// collection was disabled.
    #[error("named block order must remain constant with GC disabled")]
    NamedBlockOutOfOrder,

    /// The node at a positional slot was created with a different type.
    #[error("data node at position {position} is not a `{expected}`")]
    NodeTypeMismatch {
        position: usize,
        expected: &'static str,
    },

    /// The same name was used twice within one pass of a naming scope.
    #[error("name {0} was already visited in this naming scope")]
    DuplicateName(String),

    /// A naming scope was used with a traversal of a different graph.
    #[error("naming scope belongs to a different data graph")]
    ForeignNamingScope,

    /// A block handle outlived the block it refers to.
    #[error("block {0:?} no longer exists")]
    StaleBlock(BlockId),
}
