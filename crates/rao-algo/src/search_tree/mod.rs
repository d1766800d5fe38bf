//! Search over network-action combinations.
//!
//! - [`SearchTree`]: depth-by-depth exploration and best-leaf selection
//! - [`Leaf`]: one combination, its snapshot and its results
//! - [`SearchTreeBloomer`]: candidate combinations below a leaf
//! - [`SnapshotPool`]: exclusive snapshots for in-flight leaves

pub mod bloomer;
pub mod leaf;
mod pool;
mod tree;

pub use bloomer::SearchTreeBloomer;
pub use leaf::{Leaf, LeafId, LeafStatus};
pub use pool::{PooledSnapshot, SnapshotPool};
pub use tree::{DepthStats, LeafRecord, SearchTree, SearchTreeInput, SearchTreeReport};
