//! Graph Tensor Primitives
//!
//! Device selection, activations, shape checks and vertex-axis pooling shared
//! by the layers and models.
//!
//! ## Submodules
//!
//! - [`device`]: Device selection (`EQGRAPH_NO_GPU`, Metal, CUDA, CPU)
//! - [`activations`]: Activation functions (sigmoid, relu)
//! - [`pooling`]: Column/row pooling over one vertex axis
//! - [`shape`]: Rank and squareness checks for graph tensors

mod activations;
mod device;
mod pooling;
mod shape;

pub use activations::*;
pub use device::*;
pub use pooling::*;
pub use shape::*;
